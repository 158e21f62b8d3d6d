use tower_sessions::Session;

use crate::{
    AppResult,
    store::{Identity, UserDirectory},
};

pub const USER_ID: &str = "user_id";

pub async fn current_identity(
    session: &Session,
    users: &dyn UserDirectory,
) -> AppResult<Option<Identity>> {
    let Some(user_id) = session.get::<i64>(USER_ID).await? else {
        return Ok(None);
    };

    Ok(users.user_by_id(user_id).await?)
}
