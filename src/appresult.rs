use axum::{http::StatusCode, response::{IntoResponse, Response}};
use tracing::error;

use crate::error::RelayError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<RelayError>() {
            Some(RelayError::AuthRequired) => StatusCode::UNAUTHORIZED,
            Some(RelayError::AccessDenied) => StatusCode::FORBIDDEN,
            Some(RelayError::RoomNotFound(_) | RelayError::UserNotFound(_)) => StatusCode::NOT_FOUND,
            Some(RelayError::Protocol(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
        }
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
