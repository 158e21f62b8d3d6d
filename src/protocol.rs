use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::RelayError;

pub type Frame = Arc<str>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// `username` is advisory; the session identity wins.
    Message { message: String, username: String },
    Typing { username: String, is_typing: bool },
    ReadReceipt { message_id: i64 },
}

impl Inbound {
    /// Frames without a `type` are chat messages.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let mut value: Value = serde_json::from_str(raw)?;
        let Some(fields) = value.as_object_mut() else {
            return Err(RelayError::Protocol("frame is not a JSON object".to_owned()));
        };
        fields
            .entry("type")
            .or_insert_with(|| Value::from("message"));

        Ok(serde_json::from_value(value)?)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Inbound::Message { .. } => "message",
            Inbound::Typing { .. } => "typing",
            Inbound::ReadReceipt { .. } => "read_receipt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Message {
        message: String,
        username: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        message_id: i64,
    },
    Typing { username: String, is_typing: bool },
    UserJoin { username: String },
    UserLeave { username: String },
    Error { code: String, error: String },
}

impl Outbound {
    pub fn error(err: &RelayError) -> Self {
        Outbound::Error {
            code: err.code().to_owned(),
            error: err.to_string(),
        }
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}
