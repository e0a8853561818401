//! Success/failure envelope handed to whatever sits in front of the manager
//! (the CLI today, an HTTP layer if one is added).

use crate::error::{ReorgError, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub status: u16,
    pub message: String,
}

impl From<&ReorgError> for ErrorBody {
    fn from(err: &ReorgError) -> Self {
        Self {
            kind: err.kind(),
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn failure(err: &ReorgError) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(err.to_string()),
            error: Some(ErrorBody::from(err)),
        }
    }
}

impl<T> From<Result<T>> for Envelope<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Envelope::ok(data),
            Err(e) => Envelope::failure(&e),
        }
    }
}
