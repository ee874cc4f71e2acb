use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised before any network activity; never counted against the retry
/// budget and never turned into a `Decision`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("invalid intent: missing required field '{field}'")]
    MissingField { field: &'static str },
    #[error("invalid intent: field '{field}' {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

impl NegotiationError {
    pub fn field(&self) -> &'static str {
        match self {
            NegotiationError::MissingField { field }
            | NegotiationError::InvalidField { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
}

/// A failure below the HTTP status layer. Always retryable.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Request
        };
        Self::new(kind, err.to_string())
    }
}
