use std::error::Error as StdError;

use thiserror::Error;

use crate::core::RequestKind;
use crate::network::dht::Identifier;

pub type Result<T> = std::result::Result<T, DhtError>;

#[derive(Error, Debug)]
pub enum DhtError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("No node hosted for identifier {0}")]
    NodeNotFound(Identifier),

    #[error("No handler registered for {0} requests")]
    NoHandler(RequestKind),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("{0} handler did not complete")]
    HandlerAborted(RequestKind),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for DhtError {
    fn from(err: std::io::Error) -> Self {
        DhtError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for DhtError {
    fn from(err: serde_json::Error) -> Self {
        DhtError::SerializationError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for DhtError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DhtError::Timeout
    }
}

/// Application-level failure raised by a request handler.
///
/// Only `message` is ever sent back to the peer; `source` stays local and is
/// only visible in logs.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
