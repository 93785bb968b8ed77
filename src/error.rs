//! The crate-wide error type.
//!
//! SamCore classifies every failure into one of the kinds spec'd for the
//! hub/client boundary: protocol, argument, authorization, storage,
//! transport or timeout. Dispatch code never panics on bad input from a
//! peer; it converts the failure into a [`SamError`] and the hub/client
//! turns that into a `status=false` reply rather than dropping the
//! connection.

use std::fmt;

use dusa_collection_utils::core::errors::ErrorArrayItem;

/// A single crate-wide error type, carrying enough information to be
/// reported back to a calling node as `errorMessage`.
#[derive(Debug)]
pub enum SamError {
    /// Unknown receiver, missing registration, malformed routing key.
    Protocol(String),
    /// A required field was missing from `args`.
    Argument(String),
    /// A node attempted to read or write another node's settings.
    Authorization(String),
    /// The settings file could not be read, parsed or written.
    Storage(String),
    /// The underlying connection failed or was lost.
    Transport(String),
    /// A `callApi` deadline elapsed before a reply arrived.
    Timeout,
}

impl SamError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        SamError::Protocol(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        SamError::Argument(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        SamError::Authorization(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        SamError::Storage(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        SamError::Transport(msg.into())
    }

    /// The human-readable text to place in a reply packet's `errorMessage`.
    pub fn message(&self) -> String {
        match self {
            SamError::Protocol(m) => m.clone(),
            SamError::Argument(m) => m.clone(),
            SamError::Authorization(m) => m.clone(),
            SamError::Storage(m) => m.clone(),
            SamError::Transport(m) => m.clone(),
            SamError::Timeout => "API Timeout!".to_string(),
        }
    }
}

impl fmt::Display for SamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamError::Protocol(m) => write!(f, "protocol error: {m}"),
            SamError::Argument(m) => write!(f, "argument error: {m}"),
            SamError::Authorization(m) => write!(f, "authorization error: {m}"),
            SamError::Storage(m) => write!(f, "storage error: {m}"),
            SamError::Transport(m) => write!(f, "transport error: {m}"),
            SamError::Timeout => write!(f, "API Timeout!"),
        }
    }
}

impl std::error::Error for SamError {}

impl From<std::io::Error> for SamError {
    fn from(err: std::io::Error) -> Self {
        SamError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SamError {
    fn from(err: serde_json::Error) -> Self {
        SamError::Storage(err.to_string())
    }
}

impl From<ErrorArrayItem> for SamError {
    fn from(err: ErrorArrayItem) -> Self {
        SamError::Storage(err.to_string())
    }
}

pub type SamResult<T> = Result<T, SamError>;
