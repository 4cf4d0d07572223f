//! Error types for the surql-rpc crate.
//!
//! Every failure a call can produce is one variant of [`Error`], so callers
//! can match on the class of failure and decide their own retry policy.

use std::time::Duration;

use crate::codec::{DecodeError, EncodeError};
use crate::protocol::{Method, RpcError};
use crate::request::SchemaError;

/// Unified error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Parameters rejected locally; nothing was sent
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The transport could not be opened or was lost mid-call
    #[error("connection error: {0}")]
    Connection(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// The server broke the message contract
    #[error("protocol error while {operation}: {message}")]
    Protocol {
        operation: &'static str,
        message: String,
    },

    /// The server answered with an error object
    #[error("server error while {operation} (code {code}): {message}")]
    Server {
        operation: &'static str,
        code: i64,
        message: String,
    },

    #[error("timed out after {elapsed:?} while {operation}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn protocol(method: Method, message: impl Into<String>) -> Self {
        Self::Protocol {
            operation: method.action(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn server(method: Method, error: RpcError) -> Self {
        Self::Server {
            operation: method.action(),
            code: error.code,
            message: error.message,
        }
    }

    /// True when the session should treat its transport as gone.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
