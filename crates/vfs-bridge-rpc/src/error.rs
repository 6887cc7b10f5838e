//! Error types for framing and message decoding.

use std::io;
use thiserror::Error;

use crate::message::RequestId;

/// The error type for reading and writing JSON-RPC frames.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The frame body was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A header line was malformed or `Content-Length` was missing.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The advertised body length exceeds the configured limit.
    #[error("message of {length} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Advertised `Content-Length`.
        length: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// The body was JSON but not a JSON-RPC message.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What was wrong with the body.
        reason: String,
        /// The `id` member, when it could still be read.
        id: Option<RequestId>,
    },

    /// The stream ended in the middle of a frame.
    #[error("connection closed mid-frame")]
    UnexpectedEof,
}

impl Error {
    /// Whether the stream is still positioned at a frame boundary.
    ///
    /// Recoverable errors consumed a whole frame whose body could not be
    /// understood; the caller can answer with a JSON-RPC error and keep
    /// reading. Everything else leaves the stream in an unknown state.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Json(_) | Self::InvalidMessage { .. })
    }

    /// Shorthand for [`Error::InvalidMessage`].
    pub(crate) fn invalid_message(reason: impl Into<String>, id: Option<&RequestId>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
            id: id.cloned(),
        }
    }
}

/// A specialized Result type for framing operations.
pub type Result<T> = std::result::Result<T, Error>;
