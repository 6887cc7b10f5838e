//! Error types for the VFS bridge.
//!
//! Operation-level failures (a missing file, a refused scheme) are never
//! errors of this type: they travel to the remote peer as `IOResult` data
//! (see [`crate::protocol`]). This enum covers the infrastructure around
//! them: binding the listener, loading configuration, and the client side
//! of the protocol.

use std::io;
use thiserror::Error;
use vfs_bridge_rpc::ResponseError;

use crate::host::HostError;

/// Errors that can occur in the VFS bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Framing or message decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] vfs_bridge_rpc::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration file or option.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A host file-system backend could not be created.
    #[error("host file system error: {0}")]
    Host(#[from] HostError),

    /// The remote side answered with a JSON-RPC error.
    #[error("remote error: {0}")]
    Rpc(ResponseError),

    /// The connection closed before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type for VFS bridge operations.
pub type Result<T> = std::result::Result<T, Error>;
