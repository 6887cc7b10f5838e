//! Host file-system abstraction.
//!
//! The bridge never touches storage directly; it talks to a
//! [`HostFileSystem`]. Two backends ship with the crate:
//!
//! - **Local** ([`LocalFileSystem`]): the operating-system file system,
//!   addressed through `file:` URIs, watched with `notify`
//! - **Memory** ([`MemoryFileSystem`]): an in-process tree addressed by URI
//!   path, with deterministic change events and call accounting
//!
//! # Contract
//!
//! Implementations follow the editor file-system provider semantics:
//!
//! - `write_file` on a missing target without `create` fails with
//!   [`HostErrorKind::NotFound`]; on an existing target without `overwrite`
//!   it fails with [`HostErrorKind::AlreadyExists`]
//! - a missing parent directory is [`HostErrorKind::NotFound`]
//! - `watch` is always recursive and reports changes through the given sink
//!   until the returned [`HostWatcher`] is closed or dropped

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{BridgeConfig, HostBackend};
use crate::error::Result;

pub mod local;
pub mod memory;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

/// Kind of a file-system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Anything else (socket, device, dangling link).
    Unknown,
}

/// Result of [`HostFileSystem::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Entry kind.
    pub file_type: FileType,
    /// Creation time, epoch seconds.
    pub ctime: i64,
    /// Last modification time, epoch seconds.
    pub mtime: i64,
    /// Size in bytes.
    pub size: u64,
}

/// Options for [`HostFileSystem::write_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Create the file if it is missing.
    pub create: bool,
    /// Replace the file if it exists.
    pub overwrite: bool,
}

/// Options for [`HostFileSystem::delete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete directory contents too.
    pub recursive: bool,
}

/// Options for [`HostFileSystem::rename`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameOptions {
    /// Replace an existing destination.
    pub overwrite: bool,
}

/// What a host watcher observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostChangeKind {
    /// An entry appeared.
    Created,
    /// An entry's content changed.
    Changed,
    /// An entry disappeared.
    Deleted,
}

/// A change reported by a host watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostChange {
    /// What happened.
    pub kind: HostChangeKind,
    /// URI of the affected entry.
    pub uri: String,
}

impl HostChange {
    /// Create a change record.
    #[must_use]
    pub fn new(kind: HostChangeKind, uri: impl Into<String>) -> Self {
        Self {
            kind,
            uri: uri.into(),
        }
    }
}

/// Where a host watcher delivers its changes.
pub type ChangeSink = mpsc::UnboundedSender<HostChange>;

/// Category of a host failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    /// The target does not exist.
    NotFound,
    /// The target exists and may not be replaced.
    AlreadyExists,
    /// A directory was required.
    NotADirectory,
    /// A file was required.
    IsADirectory,
    /// Access was denied.
    PermissionDenied,
    /// The backend cannot serve this URI.
    Unavailable,
    /// Anything else.
    Other,
}

/// A failed host operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostError {
    /// Failure category.
    pub kind: HostErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl HostError {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// `uri` does not exist.
    #[must_use]
    pub fn not_found(uri: &str) -> Self {
        Self::new(HostErrorKind::NotFound, format!("file not found: {uri}"))
    }

    /// `uri` already exists.
    #[must_use]
    pub fn already_exists(uri: &str) -> Self {
        Self::new(HostErrorKind::AlreadyExists, format!("file exists: {uri}"))
    }

    /// `uri` is not a directory.
    #[must_use]
    pub fn not_a_directory(uri: &str) -> Self {
        Self::new(HostErrorKind::NotADirectory, format!("not a directory: {uri}"))
    }

    /// `uri` is a directory.
    #[must_use]
    pub fn is_a_directory(uri: &str) -> Self {
        Self::new(HostErrorKind::IsADirectory, format!("is a directory: {uri}"))
    }

    /// Access denied.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::PermissionDenied, message)
    }

    /// The backend cannot serve the URI.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Unavailable, message)
    }

    /// Uncategorized failure.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(HostErrorKind::Other, message)
    }

    /// Convert an I/O error raised while operating on `uri`.
    #[must_use]
    pub fn from_io(err: &io::Error, uri: &str) -> Self {
        Self::new(io_kind(err), format!("{uri}: {err}"))
    }
}

impl From<io::Error> for HostError {
    fn from(err: io::Error) -> Self {
        Self::new(io_kind(&err), err.to_string())
    }
}

fn io_kind(err: &io::Error) -> HostErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => HostErrorKind::NotFound,
        io::ErrorKind::AlreadyExists => HostErrorKind::AlreadyExists,
        io::ErrorKind::NotADirectory => HostErrorKind::NotADirectory,
        io::ErrorKind::IsADirectory => HostErrorKind::IsADirectory,
        io::ErrorKind::PermissionDenied => HostErrorKind::PermissionDenied,
        _ => HostErrorKind::Other,
    }
}

/// Result type for host operations.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Handle of one recursive host watch.
///
/// Closing is idempotent; implementations also close on drop.
pub trait HostWatcher: Send {
    /// Stop delivering changes and release the underlying watch.
    fn close(&mut self);
}

/// A URI-addressed file system the bridge can serve.
///
/// Implementations must be `Send + Sync`: one instance is shared by every
/// session and called concurrently.
#[async_trait]
pub trait HostFileSystem: Send + Sync {
    /// Metadata of `uri`.
    async fn stat(&self, uri: &str) -> HostResult<FileStat>;

    /// Whole content of the file at `uri`.
    async fn read_file(&self, uri: &str) -> HostResult<Vec<u8>>;

    /// Write `content` to `uri` honouring `options`.
    async fn write_file(&self, uri: &str, content: &[u8], options: WriteOptions)
    -> HostResult<()>;

    /// Create the directory `uri`; its parent must exist.
    async fn create_directory(&self, uri: &str) -> HostResult<()>;

    /// Delete `uri`.
    async fn delete(&self, uri: &str, options: DeleteOptions) -> HostResult<()>;

    /// Move `from` to `to`.
    async fn rename(&self, from: &str, to: &str, options: RenameOptions) -> HostResult<()>;

    /// Names and kinds of the direct children of the directory `uri`.
    async fn read_directory(&self, uri: &str) -> HostResult<Vec<(String, FileType)>>;

    /// Start a recursive watch rooted at `uri`, delivering into `sink`.
    async fn watch(&self, uri: &str, sink: ChangeSink) -> HostResult<Box<dyn HostWatcher>>;
}

/// Create the host backend selected by `config`.
///
/// # Errors
///
/// Returns an error if the configured local root cannot be resolved.
pub fn create_host(config: &BridgeConfig) -> Result<Arc<dyn HostFileSystem>> {
    match config.backend {
        HostBackend::Local => {
            let host = match &config.root {
                Some(root) => LocalFileSystem::with_root(root)?,
                None => LocalFileSystem::new(),
            };
            Ok(Arc::new(host))
        }
        HostBackend::Memory => Ok(Arc::new(MemoryFileSystem::new())),
    }
}
