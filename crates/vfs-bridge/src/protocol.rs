//! Wire types of the `vfs/*` method namespace.
//!
//! Every operation answers with an envelope whose `errorCode` is `0` on
//! success. Failures are data, not JSON-RPC errors, so the peer can tell
//! "the file is missing" apart from "the request was malformed".

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::host::HostErrorKind;

/// Method names, grouped the way the peer's capability interfaces are.
pub mod methods {
    /// `{uri}` → base64 content.
    pub const READ_FILE: &str = "vfs/input/readFile";
    /// `{uri}` → boolean; never fails on a missing target.
    pub const EXISTS: &str = "vfs/input/exists";
    /// `{uri}` → epoch seconds.
    pub const LAST_MODIFIED: &str = "vfs/input/lastModified";
    /// `{uri}` → epoch seconds.
    pub const CREATED: &str = "vfs/input/created";
    /// `{uri}` → boolean.
    pub const IS_DIRECTORY: &str = "vfs/input/isDirectory";
    /// `{uri}` → boolean.
    pub const IS_FILE: &str = "vfs/input/isFile";
    /// `{uri}` → parallel `entries` / `areDirectory` arrays.
    pub const LIST: &str = "vfs/input/list";

    /// `{uri, content, create, overwrite}`.
    pub const WRITE_FILE: &str = "vfs/output/writeFile";
    /// `{uri}`.
    pub const MK_DIRECTORY: &str = "vfs/output/mkDirectory";
    /// `{uri, recursive}`.
    pub const REMOVE: &str = "vfs/output/remove";
    /// `{from, to, overwrite}`.
    pub const RENAME: &str = "vfs/output/rename";

    /// `{uri, watcher}`.
    pub const WATCH: &str = "vfs/watcher/watch";
    /// `{uri, watcher}`.
    pub const UNWATCH: &str = "vfs/watcher/unwatch";
    /// Outbound notification carrying a [`super::ChangeEvent`].
    pub const EMIT_WATCH: &str = "vfs/watcher/emitWatch";
}

/// Closed set of `errorCode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ErrorCode {
    /// The operation succeeded.
    Success = 0,
    /// Generic failure (guard refusal, protocol misuse, bad content, or any
    /// host failure in compact mode).
    Failed = 1,
    /// The target does not exist.
    NotFound = 2,
    /// The target exists and may not be replaced.
    AlreadyExists = 3,
    /// A directory was required.
    NotADirectory = 4,
    /// A file was required.
    IsADirectory = 5,
    /// The host denied access.
    PermissionDenied = 6,
    /// The host cannot serve this URI.
    Unavailable = 7,
}

impl From<HostErrorKind> for ErrorCode {
    fn from(kind: HostErrorKind) -> Self {
        match kind {
            HostErrorKind::NotFound => Self::NotFound,
            HostErrorKind::AlreadyExists => Self::AlreadyExists,
            HostErrorKind::NotADirectory => Self::NotADirectory,
            HostErrorKind::IsADirectory => Self::IsADirectory,
            HostErrorKind::PermissionDenied => Self::PermissionDenied,
            HostErrorKind::Unavailable => Self::Unavailable,
            HostErrorKind::Other => Self::Failed,
        }
    }
}

/// How host failures are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCodeMode {
    /// Every failure is `errorCode: 1`.
    #[default]
    Compact,
    /// Host failures carry the [`ErrorCode`] matching their kind.
    Detailed,
}

impl ErrorCodeMode {
    /// The code to report for a host failure of `kind`.
    #[must_use]
    pub fn code_for(self, kind: HostErrorKind) -> ErrorCode {
        match self {
            Self::Compact => ErrorCode::Failed,
            Self::Detailed => kind.into(),
        }
    }
}

/// A failed operation before it is wrapped in its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoFailure {
    /// Non-zero code.
    pub code: ErrorCode,
    /// Description for the peer.
    pub message: String,
}

impl IoFailure {
    /// A generic (`errorCode: 1`) failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Failed,
            message: message.into(),
        }
    }
}

/// `{uri}` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriParams {
    /// Target URI.
    pub uri: String,
}

/// `vfs/output/writeFile` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFileParams {
    /// Target URI.
    pub uri: String,
    /// Base64 encoded content.
    pub content: String,
    /// Create the file if it is missing.
    pub create: bool,
    /// Replace the file if it exists.
    pub overwrite: bool,
}

/// `vfs/output/remove` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveParams {
    /// Target URI.
    pub uri: String,
    /// Remove directory contents too.
    #[serde(default)]
    pub recursive: bool,
}

/// `vfs/output/rename` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameParams {
    /// Source URI.
    pub from: String,
    /// Destination URI.
    pub to: String,
    /// Replace an existing destination.
    #[serde(default)]
    pub overwrite: bool,
}

/// `vfs/watcher/{watch,unwatch}` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchParams {
    /// Root of the recursive watch.
    pub uri: String,
    /// Peer-chosen watch identifier, echoed in change notifications.
    pub watcher: String,
}

/// `IOResult`: the envelope of operations without a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IoResult {
    /// `0` on success.
    pub error_code: ErrorCode,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl IoResult {
    /// Success.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            error_code: ErrorCode::Success,
            error_message: None,
        }
    }

    /// Whether `errorCode` is `0`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error_code == ErrorCode::Success
    }
}

impl From<Result<(), IoFailure>> for IoResult {
    fn from(result: Result<(), IoFailure>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(failure) => Self {
                error_code: failure.code,
                error_message: Some(failure.message),
            },
        }
    }
}

/// Envelope of operations returning a single value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueResult<T> {
    /// `0` on success.
    pub error_code: ErrorCode,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T> ValueResult<T> {
    /// Success carrying `value`.
    pub fn ok(value: T) -> Self {
        Self {
            error_code: ErrorCode::Success,
            error_message: None,
            result: Some(value),
        }
    }

    /// Whether `errorCode` is `0`.
    pub fn is_ok(&self) -> bool {
        self.error_code == ErrorCode::Success
    }
}

impl<T> From<Result<T, IoFailure>> for ValueResult<T> {
    fn from(result: Result<T, IoFailure>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(failure) => Self {
                error_code: failure.code,
                error_message: Some(failure.message),
                result: None,
            },
        }
    }
}

/// Envelope of `vfs/input/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    /// `0` on success.
    pub error_code: ErrorCode,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Entry names, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,
    /// `areDirectory[i]` describes `entries[i]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub are_directory: Option<Vec<bool>>,
}

impl From<Result<Vec<(String, bool)>, IoFailure>> for DirectoryListing {
    fn from(result: Result<Vec<(String, bool)>, IoFailure>) -> Self {
        match result {
            Ok(listing) => {
                let (entries, are_directory) = listing.into_iter().unzip();
                Self {
                    error_code: ErrorCode::Success,
                    error_message: None,
                    entries: Some(entries),
                    are_directory: Some(are_directory),
                }
            }
            Err(failure) => Self {
                error_code: failure.code,
                error_message: Some(failure.message),
                entries: None,
                are_directory: None,
            },
        }
    }
}

/// `changeType` of a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum ChangeType {
    /// An entry appeared.
    Created = 1,
    /// An entry disappeared.
    Deleted = 2,
    /// File content changed.
    Modified = 3,
}

/// `type` of a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum EntryType {
    /// A file (or, for deletions, something whose name looks like one).
    File = 1,
    /// A directory.
    Directory = 2,
}

/// Payload of `vfs/watcher/emitWatch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Identifier given to `vfs/watcher/watch`.
    pub watch_id: String,
    /// URI of the changed entry.
    pub location: String,
    /// What happened.
    pub change_type: ChangeType,
    /// What kind of entry it happened to.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
}
