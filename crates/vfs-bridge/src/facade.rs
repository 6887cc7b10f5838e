//! The `vfs/*` operations, executed against the host file system.
//!
//! Each operation checks the [`SchemeGuard`] before touching the host and
//! folds every failure into the operation's envelope. Nothing here returns
//! a Rust error: a refused scheme, a missing file and undecodable content
//! are all answers the peer is expected to handle.

use std::future::Future;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::guard::SchemeGuard;
use crate::host::{
    DeleteOptions, FileType, HostError, HostFileSystem, HostResult, RenameOptions, WriteOptions,
};
use crate::protocol::{
    DirectoryListing, ErrorCodeMode, IoFailure, IoResult, ValueResult, WriteFileParams,
};
use crate::session::Outbound;
use crate::watch::{WatchError, WatchRegistry};

/// Operations shared by every session of a server.
#[derive(Clone)]
pub struct FileSystemFacade {
    host: Arc<dyn HostFileSystem>,
    guard: Arc<SchemeGuard>,
    error_codes: ErrorCodeMode,
}

impl std::fmt::Debug for FileSystemFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemFacade")
            .field("guard", &self.guard)
            .field("error_codes", &self.error_codes)
            .finish_non_exhaustive()
    }
}

impl FileSystemFacade {
    /// Serve `host`, refusing URIs whose scheme `guard` holds.
    #[must_use]
    pub fn new(
        host: Arc<dyn HostFileSystem>,
        guard: Arc<SchemeGuard>,
        error_codes: ErrorCodeMode,
    ) -> Self {
        Self {
            host,
            guard,
            error_codes,
        }
    }

    /// The served host.
    #[must_use]
    pub fn host(&self) -> &Arc<dyn HostFileSystem> {
        &self.host
    }

    /// The shared scheme guard.
    #[must_use]
    pub fn guard(&self) -> &Arc<SchemeGuard> {
        &self.guard
    }

    /// `vfs/input/readFile`: base64 content of `uri`.
    pub async fn read_file(&self, uri: &str) -> ValueResult<String> {
        self.run("readFile", uri, async {
            let content = self.host.read_file(uri).await?;
            Ok(STANDARD.encode(content))
        })
        .await
        .into()
    }

    /// `vfs/input/exists`: whether `uri` can be stat'ed.
    pub async fn exists(&self, uri: &str) -> ValueResult<bool> {
        self.run("exists", uri, async { Ok(self.host.stat(uri).await.is_ok()) })
            .await
            .into()
    }

    /// `vfs/input/lastModified`: modification time in epoch seconds.
    pub async fn last_modified(&self, uri: &str) -> ValueResult<i64> {
        self.run("lastModified", uri, async {
            Ok(self.host.stat(uri).await?.mtime)
        })
        .await
        .into()
    }

    /// `vfs/input/created`: creation time in epoch seconds.
    pub async fn created(&self, uri: &str) -> ValueResult<i64> {
        self.run("created", uri, async { Ok(self.host.stat(uri).await?.ctime) })
            .await
            .into()
    }

    /// `vfs/input/isDirectory`.
    pub async fn is_directory(&self, uri: &str) -> ValueResult<bool> {
        self.run("isDirectory", uri, async {
            Ok(self.host.stat(uri).await?.file_type == FileType::Directory)
        })
        .await
        .into()
    }

    /// `vfs/input/isFile`.
    pub async fn is_file(&self, uri: &str) -> ValueResult<bool> {
        self.run("isFile", uri, async {
            Ok(self.host.stat(uri).await?.file_type == FileType::File)
        })
        .await
        .into()
    }

    /// `vfs/input/list`: children of the directory `uri`.
    pub async fn list(&self, uri: &str) -> DirectoryListing {
        self.run("list", uri, async {
            let entries = self.host.read_directory(uri).await?;
            Ok(entries
                .into_iter()
                .map(|(name, file_type)| (name, file_type == FileType::Directory))
                .collect())
        })
        .await
        .into()
    }

    /// `vfs/output/writeFile`.
    pub async fn write_file(&self, params: &WriteFileParams) -> IoResult {
        let uri = params.uri.as_str();
        self.run("writeFile", uri, async {
            let content = STANDARD
                .decode(&params.content)
                .map_err(|e| HostError::other(format!("invalid base64 content for {uri}: {e}")))?;
            let options = WriteOptions {
                create: params.create,
                overwrite: params.overwrite,
            };
            self.host.write_file(uri, &content, options).await
        })
        .await
        .into()
    }

    /// `vfs/output/mkDirectory`.
    pub async fn mk_directory(&self, uri: &str) -> IoResult {
        self.run("mkDirectory", uri, self.host.create_directory(uri))
            .await
            .into()
    }

    /// `vfs/output/remove`.
    pub async fn remove(&self, uri: &str, recursive: bool) -> IoResult {
        self.run(
            "remove",
            uri,
            self.host.delete(uri, DeleteOptions { recursive }),
        )
        .await
        .into()
    }

    /// `vfs/output/rename`. Refused if either side is guarded.
    pub async fn rename(&self, from: &str, to: &str, overwrite: bool) -> IoResult {
        if let Some(refusal) = self.refusal("rename", to) {
            return Err::<(), _>(refusal).into();
        }
        self.run(
            "rename",
            from,
            self.host.rename(from, to, RenameOptions { overwrite }),
        )
        .await
        .into()
    }

    /// `vfs/watcher/watch`: open a subscription in `registry`.
    pub async fn watch(
        &self,
        registry: &mut WatchRegistry,
        uri: &str,
        watch_id: &str,
        outbound: Outbound,
    ) -> IoResult {
        if let Some(refusal) = self.refusal("watch", uri) {
            return Err::<(), _>(refusal).into();
        }
        registry
            .watch(&self.host, uri, watch_id, outbound)
            .await
            .map_err(|e| self.watch_failure("watch", uri, e))
            .into()
    }

    /// `vfs/watcher/unwatch`: close the subscription on `uri`.
    ///
    /// Subscriptions are keyed by URI; a different `watch_id` is tolerated.
    pub fn unwatch(&self, registry: &mut WatchRegistry, uri: &str, watch_id: &str) -> IoResult {
        if let Some(refusal) = self.refusal("unwatch", uri) {
            return Err::<(), _>(refusal).into();
        }
        registry
            .unwatch(uri)
            .map(|opened_as| {
                if opened_as != watch_id {
                    debug!(uri, watch_id, opened_as = %opened_as, "Unwatch id differs from watch id");
                }
            })
            .map_err(|e| self.watch_failure("unwatch", uri, e))
            .into()
    }

    /// Guard check, then `operation`, with host failures converted.
    async fn run<T>(
        &self,
        op: &str,
        uri: &str,
        operation: impl Future<Output = HostResult<T>>,
    ) -> Result<T, IoFailure> {
        if let Some(refusal) = self.refusal(op, uri) {
            return Err(refusal);
        }
        operation.await.map_err(|e| self.host_failure(op, uri, &e))
    }

    fn refusal(&self, op: &str, uri: &str) -> Option<IoFailure> {
        let scheme = self.guard.guarded_scheme(uri)?;
        debug!(op, uri, scheme, "Refusing guarded scheme");
        Some(IoFailure::failed(format!(
            "{op} refused: scheme '{scheme}' is served by the remote peer"
        )))
    }

    fn host_failure(&self, op: &str, uri: &str, err: &HostError) -> IoFailure {
        debug!(op, uri, error = %err, "Operation failed");
        IoFailure {
            code: self.error_codes.code_for(err.kind),
            message: err.to_string(),
        }
    }

    fn watch_failure(&self, op: &str, uri: &str, err: WatchError) -> IoFailure {
        match err {
            WatchError::Host(e) => self.host_failure(op, uri, &e),
            other => {
                debug!(op, uri, error = %other, "Operation failed");
                IoFailure::failed(other.to_string())
            }
        }
    }
}
