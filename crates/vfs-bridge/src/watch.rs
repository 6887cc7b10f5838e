//! Per-session watch subscriptions and the change relay.
//!
//! A session owns one [`WatchRegistry`]. Each entry is a
//! [`WatchSubscription`]: one recursive host watcher plus a relay task that
//! classifies the watcher's changes and queues `vfs/watcher/emitWatch`
//! notifications on the session's outbound channel. Dropping or closing a
//! subscription releases both.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use vfs_bridge_rpc::Notification;

use crate::host::{FileType, HostChange, HostChangeKind, HostError, HostFileSystem, HostWatcher};
use crate::protocol::{methods, ChangeEvent, ChangeType, EntryType};
use crate::session::Outbound;
use crate::uri::looks_like_file;

/// Why a watch or unwatch was refused.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The session already watches this URI.
    #[error("watch already defined for {0}")]
    AlreadyDefined(String),

    /// The session does not watch this URI.
    #[error("watch not defined for {0}")]
    NotDefined(String),

    /// The host refused to start the watch.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// One live recursive watch.
pub struct WatchSubscription {
    watch_id: String,
    uri: String,
    watcher: Option<Box<dyn HostWatcher>>,
    relay: JoinHandle<()>,
}

impl WatchSubscription {
    /// Identifier chosen by the peer.
    #[must_use]
    pub fn watch_id(&self) -> &str {
        &self.watch_id
    }

    /// Root of the watch.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Release the host watcher and stop the relay. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.close();
            self.relay.abort();
            debug!(uri = %self.uri, watch_id = %self.watch_id, "Closed watch");
        }
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("watch_id", &self.watch_id)
            .field("uri", &self.uri)
            .field("open", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

/// The subscriptions of one session, keyed by URI.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    subscriptions: HashMap<String, WatchSubscription>,
}

impl WatchRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `uri` and relay its changes to `outbound`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::AlreadyDefined`] if `uri` is already watched
    /// and [`WatchError::Host`] if the host cannot watch it.
    pub async fn watch(
        &mut self,
        host: &Arc<dyn HostFileSystem>,
        uri: &str,
        watch_id: &str,
        outbound: Outbound,
    ) -> Result<(), WatchError> {
        if self.subscriptions.contains_key(uri) {
            return Err(WatchError::AlreadyDefined(uri.to_string()));
        }

        let (sink, changes) = mpsc::unbounded_channel();
        let watcher = host.watch(uri, sink).await?;
        let relay = tokio::spawn(relay_changes(
            Arc::clone(host),
            watch_id.to_string(),
            changes,
            outbound,
        ));

        debug!(uri, watch_id, "Opened watch");
        self.subscriptions.insert(
            uri.to_string(),
            WatchSubscription {
                watch_id: watch_id.to_string(),
                uri: uri.to_string(),
                watcher: Some(watcher),
                relay,
            },
        );
        Ok(())
    }

    /// Stop watching `uri`. Returns the id the watch was opened with.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NotDefined`] if `uri` is not watched.
    pub fn unwatch(&mut self, uri: &str) -> Result<String, WatchError> {
        let mut subscription = self
            .subscriptions
            .remove(uri)
            .ok_or_else(|| WatchError::NotDefined(uri.to_string()))?;
        subscription.close();
        Ok(std::mem::take(&mut subscription.watch_id))
    }

    /// Close every subscription. Returns how many were open.
    pub fn clear(&mut self) -> usize {
        let count = self.subscriptions.len();
        for (_, mut subscription) in self.subscriptions.drain() {
            subscription.close();
        }
        count
    }

    /// Whether `uri` is watched.
    #[must_use]
    pub fn contains(&self, uri: &str) -> bool {
        self.subscriptions.contains_key(uri)
    }

    /// The id `uri` is watched under.
    #[must_use]
    pub fn watch_id(&self, uri: &str) -> Option<&str> {
        self.subscriptions.get(uri).map(WatchSubscription::watch_id)
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no subscription is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// Decide what a host change reports to the peer.
///
/// Deleted entries can no longer be inspected, so their type is guessed from
/// the name.
pub async fn classify(host: &dyn HostFileSystem, change: &HostChange) -> (ChangeType, EntryType) {
    match change.kind {
        HostChangeKind::Created => {
            let entry_type = match host.stat(&change.uri).await {
                Ok(stat) if stat.file_type == FileType::Directory => EntryType::Directory,
                _ => EntryType::File,
            };
            (ChangeType::Created, entry_type)
        }
        HostChangeKind::Changed => (ChangeType::Modified, EntryType::File),
        HostChangeKind::Deleted => {
            let entry_type = if looks_like_file(&change.uri) {
                EntryType::File
            } else {
                EntryType::Directory
            };
            (ChangeType::Deleted, entry_type)
        }
    }
}

async fn relay_changes(
    host: Arc<dyn HostFileSystem>,
    watch_id: String,
    mut changes: mpsc::UnboundedReceiver<HostChange>,
    outbound: Outbound,
) {
    while let Some(change) = changes.recv().await {
        let (change_type, entry_type) = classify(host.as_ref(), &change).await;
        let event = ChangeEvent {
            watch_id: watch_id.clone(),
            location: change.uri,
            change_type,
            entry_type,
        };
        trace!(watch_id = %watch_id, location = %event.location, "Relaying change");

        let params = match serde_json::to_value(&event) {
            Ok(params) => params,
            Err(e) => {
                warn!(watch_id = %watch_id, error = %e, "Dropping unserializable change event");
                continue;
            }
        };
        if outbound
            .send(Notification::new(methods::EMIT_WATCH, params).into())
            .is_err()
        {
            debug!(watch_id = %watch_id, "Outbound queue closed, stopping relay");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MemoryFileSystem, WriteOptions};
    use rstest::rstest;
    use vfs_bridge_rpc::Message;

    fn memory_host() -> (MemoryFileSystem, Arc<dyn HostFileSystem>) {
        let memory = MemoryFileSystem::new();
        let host: Arc<dyn HostFileSystem> = Arc::new(memory.clone());
        (memory, host)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Message>) -> ChangeEvent {
        match rx.recv().await {
            Some(Message::Notification(n)) => {
                assert_eq!(n.method, methods::EMIT_WATCH);
                serde_json::from_value(n.params).unwrap()
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[rstest]
    #[case("mem:///gone/file.txt", EntryType::File)]
    #[case("mem:///gone/folder", EntryType::Directory)]
    #[tokio::test]
    async fn deleted_entries_are_classified_by_name(
        #[case] uri: &str,
        #[case] expected: EntryType,
    ) {
        let (_, host) = memory_host();
        let change = HostChange::new(HostChangeKind::Deleted, uri);
        assert_eq!(
            classify(host.as_ref(), &change).await,
            (ChangeType::Deleted, expected)
        );
    }

    #[tokio::test]
    async fn created_entries_are_classified_by_stat() {
        let (_, host) = memory_host();
        host.create_directory("mem:///dir").await.unwrap();

        let dir = HostChange::new(HostChangeKind::Created, "mem:///dir");
        let missing = HostChange::new(HostChangeKind::Created, "mem:///vanished");
        assert_eq!(
            classify(host.as_ref(), &dir).await,
            (ChangeType::Created, EntryType::Directory)
        );
        assert_eq!(
            classify(host.as_ref(), &missing).await,
            (ChangeType::Created, EntryType::File)
        );
    }

    #[tokio::test]
    async fn duplicate_watch_is_rejected_and_first_keeps_working() {
        let (memory, host) = memory_host();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = WatchRegistry::new();

        registry.watch(&host, "mem:///", "w1", tx.clone()).await.unwrap();
        let err = registry.watch(&host, "mem:///", "w2", tx).await.unwrap_err();
        assert_eq!(err.to_string(), "watch already defined for mem:///");
        assert_eq!(memory.active_watchers(), 1);
        assert_eq!(registry.watch_id("mem:///"), Some("w1"));

        host.write_file(
            "mem:///a.txt",
            b"x",
            WriteOptions {
                create: true,
                overwrite: false,
            },
        )
        .await
        .unwrap();
        let event = next_event(&mut rx).await;
        assert_eq!(event.watch_id, "w1");
        assert_eq!(event.location, "mem:///a.txt");
        assert_eq!(event.change_type, ChangeType::Created);
    }

    #[tokio::test]
    async fn unwatch_releases_the_host_watcher() {
        let (memory, host) = memory_host();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = WatchRegistry::new();

        registry.watch(&host, "mem:///", "w", tx).await.unwrap();
        assert_eq!(registry.unwatch("mem:///").unwrap(), "w");
        assert_eq!(memory.active_watchers(), 0);

        let err = registry.unwatch("mem:///").unwrap_err();
        assert!(matches!(err, WatchError::NotDefined(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn clear_closes_everything() {
        let (memory, host) = memory_host();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = WatchRegistry::new();
        host.create_directory("mem:///a").await.unwrap();

        registry.watch(&host, "mem:///", "root", tx.clone()).await.unwrap();
        registry.watch(&host, "mem:///a", "a", tx).await.unwrap();
        assert_eq!(memory.active_watchers(), 2);

        assert_eq!(registry.clear(), 2);
        assert_eq!(memory.active_watchers(), 0);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn relay_preserves_host_order() {
        let (memory, host) = memory_host();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = WatchRegistry::new();
        registry.watch(&host, "mem:///", "w", tx).await.unwrap();

        for i in 0..10 {
            memory
                .emit(HostChangeKind::Changed, &format!("mem:///f{i}.txt"))
                .unwrap();
        }
        for i in 0..10 {
            let event = next_event(&mut rx).await;
            assert_eq!(event.location, format!("mem:///f{i}.txt"));
            assert_eq!(event.change_type, ChangeType::Modified);
        }
    }
}
