//! In-memory host file system.
//!
//! Entries are keyed by URI path (`mem:/a/b.txt` and `file:///a/b.txt` both
//! address `/a/b.txt`), so a single instance behaves as one volume whatever
//! scheme the peer uses. The root `/` always exists.
//!
//! Every mutation reports changes synchronously to the watchers whose root
//! contains the affected path, which makes event order deterministic in
//! tests. [`MemoryFileSystem::call_count`] and
//! [`MemoryFileSystem::active_watchers`] expose how the bridge used the
//! backend.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::{
    ChangeSink, DeleteOptions, FileStat, FileType, HostChange, HostChangeKind, HostError,
    HostFileSystem, HostResult, HostWatcher, RenameOptions, WriteOptions,
};

const ROOT: &str = "/";

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Directory,
}

#[derive(Debug, Clone)]
struct Entry {
    node: Node,
    ctime: i64,
    mtime: i64,
}

impl Entry {
    fn new(node: Node) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            node,
            ctime: now,
            mtime: now,
        }
    }

    fn is_directory(&self) -> bool {
        matches!(self.node, Node::Directory)
    }
}

struct Registration {
    root_path: String,
    root_uri: String,
    sink: ChangeSink,
}

impl Registration {
    fn covers(&self, path: &str) -> bool {
        is_within(path, &self.root_path)
    }

    /// URI of `path` spelled relative to the watched root URI.
    fn uri_for(&self, path: &str) -> String {
        let base = self.root_uri.strip_suffix('/').unwrap_or(&self.root_uri);
        if self.root_path == ROOT {
            format!("{base}{path}")
        } else {
            format!("{base}{}", &path[self.root_path.len()..])
        }
    }
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    watchers: HashMap<u64, Registration>,
    next_watcher_id: u64,
}

impl State {
    fn notify(&self, kind: HostChangeKind, path: &str) {
        for registration in self.watchers.values().filter(|r| r.covers(path)) {
            // A closed receiver means the subscription is being torn down
            let _ = registration
                .sink
                .send(HostChange::new(kind, registration.uri_for(path)));
        }
    }

    fn is_directory(&self, path: &str) -> bool {
        path == ROOT || self.entries.get(path).is_some_and(Entry::is_directory)
    }

    fn exists(&self, path: &str) -> bool {
        path == ROOT || self.entries.contains_key(path)
    }

    fn require_parent_directory(&self, path: &str, uri: &str) -> HostResult<()> {
        let parent = parent_of(path).unwrap_or(ROOT);
        if self.is_directory(parent) {
            Ok(())
        } else if self.exists(parent) {
            Err(HostError::not_a_directory(uri))
        } else {
            Err(HostError::not_found(uri))
        }
    }

    /// Paths strictly below `path`, shallowest first.
    fn descendants(&self, path: &str) -> Vec<String> {
        let prefix = child_prefix(path);
        self.entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// In-memory [`HostFileSystem`].
///
/// Cloning yields another handle to the same tree.
#[derive(Clone, Default)]
pub struct MemoryFileSystem {
    state: Arc<Mutex<State>>,
    calls: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MemoryFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryFileSystem")
            .field("entries", &state.entries.len())
            .field("watchers", &state.watchers.len())
            .field("calls", &self.call_count())
            .finish()
    }
}

impl MemoryFileSystem {
    /// Create an empty file system containing only `/`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of [`HostFileSystem`] calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of watchers that have not been closed.
    #[must_use]
    pub fn active_watchers(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Report a change at `uri` to matching watchers without mutating the
    /// tree, as an external writer would.
    ///
    /// # Errors
    ///
    /// Returns an error if `uri` has no path component.
    pub fn emit(&self, kind: HostChangeKind, uri: &str) -> HostResult<()> {
        let path = path_of(uri)?;
        self.lock().notify(kind, &path);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HostFileSystem for MemoryFileSystem {
    async fn stat(&self, uri: &str) -> HostResult<FileStat> {
        self.record_call();
        let path = path_of(uri)?;
        if path == ROOT {
            return Ok(FileStat {
                file_type: FileType::Directory,
                ctime: 0,
                mtime: 0,
                size: 0,
            });
        }

        let state = self.lock();
        let entry = state
            .entries
            .get(&path)
            .ok_or_else(|| HostError::not_found(uri))?;
        let (file_type, size) = match &entry.node {
            Node::File(content) => (FileType::File, content.len() as u64),
            Node::Directory => (FileType::Directory, 0),
        };
        Ok(FileStat {
            file_type,
            ctime: entry.ctime,
            mtime: entry.mtime,
            size,
        })
    }

    async fn read_file(&self, uri: &str) -> HostResult<Vec<u8>> {
        self.record_call();
        let path = path_of(uri)?;
        let state = self.lock();
        if path == ROOT {
            return Err(HostError::is_a_directory(uri));
        }
        match state.entries.get(&path).map(|entry| &entry.node) {
            Some(Node::File(content)) => Ok(content.clone()),
            Some(Node::Directory) => Err(HostError::is_a_directory(uri)),
            None => Err(HostError::not_found(uri)),
        }
    }

    async fn write_file(
        &self,
        uri: &str,
        content: &[u8],
        options: WriteOptions,
    ) -> HostResult<()> {
        self.record_call();
        let path = path_of(uri)?;
        let mut state = self.lock();
        if path == ROOT {
            return Err(HostError::is_a_directory(uri));
        }

        match state.entries.get(&path).map(Entry::is_directory) {
            Some(true) => Err(HostError::is_a_directory(uri)),
            Some(false) if !options.overwrite => Err(HostError::already_exists(uri)),
            Some(false) => {
                if let Some(entry) = state.entries.get_mut(&path) {
                    entry.node = Node::File(content.to_vec());
                    entry.mtime = chrono::Utc::now().timestamp();
                }
                state.notify(HostChangeKind::Changed, &path);
                Ok(())
            }
            None if !options.create => Err(HostError::not_found(uri)),
            None => {
                state.require_parent_directory(&path, uri)?;
                state
                    .entries
                    .insert(path.clone(), Entry::new(Node::File(content.to_vec())));
                state.notify(HostChangeKind::Created, &path);
                Ok(())
            }
        }
    }

    async fn create_directory(&self, uri: &str) -> HostResult<()> {
        self.record_call();
        let path = path_of(uri)?;
        let mut state = self.lock();
        if state.exists(&path) {
            return Err(HostError::already_exists(uri));
        }
        state.require_parent_directory(&path, uri)?;
        state.entries.insert(path.clone(), Entry::new(Node::Directory));
        state.notify(HostChangeKind::Created, &path);
        Ok(())
    }

    async fn delete(&self, uri: &str, options: DeleteOptions) -> HostResult<()> {
        self.record_call();
        let path = path_of(uri)?;
        let mut state = self.lock();
        if path == ROOT {
            return Err(HostError::permission_denied(format!(
                "cannot delete the root directory: {uri}"
            )));
        }
        if !state.entries.contains_key(&path) {
            return Err(HostError::not_found(uri));
        }

        let descendants = state.descendants(&path);
        if !descendants.is_empty() && !options.recursive {
            return Err(HostError::other(format!("directory not empty: {uri}")));
        }

        for removed in descendants.iter().rev() {
            state.entries.remove(removed);
            state.notify(HostChangeKind::Deleted, removed);
        }
        state.entries.remove(&path);
        state.notify(HostChangeKind::Deleted, &path);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str, options: RenameOptions) -> HostResult<()> {
        self.record_call();
        let from_path = path_of(from)?;
        let to_path = path_of(to)?;
        let mut state = self.lock();

        if from_path == ROOT || to_path == ROOT {
            return Err(HostError::permission_denied(
                "cannot rename the root directory",
            ));
        }
        if !state.entries.contains_key(&from_path) {
            return Err(HostError::not_found(from));
        }
        if from_path == to_path {
            return Ok(());
        }
        if is_within(&to_path, &from_path) {
            return Err(HostError::other(format!(
                "cannot move {from} into itself ({to})"
            )));
        }
        if state.entries.contains_key(&to_path) {
            if !options.overwrite {
                return Err(HostError::already_exists(to));
            }
            for removed in state.descendants(&to_path) {
                state.entries.remove(&removed);
            }
            state.entries.remove(&to_path);
        }
        state.require_parent_directory(&to_path, to)?;

        let mut moved = vec![from_path.clone()];
        moved.extend(state.descendants(&from_path));
        for old in moved {
            if let Some(entry) = state.entries.remove(&old) {
                let new = format!("{to_path}{}", &old[from_path.len()..]);
                state.entries.insert(new, entry);
            }
        }

        state.notify(HostChangeKind::Deleted, &from_path);
        state.notify(HostChangeKind::Created, &to_path);
        Ok(())
    }

    async fn read_directory(&self, uri: &str) -> HostResult<Vec<(String, FileType)>> {
        self.record_call();
        let path = path_of(uri)?;
        let state = self.lock();
        if !state.exists(&path) {
            return Err(HostError::not_found(uri));
        }
        if !state.is_directory(&path) {
            return Err(HostError::not_a_directory(uri));
        }

        let prefix = child_prefix(&path);
        let children = state
            .entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, entry)| {
                let name = &key[prefix.len()..];
                (!name.contains('/')).then(|| {
                    let file_type = if entry.is_directory() {
                        FileType::Directory
                    } else {
                        FileType::File
                    };
                    (name.to_string(), file_type)
                })
            })
            .collect();
        Ok(children)
    }

    async fn watch(&self, uri: &str, sink: ChangeSink) -> HostResult<Box<dyn HostWatcher>> {
        self.record_call();
        let root_path = path_of(uri)?;
        let mut state = self.lock();
        let id = state.next_watcher_id;
        state.next_watcher_id += 1;
        state.watchers.insert(
            id,
            Registration {
                root_path,
                root_uri: uri.to_string(),
                sink,
            },
        );
        Ok(Box::new(MemoryWatcher {
            id,
            state: Some(Arc::downgrade(&self.state)),
        }))
    }
}

/// Watch handle returned by [`MemoryFileSystem`].
struct MemoryWatcher {
    id: u64,
    state: Option<Weak<Mutex<State>>>,
}

impl HostWatcher for MemoryWatcher {
    fn close(&mut self) {
        if let Some(state) = self.state.take().and_then(|weak| weak.upgrade()) {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .watchers
                .remove(&self.id);
        }
    }
}

impl Drop for MemoryWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Normalized path component of `uri`: leading `/`, no trailing `/`.
fn path_of(uri: &str) -> HostResult<String> {
    let rest = uri
        .split_once(':')
        .map_or(uri, |(_, rest)| rest);
    // Skip the authority of `scheme://authority/path`
    let rest = match rest.strip_prefix("//") {
        Some(after) => after.find('/').map_or("", |i| &after[i..]),
        None => rest,
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();

    let trimmed = rest.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(ROOT.to_string());
    }
    if trimmed.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(HostError::unavailable(format!(
            "relative path segments are not supported: {uri}"
        )));
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{trimmed}"))
    }
}

fn parent_of(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(i) => Some(&path[..i]),
        None => Some(ROOT),
    }
}

fn child_prefix(path: &str) -> String {
    if path == ROOT {
        ROOT.to_string()
    } else {
        format!("{path}/")
    }
}

fn is_within(path: &str, root: &str) -> bool {
    root == ROOT || path == root || path.starts_with(&child_prefix(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostErrorKind;
    use rstest::rstest;
    use tokio::sync::mpsc;

    const CREATE: WriteOptions = WriteOptions {
        create: true,
        overwrite: true,
    };

    #[rstest]
    #[case("mem:/a/b.txt", "/a/b.txt")]
    #[case("file:///a/b/", "/a/b")]
    #[case("mem://authority/x", "/x")]
    #[case("mem:relative", "/relative")]
    #[case("mem:/", "/")]
    #[case("file://host", "/")]
    #[case("mem:/a?q=1#f", "/a")]
    fn normalizes_uri_paths(#[case] uri: &str, #[case] expected: &str) {
        assert_eq!(path_of(uri).unwrap(), expected);
    }

    #[test]
    fn rejects_dot_segments() {
        assert_eq!(
            path_of("mem:/a/../b").unwrap_err().kind,
            HostErrorKind::Unavailable
        );
    }

    #[tokio::test]
    async fn write_honours_create_and_overwrite() {
        let fs = MemoryFileSystem::new();
        let no_create = WriteOptions {
            create: false,
            overwrite: true,
        };
        let no_overwrite = WriteOptions {
            create: true,
            overwrite: false,
        };

        let err = fs.write_file("mem:/a.txt", b"x", no_create).await.unwrap_err();
        assert_eq!(err.kind, HostErrorKind::NotFound);

        fs.write_file("mem:/a.txt", b"x", CREATE).await.unwrap();
        let err = fs.write_file("mem:/a.txt", b"y", no_overwrite).await.unwrap_err();
        assert_eq!(err.kind, HostErrorKind::AlreadyExists);

        assert_eq!(fs.read_file("mem:/a.txt").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn write_requires_parent_directory() {
        let fs = MemoryFileSystem::new();
        let err = fs.write_file("mem:/missing/a.txt", b"", CREATE).await.unwrap_err();
        assert_eq!(err.kind, HostErrorKind::NotFound);

        fs.write_file("mem:/file", b"", CREATE).await.unwrap();
        let err = fs.write_file("mem:/file/a.txt", b"", CREATE).await.unwrap_err();
        assert_eq!(err.kind, HostErrorKind::NotADirectory);
    }

    #[tokio::test]
    async fn read_directory_lists_direct_children_only() {
        let fs = MemoryFileSystem::new();
        fs.create_directory("mem:/src").await.unwrap();
        fs.create_directory("mem:/src/nested").await.unwrap();
        fs.write_file("mem:/src/main.rs", b"", CREATE).await.unwrap();
        fs.write_file("mem:/src/nested/deep.rs", b"", CREATE).await.unwrap();
        fs.write_file("mem:/srcx", b"", CREATE).await.unwrap();

        let listing = fs.read_directory("mem:/src").await.unwrap();
        assert_eq!(
            listing,
            vec![
                ("main.rs".to_string(), FileType::File),
                ("nested".to_string(), FileType::Directory),
            ]
        );

        let root = fs.read_directory("mem:/").await.unwrap();
        assert_eq!(root.len(), 2);

        let err = fs.read_directory("mem:/srcx").await.unwrap_err();
        assert_eq!(err.kind, HostErrorKind::NotADirectory);
    }

    #[tokio::test]
    async fn delete_non_empty_directory_requires_recursive() {
        let fs = MemoryFileSystem::new();
        fs.create_directory("mem:/d").await.unwrap();
        fs.write_file("mem:/d/f", b"", CREATE).await.unwrap();

        let err = fs
            .delete("mem:/d", DeleteOptions { recursive: false })
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Other);

        fs.delete("mem:/d", DeleteOptions { recursive: true })
            .await
            .unwrap();
        assert_eq!(
            fs.stat("mem:/d/f").await.unwrap_err().kind,
            HostErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn rename_moves_subtree() {
        let fs = MemoryFileSystem::new();
        fs.create_directory("mem:/a").await.unwrap();
        fs.write_file("mem:/a/x.txt", b"payload", CREATE).await.unwrap();

        fs.rename("mem:/a", "mem:/b", RenameOptions::default())
            .await
            .unwrap();

        assert_eq!(fs.read_file("mem:/b/x.txt").await.unwrap(), b"payload");
        assert!(fs.stat("mem:/a").await.is_err());
    }

    #[tokio::test]
    async fn rename_refuses_existing_target_without_overwrite() {
        let fs = MemoryFileSystem::new();
        fs.write_file("mem:/a", b"1", CREATE).await.unwrap();
        fs.write_file("mem:/b", b"2", CREATE).await.unwrap();

        let err = fs
            .rename("mem:/a", "mem:/b", RenameOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::AlreadyExists);

        fs.rename("mem:/a", "mem:/b", RenameOptions { overwrite: true })
            .await
            .unwrap();
        assert_eq!(fs.read_file("mem:/b").await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn rename_into_itself_fails() {
        let fs = MemoryFileSystem::new();
        fs.create_directory("mem:/a").await.unwrap();
        let err = fs
            .rename("mem:/a", "mem:/a/b", RenameOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Other);
    }

    #[tokio::test]
    async fn watchers_receive_changes_below_their_root() {
        let fs = MemoryFileSystem::new();
        fs.create_directory("mem:/a").await.unwrap();
        fs.create_directory("mem:/other").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = fs.watch("mem:/a", tx).await.unwrap();

        fs.write_file("mem:/a/b.txt", b"1", CREATE).await.unwrap();
        fs.write_file("mem:/a/b.txt", b"2", CREATE).await.unwrap();
        fs.write_file("mem:/other/c.txt", b"", CREATE).await.unwrap();
        fs.delete("mem:/a/b.txt", DeleteOptions::default())
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(change) = rx.try_recv() {
            seen.push(change);
        }
        assert_eq!(
            seen,
            vec![
                HostChange::new(HostChangeKind::Created, "mem:/a/b.txt"),
                HostChange::new(HostChangeKind::Changed, "mem:/a/b.txt"),
                HostChange::new(HostChangeKind::Deleted, "mem:/a/b.txt"),
            ]
        );
    }

    #[tokio::test]
    async fn closing_watcher_unregisters_it() {
        let fs = MemoryFileSystem::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut watcher = fs.watch("mem:/", tx).await.unwrap();
        assert_eq!(fs.active_watchers(), 1);

        watcher.close();
        watcher.close();
        assert_eq!(fs.active_watchers(), 0);
    }

    #[tokio::test]
    async fn dropping_watcher_unregisters_it() {
        let fs = MemoryFileSystem::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        drop(fs.watch("mem:/", tx).await.unwrap());
        assert_eq!(fs.active_watchers(), 0);
    }

    #[tokio::test]
    async fn every_trait_call_is_counted() {
        let fs = MemoryFileSystem::new();
        let _ = fs.stat("mem:/nope").await;
        let _ = fs.read_file("mem:/nope").await;
        let _ = fs.read_directory("mem:/").await;
        assert_eq!(fs.call_count(), 3);
    }

    #[tokio::test]
    async fn root_watch_reports_full_uris() {
        let fs = MemoryFileSystem::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher = fs.watch("file:///", tx).await.unwrap();

        fs.create_directory("file:///dir").await.unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            HostChange::new(HostChangeKind::Created, "file:///dir")
        );
    }
}
