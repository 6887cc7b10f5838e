//! Operating-system file system addressed through `file:` URIs.
//!
//! I/O goes through `tokio::fs`; watching uses the platform's recommended
//! `notify` backend in recursive mode. `notify` invokes its callback on a
//! background thread, which forwards translated changes into the sink
//! channel, so the async side never blocks on the OS watcher.
//!
//! An optional root confines the backend: URIs that resolve outside of it
//! are refused with [`HostErrorKind::PermissionDenied`](super::HostErrorKind).

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use url::Url;

use super::{
    ChangeSink, DeleteOptions, FileStat, FileType, HostChange, HostChangeKind, HostError,
    HostErrorKind, HostFileSystem, HostResult, HostWatcher, RenameOptions, WriteOptions,
};

/// Local [`HostFileSystem`].
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    root: Option<PathBuf>,
}

impl LocalFileSystem {
    /// Serve the whole local file system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve only paths below `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be canonicalized.
    pub fn with_root(root: &Path) -> HostResult<Self> {
        let root = root
            .canonicalize()
            .map_err(|e| HostError::from_io(&e, &root.display().to_string()))?;
        Ok(Self { root: Some(root) })
    }

    /// The confinement root, if any.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Parse a `file:` URI into a local path.
    fn local_path(uri: &str) -> HostResult<PathBuf> {
        let url =
            Url::parse(uri).map_err(|e| HostError::unavailable(format!("invalid URI {uri}: {e}")))?;
        if url.scheme() != "file" {
            return Err(HostError::unavailable(format!(
                "unsupported scheme '{}' for the local file system: {uri}",
                url.scheme()
            )));
        }
        url.to_file_path()
            .map_err(|()| HostError::unavailable(format!("not a local path: {uri}")))
    }

    /// Resolve a `file:` URI to a path, enforcing the root.
    ///
    /// `follow_last` resolves a symbolic link in the final component; delete
    /// and rename pass `false` because they act on the link itself.
    async fn resolve(&self, uri: &str, follow_last: bool) -> HostResult<PathBuf> {
        let path = Self::local_path(uri)?;
        self.confine(uri, &path, follow_last).await
    }

    /// Canonicalize `path` and check that it stays below the root.
    ///
    /// Without a root the path is returned untouched.
    async fn confine(&self, uri: &str, path: &Path, follow_last: bool) -> HostResult<PathBuf> {
        let Some(root) = &self.root else {
            return Ok(path.to_path_buf());
        };

        let resolved = match (follow_last, path.parent(), path.file_name()) {
            (false, Some(parent), Some(name)) => {
                canonicalize_existing(parent, uri).await?.join(name)
            }
            _ => canonicalize_existing(path, uri).await?,
        };

        if !resolved.starts_with(root) {
            return Err(HostError::permission_denied(format!(
                "{uri} is outside of {}",
                root.display()
            )));
        }
        Ok(resolved)
    }
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
///
/// Targets that do not exist yet (a file about to be written, a rename
/// destination) still resolve through every symbolic link above them. A
/// dangling link on the way is refused.
async fn canonicalize_existing(path: &Path, uri: &str) -> HostResult<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();

    loop {
        match tokio::fs::canonicalize(existing).await {
            Ok(canonical) => {
                return Ok(missing
                    .iter()
                    .rev()
                    .fold(canonical, |acc, name| acc.join(name)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if tokio::fs::symlink_metadata(existing).await.is_ok() {
                    return Err(HostError::permission_denied(format!(
                        "{uri} goes through a dangling symbolic link"
                    )));
                }
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Err(HostError::from_io(&e, uri));
                };
                missing.push(name);
                existing = parent;
            }
            Err(e) => return Err(HostError::from_io(&e, uri)),
        }
    }
}

#[async_trait]
impl HostFileSystem for LocalFileSystem {
    async fn stat(&self, uri: &str) -> HostResult<FileStat> {
        let path = self.resolve(uri, true).await?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| HostError::from_io(&e, uri))?;

        let file_type = if metadata.is_dir() {
            FileType::Directory
        } else if metadata.is_file() {
            FileType::File
        } else {
            FileType::Unknown
        };
        let mtime = metadata.modified().map(epoch_seconds).unwrap_or_default();
        // Not every platform records a birth time
        let ctime = metadata.created().map(epoch_seconds).unwrap_or(mtime);

        Ok(FileStat {
            file_type,
            ctime,
            mtime,
            size: metadata.len(),
        })
    }

    async fn read_file(&self, uri: &str) -> HostResult<Vec<u8>> {
        let path = self.resolve(uri, true).await?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| HostError::from_io(&e, uri))
    }

    async fn write_file(
        &self,
        uri: &str,
        content: &[u8],
        options: WriteOptions,
    ) -> HostResult<()> {
        let path = self.resolve(uri, true).await?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => return Err(HostError::is_a_directory(uri)),
            Ok(_) if !options.overwrite => return Err(HostError::already_exists(uri)),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !options.create {
                    return Err(HostError::not_found(uri));
                }
            }
            Err(e) => return Err(HostError::from_io(&e, uri)),
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| HostError::from_io(&e, uri))
    }

    async fn create_directory(&self, uri: &str) -> HostResult<()> {
        let path = self.resolve(uri, true).await?;
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| HostError::from_io(&e, uri))
    }

    async fn delete(&self, uri: &str, options: DeleteOptions) -> HostResult<()> {
        let path = self.resolve(uri, false).await?;
        if self.root.as_deref() == Some(path.as_path()) {
            return Err(HostError::permission_denied(format!(
                "cannot delete the served root: {uri}"
            )));
        }

        let metadata = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| HostError::from_io(&e, uri))?;
        let result = if !metadata.is_dir() {
            tokio::fs::remove_file(&path).await
        } else if options.recursive {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_dir(&path).await
        };
        result.map_err(|e| HostError::from_io(&e, uri))
    }

    async fn rename(&self, from: &str, to: &str, options: RenameOptions) -> HostResult<()> {
        let from_path = self.resolve(from, false).await?;
        let to_path = self.resolve(to, false).await?;

        if !options.overwrite {
            let exists = tokio::fs::try_exists(&to_path)
                .await
                .map_err(|e| HostError::from_io(&e, to))?;
            if exists {
                return Err(HostError::already_exists(to));
            }
        }

        tokio::fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| HostError::from_io(&e, from))
    }

    async fn read_directory(&self, uri: &str) -> HostResult<Vec<(String, FileType)>> {
        let path = self.resolve(uri, true).await?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| HostError::from_io(&e, uri))?;
        if !metadata.is_dir() {
            return Err(HostError::not_a_directory(uri));
        }

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| HostError::from_io(&e, uri))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| HostError::from_io(&e, uri))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let mut file_type = entry.file_type().await.ok();
            if file_type.is_some_and(|t| t.is_symlink()) {
                // Report what the link points at; dangling links stay Unknown
                file_type = tokio::fs::metadata(entry.path())
                    .await
                    .ok()
                    .map(|m| m.file_type());
            }
            let kind = match file_type {
                Some(t) if t.is_dir() => FileType::Directory,
                Some(t) if t.is_file() => FileType::File,
                _ => FileType::Unknown,
            };
            entries.push((name, kind));
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn watch(&self, uri: &str, sink: ChangeSink) -> HostResult<Box<dyn HostWatcher>> {
        // Watch the spelling the peer used so reported URIs match it
        let path = Self::local_path(uri)?;
        self.confine(uri, &path, true).await?;

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    for change in translate_event(event) {
                        if sink.send(change).is_err() {
                            // Receiver gone: the subscription was closed
                            break;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "File watcher reported an error"),
            }
        })
        .map_err(|e| notify_error(e, uri))?;

        watcher
            .watch(&path, RecursiveMode::Recursive)
            .map_err(|e| notify_error(e, uri))?;

        debug!(path = %path.display(), "Started recursive watch");
        Ok(Box::new(LocalWatcher {
            watcher: Some(watcher),
            path,
        }))
    }
}

/// Watch handle owning a `notify` watcher.
struct LocalWatcher {
    watcher: Option<RecommendedWatcher>,
    path: PathBuf,
}

impl HostWatcher for LocalWatcher {
    fn close(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.path) {
                debug!(path = %self.path.display(), error = %e, "Ignoring unwatch failure");
            }
            debug!(path = %self.path.display(), "Stopped recursive watch");
        }
    }
}

impl Drop for LocalWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Map one `notify` event onto host changes.
///
/// Renames become a deletion of the old name and a creation of the new one.
/// Runs on the watcher thread, so the blocking existence check for unpaired
/// renames is fine here.
fn translate_event(event: notify::Event) -> Vec<HostChange> {
    let kinds: &[HostChangeKind] = match event.kind {
        EventKind::Create(_) => &[HostChangeKind::Created],
        EventKind::Remove(_) => &[HostChangeKind::Deleted],
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => &[HostChangeKind::Deleted],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => &[HostChangeKind::Created],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths = [from, to]
            return [HostChangeKind::Deleted, HostChangeKind::Created]
                .into_iter()
                .zip(event.paths)
                .filter_map(|(kind, path)| change_for(kind, &path))
                .collect();
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) => {
            // Unpaired rename: whichever side still exists was the destination
            return event
                .paths
                .iter()
                .filter_map(|path| {
                    let kind = if path.symlink_metadata().is_ok() {
                        HostChangeKind::Created
                    } else {
                        HostChangeKind::Deleted
                    };
                    change_for(kind, path)
                })
                .collect();
        }
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => &[],
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => &[HostChangeKind::Changed],
    };

    event
        .paths
        .iter()
        .flat_map(|path| kinds.iter().filter_map(move |kind| change_for(*kind, path)))
        .collect()
}

fn change_for(kind: HostChangeKind, path: &Path) -> Option<HostChange> {
    Url::from_file_path(path)
        .ok()
        .map(|url| HostChange::new(kind, url.to_string()))
}

fn notify_error(err: notify::Error, uri: &str) -> HostError {
    let kind = match &err.kind {
        notify::ErrorKind::PathNotFound => HostErrorKind::NotFound,
        notify::ErrorKind::Io(io) => return HostError::from_io(io, uri),
        _ => HostErrorKind::Other,
    };
    HostError::new(kind, format!("{uri}: {err}"))
}

fn epoch_seconds(time: SystemTime) -> i64 {
    chrono::DateTime::<chrono::Utc>::from(time).timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use tempfile::TempDir;

    fn file_uri(path: &Path) -> String {
        Url::from_file_path(path).unwrap().to_string()
    }

    fn create_new() -> WriteOptions {
        WriteOptions {
            create: true,
            overwrite: false,
        }
    }

    #[tokio::test]
    async fn rejects_other_schemes() {
        let fs = LocalFileSystem::new();
        let err = fs.resolve("project://demo/a.txt", true).await.unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn root_confines_resolution() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::with_root(dir.path()).unwrap();
        let root = fs.root().unwrap().to_path_buf();

        assert_eq!(
            fs.resolve(&file_uri(&root.join("new/inside.txt")), true)
                .await
                .unwrap(),
            root.join("new/inside.txt")
        );
        let outside = root.parent().unwrap().join("outside.txt");
        assert_eq!(
            fs.resolve(&file_uri(&outside), true).await.unwrap_err().kind,
            HostErrorKind::PermissionDenied
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_cannot_leave_the_root() {
        let root_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"top secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), root_dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("ghost.txt"),
            root_dir.path().join("ghost"),
        )
        .unwrap();

        let fs = LocalFileSystem::with_root(root_dir.path()).unwrap();
        let root = fs.root().unwrap().to_path_buf();
        let through_link = file_uri(&root.join("link/secret.txt"));

        let err = fs.read_file(&through_link).await.unwrap_err();
        assert_eq!(err.kind, HostErrorKind::PermissionDenied);
        let err = fs
            .write_file(&file_uri(&root.join("link/new.txt")), b"x", create_new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::PermissionDenied);
        let err = fs
            .write_file(&file_uri(&root.join("ghost")), b"x", create_new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::PermissionDenied);
        assert!(!outside.path().join("new.txt").exists());
        assert!(!outside.path().join("ghost.txt").exists());

        // Removing the link itself stays inside the root
        fs.delete(&file_uri(&root.join("link")), DeleteOptions::default())
            .await
            .unwrap();
        assert!(!root.join("link").exists());
        assert!(outside.path().join("secret.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn root_reached_through_an_alias_is_served() {
        let real = TempDir::new().unwrap();
        let aliases = TempDir::new().unwrap();
        let alias = aliases.path().join("alias");
        std::os::unix::fs::symlink(real.path(), &alias).unwrap();
        std::fs::write(real.path().join("a.txt"), b"a").unwrap();

        let fs = LocalFileSystem::with_root(real.path()).unwrap();
        assert_eq!(fs.read_file(&file_uri(&alias.join("a.txt"))).await.unwrap(), b"a");

        let aliased = LocalFileSystem::with_root(&alias).unwrap();
        aliased
            .write_file(&file_uri(&alias.join("b.txt")), b"b", create_new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(real.path().join("b.txt")).unwrap(), b"b");
    }

    #[test]
    fn unpaired_rename_is_classified_by_existence() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("present.txt");
        let gone = dir.path().join("gone.txt");
        std::fs::write(&present, b"").unwrap();
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(gone.clone())
            .add_path(present.clone());

        assert_eq!(
            translate_event(event),
            vec![
                HostChange::new(HostChangeKind::Deleted, file_uri(&gone)),
                HostChange::new(HostChangeKind::Created, file_uri(&present)),
            ]
        );
    }

    #[test]
    fn create_and_remove_events_translate() {
        let path = std::env::temp_dir().join("a.txt");
        let created = notify::Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        let removed = notify::Event::new(EventKind::Remove(RemoveKind::Any)).add_path(path.clone());

        assert_eq!(
            translate_event(created),
            vec![HostChange::new(HostChangeKind::Created, file_uri(&path))]
        );
        assert_eq!(
            translate_event(removed),
            vec![HostChange::new(HostChangeKind::Deleted, file_uri(&path))]
        );
    }

    #[test]
    fn rename_both_becomes_delete_then_create() {
        let from = std::env::temp_dir().join("old.txt");
        let to = std::env::temp_dir().join("new.txt");
        let event = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());

        assert_eq!(
            translate_event(event),
            vec![
                HostChange::new(HostChangeKind::Deleted, file_uri(&from)),
                HostChange::new(HostChangeKind::Created, file_uri(&to)),
            ]
        );
    }

    #[test]
    fn data_changes_are_modifications_and_access_is_ignored() {
        let path = std::env::temp_dir().join("a.txt");
        let modified = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.clone());
        let accessed =
            notify::Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(path);

        assert_eq!(translate_event(modified)[0].kind, HostChangeKind::Changed);
        assert!(translate_event(accessed).is_empty());
    }

    #[tokio::test]
    async fn write_read_and_list() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let file = file_uri(&dir.path().join("hello.txt"));

        fs.write_file(
            &file,
            b"hi",
            WriteOptions {
                create: true,
                overwrite: false,
            },
        )
        .await
        .unwrap();
        fs.create_directory(&file_uri(&dir.path().join("sub")))
            .await
            .unwrap();

        assert_eq!(fs.read_file(&file).await.unwrap(), b"hi");
        assert_eq!(
            fs.read_directory(&file_uri(dir.path())).await.unwrap(),
            vec![
                ("hello.txt".to_string(), FileType::File),
                ("sub".to_string(), FileType::Directory),
            ]
        );
        assert_eq!(fs.stat(&file).await.unwrap().size, 2);
    }

    #[tokio::test]
    async fn write_semantics_match_provider_contract() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let file = file_uri(&dir.path().join("f.txt"));

        let err = fs
            .write_file(&file, b"", WriteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::NotFound);

        fs.write_file(
            &file,
            b"1",
            WriteOptions {
                create: true,
                overwrite: true,
            },
        )
        .await
        .unwrap();
        let err = fs
            .write_file(
                &file,
                b"2",
                WriteOptions {
                    create: true,
                    overwrite: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn delete_directory_requires_recursive_when_not_empty() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("x"), b"").unwrap();

        assert!(fs
            .delete(&file_uri(&sub), DeleteOptions { recursive: false })
            .await
            .is_err());
        fs.delete(&file_uri(&sub), DeleteOptions { recursive: true })
            .await
            .unwrap();
        assert!(!sub.exists());
    }

    #[tokio::test]
    async fn rename_without_overwrite_refuses_existing_target() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        std::fs::write(dir.path().join("a"), b"a").unwrap();
        std::fs::write(dir.path().join("b"), b"b").unwrap();

        let err = fs
            .rename(
                &file_uri(&dir.path().join("a")),
                &file_uri(&dir.path().join("b")),
                RenameOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn listing_a_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"").unwrap();

        let err = fs.read_directory(&file_uri(&file)).await.unwrap_err();
        assert_eq!(err.kind, HostErrorKind::NotADirectory);
    }

    #[tokio::test]
    async fn watching_a_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let result = fs.watch(&file_uri(&dir.path().join("missing")), tx).await;
        assert!(result.is_err());
    }
}
