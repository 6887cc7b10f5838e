//! Loopback listener and the set of live sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::facade::FileSystemFacade;
use crate::guard::SchemeGuard;
use crate::host::HostFileSystem;
use crate::router::Router;
use crate::session::{Session, SessionId};

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type SessionMap = Arc<Mutex<HashMap<SessionId, Arc<Session>>>>;

/// A running bridge.
///
/// Dropping the server stops accepting; live sessions end with their
/// sockets. Call [`dispose`](Self::dispose) to close them eagerly.
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    guard: Arc<SchemeGuard>,
    sessions: SessionMap,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Server {
    /// Bind the configured address and start accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the listener cannot be bound.
    pub async fn start(config: &BridgeConfig, host: Arc<dyn HostFileSystem>) -> Result<Self> {
        let guard = Arc::new(SchemeGuard::with_schemes(&config.guarded_schemes));
        Self::start_with_guard(config, host, guard).await
    }

    /// Like [`start`](Self::start), sharing an existing guard.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the listener cannot be bound.
    pub async fn start_with_guard(
        config: &BridgeConfig,
        host: Arc<dyn HostFileSystem>,
        guard: Arc<SchemeGuard>,
    ) -> Result<Self> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        let facade = Arc::new(FileSystemFacade::new(
            host,
            Arc::clone(&guard),
            config.error_codes,
        ));
        let sessions = SessionMap::default();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            facade,
            Arc::new(Router::vfs()),
            Arc::clone(&sessions),
            config.max_message_size,
        ));

        info!(
            port = local_addr.port(),
            address = %local_addr.ip(),
            guarded = ?guard.schemes(),
            "VFS bridge listening"
        );

        Ok(Self {
            local_addr,
            guard,
            sessions,
            accept_task: Mutex::new(Some(accept_task)),
            disposed: AtomicBool::new(false),
        })
    }

    /// The bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The guard shared by every session.
    #[must_use]
    pub fn guard(&self) -> &Arc<SchemeGuard> {
        &self.guard
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Stop accepting and dispose every live session. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = lock(&self.accept_task).take() {
            task.abort();
        }

        let sessions: Vec<Arc<Session>> = lock(&self.sessions).drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.dispose().await;
        }
        info!(
            port = self.port(),
            sessions = sessions.len(),
            "VFS bridge stopped"
        );
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.accept_task).take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    facade: Arc<FileSystemFacade>,
    router: Arc<Router>,
    sessions: SessionMap,
    max_message_size: usize,
) {
    let mut next_id: SessionId = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        next_id += 1;
        let id = next_id;
        info!(session = id, peer = %peer, "Accepted connection");

        // Insert before the session can end so `on_end` always finds it
        {
            let mut live = lock(&sessions);
            let registry = Arc::clone(&sessions);
            let session = Session::spawn(
                id,
                stream,
                Arc::clone(&facade),
                Arc::clone(&router),
                max_message_size,
                move |id| {
                    if lock(&registry).remove(&id).is_some() {
                        debug!(session = id, "Removed session");
                    }
                },
            );
            live.insert(id, session);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryFileSystem;
    use tokio::net::TcpStream;

    async fn start() -> Server {
        Server::start(&BridgeConfig::default(), Arc::new(MemoryFileSystem::new()))
            .await
            .unwrap()
    }

    async fn wait_for_sessions(server: &Server, expected: usize) {
        for _ in 0..200 {
            if server.session_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} sessions, have {}", server.session_count());
    }

    #[tokio::test]
    async fn binds_an_ephemeral_loopback_port() {
        let server = start().await;
        assert_ne!(server.port(), 0);
        assert!(server.local_addr().ip().is_loopback());
        server.dispose().await;
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let first = start().await;
        let config = BridgeConfig {
            port: first.port(),
            ..BridgeConfig::default()
        };
        let err = Server::start(&config, Arc::new(MemoryFileSystem::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
        first.dispose().await;
    }

    #[tokio::test]
    async fn sessions_are_tracked_until_the_peer_leaves() {
        let server = start().await;
        let a = TcpStream::connect(server.local_addr()).await.unwrap();
        let b = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_sessions(&server, 2).await;

        drop(a);
        wait_for_sessions(&server, 1).await;
        drop(b);
        wait_for_sessions(&server, 0).await;
        server.dispose().await;
    }

    #[tokio::test]
    async fn dispose_closes_sessions_and_stops_accepting() {
        use tokio::io::AsyncReadExt;

        let server = start().await;
        let mut peer = TcpStream::connect(server.local_addr()).await.unwrap();
        wait_for_sessions(&server, 1).await;

        server.dispose().await;
        server.dispose().await;
        assert_eq!(server.session_count(), 0);

        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn configured_schemes_are_guarded() {
        let config = BridgeConfig {
            guarded_schemes: vec!["project".into()],
            ..BridgeConfig::default()
        };
        let server = Server::start(&config, Arc::new(MemoryFileSystem::new()))
            .await
            .unwrap();
        assert!(server.guard().is_guarded("project://x"));
        server.guard().register(["std"]);
        assert!(!server.guard().is_guarded("project://x"));
        server.dispose().await;
    }
}
