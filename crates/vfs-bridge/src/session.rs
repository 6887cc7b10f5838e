//! One peer connection.
//!
//! A session splits its stream in two tasks:
//!
//! - the **reader** decodes frames and spawns one task per request, so a
//!   slow host call never holds up the requests behind it
//! - the **writer** drains the outbound queue, which carries both responses
//!   and watch notifications
//!
//! Undecodable bodies are answered with a JSON-RPC error and reading
//! continues. Framing and socket errors end the session. Either way the
//! session disposes itself, which closes its watches and stops the writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, trace, warn};
use vfs_bridge_rpc::{
    Error as RpcError, Message, MessageReader, MessageWriter, Request, Response, ResponseError,
};

use crate::facade::FileSystemFacade;
use crate::protocol::{IoFailure, IoResult, WatchParams};
use crate::router::Router;
use crate::watch::WatchRegistry;

/// Identifier of a session within its server.
pub type SessionId = u64;

/// Queue of messages waiting to be written to the peer.
pub type Outbound = mpsc::UnboundedSender<Message>;

/// State a request handler can reach.
#[derive(Debug)]
pub struct SessionContext {
    id: SessionId,
    facade: Arc<FileSystemFacade>,
    watches: Mutex<WatchRegistry>,
    outbound: Outbound,
    closed: AtomicBool,
}

impl SessionContext {
    /// Create the context of session `id`.
    #[must_use]
    pub fn new(id: SessionId, facade: Arc<FileSystemFacade>, outbound: Outbound) -> Self {
        Self {
            id,
            facade,
            watches: Mutex::new(WatchRegistry::new()),
            outbound,
            closed: AtomicBool::new(false),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The shared operations.
    #[must_use]
    pub fn facade(&self) -> &FileSystemFacade {
        &self.facade
    }

    /// Open a watch owned by this session.
    pub async fn watch(&self, params: &WatchParams) -> IoResult {
        // Registration is serialised so duplicate watches cannot race
        let mut watches = self.watches.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err::<(), _>(IoFailure::failed("session is closing")).into();
        }
        self.facade
            .watch(
                &mut watches,
                &params.uri,
                &params.watcher,
                self.outbound.clone(),
            )
            .await
    }

    /// Close a watch owned by this session.
    pub async fn unwatch(&self, params: &WatchParams) -> IoResult {
        let mut watches = self.watches.lock().await;
        self.facade
            .unwatch(&mut watches, &params.uri, &params.watcher)
    }

    /// Number of open watches.
    pub async fn watch_count(&self) -> usize {
        self.watches.lock().await.len()
    }

    /// Close every watch and refuse new ones. Returns how many were open.
    pub async fn close_watches(&self) -> usize {
        let mut watches = self.watches.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        watches.clear()
    }

    /// Queue `message` for the peer. Returns `false` once the writer is gone.
    pub fn send(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }
}

/// A live connection.
#[derive(Debug)]
pub struct Session {
    context: Arc<SessionContext>,
    shutdown: watch::Sender<bool>,
    disposed: AtomicBool,
}

impl Session {
    /// Start serving `stream`.
    ///
    /// `on_end` runs once the reader stops, whatever the reason.
    pub fn spawn<S, F>(
        id: SessionId,
        stream: S,
        facade: Arc<FileSystemFacade>,
        router: Arc<Router>,
        max_message_size: usize,
        on_end: F,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        F: FnOnce(SessionId) + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let session = Arc::new(Self {
            context: Arc::new(SessionContext::new(id, facade, outbound)),
            shutdown,
            disposed: AtomicBool::new(false),
        });

        tokio::spawn(write_loop(
            id,
            MessageWriter::new(write_half),
            outbound_rx,
            shutdown_rx.clone(),
        ));
        let reader = MessageReader::new(read_half).with_max_message_size(max_message_size);
        tokio::spawn(read_loop(
            Arc::clone(&session),
            reader,
            router,
            shutdown_rx,
            on_end,
        ));

        session
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.context.id
    }

    /// The handler-facing state.
    #[must_use]
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Close all watches and stop both tasks. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let closed = self.context.close_watches().await;
        self.shutdown.send_replace(true);
        debug!(session = self.id(), watches = closed, "Disposed session");
    }

    fn dispatch(&self, router: &Router, request: Request) {
        let Request { id, method, params } = request;
        debug!(session = self.id(), request = %id, method = %method, "Dispatching request");

        let pending = router.dispatch(Arc::clone(&self.context), &method, params);
        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            let response = match pending.await {
                Ok(result) => Response::ok(id, result),
                Err(error) => {
                    debug!(session = context.id(), method = %method, error = %error, "Request failed");
                    Response::error(Some(id), error)
                }
            };
            if !context.send(response.into()) {
                debug!(session = context.id(), method = %method, "Session closed before response");
            }
        });
    }
}

async fn read_loop<R, F>(
    session: Arc<Session>,
    mut reader: MessageReader<R>,
    router: Arc<Router>,
    mut shutdown: watch::Receiver<bool>,
    on_end: F,
) where
    R: AsyncRead + Unpin,
    F: FnOnce(SessionId),
{
    let id = session.id();
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            message = reader.read_message() => message,
        };

        match message {
            Ok(Some(Message::Request(request))) => session.dispatch(&router, request),
            Ok(Some(Message::Notification(notification))) => {
                debug!(session = id, method = %notification.method, "Ignoring notification");
            }
            Ok(Some(Message::Response(response))) => {
                debug!(session = id, response = ?response.id, "Ignoring response");
            }
            Ok(None) => {
                debug!(session = id, "Peer closed the connection");
                break;
            }
            Err(e) if e.is_recoverable() => {
                debug!(session = id, error = %e, "Answering undecodable message");
                let (request_id, error) = match e {
                    RpcError::Json(e) => (None, ResponseError::parse_error(e.to_string())),
                    RpcError::InvalidMessage { reason, id: peer_id } => (
                        peer_id,
                        ResponseError::invalid_request(format!("invalid message: {reason}")),
                    ),
                    other => (None, ResponseError::invalid_request(other.to_string())),
                };
                session.context.send(Response::error(request_id, error).into());
            }
            Err(e) => {
                warn!(session = id, error = %e, "Ending session after transport error");
                break;
            }
        }
    }

    session.dispose().await;
    on_end(id);
}

async fn write_loop<W>(
    id: SessionId,
    mut writer: MessageWriter<W>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            message = outbound.recv() => message,
            _ = shutdown.changed() => None,
        };
        let Some(message) = message else { break };

        trace!(session = id, method = ?message.method(), "Writing message");
        if let Err(e) = writer.write_message(&message).await {
            warn!(session = id, error = %e, "Failed to write to peer");
            return;
        }
    }

    // Flush what was queued before the shutdown signal
    while let Ok(message) = outbound.try_recv() {
        if writer.write_message(&message).await.is_err() {
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(session = id, error = %e, "Ignoring error while closing write half");
    }
    info!(session = id, "Session closed");
}
