//! A client for the bridge protocol.
//!
//! Used by the integration tests and by embedders that want to drive a
//! bridge from Rust. Requests may be issued concurrently; a background
//! reader routes each response to its caller by id and queues server
//! notifications for [`BridgeClient::next_notification`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use vfs_bridge_rpc::{
    Message, MessageReader, MessageWriter, Notification, Request, RequestId, Response,
    ResponseError,
};

use crate::error::{Error, Result};

/// Waiters by request id; `None` once the reader has stopped.
type Pending = Arc<StdMutex<Option<HashMap<RequestId, oneshot::Sender<Response>>>>>;

/// A connection to a bridge.
pub struct BridgeClient {
    writer: Mutex<MessageWriter<WriteHalf<TcpStream>>>,
    pending: Pending,
    notifications: Mutex<mpsc::UnboundedReceiver<Notification>>,
    next_id: AtomicI64,
    reader_task: JoinHandle<()>,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    /// Connect to the bridge listening on `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = tokio::io::split(stream);

        let pending: Pending = Arc::new(StdMutex::new(Some(HashMap::new())));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(
            MessageReader::new(read_half),
            Arc::clone(&pending),
            notify_tx,
        ));

        debug!(addr = %addr, "Connected to bridge");
        Ok(Self {
            writer: Mutex::new(MessageWriter::new(write_half)),
            pending,
            notifications: Mutex::new(notify_rx),
            next_id: AtomicI64::new(1),
            reader_task,
        })
    }

    /// Call `method` and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] for a JSON-RPC error response,
    /// [`Error::ConnectionClosed`] if the connection ends first, and
    /// serialization or I/O errors otherwise.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let params = serde_json::to_value(params)?;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending)
            .as_mut()
            .ok_or(Error::ConnectionClosed)?
            .insert(id.clone(), tx);

        trace!(method, id = %id, "Sending request");
        let sent = self
            .writer
            .lock()
            .await
            .write_message(&Request::new(id.clone(), method, params).into())
            .await;
        if let Err(e) = sent {
            if let Some(waiters) = lock(&self.pending).as_mut() {
                waiters.remove(&id);
            }
            return Err(e.into());
        }

        let response = rx.await.map_err(|_| Error::ConnectionClosed)?;
        let value = response.outcome.map_err(Error::Rpc)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let message = Notification::new(method, serde_json::to_value(params)?).into();
        self.writer.lock().await.write_message(&message).await?;
        Ok(())
    }

    /// Wait for the next notification from the bridge.
    ///
    /// Returns `None` once the connection is closed and every queued
    /// notification has been taken.
    pub async fn next_notification(&self) -> Option<Notification> {
        self.notifications.lock().await.recv().await
    }

    /// Close the write half; the bridge ends the session in response.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn close(&self) -> Result<()> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(
    mut reader: MessageReader<ReadHalf<TcpStream>>,
    pending: Pending,
    notifications: mpsc::UnboundedSender<Notification>,
) {
    loop {
        match reader.read_message().await {
            Ok(Some(Message::Response(response))) => {
                let Some(id) = response.id.clone() else {
                    warn!(error = ?response.outcome.err(), "Bridge reported an error without request id");
                    continue;
                };
                let waiter = lock(&pending).as_mut().and_then(|w| w.remove(&id));
                match waiter {
                    Some(waiter) => {
                        // The caller may have given up; nothing to do then
                        let _ = waiter.send(response);
                    }
                    None => debug!(id = %id, "Response to unknown request"),
                }
            }
            Ok(Some(Message::Notification(notification))) => {
                let _ = notifications.send(notification);
            }
            Ok(Some(Message::Request(request))) => {
                debug!(method = %request.method, "Ignoring request from bridge");
            }
            Ok(None) => break,
            Err(e) if e.is_recoverable() => warn!(error = %e, "Skipping undecodable message"),
            Err(e) => {
                warn!(error = %e, "Bridge connection failed");
                break;
            }
        }
    }

    // Dropping the senders wakes every waiter with ConnectionClosed
    lock(&pending).take();
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether `err` is a JSON-RPC error with the given code.
#[must_use]
pub fn is_rpc_error(err: &Error, code: i64) -> bool {
    matches!(err, Error::Rpc(ResponseError { code: c, .. }) if *c == code)
}
