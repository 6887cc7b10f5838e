//! Serve a URI-addressed file system to a remote process over JSON-RPC.
//!
//! A remote peer (typically a language server that cannot see the editor's
//! virtual file system) connects to a loopback TCP port and issues
//! `vfs/input/*`, `vfs/output/*` and `vfs/watcher/*` requests. The bridge
//! executes them against a [`host::HostFileSystem`] and pushes
//! `vfs/watcher/emitWatch` notifications for changes under watched URIs.
//!
//! # Architecture
//!
//! - [`server`] accepts connections and owns the live sessions
//! - [`session`] frames one connection and dispatches its requests
//! - [`router`] maps method names to typed handlers
//! - [`facade`] runs each operation against the host and turns failures
//!   into `IOResult` data
//! - [`watch`] keeps the per-session watch subscriptions and relays changes
//! - [`guard`] refuses URIs whose scheme the remote peer serves itself
//! - [`host`] defines the host file-system trait and its local and
//!   in-memory backends
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vfs_bridge::config::BridgeConfig;
//! use vfs_bridge::host::MemoryFileSystem;
//! use vfs_bridge::server::Server;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::start(&BridgeConfig::default(), Arc::new(MemoryFileSystem::new())).await?;
//!     println!("listening on port {}", server.port());
//!     server.dispose().await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod facade;
pub mod guard;
pub mod host;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod uri;
pub mod watch;

pub use error::{Error, Result};
pub use server::Server;
