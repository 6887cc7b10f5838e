//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use vfs_bridge::client::BridgeClient;
use vfs_bridge::config::BridgeConfig;
use vfs_bridge::host::MemoryFileSystem;
use vfs_bridge::protocol::{ChangeEvent, DirectoryListing, IoResult, ValueResult, methods};
use vfs_bridge::server::Server;

/// How long to wait for something that should happen promptly.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// A server over a fresh in-memory tree.
pub struct Bridge {
    pub server: Server,
    pub memory: MemoryFileSystem,
}

impl Bridge {
    /// Open a client connection.
    pub async fn connect(&self) -> BridgeClient {
        BridgeClient::connect(self.server.local_addr())
            .await
            .expect("client should connect")
    }

    /// Wait until the server tracks `expected` sessions.
    pub async fn wait_for_sessions(&self, expected: usize) {
        tokio::time::timeout(TIMEOUT, async {
            while self.server.session_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {expected} sessions"));
    }

    /// Wait until the host has `expected` open watchers.
    pub async fn wait_for_watchers(&self, expected: usize) {
        tokio::time::timeout(TIMEOUT, async {
            while self.memory.active_watchers() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {expected} watchers"));
    }
}

/// Start a bridge over memory that refuses `guarded` schemes.
pub async fn start_bridge(guarded: &[&str]) -> Bridge {
    let memory = MemoryFileSystem::new();
    let config = BridgeConfig {
        guarded_schemes: guarded.iter().map(ToString::to_string).collect(),
        ..BridgeConfig::default()
    };
    let server = Server::start(&config, Arc::new(memory.clone()))
        .await
        .expect("server should start");
    Bridge { server, memory }
}

pub async fn write_file(client: &BridgeClient, uri: &str, content: &[u8]) -> IoResult {
    client
        .request(
            methods::WRITE_FILE,
            json!({
                "uri": uri,
                "content": STANDARD.encode(content),
                "create": true,
                "overwrite": true,
            }),
        )
        .await
        .expect("writeFile should be answered")
}

pub async fn read_file(client: &BridgeClient, uri: &str) -> ValueResult<String> {
    client
        .request(methods::READ_FILE, json!({ "uri": uri }))
        .await
        .expect("readFile should be answered")
}

pub async fn mk_directory(client: &BridgeClient, uri: &str) -> IoResult {
    client
        .request(methods::MK_DIRECTORY, json!({ "uri": uri }))
        .await
        .expect("mkDirectory should be answered")
}

pub async fn list(client: &BridgeClient, uri: &str) -> DirectoryListing {
    client
        .request(methods::LIST, json!({ "uri": uri }))
        .await
        .expect("list should be answered")
}

pub async fn watch(client: &BridgeClient, uri: &str, watcher: &str) -> IoResult {
    client
        .request(methods::WATCH, json!({ "uri": uri, "watcher": watcher }))
        .await
        .expect("watch should be answered")
}

pub async fn unwatch(client: &BridgeClient, uri: &str, watcher: &str) -> IoResult {
    client
        .request(methods::UNWATCH, json!({ "uri": uri, "watcher": watcher }))
        .await
        .expect("unwatch should be answered")
}

/// The next change event pushed to `client`.
pub async fn next_event(client: &BridgeClient) -> ChangeEvent {
    let notification = tokio::time::timeout(TIMEOUT, client.next_notification())
        .await
        .expect("change event should arrive")
        .expect("connection should stay open");
    assert_eq!(notification.method, methods::EMIT_WATCH);
    serde_json::from_value(notification.params).expect("valid change event")
}

/// Whether `client` receives no notification within `wait`.
pub async fn stays_quiet(client: &BridgeClient, wait: Duration) -> bool {
    tokio::time::timeout(wait, client.next_notification())
        .await
        .is_err()
}
