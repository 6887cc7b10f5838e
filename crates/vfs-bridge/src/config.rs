//! Bridge configuration.
//!
//! Loaded from a YAML file whose keys are all optional, then overridden by
//! command-line flags (see [`crate::cli`]).
//!
//! ```yaml
//! bind-address: 127.0.0.1
//! port: 0
//! guarded-schemes: [project, std]
//! backend: local
//! error-codes: detailed
//! ```

use crate::error::{Error, Result};
use crate::protocol::ErrorCodeMode;
use crate::uri::is_valid_scheme;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::fs;
use vfs_bridge_rpc::DEFAULT_MAX_MESSAGE_SIZE;

/// Smallest accepted frame limit; anything lower cannot carry a response.
pub const MIN_MESSAGE_SIZE: usize = 1024;

/// Which [`crate::host::HostFileSystem`] backend to serve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HostBackend {
    /// The operating-system file system (`file:` URIs).
    #[default]
    Local,
    /// A fresh in-process tree.
    Memory,
}

/// Configuration of a bridge instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct BridgeConfig {
    /// Interface to listen on.
    pub bind_address: IpAddr,

    /// Port to listen on; `0` picks an ephemeral port.
    pub port: u16,

    /// Schemes the remote peer serves itself.
    pub guarded_schemes: Vec<String>,

    /// Host backend.
    pub backend: HostBackend,

    /// Confinement root for the local backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// How host failures are reported.
    pub error_codes: ErrorCodeMode,

    /// Largest accepted frame body in bytes.
    pub max_message_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            guarded_schemes: Vec::new(),
            backend: HostBackend::default(),
            root: None,
            error_codes: ErrorCodeMode::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or
    /// fails [`validate`](Self::validate).
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Check values serde cannot check.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid scheme, a root used with the
    /// memory backend, or a frame limit below [`MIN_MESSAGE_SIZE`].
    pub fn validate(&self) -> Result<()> {
        if let Some(bad) = self.guarded_schemes.iter().find(|s| !is_valid_scheme(s)) {
            return Err(Error::Config(format!("invalid guarded scheme '{bad}'")));
        }

        if self.root.is_some() && self.backend == HostBackend::Memory {
            return Err(Error::Config(
                "'root' only applies to the local backend".to_string(),
            ));
        }

        if self.max_message_size < MIN_MESSAGE_SIZE {
            return Err(Error::Config(format!(
                "max-message-size must be at least {MIN_MESSAGE_SIZE} bytes"
            )));
        }

        Ok(())
    }

    /// Address the listener binds to.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}
