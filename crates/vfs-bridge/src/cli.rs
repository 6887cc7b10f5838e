//! Command-line interface of the `vfs-bridge` binary.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::config::{BridgeConfig, HostBackend};
use crate::error::{Error, Result};
use crate::host::create_host;
use crate::protocol::ErrorCodeMode;
use crate::server::Server;
use crate::uri::is_valid_scheme;

/// Serve a file system to a remote process over JSON-RPC on loopback TCP.
///
/// Prints `{"port": N}` on stdout once listening, then serves until Ctrl-C.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "vfs-bridge", version, about)]
pub struct Cli {
    /// YAML configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Scheme served by the remote peer; repeat for several
    #[arg(long = "guard-scheme", value_name = "SCHEME", value_parser = validate_scheme)]
    pub guard_schemes: Vec<String>,

    /// Host backend
    #[arg(long, value_enum)]
    pub backend: Option<HostBackend>,

    /// Confine the local backend to this directory
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Report host failures with specific error codes instead of 1
    #[arg(long)]
    pub detailed_errors: bool,
}

impl Cli {
    /// Parse CLI arguments from command line
    #[must_use]
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse CLI arguments from an iterator (for testing)
    ///
    /// # Errors
    ///
    /// Returns the clap error for invalid arguments.
    pub fn try_parse_from<I, T>(iter: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }

    /// The configuration file (if any) with flags applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the result is
    /// invalid.
    pub async fn load_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path).await?,
            None => BridgeConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Override `config` with the flags that were given.
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if !self.guard_schemes.is_empty() {
            config.guarded_schemes.clone_from(&self.guard_schemes);
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(root) = &self.root {
            config.root = Some(root.clone());
        }
        if self.detailed_errors {
            config.error_codes = ErrorCodeMode::Detailed;
        }
    }

    /// Run the bridge until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration, the host backend or the listener
    /// cannot be set up.
    pub async fn execute(&self) -> Result<()> {
        let config = self.load_config().await?;
        let host = create_host(&config)?;
        let server = Server::start(&config, host).await?;

        let announcement = serde_json::json!({ "port": server.port() });
        println!("{announcement}");

        tokio::signal::ctrl_c().await.map_err(Error::Io)?;
        info!("Interrupted, shutting down");
        server.dispose().await;
        Ok(())
    }
}

fn validate_scheme(s: &str) -> std::result::Result<String, String> {
    let s = s.trim();
    if is_valid_scheme(s) {
        Ok(s.to_string())
    } else {
        Err(format!("'{s}' is not a valid URI scheme"))
    }
}
