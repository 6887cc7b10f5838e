//! vfs-bridge binary.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use vfs_bridge::cli::Cli;

/// Main entry point for the bridge.
///
/// The bridge is one event loop multiplexing every connection, so the
/// `current_thread` runtime is enough.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout is reserved for the port announcement
    // Example: RUST_LOG=vfs_bridge=debug,vfs_bridge_rpc=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vfs_bridge=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!("Starting vfs-bridge");

    let cli = Cli::parse_args();
    cli.execute().await?;

    tracing::debug!("vfs-bridge stopped");
    Ok(())
}
