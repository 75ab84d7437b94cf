//! TFTP Daemon
//!
//! Serves boot files read-only over TFTP, one transfer at a time.
//!
//! Usage: `tftpd <port>`. The served directory and tuning knobs come from
//! the environment (`TFTP_ROOT`, `TFTP_BIND_ADDR`, `TFTP_TIMEOUT_SECS`,
//! `TFTP_MAX_RETRANSMITS`); log verbosity from `RUST_LOG`.

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use tftp_server::{FsFileSource, ServerConfig, TftpServer};
use tokio::net::UdpSocket;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tftpd", version, about = "Read-only TFTP server")]
struct Cli {
    /// UDP port to listen on
    port: u16,
}

/// Parses the command line. Help and version requests are returned as
/// errors too; the caller decides how to exit.
fn parse_cli<I, S>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match parse_cli(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            eprint!("{e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting TFTP server");

    let config = ServerConfig::from_env()?.with_port(cli.port);

    info!("Configuration:");
    info!("  Listen address: {}", config.socket_addr());
    info!("  Root: {}", config.root.display());
    info!("  Default timeout: {:?}", config.default_timeout);
    info!("  Max retransmits: {}", config.max_retransmits);

    let files = FsFileSource::new(&config.root)
        .with_context(|| format!("Cannot serve {}", config.root.display()))?;
    let socket = UdpSocket::bind(config.socket_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.socket_addr()))?;

    let mut server = TftpServer::new(socket, files, config);
    server.run().await?;

    Ok(())
}
