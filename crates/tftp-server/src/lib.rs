//! Read-only TFTP server
//!
//! A single-transfer TFTP engine (RFC 1350) with option negotiation
//! (RFC 2347 `blksize`, RFC 2349 `tsize` and `timeout`), used to hand boot
//! files to PXE clients.
//!
//! The engine serves files in octet mode only. Write requests are refused,
//! and while one transfer runs, requests from other peers are turned away.
//!
//! # Example
//!
//! ```no_run
//! use tftp_server::{FsFileSource, ServerConfig, TftpServer};
//! use tokio::net::UdpSocket;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?.with_port(6969);
//! let files = FsFileSource::new(&config.root)?;
//! let socket = UdpSocket::bind(config.socket_addr()).await?;
//!
//! TftpServer::new(socket, files, config).run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Layout
//!
//! - [`packet`]: wire codec
//! - [`options`]: option negotiation
//! - [`files`]: file access confined to a served directory
//! - [`transport`]: datagram socket abstraction
//! - [`server`]: the transfer state machine

pub mod config;
pub mod error;
pub mod files;
pub mod options;
pub mod packet;
pub mod server;
pub mod transfer;
pub mod transport;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;


pub use config::ServerConfig;
pub use error::TftpError;
pub use files::{FileSource, FileSourceError, FsFileSource, OpenFile};
pub use options::TransferParams;
pub use packet::{ErrorCode, Mode, Request, Response};
pub use server::TftpServer;
pub use transfer::TransferPhase;
pub use transport::Transport;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockFileSource, MockPeer, MockTransport};
