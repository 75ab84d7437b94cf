//! Datagram transport used by the engine.
//!
//! TFTP runs over UDP (IPv4 in PXE environments). [`Transport`] abstracts the
//! socket so the engine can be driven in tests without binding a real port.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// Trait for sending and receiving addressed datagrams
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// `recv_from` must be cancel-safe: the engine races it against the
/// acknowledgment timer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one datagram to `target`.
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receives one datagram into `buf`, returning its length and sender.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Local address the transport is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Transport for UdpSocket {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, datagram, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}
