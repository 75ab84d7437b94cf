//! In-memory transport and file source for unit testing
//!
//! [`MockTransport`] hands the engine datagrams pushed through its paired
//! [`MockPeer`], and records everything the engine sends. [`MockFileSource`]
//! serves byte buffers registered with [`MockFileSource::add_file`].

#![allow(
    clippy::expect_used,
    reason = "test doubles panic on misuse so failing tests point at the cause"
)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::files::{FileSource, FileSourceError, OpenFile};
use crate::packet::{Request, Response};
use crate::transport::Transport;

type Datagram = (Vec<u8>, SocketAddr);

/// Address the mock server pretends to be bound to
pub const MOCK_SERVER_ADDR: &str = "10.0.0.1:69";
/// Address [`MockPeer`] sends from unless told otherwise
pub const MOCK_CLIENT_ADDR: &str = "10.0.0.2:2001";

/// Channel-backed [`Transport`]
#[derive(Debug)]
pub struct MockTransport {
    local: SocketAddr,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    outbound: mpsc::UnboundedSender<Datagram>,
}

/// Test-side end of a [`MockTransport`]
#[derive(Debug)]
pub struct MockPeer {
    client: SocketAddr,
    to_server: mpsc::UnboundedSender<Datagram>,
    from_server: mpsc::UnboundedReceiver<Datagram>,
}

impl MockTransport {
    /// Create a transport and the peer that drives it
    pub fn pair() -> (Self, MockPeer) {
        let (to_server, inbound) = mpsc::unbounded_channel();
        let (outbound, from_server) = mpsc::unbounded_channel();
        let transport = Self {
            local: parse_addr(MOCK_SERVER_ADDR),
            inbound: tokio::sync::Mutex::new(inbound),
            outbound,
        };
        let peer = MockPeer {
            client: parse_addr(MOCK_CLIENT_ADDR),
            to_server,
            from_server,
        };
        (transport, peer)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.outbound
            .send((datagram.to_vec(), target))
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))?;
        Ok(datagram.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbound = self.inbound.lock().await;
        let Some((datagram, from)) = inbound.recv().await else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "mock peer dropped",
            ));
        };
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok((len, from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

impl MockPeer {
    /// Address datagrams are sent from by default
    pub fn addr(&self) -> SocketAddr {
        self.client
    }

    /// Queue a raw datagram from the default client address
    pub fn send(&self, datagram: &[u8]) {
        self.send_from(self.client, datagram);
    }

    /// Queue a raw datagram from an arbitrary address
    pub fn send_from(&self, from: SocketAddr, datagram: &[u8]) {
        self.to_server
            .send((datagram.to_vec(), from))
            .expect("mock transport dropped");
    }

    /// Queue an encoded request from the default client address
    pub fn send_request(&self, request: &Request) {
        self.send(&request.to_bytes());
    }

    /// Next datagram the server sent, if any
    pub fn try_recv(&mut self) -> Option<(Vec<u8>, SocketAddr)> {
        self.from_server.try_recv().ok()
    }

    /// Next packet the server sent, decoded, if any
    pub fn try_recv_response(&mut self) -> Option<(Response, SocketAddr)> {
        self.try_recv().map(|(datagram, target)| {
            let response = Response::parse(&datagram).expect("server sent a valid packet");
            (response, target)
        })
    }

    /// Next packet the server sent to the default client address
    ///
    /// Panics if nothing was sent or the packet went elsewhere.
    pub fn recv(&mut self) -> Response {
        let (response, target) = self
            .try_recv_response()
            .expect("server should have sent a packet");
        assert_eq!(target, self.client, "packet sent to the wrong peer");
        response
    }
}

/// In-memory [`FileSource`]
#[derive(Debug, Clone)]
pub struct MockFileSource {
    root: PathBuf,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl Default for MockFileSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFileSource {
    /// Create an empty file source rooted at `/srv/tftp`
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/srv/tftp"),
            files: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add a file to the mock store (for test setup)
    pub fn add_file(&self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), contents.into());
    }
}

#[async_trait]
impl FileSource for MockFileSource {
    async fn open(&self, filename: &str) -> Result<OpenFile, FileSourceError> {
        if filename.split('/').any(|part| part == "..") {
            return Err(FileSourceError::OutsideRoot(filename.to_string()));
        }
        let name = filename.trim_start_matches('/');
        let path = self.root.join(name);
        let contents = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| FileSourceError::NotFound(path.clone()))?;

        Ok(OpenFile {
            path,
            size: contents.len() as u64,
            reader: Box::new(io::Cursor::new(contents)),
        })
    }
}

fn parse_addr(addr: &str) -> SocketAddr {
    addr.parse().expect("static mock address is valid")
}
