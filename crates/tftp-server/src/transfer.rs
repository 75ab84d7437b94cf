//! Per-transfer session state.
//!
//! A [`Session`] exists from the moment a read request is accepted until the
//! transfer completes or is abandoned. It owns the open file and the
//! acknowledgment timer, so dropping the session closes the file and cancels
//! the timer in one step.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::io::AsyncReadExt;
use tokio::time::{Instant, Sleep};

use crate::files::{FileReader, OpenFile};
use crate::options::TransferParams;

/// Externally visible lifecycle phase of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// No transfer running; awaiting a fresh request
    Idle,
    /// OACK sent; awaiting its acknowledgment
    Negotiating,
    /// DATA block sent; awaiting its acknowledgment
    Serving,
}

/// Engine state. The session lives inside the variant it belongs to.
#[derive(Debug)]
pub(crate) enum TransferState {
    Idle,
    Negotiating(Session),
    Serving(Session),
}

impl TransferState {
    pub(crate) fn phase(&self) -> TransferPhase {
        match self {
            Self::Idle => TransferPhase::Idle,
            Self::Negotiating(_) => TransferPhase::Negotiating,
            Self::Serving(_) => TransferPhase::Serving,
        }
    }

    pub(crate) fn session(&self) -> Option<&Session> {
        match self {
            Self::Idle => None,
            Self::Negotiating(session) | Self::Serving(session) => Some(session),
        }
    }
}

/// One active read transfer
pub(crate) struct Session {
    pub(crate) peer: SocketAddr,
    pub(crate) path: PathBuf,
    pub(crate) params: TransferParams,
    /// Block number of the packet in flight; 0 while the OACK is in flight
    pub(crate) block: u16,
    pub(crate) last_block_sent: bool,
    /// Encoded packet in flight, kept for retransmission
    pub(crate) last_packet: Vec<u8>,
    pub(crate) retransmits_left: u32,
    pub(crate) ack_timer: Pin<Box<Sleep>>,
    max_retransmits: u32,
    file: Option<FileReader>,
    bytes_sent: u64,
    started: Instant,
}

impl Session {
    pub(crate) fn new(
        peer: SocketAddr,
        file: OpenFile,
        params: TransferParams,
        max_retransmits: u32,
    ) -> Self {
        Self {
            peer,
            path: file.path,
            params,
            block: 0,
            last_block_sent: false,
            last_packet: Vec::new(),
            retransmits_left: max_retransmits,
            ack_timer: Box::pin(tokio::time::sleep(params.timeout)),
            max_retransmits,
            file: Some(file.reader),
            bytes_sent: 0,
            started: Instant::now(),
        }
    }

    /// Whether the file is still open
    pub(crate) fn file_open(&self) -> bool {
        self.file.is_some()
    }

    /// Reads the next block of at most `block_size` bytes.
    ///
    /// A short read (including zero bytes) marks the final block and closes
    /// the file before the block is sent.
    pub(crate) async fn read_block(&mut self) -> io::Result<Vec<u8>> {
        let size = usize::from(self.params.block_size);
        let mut payload = vec![0u8; size];
        let mut filled = 0;
        if let Some(reader) = self.file.as_mut() {
            while filled < size {
                let n = reader.read(&mut payload[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
        }
        payload.truncate(filled);

        if filled < size {
            self.file = None;
            self.last_block_sent = true;
        }
        self.bytes_sent += filled as u64;
        Ok(payload)
    }

    /// Replaces the packet in flight and restores the retransmission budget.
    pub(crate) fn load(&mut self, block: u16, packet: Vec<u8>) {
        self.block = block;
        self.last_packet = packet;
        self.retransmits_left = self.max_retransmits;
    }

    /// Restarts the acknowledgment timer from now.
    pub(crate) fn arm_timer(&mut self) {
        let deadline = Instant::now() + self.params.timeout;
        self.ack_timer.as_mut().reset(deadline);
    }

    pub(crate) fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub(crate) fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("block", &self.block)
            .field("last_block_sent", &self.last_block_sent)
            .field("retransmits_left", &self.retransmits_left)
            .field("file_open", &self.file.is_some())
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}
