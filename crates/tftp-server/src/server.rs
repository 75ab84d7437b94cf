//! TFTP protocol engine.
//!
//! [`TftpServer`] owns the socket, the file source and the single transfer
//! slot. It runs one event at a time: a datagram from any peer, or expiry of
//! the running transfer's acknowledgment timer. At most one read transfer is
//! active; requests from other peers are refused while it runs.

use std::mem;
use std::net::SocketAddr;

use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::TftpError;
use crate::files::FileSource;
use crate::options::{self, TransferParams};
use crate::packet::{self, Mode, Request, Response};
use crate::transfer::{Session, TransferPhase, TransferState};
use crate::transport::Transport;

/// Largest datagram the engine will accept
const MAX_DATAGRAM: usize = 65536;

/// Something the event loop has to react to
#[derive(Debug)]
enum Event {
    Datagram { len: usize, from: SocketAddr },
    AckTimeout,
}

/// Single-transfer read-only TFTP server.
///
/// Generic over its [`Transport`] and [`FileSource`] so the whole state
/// machine can be exercised without a socket or a filesystem.
#[derive(Debug)]
pub struct TftpServer<T, F> {
    transport: T,
    files: F,
    config: ServerConfig,
    state: TransferState,
    recv_buf: Vec<u8>,
}

impl<T, F> TftpServer<T, F>
where
    T: Transport,
    F: FileSource,
{
    /// Creates an idle server.
    pub fn new(transport: T, files: F, config: ServerConfig) -> Self {
        Self {
            transport,
            files,
            config,
            state: TransferState::Idle,
            recv_buf: vec![0; MAX_DATAGRAM],
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> TransferPhase {
        self.state.phase()
    }

    /// Parameters of the running transfer, if any
    pub fn current_params(&self) -> Option<TransferParams> {
        self.state.session().map(|session| session.params)
    }

    /// Peer owning the running transfer, if any
    pub fn current_peer(&self) -> Option<SocketAddr> {
        self.state.session().map(|session| session.peer)
    }

    /// Runs the event loop until the transport fails.
    ///
    /// Untrusted input never ends the loop; only a receive error does.
    pub async fn run(&mut self) -> Result<(), TftpError> {
        let local = self.transport.local_addr()?;
        info!(
            "TFTP server listening on {} (root {})",
            local,
            self.config.root.display()
        );

        loop {
            if let Err(e) = self.step().await {
                error!("TFTP server stopped: {}", e);
                return Err(e);
            }
        }
    }

    /// Waits for and handles exactly one event.
    pub async fn step(&mut self) -> Result<(), TftpError> {
        match self.next_event().await? {
            Event::Datagram { len, from } => {
                let datagram = self.recv_buf[..len].to_vec();
                self.on_datagram(&datagram, from).await;
            }
            Event::AckTimeout => self.on_timeout().await,
        }
        Ok(())
    }

    /// Waits for a datagram, or for the acknowledgment timer when a
    /// transfer is running. A datagram that is already queued wins over a
    /// timer that expired at the same time.
    async fn next_event(&mut self) -> Result<Event, TftpError> {
        let Self {
            transport,
            state,
            recv_buf,
            ..
        } = self;
        let mut timer = match state {
            TransferState::Idle => None,
            TransferState::Negotiating(session) | TransferState::Serving(session) => {
                Some(session.ack_timer.as_mut())
            }
        };

        loop {
            let received = match timer.as_mut() {
                Some(timer) => {
                    tokio::select! {
                        biased;
                        received = transport.recv_from(&mut recv_buf[..]) => received,
                        () = timer.as_mut() => return Ok(Event::AckTimeout),
                    }
                }
                None => transport.recv_from(&mut recv_buf[..]).await,
            };

            match received {
                Ok((len, from)) => return Ok(Event::Datagram { len, from }),
                // ICMP port unreachable from an earlier send surfaces here on some platforms.
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    debug!("Ignoring receive error: {}", e);
                }
                Err(e) => return Err(TftpError::Io(e)),
            }
        }
    }

    async fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        let state = mem::replace(&mut self.state, TransferState::Idle);
        self.state = match state {
            TransferState::Idle => match packet::decode(datagram) {
                Ok(request) => self.dispatch_idle(request, from).await,
                Err(e) => {
                    debug!("Ignoring datagram from {}: {}", from, e);
                    TransferState::Idle
                }
            },
            TransferState::Negotiating(session) if session.peer != from => {
                self.reject_foreign_peer(datagram, from).await;
                TransferState::Negotiating(session)
            }
            TransferState::Serving(session) if session.peer != from => {
                self.reject_foreign_peer(datagram, from).await;
                TransferState::Serving(session)
            }
            TransferState::Negotiating(session) => self.on_negotiating(session, datagram).await,
            TransferState::Serving(session) => self.on_serving(session, datagram, from).await,
        };
    }

    /// Handles a request while no transfer is running.
    async fn dispatch_idle(&mut self, request: Request, from: SocketAddr) -> TransferState {
        let outcome = match request {
            Request::Read {
                filename,
                mode,
                options,
            } => self.start_transfer(&filename, mode, &options, from).await,
            Request::Write { filename, mode } => {
                info!("Write request from {} for {:?} ({})", from, filename, mode);
                Err(TftpError::WriteNotSupported)
            }
            Request::Ack { block } => Err(TftpError::SpuriousAck(block)),
        };

        match outcome {
            Ok(state) => state,
            Err(e) => {
                warn!("Rejected request from {}: {}", from, e);
                self.reply_error(&e, from).await;
                TransferState::Idle
            }
        }
    }

    async fn start_transfer(
        &mut self,
        filename: &str,
        mode: Mode,
        requested: &[(String, String)],
        from: SocketAddr,
    ) -> Result<TransferState, TftpError> {
        info!("Read request from {} for {:?} ({})", from, filename, mode);
        if mode != Mode::Octet {
            return Err(TftpError::UnsupportedMode(mode));
        }

        let file = self.files.open(filename).await?;
        let negotiation =
            options::negotiate(requested, file.size, self.config.transfer_defaults());
        let mut session = Session::new(
            from,
            file,
            negotiation.params,
            self.config.max_retransmits,
        );

        if negotiation.acknowledged.is_empty() {
            return Ok(self.serve_block(session, 1).await);
        }

        debug!(
            "Acknowledging options {:?} for {}",
            negotiation.acknowledged, from
        );
        let oack = packet::encode(&Response::OptionAck {
            options: negotiation.acknowledged,
        });
        session.load(0, oack);
        Ok(self.transmit(session, TransferState::Negotiating).await)
    }

    /// Awaiting the acknowledgment of the OACK.
    async fn on_negotiating(&mut self, session: Session, datagram: &[u8]) -> TransferState {
        let reason = match packet::decode(datagram) {
            Ok(Request::Ack { block }) => {
                if block != 0 {
                    debug!(
                        "Acknowledgment of block {} from {} accepted as option acknowledgment",
                        block, session.peer
                    );
                }
                return self.serve_block(session, 1).await;
            }
            Ok(request) => TftpError::UnexpectedPacket(describe(&request)),
            Err(e) => e,
        };

        warn!(
            "Aborting transfer of {} to {}: {}",
            session.path.display(),
            session.peer,
            reason
        );
        TransferState::Idle
    }

    /// Awaiting the acknowledgment of a data block.
    async fn on_serving(
        &mut self,
        session: Session,
        datagram: &[u8],
        from: SocketAddr,
    ) -> TransferState {
        match packet::decode(datagram) {
            Ok(Request::Ack { block }) if block == session.block => {
                if session.last_block_sent {
                    info!(
                        "Sent {} to {} ({} bytes in {:?})",
                        session.path.display(),
                        session.peer,
                        session.bytes_sent(),
                        session.elapsed()
                    );
                    return TransferState::Idle;
                }
                let next = session.block.wrapping_add(1);
                self.serve_block(session, next).await
            }
            Ok(Request::Ack { block }) => {
                debug!(
                    "Ignoring acknowledgment of block {} from {} (awaiting {})",
                    block, from, session.block
                );
                TransferState::Serving(session)
            }
            Ok(request) => {
                warn!(
                    "Abandoning transfer of {} to {}: {}",
                    session.path.display(),
                    session.peer,
                    TftpError::UnexpectedPacket(describe(&request))
                );
                drop(session);
                self.dispatch_idle(request, from).await
            }
            Err(e) => {
                debug!("Ignoring datagram from {} during transfer: {}", from, e);
                TransferState::Serving(session)
            }
        }
    }

    /// Reads block `block` from the file and sends it.
    async fn serve_block(&mut self, mut session: Session, block: u16) -> TransferState {
        let payload = match session.read_block().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    "Aborting transfer of {} to {}: read failed: {}",
                    session.path.display(),
                    session.peer,
                    e
                );
                let peer = session.peer;
                drop(session);
                self.reply_error(&TftpError::Io(e), peer).await;
                return TransferState::Idle;
            }
        };

        debug!(
            "Sending block {} ({} bytes) to {}",
            block,
            payload.len(),
            session.peer
        );
        let data = packet::encode(&Response::Data { block, payload });
        session.load(block, data);
        self.transmit(session, TransferState::Serving).await
    }

    /// Sends the packet in flight and arms the timer. The transfer is
    /// dropped if the send fails.
    async fn transmit(
        &mut self,
        mut session: Session,
        awaiting: fn(Session) -> TransferState,
    ) -> TransferState {
        match self
            .transport
            .send_to(&session.last_packet, session.peer)
            .await
        {
            Ok(_) => {
                session.arm_timer();
                awaiting(session)
            }
            Err(e) => {
                warn!(
                    "Aborting transfer of {} to {}: send of block {} failed: {}",
                    session.path.display(),
                    session.peer,
                    session.block,
                    e
                );
                TransferState::Idle
            }
        }
    }

    async fn on_timeout(&mut self) {
        let state = mem::replace(&mut self.state, TransferState::Idle);
        self.state = match state {
            TransferState::Idle => TransferState::Idle,
            TransferState::Negotiating(session) => {
                self.retransmit_or_abort(session, TransferState::Negotiating)
                    .await
            }
            TransferState::Serving(session) => {
                self.retransmit_or_abort(session, TransferState::Serving)
                    .await
            }
        };
    }

    async fn retransmit_or_abort(
        &mut self,
        mut session: Session,
        awaiting: fn(Session) -> TransferState,
    ) -> TransferState {
        if session.retransmits_left == 0 {
            warn!(
                "Aborting transfer of {} to {}: {}",
                session.path.display(),
                session.peer,
                TftpError::AckTimeout(session.block)
            );
            return TransferState::Idle;
        }

        session.retransmits_left -= 1;
        debug!(
            "Retransmitting block {} to {} ({} retries left)",
            session.block, session.peer, session.retransmits_left
        );
        self.transmit(session, awaiting).await
    }

    /// Refuses a datagram from a peer that does not own the running transfer.
    async fn reject_foreign_peer(&self, datagram: &[u8], from: SocketAddr) {
        let error = match packet::decode(datagram) {
            Ok(Request::Read { .. } | Request::Write { .. }) => TftpError::TransferInProgress(from),
            Ok(Request::Ack { .. }) => TftpError::UnknownTransferId(from),
            Err(e) => {
                debug!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };
        warn!("Rejected {}: {}", from, error);
        self.reply_error(&error, from).await;
    }

    async fn reply_error(&self, error: &TftpError, to: SocketAddr) {
        let Some(response) = error.to_response() else {
            return;
        };
        if let Err(e) = self.transport.send_to(&packet::encode(&response), to).await {
            warn!("Failed to send error to {}: {}", to, e);
        }
    }
}

/// Short description of a request for log lines
fn describe(request: &Request) -> String {
    match request {
        Request::Read { filename, .. } => format!("read request for {filename:?}"),
        Request::Write { filename, .. } => format!("write request for {filename:?}"),
        Request::Ack { block } => format!("acknowledgment of block {block}"),
    }
}
