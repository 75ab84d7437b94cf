//! TFTP server errors

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::files::FileSourceError;
use crate::packet::{ErrorCode, Mode, Response};

/// Errors that can occur while serving TFTP requests.
///
/// Client-visible outcomes map onto an ERROR packet through
/// [`TftpError::to_response`]; the remaining kinds are only logged.
#[derive(Debug, Error)]
pub enum TftpError {
    /// Datagram did not match the TFTP grammar
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// Read request for a mode other than octet
    #[error("Unsupported transfer mode: {0}")]
    UnsupportedMode(Mode),

    /// Requested file does not exist under the served root
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Requested file is outside the served root or unreadable
    #[error("Access violation: {0}")]
    AccessViolation(String),

    /// Write requests are refused
    #[error("Write requests are not supported")]
    WriteNotSupported,

    /// Acknowledgment received while no transfer is running
    #[error("Acknowledgment of block {0} while no transfer running")]
    SpuriousAck(u16),

    /// Non-acknowledgment packet received while awaiting an acknowledgment
    #[error("Unexpected packet while awaiting acknowledgment: {0}")]
    UnexpectedPacket(String),

    /// No acknowledgment arrived before the negotiated timeout
    #[error("Timed out waiting for acknowledgment of block {0}")]
    AckTimeout(u16),

    /// New request from another peer while the single transfer slot is busy
    #[error("Transfer already in progress with {0}")]
    TransferInProgress(SocketAddr),

    /// Packet from a peer that does not own the running transfer
    #[error("Unknown transfer ID {0}")]
    UnknownTransferId(SocketAddr),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TftpError {
    /// ERROR packet to send back to the peer, if this outcome is client-visible.
    pub fn to_response(&self) -> Option<Response> {
        let (code, message) = match self {
            Self::UnsupportedMode(_) => (
                ErrorCode::Undefined,
                "Only octet mode is supported".to_string(),
            ),
            Self::FileNotFound(path) => (
                ErrorCode::FileNotFound,
                format!("{} cannot be found", path.display()),
            ),
            Self::AccessViolation(reason) => (ErrorCode::AccessViolation, reason.clone()),
            Self::WriteNotSupported => (
                ErrorCode::IllegalOperation,
                "write_request not implemented".to_string(),
            ),
            Self::SpuriousAck(_) => (
                ErrorCode::IllegalOperation,
                "acknowledgment while no transfer running".to_string(),
            ),
            Self::TransferInProgress(_) => (
                ErrorCode::Undefined,
                "transfer already in progress".to_string(),
            ),
            Self::UnknownTransferId(_) => (
                ErrorCode::UnknownTransferId,
                "unknown transfer id".to_string(),
            ),
            Self::Io(e) => (ErrorCode::Undefined, e.to_string()),
            Self::MalformedPacket(_)
            | Self::UnexpectedPacket(_)
            | Self::AckTimeout(_)
            | Self::Configuration(_) => return None,
        };
        Some(Response::Error { code, message })
    }
}

impl From<FileSourceError> for TftpError {
    fn from(error: FileSourceError) -> Self {
        match error {
            FileSourceError::NotFound(path) => Self::FileNotFound(path),
            e @ (FileSourceError::OutsideRoot(_) | FileSourceError::PermissionDenied(_)) => {
                Self::AccessViolation(e.to_string())
            }
            FileSourceError::Io(e) => Self::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_packet(error: &TftpError) -> (ErrorCode, String) {
        match error.to_response() {
            Some(Response::Error { code, message }) => (code, message),
            other => panic!("expected an error packet for {error}, got {other:?}"),
        }
    }

    #[test]
    fn test_client_visible_errors_carry_protocol_messages() {
        assert_eq!(
            error_packet(&TftpError::UnsupportedMode(Mode::NetAscii)),
            (ErrorCode::Undefined, "Only octet mode is supported".to_string())
        );
        assert_eq!(
            error_packet(&TftpError::FileNotFound(PathBuf::from("/srv/tftp/a.txt"))),
            (ErrorCode::FileNotFound, "/srv/tftp/a.txt cannot be found".to_string())
        );
        assert_eq!(
            error_packet(&TftpError::WriteNotSupported),
            (ErrorCode::IllegalOperation, "write_request not implemented".to_string())
        );
        assert_eq!(
            error_packet(&TftpError::SpuriousAck(3)),
            (
                ErrorCode::IllegalOperation,
                "acknowledgment while no transfer running".to_string()
            )
        );
    }

    #[test]
    fn test_local_only_errors_have_no_packet() {
        assert!(TftpError::MalformedPacket("x".to_string()).to_response().is_none());
        assert!(TftpError::UnexpectedPacket("x".to_string()).to_response().is_none());
        assert!(TftpError::AckTimeout(1).to_response().is_none());
        assert!(TftpError::Configuration("x".to_string()).to_response().is_none());
    }

    #[test]
    fn test_file_source_errors_map_to_protocol_errors() {
        let outside: TftpError = FileSourceError::OutsideRoot("../etc/passwd".to_string()).into();
        let (code, message) = error_packet(&outside);
        assert_eq!(code, ErrorCode::AccessViolation);
        assert!(message.contains("../etc/passwd"));

        let missing: TftpError = FileSourceError::NotFound(PathBuf::from("/srv/x")).into();
        assert!(matches!(missing, TftpError::FileNotFound(_)));
    }
}
