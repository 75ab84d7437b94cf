//! TFTP wire format.
//!
//! Decodes inbound datagrams into [`Request`] values and encodes outbound
//! [`Response`] values into datagrams. The codec is asymmetric: a server only
//! ever reads requests and writes responses. All multi-byte integers are
//! big-endian 16-bit.
//!
//! | opcode | packet | layout |
//! |---|---|---|
//! | 1 | RRQ   | filename · NUL · mode · NUL · (name · NUL · value · NUL)* |
//! | 2 | WRQ   | filename · NUL · mode · NUL |
//! | 3 | DATA  | block · payload |
//! | 4 | ACK   | block |
//! | 5 | ERROR | code · message · NUL |
//! | 6 | OACK  | (name · NUL · value · NUL)* |

use std::fmt;

use crate::error::TftpError;

/// Read request opcode (RRQ)
pub const OPCODE_READ: u16 = 1;
/// Write request opcode (WRQ)
pub const OPCODE_WRITE: u16 = 2;
/// Data opcode (DATA)
pub const OPCODE_DATA: u16 = 3;
/// Acknowledgment opcode (ACK)
pub const OPCODE_ACK: u16 = 4;
/// Error opcode (ERROR)
pub const OPCODE_ERROR: u16 = 5;
/// Option acknowledgment opcode (OACK, RFC 2347)
pub const OPCODE_OACK: u16 = 6;

/// Transfer mode named in a read or write request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Text mode with CR-LF line endings
    NetAscii,
    /// Raw binary mode
    Octet,
    /// Obsolete mail delivery mode
    Mail,
}

impl Mode {
    /// Parses a mode string, ignoring ASCII case.
    pub fn parse(s: &str) -> Option<Self> {
        [Self::NetAscii, Self::Octet, Self::Mail]
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
    }

    /// Wire representation of the mode
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetAscii => "netascii",
            Self::Octet => "octet",
            Self::Mail => "mail",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes carried by ERROR packets (RFC 1350 §5, RFC 2347)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Not defined, see error message
    Undefined,
    /// File not found
    FileNotFound,
    /// Access violation
    AccessViolation,
    /// Disk full or allocation exceeded
    DiskFull,
    /// Illegal TFTP operation
    IllegalOperation,
    /// Unknown transfer ID
    UnknownTransferId,
    /// File already exists
    FileAlreadyExists,
    /// No such user
    NoSuchUser,
    /// Option negotiation refused
    OptionNegotiationFailed,
}

impl ErrorCode {
    /// Numeric value on the wire
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Undefined => 0,
            Self::FileNotFound => 1,
            Self::AccessViolation => 2,
            Self::DiskFull => 3,
            Self::IllegalOperation => 4,
            Self::UnknownTransferId => 5,
            Self::FileAlreadyExists => 6,
            Self::NoSuchUser => 7,
            Self::OptionNegotiationFailed => 8,
        }
    }

    /// Maps a wire value back to a code. Unknown values are reported as `Undefined`.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::FileNotFound,
            2 => Self::AccessViolation,
            3 => Self::DiskFull,
            4 => Self::IllegalOperation,
            5 => Self::UnknownTransferId,
            6 => Self::FileAlreadyExists,
            7 => Self::NoSuchUser,
            8 => Self::OptionNegotiationFailed,
            _ => Self::Undefined,
        }
    }
}

/// A decoded inbound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// RRQ: read `filename`, optionally negotiating transfer options
    Read {
        /// Requested file, relative to the served root
        filename: String,
        /// Requested transfer mode
        mode: Mode,
        /// Option name/value pairs in request order
        options: Vec<(String, String)>,
    },
    /// WRQ: always refused by this server
    Write {
        /// Requested file
        filename: String,
        /// Requested transfer mode
        mode: Mode,
    },
    /// ACK of a data block (or of an OACK, as block 0)
    Ack {
        /// Acknowledged block number
        block: u16,
    },
}

/// An outbound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// DATA block; a payload shorter than the block size ends the transfer
    Data {
        /// Block number, starting at 1
        block: u16,
        /// File bytes for this block
        payload: Vec<u8>,
    },
    /// ERROR packet
    Error {
        /// Error code
        code: ErrorCode,
        /// Human-readable message (must not contain NUL)
        message: String,
    },
    /// OACK listing the accepted options
    OptionAck {
        /// Accepted option name/value pairs
        options: Vec<(String, String)>,
    },
}

/// Bounds-checked reader over a datagram
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn u16(&mut self, what: &str) -> Result<u16, TftpError> {
        match self.buf.get(self.pos..self.pos + 2) {
            Some(&[hi, lo]) => {
                self.pos += 2;
                Ok(u16::from_be_bytes([hi, lo]))
            }
            _ => Err(malformed(format!("expected 2-byte {what}"))),
        }
    }

    /// Reads a NUL-terminated UTF-8 string and consumes its terminator.
    fn cstr(&mut self, what: &str) -> Result<&'a str, TftpError> {
        let rest = self.buf.get(self.pos..).unwrap_or_default();
        let Some(len) = rest.iter().position(|&b| b == 0) else {
            return Err(malformed(format!("expected NUL-terminated {what}")));
        };
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|e| malformed(format!("expected UTF-8 {what}: {e}")))?;
        self.pos += len + 1;
        Ok(text)
    }
}

fn malformed(expectation: String) -> TftpError {
    TftpError::MalformedPacket(expectation)
}

/// Decodes a datagram into a [`Request`].
///
/// Fails with [`TftpError::MalformedPacket`] on any opcode other than RRQ,
/// WRQ and ACK, or when the packet does not follow the grammar for its opcode.
pub fn decode(datagram: &[u8]) -> Result<Request, TftpError> {
    let mut cursor = Cursor::new(datagram);
    match cursor.u16("opcode")? {
        OPCODE_READ => {
            let (filename, mode) = filename_and_mode(&mut cursor)?;
            let mut options = Vec::new();
            while !cursor.is_empty() {
                let name = cursor.cstr("option name")?;
                if cursor.is_empty() {
                    return Err(malformed(format!("expected value for option {name:?}")));
                }
                let value = cursor.cstr("option value")?;
                options.push((name.to_string(), value.to_string()));
            }
            Ok(Request::Read {
                filename,
                mode,
                options,
            })
        }
        OPCODE_WRITE => {
            let (filename, mode) = filename_and_mode(&mut cursor)?;
            Ok(Request::Write { filename, mode })
        }
        OPCODE_ACK => Ok(Request::Ack {
            block: cursor.u16("block number")?,
        }),
        other => Err(malformed(format!(
            "expected read, write or acknowledgment opcode, got {other}"
        ))),
    }
}

fn filename_and_mode(cursor: &mut Cursor<'_>) -> Result<(String, Mode), TftpError> {
    let filename = cursor.cstr("filename")?;
    if cursor.is_empty() {
        return Err(malformed("expected mode after filename".to_string()));
    }
    let mode_str = cursor.cstr("mode")?;
    let mode = Mode::parse(mode_str).ok_or_else(|| {
        malformed(format!(
            "expected mode netascii/octet/mail, got {mode_str:?}"
        ))
    })?;
    Ok((filename.to_string(), mode))
}

/// Encodes a [`Response`] into a datagram.
pub fn encode(response: &Response) -> Vec<u8> {
    match response {
        Response::Data { block, payload } => {
            let mut out = Vec::with_capacity(4 + payload.len());
            out.extend_from_slice(&OPCODE_DATA.to_be_bytes());
            out.extend_from_slice(&block.to_be_bytes());
            out.extend_from_slice(payload);
            out
        }
        Response::Error { code, message } => {
            let mut out = Vec::with_capacity(5 + message.len());
            out.extend_from_slice(&OPCODE_ERROR.to_be_bytes());
            out.extend_from_slice(&code.as_u16().to_be_bytes());
            out.extend_from_slice(message.as_bytes());
            out.push(0);
            out
        }
        Response::OptionAck { options } => {
            let mut out = OPCODE_OACK.to_be_bytes().to_vec();
            for (name, value) in options {
                out.extend_from_slice(name.as_bytes());
                out.push(0);
                out.extend_from_slice(value.as_bytes());
                out.push(0);
            }
            out
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Request {
    /// Client-side encoding, the inverse of [`decode`].
    pub fn to_bytes(&self) -> Vec<u8> {
        fn push_str(out: &mut Vec<u8>, s: &str) {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }

        match self {
            Self::Read {
                filename,
                mode,
                options,
            } => {
                let mut out = OPCODE_READ.to_be_bytes().to_vec();
                push_str(&mut out, filename);
                push_str(&mut out, mode.as_str());
                for (name, value) in options {
                    push_str(&mut out, name);
                    push_str(&mut out, value);
                }
                out
            }
            Self::Write { filename, mode } => {
                let mut out = OPCODE_WRITE.to_be_bytes().to_vec();
                push_str(&mut out, filename);
                push_str(&mut out, mode.as_str());
                out
            }
            Self::Ack { block } => {
                let mut out = OPCODE_ACK.to_be_bytes().to_vec();
                out.extend_from_slice(&block.to_be_bytes());
                out
            }
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Response {
    /// Client-side decoding, the inverse of [`encode`].
    pub fn parse(datagram: &[u8]) -> Result<Self, TftpError> {
        let mut cursor = Cursor::new(datagram);
        match cursor.u16("opcode")? {
            OPCODE_DATA => {
                let block = cursor.u16("block number")?;
                let payload = datagram.get(cursor.pos..).unwrap_or_default().to_vec();
                Ok(Self::Data { block, payload })
            }
            OPCODE_ERROR => {
                let code = ErrorCode::from_u16(cursor.u16("error code")?);
                let message = cursor.cstr("error message")?.to_string();
                Ok(Self::Error { code, message })
            }
            OPCODE_OACK => {
                let mut options = Vec::new();
                while !cursor.is_empty() {
                    let name = cursor.cstr("option name")?.to_string();
                    let value = cursor.cstr("option value")?.to_string();
                    options.push((name, value));
                }
                Ok(Self::OptionAck { options })
            }
            other => Err(malformed(format!("expected response opcode, got {other}"))),
        }
    }
}
