// Wire format for the read-only subset of TFTP (RFC 1350).
//
// Four packet kinds cross the wire:
//
// opcode   operation
// 1        Read request (RRQ)
// 3        Data (DATA)
// 4        ACK
// 5        ERROR
//
// Opcode 2 (write request) is reserved and never accepted; this server only
// serves downloads.
//
// RRQ:   0x01 | filename | 0x00 | mode | 0x00
// DATA:  0x03 | block # (2 bytes) | 0-512 bytes of payload
// ACK:   0x04 | block # (2 bytes)
// ERROR: 0x05 | error code (2 bytes) | message | 0x00
//
// All integers are big-endian. A DATA packet carrying fewer than 512 payload
// bytes marks the end of the transfer, so a payload that is an exact multiple
// of 512 bytes ends with one empty DATA packet. Error packets are a courtesy:
// they are never acknowledged and never retransmitted.

use std::fmt;
use std::io::{self, Read};

/// Largest datagram either side puts on the wire. Kept small enough to avoid
/// IP fragmentation on common MTUs.
pub const DATAGRAM_SIZE: usize = 516;

/// Payload capacity of one data packet: the datagram minus the 2-byte opcode
/// and 2-byte block number.
pub const BLOCK_SIZE: usize = DATAGRAM_SIZE - 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OpCode {
    ReadReq = 1,
    Data = 3,
    Ack = 4,
    Error = 5,
}

impl OpCode {
    fn from_u16(raw: u16) -> Option<OpCode> {
        match raw {
            1 => Some(OpCode::ReadReq),
            3 => Some(OpCode::Data),
            4 => Some(OpCode::Ack),
            5 => Some(OpCode::Error),
            _ => None,
        }
    }
}

/// Error codes carried by an [`ErrorPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Undefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
}

impl ErrorCode {
    /// Values outside the defined range collapse to `Undefined`.
    fn from_u16(raw: u16) -> ErrorCode {
        match raw {
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTransferId,
            6 => ErrorCode::FileAlreadyExists,
            7 => ErrorCode::NoSuchUser,
            _ => ErrorCode::Undefined,
        }
    }
}

/// Why a buffer failed to decode.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The buffer is not a well-formed packet of the named kind.
    Invalid(&'static str),
    /// A read request named a transfer mode other than "octet".
    UnsupportedMode(String),
    /// The leading opcode matches no packet kind this server accepts.
    UnknownOpCode(u16),
}

impl std::error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Invalid(kind) => write!(f, "invalid {kind}"),
            ParseError::UnsupportedMode(mode) => {
                write!(f, "unsupported mode {mode:?}: only octet transfers are supported")
            }
            ParseError::UnknownOpCode(op) => write!(f, "unknown opcode {op}"),
        }
    }
}

fn be_u16(buf: &[u8]) -> Option<u16> {
    let raw = buf.get(..2)?;
    Some(u16::from_be_bytes([raw[0], raw[1]]))
}

/// Splits `buf` at the first NUL, returning the string before it and the
/// remainder after it. `None` if the terminator is missing or the bytes are
/// not valid UTF-8.
fn nul_terminated(buf: &[u8]) -> Option<(&str, &[u8])> {
    let nul = buf.iter().position(|&b| b == 0)?;
    let s = std::str::from_utf8(&buf[..nul]).ok()?;
    Some((s, &buf[nul + 1..]))
}

/// A client's request to read one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReq {
    pub filename: String,
    /// Transfer mode. Only "octet" (binary) transfers are accepted.
    pub mode: String,
}

impl ReadReq {
    /// The server never sends read requests; clients open a transfer with
    /// this.
    pub fn marshal(&self) -> Vec<u8> {
        let mode = if self.mode.is_empty() { "octet" } else { &self.mode };

        let mut b = Vec::with_capacity(2 + self.filename.len() + 1 + mode.len() + 1);
        b.extend_from_slice(&(OpCode::ReadReq as u16).to_be_bytes());
        b.extend_from_slice(self.filename.as_bytes());
        b.push(0);
        b.extend_from_slice(mode.as_bytes());
        b.push(0);
        b
    }

    pub fn unmarshal(buf: &[u8]) -> Result<ReadReq, ParseError> {
        let op = be_u16(buf).ok_or(ParseError::Invalid("RRQ"))?;
        if op != OpCode::ReadReq as u16 {
            return Err(ParseError::Invalid("RRQ"));
        }

        let (filename, rest) = nul_terminated(&buf[2..]).ok_or(ParseError::Invalid("RRQ"))?;
        if filename.is_empty() {
            return Err(ParseError::Invalid("RRQ"));
        }

        let (mode, _) = nul_terminated(rest).ok_or(ParseError::Invalid("RRQ"))?;
        if mode.is_empty() {
            return Err(ParseError::Invalid("RRQ"));
        }
        if !mode.eq_ignore_ascii_case("octet") {
            return Err(ParseError::UnsupportedMode(mode.to_string()));
        }

        Ok(ReadReq {
            filename: filename.to_string(),
            mode: mode.to_string(),
        })
    }
}

/// Outbound data packets for one transfer.
///
/// Owns the transfer's read cursor and block counter. Each call to
/// [`DataBlock::marshal`] pulls the next chunk from the source and stamps it
/// with the next block number as a side effect, so the first encoded block is
/// numbered 1. The counter wraps silently at 65535, which keeps payloads
/// larger than `65535 * 512` bytes flowing.
pub struct DataBlock<R> {
    block: u16,
    payload: R,
}

impl<R: Read> DataBlock<R> {
    pub fn new(payload: R) -> DataBlock<R> {
        DataBlock { block: 0, payload }
    }

    /// Block number stamped on the most recently marshaled packet.
    pub fn block(&self) -> u16 {
        self.block
    }

    /// Encodes the next data packet. A result shorter than [`DATAGRAM_SIZE`]
    /// means the source is exhausted and this is the transfer's final block.
    pub fn marshal(&mut self) -> io::Result<Vec<u8>> {
        self.block = self.block.wrapping_add(1);

        let mut b = Vec::with_capacity(DATAGRAM_SIZE);
        b.extend_from_slice(&(OpCode::Data as u16).to_be_bytes());
        b.extend_from_slice(&self.block.to_be_bytes());

        (&mut self.payload).take(BLOCK_SIZE as u64).read_to_end(&mut b)?;

        Ok(b)
    }
}

/// A decoded data packet.
///
/// The payload borrows the receive buffer rather than copying it; copy it out
/// before reusing the buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Data<'a> {
    pub block: u16,
    pub payload: &'a [u8],
}

impl<'a> Data<'a> {
    pub fn unmarshal(buf: &'a [u8]) -> Result<Data<'a>, ParseError> {
        if buf.len() < 4 || buf.len() > DATAGRAM_SIZE {
            return Err(ParseError::Invalid("DATA"));
        }

        let op = be_u16(buf).ok_or(ParseError::Invalid("DATA"))?;
        if op != OpCode::Data as u16 {
            return Err(ParseError::Invalid("DATA"));
        }

        let block = be_u16(&buf[2..]).ok_or(ParseError::Invalid("DATA"))?;

        Ok(Data {
            block,
            payload: &buf[4..],
        })
    }
}

/// Acknowledgment of one block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack(pub u16);

impl Ack {
    pub fn marshal(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(4);
        b.extend_from_slice(&(OpCode::Ack as u16).to_be_bytes());
        b.extend_from_slice(&self.0.to_be_bytes());
        b
    }

    pub fn unmarshal(buf: &[u8]) -> Result<Ack, ParseError> {
        let op = be_u16(buf).ok_or(ParseError::Invalid("ACK"))?;
        if op != OpCode::Ack as u16 {
            return Err(ParseError::Invalid("ACK"));
        }

        let block = be_u16(&buf[2..]).ok_or(ParseError::Invalid("ACK"))?;
        Ok(Ack(block))
    }
}

/// A peer-reported error, terminal for the transfer that receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorPacket {
    pub fn marshal(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(2 + 2 + self.message.len() + 1);
        b.extend_from_slice(&(OpCode::Error as u16).to_be_bytes());
        b.extend_from_slice(&(self.code as u16).to_be_bytes());
        b.extend_from_slice(self.message.as_bytes());
        b.push(0);
        b
    }

    pub fn unmarshal(buf: &[u8]) -> Result<ErrorPacket, ParseError> {
        let op = be_u16(buf).ok_or(ParseError::Invalid("ERROR"))?;
        if op != OpCode::Error as u16 {
            return Err(ParseError::Invalid("ERROR"));
        }

        let code = be_u16(&buf[2..]).ok_or(ParseError::Invalid("ERROR"))?;
        let (message, _) = nul_terminated(&buf[4..]).ok_or(ParseError::Invalid("ERROR"))?;

        Ok(ErrorPacket {
            code: ErrorCode::from_u16(code),
            message: message.to_string(),
        })
    }
}

/// Any packet this server can receive, decoded by its leading opcode.
#[derive(Debug, PartialEq)]
pub enum Packet<'a> {
    ReadReq(ReadReq),
    Data(Data<'a>),
    Ack(Ack),
    Error(ErrorPacket),
}

impl<'a> Packet<'a> {
    pub fn unmarshal(buf: &'a [u8]) -> Result<Packet<'a>, ParseError> {
        let op = be_u16(buf).ok_or(ParseError::Invalid("packet"))?;

        match OpCode::from_u16(op) {
            Some(OpCode::ReadReq) => ReadReq::unmarshal(buf).map(Packet::ReadReq),
            Some(OpCode::Data) => Data::unmarshal(buf).map(Packet::Data),
            Some(OpCode::Ack) => Ack::unmarshal(buf).map(Packet::Ack),
            Some(OpCode::Error) => ErrorPacket::unmarshal(buf).map(Packet::Error),
            None => Err(ParseError::UnknownOpCode(op)),
        }
    }
}
