// Per-client transfer sessions.
//
// A session owns everything about one client's download: a socket connected
// to that client, a read cursor into the served payload, the block counter,
// and the retry budget. It walks the payload one block at a time, resending
// the current block until the matching acknowledgment arrives or the budget
// runs out. The transfer is over once the client acknowledges a data packet
// shorter than a full datagram.
//
// Replies that are not the expected ack all cost one unit of the retry
// budget: a timeout, an ack for the wrong block, or a packet that does not
// decode at all. A decoded error packet or a failure of the local payload
// source ends the session at once, with no retry.

use std::error;
use std::fmt;
use std::io::{self, Read};
use std::time::Duration;

use crate::packet::{DataBlock, ErrorCode, Packet, DATAGRAM_SIZE};
use crate::socket::{PeerSocket, SocketError};

/// Terminal failure of a transfer session.
#[derive(Debug)]
pub enum SessionError {
    /// The local payload source failed while preparing a block. Never
    /// retried.
    Prepare(io::Error),
    /// The socket failed outside of an ordinary receive timeout.
    Transport(SocketError),
    /// The peer reported an error. Error packets are terminal by contract,
    /// so the session stops without answering.
    Peer { code: ErrorCode, message: String },
    /// The retry budget ran out before the current block was acknowledged.
    RetriesExhausted,
}

impl error::Error for SessionError {}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Prepare(e) => write!(f, "preparing data packet: {e}"),
            SessionError::Transport(e) => write!(f, "transport failure: {e}"),
            SessionError::Peer { code, message } => {
                write!(f, "peer reported error ({code:?}): {message}")
            }
            SessionError::RetriesExhausted => write!(f, "exhausted retries"),
        }
    }
}

/// Drives one read transfer to completion.
pub struct TransferSession<R> {
    sock: PeerSocket,
    data: DataBlock<R>,
    retries: u8,
    timeout: Duration,
}

impl<R: Read> TransferSession<R> {
    pub fn new(sock: PeerSocket, payload: R, retries: u8, timeout: Duration) -> TransferSession<R> {
        TransferSession {
            sock,
            data: DataBlock::new(payload),
            retries,
            timeout,
        }
    }

    /// Sends the payload block by block until the final short packet is
    /// acknowledged. Returns the number of blocks sent.
    pub async fn run(mut self) -> Result<u16, SessionError> {
        loop {
            let datagram = self.data.marshal().map_err(SessionError::Prepare)?;
            self.transmit(&datagram).await?;

            // A short datagram carries the payload's tail; once it is acked
            // there is nothing left to send.
            if datagram.len() < DATAGRAM_SIZE {
                return Ok(self.data.block());
            }
        }
    }

    /// One block's send/await-ack cycle. Each attempt sends the datagram and
    /// waits out one deadline; timeouts, stale acks, and garbled replies all
    /// consume an attempt.
    async fn transmit(&mut self, datagram: &[u8]) -> Result<(), SessionError> {
        let peer = self.sock.peer();
        let mut buf = [0u8; DATAGRAM_SIZE];

        for _ in 0..self.retries {
            self.sock
                .send(datagram)
                .await
                .map_err(SessionError::Transport)?;

            let n = match self.sock.recv_timeout(&mut buf, self.timeout).await {
                Ok(n) => n,
                Err(SocketError::Timeout(_)) => continue,
                Err(e) => return Err(SessionError::Transport(e)),
            };

            match Packet::unmarshal(&buf[..n]) {
                Ok(Packet::Ack(ack)) if ack.0 == self.data.block() => return Ok(()),
                Ok(Packet::Ack(ack)) => {
                    // Stale or duplicated ack: resend the current block.
                    log::debug!(
                        "[{peer}] ack for block {}, awaiting block {}",
                        ack.0,
                        self.data.block()
                    );
                }
                Ok(Packet::Error(err)) => {
                    return Err(SessionError::Peer {
                        code: err.code,
                        message: err.message,
                    });
                }
                Ok(_) | Err(_) => log::debug!("[{peer}] bad packet"),
            }
        }

        Err(SessionError::RetriesExhausted)
    }
}
