// Async UDP wrappers used by the server and its transfer sessions.

use std::error;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use async_io::Async;
use rand::Rng;
use tokio::time::error::Elapsed;
use tokio::time::timeout;

/// Represents an error surfaced by the UDP socket wrappers.
#[derive(Debug)]
pub enum SocketError {
    Io(io::Error),
    Timeout(Elapsed),
}

impl error::Error for SocketError {}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::Io(e) => write!(f, "socket I/O error: {e}"),
            SocketError::Timeout(_) => write!(f, "timed out waiting for a datagram"),
        }
    }
}

impl From<io::Error> for SocketError {
    fn from(e: io::Error) -> Self {
        SocketError::Io(e)
    }
}

impl From<Elapsed> for SocketError {
    fn from(e: Elapsed) -> Self {
        SocketError::Timeout(e)
    }
}

pub type SocketResult<T> = Result<T, SocketError>;

/// The server's shared listening socket.
pub struct TftpSocket {
    sock: Async<UdpSocket>,
}

impl TftpSocket {
    pub fn bind(addr: SocketAddr) -> SocketResult<TftpSocket> {
        Ok(TftpSocket {
            sock: Async::<UdpSocket>::bind(addr)?,
        })
    }

    pub fn local_addr(&self) -> SocketResult<SocketAddr> {
        Ok(self.sock.get_ref().local_addr()?)
    }

    /// Waits for the next datagram, however long that takes. The dispatch
    /// loop has no deadline; only per-transfer sockets do.
    pub async fn recv_from(&self, buf: &mut [u8]) -> SocketResult<(usize, SocketAddr)> {
        Ok(self.sock.recv_from(buf).await?)
    }
}

const BIND_ATTEMPTS: u32 = 16;

/// A socket bound to a single peer for the lifetime of one transfer.
///
/// The underlying socket is connected, so the kernel discards datagrams
/// arriving from any other address.
pub struct PeerSocket {
    sock: Async<UdpSocket>,
    peer: SocketAddr,
}

impl PeerSocket {
    /// Binds a fresh socket on a random high port and connects it to `peer`.
    pub fn connect(peer: SocketAddr) -> SocketResult<PeerSocket> {
        let sock = bind_random_socket()?;
        sock.get_ref().connect(peer)?;
        Ok(PeerSocket { sock, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&self, buf: &[u8]) -> SocketResult<usize> {
        Ok(self.sock.send(buf).await?)
    }

    /// Receives one datagram from the peer, giving up after `ttl`. The
    /// deadline is armed per call; the socket itself holds no timeout state.
    pub async fn recv_timeout(&self, buf: &mut [u8], ttl: Duration) -> SocketResult<usize> {
        Ok(timeout(ttl, self.sock.recv(buf)).await??)
    }
}

/// Attempts to bind a UDP socket on a random high port until one succeeds.
fn bind_random_socket() -> io::Result<Async<UdpSocket>> {
    let mut rng = rand::thread_rng();
    let mut last_err = io::Error::new(io::ErrorKind::AddrInUse, "no usable ephemeral port");

    for _ in 0..BIND_ATTEMPTS {
        let port = rng.gen_range(1024..65535);
        match Async::<UdpSocket>::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))) {
            Ok(sock) => return Ok(sock),
            Err(e) => {
                log::warn!("couldn't bind port {port}: {e}");
                last_err = e;
            }
        }
    }

    Err(last_err)
}
