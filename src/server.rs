// The dispatch loop: accept read requests on a shared socket and hand each
// one to its own transfer session.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::packet::{Packet, DATAGRAM_SIZE};
use crate::session::TransferSession;
use crate::socket::{PeerSocket, SocketResult, TftpSocket};

pub const DEFAULT_RETRIES: u8 = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6);

/// A read-only TFTP server. Every accepted request is answered with the same
/// in-memory payload, whatever filename the client asked for.
pub struct Server {
    payload: Arc<[u8]>,
    retries: u8,
    timeout: Duration,
}

impl Server {
    pub fn new(payload: impl Into<Arc<[u8]>>) -> Server {
        Server {
            payload: payload.into(),
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Per-block resend budget. Zero keeps the default of 10 attempts.
    pub fn retries(mut self, retries: u8) -> Server {
        if retries > 0 {
            self.retries = retries;
        }
        self
    }

    /// Per-attempt acknowledgment deadline. Zero keeps the default of 6
    /// seconds.
    pub fn timeout(mut self, timeout: Duration) -> Server {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    pub async fn listen_and_serve(&self, addr: SocketAddr) -> SocketResult<()> {
        let sock = TftpSocket::bind(addr)?;
        log::info!("Listening on {}...", sock.local_addr()?);
        self.serve(sock).await
    }

    /// Accepts read requests on `sock` until the socket fails on the receive
    /// side. Malformed requests are logged and dropped; each accepted request
    /// runs as its own task, so a stalled client never holds up the loop.
    /// A second request from an already-active client address simply starts a
    /// second, independent transfer.
    pub async fn serve(&self, sock: TftpSocket) -> SocketResult<()> {
        let mut buf = [0u8; DATAGRAM_SIZE];

        loop {
            let (n, addr) = sock.recv_from(&mut buf).await?;

            match Packet::unmarshal(&buf[..n]) {
                Ok(Packet::ReadReq(req)) => self.handle(addr, req.filename),
                Ok(_) => log::warn!("[{addr}] bad request: expected a read request"),
                Err(e) => log::warn!("[{addr}] bad request: {e}"),
            }
        }
    }

    fn handle(&self, addr: SocketAddr, filename: String) {
        log::info!("[{addr}] requested file: {filename}");

        let payload = Cursor::new(Arc::clone(&self.payload));
        let retries = self.retries;
        let timeout = self.timeout;

        tokio::spawn(async move {
            let sock = match PeerSocket::connect(addr) {
                Ok(sock) => sock,
                Err(e) => {
                    log::warn!("[{addr}] connect: {e}");
                    return;
                }
            };

            match TransferSession::new(sock, payload, retries, timeout).run().await {
                Ok(blocks) => log::info!("[{addr}] sent {blocks} blocks"),
                Err(e) => log::warn!("[{addr}] {e}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Ack, Data, ReadReq};
    use async_io::Async;
    use std::fs;
    use std::net::{Ipv4Addr, UdpSocket};
    use tempdir::TempDir;
    use tokio::time::timeout;

    fn start_server(payload: Vec<u8>) -> SocketAddr {
        let sock = TftpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        let addr = sock.local_addr().unwrap();
        let server = Server::new(payload).timeout(Duration::from_millis(500));
        tokio::spawn(async move { server.serve(sock).await });
        addr
    }

    fn client_socket() -> Async<UdpSocket> {
        Async::<UdpSocket>::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap()
    }

    /// Requests `filename` and acks blocks until the final short packet.
    async fn download(sock: &Async<UdpSocket>, server: SocketAddr, filename: &str) -> Vec<u8> {
        let req = ReadReq {
            filename: filename.to_string(),
            mode: "octet".to_string(),
        };
        sock.send_to(&req.marshal(), server).await.unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; DATAGRAM_SIZE];
        loop {
            let (n, src) = timeout(Duration::from_secs(2), sock.recv_from(&mut buf))
                .await
                .expect("no data from server")
                .unwrap();
            let data = Data::unmarshal(&buf[..n]).unwrap();
            received.extend_from_slice(data.payload);
            sock.send_to(&Ack(data.block).marshal(), src).await.unwrap();

            if n < DATAGRAM_SIZE {
                return received;
            }
        }
    }

    #[tokio::test]
    async fn serves_the_payload() {
        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let addr = start_server(payload.clone());

        let sock = client_socket();
        assert_eq!(download(&sock, addr, "payload.svg").await, payload);
    }

    #[tokio::test]
    async fn keeps_serving_after_bad_requests() {
        let payload = b"hello, world".to_vec();
        let addr = start_server(payload.clone());
        let sock = client_socket();

        // Garbage, then a request in an unsupported mode. Both should be
        // dropped without taking the server down.
        sock.send_to(&[0x01, 0x02, 0x03], addr).await.unwrap();
        let netascii = ReadReq {
            filename: "payload.svg".to_string(),
            mode: "netascii".to_string(),
        };
        sock.send_to(&netascii.marshal(), addr).await.unwrap();

        assert_eq!(download(&sock, addr, "payload.svg").await, payload);
    }

    #[tokio::test]
    async fn serves_clients_concurrently() {
        let payload: Vec<u8> = (0..2000u32).map(|i| (i / 3) as u8).collect();
        let addr = start_server(payload.clone());

        let a = client_socket();
        let b = client_socket();
        let (got_a, got_b) = tokio::join!(
            download(&a, addr, "payload.svg"),
            download(&b, addr, "payload.svg"),
        );

        assert_eq!(got_a, payload);
        assert_eq!(got_b, payload);
    }

    #[tokio::test]
    async fn serves_a_file_loaded_from_disk() {
        let tmpdir = TempDir::new("tftpd").unwrap();
        let path = tmpdir.path().join("payload.bin");
        let payload: Vec<u8> = (0..1500u32).map(|i| (i * 7) as u8).collect();
        fs::write(&path, &payload).unwrap();

        let addr = start_server(fs::read(&path).unwrap());

        let sock = client_socket();
        assert_eq!(download(&sock, addr, "payload.bin").await, payload);
    }
}
