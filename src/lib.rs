// A read-only TFTP server (RFC 1350 subset).
//
// The server answers every read request with a single in-memory payload,
// transferred in octet mode over UDP: 512-byte data blocks, each one
// acknowledged before the next is sent, with a bounded resend budget per
// block. Write requests and the netascii/mail modes are not supported.

pub mod packet;
pub mod server;
pub mod session;
pub mod socket;

pub use server::Server;
