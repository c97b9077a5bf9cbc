//! RPC (Remote Procedure Call) protocol implementation as specified in RFC 5531
//! (previously RFC 1057).
//!
//! The RPC protocol enables programs to call procedures on remote systems as if
//! they were local calls. This module is the client side of RPC version 2:
//!
//! 1. Call encoding and reply header decoding with transaction (xid) correlation
//! 2. Overall, transmission and retransmission timeouts
//! 3. Retransmission of lost datagrams with fixed or exponential back-off
//! 4. Broadcast calls over UDP
//! 5. Batched calls over TCP, with explicit backpressure
//! 6. Authentication providers with a single credential refresh
//! 7. Port lookup through the portmapper
//!
//! The engine ([`RpcClient`]) is written once and parameterised by a
//! [`Transport`]; [`UdpTransport`] and [`TcpTransport`] bind it to sockets
//! through the XDR streams of [`crate::xdr`].

mod auth;
mod client;
mod config;
mod error;
mod message;
mod portmap;
mod transport;

pub use auth::{Auth, AuthNone};
pub use client::{AnyClient, RpcClient};
pub use config::{ClientConfig, DEFAULT_BUFFER_SIZE, DEFAULT_TIMEOUT};
pub use error::{CallRejection, RpcError};
pub use portmap::{PortResolver, PortmapResolver};
pub use transport::{Protocol, RetransmissionMode, TcpTransport, Transport, UdpTransport};
