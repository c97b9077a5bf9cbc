//! Transports a client talks through.
//!
//! The call engine in [`super::RpcClient`] is written once against the
//! [`Transport`] trait. A transport owns the socket and the pair of XDR
//! streams bound to it, and reports the few behaviours that differ between
//! datagram and stream protocols.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use tracing::debug;

use crate::protocol::rpc::RpcError;
use crate::protocol::xdr::{
    DecodingStream, EncodingStream, TcpDecodingStream, TcpEncodingStream, UdpDecodingStream,
    UdpEncodingStream,
};

/// Socket timeouts of zero mean "block forever", so no timeout is ever set
/// below this.
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// IP protocol numbers, as used by the portmapper (`IPPROTO_TCP`, `IPPROTO_UDP`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum Protocol {
    Tcp = 6,
    Udp = 17,
}

impl TryFrom<u32> for Protocol {
    type Error = RpcError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Protocol::from_u32(value).ok_or(RpcError::UnknownProtocol(value))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// How the interval between retransmissions of an unanswered datagram call
/// evolves.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RetransmissionMode {
    /// Always wait the retransmission timeout.
    #[default]
    Fixed,
    /// Double the interval after every retransmission.
    Exponential,
}

pub trait Transport {
    type Encoder: EncodingStream;
    type Decoder: DecodingStream;

    fn protocol(&self) -> Protocol;

    /// Address calls are sent to.
    fn peer(&self) -> SocketAddr;

    fn encoder(&mut self) -> &mut Self::Encoder;

    fn decoder(&mut self) -> &mut Self::Decoder;

    /// Bounds the wait for the next record.
    fn set_receive_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Bounds a single send, and on stream transports the reception of the
    /// rest of a record once it started arriving.
    fn set_transmission_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Switches the encoder to batching, where records are only written on
    /// an explicit flush.
    fn set_batching(&mut self, batching: bool) {
        let _ = batching;
    }

    /// `(pending, capacity)` of the batch buffer, if the transport batches.
    fn batch_backlog(&self) -> Option<(usize, usize)> {
        None
    }

    /// Whether a record received from `sender` may be a reply to our calls.
    fn accepts(&self, sender: Option<SocketAddr>) -> bool {
        let _ = sender;
        true
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Unconnected datagram socket, one call per datagram.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    encoder: UdpEncodingStream,
    decoder: UdpDecodingStream,
}

impl UdpTransport {
    /// Binds an ephemeral local port of the peer's address family. Broadcast
    /// is enabled on IPv4 sockets, so `peer` may be a broadcast address.
    pub fn bind(peer: SocketAddr, buffer_size: usize) -> io::Result<Self> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;
        if peer.is_ipv4() {
            socket.set_broadcast(true)?;
        }
        Self::from_socket(socket, peer, buffer_size)
    }

    pub fn from_socket(
        socket: UdpSocket,
        peer: SocketAddr,
        buffer_size: usize,
    ) -> io::Result<Self> {
        let encoder = UdpEncodingStream::new(&socket, buffer_size)?;
        let decoder = UdpDecodingStream::new(&socket, buffer_size)?;
        debug!("UDP transport {:?} -> {}", socket.local_addr(), peer);
        Ok(Self { socket, peer, encoder, decoder })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    type Encoder = UdpEncodingStream;
    type Decoder = UdpDecodingStream;

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn encoder(&mut self) -> &mut UdpEncodingStream {
        &mut self.encoder
    }

    fn decoder(&mut self) -> &mut UdpDecodingStream {
        &mut self.decoder
    }

    fn set_receive_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))
    }

    fn set_transmission_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.socket.set_write_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))
    }

    /// Replies are matched by the address of the server only; the port may
    /// differ from the one the call went to.
    fn accepts(&self, sender: Option<SocketAddr>) -> bool {
        sender.is_some_and(|s| s.ip() == self.peer.ip())
    }
}

/// Connected stream socket using record marking.
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    encoder: TcpEncodingStream,
    decoder: TcpDecodingStream,
}

impl TcpTransport {
    pub fn connect(
        peer: SocketAddr,
        buffer_size: usize,
        connect_timeout: Duration,
        transmission_timeout: Duration,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&peer, connect_timeout.max(MIN_SOCKET_TIMEOUT))?;
        Self::from_stream(stream, buffer_size, transmission_timeout)
    }

    pub fn from_stream(
        stream: TcpStream,
        buffer_size: usize,
        transmission_timeout: Duration,
    ) -> io::Result<Self> {
        let transmission_timeout = transmission_timeout.max(MIN_SOCKET_TIMEOUT);
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(transmission_timeout))?;
        let encoder = TcpEncodingStream::new(&stream, buffer_size)?;
        let decoder = TcpDecodingStream::new(&stream, buffer_size, transmission_timeout)?;
        debug!("TCP transport {:?} -> {}", stream.local_addr(), peer);
        Ok(Self { stream, peer, encoder, decoder })
    }

    /// Bytes of batched records not yet written.
    pub fn pending_len(&self) -> usize {
        self.encoder.pending_len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.encoder.capacity()
    }
}

impl Transport for TcpTransport {
    type Encoder = TcpEncodingStream;
    type Decoder = TcpDecodingStream;

    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn encoder(&mut self) -> &mut TcpEncodingStream {
        &mut self.encoder
    }

    fn decoder(&mut self) -> &mut TcpDecodingStream {
        &mut self.decoder
    }

    fn set_receive_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))
    }

    fn set_transmission_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        let timeout = timeout.max(MIN_SOCKET_TIMEOUT);
        self.decoder.set_transmission_timeout(timeout);
        self.stream.set_write_timeout(Some(timeout))
    }

    fn set_batching(&mut self, batching: bool) {
        self.encoder.set_batching(batching);
    }

    fn batch_backlog(&self) -> Option<(usize, usize)> {
        self.encoder
            .is_batching()
            .then(|| (self.encoder.pending_len(), self.encoder.capacity()))
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}
