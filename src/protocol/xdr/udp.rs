//! XDR streams over UDP datagrams.
//!
//! Every record is exactly one datagram: encoding collects the record in a
//! buffer and sends it at [`EncodingStream::end_encoding`], decoding receives
//! one datagram at [`DecodingStream::begin_decoding`]. A record never spans
//! datagrams.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use tracing::trace;

use super::utils::invalid_data;
use super::{CharacterEncoding, DecodingStream, EncodingStream, Result, XdrBuffer};

/// Smallest buffer a datagram stream accepts.
pub const MIN_DATAGRAM_BUFFER: usize = 1024;

fn datagram_buffer(buffer_size: usize) -> XdrBuffer {
    XdrBuffer::new(buffer_size.max(MIN_DATAGRAM_BUFFER))
}

pub struct UdpEncodingStream {
    socket: UdpSocket,
    receiver: Option<SocketAddr>,
    buffer: XdrBuffer,
}

impl UdpEncodingStream {
    /// Creates a stream sending through a clone of `socket`. The buffer size
    /// is raised to at least 1024 bytes and rounded up to a multiple of four.
    pub fn new(socket: &UdpSocket, buffer_size: usize) -> io::Result<Self> {
        Ok(Self {
            socket: socket.try_clone()?,
            receiver: None,
            buffer: datagram_buffer(buffer_size),
        })
    }

    /// Bytes of the record being encoded or last sent.
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}

impl EncodingStream for UdpEncodingStream {
    fn begin_encoding(&mut self, receiver: Option<SocketAddr>) -> Result<()> {
        if receiver.is_some() {
            self.receiver = receiver;
        }
        self.buffer.begin_encoding(None)
    }

    /// Sends the record as one datagram. Calling it again without a new
    /// `begin_encoding` retransmits the same datagram.
    fn end_encoding(&mut self, _flush: bool) -> Result<()> {
        let Some(receiver) = self.receiver else {
            return Err(invalid_data("datagram has no destination"));
        };
        let sent = self.socket.send_to(self.buffer.as_bytes(), receiver)?;
        trace!(%receiver, bytes = sent, "datagram sent");
        Ok(())
    }

    fn encode_i32(&mut self, value: i32) -> Result<()> {
        self.buffer.encode_i32(value)
    }

    fn encode_opaque(&mut self, value: &[u8]) -> Result<()> {
        self.buffer.encode_opaque(value)
    }

    fn character_encoding(&self) -> CharacterEncoding {
        self.buffer.character_encoding()
    }

    fn set_character_encoding(&mut self, encoding: CharacterEncoding) {
        self.buffer.set_character_encoding(encoding);
    }
}

pub struct UdpDecodingStream {
    socket: UdpSocket,
    sender: Option<SocketAddr>,
    buffer: XdrBuffer,
}

impl UdpDecodingStream {
    /// Creates a stream receiving through a clone of `socket`. Datagrams
    /// longer than the buffer are truncated by the socket layer.
    pub fn new(socket: &UdpSocket, buffer_size: usize) -> io::Result<Self> {
        Ok(Self { socket: socket.try_clone()?, sender: None, buffer: datagram_buffer(buffer_size) })
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}

impl DecodingStream for UdpDecodingStream {
    /// Blocks until one datagram arrives or the socket read timeout expires.
    fn begin_decoding(&mut self) -> Result<()> {
        let socket = &self.socket;
        let mut from = None;
        let received = self.buffer.fill_with(|buf| {
            let (n, addr) = socket.recv_from(buf)?;
            from = Some(addr);
            Ok(n)
        })?;
        self.sender = from;
        trace!(sender = ?self.sender, bytes = received, "datagram received");
        Ok(())
    }

    fn end_decoding(&mut self) -> Result<()> {
        self.buffer.end_decoding()
    }

    fn sender(&self) -> Option<SocketAddr> {
        self.sender
    }

    fn decode_i32(&mut self) -> Result<i32> {
        self.buffer.decode_i32()
    }

    fn decode_opaque(&mut self, length: usize) -> Result<Vec<u8>> {
        self.buffer.decode_opaque(length)
    }

    fn decode_opaque_into(&mut self, dest: &mut [u8]) -> Result<()> {
        self.buffer.decode_opaque_into(dest)
    }

    fn character_encoding(&self) -> CharacterEncoding {
        self.buffer.character_encoding()
    }

    fn set_character_encoding(&mut self, encoding: CharacterEncoding) {
        self.buffer.set_character_encoding(encoding);
    }
}
