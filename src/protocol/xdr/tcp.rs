//! XDR streams over TCP, using the Record Marking Standard of RFC 5531
//! section 11 (previously RFC 1831 section 10).
//!
//! A record is sent as one or more fragments. Each fragment starts with a
//! 4-byte header: the lower 31 bits contain the fragment length, the highest
//! bit marks the last fragment of the record.
//!
//! The encoder keeps whole records in its buffer until it is told to flush,
//! which is how calls are batched: several records go out in one write. A
//! record larger than the buffer is written early as non-last fragments.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use byteorder::{ByteOrder, NetworkEndian, ReadBytesExt};
use tracing::trace;

use super::utils::{aligned_len, invalid_data, padding_len, ALIGNMENT};
use super::{CharacterEncoding, DecodingStream, EncodingStream, Result, XdrBuffer, XdrError};

/// Largest record the decoder reassembles.
pub const MAX_RECORD_LENGTH: usize = 16 * 1024 * 1024;

const LAST_FRAGMENT: u32 = 1 << 31;

/// Smallest encoder buffer: a header plus a reasonable amount of payload.
const MIN_STREAM_BUFFER: usize = 1024;

pub struct TcpEncodingStream {
    stream: TcpStream,
    /// Pending bytes, fragment headers included. Never longer than `capacity`.
    buf: Vec<u8>,
    capacity: usize,
    /// Offset of the header of the fragment being filled.
    header_index: usize,
    /// Offset of the first header of the record being encoded.
    record_start: usize,
    in_record: bool,
    batching: bool,
    encoding: CharacterEncoding,
}

impl TcpEncodingStream {
    /// Creates an encoder writing through a clone of `stream`.
    pub fn new(stream: &TcpStream, buffer_size: usize) -> io::Result<Self> {
        let capacity = aligned_len(buffer_size.max(MIN_STREAM_BUFFER));
        Ok(Self {
            stream: stream.try_clone()?,
            buf: Vec::with_capacity(capacity),
            capacity,
            header_index: 0,
            record_start: 0,
            in_record: false,
            batching: false,
            encoding: CharacterEncoding::default(),
        })
    }

    /// While batching, a record that does not fit next to already pending
    /// records is rolled back and reported as [`XdrError::BufferOverflow`]
    /// instead of forcing the pending records out.
    pub fn set_batching(&mut self, batching: bool) {
        self.batching = batching;
    }

    pub fn is_batching(&self) -> bool {
        self.batching
    }

    /// Number of bytes of complete records waiting to be written.
    pub fn pending_len(&self) -> usize {
        if self.in_record {
            self.record_start
        } else {
            self.buf.len()
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writes all complete records that are still buffered.
    pub fn flush(&mut self) -> Result<()> {
        if self.in_record {
            return Err(invalid_data("cannot flush in the middle of a record"));
        }
        self.send_pending()
    }

    fn patch_header(&mut self, last: bool) {
        let length = (self.buf.len() - self.header_index - ALIGNMENT) as u32;
        let header = if last { length | LAST_FRAGMENT } else { length };
        trace!("Fragment length:{}, last:{}", length, last);
        NetworkEndian::write_u32(&mut self.buf[self.header_index..], header);
    }

    fn send_pending(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let result = self.stream.write_all(&self.buf).and_then(|_| self.stream.flush());
        trace!(bytes = self.buf.len(), ok = result.is_ok(), "record data written");
        // Buffered records are lost on a failed write.
        self.buf.clear();
        self.header_index = 0;
        self.record_start = 0;
        result.map_err(XdrError::from)
    }

    fn start_fragment(&mut self) {
        self.header_index = self.buf.len();
        self.buf.extend_from_slice(&[0; ALIGNMENT]);
    }

    /// Makes room for `len` more bytes of the current record.
    fn reserve(&mut self, len: usize) -> Result<()> {
        if self.buf.len() + len <= self.capacity {
            return Ok(());
        }
        if self.batching && self.record_start > 0 {
            self.buf.truncate(self.record_start);
            self.in_record = false;
            return Err(XdrError::BufferOverflow);
        }
        self.patch_header(false);
        self.send_pending()?;
        self.start_fragment();
        Ok(())
    }
}

impl EncodingStream for TcpEncodingStream {
    fn begin_encoding(&mut self, _receiver: Option<std::net::SocketAddr>) -> Result<()> {
        self.abort_encoding();
        if self.buf.len() + 2 * ALIGNMENT > self.capacity {
            if self.batching {
                return Err(XdrError::BufferOverflow);
            }
            self.send_pending()?;
        }
        self.record_start = self.buf.len();
        self.in_record = true;
        self.start_fragment();
        Ok(())
    }

    /// Terminates the record. It is written to the stream, together with any
    /// pending records, only when `flush` is true.
    fn end_encoding(&mut self, flush: bool) -> Result<()> {
        if !self.in_record {
            return Err(invalid_data("no record is being encoded"));
        }
        self.patch_header(true);
        self.in_record = false;
        self.record_start = self.buf.len();
        if flush {
            self.send_pending()?;
        }
        Ok(())
    }

    /// Fragments of the record already written early cannot be taken back;
    /// only the buffered tail is dropped.
    fn abort_encoding(&mut self) {
        if self.in_record {
            trace!(bytes = self.buf.len() - self.record_start, "record abandoned");
            self.buf.truncate(self.record_start);
            self.header_index = self.record_start;
            self.in_record = false;
        }
    }

    fn encode_i32(&mut self, value: i32) -> Result<()> {
        self.reserve(ALIGNMENT)?;
        let mut word = [0_u8; ALIGNMENT];
        NetworkEndian::write_i32(&mut word, value);
        self.buf.extend_from_slice(&word);
        Ok(())
    }

    fn encode_opaque(&mut self, value: &[u8]) -> Result<()> {
        let mut rest = value;
        while !rest.is_empty() {
            let room = self.capacity - self.buf.len();
            if room < ALIGNMENT {
                self.reserve(ALIGNMENT)?;
                continue;
            }
            let take = rest.len().min(room);
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        self.buf.extend_from_slice(&[0; ALIGNMENT][..padding_len(value.len())]);
        Ok(())
    }

    fn character_encoding(&self) -> CharacterEncoding {
        self.encoding
    }

    fn set_character_encoding(&mut self, encoding: CharacterEncoding) {
        self.encoding = encoding;
    }
}

pub struct TcpDecodingStream {
    stream: TcpStream,
    record: Vec<u8>,
    buffer: XdrBuffer,
    transmission_timeout: Duration,
}

impl TcpDecodingStream {
    /// Creates a decoder reading through a clone of `stream`.
    pub fn new(
        stream: &TcpStream,
        buffer_size: usize,
        transmission_timeout: Duration,
    ) -> io::Result<Self> {
        Ok(Self {
            stream: stream.try_clone()?,
            record: Vec::new(),
            buffer: XdrBuffer::new(buffer_size.max(MIN_STREAM_BUFFER)),
            transmission_timeout,
        })
    }

    /// Bound for reading the rest of a record once its first header arrived.
    pub fn set_transmission_timeout(&mut self, timeout: Duration) {
        self.transmission_timeout = timeout;
    }

    /// Reads a single record-marked fragment and appends its payload to
    /// `self.record`. Returns true if this was the last fragment.
    fn read_fragment(&mut self) -> Result<bool> {
        let header = self.stream.read_u32::<NetworkEndian>()?;
        let is_last = header & LAST_FRAGMENT != 0;
        let length = (header & !LAST_FRAGMENT) as usize;
        trace!("Reading fragment length:{}, last:{}", length, is_last);
        if self.record.len().saturating_add(length) > MAX_RECORD_LENGTH {
            return Err(invalid_data(format!(
                "RPC record length {} exceeds max {}",
                self.record.len() + length,
                MAX_RECORD_LENGTH
            )));
        }
        let start = self.record.len();
        self.record.resize(start + length, 0);
        self.stream.read_exact(&mut self.record[start..])?;
        Ok(is_last)
    }

    fn read_record(&mut self, receive_timeout: Option<Duration>) -> Result<()> {
        self.record.clear();
        let mut is_last = self.read_fragment()?;
        if receive_timeout.is_none_or(|t| t > self.transmission_timeout) {
            self.stream.set_read_timeout(Some(self.transmission_timeout))?;
        }
        while !is_last {
            is_last = self.read_fragment()?;
        }
        Ok(())
    }
}

impl DecodingStream for TcpDecodingStream {
    /// Reassembles the next complete record. The first header is awaited
    /// with the socket's current read timeout; the rest of the record must
    /// arrive within the transmission timeout.
    fn begin_decoding(&mut self) -> Result<()> {
        let receive_timeout = self.stream.read_timeout()?;
        let result = self.read_record(receive_timeout);
        self.stream.set_read_timeout(receive_timeout)?;
        result?;
        self.buffer.load(&self.record);
        Ok(())
    }

    fn end_decoding(&mut self) -> Result<()> {
        self.buffer.end_decoding()
    }

    fn sender(&self) -> Option<std::net::SocketAddr> {
        self.stream.peer_addr().ok()
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
