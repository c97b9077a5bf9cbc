//! In-memory XDR stream.

use std::io;

use super::utils::{aligned_len, invalid_data, padding_len, ALIGNMENT};
use super::{CharacterEncoding, DecodingStream, EncodingStream, Result, XdrError, XDREndian};
use byteorder::ByteOrder;

/// Fixed-capacity, word aligned byte store with independent encode and
/// decode cursors.
///
/// The write cursor doubles as the high-water mark of valid data: decoding
/// never reads past it. Both cursors always move by multiples of four bytes,
/// and the capacity is a multiple of four.
#[derive(Clone, Debug)]
pub struct XdrBuffer {
    data: Vec<u8>,
    write_pos: usize,
    read_pos: usize,
    encoding: CharacterEncoding,
}

impl XdrBuffer {
    /// Creates an empty buffer. `capacity` is rounded up to a multiple of
    /// four bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; aligned_len(capacity)],
            write_pos: 0,
            read_pos: 0,
            encoding: CharacterEncoding::default(),
        }
    }

    /// Wraps already encoded bytes for decoding. The length must be a
    /// multiple of four.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() % ALIGNMENT != 0 {
            return Err(invalid_data(format!(
                "buffer length {} is not a multiple of {ALIGNMENT}",
                bytes.len()
            )));
        }
        Ok(Self {
            write_pos: bytes.len(),
            data: bytes,
            read_pos: 0,
            encoding: CharacterEncoding::default(),
        })
    }

    /// Encoded bytes, up to the high-water mark.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.write_pos]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.truncate(self.write_pos);
        self.data
    }

    pub fn len(&self) -> usize {
        self.write_pos
    }

    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes left to decode in the current record.
    pub fn remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn character_encoding(&self) -> CharacterEncoding {
        self.encoding
    }

    pub fn set_character_encoding(&mut self, encoding: CharacterEncoding) {
        self.encoding = encoding;
    }

    /// Replaces the contents with whatever `read` stores into the full
    /// backing store, e.g. one received datagram.
    pub(crate) fn fill_with(
        &mut self,
        read: impl FnOnce(&mut [u8]) -> io::Result<usize>,
    ) -> io::Result<usize> {
        self.write_pos = 0;
        self.read_pos = 0;
        let n = read(&mut self.data)?;
        self.write_pos = n.min(self.data.len());
        Ok(n)
    }

    /// Replaces the contents with a received record. The backing store keeps
    /// its capacity if the record fits, otherwise it grows to the aligned
    /// record size.
    pub(crate) fn load(&mut self, record: &[u8]) {
        let needed = aligned_len(record.len());
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        self.data[..record.len()].copy_from_slice(record);
        self.data[record.len()..needed].fill(0);
        self.write_pos = record.len();
        self.read_pos = 0;
    }

    fn check_write(&self, len: usize) -> Result<()> {
        if self.data.len() - self.write_pos < len {
            return Err(XdrError::BufferOverflow);
        }
        Ok(())
    }

    fn check_read(&self, len: usize) -> Result<()> {
        if self.remaining() < len {
            return Err(XdrError::BufferUnderflow);
        }
        Ok(())
    }
}

impl EncodingStream for XdrBuffer {
    fn begin_encoding(&mut self, _receiver: Option<std::net::SocketAddr>) -> Result<()> {
        self.write_pos = 0;
        self.read_pos = 0;
        Ok(())
    }

    fn encode_i32(&mut self, value: i32) -> Result<()> {
        self.check_write(ALIGNMENT)?;
        XDREndian::write_i32(&mut self.data[self.write_pos..], value);
        self.write_pos += ALIGNMENT;
        Ok(())
    }

    fn character_encoding(&self) -> CharacterEncoding {
        self.encoding
    }

    fn set_character_encoding(&mut self, encoding: CharacterEncoding) {
        self.encoding = encoding;
    }

    fn encode_opaque(&mut self, value: &[u8]) -> Result<()> {
        let padded = aligned_len(value.len());
        self.check_write(padded)?;
        let start = self.write_pos;
        self.data[start..start + value.len()].copy_from_slice(value);
        self.data[start + value.len()..start + padded].fill(0);
        self.write_pos += padded;
        Ok(())
    }
}

impl DecodingStream for XdrBuffer {
    fn begin_decoding(&mut self) -> Result<()> {
        self.read_pos = 0;
        Ok(())
    }

    fn end_decoding(&mut self) -> Result<()> {
        self.read_pos = self.write_pos;
        Ok(())
    }

    fn decode_i32(&mut self) -> Result<i32> {
        self.check_read(ALIGNMENT)?;
        let value = XDREndian::read_i32(&self.data[self.read_pos..]);
        self.read_pos += ALIGNMENT;
        Ok(value)
    }

    fn character_encoding(&self) -> CharacterEncoding {
        self.encoding
    }

    fn set_character_encoding(&mut self, encoding: CharacterEncoding) {
        self.encoding = encoding;
    }

    fn decode_opaque(&mut self, length: usize) -> Result<Vec<u8>> {
        let padded = length + padding_len(length);
        self.check_read(padded)?;
        let bytes = self.data[self.read_pos..self.read_pos + length].to_vec();
        self.read_pos += padded;
        Ok(bytes)
    }

    fn decode_opaque_into(&mut self, dest: &mut [u8]) -> Result<()> {
        let padded = aligned_len(dest.len());
        self.check_read(padded)?;
        dest.copy_from_slice(&self.data[self.read_pos..self.read_pos + dest.len()]);
        self.read_pos += padded;
        Ok(())
    }
}
