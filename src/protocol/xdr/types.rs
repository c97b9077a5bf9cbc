//! Value wrappers for XDR types that have no direct Rust counterpart.
//!
//! Each of them occupies whole 4-byte words on the wire: a byte, a short and
//! a character are sign extended into one word, and every element of a byte
//! vector takes a word of its own. Use `[u8]` and `Vec<u8>` for packed opaque
//! data instead.

use super::{deserialize, DecodingStream, Deserialize, EncodingStream, Result, Serialize};

/// A single byte, one word on the wire.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct XdrByte(pub i8);

impl Serialize for XdrByte {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_byte(self.0)
    }
}

impl Deserialize for XdrByte {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        self.0 = src.decode_byte()?;
        Ok(())
    }
}

/// A 16-bit integer, one word on the wire.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct XdrShort(pub i16);

impl Serialize for XdrShort {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_short(self.0)
    }
}

impl Deserialize for XdrShort {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        self.0 = src.decode_short()?;
        Ok(())
    }
}

/// A single-byte character, encoded like a byte.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct XdrChar(pub u8);

impl XdrChar {
    /// The character, read as ISO-8859-1.
    pub fn as_char(self) -> char {
        char::from(self.0)
    }
}

impl Serialize for XdrChar {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_byte(self.0 as i8)
    }
}

impl Deserialize for XdrChar {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        self.0 = src.decode_byte()? as u8;
        Ok(())
    }
}

/// XDR `void`, for procedures without arguments or results.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Void;

impl Serialize for Void {
    fn serialize<E: EncodingStream + ?Sized>(&self, _dest: &mut E) -> Result<()> {
        Ok(())
    }
}

impl Deserialize for Void {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, _src: &mut D) -> Result<()> {
        Ok(())
    }
}

/// Variable-length vector of bytes, one word per byte.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct XdrByteVector(pub Vec<u8>);

impl Serialize for XdrByteVector {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        let bytes: Vec<XdrChar> = self.0.iter().copied().map(XdrChar).collect();
        bytes.serialize(dest)
    }
}

impl Deserialize for XdrByteVector {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        self.0 = deserialize::<Vec<XdrChar>>(src)?.into_iter().map(|c| c.0).collect();
        Ok(())
    }
}
