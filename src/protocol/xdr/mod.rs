//! XDR is a standard for the description and encoding of data.
//! It is useful for transferring data between different computer
//! architectures, and it has been used to communicate data between such
//! diverse machines as the SUN WORKSTATION*, VAX*, IBM-PC*, and Cray*
//!
//! <https://datatracker.ietf.org/doc/html/rfc4506>
//!
//! Its Rust-specific implementation is presented below. Encoding and
//! decoding happen through the [`EncodingStream`] and [`DecodingStream`]
//! traits. The only primitive a stream has to provide is the 32-bit integer;
//! every other XDR type (hyper, float, double, bool, opaque data, strings and
//! vectors of all of them) is derived from it, so every type works unchanged
//! over every transport binding:
//!
//! - [`XdrBuffer`]: in-memory buffer, used for nested encoding and testing.
//! - [`UdpEncodingStream`] / [`UdpDecodingStream`]: one record per datagram.
//! - [`TcpEncodingStream`] / [`TcpDecodingStream`]: record marked stream.
//!
//! Where appropriate, the standard types of the XDR language have
//! been replaced by similar types of the Rust language. For example,
//! the 32-bit `Integer` type was replaced by the `i32` type, and the
//! `opaque<>` type was replaced by `[u8]`. All the places where such
//! a replacement has been carried out have relevant comments.
//!
//! Despite the replacement of names, all guarantees for the corresponding
//! types must be respected.

use std::net::SocketAddr;

use byteorder::{BigEndian, ByteOrder};
use num_traits::{FromPrimitive, ToPrimitive};
use thiserror::Error;

mod buffer;
mod charset;
pub mod portmap;
pub mod rpc;
mod tcp;
mod types;
mod udp;
mod utils;

pub use buffer::XdrBuffer;
pub use charset::CharacterEncoding;
pub use tcp::{TcpDecodingStream, TcpEncodingStream, MAX_RECORD_LENGTH};
pub use types::{Void, XdrByte, XdrByteVector, XdrChar, XdrShort};
pub use udp::{UdpDecodingStream, UdpEncodingStream, MIN_DATAGRAM_BUFFER};
pub use utils::{padding_len, ALIGNMENT};

/// XDR assumes big endian encoding.
pub type XDREndian = BigEndian;

/// Upper bound for speculative allocations driven by length words read
/// from the wire.
const MAX_PREALLOC: usize = 64 * 1024;

/// Failures of a single encode or decode operation.
#[derive(Debug, Error)]
pub enum XdrError {
    /// The backing store cannot hold the next write.
    #[error("XDR buffer overflow")]
    BufferOverflow,
    /// Fewer bytes remain in the current record than required.
    #[error("XDR buffer underflow")]
    BufferUnderflow,
    /// The bytes do not form a valid value of the requested type.
    #[error("invalid XDR data: {0}")]
    InvalidData(String),
    /// The underlying transport failed.
    #[error("XDR stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, XdrError>;

/// Sink for XDR encoded data.
///
/// Implementors provide [`EncodingStream::encode_i32`] and the character
/// encoding accessors; all other operations are derived. Bindings are free to
/// override the derived opaque encoding with a faster bulk copy, as long as
/// the produced bytes are identical.
pub trait EncodingStream {
    /// Starts a new record. `receiver` selects the destination on
    /// connectionless transports and is ignored otherwise.
    fn begin_encoding(&mut self, receiver: Option<SocketAddr>) -> Result<()> {
        let _ = receiver;
        Ok(())
    }

    /// Finishes the current record. When `flush` is false a stream
    /// transport may keep the record buffered instead of sending it.
    fn end_encoding(&mut self, flush: bool) -> Result<()> {
        let _ = flush;
        Ok(())
    }

    /// Drops a record that failed to encode, so that records finished
    /// before it can still be flushed.
    fn abort_encoding(&mut self) {}

    /// Encodes a 32-bit signed integer. This is the only required primitive.
    fn encode_i32(&mut self, value: i32) -> Result<()>;

    /// Character encoding used for strings.
    fn character_encoding(&self) -> CharacterEncoding;

    fn set_character_encoding(&mut self, encoding: CharacterEncoding);

    fn encode_u32(&mut self, value: u32) -> Result<()> {
        self.encode_i32(value as i32)
    }

    /// XDR `hyper`: most significant word first.
    fn encode_i64(&mut self, value: i64) -> Result<()> {
        self.encode_i32((value >> 32) as i32)?;
        self.encode_i32(value as i32)
    }

    fn encode_u64(&mut self, value: u64) -> Result<()> {
        self.encode_i64(value as i64)
    }

    fn encode_f32(&mut self, value: f32) -> Result<()> {
        self.encode_u32(value.to_bits())
    }

    fn encode_f64(&mut self, value: f64) -> Result<()> {
        self.encode_u64(value.to_bits())
    }

    fn encode_bool(&mut self, value: bool) -> Result<()> {
        self.encode_i32(if value { 1 } else { 0 })
    }

    /// A byte occupies a whole word, sign extended.
    fn encode_byte(&mut self, value: i8) -> Result<()> {
        self.encode_i32(value as i32)
    }

    fn encode_short(&mut self, value: i16) -> Result<()> {
        self.encode_i32(value as i32)
    }

    /// Fixed-length opaque data: the bytes followed by zero padding up to
    /// the next word boundary. No length word is written.
    fn encode_opaque(&mut self, value: &[u8]) -> Result<()> {
        for chunk in value.chunks(ALIGNMENT) {
            let mut word = [0_u8; ALIGNMENT];
            word[..chunk.len()].copy_from_slice(chunk);
            self.encode_i32(XDREndian::read_i32(&word))?;
        }
        Ok(())
    }

    /// Variable-length opaque data: a length word, then the padded bytes.
    fn encode_dynamic_opaque(&mut self, value: &[u8]) -> Result<()> {
        UsizeAsU32(value.len()).serialize(self)?;
        self.encode_opaque(value)
    }

    /// Strings are variable-length opaque data in the stream's character
    /// encoding.
    fn encode_string(&mut self, value: &str) -> Result<()> {
        let bytes = self.character_encoding().encode(value);
        self.encode_dynamic_opaque(&bytes)
    }
}

/// Source of XDR encoded data.
///
/// Implementors provide [`DecodingStream::decode_i32`]; all other operations
/// are derived from it.
pub trait DecodingStream {
    /// Starts reading the next record. On network transports this blocks
    /// until a record arrives or the socket timeout expires.
    fn begin_decoding(&mut self) -> Result<()> {
        Ok(())
    }

    /// Ends the current record and discards whatever is left of it, so the
    /// next record starts from a clean state.
    fn end_decoding(&mut self) -> Result<()> {
        Ok(())
    }

    /// Address the current record was received from, if the transport knows.
    fn sender(&self) -> Option<SocketAddr> {
        None
    }

    /// Decodes a 32-bit signed integer. This is the only required primitive.
    fn decode_i32(&mut self) -> Result<i32>;

    fn character_encoding(&self) -> CharacterEncoding;

    fn set_character_encoding(&mut self, encoding: CharacterEncoding);

    fn decode_u32(&mut self) -> Result<u32> {
        Ok(self.decode_i32()? as u32)
    }

    fn decode_i64(&mut self) -> Result<i64> {
        let high = self.decode_i32()? as i64;
        let low = self.decode_u32()? as i64;
        Ok((high << 32) | low)
    }

    fn decode_u64(&mut self) -> Result<u64> {
        Ok(self.decode_i64()? as u64)
    }

    fn decode_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.decode_u32()?))
    }

    fn decode_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.decode_u64()?))
    }

    fn decode_bool(&mut self) -> Result<bool> {
        match self.decode_i32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(utils::invalid_data(format!("invalid value {other} for bool"))),
        }
    }

    fn decode_byte(&mut self) -> Result<i8> {
        Ok(self.decode_i32()? as i8)
    }

    fn decode_short(&mut self) -> Result<i16> {
        Ok(self.decode_i32()? as i16)
    }

    /// Fixed-length opaque data of `length` logical bytes. Consumes the
    /// padding too, but returns only the logical bytes.
    fn decode_opaque(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(length.min(MAX_PREALLOC));
        let mut word = [0_u8; ALIGNMENT];
        while bytes.len() < length {
            XDREndian::write_i32(&mut word, self.decode_i32()?);
            let take = (length - bytes.len()).min(ALIGNMENT);
            bytes.extend_from_slice(&word[..take]);
        }
        Ok(bytes)
    }

    /// Decodes fixed-length opaque data into `dest`.
    fn decode_opaque_into(&mut self, dest: &mut [u8]) -> Result<()> {
        let bytes = self.decode_opaque(dest.len())?;
        dest.copy_from_slice(&bytes);
        Ok(())
    }

    fn decode_dynamic_opaque(&mut self) -> Result<Vec<u8>> {
        let length = deserialize::<UsizeAsU32>(self)?.0;
        self.decode_opaque(length)
    }

    fn decode_string(&mut self) -> Result<String> {
        let bytes = self.decode_dynamic_opaque()?;
        Ok(self.character_encoding().decode(&bytes))
    }
}

pub trait Serialize {
    /// Serializes the implementing type to the provided stream.
    ///
    /// ## Parameters
    /// * `dest` - Where will the value be serialized to.
    ///
    /// ## Returns
    /// * `xdr::Result<()>` - Ok(()) on success, or an error if serialization fails.
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()>;
}

pub trait Deserialize {
    /// Deserializes data from the provided stream into the implementing type.
    ///
    /// ## Parameters
    /// * `src` - From where the value will be deserialized.
    ///
    /// ## Returns
    /// * `xdr::Result<()>` - Ok(()) on success, or an error if deserialization fails.
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()>;
}

/// Deserialization based on the [Default] trait of the type T.
///
/// # Parameters
/// * src - From where the value will be deserialized
///
/// # Returns
/// * `xdr::Result<T>` - the value on success, or an error if deserialization fails.
pub fn deserialize<T>(src: &mut (impl DecodingStream + ?Sized)) -> Result<T>
where
    T: Deserialize + Default,
{
    let mut val = T::default();
    val.deserialize(src)?;

    Ok(val)
}

/// Deserializes a fixed-length array whose length is only known at runtime.
/// No length word is read.
pub fn deserialize_fixed_vector<T>(
    src: &mut (impl DecodingStream + ?Sized),
    length: usize,
) -> Result<Vec<T>>
where
    T: Deserialize + Default,
{
    let mut values = Vec::with_capacity(length.min(MAX_PREALLOC));
    for _ in 0..length {
        values.push(deserialize::<T>(src)?);
    }
    Ok(values)
}

/// Marker trait for XDR `enum` type serialization.
pub trait SerializeEnum: ToPrimitive {}

/// Enumerations have the same representation as signed integers.
impl<T: SerializeEnum> Serialize for T {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        if let Some(val) = self.to_i32() {
            return dest.encode_i32(val);
        }
        Err(utils::invalid_data("Invalid enum value"))
    }
}

/// Marker trait for XDR `enum` type deserialization.
pub trait DeserializeEnum: FromPrimitive {}

/// Enumerations have the same representation as signed integers.
impl<T: DeserializeEnum> Deserialize for T {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        let val = src.decode_i32()?;
        if let Some(val) = FromPrimitive::from_i32(val) {
            *self = val;
            return Ok(());
        }

        Err(utils::invalid_data(format!("Invalid enum value {val}")))
    }
}

/// XDR `void` occupies no bytes at all.
impl Serialize for () {
    fn serialize<E: EncodingStream + ?Sized>(&self, _dest: &mut E) -> Result<()> {
        Ok(())
    }
}

impl Deserialize for () {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, _src: &mut D) -> Result<()> {
        Ok(())
    }
}

/// XDR `bool` type serialization implementation.
///
/// ```text
/// bool identifier;
/// ```
///
/// This is equivalent to:
///
/// ```text
///  enum { FALSE = 0, TRUE = 1 } identifier;
/// ```
///
/// Thus, the `bool` type is serialized as an `enum`, i.e. in `i32`.
impl Serialize for bool {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_bool(*self)
    }
}

/// XDR `bool` type deserialization implementation. Any value other than
/// 0 or 1 is rejected.
impl Deserialize for bool {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_bool()?;
        Ok(())
    }
}

/// XDR `int` type serialization implementation.
impl Serialize for i32 {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_i32(*self)
    }
}

/// XDR `int` type deserialization implementation.
impl Deserialize for i32 {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_i32()?;
        Ok(())
    }
}

/// XDR `hyper` type serialization implementation.
impl Serialize for i64 {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_i64(*self)
    }
}

/// XDR `hyper` type deserialization implementation.
impl Deserialize for i64 {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_i64()?;
        Ok(())
    }
}

/// XDR `unsigned int` type serialization implementation.
impl Serialize for u32 {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_u32(*self)
    }
}

/// XDR `unsigned int` type deserialization implementation.
impl Deserialize for u32 {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_u32()?;
        Ok(())
    }
}

/// XDR `unsigned hyper` type serialization implementation.
impl Serialize for u64 {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_u64(*self)
    }
}

/// XDR `unsigned hyper` type deserialization implementation.
impl Deserialize for u64 {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_u64()?;
        Ok(())
    }
}

/// XDR `float` type serialization implementation.
impl Serialize for f32 {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_f32(*self)
    }
}

/// XDR `float` type deserialization implementation.
impl Deserialize for f32 {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_f32()?;
        Ok(())
    }
}

/// XDR `double` type serialization implementation.
impl Serialize for f64 {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_f64(*self)
    }
}

/// XDR `double` type deserialization implementation.
impl Deserialize for f64 {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_f64()?;
        Ok(())
    }
}

/// Byte as a whole word. A `[i8]` is therefore the XDR byte vector, as
/// opposed to `[u8]` which is opaque data.
impl Serialize for i8 {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_byte(*self)
    }
}

impl Deserialize for i8 {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_byte()?;
        Ok(())
    }
}

impl Serialize for i16 {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_short(*self)
    }
}

impl Deserialize for i16 {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_short()?;
        Ok(())
    }
}

/// XDR Fixed-Length Opaque Data serialization implementation.
///
/// ```text
/// opaque identifier[n];
/// ```
impl<const N: usize> Serialize for [u8; N] {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_opaque(self)
    }
}

/// XDR Fixed-Length Opaque Data deserialization implementation.
///
/// ```text
/// opaque identifier[n];
/// ```
impl<const N: usize> Deserialize for [u8; N] {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        src.decode_opaque_into(self)
    }
}

/// Object lengths in XDR are always serialized as [u32]. This wrapper
/// type provides a way to serialize the [usize] type common to Rust as [u32].
#[derive(Default)]
struct UsizeAsU32(usize);

/// Try to convert [usize] to [u32] and serialize.
impl Serialize for UsizeAsU32 {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        let Some(val) = self.0.to_u32() else {
            return Err(utils::invalid_data("cannot cast `usize` to `u32`"));
        };

        dest.encode_u32(val)
    }
}

/// Try to deserialize [u32] and convert to [usize]. Lengths with the high
/// bit set are almost certainly garbage and are rejected as negative.
impl Deserialize for UsizeAsU32 {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        let raw = src.decode_i32()?;
        if raw < 0 {
            return Err(utils::invalid_data(format!("negative length {raw}")));
        }
        let Some(val) = raw.to_usize() else {
            return Err(utils::invalid_data("cannot cast `u32` to `usize`"));
        };

        self.0 = val;
        Ok(())
    }
}

/// XDR Variable-Length Opaque Data serialization implementation.
impl Serialize for [u8] {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_dynamic_opaque(self)
    }
}

/// XDR Variable-Length Opaque Data deserialization implementation.
impl Deserialize for Vec<u8> {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_dynamic_opaque()?;
        Ok(())
    }
}

/// XDR String serialization implementation.
impl Serialize for str {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_string(self)
    }
}

impl Serialize for String {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        dest.encode_string(self)
    }
}

/// XDR String deserialization implementation, using the character encoding
/// of the stream.
impl Deserialize for String {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = src.decode_string()?;
        Ok(())
    }
}

/// XDR Fixed-Length Array serialization implementation.
///
/// ```text
/// type-name identifier[n];
/// ```
impl<const N: usize, T: Serialize> Serialize for [T; N] {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        for i in self {
            i.serialize(dest)?;
        }

        Ok(())
    }
}

/// XDR Fixed-Length Array deserialization implementation.
///
/// ```text
/// type-name identifier[n];
/// ```
impl<const N: usize, T: Deserialize> Deserialize for [T; N] {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        for i in self {
            i.deserialize(src)?;
        }

        Ok(())
    }
}

/// XDR Variable-Length Array serialization implementation.
///
/// Serialized as a 4-byte length prefix followed by the elements.
impl<T: Serialize> Serialize for [T] {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        UsizeAsU32(self.len()).serialize(dest)?;
        for i in self {
            i.serialize(dest)?;
        }

        Ok(())
    }
}

impl<T> Serialize for Vec<T>
where
    [T]: Serialize,
{
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        self.as_slice().serialize(dest)
    }
}

/// The length word is not trusted for preallocation: elements are pushed one
/// by one, so a forged length ends in an underflow instead of a huge
/// allocation.
impl<T: Deserialize + Default> Deserialize for Vec<T> {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        let length = deserialize::<UsizeAsU32>(src)?.0;
        *self = deserialize_fixed_vector(src, length)?;
        Ok(())
    }
}

// XDR Optional-Data serialization implementation.
impl<T: Serialize> Serialize for Option<T> {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        match self {
            Some(data) => {
                true.serialize(dest)?;
                data.serialize(dest)?;

                Ok(())
            }
            None => false.serialize(dest),
        }
    }
}

// XDR Optional-Data deserialization implementation.
impl<T: Deserialize + Default> Deserialize for Option<T> {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        if deserialize::<bool>(src)? {
            *self = Some(deserialize::<T>(src)?);
        } else {
            *self = None;
        }

        Ok(())
    }
}

/// Macro for implementing XDR serialization for structs.
///
/// This macro simplifies implementation of the XDR trait for struct types
/// by serializing each field in sequence.
#[allow(non_camel_case_types)]
#[macro_export]
macro_rules! SerializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::xdr::Serialize for $t {
            fn serialize<E: $crate::xdr::EncodingStream + ?Sized>(
                &self,
                dest: &mut E,
            ) -> $crate::xdr::Result<()> {
                $($crate::xdr::Serialize::serialize(&self.$element, dest)?;)*
                Ok(())
            }
        }
    };
}

/// Counterpart of [`SerializeStruct`]: deserializes each field in sequence.
#[allow(non_camel_case_types)]
#[macro_export]
macro_rules! DeserializeStruct {
    (
        $t:ident,
        $($element:ident),*
    ) => {
        impl $crate::xdr::Deserialize for $t {
            fn deserialize<D: $crate::xdr::DecodingStream + ?Sized>(
                &mut self,
                src: &mut D,
            ) -> $crate::xdr::Result<()> {
                $($crate::xdr::Deserialize::deserialize(&mut self.$element, src)?;)*
                Ok(())
            }
        }
    };
}

// Re-export public types for use in other modules
pub use crate::DeserializeStruct;
pub use crate::SerializeStruct;
