//! Character encodings for XDR strings.
//!
//! XDR defines strings as ASCII, but deployed services routinely exchange
//! other encodings. A stream carries one [`CharacterEncoding`] that is applied
//! symmetrically on encode and decode.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use super::XdrError;

/// Replacement byte for characters the target encoding cannot represent.
const UNMAPPABLE: u8 = b'?';

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum CharacterEncoding {
    #[default]
    Utf8,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
    /// US-ASCII: 7-bit only.
    Ascii,
}

impl CharacterEncoding {
    /// Canonical name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            CharacterEncoding::Utf8 => "UTF-8",
            CharacterEncoding::Latin1 => "ISO-8859-1",
            CharacterEncoding::Ascii => "US-ASCII",
        }
    }

    /// Converts `value` to bytes. Characters outside the encoding become `?`.
    pub fn encode<'a>(self, value: &'a str) -> Cow<'a, [u8]> {
        match self {
            CharacterEncoding::Utf8 => Cow::Borrowed(value.as_bytes()),
            _ if value.is_ascii() => Cow::Borrowed(value.as_bytes()),
            CharacterEncoding::Latin1 => Cow::Owned(
                value
                    .chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(UNMAPPABLE))
                    .collect(),
            ),
            CharacterEncoding::Ascii => Cow::Owned(
                value
                    .chars()
                    .map(|c| if c.is_ascii() { c as u8 } else { UNMAPPABLE })
                    .collect(),
            ),
        }
    }

    /// Converts `bytes` to a string. Undecodable input becomes U+FFFD.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            CharacterEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            CharacterEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            CharacterEncoding::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Display for CharacterEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CharacterEncoding {
    type Err = XdrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(CharacterEncoding::Utf8),
            "ISO-8859-1" | "ISO8859-1" | "ISO_8859_1" | "LATIN1" => Ok(CharacterEncoding::Latin1),
            "US-ASCII" | "ASCII" => Ok(CharacterEncoding::Ascii),
            _ => Err(XdrError::InvalidData(format!("unsupported character encoding {s}"))),
        }
    }
}
