use super::XdrError;

/// Every XDR item occupies a multiple of this many bytes.
pub const ALIGNMENT: usize = 4;

/// Number of zero bytes that follow `src_len` bytes of opaque data.
pub fn padding_len(src_len: usize) -> usize {
    (ALIGNMENT - (src_len % ALIGNMENT)) % ALIGNMENT
}

/// Rounds `len` up to the next multiple of [`ALIGNMENT`].
pub fn aligned_len(len: usize) -> usize {
    len + padding_len(len)
}

pub fn invalid_data(m: impl Into<String>) -> XdrError {
    XdrError::InvalidData(m.into())
}
