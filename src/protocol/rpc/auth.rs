//! Client side authentication.
//!
//! Every call carries a credential and a verifier, and every accepted reply
//! carries a verifier of the server. An [`Auth`] provider produces the former
//! and checks the latter. When the server denies a call with `AUTH_ERROR`,
//! the client asks the provider to refresh its credentials and retries the
//! call once.

use std::fmt;

use crate::protocol::rpc::RpcError;
use crate::protocol::xdr::rpc::{auth_flavor, auth_stat, opaque_auth};
use crate::protocol::xdr::{self, DecodingStream, EncodingStream, Serialize};

/// Authentication provider, shared between clients.
///
/// Providers whose credentials can expire keep their state behind interior
/// mutability, so that [`Auth::refresh`] works through a shared reference.
pub trait Auth: Send + Sync + fmt::Debug {
    /// Encodes the credential and verifier of a call.
    fn encode_cred_verf(&self, dest: &mut dyn EncodingStream) -> xdr::Result<()>;

    /// Decodes and checks the verifier of an accepted reply. A bad verifier
    /// fails with [`RpcError::AuthFailed`].
    fn decode_verf(&self, src: &mut dyn DecodingStream) -> Result<(), RpcError>;

    /// Whether [`Auth::refresh`] may turn a rejected call into an accepted one.
    fn can_refresh(&self) -> bool {
        false
    }

    /// Renews the credentials after the server rejected them.
    fn refresh(&self) {}
}

/// `AUTH_NULL`: no credentials at all.
#[derive(Copy, Clone, Debug, Default)]
pub struct AuthNone;

impl Auth for AuthNone {
    fn encode_cred_verf(&self, dest: &mut dyn EncodingStream) -> xdr::Result<()> {
        let none = opaque_auth::default();
        none.serialize(dest)?;
        none.serialize(dest)
    }

    /// Only an empty `AUTH_NULL` verifier is acceptable. Its body is not
    /// read when the length is wrong.
    fn decode_verf(&self, src: &mut dyn DecodingStream) -> Result<(), RpcError> {
        let flavor = src.decode_i32()?;
        let length = src.decode_i32()?;
        if flavor != auth_flavor::AUTH_NULL as i32 || length != 0 {
            return Err(RpcError::AuthFailed(auth_stat::AUTH_FAILED));
        }
        Ok(())
    }
}
