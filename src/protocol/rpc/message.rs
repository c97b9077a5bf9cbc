//! Call and reply headers as the client engine writes and reads them.
//!
//! Unlike the plain values in [`crate::xdr::rpc`], these go straight to and
//! from the streams: the credential and verifier come from the [`Auth`]
//! provider, and a reply is only decoded as far as needed to tell whether it
//! belongs to the outstanding call.

use tracing::trace;

use crate::protocol::rpc::{Auth, CallRejection, RpcError};
use crate::protocol::xdr::rpc::{accept_body, msg_type, rejected_reply, RPC_VERSION};
use crate::protocol::xdr::{self, deserialize, DecodingStream, EncodingStream};

/// `xid | CALL | rpcvers | prog | vers | proc | cred | verf`
#[derive(Copy, Clone, Debug)]
pub(crate) struct CallHeader {
    pub xid: u32,
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
}

impl CallHeader {
    pub fn encode(&self, dest: &mut dyn EncodingStream, auth: &dyn Auth) -> xdr::Result<()> {
        dest.encode_u32(self.xid)?;
        dest.encode_i32(msg_type::CALL as i32)?;
        dest.encode_u32(RPC_VERSION)?;
        dest.encode_u32(self.program)?;
        dest.encode_u32(self.version)?;
        dest.encode_u32(self.procedure)?;
        auth.encode_cred_verf(dest)
    }
}

/// How a received record relates to the outstanding call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ReplyMatch {
    /// Successful reply to our call; the results follow in the stream.
    Matched,
    /// Reply to some other call, only its xid has been read.
    Orphan(u32),
}

/// Reads a reply header from `src`.
///
/// The verifier is checked only once the xid matched, so a stale reply is
/// never held against the provider. A matching reply that does not report
/// success is returned as the corresponding error.
pub(crate) fn decode_reply_header(
    src: &mut dyn DecodingStream,
    xid: u32,
    auth: &dyn Auth,
) -> Result<ReplyMatch, RpcError> {
    let reply_xid = src.decode_u32()?;
    let message_type = src.decode_i32()?;
    if message_type != msg_type::REPLY as i32 {
        return Err(RpcError::WrongMessage(message_type));
    }
    if reply_xid != xid {
        return Ok(ReplyMatch::Orphan(reply_xid));
    }
    match src.decode_i32()? {
        0 => {
            auth.decode_verf(src)?;
            let body = deserialize::<accept_body>(src)?;
            trace!("Reply {} accepted: {:?}", xid, body);
            match CallRejection::from_accept_body(&body) {
                None => Ok(ReplyMatch::Matched),
                Some(rejection) => Err(RpcError::CallRejected(rejection)),
            }
        }
        1 => {
            let rejected = deserialize::<rejected_reply>(src)?;
            trace!("Reply {} denied: {:?}", xid, rejected);
            Err(match rejected {
                rejected_reply::RPC_MISMATCH(info) => RpcError::RpcMismatch(info),
                rejected_reply::AUTH_ERROR(stat) => RpcError::AuthRejected(stat),
            })
        }
        other => Err(RpcError::InvalidData(format!("invalid reply status {other}"))),
    }
}
