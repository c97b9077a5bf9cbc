//! This module provides data structures for the Remote Procedure Call (RPC)
//! protocol as defined in RFC 5531 (previously RFC 1057). These structures
//! handle serialization and deserialization of RPC messages between client and
//! server.
//!
//! The client engine encodes calls and decodes reply headers incrementally, but
//! every message can also be built and parsed as a plain value. Test peers and
//! server-side stubs use the reply builders at the end of this module.

// Keep the RFC naming conventions
#![allow(non_camel_case_types)]

use num_derive::{FromPrimitive, ToPrimitive};

use super::*;

/// Version of the RPC protocol implemented here.
pub const RPC_VERSION: u32 = 2;

/// Message type discriminant of `rpc_msg`.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum msg_type {
    CALL = 0,
    REPLY = 1,
}
impl SerializeEnum for msg_type {}
impl DeserializeEnum for msg_type {}

/// Discriminant of `reply_body`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum reply_stat {
    MSG_ACCEPTED = 0,
    MSG_DENIED = 1,
}
impl SerializeEnum for reply_stat {}
impl DeserializeEnum for reply_stat {}

/// Discriminant of `accept_body`.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum accept_stat {
    SUCCESS = 0,
    PROG_UNAVAIL = 1,
    PROG_MISMATCH = 2,
    PROC_UNAVAIL = 3,
    GARBAGE_ARGS = 4,
    SYSTEM_ERR = 5,
}
impl SerializeEnum for accept_stat {}
impl DeserializeEnum for accept_stat {}

/// Discriminant of `rejected_reply`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum reject_stat {
    RPC_MISMATCH = 0,
    AUTH_ERROR = 1,
}
impl SerializeEnum for reject_stat {}
impl DeserializeEnum for reject_stat {}

/// Authentication status codes indicating why authentication failed
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_stat {
    /// Success
    #[default]
    AUTH_OK = 0,
    /// Invalid credentials provided by client (checksum/signature verification failed)
    AUTH_BADCRED = 1,
    /// Credentials rejected - client needs to establish a new session
    AUTH_REJECTEDCRED = 2,
    /// Invalid verifier provided by client (checksum/signature verification failed)
    AUTH_BADVERF = 3,
    /// Verifier rejected due to expiration or replay attempt
    AUTH_REJECTEDVERF = 4,
    /// Authentication mechanism too weak for requested operation
    AUTH_TOOWEAK = 5,
    /// Bogus response verifier
    AUTH_INVALIDRESP = 6,
    /// Reason unknown
    AUTH_FAILED = 7,
}
impl SerializeEnum for auth_stat {}
impl DeserializeEnum for auth_stat {}

/// Authentication flavor (mechanism) identifiers for RPC
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum auth_flavor {
    /// No authentication
    #[default]
    AUTH_NULL = 0,
    /// UNIX-style authentication (uid/gid)
    AUTH_UNIX = 1,
    /// Short-form authentication
    AUTH_SHORT = 2,
    /// DES authentication
    AUTH_DES = 3,
    /* and more to be defined */
}
impl SerializeEnum for auth_flavor {}
impl DeserializeEnum for auth_flavor {}

/// Authentication data structure used in RPC protocol for both client and server authentication.
///
/// The RPC protocol provides bidirectional authentication between caller and service:
/// - Call messages contain two auth fields: credentials and verifier
/// - Reply messages contain one auth field: response verifier
///
/// Each auth field is represented as an `opaque_auth` structure containing:
/// - An `auth_flavor` enum identifying the authentication mechanism
/// - Opaque bytes containing the auth data, interpreted based on the mechanism
///
/// The body is limited to [`MAX_AUTH_BYTES`] in both directions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct opaque_auth {
    /// The authentication mechanism being used
    pub flavor: auth_flavor,
    /// The opaque authentication data associated with that mechanism
    pub body: Vec<u8>,
}

/// Largest body of an `opaque_auth`.
pub const MAX_AUTH_BYTES: usize = 400;

impl Serialize for opaque_auth {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        if self.body.len() > MAX_AUTH_BYTES {
            return Err(utils::invalid_data(format!(
                "auth body of {} bytes exceeds {MAX_AUTH_BYTES}",
                self.body.len()
            )));
        }
        self.flavor.serialize(dest)?;
        self.body.serialize(dest)
    }
}

/// The length is checked before the body is read.
impl Deserialize for opaque_auth {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        self.flavor.deserialize(src)?;
        let length = deserialize::<UsizeAsU32>(src)?.0;
        if length > MAX_AUTH_BYTES {
            return Err(utils::invalid_data(format!(
                "auth body of {length} bytes exceeds {MAX_AUTH_BYTES}"
            )));
        }
        self.body = src.decode_opaque(length)?;
        Ok(())
    }
}

/// RPC message structure as defined in RFC 5531 (previously RFC 1057).
///
/// Each RPC message begins with a transaction identifier (xid) followed by a
/// discriminated union containing either a CALL or REPLY message body.
///
/// The xid serves several purposes:
/// - Clients use it to match REPLY messages with their corresponding CALL messages
/// - Servers use it to detect retransmitted requests
/// - The xid in a REPLY always matches the xid from the initiating CALL
///
/// Note: The xid is not a sequence number and should not be treated as such by servers.
/// It is only used for request/response matching and duplicate detection.
#[derive(Clone, Debug, Default)]
pub struct rpc_msg {
    /// Transaction identifier used to match calls and replies
    pub xid: u32,
    /// The body of the RPC message (call or reply)
    pub body: rpc_body,
}
DeserializeStruct!(rpc_msg, xid, body);
SerializeStruct!(rpc_msg, xid, body);

/// The body of an RPC message, which can be either a call or a reply
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug)]
pub enum rpc_body {
    /// A call to a remote procedure
    CALL(call_body),
    /// A reply from a remote procedure
    REPLY(reply_body),
}

impl Default for rpc_body {
    fn default() -> rpc_body {
        rpc_body::CALL(call_body::default())
    }
}

impl Serialize for rpc_body {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        match self {
            rpc_body::CALL(v) => {
                msg_type::CALL.serialize(dest)?;
                v.serialize(dest)?;
            }
            rpc_body::REPLY(v) => {
                msg_type::REPLY.serialize(dest)?;
                v.serialize(dest)?;
            }
        }
        Ok(())
    }
}
impl Deserialize for rpc_body {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = rpc_body::CALL(deserialize(src)?),
            1 => *self = rpc_body::REPLY(deserialize(src)?),
            other => {
                return Err(XdrError::InvalidData(format!(
                    "Invalid message type in rpc_body: {other}"
                )))
            }
        }

        Ok(())
    }
}

/// The body of an RPC call, containing all information needed for a remote procedure call
#[derive(Clone, Debug, Default)]
pub struct call_body {
    /// RPC version, must be 2
    pub rpcvers: u32,
    /// The program to call
    pub prog: u32,
    /// The version of the program
    pub vers: u32,
    /// The procedure within the program to call
    pub proc: u32,
    /// Authentication credentials for the caller
    pub cred: opaque_auth,
    /// Authentication verifier for the caller
    pub verf: opaque_auth,
    /* procedure specific parameters start here */
}
DeserializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);
SerializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);

/// The body of an RPC reply, indicating whether the call was accepted or denied
#[derive(Clone, Debug)]
pub enum reply_body {
    /// The call was accepted
    MSG_ACCEPTED(accepted_reply),
    /// The call was denied
    MSG_DENIED(rejected_reply),
}

impl Default for reply_body {
    fn default() -> reply_body {
        reply_body::MSG_ACCEPTED(accepted_reply::default())
    }
}

impl Serialize for reply_body {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        match self {
            reply_body::MSG_ACCEPTED(v) => {
                reply_stat::MSG_ACCEPTED.serialize(dest)?;
                v.serialize(dest)?;
            }
            reply_body::MSG_DENIED(v) => {
                reply_stat::MSG_DENIED.serialize(dest)?;
                v.serialize(dest)?;
            }
        }
        Ok(())
    }
}
impl Deserialize for reply_body {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = reply_body::MSG_ACCEPTED(deserialize(src)?),
            1 => *self = reply_body::MSG_DENIED(deserialize(src)?),
            reply_status => {
                return Err(XdrError::InvalidData(format!(
                    "Invalid reply status in reply_body: {reply_status}"
                )))
            }
        }

        Ok(())
    }
}

/// Range of versions supported by the remote side
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct mismatch_info {
    /// Lowest version supported
    pub low: u32,
    /// Highest version supported
    pub high: u32,
}
DeserializeStruct!(mismatch_info, low, high);
SerializeStruct!(mismatch_info, low, high);

/// Reply to an RPC call that was accepted by the server.
///
/// Even though the call was accepted, there could still be an error in processing it.
/// The structure contains:
/// - An authentication verifier generated by the server to validate itself to the client
/// - A union containing the actual reply data, discriminated by accept_stat enum
#[derive(Clone, Debug, Default)]
pub struct accepted_reply {
    /// Authentication verifier from server
    pub verf: opaque_auth,
    /// Reply data union discriminated by accept_stat
    pub reply_data: accept_body,
}
DeserializeStruct!(accepted_reply, verf, reply_data);
SerializeStruct!(accepted_reply, verf, reply_data);

/// Response data for an accepted RPC call, discriminated by accept_stat.
///
/// This enum represents the possible outcomes of an accepted RPC call:
/// - SUCCESS: Call completed successfully, response data is protocol-specific and follows
/// - PROG_UNAVAIL: The requested program is not available on this server
/// - PROG_MISMATCH: Program version mismatch, includes supported version range
/// - PROC_UNAVAIL: The requested procedure is not available in this program
/// - GARBAGE_ARGS: The server could not decode the call arguments
/// - SYSTEM_ERR: The server failed for a reason unrelated to the call, e.g. memory
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum accept_body {
    /// Call completed successfully
    #[default]
    SUCCESS,
    /// Program is not available on this server
    PROG_UNAVAIL,
    /// Program version mismatch, includes supported version range
    PROG_MISMATCH(mismatch_info),
    /// Requested procedure is not available
    PROC_UNAVAIL,
    /// Server could not decode the call arguments
    GARBAGE_ARGS,
    /// Server side error
    SYSTEM_ERR,
}

impl accept_body {
    pub fn stat(&self) -> accept_stat {
        match self {
            accept_body::SUCCESS => accept_stat::SUCCESS,
            accept_body::PROG_UNAVAIL => accept_stat::PROG_UNAVAIL,
            accept_body::PROG_MISMATCH(_) => accept_stat::PROG_MISMATCH,
            accept_body::PROC_UNAVAIL => accept_stat::PROC_UNAVAIL,
            accept_body::GARBAGE_ARGS => accept_stat::GARBAGE_ARGS,
            accept_body::SYSTEM_ERR => accept_stat::SYSTEM_ERR,
        }
    }
}

impl Serialize for accept_body {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        self.stat().serialize(dest)?;
        if let accept_body::PROG_MISMATCH(v) = self {
            v.serialize(dest)?;
        }

        Ok(())
    }
}
impl Deserialize for accept_body {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        *self = match deserialize::<u32>(src)? {
            0 => accept_body::SUCCESS,
            1 => accept_body::PROG_UNAVAIL,
            2 => accept_body::PROG_MISMATCH(deserialize(src)?),
            3 => accept_body::PROC_UNAVAIL,
            4 => accept_body::GARBAGE_ARGS,
            5 => accept_body::SYSTEM_ERR,
            other => {
                return Err(XdrError::InvalidData(format!(
                    "Invalid accept stat in accept_body: {other}"
                )));
            }
        };

        Ok(())
    }
}

/// Reply sent when an RPC call is rejected by the server.
///
/// The call can be rejected for two reasons:
/// 1. RPC Version Mismatch (RPC_MISMATCH):
///    - Server is not running a compatible version of the RPC protocol
///    - Server returns the lowest and highest supported RPC versions
///
/// 2. Authentication Error (AUTH_ERROR):
///    - Server refuses to authenticate the caller
///    - Returns specific auth failure status code
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum rejected_reply {
    /// RPC version mismatch - includes supported version range
    RPC_MISMATCH(mismatch_info),
    /// Authentication failed - includes specific error code
    AUTH_ERROR(auth_stat),
}

impl Default for rejected_reply {
    fn default() -> rejected_reply {
        rejected_reply::AUTH_ERROR(auth_stat::AUTH_FAILED)
    }
}

impl Serialize for rejected_reply {
    fn serialize<E: EncodingStream + ?Sized>(&self, dest: &mut E) -> Result<()> {
        match self {
            rejected_reply::RPC_MISMATCH(v) => {
                reject_stat::RPC_MISMATCH.serialize(dest)?;
                v.serialize(dest)?;
            }
            rejected_reply::AUTH_ERROR(v) => {
                reject_stat::AUTH_ERROR.serialize(dest)?;
                v.serialize(dest)?;
            }
        }

        Ok(())
    }
}
impl Deserialize for rejected_reply {
    fn deserialize<D: DecodingStream + ?Sized>(&mut self, src: &mut D) -> Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = rejected_reply::RPC_MISMATCH(deserialize(src)?),
            1 => *self = rejected_reply::AUTH_ERROR(deserialize(src)?),
            stat => {
                return Err(XdrError::InvalidData(format!(
                    "Invalid reject stat in rejected_reply: {stat}"
                )))
            }
        }

        Ok(())
    }
}

fn accepted_reply_message(xid: u32, reply_data: accept_body) -> rpc_msg {
    let reply =
        reply_body::MSG_ACCEPTED(accepted_reply { verf: opaque_auth::default(), reply_data });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Creates a reply message indicating that the requested procedure is not available
pub fn proc_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::PROC_UNAVAIL)
}

/// Creates a reply message indicating that the requested program is not available
pub fn prog_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::PROG_UNAVAIL)
}

/// Creates a reply message indicating a program version mismatch
pub fn prog_mismatch_reply_message(xid: u32, accepted_ver: u32) -> rpc_msg {
    accepted_reply_message(
        xid,
        accept_body::PROG_MISMATCH(mismatch_info { low: accepted_ver, high: accepted_ver }),
    )
}

/// Creates a reply message indicating that the arguments could not be decoded
pub fn garbage_args_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::GARBAGE_ARGS)
}

/// Creates a reply message indicating a server side failure
pub fn system_err_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::SYSTEM_ERR)
}

/// Creates a reply message indicating an RPC version mismatch
pub fn rpc_vers_mismatch(xid: u32) -> rpc_msg {
    let reply = reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(mismatch_info {
        low: RPC_VERSION,
        high: RPC_VERSION,
    }));
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Creates a reply message denying the call for an authentication reason
pub fn auth_error_reply_message(xid: u32, stat: auth_stat) -> rpc_msg {
    let reply = reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat));
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Creates a successful reply message. The procedure results are
/// serialized right after it.
pub fn make_success_reply(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::SUCCESS)
}
