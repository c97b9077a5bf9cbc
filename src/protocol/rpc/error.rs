//! Failures of a remote procedure call.

use std::io;

use thiserror::Error;

use crate::protocol::xdr::rpc::{accept_body, auth_stat, mismatch_info};
use crate::protocol::xdr::XdrError;

/// Why an accepted call still did not produce a result.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum CallRejection {
    #[error("program unavailable")]
    ProgUnavail,
    #[error("program version mismatch, server supports versions {}..={}", .0.low, .0.high)]
    ProgMismatch(mismatch_info),
    #[error("procedure unavailable")]
    ProcUnavail,
    #[error("server cannot decode the arguments")]
    GarbageArgs,
    #[error("system error on the server")]
    SystemErr,
}

impl CallRejection {
    /// The rejection carried by an accepted reply, `None` for `SUCCESS`.
    pub fn from_accept_body(body: &accept_body) -> Option<Self> {
        match body {
            accept_body::SUCCESS => None,
            accept_body::PROG_UNAVAIL => Some(CallRejection::ProgUnavail),
            accept_body::PROG_MISMATCH(info) => Some(CallRejection::ProgMismatch(*info)),
            accept_body::PROC_UNAVAIL => Some(CallRejection::ProcUnavail),
            accept_body::GARBAGE_ARGS => Some(CallRejection::GarbageArgs),
            accept_body::SYSTEM_ERR => Some(CallRejection::SystemErr),
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("buffer underflow")]
    BufferUnderflow,
    #[error("timed out")]
    Timeout,
    #[error("cannot send RPC call: {0}")]
    CannotSend(#[source] io::Error),
    #[error("cannot receive RPC reply: {0}")]
    CannotReceive(#[source] io::Error),
    /// The server denied the call with `AUTH_ERROR`.
    #[error("server rejected credentials: {0:?}")]
    AuthRejected(auth_stat),
    /// The server's reply verifier did not check out.
    #[error("reply verifier rejected: {0:?}")]
    AuthFailed(auth_stat),
    #[error("RPC version mismatch, server supports versions {}..={}", .0.low, .0.high)]
    RpcMismatch(mismatch_info),
    #[error("call rejected: {0}")]
    CallRejected(#[from] CallRejection),
    #[error("wrong message type {0}, expected a reply")]
    WrongMessage(i32),
    #[error("unknown protocol {0}")]
    UnknownProtocol(u32),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("cannot resolve port: {0:#}")]
    PortResolution(anyhow::Error),
    /// A batched call did not fit next to the records already waiting to be
    /// flushed. Nothing of the call was written; flush and retry.
    #[error("batch buffer full, {pending} of {capacity} bytes pending")]
    Backpressure { pending: usize, capacity: usize },
}

impl RpcError {
    /// Maps a stream failure that happened while sending a call.
    pub fn sending(err: XdrError) -> Self {
        match err {
            XdrError::Io(e) if is_timeout(&e) => RpcError::Timeout,
            XdrError::Io(e) => RpcError::CannotSend(e),
            other => other.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout)
    }
}

/// Stream failures are mapped as receive side failures; the send path uses
/// [`RpcError::sending`].
impl From<XdrError> for RpcError {
    fn from(err: XdrError) -> Self {
        match err {
            XdrError::BufferOverflow => RpcError::BufferOverflow,
            XdrError::BufferUnderflow => RpcError::BufferUnderflow,
            XdrError::InvalidData(m) => RpcError::InvalidData(m),
            XdrError::Io(e) if is_timeout(&e) => RpcError::Timeout,
            XdrError::Io(e) => RpcError::CannotReceive(e),
        }
    }
}

/// Socket read timeouts surface as `WouldBlock` on Unix and `TimedOut` on
/// Windows.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
