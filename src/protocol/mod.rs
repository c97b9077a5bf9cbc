//! Protocol module implements the ONC/RPC version 2 client stack.
//!
//! This module contains two main components:
//!
//! - `xdr`: External Data Representation (XDR) for serialization and deserialization
//!   of data structures according to RFC 4506 (previously RFC 1832), with stream
//!   bindings for memory buffers, UDP datagrams and record-marked TCP streams.
//!
//! - `rpc`: Remote Procedure Call (RPC) protocol implementation for issuing calls,
//!   correlating replies, retrying and authenticating as defined in RFC 5531.

pub mod rpc;
pub mod xdr;
