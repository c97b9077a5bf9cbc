//! Portmap protocol (RFC 1833, previously RFC 1057 Appendix A) data structures
//! for XDR serialization and deserialization.
//!
//! Portmap (also known as Portmapper) is a service that maps RPC program numbers
//! to network port numbers. Clients use the Portmapper to locate the port number
//! for a specific RPC service they wish to use. Only the pieces needed for a
//! port lookup are defined here.

// Keep the RFC naming conventions
#![allow(non_camel_case_types)]

use super::*;

/// Represents a mapping between an RPC program and a network port.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct mapping {
    /// The RPC program number
    pub prog: u32,
    /// The RPC program version number
    pub vers: u32,
    /// The transport protocol (TCP or UDP, see IPPROTO_* constants)
    pub prot: u32,
    /// The port number where the service is listening, 0 if unregistered
    pub port: u32,
}
DeserializeStruct!(mapping, prog, vers, prot, port);
SerializeStruct!(mapping, prog, vers, prot, port);

/// Protocol number for TCP/IP
pub const IPPROTO_TCP: u32 = 6;
/// Protocol number for UDP/IP
pub const IPPROTO_UDP: u32 = 17;
/// Portmap RPC program number
pub const PROGRAM: u32 = 100000;
/// Portmap RPC version number
pub const VERSION: u32 = 2;
/// Well-known port of the portmapper, on both TCP and UDP
pub const PMAP_PORT: u16 = 111;

/// Looks up the port of a program version over a protocol. Takes a
/// `mapping` whose port is ignored and returns the port, 0 if unregistered.
pub const PMAPPROC_GETPORT: u32 = 3;
