//! ONC/RPC Mamont - an ONC/RPC version 2 client engine in Rust
//!
//! This library implements the client side of Sun's Remote Procedure Call
//! protocol together with the External Data Representation it is built on,
//! allowing any Rust application to call procedures of RPC services (NFS,
//! MOUNT, PORTMAP, VXI-11 and others) over UDP and TCP.
//!
//! ## Supported Features
//!
//! - XDR encoding and decoding of all standard types through stream traits
//! - Memory, UDP datagram and record-marked TCP stream bindings
//! - Transaction id correlation with discarding of stale replies
//! - Call timeouts, and retransmission with fixed or exponential back-off over UDP
//! - Broadcast calls over UDP
//! - Batched calls over TCP with explicit backpressure
//! - Pluggable authentication with a single credential refresh
//! - Port lookup through the portmapper
//!
//! ## Main Components
//!
//! - `xdr`: The `Serialize`/`Deserialize` value traits and the `EncodingStream`/
//!   `DecodingStream` traits they are written against, plus the RPC and PORTMAP wire types.
//!
//! - `rpc`: The `RpcClient` call engine, its `Transport`s, the `Auth` providers and
//!   the `PortResolver` used when no port is known.
//!
//! ## Standards Compliance
//!
//! This implementation follows these RFCs:
//! - RFC 5531: RPC: Remote Procedure Call Protocol Specification Version 2 (obsoletes RFC 1831)
//! - RFC 4506: XDR: External Data Representation Standard (obsoletes RFC 1832)
//! - RFC 1833: Binding Protocols for ONC RPC Version 2
//!
//! ## Usage
//!
//! Create a client with `RpcClient::udp` or `RpcClient::tcp` (or `AnyClient::connect`
//! when the protocol is only known at run time) and issue calls with `call`, passing
//! any `Serialize` value as parameters and any `Deserialize` value to receive results.

pub mod protocol;

pub use protocol::rpc;
pub use protocol::xdr;
