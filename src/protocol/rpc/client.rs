//! The call engine.
//!
//! [`RpcClient`] drives one logical call at a time over any [`Transport`]:
//!
//! 1. a fresh xid is taken from the per-client counter,
//! 2. the call header, the credentials of the [`Auth`] provider and the
//!    parameters are encoded and sent,
//! 3. records are received until one carries the same xid; everything else
//!    (stale replies, datagrams from other hosts) is discarded without
//!    resetting the overall timeout,
//! 4. the reply header is checked and the results are decoded.
//!
//! A call denied with `AUTH_ERROR` is repeated once after the provider
//! refreshed its credentials. Over UDP an unanswered call is retransmitted
//! with the same xid whenever the retransmission interval elapses. A client
//! with a zero timeout sends batch calls that do not wait for replies.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, trace, warn};
use tracing_attributes::instrument;

use crate::protocol::rpc::message::{decode_reply_header, CallHeader, ReplyMatch};
use crate::protocol::rpc::{
    Auth, AuthNone, ClientConfig, PortResolver, Protocol, RetransmissionMode, RpcError,
    TcpTransport, Transport, UdpTransport,
};
use crate::protocol::xdr::{
    self, CharacterEncoding, DecodingStream, Deserialize, EncodingStream, Serialize, XdrError,
};

/// How many times a call is repeated after the server rejected the
/// credentials and the provider refreshed them.
const AUTH_REFRESHES: u32 = 1;

/// Used instead of the deadline of a timeout too large to be represented.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

fn encode_call<E, P>(
    encoder: &mut E,
    peer: SocketAddr,
    header: &CallHeader,
    auth: &dyn Auth,
    params: &P,
    flush: bool,
) -> xdr::Result<()>
where
    E: EncodingStream,
    P: Serialize + ?Sized,
{
    encoder.begin_encoding(Some(peer))?;
    header.encode(&mut *encoder, auth)?;
    params.serialize(&mut *encoder)?;
    encoder.end_encoding(flush)
}

/// Finds the port of a program when the caller did not pin one. A port of
/// zero counts as not given.
fn resolve_port(
    host: IpAddr,
    program: u32,
    version: u32,
    port: Option<u16>,
    protocol: Protocol,
    resolver: Option<&dyn PortResolver>,
) -> Result<u16, RpcError> {
    if let Some(port) = port.filter(|&p| p != 0) {
        return Ok(port);
    }
    let Some(resolver) = resolver else {
        return Err(RpcError::PortResolution(anyhow!(
            "no port given for program {program} version {version} and no resolver"
        )));
    };
    let port =
        resolver.resolve(host, program, version, protocol).map_err(RpcError::PortResolution)?;
    if port == 0 {
        return Err(RpcError::PortResolution(anyhow!(
            "program {program} version {version} has no {protocol} port on {host}"
        )));
    }
    debug!(
        "Resolved program {} version {} on {} to {} port {}",
        program, version, host, protocol, port
    );
    Ok(port)
}

/// ONC/RPC client for one program version on one server.
pub struct RpcClient<T: Transport> {
    transport: T,
    program: u32,
    version: u32,
    auth: Arc<dyn Auth>,
    /// Last xid used. Seeded randomly so that clients do not collide.
    xid: u32,
    timeout: Duration,
    transmission_timeout: Duration,
    retransmission_timeout: Duration,
    retransmission_mode: RetransmissionMode,
    encoding: CharacterEncoding,
}

impl<T: Transport> RpcClient<T> {
    /// Creates a client on top of an already set up transport.
    pub fn new(
        transport: T,
        program: u32,
        version: u32,
        config: &ClientConfig,
    ) -> Result<Self, RpcError> {
        if config.transmission_timeout.is_zero() {
            return Err(RpcError::InvalidArgument("transmission timeout must be positive"));
        }
        if config.retransmission_timeout.is_zero() {
            return Err(RpcError::InvalidArgument("retransmission timeout must be positive"));
        }
        let mut client = Self {
            transport,
            program,
            version,
            auth: Arc::new(AuthNone),
            xid: rand::random(),
            timeout: config.timeout,
            transmission_timeout: config.transmission_timeout,
            retransmission_timeout: config.retransmission_timeout,
            retransmission_mode: config.retransmission_mode,
            encoding: config.character_encoding,
        };
        client.set_character_encoding(config.character_encoding);
        client.apply_timeouts()?;
        debug!(
            "Client for program {} version {} at {} over {}",
            program,
            version,
            client.peer(),
            client.protocol()
        );
        Ok(client)
    }

    pub fn program(&self) -> u32 {
        self.program
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn peer(&self) -> SocketAddr {
        self.transport.peer()
    }

    pub fn host(&self) -> IpAddr {
        self.transport.peer().ip()
    }

    pub fn port(&self) -> u16 {
        self.transport.peer().port()
    }

    pub fn protocol(&self) -> Protocol {
        self.transport.protocol()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn auth(&self) -> &Arc<dyn Auth> {
        &self.auth
    }

    pub fn set_auth(&mut self, auth: Arc<dyn Auth>) {
        self.auth = auth;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the overall call timeout. Zero makes every following call a
    /// batch call.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), RpcError> {
        self.timeout = timeout;
        self.apply_timeouts()
    }

    pub fn transmission_timeout(&self) -> Duration {
        self.transmission_timeout
    }

    /// Over TCP the effective value never exceeds the overall timeout.
    pub fn set_transmission_timeout(&mut self, timeout: Duration) -> Result<(), RpcError> {
        if timeout.is_zero() {
            return Err(RpcError::InvalidArgument("transmission timeout must be positive"));
        }
        self.transmission_timeout = timeout;
        self.apply_timeouts()
    }

    pub fn retransmission_timeout(&self) -> Duration {
        self.retransmission_timeout
    }

    /// Only used over UDP. Setting it to the overall timeout disables
    /// retransmission.
    pub fn set_retransmission_timeout(&mut self, timeout: Duration) -> Result<(), RpcError> {
        if timeout.is_zero() {
            return Err(RpcError::InvalidArgument("retransmission timeout must be positive"));
        }
        self.retransmission_timeout = timeout;
        Ok(())
    }

    pub fn retransmission_mode(&self) -> RetransmissionMode {
        self.retransmission_mode
    }

    pub fn set_retransmission_mode(&mut self, mode: RetransmissionMode) {
        self.retransmission_mode = mode;
    }

    pub fn character_encoding(&self) -> CharacterEncoding {
        self.encoding
    }

    /// Applies to strings in both directions.
    pub fn set_character_encoding(&mut self, encoding: CharacterEncoding) {
        self.encoding = encoding;
        self.transport.encoder().set_character_encoding(encoding);
        self.transport.decoder().set_character_encoding(encoding);
    }

    /// Releases the transport.
    pub fn close(mut self) -> Result<(), RpcError> {
        debug!("Closing client for program {} at {}", self.program, self.peer());
        self.transport.close().map_err(RpcError::CannotSend)
    }

    /// Calls `procedure` of the client's program version.
    pub fn call<P, R>(&mut self, procedure: u32, params: &P, result: &mut R) -> Result<(), RpcError>
    where
        P: Serialize + ?Sized,
        R: Deserialize + ?Sized,
    {
        self.call_version(procedure, self.version, params, result)
    }

    /// Calls `procedure` of an explicit program version, sharing the
    /// transport and xid sequence of this client.
    ///
    /// With a zero timeout the call is only sent: over TCP the record stays
    /// buffered until a later call flushes it, and `result` is left untouched.
    #[instrument(level = "debug", skip(self, params, result), fields(program = self.program))]
    pub fn call_version<P, R>(
        &mut self,
        procedure: u32,
        version: u32,
        params: &P,
        result: &mut R,
    ) -> Result<(), RpcError>
    where
        P: Serialize + ?Sized,
        R: Deserialize + ?Sized,
    {
        let mut refreshes_left = AUTH_REFRESHES;
        loop {
            let header =
                CallHeader { xid: self.next_xid(), program: self.program, version, procedure };
            match self.call_once(&header, params, result) {
                Err(RpcError::AuthRejected(stat))
                    if refreshes_left > 0 && self.auth.can_refresh() =>
                {
                    refreshes_left -= 1;
                    debug!("Call {} rejected with {:?}, refreshing credentials", header.xid, stat);
                    self.auth.refresh();
                }
                outcome => return outcome,
            }
        }
    }

    fn next_xid(&mut self) -> u32 {
        self.xid = self.xid.wrapping_add(1);
        self.xid
    }

    fn apply_timeouts(&mut self) -> Result<(), RpcError> {
        self.transport.set_batching(self.timeout.is_zero());
        let transmission_timeout = match self.transport.protocol() {
            Protocol::Tcp if !self.timeout.is_zero() => self.transmission_timeout.min(self.timeout),
            _ => self.transmission_timeout,
        };
        self.transport.set_transmission_timeout(transmission_timeout).map_err(RpcError::CannotSend)
    }

    /// One attempt with one xid, retransmissions included.
    fn call_once<P, R>(
        &mut self,
        header: &CallHeader,
        params: &P,
        result: &mut R,
    ) -> Result<(), RpcError>
    where
        P: Serialize + ?Sized,
        R: Deserialize + ?Sized,
    {
        let batch = self.timeout.is_zero();
        let retransmits = self.transport.protocol() == Protocol::Udp;
        let deadline = deadline_after(self.timeout);
        let mut resend = self.retransmission_timeout;
        loop {
            self.send(header, params, !batch)?;
            if batch {
                return Ok(());
            }
            let until = if retransmits { deadline.min(deadline_after(resend)) } else { deadline };
            match self.await_reply(header.xid, until, result) {
                Err(RpcError::Timeout) if retransmits && Instant::now() < deadline => {
                    if self.retransmission_mode == RetransmissionMode::Exponential {
                        resend = resend.saturating_mul(2);
                    }
                    debug!("Call {} unanswered, retransmitting", header.xid);
                }
                outcome => return outcome,
            }
        }
    }

    fn send<P>(&mut self, header: &CallHeader, params: &P, flush: bool) -> Result<(), RpcError>
    where
        P: Serialize + ?Sized,
    {
        let peer = self.transport.peer();
        let encoder = self.transport.encoder();
        let encoded = encode_call(&mut *encoder, peer, header, self.auth.as_ref(), params, flush);
        if encoded.is_err() {
            encoder.abort_encoding();
        }
        match encoded {
            Ok(()) => {
                trace!("Call {} procedure {} sent to {}", header.xid, header.procedure, peer);
                Ok(())
            }
            Err(XdrError::BufferOverflow) => match self.transport.batch_backlog() {
                Some((pending, capacity)) => Err(RpcError::Backpressure { pending, capacity }),
                None => Err(RpcError::BufferOverflow),
            },
            Err(e) => Err(RpcError::sending(e)),
        }
    }

    /// Receives records until the reply to `xid` arrives or `until` passes.
    fn await_reply<R>(&mut self, xid: u32, until: Instant, result: &mut R) -> Result<(), RpcError>
    where
        R: Deserialize + ?Sized,
    {
        let skips_wrong_messages = self.transport.protocol() == Protocol::Udp;
        loop {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RpcError::Timeout);
            }
            self.transport.set_receive_timeout(remaining).map_err(RpcError::CannotReceive)?;

            let decoder = self.transport.decoder();
            if let Err(e) = decoder.begin_decoding() {
                let _ = decoder.end_decoding();
                return Err(e.into());
            }
            let sender = decoder.sender();
            if !self.transport.accepts(sender) {
                trace!("Discarding record from unexpected sender {:?}", sender);
                let _ = self.transport.decoder().end_decoding();
                continue;
            }

            let decoder = self.transport.decoder();
            let outcome = match decode_reply_header(&mut *decoder, xid, self.auth.as_ref()) {
                Ok(ReplyMatch::Matched) => {
                    result.deserialize(&mut *decoder).map_err(RpcError::from)
                }
                Ok(ReplyMatch::Orphan(other)) => {
                    debug!("Discarding reply {} while waiting for {}", other, xid);
                    let _ = decoder.end_decoding();
                    continue;
                }
                Err(RpcError::WrongMessage(kind)) if skips_wrong_messages => {
                    warn!("Discarding message of type {} while waiting for {}", kind, xid);
                    let _ = decoder.end_decoding();
                    continue;
                }
                Err(e) => Err(e),
            };
            return match outcome {
                Ok(()) => decoder.end_decoding().map_err(RpcError::from),
                Err(e) => {
                    let _ = decoder.end_decoding();
                    Err(e)
                }
            };
        }
    }
}

impl RpcClient<UdpTransport> {
    /// Creates a UDP client. Without a port, `resolver` is asked for one.
    pub fn udp(
        host: IpAddr,
        program: u32,
        version: u32,
        port: Option<u16>,
        resolver: Option<&dyn PortResolver>,
        config: &ClientConfig,
    ) -> Result<Self, RpcError> {
        let port = resolve_port(host, program, version, port, Protocol::Udp, resolver)?;
        let transport = UdpTransport::bind(SocketAddr::new(host, port), config.buffer_size)
            .map_err(RpcError::CannotSend)?;
        Self::new(transport, program, version, config)
    }

    /// Sends one call to the client's address, usually a broadcast address,
    /// and collects replies until the timeout expires.
    ///
    /// `on_reply` runs once per responding address with the decoded result.
    /// Replies that fail to decode or report an error are logged and
    /// skipped. Running out of time is the normal end of a broadcast.
    #[instrument(level = "debug", skip(self, params, on_reply), fields(program = self.program))]
    pub fn broadcast_call<P, R, F>(
        &mut self,
        procedure: u32,
        params: &P,
        mut on_reply: F,
    ) -> Result<(), RpcError>
    where
        P: Serialize + ?Sized,
        R: Deserialize + Default,
        F: FnMut(SocketAddr, R),
    {
        let header = CallHeader {
            xid: self.next_xid(),
            program: self.program,
            version: self.version,
            procedure,
        };
        self.send(&header, params, true)?;
        if self.timeout.is_zero() {
            return Ok(());
        }

        let deadline = deadline_after(self.timeout);
        let mut responders = HashSet::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            self.transport.set_receive_timeout(remaining).map_err(RpcError::CannotReceive)?;

            let decoder = self.transport.decoder();
            if let Err(e) = decoder.begin_decoding() {
                let _ = decoder.end_decoding();
                return match RpcError::from(e) {
                    RpcError::Timeout => Ok(()),
                    e => Err(e),
                };
            }
            let Some(sender) = decoder.sender() else {
                let _ = decoder.end_decoding();
                continue;
            };
            let reply = match decode_reply_header(&mut *decoder, header.xid, self.auth.as_ref()) {
                Ok(ReplyMatch::Matched) => {
                    xdr::deserialize::<R>(&mut *decoder).map_err(RpcError::from)
                }
                Ok(ReplyMatch::Orphan(_)) | Err(RpcError::WrongMessage(_)) => {
                    let _ = decoder.end_decoding();
                    continue;
                }
                Err(e) => Err(e),
            };
            let _ = decoder.end_decoding();

            match reply {
                Ok(value) if responders.insert(sender) => {
                    debug!("Broadcast reply from {}", sender);
                    on_reply(sender, value);
                }
                Ok(_) => trace!("Duplicate broadcast reply from {}", sender),
                Err(e) => warn!("Ignoring broadcast reply from {}: {}", sender, e),
            }
        }
    }
}

impl RpcClient<TcpTransport> {
    /// Connects a TCP client. Without a port, `resolver` is asked for one.
    pub fn tcp(
        host: IpAddr,
        program: u32,
        version: u32,
        port: Option<u16>,
        resolver: Option<&dyn PortResolver>,
        config: &ClientConfig,
    ) -> Result<Self, RpcError> {
        let port = resolve_port(host, program, version, port, Protocol::Tcp, resolver)?;
        let transport = TcpTransport::connect(
            SocketAddr::new(host, port),
            config.buffer_size,
            config.connect_timeout,
            config.transmission_timeout,
        )
        .map_err(RpcError::CannotSend)?;
        Self::new(transport, program, version, config)
    }

    /// Queues a call without waiting for a reply. Queued records are written
    /// when `flush` is set, on [`RpcClient::flush_batch`], or by the next
    /// call that waits for a reply.
    ///
    /// A call that does not fit next to the queued records fails with
    /// [`RpcError::Backpressure`] and leaves the queue as it was.
    #[instrument(level = "debug", skip(self, params), fields(program = self.program))]
    pub fn batch_call<P>(&mut self, procedure: u32, params: &P, flush: bool) -> Result<(), RpcError>
    where
        P: Serialize + ?Sized,
    {
        let header = CallHeader {
            xid: self.next_xid(),
            program: self.program,
            version: self.version,
            procedure,
        };
        self.transport.set_batching(true);
        let sent = self.send(&header, params, flush);
        self.transport.set_batching(self.timeout.is_zero());
        sent
    }

    /// Writes all queued batch calls.
    pub fn flush_batch(&mut self) -> Result<(), RpcError> {
        self.transport.encoder().flush().map_err(RpcError::sending)
    }

    /// Bytes of queued batch calls.
    pub fn pending_batch_bytes(&self) -> usize {
        self.transport.pending_len()
    }
}

/// A client over either protocol, picked at run time.
pub enum AnyClient {
    Udp(RpcClient<UdpTransport>),
    Tcp(RpcClient<TcpTransport>),
}

impl AnyClient {
    /// Creates a client for `protocol`, which is `IPPROTO_UDP` or
    /// `IPPROTO_TCP`. Any other value fails with
    /// [`RpcError::UnknownProtocol`].
    pub fn connect(
        host: IpAddr,
        program: u32,
        version: u32,
        port: Option<u16>,
        protocol: u32,
        resolver: Option<&dyn PortResolver>,
        config: &ClientConfig,
    ) -> Result<Self, RpcError> {
        match Protocol::try_from(protocol)? {
            Protocol::Udp => {
                RpcClient::udp(host, program, version, port, resolver, config).map(AnyClient::Udp)
            }
            Protocol::Tcp => {
                RpcClient::tcp(host, program, version, port, resolver, config).map(AnyClient::Tcp)
            }
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            AnyClient::Udp(_) => Protocol::Udp,
            AnyClient::Tcp(_) => Protocol::Tcp,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        match self {
            AnyClient::Udp(client) => client.peer(),
            AnyClient::Tcp(client) => client.peer(),
        }
    }

    pub fn set_auth(&mut self, auth: Arc<dyn Auth>) {
        match self {
            AnyClient::Udp(client) => client.set_auth(auth),
            AnyClient::Tcp(client) => client.set_auth(auth),
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), RpcError> {
        match self {
            AnyClient::Udp(client) => client.set_timeout(timeout),
            AnyClient::Tcp(client) => client.set_timeout(timeout),
        }
    }

    pub fn call<P, R>(&mut self, procedure: u32, params: &P, result: &mut R) -> Result<(), RpcError>
    where
        P: Serialize + ?Sized,
        R: Deserialize + ?Sized,
    {
        match self {
            AnyClient::Udp(client) => client.call(procedure, params, result),
            AnyClient::Tcp(client) => client.call(procedure, params, result),
        }
    }

    pub fn close(self) -> Result<(), RpcError> {
        match self {
            AnyClient::Udp(client) => client.close(),
            AnyClient::Tcp(client) => client.close(),
        }
    }
}
