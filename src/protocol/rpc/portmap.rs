//! Looking up the port of an RPC program.
//!
//! A client that is not given a port asks a [`PortResolver`] once, while it
//! is being created. [`PortmapResolver`] asks the portmapper of the target
//! host (PMAPPROC_GETPORT, RFC 1833); any closure with the right signature
//! works as well.

use std::net::IpAddr;

use anyhow::{bail, Context};
use tracing::debug;

use crate::protocol::rpc::{ClientConfig, Protocol, RpcClient};
use crate::protocol::xdr::portmap::{self, mapping, PMAPPROC_GETPORT};

pub trait PortResolver {
    /// Returns the port `program` `version` listens on over `protocol`.
    fn resolve(
        &self,
        host: IpAddr,
        program: u32,
        version: u32,
        protocol: Protocol,
    ) -> anyhow::Result<u16>;
}

impl<F> PortResolver for F
where
    F: Fn(IpAddr, u32, u32, Protocol) -> anyhow::Result<u16>,
{
    fn resolve(
        &self,
        host: IpAddr,
        program: u32,
        version: u32,
        protocol: Protocol,
    ) -> anyhow::Result<u16> {
        self(host, program, version, protocol)
    }
}

/// Resolves ports through the portmapper of the target host, over UDP.
#[derive(Clone, Debug)]
pub struct PortmapResolver {
    port: u16,
    config: ClientConfig,
}

impl Default for PortmapResolver {
    fn default() -> Self {
        Self { port: portmap::PMAP_PORT, config: ClientConfig::default() }
    }
}

impl PortmapResolver {
    /// Uses a portmapper on a non standard port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Settings of the client talking to the portmapper.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }
}

impl PortResolver for PortmapResolver {
    fn resolve(
        &self,
        host: IpAddr,
        program: u32,
        version: u32,
        protocol: Protocol,
    ) -> anyhow::Result<u16> {
        let port = Some(self.port);
        let mut client =
            RpcClient::udp(host, portmap::PROGRAM, portmap::VERSION, port, None, &self.config)
                .with_context(|| format!("cannot reach portmapper at {host}:{}", self.port))?;
        let query = mapping { prog: program, vers: version, prot: protocol as u32, port: 0 };
        let mut port = 0_u32;
        let answer = client
            .call(PMAPPROC_GETPORT, &query, &mut port)
            .with_context(|| format!("portmapper at {host} failed to look up program {program}"));
        let _ = client.close();
        answer?;

        debug!("Portmapper at {} maps {:?} to port {}", host, query, port);
        if port == 0 {
            bail!("program {program} version {version} is not registered for {protocol} on {host}");
        }
        u16::try_from(port).with_context(|| format!("portmapper returned invalid port {port}"))
    }
}
