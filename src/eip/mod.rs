//! EtherNet/IP adapter (C2): connect, discover tags, read/write a tag.
//!
//! The actual CIP stack is pluggable, selected once at process startup,
//! behind the [`EipClient`] trait. Three backends exist: [`cpppo`], a
//! hand-coded EtherNet/IP encapsulation client; [`pylogix`], a second,
//! independent CIP session type layered on the same transport; and [`mock`],
//! an in-process simulator for development and tests.

pub mod cpppo;
pub mod mock;
pub mod pylogix;

use crate::error::{BridgeError, Result};
use crate::model::{DeviceEip, EipBackend, TagEip};

/// Capability object every EIP backend implements. Every operation opens a
/// scoped session and releases it on all exit paths — no backend holds a
/// long-lived client across calls.
pub trait EipClient: Send + Sync {
    fn connect(&self, device: &DeviceEip) -> Result<()>;

    /// May fail with [`BridgeError::UnsupportedOperation`] on controllers or
    /// slots that don't support online tag listing.
    fn discover_tags(&self, device: &DeviceEip) -> Result<Vec<String>>;

    fn read_tag(&self, device: &DeviceEip, tag: &TagEip) -> Result<String>;

    fn write_tag(&self, device: &DeviceEip, tag: &TagEip, value: &str) -> Result<()>;
}

/// Builds the `EipClient` for a process-wide backend selection.
pub fn build_client(backend: EipBackend) -> Box<dyn EipClient> {
    match backend {
        EipBackend::Cpppo => Box::new(cpppo::CpppoClient::new()),
        EipBackend::Pylogix => Box::new(pylogix::PylogixClient::new()),
        EipBackend::Mock => Box::new(mock::MockClient::new()),
    }
}

/// Wraps a selected backend and exposes connect/discover/read/write against
/// it without callers needing to know which CIP stack is underneath.
pub struct EipAdapter {
    client: Box<dyn EipClient>,
}

impl EipAdapter {
    pub fn new(backend: EipBackend) -> Self {
        Self { client: build_client(backend) }
    }

    pub fn with_client(client: Box<dyn EipClient>) -> Self {
        Self { client }
    }

    pub fn connect(&self, device: &DeviceEip) -> Result<()> {
        self.client.connect(device)
    }

    pub fn discover_tags(&self, device: &DeviceEip) -> Result<Vec<String>> {
        self.client.discover_tags(device)
    }

    pub fn read_tag(&self, device: &DeviceEip, tag: &TagEip) -> Result<String> {
        self.client.read_tag(device, tag)
    }

    pub fn write_tag(&self, device: &DeviceEip, tag: &TagEip, value: &str) -> Result<()> {
        self.client.write_tag(device, tag, value)
    }
}

/// Parses `"host:port"` into its parts, defaulting the port to the
/// EtherNet/IP well-known port 44818 when absent.
pub(crate) fn parse_host_port(host: &str) -> Result<(String, u16)> {
    match host.split_once(':') {
        Some((h, p)) => {
            let port: u16 = p
                .parse()
                .map_err(|_| BridgeError::ConfigMissing(format!("invalid EIP port in '{host}'")))?;
            Ok((h.to_string(), port))
        }
        None => Ok((host.to_string(), 44818)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_port() {
        assert_eq!(parse_host_port("10.0.0.5:44818").unwrap(), ("10.0.0.5".to_string(), 44818));
    }

    #[test]
    fn defaults_port_when_absent() {
        assert_eq!(parse_host_port("10.0.0.5").unwrap(), ("10.0.0.5".to_string(), 44818));
    }
}
