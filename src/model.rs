//! Device, data-point and sample records shared by every adapter.
//!
//! These mirror the fields the configuration store tracks for each device
//! and data point; they carry `serde` derives so a real store can
//! (de)serialize them directly, but persistence itself lives behind
//! [`crate::store::ConfigStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DeviceId = u32;

/// EtherNet/IP backend implementation selected at process startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EipBackend {
    Pylogix,
    Cpppo,
    Mock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpVersion {
    V1,
    V2c,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishFormat {
    Json,
    String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEip {
    pub id: DeviceId,
    pub host: String,
    pub slot: u16,
    pub socket_timeout_secs: f64,
    pub polling_interval_ms: u64,
    pub name: Option<String>,
    pub hwid: Option<String>,
    pub description: Option<String>,
    pub enabled: bool,
}

impl DeviceEip {
    /// The identifier that appears in MQTT topic tails and payload keys.
    pub fn identifier(&self) -> String {
        self.hwid.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnmp {
    pub id: DeviceId,
    pub host: String,
    pub port: u16,
    pub community: String,
    pub version: SnmpVersion,
    pub polling_interval_ms: u64,
    pub name: Option<String>,
    pub hwid: Option<String>,
    pub enabled: bool,
}

impl DeviceSnmp {
    pub fn identifier(&self) -> String {
        self.hwid.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMqtt {
    pub id: DeviceId,
    pub broker: String,
    pub port: u16,
    pub publish_topic: String,
    pub publish_format: PublishFormat,
    pub enabled: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub subscribe_topic: Option<String>,
    pub publish_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagEip {
    pub id: DeviceId,
    pub device_id: DeviceId,
    pub tag_name: String,
    pub data_type: String,
    pub poll_rate_ms: Option<u64>,
    pub enabled: bool,
    pub last_value: Option<String>,
    pub last_read: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpAccess {
    ReadOnly,
    ReadWrite,
    NotAccessible,
}

impl SnmpAccess {
    pub fn allows_write(&self) -> bool {
        matches!(self, SnmpAccess::ReadWrite)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSnmp {
    pub id: DeviceId,
    pub device_id: DeviceId,
    pub oid: String,
    pub name: String,
    pub description: Option<String>,
    pub mib_syntax: String,
    pub access: SnmpAccess,
    pub status: String,
    pub enabled: bool,
    pub last_value: Option<String>,
    pub last_read: Option<DateTime<Utc>>,
}

impl ObjectSnmp {
    /// The polling-engine aggregation key for this object's readings:
    /// its description if set, else its OID with dots replaced by
    /// underscores.
    pub fn reading_key(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => d.clone(),
            _ => self.oid.replace('.', "_"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    EthernetIp,
    Snmp,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::EthernetIp => "ethernetip",
            SourceType::Snmp => "snmp",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub source_type: SourceType,
    pub source_id: DeviceId,
    pub source_name: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_prefers_hwid() {
        let mut d = DeviceEip {
            id: 7,
            host: "10.0.0.1:44818".into(),
            slot: 0,
            socket_timeout_secs: 2.0,
            polling_interval_ms: 1000,
            name: None,
            hwid: None,
            description: None,
            enabled: true,
        };
        assert_eq!(d.identifier(), "7");
        d.hwid = Some("PLC-NORTH".into());
        assert_eq!(d.identifier(), "PLC-NORTH");
    }

    #[test]
    fn access_write_gate() {
        assert!(SnmpAccess::ReadWrite.allows_write());
        assert!(!SnmpAccess::ReadOnly.allows_write());
        assert!(!SnmpAccess::NotAccessible.allows_write());
    }
}
