//! SNMP adapter (C3): connect, walk, read/write a scalar OID.
//!
//! Built on `snmp2`'s blocking `SyncSession`, community-based SNMPv1/v2c
//! only (v3 is explicitly deferred). Every operation opens its own session
//! and drops it before returning: no long-lived client is held across calls.

use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use snmp2::{SyncSession, Value};

use crate::error::{BridgeError, Result};
use crate::model::{DeviceId, DeviceSnmp, ObjectSnmp, SnmpAccess, SnmpVersion};

/// `SNMPv2-MIB::sysDescr.0`, used as the liveness probe in `connect`.
const SYS_DESCR_OID: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
const DEFAULT_BASE_OID: &[u32] = &[1, 3, 6, 1, 2, 1];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const CONNECT_RETRIES: usize = 1;

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const READ_RETRIES: usize = 1;

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_RETRIES: usize = 2;
const WRITE_OVERALL_CAP: Duration = Duration::from_secs(8);

const WALK_TIMEOUT: Duration = Duration::from_secs(5);
const WALK_RETRIES: usize = 2;
const WALK_OVERALL_CAP: Duration = Duration::from_secs(15);
const WALK_MAX_OBJECTS: usize = 100;

#[derive(Debug, Clone)]
pub struct DiscoveredObject {
    pub oid: String,
    pub name: String,
    pub value: String,
    pub data_type: String,
    pub description: String,
    pub access: String,
    pub status: String,
}

fn parse_oid(dotted: &str) -> Result<Vec<u32>> {
    dotted
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().map_err(|_| BridgeError::ConfigMissing(format!("invalid OID '{dotted}'"))))
        .collect()
}

fn oid_to_string(oid: &[u32]) -> String {
    oid.iter().map(u32::to_string).collect::<Vec<_>>().join(".")
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Integer(i) => i.to_string(),
        Value::OctetString(s) => String::from_utf8_lossy(s).to_string(),
        Value::Counter32(c) => c.to_string(),
        Value::Unsigned32(u) => u.to_string(),
        Value::Counter64(c) => c.to_string(),
        Value::Timeticks(t) => t.to_string(),
        Value::IpAddress(ip) => ip.iter().map(u8::to_string).collect::<Vec<_>>().join("."),
        Value::Null => String::new(),
        other => format!("{other:?}"),
    }
}

fn open_session(device: &DeviceSnmp, timeout: Duration, retries: usize) -> Result<SyncSession> {
    if matches!(device.version, SnmpVersion::V3) {
        return Err(BridgeError::UnsupportedOperation("SNMPv3 is not supported".into()));
    }
    let addr = format!("{}:{}", device.host, device.port)
        .to_socket_addrs()
        .map_err(BridgeError::TransientIo)?
        .next()
        .ok_or_else(|| BridgeError::ConfigMissing(format!("could not resolve host '{}'", device.host)))?;

    SyncSession::new(addr, device.community.as_bytes(), Some(timeout), retries)
        .map_err(|e| BridgeError::TransientIo(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

/// `connect`: probes `sysDescr.0` with a 2s timeout and 1 retry.
pub fn connect(device: &DeviceSnmp) -> Result<()> {
    let mut session = open_session(device, CONNECT_TIMEOUT, CONNECT_RETRIES)?;
    session
        .get(SYS_DESCR_OID)
        .map_err(|e| BridgeError::EndpointDown(format!("sysDescr probe failed: {e}")))?;
    Ok(())
}

/// `discoverObjects`: GET-NEXT walk starting at `base_oid`, stopping at the
/// first OID escaping the base subtree, a 100-entry cap, or a 15s hard cap
/// — whichever comes first. Returns whatever was collected before a cap
/// was hit.
pub fn discover_objects(device: &DeviceSnmp, base_oid: Option<&str>) -> Result<Vec<DiscoveredObject>> {
    let base: Vec<u32> = match base_oid {
        Some(s) => parse_oid(s)?,
        None => DEFAULT_BASE_OID.to_vec(),
    };
    let mut session = open_session(device, WALK_TIMEOUT, WALK_RETRIES)?;

    let start = Instant::now();
    let mut current = base.clone();
    let mut objects = Vec::new();

    while objects.len() < WALK_MAX_OBJECTS {
        if start.elapsed() >= WALK_OVERALL_CAP {
            break;
        }
        let response = match session.getnext(&current) {
            Ok(resp) => resp,
            Err(_) => break,
        };
        let Some((oid, value)) = response.varbinds.into_iter().next() else { break };
        let oid_vec: Vec<u32> = oid.into();
        if !oid_vec.starts_with(&base[..]) {
            break;
        }
        let oid_str = oid_to_string(&oid_vec);
        objects.push(DiscoveredObject {
            oid: oid_str.clone(),
            name: format!("OID_{}", oid_vec.last().copied().unwrap_or(0)),
            value: value_to_string(&value),
            data_type: format!("{value:?}").split('(').next().unwrap_or("UNKNOWN").to_string(),
            description: format!("SNMP OID: {oid_str}"),
            access: "read-only".to_string(),
            status: "current".to_string(),
        });
        current = oid_vec;
    }

    Ok(objects)
}

/// `readOID`: single GET with a 2s timeout, 1 retry.
pub fn read_oid(device: &DeviceSnmp, object: &ObjectSnmp) -> Result<String> {
    let oid = parse_oid(&object.oid)?;
    let mut session = open_session(device, READ_TIMEOUT, READ_RETRIES)?;
    let response = session
        .get(&oid)
        .map_err(|e| BridgeError::ProtocolError(format!("SNMP get failed for {}: {e}", object.oid)))?;
    let (_, value) = response
        .varbinds
        .into_iter()
        .next()
        .ok_or_else(|| BridgeError::ProtocolError("no value returned".into()))?;
    Ok(value_to_string(&value))
}

/// Owned intermediate produced by the type-coercion table, kept distinct
/// from `snmp2::Value` so the borrow backing an `OctetString`/`IpAddress`
/// payload outlives the `Value` built from it.
enum Coerced {
    Integer(i64),
    Bytes(Vec<u8>),
    Counter64(u64),
    Unsigned32(u32),
    IpAddress([u8; 4]),
}

fn coerce(data_type: &str, value: &str) -> Result<Coerced> {
    let normalized = data_type.to_uppercase();
    match normalized.as_str() {
        "INTEGER" | "INT" | "COUNTER32" | "GAUGE32" => value
            .parse::<i64>()
            .map(Coerced::Integer)
            .map_err(|_| BridgeError::TypeCoercion(format!("'{value}' is not valid for {data_type}"))),
        "STRING" | "OCTETSTRING" | "DISPLAYSTRING" => Ok(Coerced::Bytes(value.as_bytes().to_vec())),
        "COUNTER64" => value
            .parse::<u64>()
            .map(Coerced::Counter64)
            .map_err(|_| BridgeError::TypeCoercion(format!("'{value}' is not valid for COUNTER64"))),
        "UNSIGNED32" => value
            .parse::<u32>()
            .map(Coerced::Unsigned32)
            .map_err(|_| BridgeError::TypeCoercion(format!("'{value}' is not valid for UNSIGNED32"))),
        "IPADDRESS" => {
            let octets: Vec<u8> = value
                .split('.')
                .map(|p| {
                    p.parse::<u8>()
                        .map_err(|_| BridgeError::TypeCoercion(format!("'{value}' is not a valid IP address")))
                })
                .collect::<Result<_>>()?;
            let array: [u8; 4] = octets
                .try_into()
                .map_err(|_| BridgeError::TypeCoercion(format!("'{value}' is not a valid IPv4 address")))?;
            Ok(Coerced::IpAddress(array))
        }
        _ => Ok(Coerced::Bytes(value.as_bytes().to_vec())),
    }
}

impl Coerced {
    fn as_value(&self) -> Value<'_> {
        match self {
            Coerced::Integer(i) => Value::Integer(*i),
            Coerced::Bytes(b) => Value::OctetString(b),
            Coerced::Counter64(c) => Value::Counter64(*c),
            Coerced::Unsigned32(u) => Value::Unsigned32(*u),
            Coerced::IpAddress(ip) => Value::IpAddress(*ip),
        }
    }
}

/// `writeOID`: coerces the value, SETs with a 5s timeout / 2 retries bounded
/// by an 8s overall cap.
pub fn write_oid(device: &DeviceSnmp, oid: &str, value: &str, data_type: &str) -> Result<()> {
    let oid_vec = parse_oid(oid)?;
    let coerced = coerce(data_type, value)?;

    let start = Instant::now();
    let mut session = open_session(device, WRITE_TIMEOUT, WRITE_RETRIES)?;
    if start.elapsed() >= WRITE_OVERALL_CAP {
        return Err(BridgeError::EndpointDown("write exceeded overall time cap before send".into()));
    }
    session
        .set(&[(&oid_vec[..], coerced.as_value())])
        .map_err(|e| BridgeError::ProtocolError(format!("SNMP set failed for {oid}: {e}")))?;
    Ok(())
}

/// `writeByName`: looks up the object by (device, name), rejects if access
/// lacks write, otherwise delegates to `write_oid`.
pub fn write_by_name(device: &DeviceSnmp, object: &ObjectSnmp, value: &str) -> Result<()> {
    if !object.access.allows_write() {
        return Err(BridgeError::PermissionDenied(format!(
            "'{}' is read-only (access: {:?})",
            object.name, object.access
        )));
    }
    write_oid(device, &object.oid, value, &object.mib_syntax)
}

pub(crate) fn find_object<'a>(objects: &'a [ObjectSnmp], device_id: DeviceId, name: &str) -> Option<&'a ObjectSnmp> {
    objects.iter().find(|o| o.device_id == device_id && o.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("INTEGER", "42", 42; "integer")]
    #[test_case("INT", "-3", -3; "int alias")]
    #[test_case("COUNTER32", "7", 7; "counter32")]
    #[test_case("GAUGE32", "9000", 9000; "gauge32")]
    fn coerce_integer_family(data_type: &str, value: &str, expected: i64) {
        assert!(matches!(coerce(data_type, value).unwrap(), Coerced::Integer(n) if n == expected));
    }

    #[test]
    fn coerce_rejects_bad_integer() {
        assert!(coerce("INTEGER", "not-a-number").is_err());
    }

    #[test]
    fn coerce_unknown_defaults_to_octet_string() {
        assert!(matches!(coerce("WEIRD_TYPE", "hello"), Ok(Coerced::Bytes(_))));
    }

    #[test]
    fn coerce_ip_address() {
        let v = coerce("IPADDRESS", "192.168.1.1").unwrap();
        assert!(matches!(v, Coerced::IpAddress([192, 168, 1, 1])));
    }

    #[test]
    fn coerce_ip_address_rejects_garbage() {
        assert!(coerce("IPADDRESS", "not-an-ip").is_err());
    }

    #[test]
    fn oid_round_trip() {
        let oid = parse_oid("1.3.6.1.2.1.1.1.0").unwrap();
        assert_eq!(oid_to_string(&oid), "1.3.6.1.2.1.1.1.0");
    }

    #[test]
    fn find_object_matches_device_and_name() {
        let objects = vec![ObjectSnmp {
            id: 1,
            device_id: 9,
            oid: "1.3.6.1.2.1.1.5.0".into(),
            name: "sysName".into(),
            description: None,
            mib_syntax: "OCTET STRING".into(),
            access: SnmpAccess::ReadWrite,
            status: "current".into(),
            enabled: true,
            last_value: None,
            last_read: None,
        }];
        assert!(find_object(&objects, 9, "sysName").is_some());
        assert!(find_object(&objects, 1, "sysName").is_none());
    }
}
