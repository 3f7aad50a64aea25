//! In-process EtherNet/IP simulator ("MOCK" backend).
//!
//! Grounded on the reference implementation's `ethernetip_simulator.py`: a
//! small table of typed tags (`BOOL`, `REAL`, `DINT`) whose values drift
//! periodically on a background thread, so the bridge can be exercised
//! end-to-end without real PLC hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::{BridgeError, Result};
use crate::model::{DeviceEip, TagEip};

use super::EipClient;

#[derive(Debug, Clone)]
enum MockValue {
    Bool(bool),
    Real(f64),
    Dint(i32),
}

impl MockValue {
    fn to_string_value(&self) -> String {
        match self {
            MockValue::Bool(b) => b.to_string(),
            MockValue::Real(r) => format!("{r:.3}"),
            MockValue::Dint(d) => d.to_string(),
        }
    }

    fn drift(&mut self, rng: &mut impl Rng) {
        match self {
            MockValue::Bool(b) => {
                if rng.random_bool(0.1) {
                    *b = !*b;
                }
            }
            MockValue::Real(r) => *r += rng.random_range(-0.5..0.5),
            MockValue::Dint(d) => *d += rng.random_range(-2..=2),
        }
    }
}

struct MockTagTable {
    values: HashMap<String, MockValue>,
}

impl MockTagTable {
    fn default_table() -> Self {
        let mut values = HashMap::new();
        values.insert("Pump_Running".to_string(), MockValue::Bool(true));
        values.insert("Tank_Level".to_string(), MockValue::Real(42.0));
        values.insert("Cycle_Count".to_string(), MockValue::Dint(0));
        Self { values }
    }
}

/// Simulates a tag table per device, with a background thread nudging
/// values every second, matching the drift loop in the reference simulator.
pub struct MockClient {
    devices: Mutex<HashMap<String, Arc<Mutex<MockTagTable>>>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self { devices: Mutex::new(HashMap::new()) }
    }

    fn table_for(&self, device: &DeviceEip) -> Arc<Mutex<MockTagTable>> {
        let mut devices = self.devices.lock().unwrap();
        devices
            .entry(device.host.clone())
            .or_insert_with(|| {
                let table = Arc::new(Mutex::new(MockTagTable::default_table()));
                spawn_drift_thread(table.clone());
                table
            })
            .clone()
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_drift_thread(table: Arc<Mutex<MockTagTable>>) {
    thread::spawn(move || {
        let mut rng = rand::rng();
        loop {
            thread::sleep(Duration::from_secs(1));
            let mut table = table.lock().unwrap();
            for value in table.values.values_mut() {
                value.drift(&mut rng);
            }
        }
    });
}

impl EipClient for MockClient {
    fn connect(&self, _device: &DeviceEip) -> Result<()> {
        Ok(())
    }

    fn discover_tags(&self, device: &DeviceEip) -> Result<Vec<String>> {
        let table = self.table_for(device);
        let table = table.lock().unwrap();
        Ok(table.values.keys().cloned().collect())
    }

    fn read_tag(&self, device: &DeviceEip, tag: &TagEip) -> Result<String> {
        let table = self.table_for(device);
        let table = table.lock().unwrap();
        table
            .values
            .get(&tag.tag_name)
            .map(MockValue::to_string_value)
            .ok_or_else(|| BridgeError::ProtocolError(format!("no such mock tag '{}'", tag.tag_name)))
    }

    fn write_tag(&self, device: &DeviceEip, tag: &TagEip, value: &str) -> Result<()> {
        let table = self.table_for(device);
        let mut table = table.lock().unwrap();
        let current = table
            .values
            .get(&tag.tag_name)
            .ok_or_else(|| BridgeError::ProtocolError(format!("no such mock tag '{}'", tag.tag_name)))?
            .clone();
        let new_value = match current {
            MockValue::Bool(_) => MockValue::Bool(value == "true" || value == "1"),
            MockValue::Real(_) => value
                .parse::<f64>()
                .map(MockValue::Real)
                .map_err(|_| BridgeError::TypeCoercion(format!("'{value}' is not a REAL")))?,
            MockValue::Dint(_) => value
                .parse::<i32>()
                .map(MockValue::Dint)
                .map_err(|_| BridgeError::TypeCoercion(format!("'{value}' is not a DINT")))?,
        };
        table.values.insert(tag.tag_name.clone(), new_value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceEip {
        DeviceEip {
            id: 1,
            host: "mock-plc-1".into(),
            slot: 0,
            socket_timeout_secs: 2.0,
            polling_interval_ms: 1000,
            name: None,
            hwid: None,
            description: None,
            enabled: true,
        }
    }

    fn tag(name: &str) -> TagEip {
        TagEip {
            id: 1,
            device_id: 1,
            tag_name: name.into(),
            data_type: "DINT".into(),
            poll_rate_ms: None,
            enabled: true,
            last_value: None,
            last_read: None,
        }
    }

    #[test]
    fn read_known_tag_succeeds() {
        let client = MockClient::new();
        let device = device();
        client.connect(&device).unwrap();
        let value = client.read_tag(&device, &tag("Cycle_Count")).unwrap();
        assert_eq!(value, "0");
    }

    #[test]
    fn write_then_read_round_trips() {
        let client = MockClient::new();
        let device = device();
        client.write_tag(&device, &tag("Cycle_Count"), "42").unwrap();
        let value = client.read_tag(&device, &tag("Cycle_Count")).unwrap();
        assert_eq!(value, "42");
    }

    #[test]
    fn unknown_tag_is_protocol_error() {
        let client = MockClient::new();
        let device = device();
        assert!(client.read_tag(&device, &tag("Nonexistent")).is_err());
    }
}
