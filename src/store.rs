//! Configuration store interface (C1).
//!
//! The real admin UI, its relational schema and its CRUD surface are out of
//! scope here; this module only expresses the typed read/update contract the
//! rest of the bridge relies on, plus an in-memory implementation used by
//! `main.rs`'s demo wiring and by the test suite.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::error::{BridgeError, Result};
use crate::model::{DeviceEip, DeviceId, DeviceMqtt, DeviceSnmp, ObjectSnmp, Sample, SourceType, TagEip};

pub trait ConfigStore: Send + Sync {
    fn list_enabled_eip(&self) -> Result<Vec<DeviceEip>>;
    fn list_enabled_snmp(&self) -> Result<Vec<DeviceSnmp>>;
    fn list_enabled_mqtt(&self) -> Result<Vec<DeviceMqtt>>;

    fn get_eip(&self, id: DeviceId) -> Result<DeviceEip>;
    fn get_snmp(&self, id: DeviceId) -> Result<DeviceSnmp>;
    fn get_mqtt(&self, id: DeviceId) -> Result<DeviceMqtt>;

    fn list_tags(&self, device_id: DeviceId, enabled_only: bool) -> Result<Vec<TagEip>>;
    fn list_objects(&self, device_id: DeviceId, enabled_only: bool) -> Result<Vec<ObjectSnmp>>;

    fn update_tag_reading(&self, tag_id: DeviceId, value: String, ts: DateTime<Utc>) -> Result<()>;
    fn update_object_reading(&self, object_id: DeviceId, value: String, ts: DateTime<Utc>) -> Result<()>;

    fn append_sample(&self, sample: Sample) -> Result<()>;

    fn find_snmp_object_by_name(&self, device_id: DeviceId, name: &str) -> Result<ObjectSnmp>;
}

/// Reference `ConfigStore` kept entirely in memory, guarded by `RwLock`s so
/// many concurrent readers (the two polling loops) never block each other
/// and the occasional writer (tag/object reading updates, sample appends)
/// is serialized.
#[derive(Default)]
pub struct InMemoryConfigStore {
    eip: RwLock<HashMap<DeviceId, DeviceEip>>,
    snmp: RwLock<HashMap<DeviceId, DeviceSnmp>>,
    mqtt: RwLock<HashMap<DeviceId, DeviceMqtt>>,
    tags: RwLock<HashMap<DeviceId, TagEip>>,
    objects: RwLock<HashMap<DeviceId, ObjectSnmp>>,
    samples: RwLock<Vec<Sample>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_eip(&self, device: DeviceEip) {
        self.eip.write().unwrap().insert(device.id, device);
    }

    pub fn insert_snmp(&self, device: DeviceSnmp) {
        self.snmp.write().unwrap().insert(device.id, device);
    }

    pub fn insert_mqtt(&self, device: DeviceMqtt) {
        self.mqtt.write().unwrap().insert(device.id, device);
    }

    pub fn insert_tag(&self, tag: TagEip) {
        self.tags.write().unwrap().insert(tag.id, tag);
    }

    pub fn insert_object(&self, object: ObjectSnmp) {
        self.objects.write().unwrap().insert(object.id, object);
    }

    /// Deletes samples older than `cutoff`, for the default 7-day retention
    /// policy.
    pub fn purge_samples_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut samples = self.samples.write().unwrap();
        let before = samples.len();
        samples.retain(|s| s.timestamp >= cutoff);
        before - samples.len()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.read().unwrap().clone()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn list_enabled_eip(&self) -> Result<Vec<DeviceEip>> {
        Ok(self.eip.read().unwrap().values().filter(|d| d.enabled).cloned().collect())
    }

    fn list_enabled_snmp(&self) -> Result<Vec<DeviceSnmp>> {
        Ok(self.snmp.read().unwrap().values().filter(|d| d.enabled).cloned().collect())
    }

    fn list_enabled_mqtt(&self) -> Result<Vec<DeviceMqtt>> {
        Ok(self.mqtt.read().unwrap().values().filter(|d| d.enabled).cloned().collect())
    }

    fn get_eip(&self, id: DeviceId) -> Result<DeviceEip> {
        self.eip
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| BridgeError::ConfigMissing(format!("eip device {id}")))
    }

    fn get_snmp(&self, id: DeviceId) -> Result<DeviceSnmp> {
        self.snmp
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| BridgeError::ConfigMissing(format!("snmp device {id}")))
    }

    fn get_mqtt(&self, id: DeviceId) -> Result<DeviceMqtt> {
        self.mqtt
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| BridgeError::ConfigMissing(format!("mqtt broker {id}")))
    }

    fn list_tags(&self, device_id: DeviceId, enabled_only: bool) -> Result<Vec<TagEip>> {
        Ok(self
            .tags
            .read()
            .unwrap()
            .values()
            .filter(|t| t.device_id == device_id && (!enabled_only || t.enabled))
            .cloned()
            .collect())
    }

    fn list_objects(&self, device_id: DeviceId, enabled_only: bool) -> Result<Vec<ObjectSnmp>> {
        Ok(self
            .objects
            .read()
            .unwrap()
            .values()
            .filter(|o| o.device_id == device_id && (!enabled_only || o.enabled))
            .cloned()
            .collect())
    }

    fn update_tag_reading(&self, tag_id: DeviceId, value: String, ts: DateTime<Utc>) -> Result<()> {
        let mut tags = self.tags.write().unwrap();
        let tag = tags
            .get_mut(&tag_id)
            .ok_or_else(|| BridgeError::ConfigMissing(format!("tag {tag_id}")))?;
        tag.last_value = Some(value);
        tag.last_read = Some(ts);
        Ok(())
    }

    fn update_object_reading(&self, object_id: DeviceId, value: String, ts: DateTime<Utc>) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        let object = objects
            .get_mut(&object_id)
            .ok_or_else(|| BridgeError::ConfigMissing(format!("object {object_id}")))?;
        object.last_value = Some(value);
        object.last_read = Some(ts);
        Ok(())
    }

    fn append_sample(&self, sample: Sample) -> Result<()> {
        self.samples.write().unwrap().push(sample);
        Ok(())
    }

    fn find_snmp_object_by_name(&self, device_id: DeviceId, name: &str) -> Result<ObjectSnmp> {
        self.objects
            .read()
            .unwrap()
            .values()
            .find(|o| o.device_id == device_id && o.name == name)
            .cloned()
            .ok_or_else(|| BridgeError::ConfigMissing(format!("snmp object '{name}' on device {device_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PublishFormat, SnmpAccess, SnmpVersion};

    fn sample_object() -> ObjectSnmp {
        ObjectSnmp {
            id: 1,
            device_id: 1,
            oid: "1.3.6.1.2.1.1.5.0".into(),
            name: "sysName".into(),
            description: None,
            mib_syntax: "OCTET STRING".into(),
            access: SnmpAccess::ReadWrite,
            status: "current".into(),
            enabled: true,
            last_value: None,
            last_read: None,
        }
    }

    #[test]
    fn find_by_name_round_trips() {
        let store = InMemoryConfigStore::new();
        store.insert_object(sample_object());
        let found = store.find_snmp_object_by_name(1, "sysName").unwrap();
        assert_eq!(found.oid, "1.3.6.1.2.1.1.5.0");
        assert!(store.find_snmp_object_by_name(1, "missing").is_err());
    }

    #[test]
    fn list_enabled_filters_disabled() {
        let store = InMemoryConfigStore::new();
        store.insert_mqtt(DeviceMqtt {
            id: 1,
            broker: "localhost".into(),
            port: 1883,
            publish_topic: "plant/a".into(),
            publish_format: PublishFormat::Json,
            enabled: true,
            username: None,
            password: None,
            use_tls: false,
            subscribe_topic: None,
            publish_interval_ms: None,
        });
        store.insert_mqtt(DeviceMqtt {
            id: 2,
            broker: "localhost".into(),
            port: 1883,
            publish_topic: "plant/b".into(),
            publish_format: PublishFormat::Json,
            enabled: false,
            username: None,
            password: None,
            use_tls: false,
            subscribe_topic: None,
            publish_interval_ms: None,
        });
        let enabled = store.list_enabled_mqtt().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, 1);
        let _ = SnmpVersion::V2c;
    }

    #[test]
    fn purge_removes_only_stale_samples() {
        let store = InMemoryConfigStore::new();
        let old = Utc::now() - chrono::Duration::days(10);
        let fresh = Utc::now();
        store
            .append_sample(Sample {
                source_type: SourceType::Snmp,
                source_id: 1,
                source_name: "a".into(),
                value: "1".into(),
                timestamp: old,
            })
            .unwrap();
        store
            .append_sample(Sample {
                source_type: SourceType::Snmp,
                source_id: 2,
                source_name: "b".into(),
                value: "2".into(),
                timestamp: fresh,
            })
            .unwrap();
        let cutoff = Utc::now() - chrono::Duration::days(7);
        let removed = store.purge_samples_older_than(cutoff);
        assert_eq!(removed, 1);
        assert_eq!(store.samples().len(), 1);
    }
}
