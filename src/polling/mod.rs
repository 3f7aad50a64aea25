//! Polling engine (C6): two independent scheduler loops (EIP, SNMP), each
//! backed by a bounded worker pool, per-device rate gating, payload
//! aggregation and publish fan-out.
//!
//! Grounded on `examples/original_source/services/polling_service.py`'s
//! `_ethernetip_loop`/`_snmp_loop`/`_poll_single_*_device`/
//! `_publish_device_data` methods, carried over thread-for-thread: one
//! dedicated OS thread per protocol loop, one `ThreadPoolExecutor`-style
//! pool per protocol for per-device parallelism, sequential reads within a
//! device.

pub mod workerpool;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::eip::EipAdapter;
use crate::model::{DeviceId, Sample, SourceType};
use crate::mqtt::codec::{encode_payload, Readings};
use crate::mqtt::MqttGateway;
use crate::snmp;
use crate::store::ConfigStore;
use crate::supervisor::{sleep_in_ticks, EndpointKey, EndpointKind, LivenessMap};

use self::workerpool::WorkerPool;

/// `ThreadPoolExecutor(max_workers=5)` in the original.
const WORKER_POOL_SIZE: usize = 5;
/// Per-task outer ceiling a cycle waits for a device before logging it as
/// failed and moving on — the cycle itself is not blocked past this.
const TASK_TIMEOUT: Duration = Duration::from_secs(10);
/// Gap between successive cycles when there was work to do.
const CYCLE_GAP: Duration = Duration::from_millis(500);
/// Gap used when a protocol has no enabled devices at all, to avoid
/// busy-looping an empty cycle.
const IDLE_CYCLE_GAP: Duration = Duration::from_secs(5);
/// Throttle window for the per-device "polled" success log line.
const LOG_THROTTLE: Duration = Duration::from_secs(30);

/// Drives both protocol loops against a shared store, EIP/MQTT adapters and
/// liveness map. One `PollingEngine` is constructed per process and run
/// from two dedicated threads (see [`crate::orchestrator`]).
pub struct PollingEngine {
    store: Arc<dyn ConfigStore>,
    eip: Arc<EipAdapter>,
    mqtt: Arc<MqttGateway>,
    liveness: Arc<LivenessMap>,
    last_poll: Mutex<HashMap<EndpointKey, Instant>>,
    last_log: Mutex<HashMap<EndpointKey, Instant>>,
    stop: Arc<AtomicBool>,
}

impl PollingEngine {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        eip: Arc<EipAdapter>,
        mqtt: Arc<MqttGateway>,
        liveness: Arc<LivenessMap>,
    ) -> Self {
        Self {
            store,
            eip,
            mqtt,
            liveness,
            last_poll: Mutex::new(HashMap::new()),
            last_log: Mutex::new(HashMap::new()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// `_ethernetip_loop`: runs until `stop`, submitting one worker-pool job
    /// per enabled EIP device per cycle.
    pub fn run_eip_loop(self: Arc<Self>) {
        info!("EtherNet/IP polling thread started");
        let pool = WorkerPool::new(WORKER_POOL_SIZE, "EIP-Worker");

        while !self.stop.load(Ordering::SeqCst) {
            let devices = match self.store.list_enabled_eip() {
                Ok(devices) => devices,
                Err(e) => {
                    error!("error listing enabled EIP devices: {e}");
                    sleep_in_ticks(IDLE_CYCLE_GAP, &self.stop);
                    continue;
                }
            };

            if devices.is_empty() {
                sleep_in_ticks(IDLE_CYCLE_GAP, &self.stop);
                continue;
            }

            let handles: Vec<_> = devices
                .iter()
                .map(|device| {
                    let engine = Arc::clone(&self);
                    let device_id = device.id;
                    pool.submit(move || engine.poll_single_eip_device(device_id))
                })
                .collect();

            for handle in handles {
                if !handle.wait(TASK_TIMEOUT) {
                    error!("EIP device polling exceeded the {TASK_TIMEOUT:?} task ceiling");
                }
            }

            sleep_in_ticks(CYCLE_GAP, &self.stop);
        }

        pool.shutdown();
        info!("EtherNet/IP polling thread stopped");
    }

    /// `_snmp_loop`: the SNMP-protocol twin of [`Self::run_eip_loop`].
    pub fn run_snmp_loop(self: Arc<Self>) {
        info!("SNMP polling thread started");
        let pool = WorkerPool::new(WORKER_POOL_SIZE, "SNMP-Worker");

        while !self.stop.load(Ordering::SeqCst) {
            let devices = match self.store.list_enabled_snmp() {
                Ok(devices) => devices,
                Err(e) => {
                    error!("error listing enabled SNMP devices: {e}");
                    sleep_in_ticks(IDLE_CYCLE_GAP, &self.stop);
                    continue;
                }
            };

            if devices.is_empty() {
                sleep_in_ticks(IDLE_CYCLE_GAP, &self.stop);
                continue;
            }

            let handles: Vec<_> = devices
                .iter()
                .map(|device| {
                    let engine = Arc::clone(&self);
                    let device_id = device.id;
                    pool.submit(move || engine.poll_single_snmp_device(device_id))
                })
                .collect();

            for handle in handles {
                if !handle.wait(TASK_TIMEOUT) {
                    error!("SNMP device polling exceeded the {TASK_TIMEOUT:?} task ceiling");
                }
            }

            sleep_in_ticks(CYCLE_GAP, &self.stop);
        }

        pool.shutdown();
        info!("SNMP polling thread stopped");
    }

    /// `_poll_single_ethernetip_device`: re-loads the device, checks
    /// liveness and rate-gating, reads every enabled tag sequentially, and
    /// fans the aggregated readings out to every connected MQTT broker.
    fn poll_single_eip_device(&self, device_id: DeviceId) {
        let device = match self.store.get_eip(device_id) {
            Ok(device) if device.enabled => device,
            Ok(_) => return,
            Err(e) => {
                error!("error polling EIP device {device_id}: {e}");
                return;
            }
        };

        let key = EndpointKey { kind: EndpointKind::Eip, device_id };
        if !self.liveness.is_connected(key) {
            return;
        }
        if !self.should_poll(key, device.polling_interval_ms) {
            return;
        }

        let tags = match self.store.list_tags(device.id, true) {
            Ok(tags) => tags,
            Err(e) => {
                error!("error listing tags for EIP device {device_id}: {e}");
                return;
            }
        };

        let mut readings = Vec::new();
        for tag in &tags {
            match self.eip.read_tag(&device, tag) {
                Ok(value) => {
                    let now = Utc::now();
                    if let Err(e) = self.store.update_tag_reading(tag.id, value.clone(), now) {
                        warn!("failed to persist reading for tag {}: {e}", tag.tag_name);
                    }
                    let sample = Sample {
                        source_type: SourceType::EthernetIp,
                        source_id: tag.id,
                        source_name: format!("{}/{}", device.name.as_deref().unwrap_or(&device.identifier()), tag.tag_name),
                        value: value.clone(),
                        timestamp: now,
                    };
                    if let Err(e) = self.store.append_sample(sample) {
                        warn!("failed to append sample for tag {}: {e}", tag.tag_name);
                    }
                    readings.push((tag.tag_name.clone(), value));
                }
                Err(e) => debug!("error reading EIP tag {}: {e}", tag.tag_name),
            }
        }

        if !readings.is_empty() {
            let should_log = self.should_log(key);
            if should_log {
                info!("polled {}: {} tags", device.name.as_deref().unwrap_or(&device.identifier()), readings.len());
            }
            self.publish_fan_out(&device.identifier(), &readings);
        }
    }

    /// `_poll_single_snmp_device`: the SNMP twin of
    /// [`Self::poll_single_eip_device`]. Aggregation key per object is its
    /// description, or its OID with dots replaced by underscores.
    fn poll_single_snmp_device(&self, device_id: DeviceId) {
        let device = match self.store.get_snmp(device_id) {
            Ok(device) if device.enabled => device,
            Ok(_) => return,
            Err(e) => {
                error!("error polling SNMP device {device_id}: {e}");
                return;
            }
        };

        let key = EndpointKey { kind: EndpointKind::Snmp, device_id };
        if !self.liveness.is_connected(key) {
            return;
        }
        if !self.should_poll(key, device.polling_interval_ms) {
            return;
        }

        let objects = match self.store.list_objects(device.id, true) {
            Ok(objects) => objects,
            Err(e) => {
                error!("error listing objects for SNMP device {device_id}: {e}");
                return;
            }
        };

        let mut readings = Vec::new();
        for object in &objects {
            match snmp::read_oid(&device, object) {
                Ok(value) => {
                    let now = Utc::now();
                    if let Err(e) = self.store.update_object_reading(object.id, value.clone(), now) {
                        warn!("failed to persist reading for OID {}: {e}", object.oid);
                    }
                    let sample = Sample {
                        source_type: SourceType::Snmp,
                        source_id: object.id,
                        source_name: format!("{}/{}", device.name.as_deref().unwrap_or(&device.identifier()), object.oid),
                        value: value.clone(),
                        timestamp: now,
                    };
                    if let Err(e) = self.store.append_sample(sample) {
                        warn!("failed to append sample for OID {}: {e}", object.oid);
                    }
                    readings.push((object.reading_key(), value));
                }
                Err(e) => debug!("error reading SNMP OID {}: {e}", object.oid),
            }
        }

        if !readings.is_empty() {
            let should_log = self.should_log(key);
            if should_log {
                info!("polled {}: {} objects", device.name.as_deref().unwrap_or(&device.identifier()), readings.len());
            }
            self.publish_fan_out(&device.identifier(), &readings);
        }
    }

    /// `_publish_device_data`: fans the aggregated readings for one device
    /// out to every enabled, connected MQTT broker with a non-empty
    /// `publish_topic`.
    fn publish_fan_out(&self, identifier: &str, readings: &[(String, String)]) {
        let brokers = match self.store.list_enabled_mqtt() {
            Ok(brokers) => brokers,
            Err(e) => {
                error!("error listing enabled MQTT brokers: {e}");
                return;
            }
        };

        for broker in brokers {
            if broker.publish_topic.is_empty() {
                continue;
            }
            let key = EndpointKey { kind: EndpointKind::Mqtt, device_id: broker.id };
            if !self.liveness.is_connected(key) {
                debug!("MQTT broker {} not connected, skipping publish", broker.broker);
                continue;
            }

            let topic = format!("{}/{identifier}", broker.publish_topic);
            let payload = encode_payload(
                broker.publish_format,
                &Readings { identifier: identifier.to_string(), values: readings.to_vec() },
            );

            match self.mqtt.publish(&broker, &topic, &payload) {
                Ok(()) => debug!("published {identifier} -> {} ({topic})", broker.broker),
                Err(e) => warn!("failed to publish {identifier} to {}: {e}", broker.broker),
            }
        }
    }

    /// Per-device rate gate: `now - lastPollTime[device] < pollingInterval`
    /// skips the cycle without stamping; otherwise stamps and proceeds.
    fn should_poll(&self, key: EndpointKey, interval_ms: u64) -> bool {
        let mut last_poll = self.last_poll.lock().unwrap();
        let now = Instant::now();
        if let Some(last) = last_poll.get(&key) {
            if now.duration_since(*last) < Duration::from_millis(interval_ms) {
                return false;
            }
        }
        last_poll.insert(key, now);
        true
    }

    /// Log throttling: one success line per key per [`LOG_THROTTLE`].
    fn should_log(&self, key: EndpointKey) -> bool {
        let mut last_log = self.last_log.lock().unwrap();
        let now = Instant::now();
        match last_log.get(&key) {
            Some(last) if now.duration_since(*last) < LOG_THROTTLE => false,
            _ => {
                last_log.insert(key, now);
                true
            }
        }
    }
}
