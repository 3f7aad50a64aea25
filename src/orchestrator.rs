//! Lifecycle orchestrator (C7): startup auto-connect, graceful shutdown,
//! and wiring the store, adapters, MQTT gateway, supervisor and polling
//! engine together.
//!
//! There are no process-wide singletons here: every collaborator is
//! constructed once, owned by the `Orchestrator`, and passed down explicitly
//! to the threads that need it.

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use crate::eip::EipAdapter;
use crate::error::{BridgeError, Result};
use crate::model::EipBackend;
use crate::mqtt::codec::InboundCommand;
use crate::mqtt::{CommandHandler, MqttGateway};
use crate::polling::PollingEngine;
use crate::snmp;
use crate::store::ConfigStore;
use crate::supervisor::{EndpointKey, EndpointKind, LivenessMap, Supervisor};

/// Ceiling the orchestrator waits for each loop thread to notice the stop
/// latch and exit during shutdown.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    store: Arc<dyn ConfigStore>,
    eip: Arc<EipAdapter>,
    mqtt: Arc<MqttGateway>,
    liveness: Arc<LivenessMap>,
    supervisor: Arc<Supervisor>,
    engine: Arc<PollingEngine>,
    supervisor_thread: std::sync::Mutex<Option<JoinHandle<()>>>,
    eip_thread: std::sync::Mutex<Option<JoinHandle<()>>>,
    snmp_thread: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ConfigStore>, eip_backend: EipBackend) -> Self {
        let eip = Arc::new(EipAdapter::new(eip_backend));
        let mqtt = Arc::new(MqttGateway::new());
        let liveness = Arc::new(LivenessMap::new());
        let supervisor = Arc::new(Supervisor::new(liveness.clone()));
        let engine = Arc::new(PollingEngine::new(store.clone(), eip.clone(), mqtt.clone(), liveness.clone()));
        Self {
            store,
            eip,
            mqtt,
            liveness,
            supervisor,
            engine,
            supervisor_thread: std::sync::Mutex::new(None),
            eip_thread: std::sync::Mutex::new(None),
            snmp_thread: std::sync::Mutex::new(None),
        }
    }

    fn command_handler(&self) -> CommandHandler {
        let store = self.store.clone();
        Arc::new(move |cmd: &InboundCommand, hwid_from_topic: Option<&str>| {
            dispatch_command(store.as_ref(), cmd, hwid_from_topic)
        })
    }

    /// Loads records from the store, connects every enabled EIP/SNMP/MQTT
    /// endpoint sequentially, starts command subscribers, then starts the
    /// supervisor and both polling loops.
    pub fn start(&self) {
        info!("fieldbridge starting up");
        self.connect_all();
        self.start_subscribers();

        let supervisor = self.supervisor.clone();
        let store = self.store.clone();
        let eip = self.eip.clone();
        let mqtt = self.mqtt.clone();
        let handler = self.command_handler();
        *self.supervisor_thread.lock().unwrap() = Some(thread::spawn(move || {
            supervisor.run(move |key| reconnect_endpoint(store.as_ref(), &eip, &mqtt, key, handler.clone()));
        }));

        let eip_engine = self.engine.clone();
        *self.eip_thread.lock().unwrap() = Some(thread::spawn(move || eip_engine.run_eip_loop()));

        let snmp_engine = self.engine.clone();
        *self.snmp_thread.lock().unwrap() = Some(thread::spawn(move || snmp_engine.run_snmp_loop()));

        info!("fieldbridge started: supervisor + EIP loop + SNMP loop running");
    }

    /// Signals the stop latch, joins the supervisor and both protocol loops
    /// (each bounded by `SHUTDOWN_JOIN_TIMEOUT`; the loops themselves shut
    /// down their worker pools before returning), then stops every
    /// persistent MQTT publisher and subscriber.
    pub fn shutdown(&self) {
        info!("fieldbridge shutting down");
        self.supervisor.stop_handle().store(true, Ordering::SeqCst);
        self.engine.stop_handle().store(true, Ordering::SeqCst);

        join_with_timeout(self.supervisor_thread.lock().unwrap().take(), "connection supervisor");
        join_with_timeout(self.eip_thread.lock().unwrap().take(), "EIP polling loop");
        join_with_timeout(self.snmp_thread.lock().unwrap().take(), "SNMP polling loop");

        self.mqtt.shutdown();
        info!("fieldbridge stopped");
    }

    fn connect_all(&self) {
        for device in self.store.list_enabled_eip().unwrap_or_default() {
            let key = EndpointKey { kind: EndpointKind::Eip, device_id: device.id };
            match self.eip.connect(&device) {
                Ok(()) => {
                    self.liveness.set(key, true, "connected");
                    info!("connected EIP device {}", device.identifier());
                }
                Err(e) => {
                    self.liveness.set(key, false, e.to_string());
                    warn!("failed to connect EIP device {}: {e}", device.identifier());
                }
            }
        }

        for device in self.store.list_enabled_snmp().unwrap_or_default() {
            let key = EndpointKey { kind: EndpointKind::Snmp, device_id: device.id };
            match snmp::connect(&device) {
                Ok(()) => {
                    self.liveness.set(key, true, "connected");
                    info!("connected SNMP device {}", device.identifier());
                }
                Err(e) => {
                    self.liveness.set(key, false, e.to_string());
                    warn!("failed to connect SNMP device {}: {e}", device.identifier());
                }
            }
        }

        for device in self.store.list_enabled_mqtt().unwrap_or_default() {
            let key = EndpointKey { kind: EndpointKind::Mqtt, device_id: device.id };
            match self.mqtt.connect_broker(&device) {
                Ok(true) => {
                    self.liveness.set(key, true, "connected");
                    info!("connected MQTT broker {}", device.broker);
                }
                Ok(false) => {
                    self.liveness.set(key, false, "CONNACK not received within timeout");
                    warn!("failed to connect MQTT broker {} within the CONNACK window", device.broker);
                }
                Err(e) => {
                    self.liveness.set(key, false, e.to_string());
                    warn!("failed to connect MQTT broker {}: {e}", device.broker);
                }
            }
        }
    }

    fn start_subscribers(&self) {
        let handler = self.command_handler();
        for device in self.store.list_enabled_mqtt().unwrap_or_default() {
            if device.subscribe_topic.is_some() {
                if let Err(e) = self.mqtt.start_subscriber(&device, handler.clone()) {
                    warn!("failed to start subscriber for MQTT broker {}: {e}", device.broker);
                }
            }
        }
    }
}

/// Joins `handle` from a detached watcher thread so the wait itself can be
/// bounded by `SHUTDOWN_JOIN_TIMEOUT` — `std::thread::JoinHandle` has no
/// native timed join.
fn join_with_timeout(handle: Option<JoinHandle<()>>, label: &str) {
    let Some(handle) = handle else { return };
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    if rx.recv_timeout(SHUTDOWN_JOIN_TIMEOUT).is_err() {
        warn!("{label} did not stop within {SHUTDOWN_JOIN_TIMEOUT:?}");
    }
}

/// The supervisor's per-key reconnect callback: dispatches to the right
/// adapter based on `key.kind`, and restarts the MQTT subscriber after a
/// successful broker reconnect.
fn reconnect_endpoint(
    store: &dyn ConfigStore,
    eip: &Arc<EipAdapter>,
    mqtt: &Arc<MqttGateway>,
    key: EndpointKey,
    handler: CommandHandler,
) -> Result<()> {
    match key.kind {
        EndpointKind::Eip => {
            let device = store.get_eip(key.device_id)?;
            eip.connect(&device)
        }
        EndpointKind::Snmp => {
            let device = store.get_snmp(key.device_id)?;
            snmp::connect(&device)
        }
        EndpointKind::Mqtt => {
            let device = store.get_mqtt(key.device_id)?;
            let connected = mqtt.connect_broker(&device)?;
            if !connected {
                return Err(BridgeError::EndpointDown(format!("MQTT broker {} still unreachable", device.broker)));
            }
            if device.subscribe_topic.is_some() {
                mqtt.restart_subscriber(&device, handler)?;
            }
            Ok(())
        }
    }
}

/// Routes an inbound MQTT command into a SNMP write: resolves the target
/// device by hwid (preferring the topic-derived hwid over the payload's
/// `device_id`), looks up the named object, checks write access, and
/// persists the written value.
///
/// An unknown hwid returns [`BridgeError::EndpointDown`], which the MQTT
/// gateway's dispatch loop treats as "drop with a warning" rather than a
/// reportable command failure: no SNMP write is ever attempted for it.
fn dispatch_command(store: &dyn ConfigStore, cmd: &InboundCommand, hwid_from_topic: Option<&str>) -> Result<()> {
    let target = hwid_from_topic.unwrap_or(&cmd.device_id);
    let device = store
        .list_enabled_snmp()?
        .into_iter()
        .find(|d| d.identifier() == target)
        .ok_or_else(|| BridgeError::EndpointDown(format!("no enabled SNMP device with hwid '{target}'")))?;

    let object = store.find_snmp_object_by_name(device.id, &cmd.parameter_name)?;
    let value = cmd.value_as_string();
    snmp::write_by_name(&device, &object, &value)?;
    store.update_object_reading(object.id, value, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceEip, SnmpAccess, SnmpVersion};
    use crate::store::InMemoryConfigStore;

    fn eip_device() -> DeviceEip {
        DeviceEip {
            id: 1,
            host: "mock-plc-1".into(),
            slot: 0,
            socket_timeout_secs: 2.0,
            polling_interval_ms: 100,
            name: Some("Line A".into()),
            hwid: Some("LINE_A".into()),
            description: None,
            enabled: true,
        }
    }

    /// Exercises the full startup/shutdown sequence against a mock-backed
    /// EIP device with no MQTT brokers configured (so no real network I/O
    /// happens), asserting it completes within the shutdown join ceiling.
    #[test]
    fn start_and_shutdown_completes_cleanly() {
        let store = Arc::new(InMemoryConfigStore::new());
        store.insert_eip(eip_device());
        store.insert_tag(crate::model::TagEip {
            id: 1,
            device_id: 1,
            tag_name: "Tank_Level".into(),
            data_type: "REAL".into(),
            poll_rate_ms: None,
            enabled: true,
            last_value: None,
            last_read: None,
        });

        let orchestrator = Orchestrator::new(store, EipBackend::Mock);
        orchestrator.start();
        thread::sleep(Duration::from_millis(200));
        orchestrator.shutdown();
    }

    #[test]
    fn dispatch_command_rejects_unknown_hwid() {
        let store = InMemoryConfigStore::new();
        let cmd = InboundCommand {
            device_id: "NO_SUCH_DEVICE".into(),
            parameter_name: "sysContact".into(),
            value: serde_json::Value::String("ops@x".into()),
            message_id: None,
        };
        let result = dispatch_command(&store, &cmd, None);
        assert!(matches!(result, Err(BridgeError::EndpointDown(_))));
    }

    #[test]
    fn dispatch_command_rejects_unwritable_object() {
        let store = InMemoryConfigStore::new();
        store.insert_snmp(crate::model::DeviceSnmp {
            id: 9,
            host: "10.0.0.9".into(),
            port: 161,
            community: "public".into(),
            version: SnmpVersion::V2c,
            polling_interval_ms: 1000,
            name: Some("SW01".into()),
            hwid: Some("SW01".into()),
            enabled: true,
        });
        store.insert_object(crate::model::ObjectSnmp {
            id: 1,
            device_id: 9,
            oid: "1.3.6.1.2.1.1.1.0".into(),
            name: "sysDescr".into(),
            description: None,
            mib_syntax: "OCTET STRING".into(),
            access: SnmpAccess::ReadOnly,
            status: "current".into(),
            enabled: true,
            last_value: None,
            last_read: None,
        });
        let cmd = InboundCommand {
            device_id: "SW01".into(),
            parameter_name: "sysDescr".into(),
            value: serde_json::Value::String("nope".into()),
            message_id: None,
        };
        let result = dispatch_command(&store, &cmd, None);
        assert!(matches!(result, Err(BridgeError::PermissionDenied(_))));
    }
}
