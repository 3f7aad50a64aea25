//! MQTT gateway (C4): persistent per-broker publisher, per-broker
//! subscriber, and inbound command dispatch into SNMP writes.

pub mod codec;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};

use crate::error::{BridgeError, Result};
use crate::model::{DeviceId, DeviceMqtt};

use self::codec::{hwid_from_topic, ConfirmationMessage, ErrorMessage, InboundCommand};

const CONNACK_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNACK_TIMEOUT: Duration = Duration::from_secs(5);

/// A persistent publisher: the `rumqttc` client plus the background thread
/// driving its `Connection`. Dropping this stops the thread via
/// `client.disconnect()`.
struct Publisher {
    client: Client,
    thread: Option<JoinHandle<()>>,
}

impl Publisher {
    fn stop(mut self) {
        let _ = self.client.disconnect();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// A persistent subscriber, dispatching inbound commands through `on_command`.
struct Subscriber {
    client: Client,
    thread: Option<JoinHandle<()>>,
}

impl Subscriber {
    fn stop(mut self) {
        let _ = self.client.disconnect();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn mqtt_options(client_id: &str, device: &DeviceMqtt) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, device.broker.clone(), device.port);
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(user), Some(pass)) = (&device.username, &device.password) {
        options.set_credentials(user, pass);
    }
    options
}

/// Callback invoked for every inbound command, wired by the orchestrator to
/// the SNMP adapter's `writeByName`.
pub type CommandHandler = Arc<dyn Fn(&InboundCommand, Option<&str>) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct MqttGateway {
    publishers: Mutex<HashMap<DeviceId, Publisher>>,
    subscribers: Mutex<HashMap<DeviceId, Subscriber>>,
}

impl MqttGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocking test connect with a 5s success window. The client is always
    /// stopped/disconnected afterward, regardless of outcome; the liveness
    /// map is updated by the caller from the returned bool.
    pub fn connect_broker(&self, device: &DeviceMqtt) -> Result<bool> {
        let options = mqtt_options(&format!("fieldbridge-test-{}", device.id), device);
        let (client, mut connection) = Client::new(options, 10);
        let connected = Arc::new(AtomicBool::new(false));
        let connected_writer = connected.clone();

        let handle = std::thread::spawn(move || {
            for notification in connection.iter() {
                match notification {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected_writer.store(true, Ordering::SeqCst);
                    }
                    Err(_) => break,
                    _ => {}
                }
            }
        });

        let start = Instant::now();
        while !connected.load(Ordering::SeqCst) && start.elapsed() < CONNACK_TIMEOUT {
            std::thread::sleep(CONNACK_POLL_INTERVAL);
        }

        let result = connected.load(Ordering::SeqCst);
        let mut client = client;
        let _ = client.disconnect();
        let _ = handle.join();
        Ok(result)
    }

    /// Lazily creates the persistent publisher for `device` if needed, then
    /// publishes `payload` to `topic` without waiting for a PUBACK. On
    /// failure, evicts the publisher so the next call recreates it.
    pub fn publish(&self, device: &DeviceMqtt, topic: &str, payload: &str) -> Result<()> {
        let mut publishers = self.publishers.lock().unwrap();
        if !publishers.contains_key(&device.id) {
            let publisher = self.create_publisher(device)?;
            publishers.insert(device.id, publisher);
        }

        let publish_result = {
            let publisher = publishers.get_mut(&device.id).unwrap();
            publisher.client.publish(topic, QoS::AtMostOnce, false, payload.as_bytes())
        };

        if let Err(e) = publish_result {
            if let Some(publisher) = publishers.remove(&device.id) {
                publisher.stop();
            }
            return Err(BridgeError::EndpointDown(format!("publish to {} failed: {e}", device.broker)));
        }
        Ok(())
    }

    fn create_publisher(&self, device: &DeviceMqtt) -> Result<Publisher> {
        let options = mqtt_options(&format!("fieldbridge-pub-{}", device.id), device);
        let (client, mut connection) = Client::new(options, 10);
        let thread = std::thread::spawn(move || {
            for notification in connection.iter() {
                if notification.is_err() {
                    break;
                }
            }
        });
        info!("created persistent MQTT publisher for broker {}", device.broker);
        Ok(Publisher { client, thread: Some(thread) })
    }

    /// Starts the subscriber for `device` if `subscribe_topic` is set.
    /// Idempotent: a second call while already running is a no-op.
    pub fn start_subscriber(&self, device: &DeviceMqtt, on_command: CommandHandler) -> Result<()> {
        let Some(subscribe_topic) = device.subscribe_topic.clone() else { return Ok(()) };
        let mut subscribers = self.subscribers.lock().unwrap();
        if subscribers.contains_key(&device.id) {
            return Ok(());
        }

        let options = mqtt_options(&format!("fieldbridge-sub-{}", device.id), device);
        let (mut client, mut connection) = Client::new(options, 10);
        let wildcard = format!("{subscribe_topic}/#");
        client
            .subscribe(&wildcard, QoS::AtMostOnce)
            .map_err(|e| BridgeError::EndpointDown(format!("subscribe to {wildcard} failed: {e}")))?;

        let device = device.clone();
        let thread = std::thread::spawn(move || {
            for notification in connection.iter() {
                match notification {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        dispatch_inbound(&device, &publish.topic, &publish.payload, &on_command);
                    }
                    Err(e) => {
                        warn!("MQTT subscriber for {} disconnected: {e}", device.broker);
                        break;
                    }
                    _ => {}
                }
            }
        });

        subscribers.insert(device.id, Subscriber { client, thread: Some(thread) });
        Ok(())
    }

    /// Idempotent: stopping a subscriber that isn't running is a no-op.
    pub fn stop_subscriber(&self, device_id: DeviceId) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(subscriber) = subscribers.remove(&device_id) {
            subscriber.stop();
        }
    }

    pub fn restart_subscriber(&self, device: &DeviceMqtt, on_command: CommandHandler) -> Result<()> {
        self.stop_subscriber(device.id);
        self.start_subscriber(device, on_command)
    }

    pub fn is_publisher_connected(&self, device_id: DeviceId) -> bool {
        self.publishers.lock().unwrap().contains_key(&device_id)
    }

    pub fn shutdown(&self) {
        let mut publishers = self.publishers.lock().unwrap();
        for (_, publisher) in publishers.drain() {
            publisher.stop();
        }
        let mut subscribers = self.subscribers.lock().unwrap();
        for (_, subscriber) in subscribers.drain() {
            subscriber.stop();
        }
    }
}

fn dispatch_inbound(device: &DeviceMqtt, topic: &str, payload: &[u8], on_command: &CommandHandler) {
    let cmd = match InboundCommand::parse(payload) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!("dropping malformed inbound command on {topic}: {e}");
            return;
        }
    };

    let hwid_from_topic = device
        .subscribe_topic
        .as_deref()
        .and_then(|prefix| hwid_from_topic(topic, prefix));

    let result = on_command(&cmd, hwid_from_topic.as_deref());

    match result {
        Ok(()) => {
            debug!("applied inbound command for {} parameter {}", cmd.device_id, cmd.parameter_name);
            let confirmation = ConfirmationMessage::new(&cmd);
            publish_confirmation(device, &confirmation.to_json(), true);
        }
        // An unknown hwid/device_id is dropped with a warning, not routed
        // through the error-document flow: no SNMP write was even attempted,
        // so there is nothing to report as a failed command.
        Err(BridgeError::EndpointDown(reason)) => {
            warn!("dropping inbound command for unknown device '{}': {reason}", cmd.device_id);
        }
        Err(e) => {
            error!("inbound command for {} failed: {e}", cmd.device_id);
            let error_msg = ErrorMessage::new(&cmd, &e);
            publish_confirmation(device, &error_msg.to_json(), false);
        }
    }
}

/// Confirmation/error messages go out through a short-lived publish, since
/// the command dispatch thread doesn't own the broker's persistent
/// publisher client directly.
fn publish_confirmation(device: &DeviceMqtt, payload: &str, success: bool) {
    if device.publish_topic.is_empty() {
        return;
    }
    let suffix = if success { "confirmation" } else { "error" };
    let topic = format!("{}/{suffix}", device.publish_topic);
    let options = mqtt_options(&format!("fieldbridge-ack-{}-{}", device.id, suffix), device);
    let (mut client, mut connection) = Client::new(options, 10);
    let handle = std::thread::spawn(move || {
        for notification in connection.iter() {
            if notification.is_err() {
                break;
            }
        }
    });
    if let Err(e) = client.publish(&topic, QoS::AtMostOnce, false, payload.as_bytes()) {
        warn!("failed to publish {suffix} to {topic}: {e}");
    }
    let _ = client.disconnect();
    let _ = handle.join();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PublishFormat;

    fn device() -> DeviceMqtt {
        DeviceMqtt {
            id: 1,
            broker: "localhost".into(),
            port: 1883,
            publish_topic: "plant/a".into(),
            publish_format: PublishFormat::Json,
            enabled: true,
            username: None,
            password: None,
            use_tls: false,
            subscribe_topic: Some("cmd/plant-a".into()),
            publish_interval_ms: None,
        }
    }

    #[test]
    fn gateway_starts_with_no_publishers_or_subscribers() {
        let gateway = MqttGateway::new();
        assert!(!gateway.is_publisher_connected(1));
    }

    #[test]
    fn stop_subscriber_is_idempotent_when_not_running() {
        let gateway = MqttGateway::new();
        gateway.stop_subscriber(device().id);
        gateway.stop_subscriber(device().id);
    }
}
