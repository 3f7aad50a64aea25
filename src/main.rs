//! Binary entry point: reads the EIP backend selector from the CLI, wires an
//! in-memory demo `ConfigStore`, and runs the orchestrator until stopped.

use std::io::BufRead;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use log::info;

use fieldbridge::model::{DeviceEip, DeviceMqtt, DeviceSnmp, EipBackend, PublishFormat, SnmpVersion, TagEip};
use fieldbridge::orchestrator::Orchestrator;
use fieldbridge::store::InMemoryConfigStore;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Pylogix,
    Cpppo,
    Mock,
}

impl From<Backend> for EipBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Pylogix => EipBackend::Pylogix,
            Backend::Cpppo => EipBackend::Cpppo,
            Backend::Mock => EipBackend::Mock,
        }
    }
}

/// EtherNet/IP + SNMP to MQTT protocol bridge.
#[derive(Debug, Parser)]
#[command(name = "fieldbridge", version, about)]
struct Cli {
    /// CIP stack backend used by the EtherNet/IP adapter.
    #[arg(long, value_enum, default_value_t = Backend::Mock)]
    eip_backend: Backend,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("starting fieldbridge with EIP backend {:?}", cli.eip_backend);

    let store = Arc::new(demo_store());
    let orchestrator = Orchestrator::new(store, cli.eip_backend.into());
    orchestrator.start();

    info!("running — press Enter to shut down");
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);

    orchestrator.shutdown();
}

/// A small in-memory demo configuration: one EIP device with two tags. The
/// SNMP device and MQTT broker are wired but left disabled, since nothing is
/// listening on `127.0.0.1:161` or `localhost:1883` by default; enable them in a real
/// deployment once backed by a real agent/broker.
fn demo_store() -> InMemoryConfigStore {
    let store = InMemoryConfigStore::new();

    store.insert_eip(DeviceEip {
        id: 1,
        host: "plc-line-a".into(),
        slot: 0,
        socket_timeout_secs: 2.0,
        polling_interval_ms: 1000,
        name: Some("Line A".into()),
        hwid: Some("LINE_A".into()),
        description: Some("Demo EtherNet/IP line controller".into()),
        enabled: true,
    });
    store.insert_tag(TagEip {
        id: 1,
        device_id: 1,
        tag_name: "Tank_Level".into(),
        data_type: "REAL".into(),
        poll_rate_ms: None,
        enabled: true,
        last_value: None,
        last_read: None,
    });
    store.insert_tag(TagEip {
        id: 2,
        device_id: 1,
        tag_name: "Cycle_Count".into(),
        data_type: "DINT".into(),
        poll_rate_ms: None,
        enabled: true,
        last_value: None,
        last_read: None,
    });

    store.insert_snmp(DeviceSnmp {
        id: 1,
        host: "127.0.0.1".into(),
        port: 161,
        community: "public".into(),
        version: SnmpVersion::V2c,
        polling_interval_ms: 5000,
        name: Some("Switch 1".into()),
        hwid: Some("SW01".into()),
        enabled: false,
    });

    store.insert_mqtt(DeviceMqtt {
        id: 1,
        broker: "localhost".into(),
        port: 1883,
        publish_topic: "plant/eip".into(),
        publish_format: PublishFormat::Json,
        enabled: false,
        username: None,
        password: None,
        use_tls: false,
        subscribe_topic: Some("cmd".into()),
        publish_interval_ms: None,
    });

    store
}
