//! `fieldbridge`: an industrial protocol bridge that polls EtherNet/IP and
//! SNMP field devices and publishes their readings to one or more MQTT
//! brokers, with a bidirectional command path back into SNMP writes.
//!
//! This crate is the runtime data plane only (C1–C7 in the design docs);
//! the admin UI, its relational schema and CRUD surface are external
//! collaborators reached only through the [`store::ConfigStore`] trait.

pub mod eip;
pub mod error;
pub mod model;
pub mod mqtt;
pub mod orchestrator;
pub mod polling;
pub mod snmp;
pub mod store;
pub mod supervisor;
