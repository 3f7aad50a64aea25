//! Wire payload formatting for MQTT egress/ingress.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};
use crate::model::PublishFormat;

/// A single device's readings for one publish cycle, in insertion order
/// (insertion order is preserved by both the JSON map and the CSV join).
pub struct Readings {
    pub identifier: String,
    pub values: Vec<(String, String)>,
}

/// `YYYY-MM-DDThh:mm:ss.ffffff`: microsecond precision, no `Z` suffix.
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Renders a stringified reading as the JSON type it naturally parses as —
/// a number or a bool where possible, else a string — so a numeric read
/// like `"25.5"` serializes as `25.5`, not `"25.5"`.
fn reading_to_json_value(value: &str) -> Value {
    if let Ok(i) = value.parse::<i64>() {
        Value::from(i)
    } else if let Ok(f) = value.parse::<f64>() {
        serde_json::Number::from_f64(f).map(Value::Number).unwrap_or_else(|| Value::String(value.to_string()))
    } else if let Ok(b) = value.parse::<bool>() {
        Value::Bool(b)
    } else {
        Value::String(value.to_string())
    }
}

pub fn encode_payload(format: PublishFormat, readings: &Readings) -> String {
    match format {
        PublishFormat::Json => {
            let mut map = Map::new();
            map.insert("HWID".to_string(), Value::String(readings.identifier.clone()));
            for (key, value) in &readings.values {
                map.insert(key.clone(), reading_to_json_value(value));
            }
            map.insert("Timestamp".to_string(), Value::String(iso_timestamp()));
            Value::Object(map).to_string()
        }
        PublishFormat::String => {
            let values: Vec<&str> = readings.values.iter().map(|(_, v)| v.as_str()).collect();
            let mut parts = vec![readings.identifier.clone()];
            parts.extend(values.iter().map(|v| v.to_string()));
            parts.push(iso_timestamp());
            parts.join(",")
        }
    }
}

/// Inbound command payload delivered on a broker's subscribe topic.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundCommand {
    pub device_id: String,
    #[serde(rename = "Parameter_Name")]
    pub parameter_name: String,
    pub value: Value,
    pub message_id: Option<String>,
}

impl InboundCommand {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| BridgeError::CommandMalformed(format!("payload is not valid UTF-8: {e}")))?;
        serde_json::from_str(text).map_err(|e| BridgeError::CommandMalformed(format!("invalid command JSON: {e}")))
    }

    pub fn value_as_string(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfirmationMessage {
    pub device_id: String,
    #[serde(rename = "Parameter_Name")]
    pub parameter_name: String,
    pub status: &'static str,
    pub value: String,
    pub message_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub device_id: String,
    #[serde(rename = "Parameter_Name")]
    pub parameter_name: String,
    pub status: &'static str,
    pub error: String,
    pub message_id: Option<String>,
    pub timestamp: String,
}

impl ConfirmationMessage {
    pub fn new(cmd: &InboundCommand) -> Self {
        Self {
            device_id: cmd.device_id.clone(),
            parameter_name: cmd.parameter_name.clone(),
            status: "success",
            value: cmd.value_as_string(),
            message_id: cmd.message_id.clone(),
            timestamp: iso_timestamp(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl ErrorMessage {
    pub fn new(cmd: &InboundCommand, error: &BridgeError) -> Self {
        Self {
            device_id: cmd.device_id.clone(),
            parameter_name: cmd.parameter_name.clone(),
            status: "error",
            error: error.to_string(),
            message_id: cmd.message_id.clone(),
            timestamp: iso_timestamp(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Extracts the hwid from a topic of shape `"{subscribe_topic}/{hwid}"`, if
/// the topic has a trailing segment beyond the subscribed prefix.
pub fn hwid_from_topic(topic: &str, subscribe_topic: &str) -> Option<String> {
    let prefix = format!("{subscribe_topic}/");
    topic.strip_prefix(&prefix).filter(|tail| !tail.is_empty() && !tail.contains('/')).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_payload_has_hwid_and_timestamp() {
        let readings = Readings {
            identifier: "PLC-1".into(),
            values: vec![("Tank_Level".into(), "42.0".into())],
        };
        let payload = encode_payload(PublishFormat::Json, &readings);
        assert!(payload.contains("\"HWID\":\"PLC-1\""));
        assert!(payload.contains("\"Tank_Level\":42.0"));
        assert!(payload.contains("\"Timestamp\""));
    }

    #[test]
    fn json_payload_keeps_non_numeric_readings_quoted() {
        let readings = Readings {
            identifier: "PLC-1".into(),
            values: vec![("State".into(), "Running".into()), ("Alarm".into(), "true".into())],
        };
        let payload = encode_payload(PublishFormat::Json, &readings);
        assert!(payload.contains("\"State\":\"Running\""));
        assert!(payload.contains("\"Alarm\":true"));
    }

    #[test]
    fn string_payload_is_csv_with_trailing_timestamp() {
        let readings = Readings {
            identifier: "7".into(),
            values: vec![("a".into(), "1".into()), ("b".into(), "2".into())],
        };
        let payload = encode_payload(PublishFormat::String, &readings);
        let parts: Vec<&str> = payload.split(',').collect();
        assert_eq!(parts[0], "7");
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2], "2");
        assert_eq!(parts.len(), 4);
    }

    #[test]
    fn inbound_command_parses_required_fields() {
        let raw = br#"{"device_id":"PLC-1","Parameter_Name":"sysName","value":"42"}"#;
        let cmd = InboundCommand::parse(raw).unwrap();
        assert_eq!(cmd.device_id, "PLC-1");
        assert_eq!(cmd.parameter_name, "sysName");
        assert_eq!(cmd.value_as_string(), "42");
        assert!(cmd.message_id.is_none());
    }

    #[test]
    fn inbound_command_rejects_malformed_json() {
        assert!(InboundCommand::parse(b"not json").is_err());
    }

    #[test]
    fn hwid_extracted_from_trailing_topic_segment() {
        assert_eq!(hwid_from_topic("cmd/plant-a/PLC-1", "cmd/plant-a"), Some("PLC-1".to_string()));
        assert_eq!(hwid_from_topic("cmd/plant-a", "cmd/plant-a"), None);
        assert_eq!(hwid_from_topic("cmd/plant-a/PLC-1/extra", "cmd/plant-a"), None);
    }
}
