//! Home Assistant MQTT discovery
//!
//! Publishes one retained config document per sensor so Home Assistant can
//! auto-create entities from the shared state topic.

use serde_json::{json, Value};
use tracing::info;

use crate::config::{HomeAssistantConfig, MqttConfig};
use crate::error::Result;
use crate::mqtt::MqttPublisher;

struct SensorDef {
    name: &'static str,
    device_class: Option<&'static str>,
    value_template: &'static str,
    unit_of_measurement: Option<&'static str>,
    id_suffix: &'static str,
}

const SENSORS: &[SensorDef] = &[
    SensorDef {
        name: "Radiation CPM",
        device_class: Some("radiation"),
        value_template: "{{ value_json.cpm }}",
        unit_of_measurement: Some("CPM"),
        id_suffix: "cpm",
    },
    SensorDef {
        name: "Radiation µSv/h",
        device_class: Some("radiation"),
        value_template: "{{ value_json.uSv_h }}",
        unit_of_measurement: Some("µSv/h"),
        id_suffix: "usvh",
    },
    SensorDef {
        name: "GMC Battery Voltage",
        device_class: Some("voltage"),
        value_template: "{{ value_json.battery_voltage }}",
        unit_of_measurement: Some("V"),
        id_suffix: "voltage",
    },
    SensorDef {
        name: "GMC Battery Level",
        device_class: Some("battery"),
        value_template: "{{ value_json.battery_percent }}",
        unit_of_measurement: Some("%"),
        id_suffix: "battery",
    },
    SensorDef {
        name: "GMC Connection Status",
        device_class: None,
        value_template: "{{ value_json.connection_status }}",
        unit_of_measurement: None,
        id_suffix: "connection",
    },
];

/// Build the retained discovery documents, one (topic, payload) per sensor
pub fn discovery_documents(ha: &HomeAssistantConfig, mqtt: &MqttConfig) -> Vec<(String, Value)> {
    let device_info = json!({
        "identifiers": [ha.device_identifier],
        "name": ha.device_name,
        "model": ha.device_model,
        "manufacturer": ha.device_manufacturer,
    });

    SENSORS
        .iter()
        .map(|sensor| {
            let unique_id = format!("{}_{}", ha.device_identifier, sensor.id_suffix);
            let mut config = json!({
                "device": device_info,
                "availability_topic": mqtt.availability_topic,
                "state_topic": mqtt.state_topic(),
                "name": sensor.name,
                "value_template": sensor.value_template,
                "unique_id": unique_id,
            });
            if let Some(class) = sensor.device_class {
                config["device_class"] = json!(class);
            }
            if let Some(unit) = sensor.unit_of_measurement {
                config["unit_of_measurement"] = json!(unit);
            }
            let topic = format!("{}/sensor/{unique_id}/config", mqtt.discovery_prefix);
            (topic, config)
        })
        .collect()
}

/// Publish all discovery documents
pub async fn publish_discovery(
    publisher: &MqttPublisher,
    ha: &HomeAssistantConfig,
    mqtt: &MqttConfig,
) -> Result<()> {
    for (topic, payload) in discovery_documents(ha, mqtt) {
        publisher.publish_retained_json(&topic, &payload).await?;
    }
    info!("Published MQTT discovery configs");
    Ok(())
}
