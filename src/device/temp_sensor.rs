//! Temperature sensor with optional humidity and battery-voltage channels.

use std::collections::HashMap;

use tracing::warn;

use crate::config::TempSensorDescriptor;
use crate::payload::decode_numeric;

use super::{
    register_identity, PropertyStore, PropertyUpdate, Value, WriteEffect, WriteOutcome,
};

/// Temperature type names in code order.
const TEMPERATURE_TYPES: [&str; 7] = [
    "battery",
    "fridge",
    "generic",
    "room",
    "outdoor",
    "water heater",
    "freezer",
];

pub fn temperature_type_code(name: &str) -> i64 {
    let lowered = name.to_lowercase();
    TEMPERATURE_TYPES
        .iter()
        .position(|t| *t == lowered)
        .unwrap_or(2) as i64 // generic
}

pub fn temperature_type_name(code: i64) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|i| TEMPERATURE_TYPES.get(i).copied())
        .unwrap_or("generic")
}

#[derive(Debug)]
pub struct TempSensor {
    descriptor: TempSensorDescriptor,
    service: String,
    store: PropertyStore,
    topic_to_path: HashMap<String, String>,
}

impl TempSensor {
    pub fn new(descriptor: TempSensorDescriptor) -> Self {
        let identity = &descriptor.identity;
        let service = format!("temperature.virtual_{}", identity.serial);

        let mut store = PropertyStore::new();
        register_identity(
            &mut store,
            "Virtual temperature",
            identity.device_instance,
            &identity.serial,
            &identity.custom_name,
        );
        store.register("/Status", Value::Int(0), false);
        store.register("/Temperature", Value::Float(0.0), false);
        store.register(
            "/TemperatureType",
            Value::Int(temperature_type_code(&descriptor.sensor_type)),
            true,
        );

        let mut topic_to_path = HashMap::new();
        if let Some(topic) = &descriptor.temperature_topic {
            topic_to_path.insert(topic.clone(), "/Temperature".to_string());
        }
        // Humidity and battery channels exist only when their topic does.
        if let Some(topic) = &descriptor.humidity_topic {
            store.register("/Humidity", Value::Float(0.0), false);
            topic_to_path.insert(topic.clone(), "/Humidity".to_string());
        }
        if let Some(topic) = &descriptor.battery_topic {
            store.register("/BatteryVoltage", Value::Float(0.0), false);
            topic_to_path.insert(topic.clone(), "/BatteryVoltage".to_string());
        }

        Self {
            descriptor,
            service,
            store,
            topic_to_path,
        }
    }

    pub fn serial(&self) -> &str {
        &self.descriptor.identity.serial
    }

    pub fn service_id(&self) -> &str {
        &self.service
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.store
    }

    pub fn subscription_topics(&self) -> Vec<&str> {
        self.topic_to_path.keys().map(String::as_str).collect()
    }

    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Vec<PropertyUpdate> {
        let Some(path) = self.topic_to_path.get(topic) else {
            return Vec::new();
        };
        let Some(value) = decode_numeric(payload) else {
            warn!(
                "Temp sensor {}: payload {:?} on {} is not numeric",
                self.descriptor.identity.custom_name,
                String::from_utf8_lossy(payload),
                topic,
            );
            return Vec::new();
        };
        if self.store.set(path, Value::Float(value)) {
            vec![PropertyUpdate::new(path.clone(), Value::Float(value))]
        } else {
            Vec::new()
        }
    }

    pub fn on_property_write(&mut self, path: &str, value: &Value) -> WriteOutcome {
        if !self.store.is_writable(path) {
            return WriteOutcome::rejected();
        }
        let section = format!("Temp_Sensor_{}", self.descriptor.identity.device_index);
        let (key, persisted_value) = match path {
            "/CustomName" => ("CustomName", value.to_string()),
            "/TemperatureType" => (
                "Type",
                value
                    .as_i64()
                    .map(temperature_type_name)
                    .unwrap_or("generic")
                    .to_string(),
            ),
            _ => return WriteOutcome::rejected(),
        };

        let mut outcome = WriteOutcome::accepted();
        outcome.effects.push(WriteEffect::Persist {
            section,
            key: key.to_string(),
            value: persisted_value,
        });
        if self.store.set(path, value.clone()) {
            outcome.updates.push(PropertyUpdate::new(path, value.clone()));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceIdentity;

    fn sensor(humidity: bool) -> TempSensor {
        TempSensor::new(TempSensorDescriptor {
            identity: DeviceIdentity {
                device_index: 1,
                device_instance: 25,
                custom_name: "Cabin".into(),
                serial: "7777888899990000".into(),
            },
            sensor_type: "room".into(),
            temperature_topic: Some("cabin/temp".into()),
            humidity_topic: humidity.then(|| "cabin/humidity".to_string()),
            battery_topic: None,
        })
    }

    #[test]
    fn channels_update_independently() {
        let mut s = sensor(true);
        assert_eq!(
            s.on_message("cabin/temp", b"21.5"),
            vec![PropertyUpdate::new("/Temperature", Value::Float(21.5))]
        );
        assert_eq!(
            s.on_message("cabin/humidity", br#"{"value": 55}"#),
            vec![PropertyUpdate::new("/Humidity", Value::Float(55.0))]
        );
    }

    #[test]
    fn absent_channel_is_not_registered() {
        let s = sensor(false);
        assert!(!s.properties().contains("/Humidity"));
        assert!(!s.properties().contains("/BatteryVoltage"));
        assert_eq!(s.subscription_topics(), vec!["cabin/temp"]);
    }

    #[test]
    fn non_numeric_payload_is_discarded() {
        let mut s = sensor(false);
        assert!(s.on_message("cabin/temp", b"warm").is_empty());
        assert_eq!(s.properties().get("/Temperature"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn unchanged_value_is_not_re_emitted() {
        let mut s = sensor(false);
        assert_eq!(s.on_message("cabin/temp", b"21.5").len(), 1);
        assert!(s.on_message("cabin/temp", b"21.5").is_empty());
    }

    #[test]
    fn temperature_type_persists_as_text() {
        let mut s = sensor(false);
        let outcome = s.on_property_write("/TemperatureType", &Value::Int(4));
        assert!(outcome.accepted);
        assert_eq!(
            outcome.effects,
            vec![WriteEffect::Persist {
                section: "Temp_Sensor_1".into(),
                key: "Type".into(),
                value: "outdoor".into(),
            }]
        );
    }

    #[test]
    fn temperature_is_not_externally_writable() {
        let mut s = sensor(false);
        assert!(!s.on_property_write("/Temperature", &Value::Float(1.0)).accepted);
    }
}
