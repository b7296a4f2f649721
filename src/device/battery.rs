//! Virtual battery: up to six independent numeric channels.

use std::collections::HashMap;

use tracing::warn;

use crate::config::BatteryDescriptor;
use crate::payload::decode_numeric;

use super::{
    register_identity, PropertyStore, PropertyUpdate, Value, WriteEffect, WriteOutcome,
};

#[derive(Debug)]
pub struct Battery {
    descriptor: BatteryDescriptor,
    service: String,
    store: PropertyStore,
    topic_to_path: HashMap<String, String>,
}

impl Battery {
    pub fn new(descriptor: BatteryDescriptor) -> Self {
        let identity = &descriptor.identity;
        let service = format!("battery.virtual_{}", identity.serial);

        let mut store = PropertyStore::new();
        register_identity(
            &mut store,
            "Virtual battery",
            identity.device_instance,
            &identity.serial,
            &identity.custom_name,
        );
        store.register("/Soc", Value::Float(0.0), false);
        store.register("/Soh", Value::Float(100.0), false);
        store.register("/Capacity", Value::Float(descriptor.capacity_ah), true);
        store.register("/Dc/0/Current", Value::Float(0.0), false);
        store.register("/Dc/0/Power", Value::Float(0.0), false);
        store.register("/Dc/0/Temperature", Value::Float(25.0), false);
        store.register("/Dc/0/Voltage", Value::Float(0.0), false);
        store.register("/ErrorCode", Value::Int(0), false);

        let channels = [
            (&descriptor.current_topic, "/Dc/0/Current"),
            (&descriptor.power_topic, "/Dc/0/Power"),
            (&descriptor.temperature_topic, "/Dc/0/Temperature"),
            (&descriptor.voltage_topic, "/Dc/0/Voltage"),
            (&descriptor.soc_topic, "/Soc"),
            (&descriptor.soh_topic, "/Soh"),
        ];
        let mut topic_to_path = HashMap::new();
        for (topic, path) in channels {
            if let Some(topic) = topic {
                topic_to_path.insert(topic.clone(), path.to_string());
            }
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
                "Battery {}: payload {:?} on {} is not numeric",
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
        let section = format!("Virtual_Battery_{}", self.descriptor.identity.device_index);
        let key = match path {
            "/CustomName" => "CustomName",
            // Stored capacity is in amp-hours; the settings key says so.
            "/Capacity" => "CapacityAh",
            _ => return WriteOutcome::rejected(),
        };
        let mut outcome = WriteOutcome::accepted();
        outcome.effects.push(WriteEffect::Persist {
            section,
            key: key.to_string(),
            value: value.to_string(),
        });
        if self.store.set(path, value.clone()) {
            outcome.updates.push(PropertyUpdate::new(path, value.clone()));
        }
        outcome
    }
}
