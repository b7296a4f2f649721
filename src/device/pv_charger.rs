//! PV charger: numeric channels plus two state channels that accept textual
//! states as a decode fallback.

use std::collections::HashMap;

use tracing::warn;

use crate::config::PvChargerDescriptor;
use crate::payload::{decode_numeric, round2};

use super::{
    register_identity, PropertyStore, PropertyUpdate, Value, WriteEffect, WriteOutcome,
};

/// Charger state words accepted when the payload is not numeric.
fn charger_state_code(text: &str) -> Option<i64> {
    match text.to_lowercase().as_str() {
        "off" => Some(0),
        "bulk" => Some(3),
        "absorption" => Some(4),
        "float" => Some(5),
        _ => None,
    }
}

fn load_state_code(text: &str) -> Option<i64> {
    match text.to_lowercase().as_str() {
        "off" => Some(0),
        "on" => Some(1),
        _ => None,
    }
}

#[derive(Debug)]
pub struct PvCharger {
    descriptor: PvChargerDescriptor,
    service: String,
    store: PropertyStore,
    topic_to_path: HashMap<String, String>,
}

impl PvCharger {
    pub fn new(descriptor: PvChargerDescriptor) -> Self {
        let identity = &descriptor.identity;
        let service = format!("solarcharger.virtual_{}", identity.serial);

        let mut store = PropertyStore::new();
        register_identity(
            &mut store,
            "Virtual MPPT",
            identity.device_instance,
            &identity.serial,
            &identity.custom_name,
        );
        store.register("/Dc/0/Current", Value::Float(0.0), false);
        store.register("/Dc/0/Voltage", Value::Float(0.0), false);
        store.register("/Link/ChargeVoltage", Value::Float(0.0), false);
        store.register("/Link/ChargeCurrent", Value::Float(0.0), false);
        store.register("/Load/State", Value::Int(0), false);
        store.register("/State", Value::Int(0), false);
        store.register("/Pv/V", Value::Float(0.0), false);
        store.register("/Yield/Power", Value::Float(0.0), false);
        store.register("/Yield/User", Value::Float(0.0), false);
        store.register("/Yield/System", Value::Float(0.0), false);

        let channels = [
            (&descriptor.battery_current_topic, "/Dc/0/Current"),
            (&descriptor.battery_voltage_topic, "/Dc/0/Voltage"),
            (&descriptor.max_charge_voltage_topic, "/Link/ChargeVoltage"),
            (&descriptor.max_charge_current_topic, "/Link/ChargeCurrent"),
            (&descriptor.load_state_topic, "/Load/State"),
            (&descriptor.charger_state_topic, "/State"),
            (&descriptor.pv_voltage_topic, "/Pv/V"),
            (&descriptor.pv_power_topic, "/Yield/Power"),
            (&descriptor.total_yield_topic, "/Yield/User"),
            (&descriptor.system_yield_topic, "/Yield/System"),
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
        let Some(path) = self.topic_to_path.get(topic).cloned() else {
            return Vec::new();
        };
        let numeric = decode_numeric(payload);
        let text = std::str::from_utf8(payload).map(str::trim).unwrap_or("");

        let value = match path.as_str() {
            "/State" => {
                let Some(code) = numeric
                    .map(|n| n.round() as i64)
                    .or_else(|| charger_state_code(text))
                else {
                    warn!(
                        "PV charger {}: payload {text:?} is neither numeric nor a charger state",
                        self.descriptor.identity.custom_name
                    );
                    return Vec::new();
                };
                Value::Int(code)
            }
            "/Load/State" => {
                let Some(code) = numeric
                    .map(|n| n.round() as i64)
                    .or_else(|| load_state_code(text))
                else {
                    warn!(
                        "PV charger {}: payload {text:?} is neither numeric nor a load state",
                        self.descriptor.identity.custom_name
                    );
                    return Vec::new();
                };
                Value::Int(code)
            }
            _ => {
                let Some(n) = numeric else {
                    warn!(
                        "PV charger {}: payload {text:?} on {topic} is not numeric",
                        self.descriptor.identity.custom_name
                    );
                    return Vec::new();
                };
                // Numeric channels are rounded before they are applied.
                Value::Float(round2(n))
            }
        };

        if self.store.set(&path, value.clone()) {
            vec![PropertyUpdate::new(path, value)]
        } else {
            Vec::new()
        }
    }

    pub fn on_property_write(&mut self, path: &str, value: &Value) -> WriteOutcome {
        if !self.store.is_writable(path) || path != "/CustomName" {
            return WriteOutcome::rejected();
        }
        let mut outcome = WriteOutcome::accepted();
        outcome.effects.push(WriteEffect::Persist {
            section: format!("Pv_Charger_{}", self.descriptor.identity.device_index),
            key: "CustomName".to_string(),
            value: value.to_string(),
        });
        if self.store.set(path, value.clone()) {
            outcome.updates.push(PropertyUpdate::new(path, value.clone()));
        }
        outcome
    }
}
