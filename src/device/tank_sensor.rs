//! Tank sensor: level either derived from a raw reading via calibration or
//! accepted directly, with the remaining volume recomputed from capacity.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::TankSensorDescriptor;
use crate::payload::{decode_numeric, round2};

use super::{
    register_identity, PropertyStore, PropertyUpdate, Value, WriteEffect, WriteOutcome,
};

/// Fluid type names in code order.
const FLUID_TYPES: [&str; 12] = [
    "fuel",
    "fresh water",
    "waste water",
    "live well",
    "oil",
    "black water",
    "gasoline",
    "diesel",
    "lpg",
    "lng",
    "hydraulic oil",
    "raw water",
];

pub fn fluid_type_code(name: &str) -> i64 {
    let lowered = name.to_lowercase();
    FLUID_TYPES
        .iter()
        .position(|t| *t == lowered)
        .unwrap_or(1) as i64 // fresh water
}

pub fn fluid_type_name(code: i64) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|i| FLUID_TYPES.get(i).copied())
        .unwrap_or("fresh water")
}

#[derive(Debug)]
pub struct TankSensor {
    descriptor: TankSensorDescriptor,
    service: String,
    store: PropertyStore,
    topic_to_path: HashMap<String, String>,
    /// True when the level arrives directly on the wire; false when it is
    /// derived from the raw reading. Fixed at construction: a configured
    /// raw-value topic takes priority over a direct-level topic.
    level_direct: bool,
}

impl TankSensor {
    pub fn new(descriptor: TankSensorDescriptor) -> Self {
        let identity = &descriptor.identity;
        let service = format!("tank.virtual_{}", identity.serial);

        let mut store = PropertyStore::new();
        register_identity(
            &mut store,
            "Virtual tank",
            identity.device_instance,
            &identity.serial,
            &identity.custom_name,
        );
        store.register("/Status", Value::Int(0), false);
        store.register("/Capacity", Value::Float(descriptor.capacity), true);
        store.register(
            "/FluidType",
            Value::Int(fluid_type_code(&descriptor.fluid_type)),
            true,
        );
        store.register("/Level", Value::Float(0.0), false);
        store.register("/Remaining", Value::Float(0.0), false);
        store.register("/RawValue", Value::Float(0.0), false);
        store.register("/RawValueEmpty", Value::Float(descriptor.raw_value_empty), true);
        store.register("/RawValueFull", Value::Float(descriptor.raw_value_full), true);
        store.register("/RawUnit", Value::Text(descriptor.raw_unit.clone()), false);
        store.register("/Shape", Value::Int(0), false);

        let mut topic_to_path = HashMap::new();
        let mut level_direct = false;
        if let Some(topic) = &descriptor.raw_value_topic {
            topic_to_path.insert(topic.clone(), "/RawValue".to_string());
        } else if let Some(topic) = &descriptor.level_topic {
            level_direct = true;
            topic_to_path.insert(topic.clone(), "/Level".to_string());
        } else {
            warn!(
                "Tank {}: neither a raw-value nor a level topic is configured; level will not update",
                identity.custom_name
            );
        }

        if let Some(topic) = &descriptor.temperature_topic {
            store.register("/Temperature", Value::Float(0.0), false);
            topic_to_path.insert(topic.clone(), "/Temperature".to_string());
        }
        if let Some(topic) = &descriptor.battery_topic {
            store.register("/BatteryVoltage", Value::Float(0.0), false);
            topic_to_path.insert(topic.clone(), "/BatteryVoltage".to_string());
        }

        let mut sensor = Self {
            descriptor,
            service,
            store,
            topic_to_path,
            level_direct,
        };
        // Initial derivation so level and remaining agree with calibration
        // before the first message arrives.
        if !sensor.level_direct {
            sensor.recalculate_level();
        }
        sensor.recalculate_remaining();
        sensor
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

    fn float_at(&self, path: &str) -> f64 {
        self.store.get(path).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// level = clamp((raw - empty) / (full - empty) * 100, 0, 100), or 0
    /// when the calibration span is degenerate. Returns an update when the
    /// stored level changed.
    fn recalculate_level(&mut self) -> Option<PropertyUpdate> {
        let raw = self.float_at("/RawValue");
        let empty = self.float_at("/RawValueEmpty");
        let full = self.float_at("/RawValueFull");
        let level = if full != empty {
            (((raw - empty) / (full - empty)) * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        let level = round2(level);
        self.store
            .set("/Level", Value::Float(level))
            .then(|| PropertyUpdate::new("/Level", Value::Float(level)))
    }

    fn recalculate_remaining(&mut self) -> Option<PropertyUpdate> {
        let remaining = round2(self.float_at("/Level") / 100.0 * self.float_at("/Capacity"));
        self.store
            .set("/Remaining", Value::Float(remaining))
            .then(|| PropertyUpdate::new("/Remaining", Value::Float(remaining)))
    }

    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Vec<PropertyUpdate> {
        let Some(path) = self.topic_to_path.get(topic).cloned() else {
            return Vec::new();
        };
        let Some(value) = decode_numeric(payload) else {
            warn!(
                "Tank {}: payload {:?} on {} is not numeric",
                self.descriptor.identity.custom_name,
                String::from_utf8_lossy(payload),
                topic,
            );
            return Vec::new();
        };

        let mut updates = Vec::new();
        match path.as_str() {
            "/RawValue" if !self.level_direct => {
                if self.store.set("/RawValue", Value::Float(value)) {
                    updates.push(PropertyUpdate::new("/RawValue", Value::Float(value)));
                    updates.extend(self.recalculate_level());
                    updates.extend(self.recalculate_remaining());
                }
            }
            "/Level" if self.level_direct => {
                if !(0.0..=100.0).contains(&value) {
                    debug!(
                        "Tank {}: direct level {} out of range, ignored",
                        self.descriptor.identity.custom_name, value
                    );
                    return Vec::new();
                }
                let level = round2(value);
                if self.store.set("/Level", Value::Float(level)) {
                    updates.push(PropertyUpdate::new("/Level", Value::Float(level)));
                    updates.extend(self.recalculate_remaining());
                }
            }
            _ => {
                if self.store.set(&path, Value::Float(value)) {
                    updates.push(PropertyUpdate::new(path, Value::Float(value)));
                }
            }
        }
        updates
    }

    pub fn on_property_write(&mut self, path: &str, value: &Value) -> WriteOutcome {
        if !self.store.is_writable(path) {
            return WriteOutcome::rejected();
        }
        let section = format!("Tank_Sensor_{}", self.descriptor.identity.device_index);
        let Some(key) = path.rsplit('/').next() else {
            return WriteOutcome::rejected();
        };
        let persisted_value = if path == "/FluidType" {
            value
                .as_i64()
                .map(fluid_type_name)
                .unwrap_or("fresh water")
                .to_string()
        } else {
            value.to_string()
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

        // Calibration and capacity changes cascade immediately.
        match path {
            "/RawValueEmpty" | "/RawValueFull" if !self.level_direct => {
                outcome.updates.extend(self.recalculate_level());
                outcome.updates.extend(self.recalculate_remaining());
            }
            "/Capacity" => {
                outcome.updates.extend(self.recalculate_remaining());
            }
            _ => {}
        }
        outcome
    }
}
