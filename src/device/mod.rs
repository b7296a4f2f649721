//! Runtime device objects: typed property state plus per-family decode,
//! encode and derivation logic.

pub mod battery;
pub mod digital_input;
pub mod pv_charger;
pub mod registry;
pub mod switch;
pub mod tank_sensor;
pub mod temp_sensor;

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::config::DeviceDescriptor;

pub use battery::Battery;
pub use digital_input::DigitalInput;
pub use pv_charger::PvCharger;
pub use switch::SwitchModule;
pub use tank_sensor::TankSensor;
pub use temp_sensor::TempSensor;

/// A property value. Boolean state is carried as `Int` 0/1.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Text(_) => None,
        }
    }

    fn same_kind(&self, other: &Value) -> bool {
        matches!(
            (self, other),
            (Value::Float(_), Value::Float(_))
                | (Value::Int(_), Value::Int(_))
                | (Value::Text(_), Value::Text(_))
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug)]
struct Property {
    value: Value,
    writable: bool,
}

/// Named, typed device state. A property's value kind is fixed at
/// registration; setting an unchanged value is a no-op and reports no change.
#[derive(Debug, Default)]
pub struct PropertyStore {
    properties: HashMap<String, Property>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: &str, initial: Value, writable: bool) {
        self.properties.insert(
            path.to_string(),
            Property {
                value: initial,
                writable,
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.properties.get(path).map(|p| &p.value)
    }

    pub fn is_writable(&self, path: &str) -> bool {
        self.properties.get(path).is_some_and(|p| p.writable)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.properties.contains_key(path)
    }

    /// Store a value. Returns true only when the stored value actually
    /// changed. Unknown paths and kind mismatches are dropped.
    pub fn set(&mut self, path: &str, value: Value) -> bool {
        let Some(property) = self.properties.get_mut(path) else {
            debug!("Ignoring write to unregistered property {path}");
            return false;
        };
        if !property.value.same_kind(&value) {
            debug!("Ignoring kind-changing write to {path}: {value:?}");
            return false;
        }
        if property.value == value {
            return false;
        }
        property.value = value;
        true
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }
}

/// Emission toward the external property-exposure boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate {
    pub path: String,
    pub value: Value,
}

impl PropertyUpdate {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// Side effect requested by an accepted property write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEffect {
    /// Outbound command on the messaging network, retain=false.
    Publish { topic: String, payload: String },
    /// Durable configuration change for the persistence boundary.
    Persist {
        section: String,
        key: String,
        value: String,
    },
}

/// Result of offering an external write to a device. When accepted, the
/// device has already committed the value; `updates` carries everything that
/// changed (the written property and any derived state).
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub accepted: bool,
    pub effects: Vec<WriteEffect>,
    pub updates: Vec<PropertyUpdate>,
}

impl WriteOutcome {
    pub fn rejected() -> Self {
        Self::default()
    }

    pub fn accepted() -> Self {
        Self {
            accepted: true,
            ..Self::default()
        }
    }
}

/// Registers the identity properties every family exposes.
fn register_identity(
    store: &mut PropertyStore,
    product_name: &str,
    device_instance: u32,
    serial: &str,
    custom_name: &str,
) {
    store.register("/ProductName", Value::Text(product_name.to_string()), false);
    store.register(
        "/DeviceInstance",
        Value::Int(i64::from(device_instance)),
        false,
    );
    store.register("/Serial", Value::Text(serial.to_string()), false);
    store.register("/Connected", Value::Int(1), false);
    store.register("/CustomName", Value::Text(custom_name.to_string()), true);
}

/// One live device instance. A tagged union rather than trait objects: the
/// registry owns exactly one collection and dispatch stays a plain match.
#[derive(Debug)]
pub enum Device {
    Switch(SwitchModule),
    DigitalInput(DigitalInput),
    TempSensor(TempSensor),
    TankSensor(TankSensor),
    Battery(Battery),
    PvCharger(PvCharger),
}

impl Device {
    pub fn from_descriptor(descriptor: DeviceDescriptor) -> Self {
        match descriptor {
            DeviceDescriptor::RelayModule(d) => Device::Switch(SwitchModule::new(d)),
            DeviceDescriptor::DigitalInput(d) => Device::DigitalInput(DigitalInput::new(d)),
            DeviceDescriptor::TempSensor(d) => Device::TempSensor(TempSensor::new(d)),
            DeviceDescriptor::TankSensor(d) => Device::TankSensor(TankSensor::new(d)),
            DeviceDescriptor::Battery(d) => Device::Battery(Battery::new(d)),
            DeviceDescriptor::PvCharger(d) => Device::PvCharger(PvCharger::new(d)),
        }
    }

    pub fn serial(&self) -> &str {
        match self {
            Device::Switch(d) => d.serial(),
            Device::DigitalInput(d) => d.serial(),
            Device::TempSensor(d) => d.serial(),
            Device::TankSensor(d) => d.serial(),
            Device::Battery(d) => d.serial(),
            Device::PvCharger(d) => d.serial(),
        }
    }

    /// Stable identifier the exposure boundary publishes this device under.
    pub fn service_id(&self) -> &str {
        match self {
            Device::Switch(d) => d.service_id(),
            Device::DigitalInput(d) => d.service_id(),
            Device::TempSensor(d) => d.service_id(),
            Device::TankSensor(d) => d.service_id(),
            Device::Battery(d) => d.service_id(),
            Device::PvCharger(d) => d.service_id(),
        }
    }

    /// Distinct topics this device wants delivered; derived from its
    /// topic-to-property map, never mutated after construction.
    pub fn subscription_topics(&self) -> Vec<&str> {
        match self {
            Device::Switch(d) => d.subscription_topics(),
            Device::DigitalInput(d) => d.subscription_topics(),
            Device::TempSensor(d) => d.subscription_topics(),
            Device::TankSensor(d) => d.subscription_topics(),
            Device::Battery(d) => d.subscription_topics(),
            Device::PvCharger(d) => d.subscription_topics(),
        }
    }

    /// Inbound message delivery; a no-op for topics outside this device's
    /// subscription set.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Vec<PropertyUpdate> {
        match self {
            Device::Switch(d) => d.on_message(topic, payload),
            Device::DigitalInput(d) => d.on_message(topic, payload),
            Device::TempSensor(d) => d.on_message(topic, payload),
            Device::TankSensor(d) => d.on_message(topic, payload),
            Device::Battery(d) => d.on_message(topic, payload),
            Device::PvCharger(d) => d.on_message(topic, payload),
        }
    }

    /// External write offered by the property-exposure boundary.
    pub fn on_property_write(&mut self, path: &str, value: &Value) -> WriteOutcome {
        match self {
            Device::Switch(d) => d.on_property_write(path, value),
            Device::DigitalInput(d) => d.on_property_write(path, value),
            Device::TempSensor(d) => d.on_property_write(path, value),
            Device::TankSensor(d) => d.on_property_write(path, value),
            Device::Battery(d) => d.on_property_write(path, value),
            Device::PvCharger(d) => d.on_property_write(path, value),
        }
    }

    pub fn properties(&self) -> &PropertyStore {
        match self {
            Device::Switch(d) => d.properties(),
            Device::DigitalInput(d) => d.properties(),
            Device::TempSensor(d) => d.properties(),
            Device::TankSensor(d) => d.properties(),
            Device::Battery(d) => d.properties(),
            Device::PvCharger(d) => d.properties(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_change_once() {
        let mut store = PropertyStore::new();
        store.register("/Level", Value::Float(0.0), false);
        assert!(store.set("/Level", Value::Float(50.0)));
        assert!(!store.set("/Level", Value::Float(50.0)));
        assert_eq!(store.get("/Level"), Some(&Value::Float(50.0)));
    }

    #[test]
    fn set_rejects_kind_change_and_unknown_paths() {
        let mut store = PropertyStore::new();
        store.register("/State", Value::Int(0), true);
        assert!(!store.set("/State", Value::Text("on".into())));
        assert_eq!(store.get("/State"), Some(&Value::Int(0)));
        assert!(!store.set("/Missing", Value::Int(1)));
    }

    #[test]
    fn writable_flag() {
        let mut store = PropertyStore::new();
        store.register("/Serial", Value::Text("123".into()), false);
        store.register("/CustomName", Value::Text("x".into()), true);
        assert!(!store.is_writable("/Serial"));
        assert!(store.is_writable("/CustomName"));
        assert!(!store.is_writable("/Nope"));
    }

    #[test]
    fn value_display_for_persistence() {
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(Value::Text("door alarm".into()).to_string(), "door alarm");
    }
}
