//! The live device collection and its dispatch surface.

use std::collections::BTreeSet;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{validate_uniqueness, DeviceDescriptor};
use crate::error::BridgeError;

use super::{Device, Value, WriteOutcome};

/// A property change to announce on the exposure boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEvent {
    pub service: String,
    pub path: String,
    pub value: Value,
}

/// An external write request arriving from the exposure boundary.
#[derive(Debug, Clone)]
pub struct PropertyWriteRequest {
    pub serial: String,
    pub path: String,
    pub value: Value,
}

/// Receives property change announcements. The bundled implementation just
/// logs them; a real exposure frontend replaces it.
pub trait PropertyExporter {
    fn export(&mut self, event: &PropertyEvent);
}

#[derive(Debug, Default)]
pub struct LogExporter;

impl PropertyExporter for LogExporter {
    fn export(&mut self, event: &PropertyEvent) {
        info!("{}{} = {}", event.service, event.path, event.value);
    }
}

/// Clonable sender half of the exposure boundary: whoever presents the
/// devices externally funnels write requests through this handle into the
/// single-writer loop.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<PropertyWriteRequest>,
}

impl BridgeHandle {
    pub fn new(tx: mpsc::Sender<PropertyWriteRequest>) -> Self {
        Self { tx }
    }

    /// Returns false when the bridge loop has shut down.
    pub async fn request_write(&self, request: PropertyWriteRequest) -> bool {
        self.tx.send(request).await.is_ok()
    }
}

/// Owns every live device. Built once at startup; devices are never added
/// or removed afterwards.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn build(descriptors: Vec<DeviceDescriptor>) -> Result<Self, BridgeError> {
        validate_uniqueness(&descriptors)?;
        let devices: Vec<Device> = descriptors.into_iter().map(Device::from_descriptor).collect();
        for device in &devices {
            info!(
                "Registered {} with {} subscription(s)",
                device.service_id(),
                device.subscription_topics().len()
            );
        }
        Ok(Self { devices })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Union of every device's subscription set, computed before the network
    /// connection opens so the handshake subscribes exactly once per topic.
    pub fn subscription_topics(&self) -> Vec<String> {
        let mut topics = BTreeSet::new();
        for device in &self.devices {
            for topic in device.subscription_topics() {
                topics.insert(topic.to_string());
            }
        }
        topics.into_iter().collect()
    }

    /// Fan-out: every device is offered every message and ignores topics
    /// outside its own subscription set. One device failing to decode never
    /// stops delivery to the rest.
    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) -> Vec<PropertyEvent> {
        let mut events = Vec::new();
        for device in &mut self.devices {
            let service = device.service_id().to_string();
            for update in device.on_message(topic, payload) {
                events.push(PropertyEvent {
                    service: service.clone(),
                    path: update.path,
                    value: update.value,
                });
            }
        }
        events
    }

    /// Offer an external write to the addressed device. `None` when no
    /// device carries the serial.
    pub fn handle_property_write(
        &mut self,
        serial: &str,
        path: &str,
        value: &Value,
    ) -> Option<WriteOutcome> {
        let device = self.devices.iter_mut().find(|d| d.serial() == serial)?;
        let outcome = device.on_property_write(path, value);
        if !outcome.accepted {
            debug!("Write to {}{} rejected", device.service_id(), path);
        }
        Some(outcome)
    }

    /// Service identifier for a serial, for wrapping write-outcome updates
    /// into exposure events.
    pub fn service_for_serial(&self, serial: &str) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.serial() == serial)
            .map(|d| d.service_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BatteryDescriptor, DeviceIdentity, DigitalInputDescriptor, TankSensorDescriptor,
    };
    use crate::device::WriteEffect;

    fn identity(index: u32, serial: &str) -> DeviceIdentity {
        DeviceIdentity {
            device_index: index,
            device_instance: 100 + index,
            custom_name: format!("dev{index}"),
            serial: serial.into(),
        }
    }

    fn fixtures() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::DigitalInput(DigitalInputDescriptor {
                identity: identity(1, "1000000000000001"),
                state_topic: Some("shared/topic".into()),
                on_payload: "ON".into(),
                off_payload: "OFF".into(),
                input_type: "generator".into(),
                invert_translation: 0,
                invert_alarm: 0,
                alarm_setting: 0,
                count: 0,
                initial_state: 0,
            }),
            DeviceDescriptor::Battery(BatteryDescriptor {
                identity: identity(2, "1000000000000002"),
                capacity_ah: 100.0,
                current_topic: Some("bat/current".into()),
                power_topic: None,
                temperature_topic: None,
                voltage_topic: None,
                soc_topic: Some("shared/topic".into()),
                soh_topic: None,
            }),
            DeviceDescriptor::TankSensor(TankSensorDescriptor {
                identity: identity(3, "1000000000000003"),
                capacity: 0.2,
                fluid_type: "fuel".into(),
                raw_value_topic: Some("tank/raw".into()),
                level_topic: None,
                temperature_topic: None,
                battery_topic: None,
                raw_value_empty: 0.0,
                raw_value_full: 240.0,
                raw_unit: String::new(),
            }),
        ]
    }

    #[test]
    fn subscription_union_is_deduplicated() {
        let registry = DeviceRegistry::build(fixtures()).expect("build");
        assert_eq!(
            registry.subscription_topics(),
            vec!["bat/current", "shared/topic", "tank/raw"]
        );
    }

    #[test]
    fn shared_topic_fans_out_to_all_interested_devices() {
        let mut registry = DeviceRegistry::build(fixtures()).expect("build");
        // "ON" is a valid input state but not numeric: the digital input
        // updates, the battery logs and discards, the tank ignores.
        let events = registry.dispatch("shared/topic", b"ON");
        assert!(events.iter().all(|e| e.service.starts_with("digitalinput.")));
        assert!(!events.is_empty());

        // A numeric payload on the same topic reaches the battery too.
        let events = registry.dispatch("shared/topic", b"42");
        assert!(events.iter().any(|e| e.service.starts_with("battery.") && e.path == "/Soc"));
    }

    #[test]
    fn dispatch_to_unknown_topic_touches_nothing() {
        let mut registry = DeviceRegistry::build(fixtures()).expect("build");
        assert!(registry.dispatch("nobody/listens", b"1").is_empty());
    }

    #[test]
    fn build_rejects_duplicate_identities() {
        let mut descriptors = fixtures();
        if let DeviceDescriptor::Battery(b) = &mut descriptors[1] {
            b.identity.serial = "1000000000000001".into();
        }
        assert!(matches!(
            DeviceRegistry::build(descriptors),
            Err(BridgeError::DuplicateSerial(_))
        ));
    }

    #[test]
    fn write_routes_by_serial() {
        let mut registry = DeviceRegistry::build(fixtures()).expect("build");
        let outcome = registry
            .handle_property_write("1000000000000002", "/Capacity", &Value::Float(90.0))
            .expect("device exists");
        assert!(outcome.accepted);
        assert!(matches!(&outcome.effects[0], WriteEffect::Persist { key, .. } if key == "CapacityAh"));

        assert!(registry
            .handle_property_write("0000000000000000", "/Capacity", &Value::Float(1.0))
            .is_none());
    }

    #[tokio::test]
    async fn bridge_handle_feeds_the_write_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = BridgeHandle::new(tx);
        assert!(
            handle
                .request_write(PropertyWriteRequest {
                    serial: "1000000000000002".into(),
                    path: "/Capacity".into(),
                    value: Value::Float(75.0),
                })
                .await
        );
        let request = rx.recv().await.expect("request");
        assert_eq!(request.path, "/Capacity");
    }
}
