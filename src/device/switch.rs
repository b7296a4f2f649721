//! Relay module with N independently addressable boolean outputs.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::RelayModuleDescriptor;
use crate::payload::BoolMatcher;

use super::{
    register_identity, PropertyStore, PropertyUpdate, Value, WriteEffect, WriteOutcome,
};

#[derive(Debug)]
pub struct SwitchModule {
    descriptor: RelayModuleDescriptor,
    service: String,
    store: PropertyStore,
    matcher: BoolMatcher,
    /// State topic -> state property path.
    topic_to_path: HashMap<String, String>,
    /// State property path -> command topic.
    path_to_command: HashMap<String, String>,
}

fn output_prefix(index: u32) -> String {
    format!("/SwitchableOutput/output_{index}")
}

impl SwitchModule {
    pub fn new(descriptor: RelayModuleDescriptor) -> Self {
        let identity = &descriptor.identity;
        let service = format!("switch.virtual_{}", identity.serial);

        let mut store = PropertyStore::new();
        register_identity(
            &mut store,
            "Virtual switch",
            identity.device_instance,
            &identity.serial,
            &identity.custom_name,
        );
        store.register("/State", Value::Int(256), false);

        let matcher = BoolMatcher::new(&descriptor.on_state_payload, &descriptor.off_state_payload);

        let mut topic_to_path = HashMap::new();
        let mut path_to_command = HashMap::new();

        for output in &descriptor.outputs {
            let prefix = output_prefix(output.index);
            let state_path = format!("{prefix}/State");

            store.register(&format!("{prefix}/Name"), Value::Text(output.name.clone()), false);
            store.register(&format!("{prefix}/Status"), Value::Int(0), false);
            store.register(&state_path, Value::Int(0), true);
            store.register(
                &format!("{prefix}/Settings/CustomName"),
                Value::Text(output.custom_name.clone()),
                true,
            );
            store.register(
                &format!("{prefix}/Settings/Group"),
                Value::Text(output.group.clone()),
                true,
            );
            store.register(&format!("{prefix}/Settings/Type"), Value::Int(1), true);
            store.register(&format!("{prefix}/Settings/ValidTypes"), Value::Int(7), false);
            store.register(
                &format!("{prefix}/Settings/ShowUIControl"),
                Value::Int(output.show_ui_control),
                true,
            );

            // Both directions must be wired for the output to go live.
            match (&output.state_topic, &output.command_topic) {
                (Some(state_topic), Some(command_topic)) => {
                    topic_to_path.insert(state_topic.clone(), state_path.clone());
                    path_to_command.insert(state_path, command_topic.clone());
                }
                _ => warn!(
                    "Relay module {}: output {} is missing a state or command topic; output stays inert",
                    identity.custom_name, output.index
                ),
            }
        }

        Self {
            descriptor,
            service,
            store,
            matcher,
            topic_to_path,
            path_to_command,
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
        let Some(state_path) = self.topic_to_path.get(topic) else {
            return Vec::new();
        };
        let Some(state) = self.matcher.decode(payload) else {
            warn!(
                "Relay module {}: unrecognized payload {:?} on {} (expected {:?} or {:?})",
                self.descriptor.identity.custom_name,
                String::from_utf8_lossy(payload),
                topic,
                self.descriptor.on_state_payload,
                self.descriptor.off_state_payload,
            );
            return Vec::new();
        };
        let value = Value::Int(i64::from(state));
        if self.store.set(state_path, value.clone()) {
            vec![PropertyUpdate::new(state_path.clone(), value)]
        } else {
            debug!("Relay module state already {value} on {state_path}; no update");
            Vec::new()
        }
    }

    pub fn on_property_write(&mut self, path: &str, value: &Value) -> WriteOutcome {
        if !self.store.is_writable(path) {
            return WriteOutcome::rejected();
        }

        if path == "/CustomName" {
            return self.persist_and_commit(path, value, self.module_section(), "CustomName");
        }

        let Some(output_index) = parse_output_index(path) else {
            return WriteOutcome::rejected();
        };

        if path.ends_with("/State") {
            // Transient output state: publish the command, never persist.
            let Some(state) = value.as_i64().filter(|s| *s == 0 || *s == 1) else {
                return WriteOutcome::rejected();
            };
            let mut outcome = WriteOutcome::accepted();
            match self.path_to_command.get(path) {
                Some(command_topic) => {
                    let payload = if state == 1 {
                        self.descriptor.on_command_payload.clone()
                    } else {
                        self.descriptor.off_command_payload.clone()
                    };
                    outcome.effects.push(WriteEffect::Publish {
                        topic: command_topic.clone(),
                        payload,
                    });
                }
                None => warn!("No command topic mapped for {path}; state change not published"),
            }
            if self.store.set(path, value.clone()) {
                outcome.updates.push(PropertyUpdate::new(path, value.clone()));
            }
            return outcome;
        }

        if path.contains("/Settings/") {
            let Some(key) = path.rsplit('/').next() else {
                return WriteOutcome::rejected();
            };
            // Settings/Type is writable but not a durable setting of ours.
            if matches!(key, "CustomName" | "Group" | "ShowUIControl") {
                let section = format!(
                    "switch_{}_{}",
                    self.descriptor.identity.device_index, output_index
                );
                return self.persist_and_commit(path, value, section, key);
            }
            let mut outcome = WriteOutcome::accepted();
            if self.store.set(path, value.clone()) {
                outcome.updates.push(PropertyUpdate::new(path, value.clone()));
            }
            return outcome;
        }

        WriteOutcome::rejected()
    }

    fn module_section(&self) -> String {
        format!("Relay_Module_{}", self.descriptor.identity.device_index)
    }

    fn persist_and_commit(
        &mut self,
        path: &str,
        value: &Value,
        section: String,
        key: &str,
    ) -> WriteOutcome {
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

/// `/SwitchableOutput/output_3/State` -> `3`
fn parse_output_index(path: &str) -> Option<u32> {
    let rest = path.strip_prefix("/SwitchableOutput/output_")?;
    let (index, _) = rest.split_once('/')?;
    index.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceIdentity, OutputDescriptor};

    fn module(outputs: Vec<OutputDescriptor>) -> SwitchModule {
        SwitchModule::new(RelayModuleDescriptor {
            identity: DeviceIdentity {
                device_index: 1,
                device_instance: 40,
                custom_name: "Relays".into(),
                serial: "1111222233334444".into(),
            },
            on_state_payload: "ON".into(),
            off_state_payload: "OFF".into(),
            on_command_payload: "ON".into(),
            off_command_payload: "OFF".into(),
            outputs,
        })
    }

    fn output(index: u32) -> OutputDescriptor {
        OutputDescriptor {
            index,
            name: format!("Switch {index}"),
            custom_name: String::new(),
            group: String::new(),
            state_topic: Some(format!("relay/out/r{index}")),
            command_topic: Some(format!("relay/in/r{index}")),
            show_ui_control: 1,
        }
    }

    #[test]
    fn inbound_state_updates_owning_output_only() {
        let mut m = module(vec![output(1), output(2)]);
        let updates = m.on_message("relay/out/r2", b"ON");
        assert_eq!(
            updates,
            vec![PropertyUpdate::new(
                "/SwitchableOutput/output_2/State",
                Value::Int(1)
            )]
        );
        assert_eq!(
            m.properties().get("/SwitchableOutput/output_1/State"),
            Some(&Value::Int(0))
        );
    }

    #[test]
    fn repeated_delivery_mutates_once() {
        let mut m = module(vec![output(1)]);
        assert_eq!(m.on_message("relay/out/r1", b"ON").len(), 1);
        assert_eq!(m.on_message("relay/out/r1", b"ON").len(), 0);
    }

    #[test]
    fn undecodable_payload_is_discarded() {
        let mut m = module(vec![output(1)]);
        assert!(m.on_message("relay/out/r1", b"banana").is_empty());
        assert_eq!(
            m.properties().get("/SwitchableOutput/output_1/State"),
            Some(&Value::Int(0))
        );
    }

    #[test]
    fn unsubscribed_topic_is_a_noop() {
        let mut m = module(vec![output(1)]);
        assert!(m.on_message("some/other/topic", b"ON").is_empty());
    }

    #[test]
    fn accepted_state_write_publishes_command_to_that_output_only() {
        let mut m = module(vec![output(1), output(2)]);
        let outcome = m.on_property_write("/SwitchableOutput/output_2/State", &Value::Int(1));
        assert!(outcome.accepted);
        assert_eq!(
            outcome.effects,
            vec![WriteEffect::Publish {
                topic: "relay/in/r2".into(),
                payload: "ON".into(),
            }]
        );
        // No persistence of transient state, and output 1 untouched.
        assert!(!outcome
            .effects
            .iter()
            .any(|e| matches!(e, WriteEffect::Persist { .. })));
        assert_eq!(
            m.properties().get("/SwitchableOutput/output_1/State"),
            Some(&Value::Int(0))
        );
    }

    #[test]
    fn out_of_range_state_write_is_rejected() {
        let mut m = module(vec![output(1)]);
        let outcome = m.on_property_write("/SwitchableOutput/output_1/State", &Value::Int(2));
        assert!(!outcome.accepted);
    }

    #[test]
    fn settings_writes_persist_without_publishing() {
        let mut m = module(vec![output(1)]);
        let outcome = m.on_property_write(
            "/SwitchableOutput/output_1/Settings/Group",
            &Value::Text("Deck".into()),
        );
        assert!(outcome.accepted);
        assert_eq!(
            outcome.effects,
            vec![WriteEffect::Persist {
                section: "switch_1_1".into(),
                key: "Group".into(),
                value: "Deck".into(),
            }]
        );
    }

    #[test]
    fn module_custom_name_persists_to_module_section() {
        let mut m = module(vec![output(1)]);
        let outcome = m.on_property_write("/CustomName", &Value::Text("Aft relays".into()));
        assert!(outcome.accepted);
        assert_eq!(
            outcome.effects,
            vec![WriteEffect::Persist {
                section: "Relay_Module_1".into(),
                key: "CustomName".into(),
                value: "Aft relays".into(),
            }]
        );
    }

    #[test]
    fn read_only_paths_reject_writes() {
        let mut m = module(vec![output(1)]);
        assert!(!m.on_property_write("/Serial", &Value::Text("x".into())).accepted);
        assert!(
            !m.on_property_write("/SwitchableOutput/output_1/Name", &Value::Text("x".into()))
                .accepted
        );
    }

    #[test]
    fn structured_state_payload_decodes() {
        let mut m = SwitchModule::new(RelayModuleDescriptor {
            identity: DeviceIdentity {
                device_index: 2,
                device_instance: 41,
                custom_name: "Shelly".into(),
                serial: "5555666677778888".into(),
            },
            on_state_payload: r#"{"output": true}"#.into(),
            off_state_payload: r#"{"output": false}"#.into(),
            on_command_payload: "on".into(),
            off_command_payload: "off".into(),
            outputs: vec![OutputDescriptor {
                index: 1,
                name: "Switch 1".into(),
                custom_name: String::new(),
                group: String::new(),
                state_topic: Some("shelly/status/switch:0".into()),
                command_topic: Some("shelly/command/switch:0".into()),
                show_ui_control: 1,
            }],
        });
        // Whitespace differs from the raw template; structured compare wins.
        let updates = m.on_message("shelly/status/switch:0", br#"{ "output": true }"#);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].value, Value::Int(1));
    }
}
