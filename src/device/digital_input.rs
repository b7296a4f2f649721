//! Digital input with a raw state mirror and a type- and inversion-aware
//! derived display state.

use tracing::warn;

use crate::config::DigitalInputDescriptor;
use crate::payload::BoolMatcher;

use super::{
    register_identity, PropertyStore, PropertyUpdate, Value, WriteEffect, WriteOutcome,
};

/// Input type names in code order; index is the numeric type code.
const INPUT_TYPES: [&str; 11] = [
    "disabled",
    "pulse meter",
    "door alarm",
    "bilge pump",
    "bilge alarm",
    "burglar alarm",
    "smoke alarm",
    "fire alarm",
    "co2 alarm",
    "generator",
    "touch input control",
];

pub fn input_type_code(name: &str) -> i64 {
    let lowered = name.to_lowercase();
    INPUT_TYPES
        .iter()
        .position(|t| *t == lowered)
        .unwrap_or(0) as i64
}

pub fn input_type_name(code: i64) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|i| INPUT_TYPES.get(i).copied())
        .unwrap_or("disabled")
}

/// Map the logical (post-inversion) 0/1 state to the displayed state code
/// for the configured input type.
fn display_state(type_code: i64, logical: i64) -> i64 {
    match type_code {
        // door alarm: 7=alarm, 6=normal
        2 => {
            if logical == 1 {
                7
            } else {
                6
            }
        }
        // bilge pump: 3=on, 2=off
        3 => {
            if logical == 1 {
                3
            } else {
                2
            }
        }
        // bilge/burglar/smoke/fire/co2 alarm: 9=alarm, 8=normal
        4..=8 => {
            if logical == 1 {
                9
            } else {
                8
            }
        }
        _ => logical,
    }
}

#[derive(Debug)]
pub struct DigitalInput {
    descriptor: DigitalInputDescriptor,
    service: String,
    store: PropertyStore,
    matcher: BoolMatcher,
}

impl DigitalInput {
    pub fn new(descriptor: DigitalInputDescriptor) -> Self {
        let identity = &descriptor.identity;
        let service = format!("digitalinput.virtual_{}", identity.serial);

        let mut store = PropertyStore::new();
        register_identity(
            &mut store,
            "Virtual digital input",
            identity.device_instance,
            &identity.serial,
            &identity.custom_name,
        );
        store.register("/Count", Value::Int(descriptor.count), true);
        store.register("/State", Value::Int(descriptor.initial_state), true);
        store.register("/Type", Value::Int(input_type_code(&descriptor.input_type)), true);
        store.register(
            "/Settings/InvertTranslation",
            Value::Int(descriptor.invert_translation),
            true,
        );
        store.register(
            "/Settings/InvertAlarm",
            Value::Int(descriptor.invert_alarm),
            true,
        );
        store.register(
            "/Settings/AlarmSetting",
            Value::Int(descriptor.alarm_setting),
            true,
        );
        store.register("/InputState", Value::Int(0), false);
        store.register("/Alarm", Value::Int(0), false);

        if descriptor.state_topic.is_none() {
            warn!(
                "Digital input {}: no state topic configured; state will not update",
                identity.custom_name
            );
        }

        let matcher = BoolMatcher::new(&descriptor.on_payload, &descriptor.off_payload);

        Self {
            descriptor,
            service,
            store,
            matcher,
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
        self.descriptor
            .state_topic
            .as_deref()
            .into_iter()
            .collect()
    }

    fn int_at(&self, path: &str) -> i64 {
        self.store.get(path).and_then(Value::as_i64).unwrap_or(0)
    }

    /// Recompute the displayed `/State` from the held raw state and the
    /// given inversion flag.
    fn derive_state(&self, raw: i64, invert: i64) -> i64 {
        let logical = if invert == 1 { 1 - raw } else { raw };
        display_state(self.int_at("/Type"), logical)
    }

    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Vec<PropertyUpdate> {
        if self.descriptor.state_topic.as_deref() != Some(topic) {
            return Vec::new();
        }
        let Some(state) = self.matcher.decode(payload) else {
            warn!(
                "Digital input {}: invalid payload {:?} (expected {:?} or {:?})",
                self.descriptor.identity.custom_name,
                String::from_utf8_lossy(payload),
                self.descriptor.on_payload,
                self.descriptor.off_payload,
            );
            return Vec::new();
        };
        let raw = i64::from(state);

        let mut updates = Vec::new();
        // The raw mirror always reflects the wire state verbatim.
        if self.store.set("/InputState", Value::Int(raw)) {
            updates.push(PropertyUpdate::new("/InputState", Value::Int(raw)));
        }
        let derived = self.derive_state(raw, self.int_at("/Settings/InvertTranslation"));
        if self.store.set("/State", Value::Int(derived)) {
            updates.push(PropertyUpdate::new("/State", Value::Int(derived)));
        }
        updates
    }

    pub fn on_property_write(&mut self, path: &str, value: &Value) -> WriteOutcome {
        if !self.store.is_writable(path) {
            return WriteOutcome::rejected();
        }
        let section = format!("input_{}", self.descriptor.identity.device_index);
        let mut outcome = WriteOutcome::accepted();

        // /Type persists as its text name, everything else as written.
        let persisted_value = if path == "/Type" {
            value
                .as_i64()
                .map(input_type_name)
                .unwrap_or("disabled")
                .to_string()
        } else {
            value.to_string()
        };
        let Some(key) = path.rsplit('/').next() else {
            return WriteOutcome::rejected();
        };
        outcome.effects.push(WriteEffect::Persist {
            section,
            key: key.to_string(),
            value: persisted_value,
        });

        if self.store.set(path, value.clone()) {
            outcome.updates.push(PropertyUpdate::new(path, value.clone()));
        }

        // Changing the inversion flag re-derives the displayed state from
        // the currently-held raw state, without waiting for a new message.
        if path == "/Settings/InvertTranslation" {
            let derived = self.derive_state(
                self.int_at("/InputState"),
                value.as_i64().unwrap_or(0),
            );
            if self.store.set("/State", Value::Int(derived)) {
                outcome.updates.push(PropertyUpdate::new("/State", Value::Int(derived)));
            }
        }

        outcome
    }
}
