use std::collections::HashSet;
use std::env;

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use crate::error::BridgeError;

/// Marker the configuration frontend leaves in topic fields it never filled
/// in. A topic containing it is treated as unset and the channel stays inert.
const TOPIC_PLACEHOLDER: &str = "path/to/mqtt";

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub settings_file: String,
    pub descriptors: Vec<DeviceDescriptor>,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

/// Immutable per-device configuration, one variant per device family.
#[derive(Debug, Clone)]
pub enum DeviceDescriptor {
    RelayModule(RelayModuleDescriptor),
    DigitalInput(DigitalInputDescriptor),
    TempSensor(TempSensorDescriptor),
    TankSensor(TankSensorDescriptor),
    Battery(BatteryDescriptor),
    PvCharger(PvChargerDescriptor),
}

/// Fields shared by every family.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// 1-based position within the family, stable across restarts.
    pub device_index: u32,
    /// Globally unique instance number assigned at configuration time.
    pub device_instance: u32,
    pub custom_name: String,
    /// 16-digit identifier, distinct from any vendor-reported serial.
    pub serial: String,
}

#[derive(Debug, Clone)]
pub struct RelayModuleDescriptor {
    pub identity: DeviceIdentity,
    pub on_state_payload: String,
    pub off_state_payload: String,
    pub on_command_payload: String,
    pub off_command_payload: String,
    pub outputs: Vec<OutputDescriptor>,
}

#[derive(Debug, Clone)]
pub struct OutputDescriptor {
    pub index: u32,
    pub name: String,
    pub custom_name: String,
    pub group: String,
    pub state_topic: Option<String>,
    pub command_topic: Option<String>,
    pub show_ui_control: i64,
}

#[derive(Debug, Clone)]
pub struct DigitalInputDescriptor {
    pub identity: DeviceIdentity,
    pub state_topic: Option<String>,
    pub on_payload: String,
    pub off_payload: String,
    /// Textual input type name, e.g. "door alarm"; unknown names fall back
    /// to "disabled".
    pub input_type: String,
    pub invert_translation: i64,
    pub invert_alarm: i64,
    pub alarm_setting: i64,
    pub count: i64,
    pub initial_state: i64,
}

#[derive(Debug, Clone)]
pub struct TempSensorDescriptor {
    pub identity: DeviceIdentity,
    pub sensor_type: String,
    pub temperature_topic: Option<String>,
    pub humidity_topic: Option<String>,
    pub battery_topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TankSensorDescriptor {
    pub identity: DeviceIdentity,
    pub capacity: f64,
    pub fluid_type: String,
    pub raw_value_topic: Option<String>,
    pub level_topic: Option<String>,
    pub temperature_topic: Option<String>,
    pub battery_topic: Option<String>,
    pub raw_value_empty: f64,
    pub raw_value_full: f64,
    pub raw_unit: String,
}

#[derive(Debug, Clone)]
pub struct BatteryDescriptor {
    pub identity: DeviceIdentity,
    pub capacity_ah: f64,
    pub current_topic: Option<String>,
    pub power_topic: Option<String>,
    pub temperature_topic: Option<String>,
    pub voltage_topic: Option<String>,
    pub soc_topic: Option<String>,
    pub soh_topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PvChargerDescriptor {
    pub identity: DeviceIdentity,
    pub battery_current_topic: Option<String>,
    pub battery_voltage_topic: Option<String>,
    pub max_charge_voltage_topic: Option<String>,
    pub max_charge_current_topic: Option<String>,
    pub load_state_topic: Option<String>,
    pub charger_state_topic: Option<String>,
    pub pv_voltage_topic: Option<String>,
    pub pv_power_topic: Option<String>,
    pub total_yield_topic: Option<String>,
    pub system_yield_topic: Option<String>,
}

impl DeviceDescriptor {
    pub fn identity(&self) -> &DeviceIdentity {
        match self {
            Self::RelayModule(d) => &d.identity,
            Self::DigitalInput(d) => &d.identity,
            Self::TempSensor(d) => &d.identity,
            Self::TankSensor(d) => &d.identity,
            Self::Battery(d) => &d.identity,
            Self::PvCharger(d) => &d.identity,
        }
    }

    pub fn family_name(&self) -> &'static str {
        match self {
            Self::RelayModule(_) => "relay_module",
            Self::DigitalInput(_) => "digital_input",
            Self::TempSensor(_) => "temp_sensor",
            Self::TankSensor(_) => "tank_sensor",
            Self::Battery(_) => "battery",
            Self::PvCharger(_) => "pv_charger",
        }
    }

    /// Persistence section this device's settings are written under.
    pub fn section(&self) -> String {
        let index = self.identity().device_index;
        match self {
            Self::RelayModule(_) => format!("Relay_Module_{index}"),
            Self::DigitalInput(_) => format!("input_{index}"),
            Self::TempSensor(_) => format!("Temp_Sensor_{index}"),
            Self::TankSensor(_) => format!("Tank_Sensor_{index}"),
            Self::Battery(_) => format!("Virtual_Battery_{index}"),
            Self::PvCharger(_) => format!("Pv_Charger_{index}"),
        }
    }
}

// ----------------------------------------------------------------------------
// Raw serde structs for the devices file. Defaults and placeholder filtering
// are applied while resolving these into the typed descriptors above.
// ----------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawIdentity {
    device_index: u32,
    device_instance: u32,
    #[serde(default)]
    custom_name: String,
    #[serde(default)]
    serial: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
enum RawDescriptor {
    RelayModule {
        #[serde(flatten)]
        identity: RawIdentity,
        #[serde(default = "default_on")]
        on_state_payload: String,
        #[serde(default = "default_off")]
        off_state_payload: String,
        #[serde(default = "default_on")]
        on_command_payload: String,
        #[serde(default = "default_off")]
        off_command_payload: String,
        #[serde(default)]
        outputs: Vec<RawOutput>,
    },
    DigitalInput {
        #[serde(flatten)]
        identity: RawIdentity,
        #[serde(default)]
        state_topic: Option<String>,
        #[serde(default = "default_on")]
        on_payload: String,
        #[serde(default = "default_off")]
        off_payload: String,
        #[serde(default = "default_input_type")]
        input_type: String,
        #[serde(default)]
        invert_translation: i64,
        #[serde(default)]
        invert_alarm: i64,
        #[serde(default)]
        alarm_setting: i64,
        #[serde(default)]
        count: i64,
        #[serde(default)]
        initial_state: i64,
    },
    TempSensor {
        #[serde(flatten)]
        identity: RawIdentity,
        #[serde(default = "default_sensor_type")]
        sensor_type: String,
        #[serde(default)]
        temperature_topic: Option<String>,
        #[serde(default)]
        humidity_topic: Option<String>,
        #[serde(default)]
        battery_topic: Option<String>,
    },
    TankSensor {
        #[serde(flatten)]
        identity: RawIdentity,
        #[serde(default = "default_capacity")]
        capacity: f64,
        #[serde(default = "default_fluid_type")]
        fluid_type: String,
        #[serde(default)]
        raw_value_topic: Option<String>,
        #[serde(default)]
        level_topic: Option<String>,
        #[serde(default)]
        temperature_topic: Option<String>,
        #[serde(default)]
        battery_topic: Option<String>,
        #[serde(default)]
        raw_value_empty: f64,
        #[serde(default)]
        raw_value_full: f64,
        #[serde(default)]
        raw_unit: String,
    },
    Battery {
        #[serde(flatten)]
        identity: RawIdentity,
        #[serde(default)]
        capacity_ah: f64,
        #[serde(default)]
        current_topic: Option<String>,
        #[serde(default)]
        power_topic: Option<String>,
        #[serde(default)]
        temperature_topic: Option<String>,
        #[serde(default)]
        voltage_topic: Option<String>,
        #[serde(default)]
        soc_topic: Option<String>,
        #[serde(default)]
        soh_topic: Option<String>,
    },
    PvCharger {
        #[serde(flatten)]
        identity: RawIdentity,
        #[serde(default)]
        battery_current_topic: Option<String>,
        #[serde(default)]
        battery_voltage_topic: Option<String>,
        #[serde(default)]
        max_charge_voltage_topic: Option<String>,
        #[serde(default)]
        max_charge_current_topic: Option<String>,
        #[serde(default)]
        load_state_topic: Option<String>,
        #[serde(default)]
        charger_state_topic: Option<String>,
        #[serde(default)]
        pv_voltage_topic: Option<String>,
        #[serde(default)]
        pv_power_topic: Option<String>,
        #[serde(default)]
        total_yield_topic: Option<String>,
        #[serde(default)]
        system_yield_topic: Option<String>,
    },
}

#[derive(Deserialize)]
struct RawOutput {
    index: u32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    custom_name: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    state_topic: Option<String>,
    #[serde(default)]
    command_topic: Option<String>,
    #[serde(default = "default_show_ui")]
    show_ui_control: i64,
}

fn default_on() -> String {
    "ON".to_string()
}
fn default_off() -> String {
    "OFF".to_string()
}
fn default_input_type() -> String {
    "disabled".to_string()
}
fn default_sensor_type() -> String {
    "generic".to_string()
}
fn default_fluid_type() -> String {
    "fresh water".to_string()
}
fn default_capacity() -> f64 {
    0.2
}
fn default_show_ui() -> i64 {
    1
}

fn env_required(key: &str) -> Result<String, BridgeError> {
    env::var(key).map_err(|_| BridgeError::Config(format!("{key} environment variable is required")))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Drop unset topics: absent, empty, or still carrying the wizard's
/// placeholder marker.
pub fn valid_topic(topic: Option<String>) -> Option<String> {
    topic.filter(|t| !t.is_empty() && !t.contains(TOPIC_PLACEHOLDER))
}

/// Generate a 16-digit serial for descriptors that do not carry one.
fn generate_serial() -> String {
    rand::thread_rng()
        .gen_range(1_000_000_000_000_000u64..10_000_000_000_000_000u64)
        .to_string()
}

fn resolve_identity(raw: RawIdentity, family: &str) -> DeviceIdentity {
    let serial = match raw.serial.filter(|s| !s.is_empty()) {
        Some(s) => s,
        None => {
            let serial = generate_serial();
            warn!(
                "No serial configured for {} {}; generated {}",
                family, raw.device_index, serial
            );
            serial
        }
    };
    DeviceIdentity {
        device_index: raw.device_index,
        device_instance: raw.device_instance,
        custom_name: raw.custom_name,
        serial,
    }
}

fn resolve_descriptor(raw: RawDescriptor) -> DeviceDescriptor {
    match raw {
        RawDescriptor::RelayModule {
            identity,
            on_state_payload,
            off_state_payload,
            on_command_payload,
            off_command_payload,
            outputs,
        } => DeviceDescriptor::RelayModule(RelayModuleDescriptor {
            identity: resolve_identity(identity, "relay_module"),
            on_state_payload,
            off_state_payload,
            on_command_payload,
            off_command_payload,
            outputs: outputs
                .into_iter()
                .map(|o| OutputDescriptor {
                    name: o.name.unwrap_or_else(|| format!("Switch {}", o.index)),
                    index: o.index,
                    custom_name: o.custom_name,
                    group: o.group,
                    state_topic: valid_topic(o.state_topic),
                    command_topic: valid_topic(o.command_topic),
                    show_ui_control: o.show_ui_control,
                })
                .collect(),
        }),
        RawDescriptor::DigitalInput {
            identity,
            state_topic,
            on_payload,
            off_payload,
            input_type,
            invert_translation,
            invert_alarm,
            alarm_setting,
            count,
            initial_state,
        } => DeviceDescriptor::DigitalInput(DigitalInputDescriptor {
            identity: resolve_identity(identity, "digital_input"),
            state_topic: valid_topic(state_topic),
            on_payload,
            off_payload,
            input_type,
            invert_translation,
            invert_alarm,
            alarm_setting,
            count,
            initial_state,
        }),
        RawDescriptor::TempSensor {
            identity,
            sensor_type,
            temperature_topic,
            humidity_topic,
            battery_topic,
        } => DeviceDescriptor::TempSensor(TempSensorDescriptor {
            identity: resolve_identity(identity, "temp_sensor"),
            sensor_type,
            temperature_topic: valid_topic(temperature_topic),
            humidity_topic: valid_topic(humidity_topic),
            battery_topic: valid_topic(battery_topic),
        }),
        RawDescriptor::TankSensor {
            identity,
            capacity,
            fluid_type,
            raw_value_topic,
            level_topic,
            temperature_topic,
            battery_topic,
            raw_value_empty,
            raw_value_full,
            raw_unit,
        } => DeviceDescriptor::TankSensor(TankSensorDescriptor {
            identity: resolve_identity(identity, "tank_sensor"),
            capacity,
            fluid_type,
            raw_value_topic: valid_topic(raw_value_topic),
            level_topic: valid_topic(level_topic),
            temperature_topic: valid_topic(temperature_topic),
            battery_topic: valid_topic(battery_topic),
            raw_value_empty,
            raw_value_full,
            raw_unit,
        }),
        RawDescriptor::Battery {
            identity,
            capacity_ah,
            current_topic,
            power_topic,
            temperature_topic,
            voltage_topic,
            soc_topic,
            soh_topic,
        } => DeviceDescriptor::Battery(BatteryDescriptor {
            identity: resolve_identity(identity, "battery"),
            capacity_ah,
            current_topic: valid_topic(current_topic),
            power_topic: valid_topic(power_topic),
            temperature_topic: valid_topic(temperature_topic),
            voltage_topic: valid_topic(voltage_topic),
            soc_topic: valid_topic(soc_topic),
            soh_topic: valid_topic(soh_topic),
        }),
        RawDescriptor::PvCharger {
            identity,
            battery_current_topic,
            battery_voltage_topic,
            max_charge_voltage_topic,
            max_charge_current_topic,
            load_state_topic,
            charger_state_topic,
            pv_voltage_topic,
            pv_power_topic,
            total_yield_topic,
            system_yield_topic,
        } => DeviceDescriptor::PvCharger(PvChargerDescriptor {
            identity: resolve_identity(identity, "pv_charger"),
            battery_current_topic: valid_topic(battery_current_topic),
            battery_voltage_topic: valid_topic(battery_voltage_topic),
            max_charge_voltage_topic: valid_topic(max_charge_voltage_topic),
            max_charge_current_topic: valid_topic(max_charge_current_topic),
            load_state_topic: valid_topic(load_state_topic),
            charger_state_topic: valid_topic(charger_state_topic),
            pv_voltage_topic: valid_topic(pv_voltage_topic),
            pv_power_topic: valid_topic(pv_power_topic),
            total_yield_topic: valid_topic(total_yield_topic),
            system_yield_topic: valid_topic(system_yield_topic),
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, BridgeError> {
        let devices_file = env_or_default("DEVICES_FILE", "devices.json".to_string());
        let descriptors = load_descriptors(&devices_file)?;

        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required("MQTT_BROKER_HOST")?,
                broker_port: env_or_default("MQTT_BROKER_PORT", 1883),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                client_id: env_or_default("MQTT_CLIENT_ID", "mqtt-virtual-devices".to_string()),
            },
            settings_file: env_or_default("SETTINGS_FILE", "device_settings.json".to_string()),
            descriptors,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.mqtt.broker_host.is_empty() {
            return Err(BridgeError::Config("MQTT_BROKER_HOST must not be empty".into()));
        }
        if self.descriptors.is_empty() {
            return Err(BridgeError::Config("No devices found in devices file".into()));
        }
        validate_uniqueness(&self.descriptors)
    }
}

/// Device index, device instance, and serial must each be unique across the
/// whole registry.
pub fn validate_uniqueness(descriptors: &[DeviceDescriptor]) -> Result<(), BridgeError> {
    let mut indexes = HashSet::new();
    let mut instances = HashSet::new();
    let mut serials = HashSet::new();
    for descriptor in descriptors {
        let identity = descriptor.identity();
        if !indexes.insert(identity.device_index) {
            return Err(BridgeError::DuplicateIndex(identity.device_index));
        }
        if !instances.insert(identity.device_instance) {
            return Err(BridgeError::DuplicateInstance(identity.device_instance));
        }
        if !serials.insert(identity.serial.clone()) {
            return Err(BridgeError::DuplicateSerial(identity.serial.clone()));
        }
    }
    Ok(())
}

pub fn load_descriptors(path: &str) -> Result<Vec<DeviceDescriptor>, BridgeError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("Failed to read {path}: {e}")))?;
    parse_descriptors(&content)
        .map_err(|e| BridgeError::Config(format!("Failed to parse {path}: {e}")))
}

fn parse_descriptors(content: &str) -> Result<Vec<DeviceDescriptor>, serde_json::Error> {
    let raw: Vec<RawDescriptor> = serde_json::from_str(content)?;
    Ok(raw.into_iter().map(resolve_descriptor).collect())
}
