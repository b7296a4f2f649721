pub mod client;

pub use client::{InboundMessage, MqttClient, OutboundCommand};
