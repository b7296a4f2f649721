mod config;
mod device;
mod discovery;
mod error;
mod mqtt;
mod payload;
mod persist;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use device::registry::{BridgeHandle, DeviceRegistry, LogExporter, PropertyExporter};
use device::WriteEffect;
use discovery::DiscoveryMap;
use mqtt::{InboundMessage, OutboundCommand};
use persist::{JsonFileSink, PersistenceSink};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let mut registry = match DeviceRegistry::build(config.descriptors.clone()) {
        Ok(r) => r,
        Err(e) => {
            error!("Device registry error: {}", e);
            std::process::exit(1);
        }
    };

    let subscriptions = registry.subscription_topics();
    info!(
        "Starting MQTT virtual device bridge (mqtt={}:{}, devices={}, topics={})",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        registry.devices().len(),
        subscriptions.len(),
    );

    persist::check_settings_path(&config.settings_file);
    let mut sink = match JsonFileSink::open(&config.settings_file) {
        Ok(s) => s,
        Err(e) => {
            error!("Settings file error: {}", e);
            std::process::exit(1);
        }
    };

    // Channels
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(200);
    let (command_tx, command_rx) = mpsc::channel::<OutboundCommand>(100);
    let (write_tx, mut write_rx) = mpsc::channel(50);

    // Attachment point for an exposure frontend: whatever presents the
    // devices externally clones this handle and sends PropertyWriteRequests
    // through it. No frontend ships in this binary, so the handle is held
    // here only to keep the write channel open; the loop below stays the
    // sole owner of device state either way.
    let _bridge_handle = BridgeHandle::new(write_tx);

    let mqtt_client = mqtt::MqttClient::new(&config.mqtt);
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_client.run(subscriptions, inbound_tx, command_rx).await {
            error!("MQTT task failed: {}", e);
        }
    });

    let mut exporter = LogExporter;
    let mut discovery = DiscoveryMap::new();
    let mut discovered = 0;
    let mut exit_code = 0;

    // Main loop: the single writer over all device state.
    loop {
        tokio::select! {
            msg = inbound_rx.recv() => {
                let Some(msg) = msg else {
                    error!("MQTT loop terminated, shutting down");
                    exit_code = 1;
                    break;
                };
                if let Some(classified) = discovery::classify(&msg.topic) {
                    discovery.observe(&msg.topic);
                    let count = discovery.modules().count();
                    if count > discovered {
                        discovered = count;
                        info!(
                            "Discovered {:?} module {}",
                            classified.family, classified.module_serial,
                        );
                    }
                }
                for event in registry.dispatch(&msg.topic, &msg.payload) {
                    exporter.export(&event);
                }
            }
            Some(request) = write_rx.recv() => {
                let Some(outcome) =
                    registry.handle_property_write(&request.serial, &request.path, &request.value)
                else {
                    warn!("Write request for unknown serial {}", request.serial);
                    continue;
                };
                if !outcome.accepted {
                    continue;
                }
                for effect in outcome.effects {
                    match effect {
                        WriteEffect::Publish { topic, payload } => {
                            if command_tx
                                .send(OutboundCommand { topic, payload })
                                .await
                                .is_err()
                            {
                                warn!("Command channel closed");
                            }
                        }
                        WriteEffect::Persist { section, key, value } => {
                            if let Err(e) = sink.persist(&section, &key, &value) {
                                error!("Failed to persist {}.{}: {}", section, key, e);
                            }
                        }
                    }
                }
                if let Some(service) = registry.service_for_serial(&request.serial) {
                    let service = service.to_string();
                    for update in outcome.updates {
                        exporter.export(&device::registry::PropertyEvent {
                            service: service.clone(),
                            path: update.path,
                            value: update.value,
                        });
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = async {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("Failed to register SIGTERM handler");
                sigterm.recv().await;
            } => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    mqtt_handle.abort();
    info!("MQTT virtual device bridge stopped");
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}
