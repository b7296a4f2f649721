use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::MqttConfig;
use crate::error::BridgeError;

/// A broker message on its way to the device registry.
#[derive(Debug)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A command publish on its way out. Commands are one-shot state requests
/// and are never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub topic: String,
    pub payload: String,
}

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttClient {
    pub fn new(config: &MqttConfig) -> Self {
        let mut mqttopts =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        mqttopts.set_keep_alive(std::time::Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            mqttopts.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self { client, eventloop }
    }

    /// Run the MQTT event loop. Subscribes to the registry's topic union on
    /// every (re)connect, forwards incoming publishes through inbound_tx, and
    /// publishes device commands received from command_rx.
    ///
    /// An error before the first ConnAck is returned so startup against an
    /// unreachable broker fails loudly. After that, connection errors are
    /// retried on a fixed delay and the broker session's resubscribe happens
    /// on the next ConnAck.
    pub async fn run(
        mut self,
        subscriptions: Vec<String>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        mut command_rx: mpsc::Receiver<OutboundCommand>,
    ) -> Result<(), BridgeError> {
        let mut connected_once = false;

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("Connected to MQTT broker");
                            connected_once = true;
                            for topic in &subscriptions {
                                if let Err(e) =
                                    self.client.subscribe(topic, QoS::AtLeastOnce).await
                                {
                                    error!("Failed to subscribe to {}: {}", topic, e);
                                }
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let msg = InboundMessage {
                                topic: publish.topic.clone(),
                                payload: publish.payload.to_vec(),
                            };
                            if inbound_tx.send(msg).await.is_err() {
                                warn!("Inbound channel closed, stopping MQTT loop");
                                return Ok(());
                            }
                        }
                        Ok(_) => {}
                        Err(e) if !connected_once => {
                            return Err(BridgeError::Broker(format!(
                                "failed to connect to MQTT broker: {e}"
                            )));
                        }
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        return Ok(());
                    };
                    info!("Publishing {}: {}", command.topic, command.payload);
                    if let Err(e) = self
                        .client
                        .publish(
                            &command.topic,
                            QoS::AtLeastOnce,
                            false,
                            command.payload.as_bytes(),
                        )
                        .await
                    {
                        warn!("Failed to publish {}: {}", command.topic, e);
                    }
                }
            }
        }
    }
}
