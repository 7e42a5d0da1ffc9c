//! rumqttc wiring
//!
//! rumqttc splits a connection into an [`AsyncClient`] (cheap to clone, used
//! to queue requests) and an [`EventLoop`] that must be polled for anything
//! to reach the network. The event loop runs in its own task and reports
//! connection changes back to the session as [`BrokerEvent`]s.

use super::{Availability, Broker, PublishError, Publisher, Topics};
use crate::config::MqttConfig;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing,
    QoS,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Connection changes seen by the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The broker acknowledged the connection
    Connected,
    /// The first connection attempt failed
    Refused(String),
    /// An established connection dropped
    Lost(String),
}

/// Connection options, including the last will
///
/// The will must be set before the first poll opens the connection, so the
/// broker announces `offline` if this process dies without saying goodbye.
pub fn mqtt_options(config: &MqttConfig, topics: &Topics) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive));
    options.set_credentials(&config.user, &config.password);
    options.set_last_will(LastWill::new(
        topics.status(),
        Availability::Offline.as_str(),
        QoS::AtMostOnce,
        true,
    ));
    options
}

/// Waits for room in the request queue, not for the broker
impl Publisher for AsyncClient {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError> {
        AsyncClient::publish(self, topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())
            .await
            .map_err(|e| PublishError::Queue {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

impl Broker for AsyncClient {
    fn disconnect(&self) -> Result<(), PublishError> {
        self.try_disconnect()
            .map_err(|e| PublishError::Disconnect(e.to_string()))
    }
}

/// Drive the event loop until we disconnect or the session goes away
///
/// Only the first failure before any successful connection is reported as
/// [`BrokerEvent::Refused`]. Later failures become [`BrokerEvent::Lost`] and
/// polling continues after `retry`, which is how rumqttc reconnects.
pub fn spawn_event_pump<E>(
    mut eventloop: EventLoop,
    events: UnboundedSender<E>,
    retry: Duration,
) -> JoinHandle<()>
where
    E: From<BrokerEvent> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ever_connected = false;
        let mut connected = false;

        loop {
            let failure = match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack)))
                    if ack.code == ConnectReturnCode::Success =>
                {
                    info!("Connection successful");
                    ever_connected = true;
                    connected = true;
                    if events.send(BrokerEvent::Connected.into()).is_err() {
                        break;
                    }
                    continue;
                }
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    format!("connection refused: {:?}", ack.code)
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("Disconnect sent, stopping event loop");
                    break;
                }
                Ok(event) => {
                    trace!("MQTT event: {:?}", event);
                    continue;
                }
                Err(e) => e.to_string(),
            };

            if !ever_connected {
                let _ = events.send(BrokerEvent::Refused(failure).into());
                break;
            }

            if connected {
                warn!("Connection lost: {}", failure);
                connected = false;
                if events.send(BrokerEvent::Lost(failure).into()).is_err() {
                    break;
                }
            } else {
                debug!("Reconnect failed: {}", failure);
            }

            tokio::time::sleep(retry).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_options_carry_last_will() {
        let config = Config::default();
        let topics = Topics::new("ha", "vpn");
        let options = mqtt_options(&config.mqtt, &topics);

        assert_eq!(options.broker_address(), ("homeassistant.local".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert_eq!(
            options.credentials(),
            Some(("mqttuser".to_string(), "changeme".to_string()))
        );

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "vpn/status");
        assert_eq!(&will.message[..], b"offline");
        assert!(will.retain);
    }

    #[tokio::test]
    async fn test_publish_waits_for_queue_space() {
        let options = mqtt_options(&Config::default().mqtt, &Topics::new("ha", "vpn"));
        // Event loop kept alive but never polled, so the queue never drains
        let (client, _eventloop) = AsyncClient::new(options, 1);

        Publisher::publish(&client, "vpn/alice/state", "(not yet)", false)
            .await
            .unwrap();
        let second = tokio::time::timeout(
            Duration::from_millis(50),
            Publisher::publish(&client, "vpn/bob/state", "(not yet)", false),
        )
        .await;
        assert!(second.is_err(), "a full queue should delay, not reject");
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_refused() {
        let mut config = Config::default().mqtt;
        // Nothing listens on the discard port
        config.host = "127.0.0.1".to_string();
        config.port = 9;
        let options = mqtt_options(&config, &Topics::new("ha", "vpn"));
        let (_client, eventloop) = AsyncClient::new(options, 10);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<BrokerEvent>();
        let pump = spawn_event_pump(eventloop, tx, Duration::from_millis(10));

        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(BrokerEvent::Refused(_))));
        pump.await.unwrap();
    }
}
