//! MQTT publishing for Home Assistant
//!
//! Topic layout (prefixes are configurable):
//!
//! | Topic | Retained | Payload |
//! |-------|----------|---------|
//! | `{topic_prefix}/status` | yes | `online`, `offline` or `goodbye` |
//! | `{discovery_prefix}/{client}/config` | yes | discovery JSON, `{}` to retract |
//! | `{topic_prefix}/{client}/attr` | no | attributes JSON |
//! | `{topic_prefix}/{client}/state` | no | state text |
//!
//! All publishes are fire-and-forget: they wait for room in the broker
//! client's request queue, never for an acknowledgment from the broker.

pub mod client;
pub mod discovery;
pub mod status;

pub use client::{mqtt_options, spawn_event_pump, BrokerEvent};
pub use discovery::{DiscoveryConfig, DiscoveryPublisher};
pub use status::StatusPublisher;

use crate::backend::ClientId;
use crate::config::TopicConfig;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to queue message for {topic}: {message}")]
    Queue { topic: String, message: String },
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to request disconnect: {0}")]
    Disconnect(String),
}

/// Queues a message on the broker connection without waiting for delivery
pub trait Publisher {
    fn publish(
        &self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// A publisher whose connection can be closed
pub trait Broker: Publisher {
    fn disconnect(&self) -> Result<(), PublishError>;
}

impl<T: Publisher + Send + Sync + ?Sized> Publisher for Arc<T> {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError> {
        (**self).publish(topic, payload, retain).await
    }
}

impl<T: Broker + Send + Sync + ?Sized> Broker for Arc<T> {
    fn disconnect(&self) -> Result<(), PublishError> {
        (**self).disconnect()
    }
}

/// Reporter availability, published retained on the status topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Online,
    /// Sent by the broker as our last will
    Offline,
    /// Sent on a clean shutdown
    Goodbye,
}

impl Availability {
    pub fn as_str(self) -> &'static str {
        match self {
            Availability::Online => "online",
            Availability::Offline => "offline",
            Availability::Goodbye => "goodbye",
        }
    }
}

/// Topic names for one installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    discovery_prefix: String,
    topic_prefix: String,
}

impl Topics {
    pub fn new(discovery_prefix: &str, topic_prefix: &str) -> Self {
        Self {
            discovery_prefix: discovery_prefix.trim_end_matches('/').to_string(),
            topic_prefix: topic_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &TopicConfig) -> Self {
        Self::new(&config.discovery_prefix, &config.topic_prefix)
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.topic_prefix)
    }

    pub fn discovery(&self, client: &ClientId) -> String {
        format!("{}/{}/config", self.discovery_prefix, client)
    }

    pub fn state(&self, client: &ClientId) -> String {
        format!("{}/{}/state", self.topic_prefix, client)
    }

    pub fn attributes(&self, client: &ClientId) -> String {
        format!("{}/{}/attr", self.topic_prefix, client)
    }
}

/// Publish the reporter's availability, logging instead of failing
pub async fn announce<P: Publisher + ?Sized>(
    publisher: &P,
    topics: &Topics,
    availability: Availability,
) {
    let topic = topics.status();
    match publisher.publish(&topic, availability.as_str(), true).await {
        Ok(()) => debug!("Published {} to {}", availability.as_str(), topic),
        Err(e) => warn!("Failed to publish {}: {}", availability.as_str(), e),
    }
}
