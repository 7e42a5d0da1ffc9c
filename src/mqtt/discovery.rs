//! Home Assistant MQTT discovery
//!
//! Each client becomes one sensor entity. Its config message is retained so
//! Home Assistant rediscovers every client after a restart; publishing `{}`
//! retained to the same topic removes the entity.

use super::{PublishError, Publisher, Topics};
use crate::backend::{Backend, ClientId};
use serde::Serialize;
use tracing::debug;

/// Payload that tells Home Assistant to drop an entity
pub const RETRACT_PAYLOAD: &str = "{}";

const ICON: &str = "mdi:vpn";
const DEVICE_IDENTIFIER: &str = "vpncltmon";
const DEVICE_NAME: &str = "VPN Client Monitor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryConfig {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    pub icon: &'static str,
    pub json_attributes_topic: String,
    pub dev: Device,
}

/// Groups every client of this installation under one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub identifiers: Vec<&'static str>,
    pub manufacturer: &'static str,
    pub name: &'static str,
}

impl DiscoveryConfig {
    pub fn new(backend: Backend, topics: &Topics, client: &ClientId) -> Self {
        Self {
            name: format!("VPN Client {}", title_case(client.as_str())),
            unique_id: unique_id(backend, client),
            state_topic: topics.state(client),
            availability_topic: topics.status(),
            icon: ICON,
            json_attributes_topic: topics.attributes(client),
            dev: Device {
                identifiers: vec![DEVICE_IDENTIFIER],
                manufacturer: backend.as_str(),
                name: DEVICE_NAME,
            },
        }
    }
}

/// `VPN<Backend><client>Client`
///
/// The backend names differ at their first character and the client name is
/// wrapped in a fixed prefix and suffix, so distinct inputs never collide.
pub fn unique_id(backend: Backend, client: &ClientId) -> String {
    format!("VPN{}{}Client", backend, client)
}

/// Upper-case letters that start a word, lower-case the rest
///
/// A word starts at any letter not preceded by another letter, so
/// `bob-laptop2go` becomes `Bob-Laptop2Go`.
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_is_letter = false;
    for c in name.chars() {
        if prev_is_letter {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_is_letter = c.is_alphabetic();
    }
    out
}

/// Registers and retracts client entities
pub struct DiscoveryPublisher<P> {
    publisher: P,
    topics: Topics,
    backend: Backend,
}

impl<P: Publisher> DiscoveryPublisher<P> {
    pub fn new(publisher: P, topics: Topics, backend: Backend) -> Self {
        Self {
            publisher,
            topics,
            backend,
        }
    }

    pub async fn register(&self, client: &ClientId) -> Result<(), PublishError> {
        debug!("Publishing discovery for {}", client);
        let config = DiscoveryConfig::new(self.backend, &self.topics, client);
        let payload = serde_json::to_string(&config)?;
        self.publisher
            .publish(&self.topics.discovery(client), &payload, true)
            .await
    }

    pub async fn retract(&self, client: &ClientId) -> Result<(), PublishError> {
        debug!("Removing discovery for {}", client);
        self.publisher
            .publish(&self.topics.discovery(client), RETRACT_PAYLOAD, true)
            .await
    }
}
