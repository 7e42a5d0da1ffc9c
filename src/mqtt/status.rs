//! Per-client attribute and state messages
//!
//! Republished every cycle for every known client, whether or not the
//! client list changed. Neither message is retained: they describe the
//! current session only.

use super::{PublishError, Publisher, Topics};
use crate::backend::{ClientAttributes, ClientId};
use tracing::debug;

pub struct StatusPublisher<P> {
    publisher: P,
    topics: Topics,
}

impl<P: Publisher> StatusPublisher<P> {
    pub fn new(publisher: P, topics: Topics) -> Self {
        Self { publisher, topics }
    }

    pub async fn publish(
        &self,
        client: &ClientId,
        attributes: &ClientAttributes,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_string(attributes)?;
        debug!("Client attributes for {}: {}", client, payload);
        self.publisher
            .publish(&self.topics.attributes(client), &payload, false)
            .await?;

        debug!("Client state for {}: {}", client, attributes.state());
        self.publisher
            .publish(&self.topics.state(client), attributes.state(), false)
            .await
    }
}
