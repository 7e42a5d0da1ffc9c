//! One reconciliation cycle
//!
//! 1. Take a fresh client snapshot
//! 2. Diff it against the registry
//! 3. Register arrived clients, retract departed ones
//! 4. Commit the snapshot, minus clients whose registration failed
//! 5. Republish attributes and state for every committed client
//!
//! # Error Handling
//!
//! A listing that fails or does not parse skips the whole cycle and leaves
//! the registry untouched. A client whose discovery message could not be
//! queued stays out of the registry, so the next cycle sees it arrive again
//! and retries. A failure for one client's attributes is logged and the
//! remaining clients are still published.

use crate::backend::{
    parse_listing, parse_record, Backend, ClientAttributes, ClientId, Layout, ParseError, Snapshot,
};
use crate::mqtt::{DiscoveryPublisher, Publisher, StatusPublisher, Topics};
use crate::registry::{Diff, Registry};
use crate::source::{AttributeProvider, SnapshotProvider, SourceError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// What one cycle did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub diff: Diff,
    /// Clients whose attributes and state were published
    pub refreshed: usize,
    /// Clients skipped because their record could not be fetched or published
    pub failed: usize,
}

/// Fetch and parse the current client list
pub async fn list_clients<S: SnapshotProvider>(
    source: &S,
    layout: &Layout,
) -> Result<Snapshot, CycleError> {
    let output = source.listing().await?;
    Ok(parse_listing(layout, &output)?)
}

/// Fetch and parse one client's attributes
pub async fn get_attributes<S: AttributeProvider>(
    source: &S,
    layout: &Layout,
    client: &ClientId,
) -> Result<ClientAttributes, CycleError> {
    let output = source.record(client).await?;
    Ok(parse_record(layout, client, &output)?)
}

pub struct Reconciler<S, P> {
    source: S,
    layout: &'static Layout,
    registry: Registry,
    discovery: DiscoveryPublisher<P>,
    status: StatusPublisher<P>,
}

impl<S, P> Reconciler<S, P>
where
    S: SnapshotProvider + AttributeProvider,
    P: Publisher + Clone,
{
    pub fn new(source: S, backend: Backend, publisher: P, topics: Topics) -> Self {
        Self {
            source,
            layout: backend.layout(),
            registry: Registry::new(),
            discovery: DiscoveryPublisher::new(publisher.clone(), topics.clone(), backend),
            status: StatusPublisher::new(publisher, topics),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn list_clients(&self) -> Result<Snapshot, CycleError> {
        list_clients(&self.source, self.layout).await
    }

    pub async fn get_attributes(&self, client: &ClientId) -> Result<ClientAttributes, CycleError> {
        get_attributes(&self.source, self.layout, client).await
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        debug!("Running reconciliation cycle");

        let snapshot = self.list_clients().await?;
        debug!("Current client list: {:?}", snapshot);

        let diff = self.registry.diff(&snapshot);
        if diff.is_empty() {
            debug!("Client lists are identical");
        } else {
            info!(
                "Client lists are different: new {:?}, removed {:?}",
                diff.arrived, diff.departed
            );
        }

        let mut unregistered = Vec::new();
        for client in &diff.arrived {
            if let Err(e) = self.discovery.register(client).await {
                warn!("Failed to register {}, retrying next cycle: {}", client, e);
                unregistered.push(client.clone());
            }
        }
        for client in &diff.departed {
            if let Err(e) = self.discovery.retract(client).await {
                warn!("Failed to retract {}: {}", client, e);
            }
        }

        self.registry.commit(snapshot.without(&unregistered));

        let (refreshed, failed) = self.refresh_status().await;

        Ok(CycleReport {
            diff,
            refreshed,
            failed,
        })
    }

    /// Republish discovery for every known client (after a reconnect)
    ///
    /// Clients that could not be registered are dropped from the registry so
    /// the next cycle registers them as new arrivals.
    pub async fn rediscover(&mut self) {
        let mut unregistered = Vec::new();
        for client in self.registry.current() {
            if let Err(e) = self.discovery.register(client).await {
                warn!("Failed to register {}, retrying next cycle: {}", client, e);
                unregistered.push(client.clone());
            }
        }

        if !unregistered.is_empty() {
            let kept = self.registry.current().without(&unregistered);
            self.registry.commit(kept);
        }
    }

    async fn refresh_status(&self) -> (usize, usize) {
        let mut refreshed = 0;
        let mut failed = 0;

        for client in self.registry.current() {
            debug!("Getting client attributes for {}", client);
            let published = match self.get_attributes(client).await {
                Ok(attributes) => self
                    .status
                    .publish(client, &attributes)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match published {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    warn!("Skipping status for {}: {}", client, e);
                    failed += 1;
                }
            }
        }

        (refreshed, failed)
    }
}
