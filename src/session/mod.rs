//! Broker session lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Terminated
//!                                   |  ^
//!                                   v  |
//!                              Disconnected
//! ```
//!
//! `Disconnected -> Connected` is the reconnect path: rumqttc reconnects on
//! its own when the event loop is polled again, so the session never passes
//! through `Connecting` a second time.
//!
//! Broker notifications and scheduler ticks are queued into a single event
//! channel and handled one at a time by [`Session::run`], so the registry
//! is only ever touched by one reconciliation cycle.
//!
//! # Lifecycle
//!
//! - `Connecting`: last will registered, event loop started
//! - first `Connected`: publish `online`, reconcile once, start the scheduler
//! - later `Connected` (after a drop): also republish discovery for known clients
//! - connection lost: stop the scheduler, wait for the client library to reconnect
//! - Ctrl+C: publish `goodbye`, disconnect, exit 0
//! - refused first connection: exit non-zero

pub mod controller;
pub mod scheduler;

pub use controller::Session;
pub use scheduler::Scheduler;

use crate::config::Config;
use crate::mqtt::{mqtt_options, spawn_event_pump, BrokerEvent, Topics};
use crate::source::PivpnCommand;
use rumqttc::AsyncClient;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tracing::{info, warn};

/// Requests the client library may queue before publishing waits for room
const REQUEST_CAPACITY: usize = 64;
/// Pause between reconnect attempts after the connection drops
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// How long shutdown waits for the disconnect to reach the broker
const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to connect to MQTT broker: {0}")]
    Connect(String),
    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("Session event queue closed")]
    EventsClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Terminated,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Disconnected)
                | (Disconnected, Connected)
                | (Disconnected | Connecting | Connected, Terminated)
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Terminated => "Terminated",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Everything the session reacts to, in arrival order
#[derive(Debug)]
pub enum Event {
    Broker(BrokerEvent),
    /// Time for a cycle; reply (or drop) when it is done
    Tick(oneshot::Sender<()>),
}

impl From<BrokerEvent> for Event {
    fn from(event: BrokerEvent) -> Self {
        Event::Broker(event)
    }
}

fn log_settings(config: &Config) {
    info!("### SETTINGS Start ###");
    info!(
        "Connection: {}@{}:{} (client id {})",
        config.mqtt.user, config.mqtt.host, config.mqtt.port, config.mqtt.client_id
    );
    info!("Discovery topic prefix: {}", config.topics.discovery_prefix);
    info!("Topic prefix: {}", config.topics.topic_prefix);
    info!("VPN type: {}", config.vpn.backend);
    info!("Update interval: {}s", config.update_interval);
    info!("### SETTINGS End ###");
}

/// Connect to the broker and report until Ctrl+C or a fatal error
pub async fn run(config: Config) -> Result<(), SessionError> {
    let shutdown = Arc::new(Notify::new());
    let handler = shutdown.clone();
    ctrlc::set_handler(move || handler.notify_one())?;

    log_settings(&config);

    let topics = Topics::from_config(&config.topics);
    let (client, eventloop) =
        AsyncClient::new(mqtt_options(&config.mqtt, &topics), REQUEST_CAPACITY);
    let source = PivpnCommand::new(&config.vpn.command, config.command_timeout());

    let mut session = Session::new(
        config.vpn.backend,
        topics,
        config.interval(),
        source,
        client,
    );
    session.begin_connect();

    let pump = spawn_event_pump(eventloop, session.sender(), RECONNECT_DELAY);
    let result = session.run(&shutdown).await;

    if result.is_ok() {
        if tokio::time::timeout(FLUSH_TIMEOUT, pump).await.is_err() {
            warn!("Timed out waiting for the broker to disconnect");
        }
        info!("Clean exit");
    } else {
        pump.abort();
    }

    result
}
