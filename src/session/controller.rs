//! Session controller: the single consumer of session events

use super::{Event, Scheduler, SessionError, SessionState, FLUSH_TIMEOUT};
use crate::backend::Backend;
use crate::mqtt::{announce, Availability, Broker, BrokerEvent, Topics};
use crate::reconcile::Reconciler;
use crate::source::{AttributeProvider, SnapshotProvider};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

pub struct Session<S, B> {
    state: SessionState,
    broker: B,
    topics: Topics,
    reconciler: Reconciler<S, B>,
    scheduler: Scheduler,
    events_tx: UnboundedSender<Event>,
    events_rx: UnboundedReceiver<Event>,
    connected_once: bool,
}

impl<S, B> Session<S, B>
where
    S: SnapshotProvider + AttributeProvider,
    B: Broker + Clone,
{
    pub fn new(backend: Backend, topics: Topics, interval: Duration, source: S, broker: B) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: SessionState::Disconnected,
            reconciler: Reconciler::new(source, backend, broker.clone(), topics.clone()),
            broker,
            topics,
            scheduler: Scheduler::new(interval),
            events_tx,
            events_rx,
            connected_once: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Queue for broker notifications
    pub fn sender(&self) -> UnboundedSender<Event> {
        self.events_tx.clone()
    }

    pub fn begin_connect(&mut self) {
        self.transition(SessionState::Connecting);
    }

    /// Handle events until shutdown is requested or the connection is refused
    ///
    /// Shutdown wins over whatever event is being handled: an in-flight
    /// cycle is abandoned, not drained.
    pub async fn run(&mut self, shutdown: &Notify) -> Result<(), SessionError> {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.notified() => None,
                result = self.next_event() => Some(result),
            };

            match outcome {
                None => {
                    self.terminate().await;
                    return Ok(());
                }
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    error!("{}", e);
                    self.scheduler.cancel();
                    self.transition(SessionState::Terminated);
                    return Err(e);
                }
            }
        }
    }

    async fn next_event(&mut self) -> Result<(), SessionError> {
        match self.events_rx.recv().await {
            Some(event) => self.handle(event).await,
            None => Err(SessionError::EventsClosed),
        }
    }

    async fn handle(&mut self, event: Event) -> Result<(), SessionError> {
        match event {
            Event::Broker(BrokerEvent::Connected) => self.on_connected().await,
            Event::Broker(BrokerEvent::Refused(reason)) => {
                if self.state == SessionState::Connecting {
                    return Err(SessionError::Connect(reason));
                }
                warn!("Broker refused connection: {}", reason);
            }
            Event::Broker(BrokerEvent::Lost(reason)) => self.on_lost(&reason),
            Event::Tick(done) => {
                self.on_tick().await;
                let _ = done.send(());
            }
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            debug!("Ignoring session transition {} -> {}", self.state, next);
            return false;
        }
        info!("Session {} -> {}", self.state, next);
        self.state = next;
        true
    }

    async fn on_connected(&mut self) {
        if !self.transition(SessionState::Connected) {
            return;
        }

        announce(&self.broker, &self.topics, Availability::Online).await;

        if self.connected_once {
            self.reconciler.rediscover().await;
        }
        self.connected_once = true;

        self.reconcile().await;
        self.scheduler.start(self.events_tx.clone());
    }

    fn on_lost(&mut self, reason: &str) {
        warn!("Disconnected from broker: {}", reason);
        self.scheduler.cancel();
        self.transition(SessionState::Disconnected);
    }

    async fn on_tick(&mut self) {
        if self.state != SessionState::Connected {
            debug!("Not connected ({}), skipping cycle", self.state);
            return;
        }
        self.reconcile().await;
    }

    async fn reconcile(&mut self) {
        match self.reconciler.run_cycle().await {
            Ok(report) => debug!(
                "Cycle done: {} new, {} removed, {} refreshed, {} failed",
                report.diff.arrived.len(),
                report.diff.departed.len(),
                report.refreshed,
                report.failed
            ),
            Err(e) => warn!("Skipping cycle: {}", e),
        }
    }

    async fn terminate(&mut self) {
        info!("Received shutdown request");
        self.scheduler.cancel();
        let goodbye = announce(&self.broker, &self.topics, Availability::Goodbye);
        if tokio::time::timeout(FLUSH_TIMEOUT, goodbye).await.is_err() {
            warn!("Request queue full, leaving without goodbye");
        }
        if let Err(e) = self.broker.disconnect() {
            warn!("{}", e);
        }
        self.transition(SessionState::Terminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::discovery::RETRACT_PAYLOAD;
    use crate::mqtt::testing::RecordingBroker;
    use crate::reconcile::testing::FakeSource;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    const INTERVAL: Duration = Duration::from_millis(20);

    type TestSession = Session<FakeSource, Arc<RecordingBroker>>;

    fn session(source: &FakeSource) -> (TestSession, Arc<RecordingBroker>) {
        let broker = Arc::new(RecordingBroker::default());
        let mut session = Session::new(
            Backend::WireGuard,
            Topics::new("ha", "vpn"),
            INTERVAL,
            source.clone(),
            broker.clone(),
        );
        session.begin_connect();
        (session, broker)
    }

    fn discovery_count(broker: &RecordingBroker, client: &str) -> usize {
        broker
            .on(&format!("ha/{}/config", client))
            .iter()
            .filter(|m| m.payload != RETRACT_PAYLOAD)
            .count()
    }

    #[tokio::test]
    async fn test_first_connect_announces_and_reconciles() {
        let source = FakeSource::with_clients(&["alice", "bob"]);
        let (mut session, broker) = session(&source);
        assert_eq!(session.state(), SessionState::Connecting);

        session.handle(BrokerEvent::Connected.into()).await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        let messages = broker.messages();
        assert_eq!(messages[0].topic, "vpn/status");
        assert_eq!(messages[0].payload, "online");
        assert!(messages[0].retain);
        assert_eq!(discovery_count(&broker, "alice"), 1);
        assert_eq!(discovery_count(&broker, "bob"), 1);
        assert_eq!(broker.on("vpn/bob/state").len(), 1);
        assert!(session.scheduler.is_running());
    }

    #[tokio::test]
    async fn test_refused_while_connecting_is_fatal() {
        let source = FakeSource::with_clients(&["alice"]);
        let (mut session, broker) = session(&source);
        let shutdown = Notify::new();

        session
            .sender()
            .send(BrokerEvent::Refused("connection refused".to_string()).into())
            .unwrap();
        let result = session.run(&shutdown).await;

        assert!(matches!(result, Err(SessionError::Connect(_))));
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_lost_connection_stops_cycles() {
        let source = FakeSource::with_clients(&["alice"]);
        let (mut session, broker) = session(&source);
        session.handle(BrokerEvent::Connected.into()).await.unwrap();

        session
            .handle(BrokerEvent::Lost("keep alive timeout".to_string()).into())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.scheduler.is_running());

        broker.clear();
        let (done, finished) = oneshot::channel();
        session.handle(Event::Tick(done)).await.unwrap();
        finished.await.unwrap();
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_rediscovers_known_clients() {
        let source = FakeSource::with_clients(&["alice"]);
        let (mut session, broker) = session(&source);
        session.handle(BrokerEvent::Connected.into()).await.unwrap();
        session
            .handle(BrokerEvent::Lost("reset".to_string()).into())
            .await
            .unwrap();
        broker.clear();

        session.handle(BrokerEvent::Connected.into()).await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(broker.on("vpn/status")[0].payload, "online");
        // Known client re-registered even though the diff is empty
        assert_eq!(discovery_count(&broker, "alice"), 1);
        assert_eq!(broker.on("vpn/alice/state").len(), 1);
        assert!(session.scheduler.is_running());
    }

    #[tokio::test]
    async fn test_tick_runs_cycle_when_connected() {
        let source = FakeSource::with_clients(&["alice"]);
        let (mut session, broker) = session(&source);
        session.handle(BrokerEvent::Connected.into()).await.unwrap();
        broker.clear();

        source.set_clients(&["alice", "bob"]);
        let (done, finished) = oneshot::channel();
        session.handle(Event::Tick(done)).await.unwrap();

        assert!(finished.await.is_ok());
        assert_eq!(discovery_count(&broker, "bob"), 1);
        assert_eq!(discovery_count(&broker, "alice"), 0);
    }

    #[tokio::test]
    async fn test_shutdown_says_goodbye() {
        let source = FakeSource::with_clients(&["alice"]);
        let (mut session, broker) = session(&source);
        session.handle(BrokerEvent::Connected.into()).await.unwrap();
        broker.clear();

        let shutdown = Notify::new();
        shutdown.notify_one();
        session.run(&shutdown).await.unwrap();

        assert_eq!(session.state(), SessionState::Terminated);
        assert!(!session.scheduler.is_running());
        let goodbye = broker.on("vpn/status");
        assert_eq!(goodbye.len(), 1);
        assert_eq!(goodbye[0].payload, "goodbye");
        assert!(goodbye[0].retain);
        assert!(broker.is_disconnected());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_cycle_in_flight() {
        let source = FakeSource::with_clients(&["alice"]);
        let (mut session, broker) = session(&source);
        session.handle(BrokerEvent::Connected.into()).await.unwrap();
        broker.clear();

        source.stall_listing();
        let (done, finished) = oneshot::channel();
        session.sender().send(Event::Tick(done)).unwrap();

        let shutdown = Arc::new(Notify::new());
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(INTERVAL * 5).await;
            trigger.notify_one();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), session.run(&shutdown))
            .await
            .expect("shutdown should not wait for the stalled cycle");
        assert!(result.is_ok());

        assert_eq!(session.state(), SessionState::Terminated);
        let goodbye = broker.on("vpn/status");
        assert_eq!(goodbye.len(), 1);
        assert_eq!(goodbye[0].payload, "goodbye");
        assert!(goodbye[0].retain);
        assert!(broker.is_disconnected());
        assert!(broker.on("vpn/alice/state").is_empty());
        // The abandoned tick was dropped, which releases the scheduler
        assert!(finished.await.is_err());
    }

    #[tokio::test]
    async fn test_scheduler_drives_cycles() {
        let source = FakeSource::with_clients(&["alice"]);
        let (mut session, broker) = session(&source);
        let shutdown = Notify::new();

        session.sender().send(BrokerEvent::Connected.into()).unwrap();
        let _ = tokio::time::timeout(INTERVAL * 10, session.run(&shutdown)).await;

        // Initial cycle plus at least one scheduled cycle
        assert!(broker.on("vpn/alice/state").len() >= 2);
        assert_eq!(discovery_count(&broker, "alice"), 1);
        assert_eq!(session.state(), SessionState::Connected);
    }
}
