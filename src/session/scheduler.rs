//! Periodic reconciliation trigger
//!
//! The scheduler sends one [`Event::Tick`] per interval into the session's
//! event queue. Each tick carries a completion handle, and the next interval
//! only starts once the session has finished (or dropped) the previous tick,
//! so cycles never overlap.

use super::Event;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Scheduler {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start ticking; restarts the timer if already running
    pub fn start(&mut self, events: UnboundedSender<Event>) {
        self.cancel();
        debug!("Starting scheduler, interval {:?}", self.interval);

        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let (done, finished) = oneshot::channel();
                if events.send(Event::Tick(done)).is_err() {
                    break;
                }
                // Dropped without a reply still counts as finished
                let _ = finished.await;
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Stopping scheduler");
            task.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
