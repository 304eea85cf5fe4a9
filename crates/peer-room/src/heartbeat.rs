//! Presence heartbeat engine.
//!
//! Periodically broadcasts the room's heartbeat marker and prunes stale
//! members on the same tick. A missed heartbeat is never fatal: publish
//! failures from the timer are logged and dropped.

use crate::presence::MembershipTracker;
use crate::transport::{PubSub, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Drives heartbeats and pruning for one room.
pub struct HeartbeatEngine {
    topic: String,
    interval: Duration,
    transport: Arc<dyn PubSub>,
    tracker: Arc<MembershipTracker>,
    enabled: Arc<AtomicBool>,
    /// Room-wide shutdown signal; each run uses a child of it
    room_cancel: CancellationToken,
    running: Mutex<Option<Running>>,
}

impl HeartbeatEngine {
    pub fn new(
        topic: String,
        interval: Duration,
        transport: Arc<dyn PubSub>,
        tracker: Arc<MembershipTracker>,
        enabled: Arc<AtomicBool>,
        room_cancel: CancellationToken,
    ) -> Self {
        Self {
            topic,
            interval,
            transport,
            tracker,
            enabled,
            room_cancel,
            running: Mutex::new(None),
        }
    }

    /// Start the timer. The first tick fires immediately.
    ///
    /// No-op if already running or if the room has shut down.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() || self.room_cancel.is_cancelled() {
            return;
        }

        let cancel = self.room_cancel.child_token();
        let engine = Arc::clone(self);
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = run_cancel.cancelled() => break,
                    _ = ticker.tick() => engine.tick().await,
                }
            }
            trace!("Heartbeat loop for {} stopped", engine.topic);
        });

        debug!("Heartbeat started on {} every {:?}", self.topic, self.interval);
        *running = Some(Running { cancel, task });
    }

    /// Stop the timer. Safe to call repeatedly and from any thread.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(running) = running {
            running.cancel.cancel();
            running.task.abort();
            debug!("Heartbeat stopped on {}", self.topic);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// One timer firing: heartbeat (errors swallowed), then prune.
    pub async fn tick(&self) {
        if let Err(e) = self.broadcast().await {
            if e.is_cancelled() {
                trace!("Heartbeat on {} cancelled", self.topic);
            } else {
                debug!("Missed heartbeat on {}: {}", self.topic, e);
            }
        }
        self.tracker.prune(Instant::now());
    }

    /// Publish the marker once if heartbeats are enabled.
    pub async fn broadcast(&self) -> Result<(), TransportError> {
        if !self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }

        let marker = self.tracker.heartbeat_marker();
        self.transport
            .publish(&self.topic, marker, &self.room_cancel)
            .await
    }
}

impl Drop for HeartbeatEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
