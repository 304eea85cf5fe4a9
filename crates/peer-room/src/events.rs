//! Event infrastructure for rooms.
//!
//! Provides `RoomEvent` for membership and message notifications, `EventBus`
//! for subscriptions, and the dispatcher task that is a room's single delivery
//! channel: state changes enqueue events, the dispatcher invokes callbacks in
//! enqueue order, never while room state is locked.

use crate::transport::{InboundMessage, Peer};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Events raised by a room.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomEvent {
    /// Peers joined or left the connected set.
    MembershipChanged {
        /// Peers that joined, in join order.
        added: Vec<Peer>,
        /// Peers that were evicted.
        removed: Vec<Peer>,
    },
    /// Application message from a connected peer.
    MessageReceived(InboundMessage),
}

impl RoomEvent {
    pub(crate) fn joined(peer: Peer) -> Self {
        RoomEvent::MembershipChanged {
            added: vec![peer],
            removed: Vec::new(),
        }
    }

    pub(crate) fn left(peers: Vec<Peer>) -> Self {
        RoomEvent::MembershipChanged {
            added: Vec::new(),
            removed: peers,
        }
    }

    pub(crate) fn message(message: InboundMessage) -> Self {
        RoomEvent::MessageReceived(message)
    }
}

type Callback = Arc<dyn Fn(&RoomEvent) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing room events to subscribers.
///
/// Thread-safe. Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&RoomEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Emit an event to all subscribers.
    ///
    /// A panicking callback is logged and skipped; the remaining callbacks
    /// still receive the event.
    pub fn emit(&self, event: &RoomEvent) {
        // Clone the callback list so callbacks may subscribe or unsubscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!("Room event handler panicked; continuing with remaining handlers");
            }
        }
    }
}

/// Spawn the dispatcher task that drains `rx` into `bus`.
///
/// Runs until every sender is dropped or `cancel` fires; on cancellation the
/// events already queued are still delivered.
pub(crate) fn spawn_dispatcher(
    bus: Arc<EventBus>,
    mut rx: mpsc::UnboundedReceiver<RoomEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => bus.emit(&event),
                    None => break,
                },
                _ = cancel.cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        bus.emit(&event);
                    }
                    break;
                }
            }
        }
    })
}
