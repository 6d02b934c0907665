//! Lifecycle events delivered to the application.
//!
//! Two ways to listen:
//! - [`EventBus::subscribe`] registers a callback, run synchronously on emit.
//!   A panicking callback is logged and skipped; the others still run.
//! - [`EventBus::receiver`] hands out a `broadcast` receiver for async
//!   consumers. Slow receivers lag instead of blocking the emitter.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{error, trace};

use crate::record::now_millis;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncEventKind {
    SyncStart,
    SyncProgress,
    SyncComplete,
    SyncError,
    ConflictDetected,
    ItemQueued,
    ConnectivityChanged,
}

impl std::fmt::Display for SyncEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SyncStart => "sync-start",
            Self::SyncProgress => "sync-progress",
            Self::SyncComplete => "sync-complete",
            Self::SyncError => "sync-error",
            Self::ConflictDetected => "conflict-detected",
            Self::ItemQueued => "item-queued",
            Self::ConnectivityChanged => "connectivity-changed",
        };
        f.write_str(s)
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub kind: SyncEventKind,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Percentage, 0.0 to 100.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl SyncEvent {
    pub fn new(kind: SyncEventKind) -> Self {
        Self {
            kind,
            timestamp: now_millis(),
            data: None,
            error: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress.clamp(0.0, 100.0));
        self
    }
}

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Listener)>>,
}

/// Fan-out of [`SyncEvent`]s to callbacks and broadcast receivers.
#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<Listeners>,
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            listeners: Arc::new(Listeners {
                next_id: AtomicU64::new(1),
                entries: RwLock::new(Vec::new()),
            }),
            sender,
        }
    }

    /// Register a callback. Keep the returned handle to unsubscribe later.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.entries.write().push((id, Arc::new(callback)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn receiver(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.entries.read().len()
    }

    pub fn emit(&self, event: SyncEvent) {
        trace!(kind = %event.kind, "Emitting event");

        // Snapshot so callbacks may (un)subscribe without deadlocking
        let snapshot: Vec<(u64, Listener)> = self.listeners.entries.read().clone();
        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(listener = id, kind = %event.kind, "Event listener panicked");
            }
        }

        // No receivers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Remove the callback. No-op if the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.entries.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_callbacks_receive_events() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let _sub = bus.subscribe(move |e| {
            assert_eq!(e.kind, SyncEventKind::SyncStart);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(SyncEvent::new(SyncEventKind::SyncStart));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let _bad = bus.subscribe(|_| panic!("listener failure"));
        let seen_clone = seen.clone();
        let _good = bus.subscribe(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(SyncEvent::new(SyncEventKind::SyncError));
        bus.emit(SyncEvent::new(SyncEventKind::SyncComplete));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let sub = bus.subscribe(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.listener_count(), 1);

        sub.unsubscribe();
        bus.emit(SyncEvent::new(SyncEventKind::SyncStart));

        assert_eq!(bus.listener_count(), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broadcast_receiver() {
        let bus = EventBus::new();
        let mut rx = bus.receiver();

        bus.emit(SyncEvent::new(SyncEventKind::SyncProgress).with_progress(150.0));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, SyncEventKind::SyncProgress);
        assert_eq!(event.progress, Some(100.0));
    }

    #[test]
    fn test_event_serializes_as_tagged_union() {
        let event = SyncEvent::new(SyncEventKind::ConflictDetected).with_error("409 Conflict");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conflict-detected");
        assert_eq!(json["error"], "409 Conflict");
        assert!(json.get("progress").is_none());
    }
}
