//! Page-wide event bus.
//!
//! Widgets and sources communicate through a single bus with explicit
//! subscribe/unsubscribe and delivery in subscription order. One-shot
//! subscriptions cover the "populate when this tab becomes visible"
//! case without leaving handlers armed forever.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// Events that flow between page components.
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// A page-level filter input changed; sources reset to page one and
    /// repopulate.
    FiltersChanged,
    /// A grid row was selected (or deselected, when `doc` is `None`).
    RowSelected { grid_id: String, doc: Option<Value> },
    /// A map was panned or zoomed.
    MapMoved { map_id: String },
    /// A hidden tab became visible.
    TabActivated { tab_id: String },
    /// A fetch failed for reasons other than navigating away.
    BackendError { source_id: String, message: String },
    /// A bulk update affected fewer records than requested.
    CountMismatch { requested: u64, affected: u64 },
    /// Progress of a chunked download.
    DownloadProgress {
        source_id: String,
        done: u64,
        total: Option<u64>,
    },
}

/// Discriminant used to route subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FiltersChanged,
    RowSelected,
    MapMoved,
    TabActivated,
    BackendError,
    CountMismatch,
    DownloadProgress,
}

impl PageEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PageEvent::FiltersChanged => EventKind::FiltersChanged,
            PageEvent::RowSelected { .. } => EventKind::RowSelected,
            PageEvent::MapMoved { .. } => EventKind::MapMoved,
            PageEvent::TabActivated { .. } => EventKind::TabActivated,
            PageEvent::BackendError { .. } => EventKind::BackendError,
            PageEvent::CountMismatch { .. } => EventKind::CountMismatch,
            PageEvent::DownloadProgress { .. } => EventKind::DownloadProgress,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&PageEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    kind: EventKind,
    once: bool,
    handler: Handler,
}

/// The page event bus.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            inner: Mutex::new(BusInner {
                next_id: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Subscribe to all events of `kind`.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&PageEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(kind, false, Arc::new(handler))
    }

    /// Subscribe to the next event of `kind` only.
    pub fn subscribe_once(
        &self,
        kind: EventKind,
        handler: impl Fn(&PageEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add(kind, true, Arc::new(handler))
    }

    fn add(&self, kind: EventKind, once: bool, handler: Handler) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            kind,
            once,
            handler,
        });
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().subscribers.retain(|s| s.id != id.0);
    }

    /// Deliver an event to matching subscribers in subscription order.
    ///
    /// Handlers run outside the bus lock, so they may subscribe,
    /// unsubscribe or publish further events.
    pub fn publish(&self, event: &PageEvent) {
        let kind = event.kind();
        tracing::trace!(?kind, "publishing page event");
        let handlers: Vec<Handler> = {
            let mut inner = self.inner.lock();
            let matching: Vec<Handler> = inner
                .subscribers
                .iter()
                .filter(|s| s.kind == kind)
                .map(|s| Arc::clone(&s.handler))
                .collect();
            inner.subscribers.retain(|s| !(s.once && s.kind == kind));
            matching
        };
        for handler in handlers {
            handler(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
