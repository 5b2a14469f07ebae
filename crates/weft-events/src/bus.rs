use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::debug;
use weft_types::{ObjectId, OwnerId};

use crate::event::{EventType, StoreEvent};
use crate::subject::SubjectPattern;

/// Destination for store events.
pub trait EventSink: Send + Sync {
    /// Deliver `event`. Returns how many subscribers received it.
    fn publish(&self, event: &StoreEvent) -> usize;
}

/// Filter for subscribing to a subset of store events.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// If set, only events whose subject matches are delivered.
    pub pattern: Option<SubjectPattern>,
    /// If set, only this owner's events are delivered.
    pub owner: Option<OwnerId>,
    /// If set, only events about this family are delivered.
    pub root_id: Option<ObjectId>,
    pub event_types: Option<Vec<EventType>>,
}

impl EventFilter {
    /// Every event of one owner.
    pub fn owner(owner: OwnerId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    pub fn pattern(pattern: SubjectPattern) -> Self {
        Self {
            pattern: Some(pattern),
            ..Self::default()
        }
    }

    pub fn with_root(mut self, root_id: ObjectId) -> Self {
        self.root_id = Some(root_id);
        self
    }

    pub fn with_types(mut self, types: Vec<EventType>) -> Self {
        self.event_types = Some(types);
        self
    }

    pub fn matches(&self, event: &StoreEvent) -> bool {
        if let Some(ref owner) = self.owner {
            if *owner != event.owner_id {
                return false;
            }
        }
        if let Some(ref root) = self.root_id {
            if *root != event.root_id {
                return false;
            }
        }
        if let Some(ref types) = self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(ref pattern) = self.pattern {
            if !pattern.matches(&event.subject()) {
                return false;
            }
        }
        true
    }
}

/// A broadcast channel receiver for store events.
pub type EventStream = broadcast::Receiver<StoreEvent>;

struct Subscriber {
    filter: EventFilter,
    sender: broadcast::Sender<StoreEvent>,
}

/// In-process fan-out of store events to filtered subscribers.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    capacity: usize,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
            published: AtomicU64::new(0),
        }
    }

    /// Register a subscriber. Each gets its own bounded channel; a slow
    /// receiver lags instead of blocking publishers.
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        let (sender, receiver) = broadcast::channel(self.capacity);
        self.subscribers
            .write()
            .expect("lock poisoned")
            .push(Subscriber { filter, sender });
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("lock poisoned").len()
    }

    /// Events published since creation.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: &StoreEvent) -> usize {
        let mut delivered = 0;
        let mut subscribers = self.subscribers.write().expect("lock poisoned");
        subscribers.retain(|sub| {
            if sub.filter.matches(event) {
                let sent = sub.sender.send(event.clone()).is_ok();
                delivered += usize::from(sent);
                sent
            } else {
                sub.sender.receiver_count() > 0
            }
        });
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            id = %event.id,
            subject = %event.subject(),
            delivered,
            "event published"
        );
        delivered
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
