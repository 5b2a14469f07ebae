use std::sync::Arc;

use tracing::warn;
use weft_dag::PropagationObserver;
use weft_delta::Applied;
use weft_events::{EventBus, EventSink, EventType, StoreEvent};
use weft_types::{DeltaId, DeltaOperation};

/// Turns committed deltas into store events for the bus and any extra sinks.
pub(crate) struct Publisher {
    bus: Arc<EventBus>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Publisher {
    pub(crate) fn new(bus: Arc<EventBus>, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { bus, sinks }
    }

    pub(crate) fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish the event for one committed delta. Publication never fails
    /// the write that produced it.
    pub(crate) fn announce(&self, applied: &Applied) {
        let event_type = match applied.delta.operation() {
            DeltaOperation::Create => EventType::Created,
            DeltaOperation::Delete => EventType::Deleted,
            _ => EventType::Updated,
        };
        let object = &applied.object;
        let event = match StoreEvent::new(
            event_type,
            object.id,
            object.owner_id.clone(),
            object.root_id,
            applied.delta.id,
            object.version,
        ) {
            Ok(event) => event.caused_by(applied.delta.caused_by),
            Err(err) => {
                warn!(object = %object.id, error = %err, "could not build store event");
                return;
            }
        };
        self.bus.publish(&event);
        for sink in &self.sinks {
            sink.publish(&event);
        }
    }
}

impl PropagationObserver for Publisher {
    fn node_updated(&self, applied: &Applied, _cause: &DeltaId) {
        self.announce(applied);
    }
}
