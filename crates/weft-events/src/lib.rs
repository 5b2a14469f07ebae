//! Change notifications for Weft.
//!
//! Outbound, every committed create, update and delete becomes a
//! [`StoreEvent`] published on `objects.<owner>.<event_type>` through an
//! [`EventSink`]. [`EventBus`] is the in-process sink: subscribers register
//! an [`EventFilter`] and receive a broadcast stream.
//!
//! Inbound, external transforms report back with [`TransformEvent`]s on
//! `transform.completed` / `transform.failed`, routed with a
//! [`SubscriptionTable`].

pub mod bus;
pub mod error;
pub mod event;
pub mod subject;
pub mod table;

pub use bus::{EventBus, EventFilter, EventSink, EventStream};
pub use error::{EventError, EventResult};
pub use event::{
    EventId, EventType, StoreEvent, TransformEvent, TRANSFORM_COMPLETED, TRANSFORM_FAILED,
};
pub use subject::{Subject, SubjectPattern};
pub use table::{SubscriptionTable, SubscriptionTableBuilder};
