//! Weft: a versioned content-object store.
//!
//! Objects are immutable-history records whose state is the replay of an
//! append-only delta chain. Payloads live in a deduplicating content store,
//! objects derived from one another form a per-family DAG, and a change to
//! an ancestor can be propagated level by level through the transforms
//! that produced its descendants.
//!
//! [`Weft`] ties the component crates together and adds what a caller
//! needs around them: owner scoping, quotas, store events, background
//! propagation handles, inbound transform messages and maintenance.
//!
//! ```no_run
//! use weft_core::{NewObject, Weft};
//! use weft_types::OwnerId;
//!
//! let weft = Weft::builder().build()?;
//! let owner = OwnerId::new("alice")?;
//! let doc = weft.create_object(NewObject::new(owner.clone(), b"# Notes".to_vec(), "text/markdown"))?;
//! assert_eq!(weft.get_content(&owner, &doc.id, None)?, b"# Notes");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod handle;
pub mod inbound;
pub mod maintenance;
mod publish;
pub mod quota;
pub mod telemetry;
pub mod weft;

pub use builder::WeftBuilder;
pub use config::{
    ContentSection, DagSection, DeltaSection, EventsSection, LimitsConfig, WeftConfig,
};
pub use error::{WeftError, WeftResult};
pub use handle::PropagationHandle;
pub use inbound::InboundOutcome;
pub use maintenance::MaintenanceReport;
pub use quota::{QuotaLimits, QuotaProvider, StaticQuota, Unlimited};
pub use telemetry::{init_test_tracing, init_tracing};
pub use weft::{DeleteMode, DeleteReport, ObjectHealth, Weft};

pub use weft_dag::{
    CancellationReason, DagNode, NodeOutcome, PropagationReport, SkipReason, Transform,
    TransformError, TransformInput, TransformOutput,
};
pub use weft_delta::{Applied, ChangeRequest, DeltaProposal, NewObject, UpdateRequest, VersionDiff};
pub use weft_events::{EventFilter, EventSink, EventStream, EventType, StoreEvent, TransformEvent};
pub use weft_repo::OwnerUsage;
