//! Messages from external transform workers.

use tracing::{info, warn};
use weft_delta::{Applied, ChangeRequest, DeltaProposal, NewObject};
use weft_events::{Subject, SubscriptionTable, TransformEvent, TRANSFORM_COMPLETED, TRANSFORM_FAILED};
use weft_types::{Actor, Object, ObjectId};

use crate::error::{WeftError, WeftResult};
use crate::weft::Weft;

/// Which inbound handler a subject is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InboundRoute {
    Completed,
    Failed,
}

pub(crate) fn routes() -> WeftResult<SubscriptionTable<InboundRoute>> {
    Ok(SubscriptionTable::builder()
        .on(TRANSFORM_COMPLETED, InboundRoute::Completed)?
        .on(TRANSFORM_FAILED, InboundRoute::Failed)?
        .build())
}

/// What handling one transform message changed.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundOutcome {
    pub source: ObjectId,
    /// Existing derived children rewritten with the transform output.
    pub updated: Vec<Applied>,
    /// Derived child created because none existed yet.
    pub created: Option<Object>,
    /// Children marked failed, or that could not be updated, with the reason.
    pub failed: Vec<(ObjectId, String)>,
}

impl InboundOutcome {
    fn new(source: ObjectId) -> Self {
        Self {
            source,
            updated: Vec::new(),
            created: None,
            failed: Vec::new(),
        }
    }
}

impl Weft {
    /// Decode a raw message received on `subject` and handle it.
    pub fn handle_message(&self, subject: &str, body: &[u8]) -> WeftResult<InboundOutcome> {
        let subject = Subject::new(subject)?;
        let route = match self.inner.inbound.handlers_for(&subject).first() {
            Some(route) => **route,
            None => {
                return Err(WeftError::InvalidRequest(format!(
                    "no handler for subject `{subject}`"
                )))
            }
        };
        let event = TransformEvent::decode(&subject, body)?;
        match (route, &event) {
            (InboundRoute::Completed, TransformEvent::Completed { .. })
            | (InboundRoute::Failed, TransformEvent::Failed { .. }) => {
                self.handle_transform_event(event)
            }
            _ => Err(WeftError::InvalidRequest(format!(
                "`{subject}` routed to {route:?}"
            ))),
        }
    }

    /// Apply a transform worker's result to the source object's derived
    /// children.
    pub fn handle_transform_event(&self, event: TransformEvent) -> WeftResult<InboundOutcome> {
        let source = self.repo().get(event.source_object_id(), None)?;
        if source.is_tombstoned() {
            return Err(WeftError::ObjectTombstoned(source.id));
        }
        let transform = event.transform().to_string();
        let derived: Vec<Object> = self
            .repo()
            .children(&source.id)?
            .into_iter()
            .filter(|child| {
                !child.is_tombstoned() && child.created_by.transform_name() == Some(transform.as_str())
            })
            .collect();

        let mut outcome = InboundOutcome::new(source.id);
        match event {
            TransformEvent::Completed {
                output_payload,
                content_type,
                ..
            } => {
                if derived.is_empty() {
                    let request = NewObject::new(
                        source.owner_id.clone(),
                        output_payload.clone(),
                        content_type.clone().unwrap_or_else(|| source.content_type.clone()),
                    )
                    .with_parent(source.id)
                    .created_by(Actor::Transform(transform.clone()));
                    let applied = self.create(&request)?;
                    let child = self
                        .inner
                        .engine
                        .mark_derived(&applied.object.id, source.version)?;
                    outcome.created = Some(child);
                }
                for child in &derived {
                    let proposal = DeltaProposal::new(
                        ChangeRequest::Transform {
                            transform: transform.clone(),
                            payload: output_payload.clone(),
                            content_type: content_type.clone(),
                        },
                        Actor::Transform(transform.clone()),
                    );
                    match self.commit_derived(child, &proposal, source.version) {
                        Ok(applied) => outcome.updated.push(applied),
                        Err(err) => {
                            warn!(object = %child.id, %transform, error = %err, "inbound transform not applied");
                            outcome.failed.push((child.id, err.to_string()));
                        }
                    }
                }
            }
            TransformEvent::Failed { error, .. } => {
                for child in &derived {
                    self.inner
                        .engine
                        .set_processing_failure(&child.id, Some((error.clone(), None)))?;
                    outcome.failed.push((child.id, error.clone()));
                }
            }
        }
        info!(
            source = %source.id,
            %transform,
            updated = outcome.updated.len(),
            created = outcome.created.is_some(),
            failed = outcome.failed.len(),
            "transform message handled"
        );
        Ok(outcome)
    }

    fn commit_derived(
        &self,
        child: &Object,
        proposal: &DeltaProposal,
        source_version: u64,
    ) -> WeftResult<Applied> {
        let mut applied = self.inner.engine.apply_with_retry(
            &child.id,
            proposal,
            self.inner.config.limits.max_conflict_retries,
        )?;
        applied.object = self.inner.engine.mark_derived(&child.id, source_version)?;
        self.inner.publisher.announce(&applied);
        Ok(applied)
    }
}
