//! Static routing of subjects to handlers.

use tracing::debug;

use crate::error::EventResult;
use crate::subject::{Subject, SubjectPattern};

/// Pattern → handlers table, frozen once built.
///
/// Lookups return handlers of every matching pattern in registration order.
#[derive(Clone, Debug)]
pub struct SubscriptionTable<H> {
    routes: Vec<(SubjectPattern, Vec<H>)>,
}

impl<H> SubscriptionTable<H> {
    pub fn builder() -> SubscriptionTableBuilder<H> {
        SubscriptionTableBuilder { routes: Vec::new() }
    }

    pub fn handlers_for(&self, subject: &Subject) -> Vec<&H> {
        self.routes
            .iter()
            .filter(|(pattern, _)| pattern.matches(subject))
            .flat_map(|(_, handlers)| handlers.iter())
            .collect()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &SubjectPattern> {
        self.routes.iter().map(|(pattern, _)| pattern)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Builder for [`SubscriptionTable`].
pub struct SubscriptionTableBuilder<H> {
    routes: Vec<(SubjectPattern, Vec<H>)>,
}

impl<H> SubscriptionTableBuilder<H> {
    /// Route subjects matching `pattern` to `handler`.
    pub fn on(mut self, pattern: &str, handler: H) -> EventResult<Self> {
        let pattern = SubjectPattern::new(pattern)?;
        match self.routes.iter_mut().find(|(p, _)| *p == pattern) {
            Some((_, handlers)) => handlers.push(handler),
            None => self.routes.push((pattern, vec![handler])),
        }
        Ok(self)
    }

    pub fn build(self) -> SubscriptionTable<H> {
        debug!(patterns = self.routes.len(), "subscription table built");
        SubscriptionTable {
            routes: self.routes,
        }
    }
}
