use std::sync::{Arc, Mutex};

use tracing::info;
use weft_content::{ContentStore, InMemoryContentStore};
use weft_dag::{DagCache, PropagationObserver, Propagator, Transform, TransformRegistry};
use weft_delta::DeltaEngine;
use weft_events::{EventBus, EventSink};
use weft_repo::{InMemoryRepository, ObjectRepository};

use crate::config::WeftConfig;
use crate::error::WeftResult;
use crate::handle::RunRegistry;
use crate::inbound;
use crate::publish::Publisher;
use crate::quota::{QuotaProvider, Unlimited};
use crate::weft::{Inner, Weft};

/// Assembles a [`Weft`] from its collaborators.
///
/// Anything not supplied gets the in-memory default.
pub struct WeftBuilder {
    config: WeftConfig,
    quota: Arc<dyn QuotaProvider>,
    transforms: TransformRegistry,
    sinks: Vec<Arc<dyn EventSink>>,
    content: Option<Arc<dyn ContentStore>>,
    repo: Option<Arc<dyn ObjectRepository>>,
}

impl WeftBuilder {
    pub fn new() -> Self {
        Self {
            config: WeftConfig::default(),
            quota: Arc::new(Unlimited),
            transforms: TransformRegistry::new(),
            sinks: Vec::new(),
            content: None,
            repo: None,
        }
    }

    pub fn config(mut self, config: WeftConfig) -> Self {
        self.config = config;
        self
    }

    pub fn quota(mut self, quota: Arc<dyn QuotaProvider>) -> Self {
        self.quota = quota;
        self
    }

    /// Register one transform propagation may call.
    pub fn transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transforms = self.transforms.register(transform);
        self
    }

    /// Replace the whole transform registry.
    pub fn transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    /// Also publish store events to `sink` (e.g. a message-bus bridge).
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn repository(mut self, repo: Arc<dyn ObjectRepository>) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn build(self) -> WeftResult<Weft> {
        self.config.validate()?;
        let config = self.config;

        let content = self.content.unwrap_or_else(|| {
            Arc::new(InMemoryContentStore::with_config(config.content_config()))
        });
        let repo = self
            .repo
            .unwrap_or_else(|| Arc::new(InMemoryRepository::new()));
        let engine = Arc::new(DeltaEngine::new(content, repo, config.delta_config()));
        let dag_cache = Arc::new(DagCache::new(config.cache_ttl()));

        let bus = Arc::new(EventBus::new(config.events.channel_capacity));
        let publisher = Arc::new(Publisher::new(bus, self.sinks));
        let transform_count = self.transforms.len();
        let propagator = Propagator::new(
            Arc::clone(&engine),
            Arc::new(self.transforms),
            Arc::clone(&dag_cache),
            config.propagation_config(),
        )
        .with_observer(Arc::clone(&publisher) as Arc<dyn PropagationObserver>);

        info!(
            transforms = transform_count,
            max_concurrency = config.dag.max_concurrency,
            "weft ready"
        );
        Ok(Weft {
            inner: Arc::new(Inner {
                inbound: inbound::routes()?,
                config,
                engine,
                dag_cache,
                propagator,
                quota: self.quota,
                publisher,
                runs: Arc::new(RunRegistry::default()),
                create_gate: Mutex::new(()),
            }),
        })
    }
}

impl Default for WeftBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WeftError;

    #[test]
    fn defaults_build() {
        let weft = WeftBuilder::new().build().unwrap();
        assert_eq!(weft.config(), &WeftConfig::default());
        assert_eq!(weft.running_propagations(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = WeftConfig::default();
        config.dag.max_concurrency = 0;
        assert!(matches!(
            WeftBuilder::new().config(config).build(),
            Err(WeftError::Config(_))
        ));
    }

    #[test]
    fn supplied_stores_are_used() {
        let content = Arc::new(InMemoryContentStore::new());
        let weft = WeftBuilder::new()
            .content_store(content.clone())
            .build()
            .unwrap();
        weft.create_object(weft_delta::NewObject::new(
            weft_types::OwnerId::new("alice").unwrap(),
            b"hello".to_vec(),
            "text/plain",
        ))
        .unwrap();
        assert_eq!(content.len(), 1);
    }
}
