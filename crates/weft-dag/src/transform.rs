//! Opaque transform collaborators and the registry that resolves them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use weft_types::{DeltaId, ObjectId, OwnerId};

/// Everything a transform sees when recomputing a derived object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformInput {
    /// The derived object being recomputed.
    pub object_id: ObjectId,
    pub owner_id: OwnerId,
    pub parent_id: ObjectId,
    /// Parent version the payload was read at.
    pub parent_version: u64,
    /// Parent content at `parent_version`.
    pub payload: Vec<u8>,
    pub content_type: String,
    /// The parent delta that triggered this run.
    pub cause: DeltaId,
}

/// New content for the derived object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformOutput {
    pub payload: Vec<u8>,
    /// Replaces the object's content type when set.
    pub content_type: Option<String>,
}

impl TransformOutput {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A transform that could not produce output.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("transform failed: {0}")]
    Failed(String),

    #[error("unsupported input: {0}")]
    Unsupported(String),
}

/// A named, opaque computation from parent content to child content.
#[async_trait]
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, input: TransformInput) -> Result<TransformOutput, TransformError>;
}

/// Name → transform table, built once at startup.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: BTreeMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transform under its own name, replacing any earlier entry.
    pub fn register(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transforms
            .insert(transform.name().to_string(), transform);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.transforms.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Transform for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn run(&self, input: TransformInput) -> Result<TransformOutput, TransformError> {
            let text = String::from_utf8(input.payload)
                .map_err(|e| TransformError::Unsupported(e.to_string()))?;
            Ok(TransformOutput::new(text.to_uppercase()))
        }
    }

    fn input(payload: &[u8]) -> TransformInput {
        TransformInput {
            object_id: ObjectId::new(),
            owner_id: OwnerId::new("alice").unwrap(),
            parent_id: ObjectId::new(),
            parent_version: 2,
            payload: payload.to_vec(),
            content_type: "text/plain".into(),
            cause: DeltaId::new(),
        }
    }

    #[test]
    fn registry_resolves_by_name() {
        let registry = TransformRegistry::new().register(Arc::new(Upper));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("upper"));
        assert!(registry.get("lower").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["upper"]);
    }

    #[tokio::test]
    async fn transforms_run_through_the_registry() {
        let registry = TransformRegistry::new().register(Arc::new(Upper));
        let upper = registry.get("upper").unwrap();
        let out = upper.run(input(b"hello")).await.unwrap();
        assert_eq!(out.payload, b"HELLO");
        assert_eq!(out.content_type, None);

        let err = upper.run(input(&[0xff])).await.unwrap_err();
        assert!(matches!(err, TransformError::Unsupported(_)));
    }
}
