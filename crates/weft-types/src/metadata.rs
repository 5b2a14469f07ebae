//! Object metadata: typed known fields plus a bounded open map.
//!
//! Known fields are validated strictly. Anything else a caller or a
//! transform wants to attach lives in [`ObjectMetadata::extra`], which is
//! passed through opaquely but bounded in size.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;
use crate::id::DeltaId;

pub const MAX_TITLE_CHARS: usize = 256;
pub const MAX_TAGS: usize = 32;
pub const MAX_TAG_CHARS: usize = 64;
pub const MAX_EXTRA_ENTRIES: usize = 64;
pub const MAX_EXTRA_KEY_CHARS: usize = 128;
pub const MAX_EXTRA_VALUE_CHARS: usize = 4096;

const KEY_TITLE: &str = "title";
const KEY_TAGS: &str = "tags";
const KEY_SOURCE_VERSION: &str = "source_version";

/// Records that re-processing an object during propagation failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingFailure {
    /// Human-readable failure reason (transform error, timeout, ...).
    pub reason: String,
    /// The upstream delta whose propagation failed on this object.
    pub delta_id: Option<DeltaId>,
}

/// Metadata attached to an object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub title: Option<String>,
    pub tags: BTreeSet<String>,
    /// Version of the parent this object was derived from.
    pub source_version: Option<u64>,
    /// Set when the last propagation attempt on this object failed.
    pub processing_failed: Option<ProcessingFailure>,
    /// Free-form extension data, bounded by the `MAX_EXTRA_*` limits.
    pub extra: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Build metadata from an untyped map.
    ///
    /// Known keys must have the expected JSON type. Unknown keys are kept in
    /// `extra`; string values are stored as-is and any other value as its
    /// JSON text.
    pub fn from_map(map: BTreeMap<String, Value>) -> Result<Self, TypeError> {
        let mut meta = Self::default();
        for (key, value) in map {
            match key.as_str() {
                KEY_TITLE => match value {
                    Value::String(s) => meta.title = Some(s),
                    Value::Null => {}
                    other => return Err(wrong_type(KEY_TITLE, "string", &other)),
                },
                KEY_TAGS => match value {
                    Value::Array(items) => {
                        for item in items {
                            match item {
                                Value::String(s) => {
                                    meta.tags.insert(s);
                                }
                                other => return Err(wrong_type(KEY_TAGS, "string", &other)),
                            }
                        }
                    }
                    other => return Err(wrong_type(KEY_TAGS, "array of strings", &other)),
                },
                KEY_SOURCE_VERSION => match value.as_u64() {
                    Some(v) => meta.source_version = Some(v),
                    None => return Err(wrong_type(KEY_SOURCE_VERSION, "unsigned integer", &value)),
                },
                _ => {
                    let text = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    meta.extra.insert(key, text);
                }
            }
        }
        meta.validate()?;
        Ok(meta)
    }

    /// Check every size bound.
    pub fn validate(&self) -> Result<(), TypeError> {
        if let Some(title) = &self.title {
            if title.chars().count() > MAX_TITLE_CHARS {
                return Err(invalid(KEY_TITLE, format!("longer than {MAX_TITLE_CHARS} chars")));
            }
        }
        if self.tags.len() > MAX_TAGS {
            return Err(invalid(KEY_TAGS, format!("more than {MAX_TAGS} tags")));
        }
        if let Some(tag) = self
            .tags
            .iter()
            .find(|t| t.is_empty() || t.chars().count() > MAX_TAG_CHARS)
        {
            return Err(invalid(
                KEY_TAGS,
                format!("tag `{tag}` must be 1..={MAX_TAG_CHARS} chars"),
            ));
        }
        if self.extra.len() > MAX_EXTRA_ENTRIES {
            return Err(invalid("extra", format!("more than {MAX_EXTRA_ENTRIES} entries")));
        }
        for (key, value) in &self.extra {
            if key.is_empty() || key.chars().count() > MAX_EXTRA_KEY_CHARS {
                return Err(invalid("extra", format!("key `{key}` has an invalid length")));
            }
            if value.chars().count() > MAX_EXTRA_VALUE_CHARS {
                return Err(invalid(
                    "extra",
                    format!("value for `{key}` is longer than {MAX_EXTRA_VALUE_CHARS} chars"),
                ));
            }
        }
        Ok(())
    }

    pub fn is_processing_failed(&self) -> bool {
        self.processing_failed.is_some()
    }
}

fn wrong_type(field: &str, expected: &str, got: &Value) -> TypeError {
    invalid(field, format!("expected {expected}, got {got}"))
}

fn invalid(field: &str, reason: String) -> TypeError {
    TypeError::InvalidMetadata {
        field: field.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn known_fields_are_parsed() {
        let meta = ObjectMetadata::from_map(map(json!({
            "title": "Notes",
            "tags": ["draft", "work"],
            "source_version": 3
        })))
        .unwrap();
        assert_eq!(meta.title.as_deref(), Some("Notes"));
        assert!(meta.tags.contains("draft"));
        assert_eq!(meta.source_version, Some(3));
        assert!(meta.extra.is_empty());
    }

    #[test]
    fn unknown_fields_pass_through() {
        let meta = ObjectMetadata::from_map(map(json!({
            "language": "en",
            "confidence": 0.5
        })))
        .unwrap();
        assert_eq!(meta.extra.get("language").map(String::as_str), Some("en"));
        assert_eq!(meta.extra.get("confidence").map(String::as_str), Some("0.5"));
    }

    #[test]
    fn known_field_with_wrong_type_is_rejected() {
        let err = ObjectMetadata::from_map(map(json!({ "title": 42 }))).unwrap_err();
        assert!(matches!(err, TypeError::InvalidMetadata { ref field, .. } if field == "title"));

        let err = ObjectMetadata::from_map(map(json!({ "tags": ["ok", 1] }))).unwrap_err();
        assert!(matches!(err, TypeError::InvalidMetadata { ref field, .. } if field == "tags"));
    }

    #[test]
    fn extra_map_is_bounded() {
        let mut meta = ObjectMetadata::new();
        for i in 0..=MAX_EXTRA_ENTRIES {
            meta.extra.insert(format!("k{i}"), "v".into());
        }
        assert!(meta.validate().is_err());
    }

    #[test]
    fn oversized_title_is_rejected() {
        let meta = ObjectMetadata::new().with_title("x".repeat(MAX_TITLE_CHARS + 1));
        assert!(meta.validate().is_err());
    }

    #[test]
    fn builder_helpers() {
        let meta = ObjectMetadata::new()
            .with_title("t")
            .with_tag("a")
            .with_extra("k", "v");
        assert!(meta.validate().is_ok());
        assert!(!meta.is_processing_failed());
    }
}
