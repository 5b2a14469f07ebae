//! The pure, deterministic step function shared by apply and replay.
//!
//! Nothing here reads the clock or any state other than its arguments:
//! stored payloads referenced by hash are resolved through the `fetch`
//! callback, and JSON payloads are re-serialized with sorted keys.

use serde_json::Value;
use weft_types::{ContentHash, Patch, UpdatePatch};

use crate::error::{DeltaError, DeltaResult};

/// The state of an object after some prefix of its delta chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Materialized {
    pub version: u64,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub tombstoned: bool,
}

impl Materialized {
    /// The state before the create delta.
    pub fn genesis() -> Self {
        Self::default()
    }
}

/// Apply one patch to `state`, producing the next version.
pub fn apply_patch<F>(state: &Materialized, patch: &Patch, fetch: F) -> DeltaResult<Materialized>
where
    F: Fn(&ContentHash) -> DeltaResult<Vec<u8>>,
{
    if state.tombstoned {
        return Err(DeltaError::InvalidOperation(format!(
            "version {} is tombstoned",
            state.version
        )));
    }
    let mut next = Materialized {
        version: state.version + 1,
        ..state.clone()
    };
    match patch {
        Patch::Create {
            content,
            content_type,
        } => {
            if state.version != 0 {
                return Err(DeltaError::InvalidOperation(format!(
                    "create applied at version {}",
                    state.version
                )));
            }
            next.payload = fetch(content)?;
            next.content_type = content_type.clone();
        }
        _ if state.version == 0 => {
            return Err(DeltaError::InvalidOperation(
                "the first delta must be a create".into(),
            ))
        }
        Patch::Update(update) => {
            next.payload = apply_update(&state.payload, update, &fetch)?;
        }
        Patch::Transform {
            content,
            content_type,
            ..
        } => {
            next.payload = fetch(content)?;
            if let Some(content_type) = content_type {
                next.content_type = content_type.clone();
            }
        }
        Patch::Delete => next.tombstoned = true,
        Patch::Revert {
            target_version,
            content,
            content_type,
        } => {
            if *target_version == 0 || *target_version >= state.version {
                return Err(DeltaError::InvalidOperation(format!(
                    "cannot revert version {} to {target_version}",
                    state.version
                )));
            }
            next.payload = fetch(content)?;
            next.content_type = content_type.clone();
        }
    }
    Ok(next)
}

fn apply_update<F>(payload: &[u8], update: &UpdatePatch, fetch: &F) -> DeltaResult<Vec<u8>>
where
    F: Fn(&ContentHash) -> DeltaResult<Vec<u8>>,
{
    match update {
        UpdatePatch::Replace { content } => fetch(content),
        UpdatePatch::Append { bytes } => {
            let mut out = Vec::with_capacity(payload.len() + bytes.len());
            out.extend_from_slice(payload);
            out.extend_from_slice(bytes);
            Ok(out)
        }
        UpdatePatch::Splice {
            offset,
            delete,
            insert,
        } => {
            let start = usize::try_from(*offset).unwrap_or(usize::MAX);
            let end = start.saturating_add(usize::try_from(*delete).unwrap_or(usize::MAX));
            if end > payload.len() {
                return Err(DeltaError::InvalidPatch(format!(
                    "splice {offset}+{delete} exceeds payload of {} bytes",
                    payload.len()
                )));
            }
            let mut out = Vec::with_capacity(payload.len() - (end - start) + insert.len());
            out.extend_from_slice(&payload[..start]);
            out.extend_from_slice(insert);
            out.extend_from_slice(&payload[end..]);
            Ok(out)
        }
        UpdatePatch::SetPath { pointer, value } => {
            let mut doc = parse_json(payload)?;
            set_pointer(&mut doc, pointer, value.clone())?;
            to_json(&doc)
        }
        UpdatePatch::RemovePath { pointer } => {
            let mut doc = parse_json(payload)?;
            remove_pointer(&mut doc, pointer)?;
            to_json(&doc)
        }
    }
}

fn parse_json(payload: &[u8]) -> DeltaResult<Value> {
    serde_json::from_slice(payload)
        .map_err(|e| DeltaError::InvalidPatch(format!("payload is not JSON: {e}")))
}

fn to_json(doc: &Value) -> DeltaResult<Vec<u8>> {
    serde_json::to_vec(doc).map_err(|e| DeltaError::InvalidPatch(e.to_string()))
}

/// Split an RFC 6901 pointer into its parent pointer and unescaped last token.
fn split_pointer(pointer: &str) -> DeltaResult<(&str, String)> {
    if !pointer.starts_with('/') {
        return Err(DeltaError::InvalidPatch(format!(
            "`{pointer}` is not a JSON pointer"
        )));
    }
    let cut = pointer.rfind('/').unwrap_or(0);
    let token = pointer[cut + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&pointer[..cut], token))
}

fn missing(pointer: &str) -> DeltaError {
    DeltaError::InvalidPatch(format!("no value at `{pointer}`"))
}

fn set_pointer(doc: &mut Value, pointer: &str, value: Value) -> DeltaResult<()> {
    if pointer.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent_ptr, token) = split_pointer(pointer)?;
    let parent = doc.pointer_mut(parent_ptr).ok_or_else(|| missing(parent_ptr))?;
    match parent {
        Value::Object(map) => {
            map.insert(token, value);
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
            } else {
                let index = parse_index(&token, pointer)?;
                match index {
                    i if i < items.len() => items[i] = value,
                    i if i == items.len() => items.push(value),
                    _ => return Err(missing(pointer)),
                }
            }
        }
        _ => {
            return Err(DeltaError::InvalidPatch(format!(
                "`{parent_ptr}` is not a container"
            )))
        }
    }
    Ok(())
}

fn remove_pointer(doc: &mut Value, pointer: &str) -> DeltaResult<()> {
    if pointer.is_empty() {
        return Err(DeltaError::InvalidPatch("cannot remove the document root".into()));
    }
    let (parent_ptr, token) = split_pointer(pointer)?;
    let parent = doc.pointer_mut(parent_ptr).ok_or_else(|| missing(parent_ptr))?;
    let removed = match parent {
        Value::Object(map) => map.remove(&token).is_some(),
        Value::Array(items) => {
            let index = parse_index(&token, pointer)?;
            if index < items.len() {
                items.remove(index);
                true
            } else {
                false
            }
        }
        _ => false,
    };
    if removed {
        Ok(())
    } else {
        Err(missing(pointer))
    }
}

fn parse_index(token: &str, pointer: &str) -> DeltaResult<usize> {
    // RFC 6901 forbids leading zeros.
    if token.len() > 1 && token.starts_with('0') {
        return Err(missing(pointer));
    }
    token.parse().map_err(|_| missing(pointer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_fetch(hash: &ContentHash) -> DeltaResult<Vec<u8>> {
        panic!("unexpected fetch of {hash}")
    }

    fn at(version: u64, payload: &[u8]) -> Materialized {
        Materialized {
            version,
            payload: payload.to_vec(),
            content_type: "text/plain".into(),
            tombstoned: false,
        }
    }

    fn update(state: &Materialized, patch: UpdatePatch) -> DeltaResult<Materialized> {
        apply_patch(state, &Patch::Update(patch), no_fetch)
    }

    #[test]
    fn create_only_from_genesis() {
        let hash = ContentHash::from_bytes(b"hi");
        let create = Patch::Create {
            content: hash,
            content_type: "text/plain".into(),
        };
        let fetch = |_: &ContentHash| -> DeltaResult<Vec<u8>> { Ok(b"hi".to_vec()) };
        let state = apply_patch(&Materialized::genesis(), &create, fetch).unwrap();
        assert_eq!(state, at(1, b"hi"));
        assert!(matches!(
            apply_patch(&state, &create, fetch),
            Err(DeltaError::InvalidOperation(_))
        ));
        assert!(matches!(
            apply_patch(&Materialized::genesis(), &Patch::Delete, no_fetch),
            Err(DeltaError::InvalidOperation(_))
        ));
    }

    #[test]
    fn append_and_splice() {
        let s = update(&at(1, b"hello"), UpdatePatch::Append { bytes: b" world".to_vec() }).unwrap();
        assert_eq!(s.payload, b"hello world");
        assert_eq!(s.version, 2);

        let s = update(
            &s,
            UpdatePatch::Splice {
                offset: 0,
                delete: 5,
                insert: b"goodbye".to_vec(),
            },
        )
        .unwrap();
        assert_eq!(s.payload, b"goodbye world");

        let err = update(
            &s,
            UpdatePatch::Splice {
                offset: 10,
                delete: 10,
                insert: vec![],
            },
        );
        assert!(matches!(err, Err(DeltaError::InvalidPatch(_))));
    }

    #[test]
    fn set_and_remove_json_paths() {
        let state = at(1, br#"{"b":1,"a":{"list":[1,2]}}"#);
        let s = update(
            &state,
            UpdatePatch::SetPath {
                pointer: "/a/list/-".into(),
                value: json!(3),
            },
        )
        .unwrap();
        let s = update(
            &s,
            UpdatePatch::SetPath {
                pointer: "/a~1b".into(),
                value: json!("slash"),
            },
        )
        .unwrap();
        let s = update(&s, UpdatePatch::RemovePath { pointer: "/b".into() }).unwrap();
        // Keys come back sorted regardless of input order.
        assert_eq!(s.payload, br#"{"a":{"list":[1,2,3]},"a/b":"slash"}"#);

        let err = update(&s, UpdatePatch::RemovePath { pointer: "/nope".into() });
        assert!(matches!(err, Err(DeltaError::InvalidPatch(_))));
        let err = update(
            &s,
            UpdatePatch::SetPath {
                pointer: "/missing/child".into(),
                value: json!(1),
            },
        );
        assert!(matches!(err, Err(DeltaError::InvalidPatch(_))));
    }

    #[test]
    fn json_patch_on_non_json_payload_fails() {
        let err = update(
            &at(1, b"plain text"),
            UpdatePatch::SetPath {
                pointer: "/x".into(),
                value: json!(1),
            },
        );
        assert!(matches!(err, Err(DeltaError::InvalidPatch(_))));
    }

    #[test]
    fn delete_tombstones_and_blocks_further_steps() {
        let s = apply_patch(&at(2, b"x"), &Patch::Delete, no_fetch).unwrap();
        assert!(s.tombstoned);
        assert_eq!(s.payload, b"x");
        let err = update(&s, UpdatePatch::Append { bytes: vec![1] });
        assert!(matches!(err, Err(DeltaError::InvalidOperation(_))));
    }

    #[test]
    fn revert_must_target_an_earlier_version() {
        let target = ContentHash::from_bytes(b"old");
        let fetch = |_: &ContentHash| -> DeltaResult<Vec<u8>> { Ok(b"old".to_vec()) };
        let revert = |v| Patch::Revert {
            target_version: v,
            content: target,
            content_type: "text/markdown".into(),
        };
        let s = apply_patch(&at(3, b"new"), &revert(1), fetch).unwrap();
        assert_eq!(s.payload, b"old");
        assert_eq!(s.content_type, "text/markdown");
        assert_eq!(s.version, 4);
        assert!(apply_patch(&at(3, b"new"), &revert(3), fetch).is_err());
        assert!(apply_patch(&at(3, b"new"), &revert(0), fetch).is_err());
    }

    #[test]
    fn transform_keeps_content_type_unless_given() {
        let fetch = |_: &ContentHash| -> DeltaResult<Vec<u8>> { Ok(b"summary".to_vec()) };
        let patch = Patch::Transform {
            transform: "summarize".into(),
            content: ContentHash::from_bytes(b"summary"),
            content_type: None,
        };
        let s = apply_patch(&at(1, b"long text"), &patch, fetch).unwrap();
        assert_eq!(s.payload, b"summary");
        assert_eq!(s.content_type, "text/plain");
    }
}
