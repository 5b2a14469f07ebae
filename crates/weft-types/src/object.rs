use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delta::ContentRef;
use crate::hash::ContentHash;
use crate::id::{Actor, ObjectId, OwnerId};
use crate::metadata::ObjectMetadata;

/// A versioned content record owned by a single principal.
///
/// The authoritative state of an object is its delta chain. `version`,
/// `content_ref`, `content_type`, `size` and `deleted_at` are derived
/// caches maintained by the repository as deltas are applied, and can always
/// be recomputed by replaying the chain.
///
/// `parent_id`, `root_id` and `depth` are written once at creation and never
/// change, which is what keeps the parent chain acyclic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub id: ObjectId,
    pub owner_id: OwnerId,
    pub content_ref: ContentHash,
    pub content_type: String,
    pub size: u64,
    /// Number of applied deltas; starts at 1 after the create delta.
    pub version: u64,
    pub parent_id: Option<ObjectId>,
    pub root_id: ObjectId,
    pub depth: u32,
    pub created_by: Actor,
    pub metadata: ObjectMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Object {
    /// Build a root object (no parent) at version 0, before its create delta.
    pub fn new_root(
        owner_id: OwnerId,
        content: ContentRef,
        created_by: Actor,
        metadata: ObjectMetadata,
    ) -> Self {
        let id = ObjectId::new();
        let now = Utc::now();
        Self {
            id,
            owner_id,
            content_ref: content.hash,
            content_type: content.content_type,
            size: content.size,
            version: 0,
            parent_id: None,
            root_id: id,
            depth: 0,
            created_by,
            metadata,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Build a child of `parent` at version 0, inheriting its root and owner.
    pub fn new_child(
        parent: &Object,
        content: ContentRef,
        created_by: Actor,
        metadata: ObjectMetadata,
    ) -> Self {
        let mut child = Self::new_root(parent.owner_id.clone(), content, created_by, metadata);
        child.parent_id = Some(parent.id);
        child.root_id = parent.root_id;
        child.depth = parent.depth + 1;
        child
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The current content reference as a [`ContentRef`].
    pub fn content(&self) -> ContentRef {
        ContentRef {
            hash: self.content_ref,
            size: self.size,
            content_type: self.content_type.clone(),
        }
    }

    /// Short summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} v{} depth={} by {}",
            self.id.short_id(),
            self.version,
            self.depth,
            self.created_by
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(data: &[u8]) -> ContentRef {
        ContentRef {
            hash: ContentHash::from_bytes(data),
            size: data.len() as u64,
            content_type: "text/plain".into(),
        }
    }

    fn owner() -> OwnerId {
        OwnerId::new("alice").unwrap()
    }

    #[test]
    fn root_points_at_itself() {
        let root = Object::new_root(
            owner(),
            content(b"hello"),
            Actor::User(owner()),
            ObjectMetadata::new(),
        );
        assert!(root.is_root());
        assert_eq!(root.root_id, root.id);
        assert_eq!(root.depth, 0);
        assert_eq!(root.version, 0);
        assert_eq!(root.size, 5);
    }

    #[test]
    fn child_inherits_root_and_depth() {
        let root = Object::new_root(
            owner(),
            content(b"a"),
            Actor::User(owner()),
            ObjectMetadata::new(),
        );
        let child = Object::new_child(
            &root,
            content(b"b"),
            Actor::Transform("upper".into()),
            ObjectMetadata::new(),
        );
        let grandchild = Object::new_child(
            &child,
            content(b"c"),
            Actor::Transform("upper".into()),
            ObjectMetadata::new(),
        );
        assert_eq!(child.parent_id, Some(root.id));
        assert_eq!(child.root_id, root.id);
        assert_eq!(child.depth, 1);
        assert_eq!(grandchild.root_id, root.id);
        assert_eq!(grandchild.depth, 2);
        assert_eq!(grandchild.owner_id, root.owner_id);
    }

    #[test]
    fn content_reflects_cached_fields() {
        let obj = Object::new_root(
            owner(),
            content(b"xyz"),
            Actor::User(owner()),
            ObjectMetadata::new(),
        );
        let c = obj.content();
        assert_eq!(c.hash, obj.content_ref);
        assert_eq!(c.size, 3);
        assert!(!obj.is_tombstoned());
    }
}
