use weft_types::{DeltaOperation, ObjectId};

use crate::error::RepoResult;
use crate::traits::ObjectRepository;

/// Result of checking one object's delta chain against its cached fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    pub object_id: ObjectId,
    pub delta_count: u64,
    pub versions_contiguous: bool,
    pub caches_consistent: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Returns `true` if all checks passed.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A specific integrity violation detected during validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub version: u64,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    VersionGap,
    NotApplied,
    MisplacedCreate,
    DeltaAfterDelete,
    CacheMismatch,
}

/// Delta chain integrity validator.
pub struct ChainValidator;

impl ChainValidator {
    /// Check that the chain is gapless, starts with a create, has nothing
    /// after a delete, and that the object's cached fields equal what the
    /// chain implies.
    pub fn validate_object(
        repo: &dyn ObjectRepository,
        id: &ObjectId,
    ) -> RepoResult<ValidationReport> {
        let object = repo.get(id, None)?;
        let chain = repo.deltas(id, 0, u64::MAX)?;
        let mut violations = Vec::new();
        let mut versions_contiguous = true;
        let mut caches_consistent = true;

        for (index, delta) in chain.iter().enumerate() {
            let expected_from = index as u64;
            if delta.from_version != expected_from || delta.to_version != expected_from + 1 {
                versions_contiguous = false;
                violations.push(Violation {
                    version: delta.to_version,
                    kind: ViolationKind::VersionGap,
                    description: format!(
                        "expected {expected_from}->{}, got {}->{}",
                        expected_from + 1,
                        delta.from_version,
                        delta.to_version
                    ),
                });
            }
            if !delta.is_applied() {
                violations.push(Violation {
                    version: delta.to_version,
                    kind: ViolationKind::NotApplied,
                    description: format!("delta status is {:?}", delta.status),
                });
            }
            if (index == 0) != (delta.operation() == DeltaOperation::Create) {
                violations.push(Violation {
                    version: delta.to_version,
                    kind: ViolationKind::MisplacedCreate,
                    description: "the first delta, and only the first, must be a create".into(),
                });
            }
            if index > 0 && chain[index - 1].operation() == DeltaOperation::Delete {
                violations.push(Violation {
                    version: delta.to_version,
                    kind: ViolationKind::DeltaAfterDelete,
                    description: "delta applied to a tombstoned object".into(),
                });
            }
        }

        let mut cache_violation = |description: String| {
            caches_consistent = false;
            violations.push(Violation {
                version: object.version,
                kind: ViolationKind::CacheMismatch,
                description,
            });
        };
        if object.version != chain.len() as u64 {
            cache_violation(format!(
                "cached version {} but {} applied deltas",
                object.version,
                chain.len()
            ));
        }
        match chain.iter().rev().find_map(|d| d.result.as_ref()) {
            Some(content) if content.hash != object.content_ref || content.size != object.size => {
                cache_violation("cached content does not match the last delta".into());
            }
            None => cache_violation("chain never produced content".into()),
            Some(_) => {}
        }
        let deleted = chain
            .last()
            .is_some_and(|d| d.operation() == DeltaOperation::Delete);
        if deleted != object.is_tombstoned() {
            cache_violation(format!(
                "tombstone flag is {} but the chain says {deleted}",
                object.is_tombstoned()
            ));
        }

        Ok(ValidationReport {
            object_id: *id,
            delta_count: chain.len() as u64,
            versions_contiguous,
            caches_consistent,
            violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRepository;
    use weft_types::{
        Actor, ContentHash, ContentRef, Delta, Object, ObjectMetadata, OwnerId, Patch, UpdatePatch,
    };

    fn content(data: &[u8]) -> ContentRef {
        ContentRef {
            hash: ContentHash::from_bytes(data),
            size: data.len() as u64,
            content_type: "text/plain".into(),
        }
    }

    fn seeded() -> (InMemoryRepository, Object) {
        let repo = InMemoryRepository::new();
        let owner = OwnerId::new("alice").unwrap();
        let c = content(b"v1");
        let object = Object::new_root(
            owner.clone(),
            c.clone(),
            Actor::User(owner.clone()),
            ObjectMetadata::new(),
        );
        let genesis = Delta::new(
            object.id,
            0,
            Patch::Create {
                content: c.hash,
                content_type: c.content_type.clone(),
            },
            Actor::User(owner),
            Some(c),
        );
        let object = repo.create(object, genesis).unwrap();
        (repo, object)
    }

    #[test]
    fn healthy_chain_is_valid() {
        let (repo, object) = seeded();
        let c = content(b"v2");
        let update = Delta::new(
            object.id,
            1,
            Patch::Update(UpdatePatch::Replace { content: c.hash }),
            object.created_by.clone(),
            Some(c),
        );
        repo.append_delta(update).unwrap();
        let delete = Delta::new(object.id, 2, Patch::Delete, object.created_by.clone(), None);
        repo.append_delta(delete).unwrap();

        let report = ChainValidator::validate_object(&repo, &object.id).unwrap();
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.delta_count, 3);
        assert!(report.versions_contiguous);
        assert!(report.caches_consistent);
    }

    #[test]
    fn missing_object_is_an_error() {
        let repo = InMemoryRepository::new();
        assert!(ChainValidator::validate_object(&repo, &ObjectId::new()).is_err());
    }

    #[test]
    fn metadata_writes_do_not_break_the_chain() {
        let (repo, object) = seeded();
        repo.set_metadata(&object.id, ObjectMetadata::new().with_tag("reviewed"))
            .unwrap();
        assert!(ChainValidator::validate_object(&repo, &object.id)
            .unwrap()
            .is_valid());
    }
}
