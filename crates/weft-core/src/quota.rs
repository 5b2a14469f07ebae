//! Per-owner limits supplied by an external collaborator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use weft_repo::OwnerUsage;
use weft_types::OwnerId;

/// Limits for one owner. `None` means unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub max_objects: Option<u64>,
    pub max_bytes: Option<u64>,
}

impl QuotaLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn objects(max_objects: u64) -> Self {
        Self {
            max_objects: Some(max_objects),
            max_bytes: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Check whether `usage` leaves room for one more object of
    /// `new_bytes` bytes. Returns the violated limit.
    pub fn admits(&self, usage: OwnerUsage, new_bytes: u64) -> Result<(), String> {
        if let Some(max) = self.max_objects {
            if usage.objects + 1 > max {
                return Err(format!("{} of {max} objects in use", usage.objects));
            }
        }
        if let Some(max) = self.max_bytes {
            if usage.bytes.saturating_add(new_bytes) > max {
                return Err(format!(
                    "{} + {new_bytes} bytes exceeds the {max} byte limit",
                    usage.bytes
                ));
            }
        }
        Ok(())
    }
}

/// Source of quota limits.
pub trait QuotaProvider: Send + Sync {
    fn limits(&self, owner: &OwnerId) -> QuotaLimits;
}

/// No limits for anyone.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unlimited;

impl QuotaProvider for Unlimited {
    fn limits(&self, _owner: &OwnerId) -> QuotaLimits {
        QuotaLimits::unlimited()
    }
}

/// Fixed limits with per-owner overrides.
#[derive(Clone, Debug, Default)]
pub struct StaticQuota {
    default: QuotaLimits,
    overrides: HashMap<OwnerId, QuotaLimits>,
}

impl StaticQuota {
    pub fn new(default: QuotaLimits) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_owner(mut self, owner: OwnerId, limits: QuotaLimits) -> Self {
        self.overrides.insert(owner, limits);
        self
    }
}

impl QuotaProvider for StaticQuota {
    fn limits(&self, owner: &OwnerId) -> QuotaLimits {
        self.overrides.get(owner).copied().unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(objects: u64, bytes: u64) -> OwnerUsage {
        OwnerUsage { objects, bytes }
    }

    #[test]
    fn object_limit_is_inclusive() {
        let limits = QuotaLimits::objects(2);
        assert!(limits.admits(usage(1, 0), 10).is_ok());
        assert!(limits.admits(usage(2, 0), 10).is_err());
    }

    #[test]
    fn byte_limit_counts_the_new_payload() {
        let limits = QuotaLimits::unlimited().with_max_bytes(100);
        assert!(limits.admits(usage(5, 60), 40).is_ok());
        let reason = limits.admits(usage(5, 60), 41).unwrap_err();
        assert!(reason.contains("100 byte limit"));
    }

    #[test]
    fn overrides_win_over_the_default() {
        let alice = OwnerId::new("alice").unwrap();
        let bob = OwnerId::new("bob").unwrap();
        let quota = StaticQuota::new(QuotaLimits::objects(10))
            .with_owner(alice.clone(), QuotaLimits::objects(1));
        assert_eq!(quota.limits(&alice).max_objects, Some(1));
        assert_eq!(quota.limits(&bob).max_objects, Some(10));
        assert_eq!(Unlimited.limits(&bob), QuotaLimits::unlimited());
    }
}
