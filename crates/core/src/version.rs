//! Optimistic concurrency for role and principal saves.

use crate::error::{DomainError, DomainResult};

/// Version a save expects to find in storage.
///
/// Roles and principals are versioned independently; every successful save
/// bumps the stored version by one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (seeding, administrative overrides).
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    /// `Conflict` unless the stored `actual` version is acceptable.
    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale version (expected: {self:?}, stored: {actual})"
            )))
        }
    }
}
