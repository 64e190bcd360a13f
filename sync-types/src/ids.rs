//! Identity types for talent-sync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Operation, SyncError};

/// Identifier of a job-seeker profile (the partner-facing `cvId`).
///
/// Profiles are owned by the external profile store; the sync subsystem only
/// references them by this id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a SubjectId from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubjectId({})", self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a change log entry.
///
/// Assigned by storage and strictly increasing, so it also breaks ties
/// between entries recorded within the same millisecond.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeLogEntryId(u64);

impl ChangeLogEntryId {
    /// Create an entry id with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this id.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChangeLogEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChangeLogEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeLogEntryId({})", self.0)
    }
}

/// Identifier of a bulk sync job.
///
/// UUID v4 format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncJobId(uuid::Uuid);

impl SyncJobId {
    /// Create a new random SyncJobId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for SyncJobId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SyncError::InvalidId(s.to_string()))
    }
}

impl fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SyncJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncJobId({})", self.0)
    }
}

/// Business identifier of a talent pool (unique across pools).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TalentPoolId(String);

impl TalentPoolId {
    /// Create a TalentPoolId from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TalentPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TalentPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TalentPoolId({})", self.0)
    }
}

impl From<&str> for TalentPoolId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Deterministic idempotency key sent as `X-Idempotency-Key`.
///
/// Derived from `(subject, operation, entry)` so every attempt of the same
/// logical delivery carries the same key and the partner can collapse them.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Build the key for one change log entry.
    pub fn new(subject: &SubjectId, operation: Operation, entry: ChangeLogEntryId) -> Self {
        Self(format!("{}_{}_{}", subject, operation, entry))
    }

    /// Borrow the rendered key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdempotencyKey({})", self.0)
    }
}
