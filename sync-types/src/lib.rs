//! # sync-types
//!
//! Identity and wire types for talent-sync.
//!
//! This crate provides the foundational types used across all talent-sync crates:
//! - [`SubjectId`], [`ChangeLogEntryId`], [`SyncJobId`], [`TalentPoolId`] - Identity types
//! - [`Operation`] - Mutation tag carried by every change
//! - [`IdempotencyKey`] - Deterministic key for partner-side deduplication
//! - [`ProfileRecord`], [`PartnerRequest`], [`BulkPayload`] - Wire records
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod operation;
mod records;

pub use error::SyncError;
pub use ids::{ChangeLogEntryId, IdempotencyKey, SubjectId, SyncJobId, TalentPoolId};
pub use operation::Operation;
pub use records::{
    BulkPayload, CvAddress, CvItems, CvProfile, PartnerRequest, PoolMembership, ProfileRecord,
    ProfileUser, TalentPool,
};
