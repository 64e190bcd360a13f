//! Bulk payload aggregation.
//!
//! For each talent pool the current member snapshots are stamped with the
//! pool's membership tag and appended, pool by pool, to one bulk payload.
//! A member appears once per pool it is collected from; the same `cvId`
//! listed twice within one pool is emitted once (first occurrence wins).

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use sync_types::{BulkPayload, ProfileRecord, SubjectId, TalentPool};

/// One pool with the member snapshots fetched for it.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    /// The pool.
    pub pool: TalentPool,
    /// Member snapshots as returned by the profile directory.
    pub members: Vec<ProfileRecord>,
}

/// Merge pool snapshots into one bulk payload.
///
/// Returns `None` when no pool contributed a member, so callers never create
/// a job for an empty payload.
pub fn aggregate<I>(pools: I) -> Option<BulkPayload>
where
    I: IntoIterator<Item = PoolSnapshot>,
{
    let mut profiles = Vec::new();

    for snapshot in pools {
        let mut seen: HashSet<SubjectId> = HashSet::new();
        for mut member in snapshot.members {
            if !seen.insert(member.cv_id.clone()) {
                continue;
            }
            member.add_membership(
                &snapshot.pool.talent_pool_id,
                &snapshot.pool.talent_pool_name,
            );
            profiles.push(member);
        }
    }

    if profiles.is_empty() {
        None
    } else {
        Some(BulkPayload { profiles })
    }
}

/// Lowercase hex SHA-256 of the payload's JSON encoding.
///
/// Serves as the identity of a snapshot when suppressing duplicate jobs.
pub fn payload_digest(payload: &BulkPayload) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(b"talent-sync-bulk-v1");
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_types::TalentPoolId;

    fn pool(id: &str, name: &str) -> TalentPool {
        TalentPool {
            talent_pool_id: TalentPoolId::new(id),
            talent_pool_name: name.to_string(),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn member(cv_id: &str) -> ProfileRecord {
        serde_json::from_value(json!({
            "cvId": cv_id,
            "lastModifiedDt": "2025-01-29T09:49:41.228Z",
            "user": {"userId": format!("user-{cv_id}"), "candidateCode": "WBJ-101"},
            "cvProfile": {"workingHours": 36, "willingToTravel": false},
            "visibleInTalentPool": true
        }))
        .unwrap()
    }

    #[test]
    fn two_pools_one_member_each() {
        let payload = aggregate(vec![
            PoolSnapshot {
                pool: pool("pool-a", "Pool A"),
                members: vec![member("cv-1")],
            },
            PoolSnapshot {
                pool: pool("pool-b", "Pool B"),
                members: vec![member("cv-2")],
            },
        ])
        .unwrap();

        assert_eq!(payload.len(), 2);
        assert_eq!(payload.profiles[0].cv_id.as_str(), "cv-1");
        assert_eq!(payload.profiles[0].member_of.len(), 1);
        assert_eq!(payload.profiles[0].member_of[0].talent_pool_id.as_str(), "pool-a");
        assert_eq!(payload.profiles[1].member_of[0].talent_pool_name, "Pool B");
    }

    #[test]
    fn duplicate_member_within_pool_emitted_once() {
        let payload = aggregate(vec![PoolSnapshot {
            pool: pool("pool-a", "Pool A"),
            members: vec![member("cv-1"), member("cv-1"), member("cv-2")],
        }])
        .unwrap();
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn same_member_in_two_pools_appears_per_pool() {
        let payload = aggregate(vec![
            PoolSnapshot {
                pool: pool("pool-a", "Pool A"),
                members: vec![member("cv-1")],
            },
            PoolSnapshot {
                pool: pool("pool-b", "Pool B"),
                members: vec![member("cv-1")],
            },
        ])
        .unwrap();
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.profiles[0].member_of[0].talent_pool_id.as_str(), "pool-a");
        assert_eq!(payload.profiles[1].member_of[0].talent_pool_id.as_str(), "pool-b");
    }

    #[test]
    fn empty_pools_contribute_nothing() {
        assert!(aggregate(vec![PoolSnapshot {
            pool: pool("pool-a", "Pool A"),
            members: vec![],
        }])
        .is_none());
        assert!(aggregate(Vec::new()).is_none());
    }

    #[test]
    fn empty_pool_between_populated_pools_is_skipped() {
        let payload = aggregate(vec![
            PoolSnapshot {
                pool: pool("pool-a", "Pool A"),
                members: vec![member("cv-1")],
            },
            PoolSnapshot {
                pool: pool("pool-empty", "Empty"),
                members: vec![],
            },
            PoolSnapshot {
                pool: pool("pool-c", "Pool C"),
                members: vec![member("cv-3")],
            },
        ])
        .unwrap();
        let ids: Vec<_> = payload.profiles.iter().map(|p| p.cv_id.as_str()).collect();
        assert_eq!(ids, vec!["cv-1", "cv-3"]);
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let build = |cv: &str| {
            aggregate(vec![PoolSnapshot {
                pool: pool("pool-a", "Pool A"),
                members: vec![member(cv)],
            }])
            .unwrap()
        };
        assert_eq!(payload_digest(&build("cv-1")), payload_digest(&build("cv-1")));
        assert_ne!(payload_digest(&build("cv-1")), payload_digest(&build("cv-2")));
        assert_eq!(payload_digest(&build("cv-1")).len(), 64);
    }
}
