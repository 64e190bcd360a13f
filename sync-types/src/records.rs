//! Wire records exchanged with the profile store, the peer service and the
//! matching partner.
//!
//! Field names follow the camelCase JSON shape the collaborating services
//! use. CV sub-entities (experience, education, ...) are kept as opaque JSON
//! values; this crate never interprets them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Operation, SubjectId, TalentPoolId};

/// Snapshot of a job-seeker profile as supplied by the profile directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    /// Profile identifier
    pub cv_id: SubjectId,
    /// Last modification time, passed through verbatim
    pub last_modified_dt: String,
    /// Owning user
    pub user: ProfileUser,
    /// Working preferences
    pub cv_profile: CvProfile,
    /// Address information
    #[serde(default)]
    pub cv_address: CvAddress,
    /// CV sub-entities
    #[serde(default)]
    pub cv_items: CvItems,
    /// Whether the profile may be shown inside talent pools
    pub visible_in_talent_pool: bool,
    /// Talent pools this snapshot was collected from
    #[serde(default)]
    pub member_of: Vec<PoolMembership>,
    /// Application states per job offer
    #[serde(default)]
    pub application_status: Vec<Value>,
    /// Match feedback per job offer
    #[serde(default)]
    pub match_feedback: Vec<Value>,
    /// Fields this crate does not model, preserved for round-trips
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileRecord {
    /// Append a pool membership tag.
    ///
    /// Returns `false` if the snapshot already carried a tag for this pool.
    pub fn add_membership(&mut self, pool_id: &TalentPoolId, pool_name: &str) -> bool {
        if self.member_of.iter().any(|m| &m.talent_pool_id == pool_id) {
            return false;
        }
        self.member_of.push(PoolMembership {
            talent_pool_id: pool_id.clone(),
            talent_pool_name: pool_name.to_string(),
        });
        true
    }

    /// Encode as a JSON value (used for change log payloads).
    pub fn to_value(&self) -> Value {
        // A struct of strings, numbers and JSON values always serializes.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// User block of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUser {
    /// External user id
    pub user_id: String,
    /// Candidate code
    pub candidate_code: String,
}

/// Working preferences of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvProfile {
    /// Hours per week
    pub working_hours: i64,
    /// Willing to travel for work
    pub willing_to_travel: bool,
}

/// Address block; only the coordinates are modelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvAddress {
    /// `[lat, lon]` when known
    #[serde(default)]
    pub geo_location: Option<Vec<f64>>,
}

/// Opaque CV sub-entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvItems {
    /// Work experience entries
    #[serde(default)]
    pub experience: Vec<Value>,
    /// Education entries
    #[serde(default)]
    pub education: Vec<Value>,
    /// Hobbies
    #[serde(default)]
    pub hobby: Vec<Value>,
    /// Languages
    #[serde(default)]
    pub language: Vec<Value>,
    /// Soft skills
    #[serde(default)]
    pub soft_skill_knowledge: Vec<Value>,
    /// Certificates
    #[serde(default)]
    pub certificate: Vec<Value>,
}

/// Talent pool tag stamped on a profile during aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMembership {
    /// Pool identifier
    pub talent_pool_id: TalentPoolId,
    /// Pool display name
    pub talent_pool_name: String,
}

/// Request body sent to the matching partner for one change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerRequest {
    /// Profile identifier
    pub cv_id: SubjectId,
    /// Mutation tag
    pub operation: Operation,
    /// Profile body; absent for DELETE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,
}

impl PartnerRequest {
    /// Request for an INSERT or UPDATE carrying the profile body.
    pub fn with_profile(cv_id: SubjectId, operation: Operation, profile: Value) -> Self {
        Self {
            cv_id,
            operation,
            profile: Some(profile),
        }
    }

    /// Request for a DELETE: id and tag only.
    pub fn delete(cv_id: SubjectId) -> Self {
        Self {
            cv_id,
            operation: Operation::Delete,
            profile: None,
        }
    }
}

/// Bulk body shipped to the peer service's bulk endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkPayload {
    /// Profiles in pool order, then member order
    pub profiles: Vec<ProfileRecord>,
}

impl BulkPayload {
    /// Number of profile entries.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the payload carries no profiles.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// A talent pool owned by the talent pool side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalentPool {
    /// Unique business identifier
    pub talent_pool_id: TalentPoolId,
    /// Display name
    pub talent_pool_name: String,
    /// Unix timestamp (seconds) of creation
    pub created_at: i64,
    /// Unix timestamp (seconds) of last update
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_json() -> Value {
        json!({
            "cvId": "cv-1",
            "lastModifiedDt": "2025-01-29T09:49:41.228Z",
            "user": {"userId": "user-1", "candidateCode": "WBJ-101"},
            "cvProfile": {"workingHours": 36, "willingToTravel": false},
            "cvAddress": {"geoLocation": [52.3730796, 4.8924534]},
            "cvItems": {
                "experience": [{"professionNm": "Data Consultant", "company": "ABC Corp"}]
            },
            "visibleInTalentPool": true,
            "applicationStatus": [{"jobOfferCode": "2784631350_1", "applicationStatus": "in-progress"}]
        })
    }

    #[test]
    fn profile_record_parses_collaborator_shape() {
        let record: ProfileRecord = serde_json::from_value(sample_json()).unwrap();
        assert_eq!(record.cv_id.as_str(), "cv-1");
        assert_eq!(record.cv_profile.working_hours, 36);
        assert_eq!(record.cv_items.experience.len(), 1);
        assert!(record.cv_items.hobby.is_empty());
        assert!(record.member_of.is_empty());
        assert_eq!(record.cv_address.geo_location.as_deref(), Some(&[52.3730796, 4.8924534][..]));
    }

    #[test]
    fn profile_record_keeps_unknown_fields() {
        let mut value = sample_json();
        value["customFlag"] = json!("kept");
        let record: ProfileRecord = serde_json::from_value(value).unwrap();
        let back = record.to_value();
        assert_eq!(back["customFlag"], "kept");
    }

    #[test]
    fn add_membership_appends_once_per_pool() {
        let mut record: ProfileRecord = serde_json::from_value(sample_json()).unwrap();
        let pool = TalentPoolId::new("pool-1");
        assert!(record.add_membership(&pool, "Data people"));
        assert!(!record.add_membership(&pool, "Data people"));
        assert!(record.add_membership(&TalentPoolId::new("pool-2"), "Other"));
        assert_eq!(record.member_of.len(), 2);

        let value = record.to_value();
        assert_eq!(value["memberOf"][0]["talentPoolId"], "pool-1");
        assert_eq!(value["memberOf"][0]["talentPoolName"], "Data people");
    }

    #[test]
    fn delete_request_has_no_profile_field() {
        let request = PartnerRequest::delete(SubjectId::new("X"));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"cvId": "X", "operation": "DELETE"}));
    }

    #[test]
    fn insert_request_carries_profile() {
        let request =
            PartnerRequest::with_profile(SubjectId::new("X"), Operation::Insert, json!({"a": 1}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["operation"], "INSERT");
        assert_eq!(value["profile"]["a"], 1);
    }

    #[test]
    fn bulk_payload_shape() {
        let record: ProfileRecord = serde_json::from_value(sample_json()).unwrap();
        let payload = BulkPayload {
            profiles: vec![record],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["profiles"].as_array().unwrap().len(), 1);
        assert_eq!(payload.len(), 1);
        assert!(!payload.is_empty());
    }
}
