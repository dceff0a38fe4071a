//! Database models for the migration target
//!
//! These structs map directly to the tables in `migrations/` and double as
//! the value types of the in-memory store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata key holding the file manifest of a record or deposit
pub const FILES_KEY: &str = "_files";

// =============================================================================
// Persistent identifiers
// =============================================================================

/// Lifecycle of a persistent identifier.
/// Matches the `status` column in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum PidStatus {
    /// Value taken, no object bound yet
    Reserved = 1,
    /// Bound to a live object
    Registered = 2,
    /// Object deleted; identifier stays taken
    Deleted = 3,
}

impl PidStatus {
    /// Convert from database smallint
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(PidStatus::Reserved),
            2 => Some(PidStatus::Registered),
            3 => Some(PidStatus::Deleted),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PidStatus::Reserved => "RESERVED",
            PidStatus::Registered => "REGISTERED",
            PidStatus::Deleted => "DELETED",
        }
    }
}

/// A typed external identifier bound to at most one object.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct PersistentIdentifier {
    pub id: i64,
    pub pid_type: String,
    pub pid_value: String,
    pub pid_provider: Option<String>,
    pub status: PidStatus,
    /// `rec` when an object is bound
    pub object_type: Option<String>,
    pub object_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new identifier
#[derive(Debug, Clone)]
pub struct NewPid {
    pub pid_type: String,
    pub pid_value: String,
    pub pid_provider: Option<String>,
    pub status: PidStatus,
    pub object_uuid: Option<Uuid>,
}

impl NewPid {
    /// A registered identifier bound to `object_uuid`
    pub fn registered(pid_type: &str, pid_value: impl Into<String>, object_uuid: Uuid) -> Self {
        Self {
            pid_type: pid_type.to_string(),
            pid_value: pid_value.into(),
            pid_provider: None,
            status: PidStatus::Registered,
            object_uuid: Some(object_uuid),
        }
    }

    /// A reserved identifier without object
    pub fn reserved(pid_type: &str, pid_value: impl Into<String>) -> Self {
        Self {
            pid_type: pid_type.to_string(),
            pid_value: pid_value.into(),
            pid_provider: None,
            status: PidStatus::Reserved,
            object_uuid: None,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Current state of a record. `version_id` counts stored revisions.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct RecordMetadata {
    pub id: Uuid,
    pub json: Value,
    pub version_id: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub is_deleted: bool,
}

impl RecordMetadata {
    /// Entries of the file manifest, empty when the record has none
    pub fn manifest(&self) -> &[Value] {
        self.json
            .get(FILES_KEY)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Distinct bucket ids referenced by the manifest, in manifest order
    pub fn manifest_buckets(&self) -> Vec<Uuid> {
        let mut buckets = Vec::new();
        for entry in self.manifest() {
            let bucket = entry
                .get("bucket")
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok());
            if let Some(bucket) = bucket {
                if !buckets.contains(&bucket) {
                    buckets.push(bucket);
                }
            }
        }
        buckets
    }
}

/// One stored revision of a record
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct RecordRevision {
    pub record_id: Uuid,
    pub version_id: i32,
    pub json: Value,
    pub updated: DateTime<Utc>,
}

// =============================================================================
// Files
// =============================================================================

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Bucket {
    pub id: Uuid,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Content reference, deduplicated on `(uri, size, checksum)`.
/// The source location is referenced, never copied.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct FileInstance {
    pub id: Uuid,
    pub uri: String,
    pub size: i64,
    /// `md5:<hex>`
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// One version of a key inside a bucket
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct ObjectVersion {
    pub version_id: Uuid,
    pub bucket_id: Uuid,
    pub key: String,
    pub file_id: Option<Uuid>,
    pub is_head: bool,
    pub created: DateTime<Utc>,
    /// Insertion order within the store
    pub seq: i64,
}

// =============================================================================
// Accounts and communities
// =============================================================================

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: Option<String>,
    pub given_names: Option<String>,
    pub family_name: Option<String>,
    pub note: Option<String>,
    pub settings: Option<Value>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Community {
    pub id: String,
    pub id_user: i64,
    pub title: String,
    pub description: String,
    pub page: String,
    pub curation_policy: String,
    pub last_record_accepted: Option<DateTime<Utc>>,
    pub logo_ext: Option<String>,
    pub ranking: i32,
    pub fixed_points: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct FeaturedCommunity {
    pub id: i64,
    pub id_community: String,
    pub start_date: DateTime<Utc>,
}

/// Account linked at an external OAuth provider
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct RemoteAccount {
    pub id: i64,
    pub user_id: i64,
    pub client_id: String,
    pub extra_data: Value,
}

/// External identity of a user, keyed by `(id, method)`
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct UserIdentity {
    pub id: String,
    pub method: String,
    pub id_user: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct RemoteToken {
    pub id_remote_account: i64,
    pub token_type: String,
    pub access_token: String,
    pub secret: String,
}

// =============================================================================
// Submission information packages
// =============================================================================

/// Archived submission of a deposit
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct Sip {
    pub id: Uuid,
    pub user_id: Option<i64>,
    pub agent: Value,
    pub content: String,
    pub sip_format: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct SipFile {
    pub sip_id: Uuid,
    pub filepath: String,
    pub file_id: Uuid,
}
