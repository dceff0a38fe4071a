//! Target storage seams
//!
//! The loaders talk to storage only through these traits. Every method
//! takes `&mut self`: one store value is one unit of work, made durable with
//! [`Session::checkpoint`] and discarded with [`Session::rollback`].
//!
//! - [`postgres::PgSession`] - one PostgreSQL transaction at a time
//! - [`memory::MemoryStore`] - in-process state for dry runs and tests

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgSession;

use crate::db::models::{
    Bucket, Community, FeaturedCommunity, FileInstance, NewPid, ObjectVersion, PersistentIdentifier,
    PidStatus, RecordMetadata, RecordRevision, RemoteAccount, RemoteToken, Sip, SipFile, User, UserIdentity,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Unit-of-work boundary
#[async_trait]
pub trait Session: Send {
    /// Make everything written so far durable.
    async fn checkpoint(&mut self) -> Result<()>;

    /// Discard everything written since the last checkpoint.
    async fn rollback(&mut self) -> Result<()>;
}

/// Identifier service and the legacy recid sequence
#[async_trait]
pub trait PidStore: Send {
    async fn get_pid(&mut self, pid_type: &str, pid_value: &str) -> Result<Option<PersistentIdentifier>>;

    /// Fails with `StorageConflict` when `(pid_type, pid_value)` is taken.
    async fn create_pid(&mut self, new: &NewPid) -> Result<PersistentIdentifier>;

    /// Bind a reserved identifier to `object_uuid` and mark it registered.
    async fn register_pid(&mut self, id: i64, object_uuid: Uuid) -> Result<()>;

    async fn pids_for_object(&mut self, object_uuid: Uuid) -> Result<Vec<PersistentIdentifier>>;

    /// Bulk status change of every identifier bound to `object_uuid`.
    async fn set_status_for_object(&mut self, object_uuid: Uuid, status: PidStatus) -> Result<u64>;

    async fn remove_pid(&mut self, id: i64) -> Result<()>;

    async fn remove_pids_for_object(&mut self, object_uuid: Uuid) -> Result<u64>;

    /// Fails with `StorageConflict` when the value is already taken.
    async fn insert_recid(&mut self, recid: i64) -> Result<()>;

    async fn recid_exists(&mut self, recid: i64) -> Result<bool>;

    async fn remove_recid(&mut self, recid: i64) -> Result<()>;
}

/// Record metadata with stored revision history
#[async_trait]
pub trait RecordStore: Send {
    /// Create a record; `json` becomes stored revision 1.
    async fn create_record(
        &mut self,
        id: Uuid,
        json: &Value,
        created: DateTime<Utc>,
        updated: DateTime<Utc>,
    ) -> Result<RecordMetadata>;

    async fn get_record(&mut self, id: Uuid, with_deleted: bool) -> Result<Option<RecordMetadata>>;

    /// Overwrite current metadata and store it as a new revision.
    async fn update_record(&mut self, id: Uuid, json: &Value, updated: DateTime<Utc>) -> Result<RecordMetadata>;

    /// Rewrite the current revision's metadata without adding a revision.
    async fn replace_json(&mut self, id: Uuid, json: &Value) -> Result<()>;

    async fn list_revisions(&mut self, id: Uuid) -> Result<Vec<RecordRevision>>;

    async fn soft_delete(&mut self, id: Uuid) -> Result<()>;

    /// Hard removal of the record and its revisions.
    async fn remove_record(&mut self, id: Uuid) -> Result<()>;
}

/// Buckets, content-addressed file instances and object version chains
#[async_trait]
pub trait FileStore: Send {
    async fn create_bucket(&mut self) -> Result<Bucket>;

    async fn get_bucket(&mut self, id: Uuid) -> Result<Option<Bucket>>;

    async fn set_bucket_tag(&mut self, bucket_id: Uuid, key: &str, value: &str) -> Result<()>;

    async fn get_bucket_tag(&mut self, bucket_id: Uuid, key: &str) -> Result<Option<String>>;

    async fn mark_bucket_deleted(&mut self, id: Uuid) -> Result<()>;

    /// Remove a bucket with its tags and links. Its objects must be removed first.
    async fn remove_bucket(&mut self, id: Uuid) -> Result<()>;

    async fn link_record_bucket(&mut self, record_id: Uuid, bucket_id: Uuid) -> Result<()>;

    async fn buckets_for_record(&mut self, record_id: Uuid) -> Result<Vec<Uuid>>;

    async fn get_or_create_file_instance(&mut self, uri: &str, size: i64, checksum: &str) -> Result<FileInstance>;

    async fn get_file_instance(&mut self, id: Uuid) -> Result<Option<FileInstance>>;

    async fn file_instance_refcount(&mut self, id: Uuid) -> Result<i64>;

    async fn remove_file_instance(&mut self, id: Uuid) -> Result<()>;

    /// Objects in creation order, grouped by key.
    async fn list_objects(&mut self, bucket_id: Uuid, key: Option<&str>) -> Result<Vec<ObjectVersion>>;

    /// Append a version under `key`; it becomes the head.
    async fn create_object(
        &mut self,
        bucket_id: Uuid,
        key: &str,
        file_id: Uuid,
        created: DateTime<Utc>,
    ) -> Result<ObjectVersion>;

    async fn set_head(&mut self, version_id: Uuid) -> Result<()>;

    /// Remove every object of a bucket, returning the file instances they used.
    async fn remove_objects(&mut self, bucket_id: Uuid) -> Result<Vec<Uuid>>;
}

/// Users, their external accounts, and communities
#[async_trait]
pub trait AccountStore: Send {
    async fn get_user(&mut self, id: i64) -> Result<Option<User>>;

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>>;

    async fn insert_user(&mut self, user: &User) -> Result<()>;

    async fn get_community(&mut self, id: &str) -> Result<Option<Community>>;

    async fn insert_community(&mut self, community: &Community) -> Result<()>;

    async fn get_featured(&mut self, id: i64) -> Result<Option<FeaturedCommunity>>;

    async fn insert_featured(&mut self, featured: &FeaturedCommunity) -> Result<()>;

    async fn get_remote_account(&mut self, id: i64) -> Result<Option<RemoteAccount>>;

    /// Fails with `StorageConflict` on a repeated id or `(user_id, client_id)`.
    async fn insert_remote_account(&mut self, account: &RemoteAccount) -> Result<()>;

    async fn get_user_identity(&mut self, id: &str, method: &str) -> Result<Option<UserIdentity>>;

    async fn insert_user_identity(&mut self, identity: &UserIdentity) -> Result<()>;

    async fn get_remote_token(&mut self, id_remote_account: i64, token_type: &str) -> Result<Option<RemoteToken>>;

    async fn insert_remote_token(&mut self, token: &RemoteToken) -> Result<()>;
}

/// SIPs and the recid to deposit index
#[async_trait]
pub trait DepositStore: Send {
    async fn create_sip(&mut self, sip: &Sip) -> Result<()>;

    async fn get_sip(&mut self, id: Uuid) -> Result<Option<Sip>>;

    async fn link_sip_pid(&mut self, sip_id: Uuid, pid_id: i64) -> Result<()>;

    async fn sips_for_pid(&mut self, pid_id: i64) -> Result<Vec<Uuid>>;

    async fn add_sip_file(&mut self, file: &SipFile) -> Result<()>;

    async fn sip_files(&mut self, sip_id: Uuid) -> Result<Vec<SipFile>>;

    /// Remove a SIP with its files and links, returning the file instances it used.
    async fn remove_sip(&mut self, sip_id: Uuid) -> Result<Vec<Uuid>>;

    async fn index_deposit(&mut self, recid: i64, deposit_id: Uuid) -> Result<()>;

    async fn deposits_for_recid(&mut self, recid: i64) -> Result<Vec<Uuid>>;

    async fn unindex_deposit(&mut self, deposit_id: Uuid) -> Result<()>;
}

/// Everything a loader needs
pub trait MigrationStore: Session + PidStore + RecordStore + FileStore + AccountStore + DepositStore {}

impl<T> MigrationStore for T where T: Session + PidStore + RecordStore + FileStore + AccountStore + DepositStore {}
