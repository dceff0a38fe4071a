//! PostgreSQL store
//!
//! A `PgSession` holds at most one open transaction. It is begun lazily on
//! the first query after a checkpoint; `checkpoint` commits it and
//! `rollback` rolls it back. Dropping a session with an open transaction
//! rolls it back.

use super::{AccountStore, DepositStore, FileStore, PidStore, RecordStore, Session};
use crate::db::models::{
    Bucket, Community, FeaturedCommunity, FileInstance, NewPid, ObjectVersion, PersistentIdentifier,
    PidStatus, RecordMetadata, RecordRevision, RemoteAccount, RemoteToken, Sip, SipFile, User, UserIdentity,
};
use crate::db::{self, DbPool};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

pub struct PgSession {
    pool: DbPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, tx: None }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn conn(&mut self) -> Result<&mut PgConnection> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        Ok(&mut **self.tx.insert(tx))
    }
}

#[async_trait]
impl Session for PgSession {
    async fn checkpoint(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PidStore for PgSession {
    async fn get_pid(&mut self, pid_type: &str, pid_value: &str) -> Result<Option<PersistentIdentifier>> {
        db::pids::get_pid(self.conn().await?, pid_type, pid_value).await
    }

    async fn create_pid(&mut self, new: &NewPid) -> Result<PersistentIdentifier> {
        db::pids::create_pid(self.conn().await?, new).await
    }

    async fn register_pid(&mut self, id: i64, object_uuid: Uuid) -> Result<()> {
        db::pids::register_pid(self.conn().await?, id, object_uuid).await
    }

    async fn pids_for_object(&mut self, object_uuid: Uuid) -> Result<Vec<PersistentIdentifier>> {
        db::pids::pids_for_object(self.conn().await?, object_uuid).await
    }

    async fn set_status_for_object(&mut self, object_uuid: Uuid, status: PidStatus) -> Result<u64> {
        db::pids::set_status_for_object(self.conn().await?, object_uuid, status).await
    }

    async fn remove_pid(&mut self, id: i64) -> Result<()> {
        db::pids::remove_pid(self.conn().await?, id).await
    }

    async fn remove_pids_for_object(&mut self, object_uuid: Uuid) -> Result<u64> {
        db::pids::remove_pids_for_object(self.conn().await?, object_uuid).await
    }

    async fn insert_recid(&mut self, recid: i64) -> Result<()> {
        db::pids::insert_recid(self.conn().await?, recid).await
    }

    async fn recid_exists(&mut self, recid: i64) -> Result<bool> {
        db::pids::recid_exists(self.conn().await?, recid).await
    }

    async fn remove_recid(&mut self, recid: i64) -> Result<()> {
        db::pids::remove_recid(self.conn().await?, recid).await
    }
}

#[async_trait]
impl RecordStore for PgSession {
    async fn create_record(
        &mut self,
        id: Uuid,
        json: &Value,
        created: DateTime<Utc>,
        updated: DateTime<Utc>,
    ) -> Result<RecordMetadata> {
        db::records::create_record(self.conn().await?, id, json, created, updated).await
    }

    async fn get_record(&mut self, id: Uuid, with_deleted: bool) -> Result<Option<RecordMetadata>> {
        db::records::get_record(self.conn().await?, id, with_deleted).await
    }

    async fn update_record(&mut self, id: Uuid, json: &Value, updated: DateTime<Utc>) -> Result<RecordMetadata> {
        db::records::update_record(self.conn().await?, id, json, updated).await
    }

    async fn replace_json(&mut self, id: Uuid, json: &Value) -> Result<()> {
        db::records::replace_json(self.conn().await?, id, json).await
    }

    async fn list_revisions(&mut self, id: Uuid) -> Result<Vec<RecordRevision>> {
        db::records::list_revisions(self.conn().await?, id).await
    }

    async fn soft_delete(&mut self, id: Uuid) -> Result<()> {
        db::records::soft_delete(self.conn().await?, id).await
    }

    async fn remove_record(&mut self, id: Uuid) -> Result<()> {
        db::records::remove_record(self.conn().await?, id).await
    }
}

#[async_trait]
impl FileStore for PgSession {
    async fn create_bucket(&mut self) -> Result<Bucket> {
        db::files::create_bucket(self.conn().await?).await
    }

    async fn get_bucket(&mut self, id: Uuid) -> Result<Option<Bucket>> {
        db::files::get_bucket(self.conn().await?, id).await
    }

    async fn set_bucket_tag(&mut self, bucket_id: Uuid, key: &str, value: &str) -> Result<()> {
        db::files::set_bucket_tag(self.conn().await?, bucket_id, key, value).await
    }

    async fn get_bucket_tag(&mut self, bucket_id: Uuid, key: &str) -> Result<Option<String>> {
        db::files::get_bucket_tag(self.conn().await?, bucket_id, key).await
    }

    async fn mark_bucket_deleted(&mut self, id: Uuid) -> Result<()> {
        db::files::mark_bucket_deleted(self.conn().await?, id).await
    }

    async fn remove_bucket(&mut self, id: Uuid) -> Result<()> {
        db::files::remove_bucket(self.conn().await?, id).await
    }

    async fn link_record_bucket(&mut self, record_id: Uuid, bucket_id: Uuid) -> Result<()> {
        db::files::link_record_bucket(self.conn().await?, record_id, bucket_id).await
    }

    async fn buckets_for_record(&mut self, record_id: Uuid) -> Result<Vec<Uuid>> {
        db::files::buckets_for_record(self.conn().await?, record_id).await
    }

    async fn get_or_create_file_instance(&mut self, uri: &str, size: i64, checksum: &str) -> Result<FileInstance> {
        db::files::get_or_create_file_instance(self.conn().await?, uri, size, checksum).await
    }

    async fn get_file_instance(&mut self, id: Uuid) -> Result<Option<FileInstance>> {
        db::files::get_file_instance(self.conn().await?, id).await
    }

    async fn file_instance_refcount(&mut self, id: Uuid) -> Result<i64> {
        db::files::file_instance_refcount(self.conn().await?, id).await
    }

    async fn remove_file_instance(&mut self, id: Uuid) -> Result<()> {
        db::files::remove_file_instance(self.conn().await?, id).await
    }

    async fn list_objects(&mut self, bucket_id: Uuid, key: Option<&str>) -> Result<Vec<ObjectVersion>> {
        db::files::list_objects(self.conn().await?, bucket_id, key).await
    }

    async fn create_object(
        &mut self,
        bucket_id: Uuid,
        key: &str,
        file_id: Uuid,
        created: DateTime<Utc>,
    ) -> Result<ObjectVersion> {
        db::files::create_object(self.conn().await?, bucket_id, key, file_id, created).await
    }

    async fn set_head(&mut self, version_id: Uuid) -> Result<()> {
        db::files::set_head(self.conn().await?, version_id).await
    }

    async fn remove_objects(&mut self, bucket_id: Uuid) -> Result<Vec<Uuid>> {
        db::files::remove_objects(self.conn().await?, bucket_id).await
    }
}

#[async_trait]
impl AccountStore for PgSession {
    async fn get_user(&mut self, id: i64) -> Result<Option<User>> {
        db::accounts::get_user(self.conn().await?, id).await
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        db::accounts::find_user_by_email(self.conn().await?, email).await
    }

    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>> {
        db::accounts::find_user_by_username(self.conn().await?, username).await
    }

    async fn insert_user(&mut self, user: &User) -> Result<()> {
        db::accounts::insert_user(self.conn().await?, user).await
    }

    async fn get_community(&mut self, id: &str) -> Result<Option<Community>> {
        db::accounts::get_community(self.conn().await?, id).await
    }

    async fn insert_community(&mut self, community: &Community) -> Result<()> {
        db::accounts::insert_community(self.conn().await?, community).await
    }

    async fn get_featured(&mut self, id: i64) -> Result<Option<FeaturedCommunity>> {
        db::accounts::get_featured(self.conn().await?, id).await
    }

    async fn insert_featured(&mut self, featured: &FeaturedCommunity) -> Result<()> {
        db::accounts::insert_featured(self.conn().await?, featured).await
    }

    async fn get_remote_account(&mut self, id: i64) -> Result<Option<RemoteAccount>> {
        db::accounts::get_remote_account(self.conn().await?, id).await
    }

    async fn insert_remote_account(&mut self, account: &RemoteAccount) -> Result<()> {
        db::accounts::insert_remote_account(self.conn().await?, account).await
    }

    async fn get_user_identity(&mut self, id: &str, method: &str) -> Result<Option<UserIdentity>> {
        db::accounts::get_user_identity(self.conn().await?, id, method).await
    }

    async fn insert_user_identity(&mut self, identity: &UserIdentity) -> Result<()> {
        db::accounts::insert_user_identity(self.conn().await?, identity).await
    }

    async fn get_remote_token(&mut self, id_remote_account: i64, token_type: &str) -> Result<Option<RemoteToken>> {
        db::accounts::get_remote_token(self.conn().await?, id_remote_account, token_type).await
    }

    async fn insert_remote_token(&mut self, token: &RemoteToken) -> Result<()> {
        db::accounts::insert_remote_token(self.conn().await?, token).await
    }
}

#[async_trait]
impl DepositStore for PgSession {
    async fn create_sip(&mut self, sip: &Sip) -> Result<()> {
        db::deposits::create_sip(self.conn().await?, sip).await
    }

    async fn get_sip(&mut self, id: Uuid) -> Result<Option<Sip>> {
        db::deposits::get_sip(self.conn().await?, id).await
    }

    async fn link_sip_pid(&mut self, sip_id: Uuid, pid_id: i64) -> Result<()> {
        db::deposits::link_sip_pid(self.conn().await?, sip_id, pid_id).await
    }

    async fn sips_for_pid(&mut self, pid_id: i64) -> Result<Vec<Uuid>> {
        db::deposits::sips_for_pid(self.conn().await?, pid_id).await
    }

    async fn add_sip_file(&mut self, file: &SipFile) -> Result<()> {
        db::deposits::add_sip_file(self.conn().await?, file).await
    }

    async fn sip_files(&mut self, sip_id: Uuid) -> Result<Vec<SipFile>> {
        db::deposits::sip_files(self.conn().await?, sip_id).await
    }

    async fn remove_sip(&mut self, sip_id: Uuid) -> Result<Vec<Uuid>> {
        db::deposits::remove_sip(self.conn().await?, sip_id).await
    }

    async fn index_deposit(&mut self, recid: i64, deposit_id: Uuid) -> Result<()> {
        db::deposits::index_deposit(self.conn().await?, recid, deposit_id).await
    }

    async fn deposits_for_recid(&mut self, recid: i64) -> Result<Vec<Uuid>> {
        db::deposits::deposits_for_recid(self.conn().await?, recid).await
    }

    async fn unindex_deposit(&mut self, deposit_id: Uuid) -> Result<()> {
        db::deposits::unindex_deposit(self.conn().await?, deposit_id).await
    }
}
