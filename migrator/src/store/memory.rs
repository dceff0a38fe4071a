//! In-memory store
//!
//! Keeps a working copy and the state as of the last checkpoint. Used by
//! `--dry-run` and by the loader tests.

use super::{AccountStore, DepositStore, FileStore, PidStore, RecordStore, Session};
use crate::db::models::{
    Bucket, Community, FeaturedCommunity, FileInstance, NewPid, ObjectVersion, PersistentIdentifier,
    PidStatus, RecordMetadata, RecordRevision, RemoteAccount, RemoteToken, Sip, SipFile, User, UserIdentity,
};
use crate::db::Stats;
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub recids: BTreeSet<i64>,
    pub pids: BTreeMap<i64, PersistentIdentifier>,
    pub records: BTreeMap<Uuid, RecordMetadata>,
    pub revisions: BTreeMap<Uuid, Vec<RecordRevision>>,
    pub buckets: BTreeMap<Uuid, Bucket>,
    pub bucket_tags: BTreeMap<(Uuid, String), String>,
    pub records_buckets: BTreeSet<(Uuid, Uuid)>,
    pub file_instances: BTreeMap<Uuid, FileInstance>,
    pub objects: Vec<ObjectVersion>,
    pub users: BTreeMap<i64, User>,
    pub communities: BTreeMap<String, Community>,
    pub featured: BTreeMap<i64, FeaturedCommunity>,
    pub remote_accounts: BTreeMap<i64, RemoteAccount>,
    pub user_identities: BTreeMap<(String, String), UserIdentity>,
    pub remote_tokens: BTreeMap<(i64, String), RemoteToken>,
    pub sips: BTreeMap<Uuid, Sip>,
    pub record_sips: BTreeSet<(Uuid, i64)>,
    pub sip_files: Vec<SipFile>,
    pub deposit_index: BTreeSet<(i64, Uuid)>,
    next_pid_id: i64,
    next_object_seq: i64,
}

impl MemoryState {
    pub fn stats(&self) -> Stats {
        let pids_with = |status: PidStatus| self.pids.values().filter(|p| p.status == status).count() as i64;
        Stats {
            records: self.records.values().filter(|r| !r.is_deleted).count() as i64,
            deleted_records: self.records.values().filter(|r| r.is_deleted).count() as i64,
            revisions: self.revisions.values().map(|r| r.len() as i64).sum(),
            reserved_pids: pids_with(PidStatus::Reserved),
            registered_pids: pids_with(PidStatus::Registered),
            deleted_pids: pids_with(PidStatus::Deleted),
            buckets: self.buckets.len() as i64,
            objects: self.objects.len() as i64,
            file_instances: self.file_instances.len() as i64,
            users: self.users.len() as i64,
            communities: self.communities.len() as i64,
            featured: self.featured.len() as i64,
            sips: self.sips.len() as i64,
            remote_accounts: self.remote_accounts.len() as i64,
            user_identities: self.user_identities.len() as i64,
            remote_tokens: self.remote_tokens.len() as i64,
        }
    }

    fn record_mut(&mut self, id: Uuid) -> Result<&mut RecordMetadata> {
        self.records
            .get_mut(&id)
            .ok_or_else(|| MigrateError::NotFound(format!("record {}", id)))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    working: MemoryState,
    committed: MemoryState,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state including uncheckpointed writes
    pub fn state(&self) -> &MemoryState {
        &self.working
    }

    /// State as of the last checkpoint
    pub fn committed(&self) -> &MemoryState {
        &self.committed
    }
}

#[async_trait]
impl Session for MemoryStore {
    async fn checkpoint(&mut self) -> Result<()> {
        self.committed = self.working.clone();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.working = self.committed.clone();
        Ok(())
    }
}

#[async_trait]
impl PidStore for MemoryStore {
    async fn get_pid(&mut self, pid_type: &str, pid_value: &str) -> Result<Option<PersistentIdentifier>> {
        Ok(self
            .working
            .pids
            .values()
            .find(|p| p.pid_type == pid_type && p.pid_value == pid_value)
            .cloned())
    }

    async fn create_pid(&mut self, new: &NewPid) -> Result<PersistentIdentifier> {
        if self.get_pid(&new.pid_type, &new.pid_value).await?.is_some() {
            return Err(MigrateError::StorageConflict(format!(
                "pid {}:{} already exists",
                new.pid_type, new.pid_value
            )));
        }
        let state = &mut self.working;
        state.next_pid_id += 1;
        let pid = PersistentIdentifier {
            id: state.next_pid_id,
            pid_type: new.pid_type.clone(),
            pid_value: new.pid_value.clone(),
            pid_provider: new.pid_provider.clone(),
            status: new.status,
            object_type: new.object_uuid.map(|_| "rec".to_string()),
            object_uuid: new.object_uuid,
            created_at: Utc::now(),
        };
        state.pids.insert(pid.id, pid.clone());
        Ok(pid)
    }

    async fn register_pid(&mut self, id: i64, object_uuid: Uuid) -> Result<()> {
        if let Some(pid) = self.working.pids.get_mut(&id) {
            pid.status = PidStatus::Registered;
            pid.object_type = Some("rec".to_string());
            pid.object_uuid = Some(object_uuid);
        }
        Ok(())
    }

    async fn pids_for_object(&mut self, object_uuid: Uuid) -> Result<Vec<PersistentIdentifier>> {
        Ok(self
            .working
            .pids
            .values()
            .filter(|p| p.object_uuid == Some(object_uuid))
            .cloned()
            .collect())
    }

    async fn set_status_for_object(&mut self, object_uuid: Uuid, status: PidStatus) -> Result<u64> {
        let mut changed = 0;
        for pid in self.working.pids.values_mut() {
            if pid.object_uuid == Some(object_uuid) {
                pid.status = status;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn remove_pid(&mut self, id: i64) -> Result<()> {
        self.working.record_sips.retain(|(_, pid_id)| *pid_id != id);
        self.working.pids.remove(&id);
        Ok(())
    }

    async fn remove_pids_for_object(&mut self, object_uuid: Uuid) -> Result<u64> {
        let ids: Vec<i64> = self
            .pids_for_object(object_uuid)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        for id in &ids {
            self.remove_pid(*id).await?;
        }
        Ok(ids.len() as u64)
    }

    async fn insert_recid(&mut self, recid: i64) -> Result<()> {
        if !self.working.recids.insert(recid) {
            return Err(MigrateError::StorageConflict(format!("recid {} already taken", recid)));
        }
        Ok(())
    }

    async fn recid_exists(&mut self, recid: i64) -> Result<bool> {
        Ok(self.working.recids.contains(&recid))
    }

    async fn remove_recid(&mut self, recid: i64) -> Result<()> {
        self.working.recids.remove(&recid);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_record(
        &mut self,
        id: Uuid,
        json: &Value,
        created: DateTime<Utc>,
        updated: DateTime<Utc>,
    ) -> Result<RecordMetadata> {
        if self.working.records.contains_key(&id) {
            return Err(MigrateError::StorageConflict(format!("record {} already exists", id)));
        }
        let record = RecordMetadata {
            id,
            json: json.clone(),
            version_id: 1,
            created,
            updated,
            is_deleted: false,
        };
        self.working.records.insert(id, record.clone());
        self.working.revisions.insert(
            id,
            vec![RecordRevision {
                record_id: id,
                version_id: 1,
                json: json.clone(),
                updated,
            }],
        );
        Ok(record)
    }

    async fn get_record(&mut self, id: Uuid, with_deleted: bool) -> Result<Option<RecordMetadata>> {
        Ok(self
            .working
            .records
            .get(&id)
            .filter(|r| with_deleted || !r.is_deleted)
            .cloned())
    }

    async fn update_record(&mut self, id: Uuid, json: &Value, updated: DateTime<Utc>) -> Result<RecordMetadata> {
        let record = self.working.record_mut(id)?;
        record.json = json.clone();
        record.updated = updated;
        record.version_id += 1;
        let record = record.clone();
        self.working.revisions.entry(id).or_default().push(RecordRevision {
            record_id: id,
            version_id: record.version_id,
            json: json.clone(),
            updated,
        });
        Ok(record)
    }

    async fn replace_json(&mut self, id: Uuid, json: &Value) -> Result<()> {
        let record = self.working.record_mut(id)?;
        record.json = json.clone();
        let version_id = record.version_id;
        if let Some(revision) = self
            .working
            .revisions
            .get_mut(&id)
            .and_then(|revs| revs.iter_mut().find(|r| r.version_id == version_id))
        {
            revision.json = json.clone();
        }
        Ok(())
    }

    async fn list_revisions(&mut self, id: Uuid) -> Result<Vec<RecordRevision>> {
        Ok(self.working.revisions.get(&id).cloned().unwrap_or_default())
    }

    async fn soft_delete(&mut self, id: Uuid) -> Result<()> {
        if let Some(record) = self.working.records.get_mut(&id) {
            record.is_deleted = true;
        }
        Ok(())
    }

    async fn remove_record(&mut self, id: Uuid) -> Result<()> {
        self.working.revisions.remove(&id);
        self.working.records.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn create_bucket(&mut self) -> Result<Bucket> {
        let bucket = Bucket {
            id: Uuid::new_v4(),
            deleted: false,
            created_at: Utc::now(),
        };
        self.working.buckets.insert(bucket.id, bucket.clone());
        Ok(bucket)
    }

    async fn get_bucket(&mut self, id: Uuid) -> Result<Option<Bucket>> {
        Ok(self.working.buckets.get(&id).cloned())
    }

    async fn set_bucket_tag(&mut self, bucket_id: Uuid, key: &str, value: &str) -> Result<()> {
        self.working
            .bucket_tags
            .insert((bucket_id, key.to_string()), value.to_string());
        Ok(())
    }

    async fn get_bucket_tag(&mut self, bucket_id: Uuid, key: &str) -> Result<Option<String>> {
        Ok(self.working.bucket_tags.get(&(bucket_id, key.to_string())).cloned())
    }

    async fn mark_bucket_deleted(&mut self, id: Uuid) -> Result<()> {
        if let Some(bucket) = self.working.buckets.get_mut(&id) {
            bucket.deleted = true;
        }
        Ok(())
    }

    async fn remove_bucket(&mut self, id: Uuid) -> Result<()> {
        if self.working.objects.iter().any(|o| o.bucket_id == id) {
            return Err(MigrateError::StorageConflict(format!("bucket {} still has objects", id)));
        }
        self.working.bucket_tags.retain(|(bucket_id, _), _| *bucket_id != id);
        self.working.records_buckets.retain(|(_, bucket_id)| *bucket_id != id);
        self.working.buckets.remove(&id);
        Ok(())
    }

    async fn link_record_bucket(&mut self, record_id: Uuid, bucket_id: Uuid) -> Result<()> {
        self.working.records_buckets.insert((record_id, bucket_id));
        Ok(())
    }

    async fn buckets_for_record(&mut self, record_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .working
            .records_buckets
            .iter()
            .filter(|(rec, _)| *rec == record_id)
            .map(|(_, bucket)| *bucket)
            .collect())
    }

    async fn get_or_create_file_instance(&mut self, uri: &str, size: i64, checksum: &str) -> Result<FileInstance> {
        let existing = self
            .working
            .file_instances
            .values()
            .find(|f| f.uri == uri && f.size == size && f.checksum == checksum);
        if let Some(file) = existing {
            return Ok(file.clone());
        }
        let file = FileInstance {
            id: Uuid::new_v4(),
            uri: uri.to_string(),
            size,
            checksum: checksum.to_string(),
            created_at: Utc::now(),
        };
        self.working.file_instances.insert(file.id, file.clone());
        Ok(file)
    }

    async fn get_file_instance(&mut self, id: Uuid) -> Result<Option<FileInstance>> {
        Ok(self.working.file_instances.get(&id).cloned())
    }

    async fn file_instance_refcount(&mut self, id: Uuid) -> Result<i64> {
        let objects = self.working.objects.iter().filter(|o| o.file_id == Some(id)).count();
        let sip_files = self.working.sip_files.iter().filter(|f| f.file_id == id).count();
        Ok((objects + sip_files) as i64)
    }

    async fn remove_file_instance(&mut self, id: Uuid) -> Result<()> {
        self.working.file_instances.remove(&id);
        Ok(())
    }

    async fn list_objects(&mut self, bucket_id: Uuid, key: Option<&str>) -> Result<Vec<ObjectVersion>> {
        let mut objects: Vec<ObjectVersion> = self
            .working
            .objects
            .iter()
            .filter(|o| o.bucket_id == bucket_id && key.map_or(true, |k| o.key == k))
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key).then(a.seq.cmp(&b.seq)));
        Ok(objects)
    }

    async fn create_object(
        &mut self,
        bucket_id: Uuid,
        key: &str,
        file_id: Uuid,
        created: DateTime<Utc>,
    ) -> Result<ObjectVersion> {
        if !self.working.buckets.contains_key(&bucket_id) {
            return Err(MigrateError::NotFound(format!("bucket {}", bucket_id)));
        }
        for object in self.working.objects.iter_mut() {
            if object.bucket_id == bucket_id && object.key == key {
                object.is_head = false;
            }
        }
        self.working.next_object_seq += 1;
        let object = ObjectVersion {
            version_id: Uuid::new_v4(),
            bucket_id,
            key: key.to_string(),
            file_id: Some(file_id),
            is_head: true,
            created,
            seq: self.working.next_object_seq,
        };
        self.working.objects.push(object.clone());
        Ok(object)
    }

    async fn set_head(&mut self, version_id: Uuid) -> Result<()> {
        let target = self
            .working
            .objects
            .iter()
            .find(|o| o.version_id == version_id)
            .map(|o| (o.bucket_id, o.key.clone()))
            .ok_or_else(|| MigrateError::NotFound(format!("object version {}", version_id)))?;
        for object in self.working.objects.iter_mut() {
            if object.bucket_id == target.0 && object.key == target.1 {
                object.is_head = object.version_id == version_id;
            }
        }
        Ok(())
    }

    async fn remove_objects(&mut self, bucket_id: Uuid) -> Result<Vec<Uuid>> {
        let mut files = Vec::new();
        self.working.objects.retain(|o| {
            if o.bucket_id == bucket_id {
                files.extend(o.file_id);
                false
            } else {
                true
            }
        });
        files.sort();
        files.dedup();
        Ok(files)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_user(&mut self, id: i64) -> Result<Option<User>> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| {
                u.username
                    .as_deref()
                    .map_or(false, |name| name.eq_ignore_ascii_case(username))
            })
            .cloned())
    }

    async fn insert_user(&mut self, user: &User) -> Result<()> {
        let email_taken = self.find_user_by_email(&user.email).await?.is_some();
        let username_taken = match &user.username {
            Some(name) => self.find_user_by_username(name).await?.is_some(),
            None => false,
        };
        if email_taken || username_taken || self.working.users.contains_key(&user.id) {
            return Err(MigrateError::StorageConflict(format!("user {} already exists", user.id)));
        }
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_community(&mut self, id: &str) -> Result<Option<Community>> {
        Ok(self.working.communities.get(id).cloned())
    }

    async fn insert_community(&mut self, community: &Community) -> Result<()> {
        if self.working.communities.contains_key(&community.id) {
            return Err(MigrateError::StorageConflict(format!(
                "community {} already exists",
                community.id
            )));
        }
        self.working
            .communities
            .insert(community.id.clone(), community.clone());
        Ok(())
    }

    async fn get_featured(&mut self, id: i64) -> Result<Option<FeaturedCommunity>> {
        Ok(self.working.featured.get(&id).cloned())
    }

    async fn insert_featured(&mut self, featured: &FeaturedCommunity) -> Result<()> {
        if self.working.featured.contains_key(&featured.id) {
            return Err(MigrateError::StorageConflict(format!(
                "featured community {} already exists",
                featured.id
            )));
        }
        self.working.featured.insert(featured.id, featured.clone());
        Ok(())
    }

    async fn get_remote_account(&mut self, id: i64) -> Result<Option<RemoteAccount>> {
        Ok(self.working.remote_accounts.get(&id).cloned())
    }

    async fn insert_remote_account(&mut self, account: &RemoteAccount) -> Result<()> {
        let pair_taken = self
            .working
            .remote_accounts
            .values()
            .any(|a| a.user_id == account.user_id && a.client_id == account.client_id);
        if pair_taken || self.working.remote_accounts.contains_key(&account.id) {
            return Err(MigrateError::StorageConflict(format!(
                "remote account {} already exists",
                account.id
            )));
        }
        self.working.remote_accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_user_identity(&mut self, id: &str, method: &str) -> Result<Option<UserIdentity>> {
        Ok(self
            .working
            .user_identities
            .get(&(id.to_string(), method.to_string()))
            .cloned())
    }

    async fn insert_user_identity(&mut self, identity: &UserIdentity) -> Result<()> {
        let key = (identity.id.clone(), identity.method.clone());
        if self.working.user_identities.contains_key(&key) {
            return Err(MigrateError::StorageConflict(format!(
                "user identity {}/{} already exists",
                identity.method, identity.id
            )));
        }
        self.working.user_identities.insert(key, identity.clone());
        Ok(())
    }

    async fn get_remote_token(&mut self, id_remote_account: i64, token_type: &str) -> Result<Option<RemoteToken>> {
        Ok(self
            .working
            .remote_tokens
            .get(&(id_remote_account, token_type.to_string()))
            .cloned())
    }

    async fn insert_remote_token(&mut self, token: &RemoteToken) -> Result<()> {
        let key = (token.id_remote_account, token.token_type.clone());
        if self.working.remote_tokens.contains_key(&key) {
            return Err(MigrateError::StorageConflict(format!(
                "remote token {}/{} already exists",
                token.id_remote_account, token.token_type
            )));
        }
        self.working.remote_tokens.insert(key, token.clone());
        Ok(())
    }
}

#[async_trait]
impl DepositStore for MemoryStore {
    async fn create_sip(&mut self, sip: &Sip) -> Result<()> {
        self.working.sips.insert(sip.id, sip.clone());
        Ok(())
    }

    async fn get_sip(&mut self, id: Uuid) -> Result<Option<Sip>> {
        Ok(self.working.sips.get(&id).cloned())
    }

    async fn link_sip_pid(&mut self, sip_id: Uuid, pid_id: i64) -> Result<()> {
        self.working.record_sips.insert((sip_id, pid_id));
        Ok(())
    }

    async fn sips_for_pid(&mut self, pid_id: i64) -> Result<Vec<Uuid>> {
        Ok(self
            .working
            .record_sips
            .iter()
            .filter(|(_, pid)| *pid == pid_id)
            .map(|(sip, _)| *sip)
            .collect())
    }

    async fn add_sip_file(&mut self, file: &SipFile) -> Result<()> {
        self.working.sip_files.push(file.clone());
        Ok(())
    }

    async fn sip_files(&mut self, sip_id: Uuid) -> Result<Vec<SipFile>> {
        let mut files: Vec<SipFile> = self
            .working
            .sip_files
            .iter()
            .filter(|f| f.sip_id == sip_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.filepath.cmp(&b.filepath));
        Ok(files)
    }

    async fn remove_sip(&mut self, sip_id: Uuid) -> Result<Vec<Uuid>> {
        let mut files = Vec::new();
        self.working.sip_files.retain(|f| {
            if f.sip_id == sip_id {
                files.push(f.file_id);
                false
            } else {
                true
            }
        });
        self.working.record_sips.retain(|(sip, _)| *sip != sip_id);
        self.working.sips.remove(&sip_id);
        Ok(files)
    }

    async fn index_deposit(&mut self, recid: i64, deposit_id: Uuid) -> Result<()> {
        self.working.deposit_index.insert((recid, deposit_id));
        Ok(())
    }

    async fn deposits_for_recid(&mut self, recid: i64) -> Result<Vec<Uuid>> {
        Ok(self
            .working
            .deposit_index
            .iter()
            .filter(|(r, _)| *r == recid)
            .map(|(_, deposit)| *deposit)
            .collect())
    }

    async fn unindex_deposit(&mut self, deposit_id: Uuid) -> Result<()> {
        self.working.deposit_index.retain(|(_, deposit)| *deposit != deposit_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_rollback_discards_since_checkpoint() {
        let mut store = MemoryStore::new();
        store.insert_recid(1).await.unwrap();
        store.checkpoint().await.unwrap();
        store.insert_recid(2).await.unwrap();
        assert!(store.recid_exists(2).await.unwrap());

        store.rollback().await.unwrap();
        assert!(store.recid_exists(1).await.unwrap());
        assert!(!store.recid_exists(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_recid_conflicts() {
        let mut store = MemoryStore::new();
        store.insert_recid(42).await.unwrap();
        let err = store.insert_recid(42).await.unwrap_err();
        assert!(matches!(err, MigrateError::StorageConflict(_)));
    }

    #[tokio::test]
    async fn test_duplicate_pid_conflicts() {
        let mut store = MemoryStore::new();
        store.create_pid(&NewPid::reserved("recid", "1")).await.unwrap();
        let err = store.create_pid(&NewPid::reserved("recid", "1")).await.unwrap_err();
        assert!(matches!(err, MigrateError::StorageConflict(_)));
    }

    #[tokio::test]
    async fn test_revisions_and_replace_json() {
        let mut store = MemoryStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        store.create_record(id, &json!({"v": 1}), now, now).await.unwrap();
        store.update_record(id, &json!({"v": 2}), now).await.unwrap();
        store.replace_json(id, &json!({"v": 2, "_files": []})).await.unwrap();

        let revisions = store.list_revisions(id).await.unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[1].json, json!({"v": 2, "_files": []}));
        let record = store.get_record(id, false).await.unwrap().unwrap();
        assert_eq!(record.version_id, 2);

        store.soft_delete(id).await.unwrap();
        assert!(store.get_record(id, false).await.unwrap().is_none());
        assert!(store.get_record(id, true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_object_chain_head() {
        let mut store = MemoryStore::new();
        let bucket = store.create_bucket().await.unwrap();
        let f1 = store.get_or_create_file_instance("/a;1", 1, "md5:a").await.unwrap();
        let f2 = store.get_or_create_file_instance("/a;2", 2, "md5:b").await.unwrap();
        let again = store.get_or_create_file_instance("/a;1", 1, "md5:a").await.unwrap();
        assert_eq!(f1.id, again.id);

        let o1 = store.create_object(bucket.id, "a", f1.id, Utc::now()).await.unwrap();
        let o2 = store.create_object(bucket.id, "a", f2.id, Utc::now()).await.unwrap();
        let objects = store.list_objects(bucket.id, Some("a")).await.unwrap();
        assert_eq!(objects.iter().filter(|o| o.is_head).count(), 1);
        assert_eq!(objects[1].version_id, o2.version_id);
        assert!(objects[1].is_head);

        store.set_head(o1.version_id).await.unwrap();
        let objects = store.list_objects(bucket.id, Some("a")).await.unwrap();
        assert!(objects[0].is_head && !objects[1].is_head);

        assert!(store.remove_bucket(bucket.id).await.is_err());
        let files = store.remove_objects(bucket.id).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(store.file_instance_refcount(f1.id).await.unwrap(), 0);
        store.remove_bucket(bucket.id).await.unwrap();
    }
}
