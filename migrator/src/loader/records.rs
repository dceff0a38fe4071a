//! Record reconciliation
//!
//! Loads one prepared [`RecordDump`] into storage, creating the record on
//! the first load and extending it on every later one. Every stored
//! revision is checkpointed as soon as it is written; identifiers, files and
//! deletion are left to the caller's checkpoint.
//!
//! Lifecycle of one recid across loads:
//! `absent -> RESERVED -> REGISTERED (updated any number of times) -> DELETED`.

use crate::db::models::{NewPid, ObjectVersion, PersistentIdentifier, PidStatus, RecordMetadata, FILES_KEY};
use crate::dump::{parse_timestamp_opt, FetchedPid, FileVersionInput, RecordDump};
use crate::error::{MigrateError, Result};
use crate::store::MigrationStore;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const RECID_PID_TYPE: &str = "recid";

/// Bucket tag pointing back at the owning record
pub const RECORD_TAG: &str = "record";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    /// Only the recid was reserved
    Reserved,
    Created,
    Updated,
    /// The record was deleted by an earlier load and left untouched
    AlreadyDeleted,
}

/// Summary of one record load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub recid: i64,
    pub record_id: Option<Uuid>,
    pub action: LoadAction,
    /// Stored revisions written by this load
    pub revisions_applied: usize,
    pub pids_minted: usize,
    pub objects_created: usize,
    /// Whether this load deleted the record
    pub deleted: bool,
}

impl LoadOutcome {
    fn new(recid: i64, record_id: Option<Uuid>, action: LoadAction) -> Self {
        Self {
            recid,
            record_id,
            action,
            revisions_applied: 0,
            pids_minted: 0,
            objects_created: 0,
            deleted: false,
        }
    }
}

/// Load one record dump.
pub async fn load_record<S>(store: &mut S, dump: &RecordDump) -> Result<LoadOutcome>
where
    S: MigrationStore + ?Sized,
{
    if dump.is_reservation() {
        return reserve_recid(store, dump.recid).await;
    }

    let recid_value = dump.recid.to_string();
    let existing_pid = store.get_pid(RECID_PID_TYPE, &recid_value).await?;
    let existing = resolve_record(store, dump.recid, existing_pid.as_ref()).await?;

    let (record, mut outcome, pids) = match existing {
        Some(record) if record.is_deleted => {
            info!(recid = dump.recid, record_id = %record.id, "record already deleted, skipping");
            return Ok(LoadOutcome::new(dump.recid, Some(record.id), LoadAction::AlreadyDeleted));
        }
        Some(record) => {
            let pids = missing_pids(store, &dump.pids).await?;
            let mut outcome = LoadOutcome::new(dump.recid, Some(record.id), LoadAction::Updated);
            let (record, applied) = apply_revisions(store, record, &dump.revisions).await?;
            outcome.revisions_applied = applied;
            (record, outcome, pids)
        }
        None => {
            let reserved = existing_pid.filter(|pid| pid.status == PidStatus::Reserved);
            let record = create_record(store, dump, reserved.as_ref()).await?;
            let mut outcome = LoadOutcome::new(dump.recid, Some(record.id), LoadAction::Created);
            let (record, applied) = apply_revisions(store, record, &dump.revisions[1..]).await?;
            outcome.revisions_applied = applied + 1;
            (record, outcome, dump.pids.clone())
        }
    };

    for pid in &pids {
        store
            .create_pid(&NewPid {
                pid_type: pid.pid_type.clone(),
                pid_value: pid.pid_value.clone(),
                pid_provider: pid.provider.clone(),
                status: PidStatus::Registered,
                object_uuid: Some(record.id),
            })
            .await?;
        debug!(recid = dump.recid, pid_type = %pid.pid_type, pid_value = %pid.pid_value, "minted pid");
    }
    outcome.pids_minted = pids.len();

    let record = if dump.files.is_empty() {
        record
    } else {
        let fallback = dump.created.unwrap_or_else(Utc::now);
        let (record, created) = materialize_files(store, record, &dump.files, fallback).await?;
        outcome.objects_created = created;
        record
    };

    if dump.is_deleted() {
        delete_record(store, &record).await?;
        outcome.deleted = true;
    }

    info!(
        recid = dump.recid,
        record_id = %record.id,
        action = ?outcome.action,
        revisions = outcome.revisions_applied,
        pids = outcome.pids_minted,
        objects = outcome.objects_created,
        deleted = outcome.deleted,
        "record loaded"
    );
    Ok(outcome)
}

/// Take the recid without creating a record.
async fn reserve_recid<S>(store: &mut S, recid: i64) -> Result<LoadOutcome>
where
    S: MigrationStore + ?Sized,
{
    let value = recid.to_string();
    if store.get_pid(RECID_PID_TYPE, &value).await?.is_some() {
        debug!(recid, "recid already known, nothing to reserve");
        return Ok(LoadOutcome::new(recid, None, LoadAction::Reserved));
    }
    if !store.recid_exists(recid).await? {
        store.insert_recid(recid).await?;
    }
    store.create_pid(&NewPid::reserved(RECID_PID_TYPE, value)).await?;
    info!(recid, "reserved recid");
    Ok(LoadOutcome::new(recid, None, LoadAction::Reserved))
}

/// Find the record a recid pid points at.
async fn resolve_record<S>(
    store: &mut S,
    recid: i64,
    pid: Option<&PersistentIdentifier>,
) -> Result<Option<RecordMetadata>>
where
    S: MigrationStore + ?Sized,
{
    let Some(pid) = pid else {
        return Ok(None);
    };
    match (pid.status, pid.object_uuid) {
        (_, Some(uuid)) => match store.get_record(uuid, true).await? {
            Some(record) => Ok(Some(record)),
            None => Err(MigrateError::StorageConflict(format!(
                "recid {} is bound to missing record {}",
                recid, uuid
            ))),
        },
        (PidStatus::Reserved, None) => Ok(None),
        (status, None) => Err(MigrateError::StorageConflict(format!(
            "recid {} is {} without a record",
            recid,
            status.name()
        ))),
    }
}

/// Create the record from the first revision and bind the recid to it.
async fn create_record<S>(
    store: &mut S,
    dump: &RecordDump,
    reserved: Option<&PersistentIdentifier>,
) -> Result<RecordMetadata>
where
    S: MigrationStore + ?Sized,
{
    let (timestamp, data) = dump
        .revisions
        .first()
        .ok_or_else(|| MigrateError::malformed(format!("record {} has no revisions", dump.recid)))?;

    let id = Uuid::new_v4();
    let created = dump.created.unwrap_or(*timestamp);
    let record = store.create_record(id, data, created, *timestamp).await?;

    match reserved {
        Some(pid) => {
            if !store.recid_exists(dump.recid).await? {
                store.insert_recid(dump.recid).await?;
            }
            store.register_pid(pid.id, id).await?;
        }
        None => {
            store.insert_recid(dump.recid).await?;
            store
                .create_pid(&NewPid::registered(RECID_PID_TYPE, dump.recid.to_string(), id))
                .await?;
        }
    }
    store.checkpoint().await?;

    debug!(recid = dump.recid, record_id = %id, reused_reservation = reserved.is_some(), "record created");
    Ok(record)
}

/// Write each revision as a new stored revision, skipping ones already stored.
async fn apply_revisions<S>(
    store: &mut S,
    record: RecordMetadata,
    revisions: &[(DateTime<Utc>, Value)],
) -> Result<(RecordMetadata, usize)>
where
    S: MigrationStore + ?Sized,
{
    let mut stored: Vec<(DateTime<Utc>, Value)> = store
        .list_revisions(record.id)
        .await?
        .into_iter()
        .map(|rev| (rev.updated, rev.json))
        .collect();

    let mut current = record;
    let mut applied = 0;
    for (timestamp, data) in revisions {
        let already_stored = stored
            .iter()
            .any(|(ts, json)| ts == timestamp && same_metadata(json, data));
        if already_stored {
            debug!(record_id = %current.id, %timestamp, "revision already stored");
            continue;
        }

        let json = carry_manifest(&current.json, data);
        current = store.update_record(current.id, &json, *timestamp).await?;
        store.checkpoint().await?;
        stored.push((*timestamp, json));
        applied += 1;
    }
    Ok((current, applied))
}

/// Compare metadata ignoring the file manifest.
fn same_metadata(stored: &Value, incoming: &Value) -> bool {
    match (stored, incoming) {
        (Value::Object(a), Value::Object(b)) => {
            let a = a.iter().filter(|(k, _)| k.as_str() != FILES_KEY);
            let b = b.iter().filter(|(k, _)| k.as_str() != FILES_KEY);
            a.eq(b)
        }
        _ => stored == incoming,
    }
}

/// Keep the existing manifest on revisions that do not define one.
fn carry_manifest(current: &Value, incoming: &Value) -> Value {
    let mut json = incoming.clone();
    if let (Some(manifest), Some(obj)) = (current.get(FILES_KEY), json.as_object_mut()) {
        obj.entry(FILES_KEY).or_insert_with(|| manifest.clone());
    }
    json
}

/// Extracted identifiers not yet known to the identifier service
pub async fn missing_pids<S>(store: &mut S, pids: &[FetchedPid]) -> Result<Vec<FetchedPid>>
where
    S: MigrationStore + ?Sized,
{
    let mut missing = Vec::new();
    for pid in pids {
        if store.get_pid(&pid.pid_type, &pid.pid_value).await?.is_none() {
            missing.push(pid.clone());
        }
    }
    Ok(missing)
}

/// Legacy checksums are bare MD5 hex digests
pub fn checksum_str(checksum: &str) -> String {
    if checksum.starts_with("md5:") {
        checksum.to_string()
    } else {
        format!("md5:{}", checksum)
    }
}

/// Lower-cased extension without the dot, empty when there is none
pub fn file_type(key: &str) -> String {
    Path::new(key)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Create the bucket, file instances and object chains, then rewrite the manifest.
async fn materialize_files<S>(
    store: &mut S,
    mut record: RecordMetadata,
    files: &BTreeMap<String, Vec<FileVersionInput>>,
    fallback_created: DateTime<Utc>,
) -> Result<(RecordMetadata, usize)>
where
    S: MigrationStore + ?Sized,
{
    let existing = match record.manifest_buckets().first() {
        Some(id) => {
            let bucket = store.get_bucket(*id).await?;
            if bucket.is_none() {
                warn!(record_id = %record.id, bucket_id = %id, "manifest references missing bucket");
            }
            bucket.map(|b| b.id)
        }
        None => None,
    };
    let bucket_id = match existing {
        Some(id) => id,
        None => {
            let bucket = store.create_bucket().await?;
            store
                .set_bucket_tag(bucket.id, RECORD_TAG, &record.id.to_string())
                .await?;
            bucket.id
        }
    };
    store.link_record_bucket(record.id, bucket_id).await?;

    let mut created = 0;
    let mut manifest = Vec::with_capacity(files.len());
    for (key, versions) in files {
        let chain = store.list_objects(bucket_id, Some(key)).await?;
        let mut head: Option<(ObjectVersion, i64, String)> = None;
        let mut appended = false;
        // Repeated content shares one file instance, so each stored object
        // may stand for at most one input version.
        let mut claimed = vec![false; chain.len()];

        for version in versions {
            let file = store
                .get_or_create_file_instance(&version.full_path, version.size, &checksum_str(&version.checksum))
                .await?;
            let existing = chain
                .iter()
                .enumerate()
                .find(|(i, o)| !claimed[*i] && o.file_id == Some(file.id))
                .map(|(i, _)| i);
            if let Some(index) = existing {
                claimed[index] = true;
                head = Some((chain[index].clone(), file.size, file.checksum));
                continue;
            }
            let timestamp = parse_timestamp_opt(version.creation_date.as_deref())?.unwrap_or(fallback_created);
            let object = store.create_object(bucket_id, key, file.id, timestamp).await?;
            head = Some((object, file.size, file.checksum));
            appended = true;
            created += 1;
        }

        let Some((object, size, checksum)) = head else {
            continue;
        };
        if appended || !object.is_head {
            store.set_head(object.version_id).await?;
        }
        manifest.push(json!({
            "bucket": bucket_id.to_string(),
            "key": key,
            "version_id": object.version_id.to_string(),
            "size": size,
            "checksum": checksum,
            "type": file_type(key),
        }));
    }

    if let Some(obj) = record.json.as_object_mut() {
        obj.insert(FILES_KEY.to_string(), Value::Array(manifest));
    }
    store.replace_json(record.id, &record.json).await?;

    debug!(record_id = %record.id, bucket_id = %bucket_id, objects = created, "files materialized");
    Ok((record, created))
}

/// Soft-delete the record, retire its identifiers and buckets.
async fn delete_record<S>(store: &mut S, record: &RecordMetadata) -> Result<()>
where
    S: MigrationStore + ?Sized,
{
    store.soft_delete(record.id).await?;
    let retired = store.set_status_for_object(record.id, PidStatus::Deleted).await?;
    let buckets = record.manifest_buckets();
    for bucket in &buckets {
        store.mark_bucket_deleted(*bucket).await?;
    }
    info!(record_id = %record.id, pids = retired, buckets = buckets.len(), "record deleted");
    Ok(())
}

/// What [`clean_record`] removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub deposits: usize,
    pub sips: usize,
    pub buckets: usize,
    pub file_instances: usize,
    pub records: usize,
}

/// Remove a loaded record with everything derived from it.
///
/// Children go before parents: deposits, SIPs, objects, buckets, file
/// instances, identifiers, then the record and its recid.
pub async fn clean_record<S>(store: &mut S, recid: i64) -> Result<CleanReport>
where
    S: MigrationStore + ?Sized,
{
    let value = recid.to_string();
    let pid = store.get_pid(RECID_PID_TYPE, &value).await?;
    let deposits = store.deposits_for_recid(recid).await?;
    let recid_taken = store.recid_exists(recid).await?;
    if pid.is_none() && deposits.is_empty() && !recid_taken {
        return Err(MigrateError::NotFound(format!("recid {}", recid)));
    }

    let mut report = CleanReport::default();
    let mut orphans: Vec<Uuid> = Vec::new();

    for deposit_id in deposits {
        store.unindex_deposit(deposit_id).await?;
        remove_entity(store, deposit_id, &mut orphans, &mut report).await?;
        report.deposits += 1;
    }

    if let Some(pid) = &pid {
        for sip in store.sips_for_pid(pid.id).await? {
            orphans.extend(store.remove_sip(sip).await?);
            report.sips += 1;
        }
        if let Some(record_id) = pid.object_uuid {
            remove_entity(store, record_id, &mut orphans, &mut report).await?;
        }
        store.remove_pid(pid.id).await?;
    }

    orphans.sort();
    orphans.dedup();
    for file in orphans {
        if store.file_instance_refcount(file).await? == 0 {
            store.remove_file_instance(file).await?;
            report.file_instances += 1;
        }
    }

    if recid_taken {
        store.remove_recid(recid).await?;
    }

    info!(
        recid,
        deposits = report.deposits,
        buckets = report.buckets,
        files = report.file_instances,
        "record cleaned"
    );
    Ok(report)
}

/// Remove a record or deposit with its buckets and identifiers.
async fn remove_entity<S>(store: &mut S, id: Uuid, orphans: &mut Vec<Uuid>, report: &mut CleanReport) -> Result<()>
where
    S: MigrationStore + ?Sized,
{
    let mut buckets = store.buckets_for_record(id).await?;
    if let Some(record) = store.get_record(id, true).await? {
        for bucket in record.manifest_buckets() {
            if !buckets.contains(&bucket) {
                buckets.push(bucket);
            }
        }
    }

    for bucket in buckets {
        orphans.extend(store.remove_objects(bucket).await?);
        if store.get_bucket(bucket).await?.is_some() {
            store.remove_bucket(bucket).await?;
            report.buckets += 1;
        }
    }

    for pid in store.pids_for_object(id).await? {
        for sip in store.sips_for_pid(pid.id).await? {
            orphans.extend(store.remove_sip(sip).await?);
            report.sips += 1;
        }
    }
    store.remove_pids_for_object(id).await?;

    if store.get_record(id, true).await?.is_some() {
        store.remove_record(id).await?;
        report.records += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::pids::{doi_fetcher, oai_fetcher};
    use crate::dump::{DumpOptions, PidFetcher, SourceType};
    use crate::store::{FileStore, MemoryStore, PidStore, RecordStore, Session};
    use chrono::TimeZone;

    const T0: &str = "2014-10-13T08:27:47";
    const T1: &str = "2015-02-01T10:00:00";

    fn options() -> DumpOptions {
        DumpOptions {
            source_type: SourceType::Json,
            pid_fetchers: vec![doi_fetcher as PidFetcher, oai_fetcher],
            ..Default::default()
        }
    }

    fn prepare(value: Value) -> RecordDump {
        RecordDump::from_value(value, &options()).unwrap()
    }

    fn scenario_dump() -> RecordDump {
        prepare(json!({
            "recid": 42,
            "record": [
                {"modification_datetime": T0, "json": {"title": "A"}},
                {"modification_datetime": T1, "json": {"title": "A v2"}}
            ],
            "files": [
                {"full_name": "f.pdf", "version": 1, "checksum": "aaa", "size": 10,
                 "full_path": "/legacy/f.pdf;1", "creation_date": T0},
                {"full_name": "f.pdf", "version": 2, "checksum": "bbb", "size": 20,
                 "full_path": "/legacy/f.pdf;2", "creation_date": T1}
            ]
        }))
    }

    async fn recid_pid(store: &mut MemoryStore, recid: i64) -> Option<PersistentIdentifier> {
        store.get_pid(RECID_PID_TYPE, &recid.to_string()).await.unwrap()
    }

    #[tokio::test]
    async fn test_new_record_two_revisions_one_file() {
        let mut store = MemoryStore::new();
        let outcome = load_record(&mut store, &scenario_dump()).await.unwrap();
        assert_eq!(outcome.action, LoadAction::Created);
        assert_eq!(outcome.revisions_applied, 2);
        assert_eq!(outcome.objects_created, 2);

        let id = outcome.record_id.unwrap();
        let record = store.get_record(id, false).await.unwrap().unwrap();
        assert_eq!(record.created, Utc.with_ymd_and_hms(2014, 10, 13, 8, 27, 47).unwrap());
        assert_eq!(record.json["title"], "A v2");
        assert_eq!(store.list_revisions(id).await.unwrap().len(), 2);

        let manifest = record.manifest();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0]["key"], "f.pdf");
        assert_eq!(manifest[0]["checksum"], "md5:bbb");
        assert_eq!(manifest[0]["size"], 20);
        assert_eq!(manifest[0]["type"], "pdf");

        let bucket: Uuid = manifest[0]["bucket"].as_str().unwrap().parse().unwrap();
        let objects = store.list_objects(bucket, Some("f.pdf")).await.unwrap();
        assert_eq!(objects.len(), 2);
        let head: Vec<_> = objects.iter().filter(|o| o.is_head).collect();
        assert_eq!(head.len(), 1);
        assert_eq!(head[0].version_id.to_string(), manifest[0]["version_id"].as_str().unwrap());
        assert_eq!(
            store.get_bucket_tag(bucket, RECORD_TAG).await.unwrap(),
            Some(id.to_string())
        );
        assert_eq!(store.buckets_for_record(id).await.unwrap(), vec![bucket]);

        let pid = recid_pid(&mut store, 42).await.unwrap();
        assert_eq!(pid.status, PidStatus::Registered);
        assert_eq!(pid.object_uuid, Some(id));
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let mut store = MemoryStore::new();
        let dump = scenario_dump();
        let first = load_record(&mut store, &dump).await.unwrap();
        store.checkpoint().await.unwrap();
        let before = store.state().stats();

        let second = load_record(&mut store, &dump).await.unwrap();
        assert_eq!(second.action, LoadAction::Updated);
        assert_eq!(second.record_id, first.record_id);
        assert_eq!(second.revisions_applied, 0);
        assert_eq!(second.objects_created, 0);
        assert_eq!(second.pids_minted, 0);
        assert_eq!(store.state().stats(), before);

        let id = first.record_id.unwrap();
        let record = store.get_record(id, false).await.unwrap().unwrap();
        assert_eq!(record.manifest().len(), 1);
        assert_eq!(record.manifest()[0]["checksum"], "md5:bbb");
    }

    #[tokio::test]
    async fn test_new_revision_appends_and_keeps_manifest() {
        let mut store = MemoryStore::new();
        let first = load_record(&mut store, &scenario_dump()).await.unwrap();
        let id = first.record_id.unwrap();

        let dump = prepare(json!({
            "recid": 42,
            "record": [
                {"modification_datetime": T0, "json": {"title": "A"}},
                {"modification_datetime": T1, "json": {"title": "A v2"}},
                {"modification_datetime": "2016-01-01T00:00:00", "json": {"title": "A v3"}}
            ],
            "files": []
        }));
        let outcome = load_record(&mut store, &dump).await.unwrap();
        assert_eq!(outcome.revisions_applied, 1);

        let record = store.get_record(id, false).await.unwrap().unwrap();
        assert_eq!(record.json["title"], "A v3");
        assert_eq!(record.manifest().len(), 1);
        assert_eq!(store.list_revisions(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_new_file_version_extends_chain() {
        let mut store = MemoryStore::new();
        let first = load_record(&mut store, &scenario_dump()).await.unwrap();
        let id = first.record_id.unwrap();

        let mut dump = scenario_dump();
        let mut v3 = dump.files["f.pdf"][1].clone();
        v3.version = 3;
        v3.checksum = "ccc".into();
        v3.size = 30;
        v3.full_path = "/legacy/f.pdf;3".into();
        dump.files.get_mut("f.pdf").unwrap().push(v3);

        let outcome = load_record(&mut store, &dump).await.unwrap();
        assert_eq!(outcome.objects_created, 1);

        let record = store.get_record(id, false).await.unwrap().unwrap();
        let bucket = record.manifest_buckets()[0];
        assert_eq!(first_bucket(&mut store, id).await, bucket);
        let objects = store.list_objects(bucket, Some("f.pdf")).await.unwrap();
        assert_eq!(objects.len(), 3);
        assert!(objects[2].is_head);
        assert_eq!(record.manifest()[0]["checksum"], "md5:ccc");
    }

    #[tokio::test]
    async fn test_replay_with_repeated_content_keeps_head() {
        let mut store = MemoryStore::new();
        let mut dump = scenario_dump();
        let mut v3 = dump.files["f.pdf"][0].clone();
        v3.version = 3;
        v3.creation_date = Some(T1.into());
        dump.files.get_mut("f.pdf").unwrap().push(v3);

        let first = load_record(&mut store, &dump).await.unwrap();
        store.checkpoint().await.unwrap();
        assert_eq!(first.objects_created, 3);
        let id = first.record_id.unwrap();
        let before = store.get_record(id, false).await.unwrap().unwrap();
        let bucket = before.manifest_buckets()[0];
        let objects = store.list_objects(bucket, Some("f.pdf")).await.unwrap();
        assert_eq!(objects.len(), 3);
        assert!(objects[2].is_head);

        let replay = load_record(&mut store, &dump).await.unwrap();
        assert_eq!(replay.objects_created, 0);
        let after = store.get_record(id, false).await.unwrap().unwrap();
        assert_eq!(after.manifest(), before.manifest());
        assert_eq!(after.manifest()[0]["version_id"], objects[2].version_id.to_string());

        let objects = store.list_objects(bucket, Some("f.pdf")).await.unwrap();
        assert_eq!(objects.len(), 3);
        let heads: Vec<usize> = objects
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_head)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(heads, vec![2]);
    }

    async fn first_bucket(store: &mut MemoryStore, id: Uuid) -> Uuid {
        store.buckets_for_record(id).await.unwrap()[0]
    }

    #[tokio::test]
    async fn test_reservation_then_create() {
        let mut store = MemoryStore::new();
        let reservation = prepare(json!({"recid": 42, "record": [], "files": []}));
        let outcome = load_record(&mut store, &reservation).await.unwrap();
        assert_eq!(outcome.action, LoadAction::Reserved);
        assert!(store.state().records.is_empty());

        let pid = recid_pid(&mut store, 42).await.unwrap();
        assert_eq!(pid.status, PidStatus::Reserved);
        assert!(pid.object_uuid.is_none());
        assert!(store.recid_exists(42).await.unwrap());

        // Reserving again changes nothing.
        load_record(&mut store, &reservation).await.unwrap();
        assert_eq!(store.state().pids.len(), 1);

        let outcome = load_record(&mut store, &scenario_dump()).await.unwrap();
        assert_eq!(outcome.action, LoadAction::Created);
        let recid_pids: Vec<_> = store
            .state()
            .pids
            .values()
            .filter(|p| p.pid_type == RECID_PID_TYPE)
            .collect();
        assert_eq!(recid_pids.len(), 1);
        assert_eq!(recid_pids[0].status, PidStatus::Registered);
        assert_eq!(recid_pids[0].object_uuid, outcome.record_id);
    }

    #[tokio::test]
    async fn test_duplicate_recid_sequence_fails() {
        let mut store = MemoryStore::new();
        store.insert_recid(42).await.unwrap();
        let err = load_record(&mut store, &scenario_dump()).await.unwrap_err();
        assert!(matches!(err, MigrateError::StorageConflict(_)));
    }

    #[tokio::test]
    async fn test_registered_pid_without_record_conflicts() {
        let mut store = MemoryStore::new();
        store
            .create_pid(&NewPid::registered(RECID_PID_TYPE, "42", Uuid::new_v4()))
            .await
            .unwrap();
        let err = load_record(&mut store, &scenario_dump()).await.unwrap_err();
        assert!(matches!(err, MigrateError::StorageConflict(_)));
    }

    #[tokio::test]
    async fn test_pid_minting_is_existence_gated() {
        let mut store = MemoryStore::new();
        let dump = prepare(json!({
            "recid": 7,
            "record": [{"modification_datetime": T0, "json": {"title": "x", "doi": "10.1/7"}}],
            "files": []
        }));
        let first = load_record(&mut store, &dump).await.unwrap();
        assert_eq!(first.pids_minted, 1);

        let dump = prepare(json!({
            "recid": 7,
            "record": [{"modification_datetime": T1,
                        "json": {"title": "x", "doi": "10.1/7", "_oai": {"id": "oai:x:7"}}}],
            "files": []
        }));
        let second = load_record(&mut store, &dump).await.unwrap();
        assert_eq!(second.pids_minted, 1);

        let pids = store.pids_for_object(first.record_id.unwrap()).await.unwrap();
        let mut types: Vec<_> = pids.iter().map(|p| p.pid_type.as_str()).collect();
        types.sort();
        assert_eq!(types, vec!["doi", "oai", "recid"]);
        let oai = pids.iter().find(|p| p.pid_type == "oai").unwrap();
        assert_eq!(oai.pid_provider.as_deref(), Some("oai"));
    }

    #[tokio::test]
    async fn test_deletion_is_identifier_wide_and_terminal() {
        let mut store = MemoryStore::new();
        let first = load_record(&mut store, &scenario_dump()).await.unwrap();
        let id = first.record_id.unwrap();
        let bucket = first_bucket(&mut store, id).await;
        store
            .create_pid(&NewPid::registered("doi", "10.1/42", id))
            .await
            .unwrap();

        let deleted = prepare(json!({
            "recid": 42,
            "record": [
                {"modification_datetime": T0, "json": {"title": "A"}},
                {"modification_datetime": T1, "json": {"title": "A v2"}},
                {"modification_datetime": "2016-01-01T00:00:00",
                 "json": {"title": "A v2", "collections": ["deleted"]}}
            ],
            "files": []
        }));
        let outcome = load_record(&mut store, &deleted).await.unwrap();
        assert!(outcome.deleted);

        assert!(store.get_record(id, false).await.unwrap().is_none());
        let record = store.get_record(id, true).await.unwrap().unwrap();
        assert!(record.is_deleted);
        for pid in store.pids_for_object(id).await.unwrap() {
            assert_eq!(pid.status, PidStatus::Deleted);
        }
        assert!(store.get_bucket(bucket).await.unwrap().unwrap().deleted);

        let again = load_record(&mut store, &scenario_dump()).await.unwrap();
        assert_eq!(again.action, LoadAction::AlreadyDeleted);
        assert!(store.get_record(id, true).await.unwrap().unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_created_and_deleted_in_one_load() {
        let mut store = MemoryStore::new();
        let dump = prepare(json!({
            "recid": 9,
            "record": [{"modification_datetime": T0, "json": {"collections": ["article", "deleted"]}}],
            "files": []
        }));
        let outcome = load_record(&mut store, &dump).await.unwrap();
        assert_eq!(outcome.action, LoadAction::Created);
        assert!(outcome.deleted);
        let pid = recid_pid(&mut store, 9).await.unwrap();
        assert_eq!(pid.status, PidStatus::Deleted);
    }

    #[tokio::test]
    async fn test_failed_minting_keeps_created_record_and_retries() {
        let mut store = MemoryStore::new();
        store.create_pid(&NewPid::reserved("doi", "10.1/taken")).await.unwrap();
        store.checkpoint().await.unwrap();

        let dump = prepare(json!({
            "recid": 5,
            "record": [{"modification_datetime": T0, "json": {"title": "x", "doi": "10.1/taken"}}],
            "files": []
        }));
        // On create every extracted pid is minted, so a taken DOI fails the load.
        let err = load_record(&mut store, &dump).await.unwrap_err();
        assert!(matches!(err, MigrateError::StorageConflict(_)));

        store.rollback().await.unwrap();
        let pid = recid_pid(&mut store, 5).await.unwrap();
        assert_eq!(pid.status, PidStatus::Registered);
        assert_eq!(store.state().records.len(), 1);

        // The retry takes the update branch and skips the known DOI.
        let retry = load_record(&mut store, &dump).await.unwrap();
        assert_eq!(retry.action, LoadAction::Updated);
        assert_eq!(retry.pids_minted, 0);
        assert_eq!(retry.revisions_applied, 0);
    }

    #[tokio::test]
    async fn test_clean_removes_children_and_parents() {
        let mut store = MemoryStore::new();
        let outcome = load_record(&mut store, &scenario_dump()).await.unwrap();
        let id = outcome.record_id.unwrap();
        store.checkpoint().await.unwrap();

        let report = clean_record(&mut store, 42).await.unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.buckets, 1);
        assert_eq!(report.file_instances, 2);

        let state = store.state();
        assert!(state.records.is_empty());
        assert!(state.revisions.is_empty());
        assert!(state.pids.is_empty());
        assert!(state.objects.is_empty());
        assert!(state.buckets.is_empty());
        assert!(state.bucket_tags.is_empty());
        assert!(state.file_instances.is_empty());
        assert!(state.records_buckets.is_empty());
        assert!(!state.recids.contains(&42));
        assert!(store.get_record(id, true).await.unwrap().is_none());

        // A clean slate loads again as a fresh record.
        let again = load_record(&mut store, &scenario_dump()).await.unwrap();
        assert_eq!(again.action, LoadAction::Created);
    }

    #[tokio::test]
    async fn test_clean_unknown_recid() {
        let mut store = MemoryStore::new();
        let err = clean_record(&mut store, 404).await.unwrap_err();
        assert!(matches!(err, MigrateError::NotFound(_)));
    }

    #[test]
    fn test_same_metadata_ignores_manifest() {
        assert!(same_metadata(
            &json!({"title": "A", "_files": [{"key": "f"}]}),
            &json!({"title": "A"})
        ));
        assert!(!same_metadata(&json!({"title": "A"}), &json!({"title": "B"})));
    }

    #[test]
    fn test_carry_manifest() {
        let current = json!({"title": "A", "_files": [{"key": "f"}]});
        assert_eq!(
            carry_manifest(&current, &json!({"title": "B"})),
            json!({"title": "B", "_files": [{"key": "f"}]})
        );
        assert_eq!(
            carry_manifest(&current, &json!({"title": "B", "_files": []})),
            json!({"title": "B", "_files": []})
        );
    }

    #[test]
    fn test_file_type_and_checksum() {
        assert_eq!(file_type("paper.PDF"), "pdf");
        assert_eq!(file_type("archive.tar.gz"), "gz");
        assert_eq!(file_type("README"), "");
        assert_eq!(checksum_str("abc"), "md5:abc");
        assert_eq!(checksum_str("md5:abc"), "md5:abc");
    }
}
