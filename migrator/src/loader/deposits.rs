//! Deposit loading
//!
//! A deposit is stored as a plain record holding its raw JSON, registered
//! under a `depid` pid, with a bucket of its files and the SIPs archived
//! for it. Deposits are loaded after the records they reference.

use super::records::{checksum_str, file_type, RECID_PID_TYPE, RECORD_TAG};
use crate::db::models::{FileInstance, NewPid, Sip, SipFile, FILES_KEY};
use crate::dump::recid_from_value;
use crate::error::{MigrateError, Result};
use crate::store::MigrationStore;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEPID_PID_TYPE: &str = "depid";

/// Format of archived SIP packages
const SIP_FORMAT: &str = "marcxml";

#[derive(Debug, Clone, Deserialize)]
pub struct DepositFile {
    pub name: String,
    pub path: String,
    pub size: i64,
    pub checksum: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SipAgent {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SipInput {
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub agents: Vec<SipAgent>,
    #[serde(default)]
    pub package: String,
}

/// One deposit dump item
#[derive(Debug, Clone)]
pub struct DepositDump {
    pub depid: String,
    pub data: Value,
    pub files: Vec<DepositFile>,
    pub sips: Vec<SipInput>,
}

/// `_p.id` of a deposit item, numeric or string
pub fn depid_of(item: &Value) -> Option<String> {
    match item.get("_p")?.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

impl DepositDump {
    pub fn from_value(data: Value) -> Result<Self> {
        let depid = depid_of(&data).ok_or_else(|| MigrateError::malformed("deposit has no _p.id"))?;
        let malformed = |e: serde_json::Error| MigrateError::malformed(format!("deposit {}: {}", depid, e));

        let files = match data.get("files") {
            Some(Value::Null) | None => Vec::new(),
            Some(files) => Vec::<DepositFile>::deserialize(files).map_err(malformed)?,
        };
        let sips = match data.get("sips") {
            Some(Value::Null) | None => Vec::new(),
            Some(sips) => Vec::<SipInput>::deserialize(sips).map_err(malformed)?,
        };

        Ok(Self {
            depid,
            data,
            files,
            sips,
        })
    }

    /// The single recid the SIPs point at.
    pub fn recid(&self) -> Result<Option<i64>> {
        let mut recids: Vec<i64> = Vec::new();
        for sip in &self.sips {
            let recid = sip
                .metadata
                .get("recid")
                .and_then(recid_from_value)
                .ok_or_else(|| MigrateError::malformed(format!("deposit {}: SIP without recid", self.depid)))?;
            if !recids.contains(&recid) {
                recids.push(recid);
            }
        }
        if recids.len() > 1 {
            recids.sort_unstable();
            return Err(MigrateError::MultipleRecids {
                depid: self.depid.clone(),
                recids,
            });
        }
        Ok(recids.first().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositOutcome {
    pub deposit_id: Uuid,
    pub recid: Option<i64>,
    pub files: usize,
    pub sips: usize,
}

/// Load one deposit.
pub async fn load_deposit<S>(store: &mut S, dump: &DepositDump) -> Result<DepositOutcome>
where
    S: MigrationStore + ?Sized,
{
    let recid = dump.recid()?;
    let recid_pid = match recid {
        Some(recid) => {
            let pid = store.get_pid(RECID_PID_TYPE, &recid.to_string()).await?;
            match pid {
                Some(pid) => Some(pid),
                None => {
                    return Err(MigrateError::ReferencedEntityMissing {
                        dependent: format!("{}:{}", DEPID_PID_TYPE, dump.depid),
                        missing: format!("{}:{}", RECID_PID_TYPE, recid),
                    });
                }
            }
        }
        None => None,
    };

    for input in &dump.sips {
        if let Some(user_id) = input.agents.first().and_then(|a| a.user_id) {
            if store.get_user(user_id).await?.is_none() {
                return Err(MigrateError::ReferencedEntityMissing {
                    dependent: format!("{}:{}", DEPID_PID_TYPE, dump.depid),
                    missing: format!("user:{}", user_id),
                });
            }
        }
    }

    let now = Utc::now();
    let deposit_id = Uuid::new_v4();
    let mut json = dump.data.clone();
    if let Some(obj) = json.as_object_mut() {
        obj.entry("_deposit").or_insert_with(|| Value::Object(Map::new()));
        obj.entry(FILES_KEY).or_insert_with(|| Value::Array(Vec::new()));
    }
    store.create_record(deposit_id, &json, now, now).await?;
    store
        .create_pid(&NewPid::registered(DEPID_PID_TYPE, dump.depid.clone(), deposit_id))
        .await?;

    let bucket = store.create_bucket().await?;
    store
        .set_bucket_tag(bucket.id, RECORD_TAG, &deposit_id.to_string())
        .await?;
    store.link_record_bucket(deposit_id, bucket.id).await?;

    let mut instances: Vec<(String, FileInstance)> = Vec::with_capacity(dump.files.len());
    let mut entries = Vec::with_capacity(dump.files.len());
    for file in &dump.files {
        let instance = store
            .get_or_create_file_instance(&file.path, file.size, &checksum_str(&file.checksum))
            .await?;
        let object = store.create_object(bucket.id, &file.name, instance.id, now).await?;
        entries.push(json!({
            "bucket": bucket.id.to_string(),
            "key": file.name,
            "version_id": object.version_id.to_string(),
            "size": instance.size,
            "checksum": instance.checksum,
            "type": file_type(&file.name),
        }));
        instances.push((file.path.clone(), instance));
    }
    if let Some(manifest) = json.get_mut(FILES_KEY).and_then(Value::as_array_mut) {
        manifest.extend(entries);
    }
    store.replace_json(deposit_id, &json).await?;

    for (idx, input) in dump.sips.iter().enumerate() {
        let agent = input.agents.first();
        let user_id = agent.and_then(|a| a.user_id);
        let agent_json = match agent {
            Some(agent) => json!({
                "ip_address": agent.ip_address.clone().unwrap_or_default(),
                "email": agent.email_address.clone().unwrap_or_default(),
            }),
            None => Value::Object(Map::new()),
        };

        let sip = Sip {
            id: Uuid::new_v4(),
            user_id,
            agent: agent_json,
            content: input.package.clone(),
            sip_format: SIP_FORMAT.to_string(),
            created_at: now,
        };
        store.create_sip(&sip).await?;
        if let Some(pid) = &recid_pid {
            store.link_sip_pid(sip.id, pid.id).await?;
        }
        if idx == 0 {
            for (path, instance) in &instances {
                store
                    .add_sip_file(&SipFile {
                        sip_id: sip.id,
                        filepath: path.clone(),
                        file_id: instance.id,
                    })
                    .await?;
            }
        }
        debug!(depid = %dump.depid, sip_id = %sip.id, "SIP created");
    }

    if let Some(recid) = recid {
        store.index_deposit(recid, deposit_id).await?;
    }

    info!(
        depid = %dump.depid,
        deposit_id = %deposit_id,
        recid = ?recid,
        files = dump.files.len(),
        sips = dump.sips.len(),
        "deposit loaded"
    );
    Ok(DepositOutcome {
        deposit_id,
        recid,
        files: dump.files.len(),
        sips: dump.sips.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{PidStatus, User};
    use crate::dump::{DumpOptions, RecordDump, SourceType};
    use crate::loader::records::{clean_record, load_record};
    use crate::store::{AccountStore, DepositStore, FileStore, MemoryStore, PidStore, RecordStore, Session};

    async fn store_with_record(recid: i64) -> MemoryStore {
        let mut store = MemoryStore::new();
        let options = DumpOptions {
            source_type: SourceType::Json,
            ..Default::default()
        };
        let dump = RecordDump::from_value(
            json!({
                "recid": recid,
                "record": [{"modification_datetime": "2015-01-01T00:00:00", "json": {"title": "Paper"}}],
                "files": []
            }),
            &options,
        )
        .unwrap();
        load_record(&mut store, &dump).await.unwrap();
        store
            .insert_user(&User {
                id: 1,
                email: "owner@example.org".into(),
                username: None,
                given_names: None,
                family_name: None,
                note: None,
                settings: None,
                last_login_at: None,
                active: true,
            })
            .await
            .unwrap();
        store.checkpoint().await.unwrap();
        store
    }

    fn deposit(recids: &[i64]) -> Value {
        deposit_by(recids, 1)
    }

    fn deposit_by(recids: &[i64], user_id: i64) -> Value {
        let sips: Vec<Value> = recids
            .iter()
            .map(|recid| {
                json!({
                    "metadata": {"recid": recid},
                    "agents": [{"user_id": user_id,
                                "ip_address": "127.0.0.1", "email_address": "owner@example.org"}],
                    "package": "<record/>"
                })
            })
            .collect();
        json!({
            "_p": {"id": 1234},
            "title": "Draft",
            "files": [
                {"name": "data.CSV", "path": "/deposit/1234/data.csv", "size": 12, "checksum": "abc"},
                {"name": "paper.pdf", "path": "/deposit/1234/paper.pdf", "size": 99, "checksum": "def"}
            ],
            "sips": sips
        })
    }

    #[tokio::test]
    async fn test_load_deposit_with_sips_and_files() {
        let mut store = store_with_record(10).await;
        let dump = DepositDump::from_value(deposit(&[10, 10])).unwrap();
        let outcome = load_deposit(&mut store, &dump).await.unwrap();
        assert_eq!(outcome.recid, Some(10));
        assert_eq!(outcome.files, 2);
        assert_eq!(outcome.sips, 2);

        let record = store.get_record(outcome.deposit_id, false).await.unwrap().unwrap();
        assert_eq!(record.json["title"], "Draft");
        assert_eq!(record.json["_deposit"], json!({}));
        assert_eq!(record.manifest().len(), 2);
        assert_eq!(record.manifest()[0]["checksum"], "md5:abc");
        assert_eq!(record.manifest()[0]["type"], "csv");

        let depid = store.get_pid(DEPID_PID_TYPE, "1234").await.unwrap().unwrap();
        assert_eq!(depid.status, PidStatus::Registered);
        assert_eq!(depid.object_uuid, Some(outcome.deposit_id));

        let bucket = store.buckets_for_record(outcome.deposit_id).await.unwrap()[0];
        assert_eq!(store.list_objects(bucket, None).await.unwrap().len(), 2);

        let recid_pid = store.get_pid(RECID_PID_TYPE, "10").await.unwrap().unwrap();
        let sips = store.sips_for_pid(recid_pid.id).await.unwrap();
        assert_eq!(sips.len(), 2);
        let mut with_files = 0;
        for sip_id in &sips {
            let sip = store.get_sip(*sip_id).await.unwrap().unwrap();
            let files = store.sip_files(sip.id).await.unwrap();
            if !files.is_empty() {
                with_files += 1;
                assert_eq!(files.len(), 2);
            }
            assert_eq!(sip.user_id, Some(1));
            assert_eq!(sip.agent["ip_address"], "127.0.0.1");
        }
        assert_eq!(with_files, 1);
        assert_eq!(store.deposits_for_recid(10).await.unwrap(), vec![outcome.deposit_id]);
    }

    #[tokio::test]
    async fn test_multiple_recids_rejected() {
        let mut store = store_with_record(10).await;
        let dump = DepositDump::from_value(deposit(&[11, 10])).unwrap();
        let err = load_deposit(&mut store, &dump).await.unwrap_err();
        match err {
            MigrateError::MultipleRecids { depid, recids } => {
                assert_eq!(depid, "1234");
                assert_eq!(recids, vec![10, 11]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.state().records.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_recid_reports_both_sides() {
        let mut store = store_with_record(10).await;
        let dump = DepositDump::from_value(deposit(&[77])).unwrap();
        let err = load_deposit(&mut store, &dump).await.unwrap_err();
        match err {
            MigrateError::ReferencedEntityMissing { dependent, missing } => {
                assert_eq!(dependent, "depid:1234");
                assert_eq!(missing, "recid:77");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_sip_user_reports_both_sides() {
        let mut store = store_with_record(10).await;
        let dump = DepositDump::from_value(deposit_by(&[10], 99)).unwrap();
        let err = load_deposit(&mut store, &dump).await.unwrap_err();
        match err {
            MigrateError::ReferencedEntityMissing { dependent, missing } => {
                assert_eq!(dependent, "depid:1234");
                assert_eq!(missing, "user:99");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.state().records.len(), 1);
        assert!(store.state().sips.is_empty());
        assert!(store.get_pid(DEPID_PID_TYPE, "1234").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deposit_without_sips() {
        let mut store = MemoryStore::new();
        let dump = DepositDump::from_value(json!({"_p": {"id": "55"}, "title": "x"})).unwrap();
        let outcome = load_deposit(&mut store, &dump).await.unwrap();
        assert_eq!(outcome.recid, None);
        let record = store.get_record(outcome.deposit_id, false).await.unwrap().unwrap();
        assert!(record.manifest().is_empty());
        assert!(store.state().deposit_index.is_empty());
    }

    #[tokio::test]
    async fn test_deposit_without_id_is_malformed() {
        let err = DepositDump::from_value(json!({"title": "x"})).unwrap_err();
        assert!(matches!(err, MigrateError::MalformedDump(_)));
    }

    #[tokio::test]
    async fn test_clean_record_removes_derived_deposit() {
        let mut store = store_with_record(10).await;
        let dump = DepositDump::from_value(deposit(&[10])).unwrap();
        load_deposit(&mut store, &dump).await.unwrap();

        let report = clean_record(&mut store, 10).await.unwrap();
        assert_eq!(report.deposits, 1);
        assert_eq!(report.records, 2);
        assert_eq!(report.sips, 1);
        assert_eq!(report.file_instances, 2);

        let state = store.state();
        assert!(state.records.is_empty());
        assert!(state.pids.is_empty());
        assert!(state.sips.is_empty());
        assert!(state.sip_files.is_empty());
        assert!(state.record_sips.is_empty());
        assert!(state.deposit_index.is_empty());
        assert!(state.file_instances.is_empty());
        assert_eq!(state.users.len(), 1);
    }
}
