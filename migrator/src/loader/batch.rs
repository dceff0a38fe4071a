//! Batch driver
//!
//! Every dump item is one unit of work. A successful item is checkpointed,
//! a failed one is rolled back before the batch either stops or moves on.

use crate::dump::{recid_from_value, DumpOptions, RecordDump};
use crate::error::{MigrateError, Result};
use crate::loader::communities::{load_community, load_featured, CommunityDump, FeaturedDump, LogoOptions};
use crate::loader::deposits::{depid_of, load_deposit, DepositDump};
use crate::loader::records::load_record;
use crate::loader::remote_accounts::{
    load_remote_account_item, load_remote_token, load_user_identity, RemoteTokenDump, UserIdentityDump,
};
use crate::loader::users::{load_user, DuplicatePolicy, UserDump};
use crate::store::MigrationStore;
use async_trait::async_trait;
use indicatif::ProgressBar;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One kind of dump item and how to load it
#[async_trait]
pub trait LoadTask: Send + Sync {
    /// Entity name used in logs
    fn entity(&self) -> &'static str;

    /// Identifier of an item, used for sharding and error reports
    fn key(&self, item: &Value) -> String;

    async fn load(&self, store: &mut dyn MigrationStore, item: &Value) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub continue_on_error: bool,
    pub jobs: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            jobs: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub loaded: usize,
    pub failed: Vec<FailedItem>,
}

impl BatchReport {
    pub fn merge(&mut self, other: BatchReport) {
        self.loaded += other.loaded;
        self.failed.extend(other.failed);
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Load items one after another on a single store.
pub async fn run_batch<S, T>(
    store: &mut S,
    task: &T,
    items: Vec<Value>,
    options: &BatchOptions,
    progress: &ProgressBar,
) -> Result<BatchReport>
where
    S: MigrationStore,
    T: LoadTask + ?Sized,
{
    drive(store, task, items, options, progress, None).await
}

/// Load items on up to `options.jobs` stores at once.
///
/// Items are sharded by key, so two items with the same key always run on
/// the same worker and in dump order. In strict mode the first failure stops
/// every worker and is returned.
pub async fn run_concurrent<T, S, F>(
    make_store: F,
    task: Arc<T>,
    items: Vec<Value>,
    options: &BatchOptions,
    progress: &ProgressBar,
) -> Result<BatchReport>
where
    T: LoadTask + 'static,
    S: MigrationStore + 'static,
    F: Fn() -> S,
{
    let jobs = options.jobs.max(1);
    if jobs == 1 {
        let mut store = make_store();
        return run_batch(&mut store, task.as_ref(), items, options, progress).await;
    }

    let shards = shard_items(items, jobs, |item| task.key(item));
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();
    for shard in shards.into_iter().filter(|shard| !shard.is_empty()) {
        let mut store = make_store();
        let task = Arc::clone(&task);
        let options = options.clone();
        let progress = progress.clone();
        let stop = Arc::clone(&stop);
        handles.push(tokio::spawn(async move {
            drive(&mut store, task.as_ref(), shard, &options, &progress, Some(&stop)).await
        }));
    }

    let mut report = BatchReport::default();
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(shard_report)) => report.merge(shard_report),
            Ok(Err(err)) => {
                first_error.get_or_insert(err);
            }
            Err(err) => {
                stop.store(true, Ordering::SeqCst);
                first_error.get_or_insert(MigrateError::Worker(err.to_string()));
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

async fn drive<S, T>(
    store: &mut S,
    task: &T,
    items: Vec<Value>,
    options: &BatchOptions,
    progress: &ProgressBar,
    stop: Option<&AtomicBool>,
) -> Result<BatchReport>
where
    S: MigrationStore,
    T: LoadTask + ?Sized,
{
    let mut report = BatchReport::default();
    for item in items {
        if stop.map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(false) {
            warn!(entity = task.entity(), "batch stopped by another worker");
            break;
        }

        let key = task.key(&item);
        let result = match task.load(&mut *store, &item).await {
            Ok(()) => store.checkpoint().await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => report.loaded += 1,
            Err(err) => {
                store.rollback().await?;
                if !options.continue_on_error {
                    if let Some(flag) = stop {
                        flag.store(true, Ordering::SeqCst);
                    }
                    error!(entity = task.entity(), key = %key, error = %err, "load failed, aborting");
                    return Err(err);
                }
                error!(entity = task.entity(), key = %key, error = %err, "load failed");
                report.failed.push(FailedItem {
                    key,
                    error: err.to_string(),
                });
            }
        }
        progress.inc(1);
    }

    info!(
        entity = task.entity(),
        loaded = report.loaded,
        failed = report.failed.len(),
        "batch finished"
    );
    Ok(report)
}

/// Split items into `shards` groups by key hash, preserving order inside each group.
pub fn shard_items<F>(items: Vec<Value>, shards: usize, key: F) -> Vec<Vec<Value>>
where
    F: Fn(&Value) -> String,
{
    let shards = shards.max(1);
    let mut groups: Vec<Vec<Value>> = (0..shards).map(|_| Vec::new()).collect();
    for item in items {
        let mut hasher = DefaultHasher::new();
        key(&item).hash(&mut hasher);
        let index = (hasher.finish() % shards as u64) as usize;
        groups[index].push(item);
    }
    groups
}

/// Keep only the items whose key equals `wanted`.
pub fn select_items<T>(task: &T, items: Vec<Value>, wanted: &str) -> Vec<Value>
where
    T: LoadTask + ?Sized,
{
    items.into_iter().filter(|item| task.key(item) == wanted).collect()
}

fn field_key(item: &Value, field: &str) -> String {
    match item.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "<unknown>".to_string(),
    }
}

pub struct RecordTask {
    pub options: DumpOptions,
}

#[async_trait]
impl LoadTask for RecordTask {
    fn entity(&self) -> &'static str {
        "record"
    }

    fn key(&self, item: &Value) -> String {
        item.get("recid")
            .and_then(recid_from_value)
            .map(|recid| recid.to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    async fn load(&self, store: &mut dyn MigrationStore, item: &Value) -> Result<()> {
        let dump = RecordDump::from_value(item.clone(), &self.options)?;
        load_record(store, &dump).await?;
        Ok(())
    }
}

pub struct DepositTask;

#[async_trait]
impl LoadTask for DepositTask {
    fn entity(&self) -> &'static str {
        "deposit"
    }

    fn key(&self, item: &Value) -> String {
        depid_of(item).unwrap_or_else(|| "<unknown>".to_string())
    }

    async fn load(&self, store: &mut dyn MigrationStore, item: &Value) -> Result<()> {
        let dump = DepositDump::from_value(item.clone())?;
        load_deposit(store, &dump).await?;
        Ok(())
    }
}

pub struct UserTask {
    pub policy: DuplicatePolicy,
}

#[async_trait]
impl LoadTask for UserTask {
    fn entity(&self) -> &'static str {
        "user"
    }

    fn key(&self, item: &Value) -> String {
        field_key(item, "id")
    }

    async fn load(&self, store: &mut dyn MigrationStore, item: &Value) -> Result<()> {
        let dump = UserDump::from_value(item.clone())?;
        load_user(store, &dump, self.policy).await?;
        Ok(())
    }
}

pub struct CommunityTask {
    pub logos: LogoOptions,
}

#[async_trait]
impl LoadTask for CommunityTask {
    fn entity(&self) -> &'static str {
        "community"
    }

    fn key(&self, item: &Value) -> String {
        field_key(item, "id")
    }

    async fn load(&self, store: &mut dyn MigrationStore, item: &Value) -> Result<()> {
        let dump = CommunityDump::from_value(item.clone())?;
        load_community(store, &dump, &self.logos).await?;
        Ok(())
    }
}

pub struct FeaturedTask;

#[async_trait]
impl LoadTask for FeaturedTask {
    fn entity(&self) -> &'static str {
        "featured community"
    }

    fn key(&self, item: &Value) -> String {
        field_key(item, "id")
    }

    async fn load(&self, store: &mut dyn MigrationStore, item: &Value) -> Result<()> {
        let dump = FeaturedDump::from_value(item.clone())?;
        load_featured(store, &dump).await?;
        Ok(())
    }
}

pub struct RemoteAccountTask;

#[async_trait]
impl LoadTask for RemoteAccountTask {
    fn entity(&self) -> &'static str {
        "remote account"
    }

    fn key(&self, item: &Value) -> String {
        match item.get("remoteaccount") {
            Some(account) if !account.is_null() => field_key(account, "id"),
            Some(_) => item
                .get("userext")
                .map(|ext| field_key(ext, "id"))
                .unwrap_or_else(|| "<unknown>".to_string()),
            None => field_key(item, "id"),
        }
    }

    async fn load(&self, store: &mut dyn MigrationStore, item: &Value) -> Result<()> {
        load_remote_account_item(store, item).await
    }
}

pub struct UserIdentityTask;

#[async_trait]
impl LoadTask for UserIdentityTask {
    fn entity(&self) -> &'static str {
        "user identity"
    }

    fn key(&self, item: &Value) -> String {
        format!("{}/{}", field_key(item, "method"), field_key(item, "id"))
    }

    async fn load(&self, store: &mut dyn MigrationStore, item: &Value) -> Result<()> {
        let dump = UserIdentityDump::from_value(item.clone())?;
        load_user_identity(store, &dump).await?;
        Ok(())
    }
}

pub struct RemoteTokenTask;

#[async_trait]
impl LoadTask for RemoteTokenTask {
    fn entity(&self) -> &'static str {
        "remote token"
    }

    fn key(&self, item: &Value) -> String {
        field_key(item, "id_remote_account")
    }

    async fn load(&self, store: &mut dyn MigrationStore, item: &Value) -> Result<()> {
        let dump = RemoteTokenDump::from_value(item.clone())?;
        load_remote_token(store, &dump).await?;
        Ok(())
    }
}
