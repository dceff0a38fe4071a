pub mod accounts;
pub mod deposits;
pub mod files;
pub mod models;
pub mod pids;
pub mod records;

use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

pub type DbPool = Pool<Postgres>;

// Re-export commonly used types
pub use models::{
    Bucket, Community, FeaturedCommunity, FileInstance, NewPid, ObjectVersion, PersistentIdentifier,
    PidStatus, RecordMetadata, RecordRevision, RemoteAccount, RemoteToken, Sip, SipFile, User, UserIdentity,
    FILES_KEY,
};

/// Create a database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations using SQLx's built-in migration tracking.
/// Migrations are tracked in the `_sqlx_migrations` table and only run once.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Loaded entity counts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub records: i64,
    pub deleted_records: i64,
    pub revisions: i64,
    pub reserved_pids: i64,
    pub registered_pids: i64,
    pub deleted_pids: i64,
    pub buckets: i64,
    pub objects: i64,
    pub file_instances: i64,
    pub users: i64,
    pub communities: i64,
    pub featured: i64,
    pub sips: i64,
    pub remote_accounts: i64,
    pub user_identities: i64,
    pub remote_tokens: i64,
}

async fn count(pool: &DbPool, sql: &str) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(sql).fetch_one(pool).await?;
    Ok(row.0)
}

async fn count_pids(pool: &DbPool, status: PidStatus) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pids WHERE status = $1")
        .bind(status)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Get loader statistics
pub async fn get_stats(pool: &DbPool) -> Result<Stats> {
    Ok(Stats {
        records: count(pool, "SELECT COUNT(*) FROM records WHERE NOT is_deleted").await?,
        deleted_records: count(pool, "SELECT COUNT(*) FROM records WHERE is_deleted").await?,
        revisions: count(pool, "SELECT COUNT(*) FROM record_revisions").await?,
        reserved_pids: count_pids(pool, PidStatus::Reserved).await?,
        registered_pids: count_pids(pool, PidStatus::Registered).await?,
        deleted_pids: count_pids(pool, PidStatus::Deleted).await?,
        buckets: count(pool, "SELECT COUNT(*) FROM buckets").await?,
        objects: count(pool, "SELECT COUNT(*) FROM object_versions").await?,
        file_instances: count(pool, "SELECT COUNT(*) FROM file_instances").await?,
        users: count(pool, "SELECT COUNT(*) FROM users").await?,
        communities: count(pool, "SELECT COUNT(*) FROM communities").await?,
        featured: count(pool, "SELECT COUNT(*) FROM featured_communities").await?,
        sips: count(pool, "SELECT COUNT(*) FROM sips").await?,
        remote_accounts: count(pool, "SELECT COUNT(*) FROM remote_accounts").await?,
        user_identities: count(pool, "SELECT COUNT(*) FROM user_identities").await?,
        remote_tokens: count(pool, "SELECT COUNT(*) FROM remote_tokens").await?,
    })
}

/// Remove every loaded entity, keeping the schema
pub async fn reset(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        TRUNCATE remote_tokens, remote_accounts, user_identities, deposit_index, sip_files, record_sips, sips, featured_communities,
                 communities, users, records_buckets, object_versions, file_instances,
                 bucket_tags, buckets, pids, record_revisions, records, recid_sequence
        RESTART IDENTITY
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
