//! Database operations for buckets, file instances and object versions.

use super::models::{Bucket, FileInstance, ObjectVersion};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

const OBJECT_COLUMNS: &str = "version_id, bucket_id, key, file_id, is_head, created, seq";

pub async fn create_bucket(conn: &mut PgConnection) -> Result<Bucket> {
    let bucket = sqlx::query_as::<_, Bucket>(
        r#"
        INSERT INTO buckets (id)
        VALUES ($1)
        RETURNING id, deleted, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .fetch_one(&mut *conn)
    .await?;

    Ok(bucket)
}

pub async fn get_bucket(conn: &mut PgConnection, id: Uuid) -> Result<Option<Bucket>> {
    let bucket = sqlx::query_as::<_, Bucket>("SELECT id, deleted, created_at FROM buckets WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(bucket)
}

/// Set a tag on a bucket, replacing any previous value
pub async fn set_bucket_tag(conn: &mut PgConnection, bucket_id: Uuid, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO bucket_tags (bucket_id, key, value)
        VALUES ($1, $2, $3)
        ON CONFLICT (bucket_id, key) DO UPDATE SET value = EXCLUDED.value
        "#,
    )
    .bind(bucket_id)
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_bucket_tag(conn: &mut PgConnection, bucket_id: Uuid, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM bucket_tags WHERE bucket_id = $1 AND key = $2")
        .bind(bucket_id)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|r| r.0))
}

pub async fn mark_bucket_deleted(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE buckets SET deleted = TRUE WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Remove a bucket with its tags and record links. Objects must be gone already.
pub async fn remove_bucket(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM bucket_tags WHERE bucket_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM records_buckets WHERE bucket_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM buckets WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Link a bucket to a record. Linking twice is a no-op.
pub async fn link_record_bucket(conn: &mut PgConnection, record_id: Uuid, bucket_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO records_buckets (record_id, bucket_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(record_id)
    .bind(bucket_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn buckets_for_record(conn: &mut PgConnection, record_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT bucket_id FROM records_buckets WHERE record_id = $1")
        .bind(record_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Find the file instance for `(uri, size, checksum)`, creating it when absent
pub async fn get_or_create_file_instance(
    conn: &mut PgConnection,
    uri: &str,
    size: i64,
    checksum: &str,
) -> Result<FileInstance> {
    let existing = sqlx::query_as::<_, FileInstance>(
        r#"
        SELECT id, uri, size, checksum, created_at
        FROM file_instances
        WHERE uri = $1 AND size = $2 AND checksum = $3
        "#,
    )
    .bind(uri)
    .bind(size)
    .bind(checksum)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(file) = existing {
        return Ok(file);
    }

    let file = sqlx::query_as::<_, FileInstance>(
        r#"
        INSERT INTO file_instances (id, uri, size, checksum)
        VALUES ($1, $2, $3, $4)
        RETURNING id, uri, size, checksum, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(uri)
    .bind(size)
    .bind(checksum)
    .fetch_one(&mut *conn)
    .await?;

    Ok(file)
}

pub async fn get_file_instance(conn: &mut PgConnection, id: Uuid) -> Result<Option<FileInstance>> {
    let file = sqlx::query_as::<_, FileInstance>(
        "SELECT id, uri, size, checksum, created_at FROM file_instances WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(file)
}

/// Objects and SIP files still pointing at a file instance
pub async fn file_instance_refcount(conn: &mut PgConnection, id: Uuid) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        SELECT (SELECT COUNT(*) FROM object_versions WHERE file_id = $1)
             + (SELECT COUNT(*) FROM sip_files WHERE file_id = $1)
        "#,
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.0)
}

pub async fn remove_file_instance(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM file_instances WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Objects of a bucket in creation order, optionally restricted to one key
pub async fn list_objects(conn: &mut PgConnection, bucket_id: Uuid, key: Option<&str>) -> Result<Vec<ObjectVersion>> {
    let objects = sqlx::query_as::<_, ObjectVersion>(&format!(
        r#"
        SELECT {}
        FROM object_versions
        WHERE bucket_id = $1 AND ($2::TEXT IS NULL OR key = $2)
        ORDER BY key, seq
        "#,
        OBJECT_COLUMNS
    ))
    .bind(bucket_id)
    .bind(key)
    .fetch_all(&mut *conn)
    .await?;

    Ok(objects)
}

/// Append a version under `key`. The new object becomes the head.
pub async fn create_object(
    conn: &mut PgConnection,
    bucket_id: Uuid,
    key: &str,
    file_id: Uuid,
    created: DateTime<Utc>,
) -> Result<ObjectVersion> {
    sqlx::query("UPDATE object_versions SET is_head = FALSE WHERE bucket_id = $1 AND key = $2")
        .bind(bucket_id)
        .bind(key)
        .execute(&mut *conn)
        .await?;

    let object = sqlx::query_as::<_, ObjectVersion>(&format!(
        r#"
        INSERT INTO object_versions (version_id, bucket_id, key, file_id, is_head, created)
        VALUES ($1, $2, $3, $4, TRUE, $5)
        RETURNING {}
        "#,
        OBJECT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(bucket_id)
    .bind(key)
    .bind(file_id)
    .bind(created)
    .fetch_one(&mut *conn)
    .await?;

    Ok(object)
}

/// Make `version_id` the only head of its key
pub async fn set_head(conn: &mut PgConnection, version_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE object_versions o
        SET is_head = (o.version_id = $1)
        FROM object_versions t
        WHERE t.version_id = $1 AND o.bucket_id = t.bucket_id AND o.key = t.key
        "#,
    )
    .bind(version_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Remove all objects of a bucket, returning the file instances they referenced
pub async fn remove_objects(conn: &mut PgConnection, bucket_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Option<Uuid>,)> = sqlx::query_as("DELETE FROM object_versions WHERE bucket_id = $1 RETURNING file_id")
        .bind(bucket_id)
        .fetch_all(&mut *conn)
        .await?;

    let mut files: Vec<Uuid> = rows.into_iter().filter_map(|r| r.0).collect();
    files.sort();
    files.dedup();
    Ok(files)
}
