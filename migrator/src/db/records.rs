//! Database operations for records and their stored revisions.

use super::models::{RecordMetadata, RecordRevision};
use crate::error::{conflict_on_unique, MigrateError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

/// Create a record and store its first revision
pub async fn create_record(
    conn: &mut PgConnection,
    id: Uuid,
    json: &Value,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
) -> Result<RecordMetadata> {
    let record = sqlx::query_as::<_, RecordMetadata>(
        r#"
        INSERT INTO records (id, json, version_id, created, updated, is_deleted)
        VALUES ($1, $2, 1, $3, $4, FALSE)
        RETURNING id, json, version_id, created, updated, is_deleted
        "#,
    )
    .bind(id)
    .bind(json)
    .bind(created)
    .bind(updated)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, || format!("record {} already exists", id)))?;

    insert_revision(conn, &record).await?;
    Ok(record)
}

async fn insert_revision(conn: &mut PgConnection, record: &RecordMetadata) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO record_revisions (record_id, version_id, json, updated)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(record.id)
    .bind(record.version_id)
    .bind(&record.json)
    .bind(record.updated)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Get a record by id. Soft-deleted records are only returned with `with_deleted`.
pub async fn get_record(conn: &mut PgConnection, id: Uuid, with_deleted: bool) -> Result<Option<RecordMetadata>> {
    let record = sqlx::query_as::<_, RecordMetadata>(
        r#"
        SELECT id, json, version_id, created, updated, is_deleted
        FROM records
        WHERE id = $1 AND ($2 OR NOT is_deleted)
        "#,
    )
    .bind(id)
    .bind(with_deleted)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(record)
}

/// Overwrite the current metadata and store it as a new revision
pub async fn update_record(
    conn: &mut PgConnection,
    id: Uuid,
    json: &Value,
    updated: DateTime<Utc>,
) -> Result<RecordMetadata> {
    let record = sqlx::query_as::<_, RecordMetadata>(
        r#"
        UPDATE records
        SET json = $2, updated = $3, version_id = version_id + 1
        WHERE id = $1
        RETURNING id, json, version_id, created, updated, is_deleted
        "#,
    )
    .bind(id)
    .bind(json)
    .bind(updated)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| MigrateError::NotFound(format!("record {}", id)))?;

    insert_revision(conn, &record).await?;
    Ok(record)
}

/// Rewrite the metadata of the current revision in place
pub async fn replace_json(conn: &mut PgConnection, id: Uuid, json: &Value) -> Result<()> {
    let result = sqlx::query("UPDATE records SET json = $2 WHERE id = $1")
        .bind(id)
        .bind(json)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(MigrateError::NotFound(format!("record {}", id)));
    }

    sqlx::query(
        r#"
        UPDATE record_revisions
        SET json = $2
        WHERE record_id = $1
          AND version_id = (SELECT version_id FROM records WHERE id = $1)
        "#,
    )
    .bind(id)
    .bind(json)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Stored revisions, oldest first
pub async fn list_revisions(conn: &mut PgConnection, id: Uuid) -> Result<Vec<RecordRevision>> {
    let revisions = sqlx::query_as::<_, RecordRevision>(
        r#"
        SELECT record_id, version_id, json, updated
        FROM record_revisions
        WHERE record_id = $1
        ORDER BY version_id
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(revisions)
}

/// Mark a record deleted, keeping its metadata and history
pub async fn soft_delete(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE records SET is_deleted = TRUE WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Remove a record and its revisions
pub async fn remove_record(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM record_revisions WHERE record_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM records WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}
