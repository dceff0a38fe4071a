//! Database operations for persistent identifiers and the recid sequence.

use super::models::{NewPid, PersistentIdentifier, PidStatus};
use crate::error::{conflict_on_unique, Result};
use sqlx::PgConnection;
use uuid::Uuid;

const PID_COLUMNS: &str =
    "id, pid_type, pid_value, pid_provider, status, object_type, object_uuid, created_at";

/// Get an identifier by type and value
pub async fn get_pid(
    conn: &mut PgConnection,
    pid_type: &str,
    pid_value: &str,
) -> Result<Option<PersistentIdentifier>> {
    let pid = sqlx::query_as::<_, PersistentIdentifier>(&format!(
        "SELECT {} FROM pids WHERE pid_type = $1 AND pid_value = $2",
        PID_COLUMNS
    ))
    .bind(pid_type)
    .bind(pid_value)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(pid)
}

/// Create an identifier. A taken `(pid_type, pid_value)` is a storage conflict.
pub async fn create_pid(conn: &mut PgConnection, new: &NewPid) -> Result<PersistentIdentifier> {
    let object_type = new.object_uuid.map(|_| "rec");
    sqlx::query_as::<_, PersistentIdentifier>(&format!(
        r#"
        INSERT INTO pids (pid_type, pid_value, pid_provider, status, object_type, object_uuid)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        PID_COLUMNS
    ))
    .bind(&new.pid_type)
    .bind(&new.pid_value)
    .bind(&new.pid_provider)
    .bind(new.status)
    .bind(object_type)
    .bind(new.object_uuid)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, || format!("pid {}:{} already exists", new.pid_type, new.pid_value)))
}

/// Bind a reserved identifier to an object and mark it registered
pub async fn register_pid(conn: &mut PgConnection, id: i64, object_uuid: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pids
        SET status = $2, object_type = 'rec', object_uuid = $3
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(PidStatus::Registered)
    .bind(object_uuid)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// All identifiers bound to an object, regardless of type
pub async fn pids_for_object(conn: &mut PgConnection, object_uuid: Uuid) -> Result<Vec<PersistentIdentifier>> {
    let pids = sqlx::query_as::<_, PersistentIdentifier>(&format!(
        "SELECT {} FROM pids WHERE object_uuid = $1 ORDER BY id",
        PID_COLUMNS
    ))
    .bind(object_uuid)
    .fetch_all(&mut *conn)
    .await?;

    Ok(pids)
}

/// Set the status of every identifier bound to an object
pub async fn set_status_for_object(conn: &mut PgConnection, object_uuid: Uuid, status: PidStatus) -> Result<u64> {
    let result = sqlx::query("UPDATE pids SET status = $2 WHERE object_uuid = $1")
        .bind(object_uuid)
        .bind(status)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

pub async fn remove_pid(conn: &mut PgConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM record_sips WHERE pid_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM pids WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn remove_pids_for_object(conn: &mut PgConnection, object_uuid: Uuid) -> Result<u64> {
    sqlx::query("DELETE FROM record_sips WHERE pid_id IN (SELECT id FROM pids WHERE object_uuid = $1)")
        .bind(object_uuid)
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("DELETE FROM pids WHERE object_uuid = $1")
        .bind(object_uuid)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Take a recid sequence value. Taking it twice is a storage conflict.
pub async fn insert_recid(conn: &mut PgConnection, recid: i64) -> Result<()> {
    sqlx::query("INSERT INTO recid_sequence (recid) VALUES ($1)")
        .bind(recid)
        .execute(&mut *conn)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("recid {} already taken", recid)))?;

    Ok(())
}

pub async fn recid_exists(conn: &mut PgConnection, recid: i64) -> Result<bool> {
    let row: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM recid_sequence WHERE recid = $1)")
        .bind(recid)
        .fetch_one(&mut *conn)
        .await?;

    Ok(row.0)
}

pub async fn remove_recid(conn: &mut PgConnection, recid: i64) -> Result<()> {
    sqlx::query("DELETE FROM recid_sequence WHERE recid = $1")
        .bind(recid)
        .execute(&mut *conn)
        .await?;

    Ok(())
}
