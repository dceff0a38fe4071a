//! Database operations for SIPs and the deposit index.

use super::models::{Sip, SipFile};
use crate::error::Result;
use sqlx::PgConnection;
use uuid::Uuid;

pub async fn create_sip(conn: &mut PgConnection, sip: &Sip) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sips (id, user_id, agent, content, sip_format, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(sip.id)
    .bind(sip.user_id)
    .bind(&sip.agent)
    .bind(&sip.content)
    .bind(&sip.sip_format)
    .bind(sip.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_sip(conn: &mut PgConnection, id: Uuid) -> Result<Option<Sip>> {
    let sip = sqlx::query_as::<_, Sip>(
        "SELECT id, user_id, agent, content, sip_format, created_at FROM sips WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(sip)
}

pub async fn link_sip_pid(conn: &mut PgConnection, sip_id: Uuid, pid_id: i64) -> Result<()> {
    sqlx::query("INSERT INTO record_sips (sip_id, pid_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(sip_id)
        .bind(pid_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn sips_for_pid(conn: &mut PgConnection, pid_id: i64) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT sip_id FROM record_sips WHERE pid_id = $1")
        .bind(pid_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn add_sip_file(conn: &mut PgConnection, file: &SipFile) -> Result<()> {
    sqlx::query("INSERT INTO sip_files (sip_id, filepath, file_id) VALUES ($1, $2, $3)")
        .bind(file.sip_id)
        .bind(&file.filepath)
        .bind(file.file_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn sip_files(conn: &mut PgConnection, sip_id: Uuid) -> Result<Vec<SipFile>> {
    let files = sqlx::query_as::<_, SipFile>(
        "SELECT sip_id, filepath, file_id FROM sip_files WHERE sip_id = $1 ORDER BY filepath",
    )
    .bind(sip_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(files)
}

/// Remove a SIP with its files and record links, returning the file instances it referenced
pub async fn remove_sip(conn: &mut PgConnection, sip_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as("DELETE FROM sip_files WHERE sip_id = $1 RETURNING file_id")
        .bind(sip_id)
        .fetch_all(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM record_sips WHERE sip_id = $1")
        .bind(sip_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM sips WHERE id = $1")
        .bind(sip_id)
        .execute(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn index_deposit(conn: &mut PgConnection, recid: i64, deposit_id: Uuid) -> Result<()> {
    sqlx::query("INSERT INTO deposit_index (recid, deposit_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(recid)
        .bind(deposit_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn deposits_for_recid(conn: &mut PgConnection, recid: i64) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT deposit_id FROM deposit_index WHERE recid = $1")
        .bind(recid)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn unindex_deposit(conn: &mut PgConnection, deposit_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM deposit_index WHERE deposit_id = $1")
        .bind(deposit_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}
