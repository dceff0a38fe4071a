//! Database operations for users, their remote accounts, and communities.

use super::models::{Community, FeaturedCommunity, RemoteAccount, RemoteToken, User, UserIdentity};
use crate::error::{conflict_on_unique, Result};
use sqlx::PgConnection;

const USER_COLUMNS: &str =
    "id, email, username, given_names, family_name, note, settings, last_login_at, active";

const COMMUNITY_COLUMNS: &str = "id, id_user, title, description, page, curation_policy, \
     last_record_accepted, logo_ext, ranking, fixed_points, created, updated";

pub async fn get_user(conn: &mut PgConnection, id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(user)
}

/// Case-insensitive lookup by email
pub async fn find_user_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
        USER_COLUMNS
    ))
    .bind(email)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(user)
}

/// Case-insensitive lookup by username
pub async fn find_user_by_username(conn: &mut PgConnection, username: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE LOWER(username) = LOWER($1)",
        USER_COLUMNS
    ))
    .bind(username)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(user)
}

pub async fn insert_user(conn: &mut PgConnection, user: &User) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO users (id, email, username, given_names, family_name, note, settings, last_login_at, active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.username)
    .bind(&user.given_names)
    .bind(&user.family_name)
    .bind(&user.note)
    .bind(&user.settings)
    .bind(user.last_login_at)
    .bind(user.active)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, || format!("user {} already exists", user.id)))?;

    Ok(())
}

pub async fn get_community(conn: &mut PgConnection, id: &str) -> Result<Option<Community>> {
    let community = sqlx::query_as::<_, Community>(&format!(
        "SELECT {} FROM communities WHERE id = $1",
        COMMUNITY_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(community)
}

pub async fn insert_community(conn: &mut PgConnection, community: &Community) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO communities (id, id_user, title, description, page, curation_policy,
                                 last_record_accepted, logo_ext, ranking, fixed_points, created, updated)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(&community.id)
    .bind(community.id_user)
    .bind(&community.title)
    .bind(&community.description)
    .bind(&community.page)
    .bind(&community.curation_policy)
    .bind(community.last_record_accepted)
    .bind(&community.logo_ext)
    .bind(community.ranking)
    .bind(community.fixed_points)
    .bind(community.created)
    .bind(community.updated)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, || format!("community {} already exists", community.id)))?;

    Ok(())
}

pub async fn get_featured(conn: &mut PgConnection, id: i64) -> Result<Option<FeaturedCommunity>> {
    let featured = sqlx::query_as::<_, FeaturedCommunity>(
        "SELECT id, id_community, start_date FROM featured_communities WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(featured)
}

pub async fn insert_featured(conn: &mut PgConnection, featured: &FeaturedCommunity) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO featured_communities (id, id_community, start_date)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(featured.id)
    .bind(&featured.id_community)
    .bind(featured.start_date)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, || format!("featured community {} already exists", featured.id)))?;

    Ok(())
}

pub async fn get_remote_account(conn: &mut PgConnection, id: i64) -> Result<Option<RemoteAccount>> {
    let account = sqlx::query_as::<_, RemoteAccount>(
        "SELECT id, user_id, client_id, extra_data FROM remote_accounts WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(account)
}

pub async fn insert_remote_account(conn: &mut PgConnection, account: &RemoteAccount) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO remote_accounts (id, user_id, client_id, extra_data)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(account.id)
    .bind(account.user_id)
    .bind(&account.client_id)
    .bind(&account.extra_data)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, || format!("remote account {} already exists", account.id)))?;

    Ok(())
}

pub async fn get_user_identity(conn: &mut PgConnection, id: &str, method: &str) -> Result<Option<UserIdentity>> {
    let identity = sqlx::query_as::<_, UserIdentity>(
        "SELECT id, method, id_user FROM user_identities WHERE id = $1 AND method = $2",
    )
    .bind(id)
    .bind(method)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(identity)
}

pub async fn insert_user_identity(conn: &mut PgConnection, identity: &UserIdentity) -> Result<()> {
    sqlx::query("INSERT INTO user_identities (id, method, id_user) VALUES ($1, $2, $3)")
        .bind(&identity.id)
        .bind(&identity.method)
        .bind(identity.id_user)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!("user identity {}/{} already exists", identity.method, identity.id)
            })
        })?;

    Ok(())
}

pub async fn get_remote_token(
    conn: &mut PgConnection,
    id_remote_account: i64,
    token_type: &str,
) -> Result<Option<RemoteToken>> {
    let token = sqlx::query_as::<_, RemoteToken>(
        r#"
        SELECT id_remote_account, token_type, access_token, secret
        FROM remote_tokens
        WHERE id_remote_account = $1 AND token_type = $2
        "#,
    )
    .bind(id_remote_account)
    .bind(token_type)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(token)
}

pub async fn insert_remote_token(conn: &mut PgConnection, token: &RemoteToken) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO remote_tokens (id_remote_account, token_type, access_token, secret)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(token.id_remote_account)
    .bind(&token.token_type)
    .bind(&token.access_token)
    .bind(&token.secret)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        conflict_on_unique(e, || {
            format!("remote token {}/{} already exists", token.id_remote_account, token.token_type)
        })
    })?;

    Ok(())
}
