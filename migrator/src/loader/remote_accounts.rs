//! Remote accounts, user identities and remote tokens
//!
//! All three hang off users loaded earlier, so a missing owner is reported
//! as `ReferencedEntityMissing` and the item can be retried after the users.

use crate::db::models::{RemoteAccount, RemoteToken, UserIdentity};
use crate::error::{MigrateError, Result};
use crate::store::MigrationStore;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteAccountDump {
    pub id: i64,
    pub user_id: i64,
    pub client_id: String,
    #[serde(default)]
    pub extra_data: Value,
}

impl RemoteAccountDump {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| MigrateError::malformed(format!("remote account: {}", e)))
    }
}

/// Legacy `UserEXT` row
#[derive(Debug, Clone, Deserialize)]
pub struct UserIdentityDump {
    pub id: String,
    pub method: String,
    pub id_user: i64,
}

impl UserIdentityDump {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| MigrateError::malformed(format!("user identity: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTokenDump {
    pub id_remote_account: i64,
    #[serde(default)]
    pub token_type: String,
    pub access_token: String,
    #[serde(default)]
    pub secret: String,
}

impl RemoteTokenDump {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| MigrateError::malformed(format!("remote token: {}", e)))
    }
}

async fn require_user<S>(store: &mut S, dependent: String, user_id: i64) -> Result<()>
where
    S: MigrationStore + ?Sized,
{
    if store.get_user(user_id).await?.is_none() {
        return Err(MigrateError::ReferencedEntityMissing {
            dependent,
            missing: format!("user:{}", user_id),
        });
    }
    Ok(())
}

pub async fn load_remote_account<S>(store: &mut S, dump: &RemoteAccountDump) -> Result<RemoteAccount>
where
    S: MigrationStore + ?Sized,
{
    require_user(store, format!("remoteaccount:{}", dump.id), dump.user_id).await?;
    let account = RemoteAccount {
        id: dump.id,
        user_id: dump.user_id,
        client_id: dump.client_id.clone(),
        extra_data: match &dump.extra_data {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        },
    };
    store.insert_remote_account(&account).await?;
    info!(remote_account = account.id, user_id = account.user_id, client_id = %account.client_id, "remote account loaded");
    Ok(account)
}

pub async fn load_user_identity<S>(store: &mut S, dump: &UserIdentityDump) -> Result<UserIdentity>
where
    S: MigrationStore + ?Sized,
{
    require_user(store, format!("userext:{}/{}", dump.method, dump.id), dump.id_user).await?;
    let identity = UserIdentity {
        id: dump.id.clone(),
        method: dump.method.clone(),
        id_user: dump.id_user,
    };
    store.insert_user_identity(&identity).await?;
    info!(method = %identity.method, user_id = identity.id_user, "user identity loaded");
    Ok(identity)
}

pub async fn load_remote_token<S>(store: &mut S, dump: &RemoteTokenDump) -> Result<RemoteToken>
where
    S: MigrationStore + ?Sized,
{
    if store.get_remote_account(dump.id_remote_account).await?.is_none() {
        return Err(MigrateError::ReferencedEntityMissing {
            dependent: format!("remotetoken:{}/{}", dump.id_remote_account, dump.token_type),
            missing: format!("remoteaccount:{}", dump.id_remote_account),
        });
    }
    let token = RemoteToken {
        id_remote_account: dump.id_remote_account,
        token_type: dump.token_type.clone(),
        access_token: dump.access_token.clone(),
        secret: dump.secret.clone(),
    };
    store.insert_remote_token(&token).await?;
    info!(remote_account = token.id_remote_account, token_type = %token.token_type, "remote token loaded");
    Ok(token)
}

/// Load a remote account dump item.
///
/// Accepts a flat remote account, or the paired form
/// `{"remoteaccount": {...} | null, "userext": {...} | null}`.
pub async fn load_remote_account_item<S>(store: &mut S, item: &Value) -> Result<()>
where
    S: MigrationStore + ?Sized,
{
    let paired = item.get("remoteaccount").is_some() || item.get("userext").is_some();
    if !paired {
        load_remote_account(store, &RemoteAccountDump::from_value(item.clone())?).await?;
        return Ok(());
    }
    if let Some(account) = item.get("remoteaccount").filter(|v| !v.is_null()) {
        load_remote_account(store, &RemoteAccountDump::from_value(account.clone())?).await?;
    }
    if let Some(userext) = item.get("userext").filter(|v| !v.is_null()) {
        load_user_identity(store, &UserIdentityDump::from_value(userext.clone())?).await?;
    }
    Ok(())
}
