//! User loading
//!
//! Users must be loaded one at a time: emails and usernames are unique and
//! duplicates in the legacy data are resolved against what is already
//! stored.

use crate::db::models::User;
use crate::dump::parse_timestamp_opt;
use crate::error::{MigrateError, Result};
use crate::store::MigrationStore;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

const DUPLICATE_PREFIX: &str = "DUPLICATE_";

/// What to do with an email or username that is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Prefix the email, drop the username
    #[default]
    Rename,
    /// Reject the user with `DuplicateExternalKey`
    Fail,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rename" => Ok(DuplicatePolicy::Rename),
            "fail" => Ok(DuplicatePolicy::Fail),
            other => Err(MigrateError::Config(format!("unknown duplicate policy: {}", other))),
        }
    }
}

/// One user dump item
#[derive(Debug, Clone, Deserialize)]
pub struct UserDump {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub given_names: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default)]
    pub last_login: Option<String>,
}

impl UserDump {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| MigrateError::malformed(format!("user: {}", e)))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Load one user, resolving duplicate email and username per `policy`.
pub async fn load_user<S>(store: &mut S, dump: &UserDump, policy: DuplicatePolicy) -> Result<User>
where
    S: MigrationStore + ?Sized,
{
    if store.get_user(dump.id).await?.is_some() {
        return Err(MigrateError::StorageConflict(format!("user {} already exists", dump.id)));
    }

    let mut email = dump.email.trim().to_string();
    if email.is_empty() {
        return Err(MigrateError::malformed(format!("user {} has no email", dump.id)));
    }
    if store.find_user_by_email(&email).await?.is_some() {
        match policy {
            DuplicatePolicy::Fail => {
                return Err(MigrateError::DuplicateExternalKey {
                    field: "email",
                    value: email,
                });
            }
            DuplicatePolicy::Rename => {
                let mut renamed = format!("{}{}", DUPLICATE_PREFIX, email);
                let mut copy = 1;
                while store.find_user_by_email(&renamed).await?.is_some() {
                    copy += 1;
                    renamed = format!("{}{}_{}", DUPLICATE_PREFIX, copy, email);
                }
                warn!(user_id = dump.id, %email, %renamed, "duplicate email, renaming");
                email = renamed;
            }
        }
    }

    let mut username = non_empty(&dump.nickname);
    if let Some(name) = username.clone() {
        if store.find_user_by_username(&name).await?.is_some() {
            match policy {
                DuplicatePolicy::Fail => {
                    return Err(MigrateError::DuplicateExternalKey {
                        field: "username",
                        value: name,
                    });
                }
                DuplicatePolicy::Rename => {
                    warn!(user_id = dump.id, username = %name, "duplicate username, dropping it");
                    username = None;
                }
            }
        }
    }

    let user = User {
        id: dump.id,
        email,
        username,
        given_names: non_empty(&dump.given_names),
        family_name: non_empty(&dump.family_name),
        note: non_empty(&dump.note),
        settings: dump.settings.clone().filter(|s| !s.is_null()),
        last_login_at: parse_timestamp_opt(dump.last_login.as_deref())?,
        active: true,
    };
    store.insert_user(&user).await?;

    info!(user_id = user.id, email = %user.email, "user loaded");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccountStore, MemoryStore};
    use serde_json::json;

    fn user(id: i64, email: &str, nickname: Option<&str>) -> UserDump {
        UserDump::from_value(json!({
            "id": id,
            "email": email,
            "nickname": nickname,
            "given_names": "Ada",
            "family_name": "",
            "note": "1",
            "settings": {"language": "en"},
            "last_login": "2015-06-01T12:00:00"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_load_user_fields() {
        let mut store = MemoryStore::new();
        let loaded = load_user(&mut store, &user(1, "ada@example.org", Some("ada")), DuplicatePolicy::Rename)
            .await
            .unwrap();
        assert_eq!(loaded.username.as_deref(), Some("ada"));
        assert_eq!(loaded.given_names.as_deref(), Some("Ada"));
        assert_eq!(loaded.family_name, None);
        assert!(loaded.last_login_at.is_some());
        assert_eq!(store.get_user(1).await.unwrap(), Some(loaded));
    }

    #[tokio::test]
    async fn test_rename_duplicates() {
        let mut store = MemoryStore::new();
        load_user(&mut store, &user(1, "ada@example.org", Some("ada")), DuplicatePolicy::Rename)
            .await
            .unwrap();
        let dup = load_user(&mut store, &user(2, "ADA@example.org", Some("Ada")), DuplicatePolicy::Rename)
            .await
            .unwrap();
        assert_eq!(dup.email, "DUPLICATE_ADA@example.org");
        assert_eq!(dup.username, None);
        assert_eq!(store.state().users.len(), 2);
    }

    #[tokio::test]
    async fn test_rename_repeated_duplicates() {
        let mut store = MemoryStore::new();
        for id in 1..=3 {
            load_user(&mut store, &user(id, "ada@example.org", None), DuplicatePolicy::Rename)
                .await
                .unwrap();
        }
        assert_eq!(store.get_user(2).await.unwrap().unwrap().email, "DUPLICATE_ada@example.org");
        assert_eq!(store.get_user(3).await.unwrap().unwrap().email, "DUPLICATE_2_ada@example.org");
        assert_eq!(store.state().users.len(), 3);
    }

    #[tokio::test]
    async fn test_fail_on_duplicates() {
        let mut store = MemoryStore::new();
        load_user(&mut store, &user(1, "ada@example.org", Some("ada")), DuplicatePolicy::Fail)
            .await
            .unwrap();

        let err = load_user(&mut store, &user(2, "ada@example.org", None), DuplicatePolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateExternalKey { field: "email", .. }));

        let err = load_user(&mut store, &user(3, "other@example.org", Some("ada")), DuplicatePolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateExternalKey { field: "username", .. }));
    }

    #[tokio::test]
    async fn test_same_id_twice_conflicts() {
        let mut store = MemoryStore::new();
        load_user(&mut store, &user(1, "ada@example.org", None), DuplicatePolicy::Rename)
            .await
            .unwrap();
        let err = load_user(&mut store, &user(1, "ada@example.org", None), DuplicatePolicy::Rename)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::StorageConflict(_)));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("rename".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Rename);
        assert_eq!("FAIL".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::Fail);
        assert!("skip".parse::<DuplicatePolicy>().is_err());
    }
}
