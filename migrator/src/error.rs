//! Error types for the migration loader.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrateError>;

#[derive(Error, Debug)]
pub enum MigrateError {
    /// The dump entry is missing required structure.
    #[error("Malformed dump: {0}")]
    MalformedDump(String),

    /// A dump references an entity that has not been loaded yet.
    #[error("{dependent} references missing {missing}")]
    ReferencedEntityMissing { dependent: String, missing: String },

    /// A deposit's SIPs point at more than one record.
    #[error("Deposit {depid} references multiple recids: {recids:?}")]
    MultipleRecids { depid: String, recids: Vec<i64> },

    /// A unique external key (email, username) is already taken.
    #[error("Duplicate {field}: {value}")]
    DuplicateExternalKey { field: &'static str, value: String },

    /// An identifier or entity already exists where a fresh one was expected.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A concurrent load worker panicked or was cancelled.
    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        MigrateError::MalformedDump(msg.into())
    }

    /// Whether re-running the same item could succeed without changing the dump.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MigrateError::ReferencedEntityMissing { .. } | MigrateError::Database(_) | MigrateError::Io(_)
        )
    }
}

/// Map a unique-constraint violation to `StorageConflict`, pass everything else through.
pub(crate) fn conflict_on_unique(err: sqlx::Error, what: impl FnOnce() -> String) -> MigrateError {
    let unique = err
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);
    if unique {
        MigrateError::StorageConflict(what())
    } else {
        MigrateError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = MigrateError::ReferencedEntityMissing {
            dependent: "depid:1".to_string(),
            missing: "recid:10".to_string(),
        };
        assert_eq!(err.to_string(), "depid:1 references missing recid:10");

        let err = MigrateError::DuplicateExternalKey {
            field: "email",
            value: "a@b.org".to_string(),
        };
        assert_eq!(err.to_string(), "Duplicate email: a@b.org");
    }

    #[test]
    fn test_retryable() {
        assert!(!MigrateError::malformed("no recid").is_retryable());
        assert!(!MigrateError::StorageConflict("recid 1".into()).is_retryable());
        assert!(MigrateError::ReferencedEntityMissing {
            dependent: "depid:1".into(),
            missing: "recid:2".into(),
        }
        .is_retryable());
    }
}
