//! Dump input model
//!
//! One `MigrationRecord` per legacy bibliographic record, as written by the
//! dumping phase. Parsing is strict about structure: anything missing that
//! the loader relies on is reported as `MalformedDump`.

pub mod marcxml;
pub mod pids;
pub mod record;

use crate::error::{MigrateError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use marcxml::SchemaVersion;
pub use pids::{FetchedPid, PidFetcher};
pub use record::{DumpOptions, RecordDump};

/// Which representation of a revision is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Marcxml,
    Json,
}

impl std::str::FromStr for SourceType {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "marcxml" => Ok(SourceType::Marcxml),
            "json" => Ok(SourceType::Json),
            other => Err(MigrateError::Config(format!("unknown source type: {}", other))),
        }
    }
}

/// One legacy record with its edit history and files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub recid: i64,
    #[serde(default)]
    pub record: Vec<RevisionInput>,
    #[serde(default)]
    pub files: Vec<FileVersionInput>,
    #[serde(default)]
    pub collections: Option<Vec<String>>,
}

/// A single revision, oldest first in the dump
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionInput {
    pub modification_datetime: String,
    #[serde(default)]
    pub marcxml: Option<String>,
    #[serde(default)]
    pub json: Option<Value>,
}

/// A single version of a legacy file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersionInput {
    /// Logical filename; grouping key for versions
    #[serde(default)]
    pub full_name: Option<String>,
    pub version: i64,
    /// Hex MD5 digest as recorded by the legacy system
    pub checksum: String,
    pub size: i64,
    /// Location the content can be read from
    pub full_path: String,
    #[serde(default)]
    pub creation_date: Option<String>,
}

impl MigrationRecord {
    /// Parse one dump item, reporting structural problems as `MalformedDump`.
    pub fn from_value(value: Value) -> Result<Self> {
        let recid = value.get("recid").cloned();
        match &recid {
            None | Some(Value::Null) => {
                return Err(MigrateError::malformed("record dump has no recid"));
            }
            Some(v) if recid_from_value(v).is_none() => {
                return Err(MigrateError::malformed(format!("invalid recid: {}", v)));
            }
            _ => {}
        }

        let mut value = value;
        // Legacy dumps sometimes carry the recid as a string.
        if let (Some(obj), Some(id)) = (value.as_object_mut(), recid.as_ref().and_then(recid_from_value)) {
            obj.insert("recid".to_string(), Value::from(id));
        }

        serde_json::from_value(value).map_err(|e| {
            let id = recid.map(|v| v.to_string()).unwrap_or_default();
            MigrateError::malformed(format!("record {}: {}", id, e))
        })
    }
}

/// Accept integer recids and their decimal string form.
pub fn recid_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(MigrateError::malformed(format!("invalid timestamp: {:?}", value)))
}

/// Like `parse_timestamp`, but empty input means "no timestamp".
pub fn parse_timestamp_opt(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => parse_timestamp(v).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2011, 10, 13, 8, 27, 47).unwrap();
        assert_eq!(parse_timestamp("2011-10-13T08:27:47").unwrap(), expected);
        assert_eq!(parse_timestamp("2011-10-13T08:27:47+00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2011-10-13T10:27:47+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2011-10-13 08:27:47").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2011-10-13").unwrap(),
            Utc.with_ymd_and_hms(2011, 10, 13, 0, 0, 0).unwrap()
        );
        assert!(parse_timestamp("13/10/2011").is_err());
    }

    #[test]
    fn test_parse_timestamp_opt_empty() {
        assert!(parse_timestamp_opt(None).unwrap().is_none());
        assert!(parse_timestamp_opt(Some("")).unwrap().is_none());
        assert!(parse_timestamp_opt(Some("2016-08-25T20:20:18+00:00")).unwrap().is_some());
    }

    #[test]
    fn test_from_value_requires_recid() {
        let err = MigrationRecord::from_value(json!({"record": [], "files": []})).unwrap_err();
        assert!(matches!(err, MigrateError::MalformedDump(_)));

        let err = MigrationRecord::from_value(json!({"recid": "abc"})).unwrap_err();
        assert!(matches!(err, MigrateError::MalformedDump(_)));
    }

    #[test]
    fn test_from_value_string_recid() {
        let rec = MigrationRecord::from_value(json!({"recid": "11782", "record": [], "files": []})).unwrap();
        assert_eq!(rec.recid, 11782);
        assert!(rec.record.is_empty());
    }

    #[test]
    fn test_from_value_bad_revision() {
        let err = MigrationRecord::from_value(json!({
            "recid": 1,
            "record": [{"json": {"title": "x"}}],
        }))
        .unwrap_err();
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn test_source_type_from_str() {
        assert_eq!("JSON".parse::<SourceType>().unwrap(), SourceType::Json);
        assert_eq!("marcxml".parse::<SourceType>().unwrap(), SourceType::Marcxml);
        assert!("xml".parse::<SourceType>().is_err());
    }
}
