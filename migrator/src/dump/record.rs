//! Record dump normalization
//!
//! Turns one raw `MigrationRecord` into the ordered revision list, the
//! per-filename version lists and the extracted identifiers the loader
//! works from. Nothing here touches storage.
//!
//! Known limitation: only identifiers present in the latest revision are
//! extracted.

use super::marcxml::SchemaVersion;
use super::pids::{FetchedPid, PidFetcher};
use super::{parse_timestamp, FileVersionInput, MigrationRecord, RevisionInput, SourceType};
use crate::error::{MigrateError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Collection marker for deleted records
pub const DELETED_COLLECTION: &str = "deleted";

/// How a raw dump is turned into revisions and identifiers
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    pub source_type: SourceType,
    pub schema: SchemaVersion,
    pub latest_only: bool,
    pub pid_fetchers: Vec<PidFetcher>,
}

/// A record dump prepared for loading
#[derive(Debug, Clone)]
pub struct RecordDump {
    pub recid: i64,
    /// `(modification time, metadata)` in dump order
    pub revisions: Vec<(DateTime<Utc>, Value)>,
    /// Timestamp of the earliest revision
    pub created: Option<DateTime<Utc>>,
    /// Versions per logical filename, ascending by version
    pub files: BTreeMap<String, Vec<FileVersionInput>>,
    /// Identifiers extracted from the latest revision
    pub pids: Vec<FetchedPid>,
}

impl RecordDump {
    pub fn prepare(raw: MigrationRecord, options: &DumpOptions) -> Result<Self> {
        let revisions = normalize_revisions(
            &raw.record,
            options.source_type,
            options.schema,
            options.latest_only,
        )
        .map_err(|e| with_recid(raw.recid, e))?;
        let files = normalize_files(&raw.files).map_err(|e| with_recid(raw.recid, e))?;

        let pids = match revisions.last() {
            Some((_, latest)) => extract_pids(latest, &options.pid_fetchers),
            None => Vec::new(),
        };
        let created = revisions.first().map(|(ts, _)| *ts);

        Ok(Self {
            recid: raw.recid,
            revisions,
            created,
            files,
            pids,
        })
    }

    /// Parse and prepare a dump item in one step.
    pub fn from_value(value: Value, options: &DumpOptions) -> Result<Self> {
        Self::prepare(MigrationRecord::from_value(value)?, options)
    }

    /// Metadata of the most recent revision
    pub fn latest(&self) -> Option<&Value> {
        self.revisions.last().map(|(_, data)| data)
    }

    /// A dump without revisions only reserves its recid.
    pub fn is_reservation(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Whether the latest revision marks the record deleted
    pub fn is_deleted(&self) -> bool {
        self.latest().map(is_deleted).unwrap_or(false)
    }
}

fn with_recid(recid: i64, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::MalformedDump(msg) => MigrateError::MalformedDump(format!("record {}: {}", recid, msg)),
        other => other,
    }
}

/// Parse revisions into `(timestamp, metadata)`, preserving input order.
///
/// With `latest_only` only the first raw revision is processed.
pub fn normalize_revisions(
    raw: &[RevisionInput],
    source_type: SourceType,
    schema: SchemaVersion,
    latest_only: bool,
) -> Result<Vec<(DateTime<Utc>, Value)>> {
    let selected = if latest_only { &raw[..raw.len().min(1)] } else { raw };

    selected
        .iter()
        .map(|revision| {
            let ts = parse_timestamp(&revision.modification_datetime)?;
            let data = match source_type {
                SourceType::Json => match &revision.json {
                    Some(Value::Null) | None => {
                        return Err(MigrateError::malformed(format!(
                            "revision {} has no json",
                            revision.modification_datetime
                        )));
                    }
                    Some(json) => json.clone(),
                },
                SourceType::Marcxml => {
                    let xml = revision.marcxml.as_deref().ok_or_else(|| {
                        MigrateError::malformed(format!(
                            "revision {} has no marcxml",
                            revision.modification_datetime
                        ))
                    })?;
                    schema.transform(xml)?
                }
            };
            Ok((ts, data))
        })
        .collect()
}

/// Group file versions by `full_name`, each group ascending by `version`.
pub fn normalize_files(raw: &[FileVersionInput]) -> Result<BTreeMap<String, Vec<FileVersionInput>>> {
    let mut files: BTreeMap<String, Vec<FileVersionInput>> = BTreeMap::new();
    for file in raw {
        let key = file.full_name.clone().ok_or_else(|| {
            MigrateError::malformed(format!("file version {} of {} has no full_name", file.version, file.full_path))
        })?;
        files.entry(key).or_default().push(file.clone());
    }
    for versions in files.values_mut() {
        versions.sort_by_key(|f| f.version);
    }
    Ok(files)
}

/// Apply every fetcher to `metadata`, dropping misses and duplicates.
pub fn extract_pids(metadata: &Value, fetchers: &[PidFetcher]) -> Vec<FetchedPid> {
    let mut pids: Vec<FetchedPid> = Vec::new();
    for fetcher in fetchers {
        if let Some(pid) = fetcher(None, metadata) {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

/// True iff the metadata's `collections` contains the deleted marker.
pub fn is_deleted(metadata: &Value) -> bool {
    metadata
        .get("collections")
        .and_then(Value::as_array)
        .map(|cols| cols.iter().any(|c| c.as_str() == Some(DELETED_COLLECTION)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::pids::doi_fetcher;
    use chrono::TimeZone;
    use serde_json::json;

    fn file(name: Option<&str>, version: i64) -> FileVersionInput {
        FileVersionInput {
            full_name: name.map(str::to_string),
            version,
            checksum: format!("{:032x}", version),
            size: version * 10,
            full_path: format!("/legacy/files/g0/{};{}", name.unwrap_or("unknown"), version),
            creation_date: Some("2011-10-13T08:27:47".to_string()),
        }
    }

    fn json_options() -> DumpOptions {
        DumpOptions {
            source_type: SourceType::Json,
            pid_fetchers: vec![doi_fetcher as PidFetcher],
            ..Default::default()
        }
    }

    fn raw_dump() -> Value {
        json!({
            "recid": 11782,
            "record": [
                {"modification_datetime": "2014-10-13T08:27:47", "marcxml": null,
                 "json": {"title": "Old", "doi": "10.5281/zenodo.1"}},
                {"modification_datetime": "2015-10-13T08:27:47", "marcxml": null,
                 "json": {"title": "New", "doi": "10.5281/zenodo.11782"}}
            ],
            "files": [
                {"full_name": "a.pdf", "version": 2, "checksum": "bb", "size": 2,
                 "full_path": "/a;2", "creation_date": "2015-10-13T08:27:47"},
                {"full_name": "a.pdf", "version": 1, "checksum": "aa", "size": 1,
                 "full_path": "/a;1", "creation_date": "2014-10-13T08:27:47"}
            ]
        })
    }

    #[test]
    fn test_prepare_json_dump() {
        let dump = RecordDump::from_value(raw_dump(), &json_options()).unwrap();
        assert_eq!(dump.recid, 11782);
        assert_eq!(dump.revisions.len(), 2);
        assert_eq!(dump.revisions[1].1["title"], "New");
        assert_eq!(dump.created, Some(Utc.with_ymd_and_hms(2014, 10, 13, 8, 27, 47).unwrap()));
        assert_eq!(dump.files["a.pdf"].iter().map(|f| f.version).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_pids_from_latest_revision_only() {
        let dump = RecordDump::from_value(raw_dump(), &json_options()).unwrap();
        assert_eq!(dump.pids, vec![FetchedPid::new("doi", "10.5281/zenodo.11782")]);

        let no_fetchers = DumpOptions {
            source_type: SourceType::Json,
            ..Default::default()
        };
        let dump = RecordDump::from_value(raw_dump(), &no_fetchers).unwrap();
        assert!(dump.pids.is_empty());
    }

    #[test]
    fn test_latest_only_takes_first_raw_revision() {
        let options = DumpOptions {
            latest_only: true,
            ..json_options()
        };
        let dump = RecordDump::from_value(raw_dump(), &options).unwrap();
        assert_eq!(dump.revisions.len(), 1);
        assert_eq!(dump.revisions[0].1["title"], "Old");
    }

    #[test]
    fn test_marcxml_revisions() {
        let value = json!({
            "recid": 3,
            "record": [{
                "modification_datetime": "2011-10-13T08:27:47",
                "marcxml": "<record><controlfield tag=\"001\">3</controlfield><datafield tag=\"245\" ind1=\" \" ind2=\" \"><subfield code=\"a\">Title</subfield></datafield></record>",
                "json": null
            }],
            "files": []
        });
        let dump = RecordDump::from_value(value, &DumpOptions::default()).unwrap();
        assert_eq!(dump.revisions[0].1["title"], "Title");
        assert_eq!(dump.revisions[0].1["recid"], 3);
    }

    #[test]
    fn test_json_source_without_json_is_malformed() {
        let value = json!({
            "recid": 3,
            "record": [{"modification_datetime": "2011-10-13T08:27:47", "marcxml": "<record/>", "json": null}],
        });
        let err = RecordDump::from_value(value, &json_options()).unwrap_err();
        assert!(matches!(err, MigrateError::MalformedDump(ref m) if m.starts_with("record 3")));
    }

    #[test]
    fn test_reservation_dump() {
        let dump = RecordDump::from_value(json!({"recid": 7, "record": [], "files": []}), &json_options()).unwrap();
        assert!(dump.is_reservation());
        assert!(dump.created.is_none());
        assert!(dump.pids.is_empty());
        assert!(!dump.is_deleted());
    }

    #[test]
    fn test_normalize_files_groups_and_sorts() {
        let raw = vec![
            file(Some("b.txt"), 3),
            file(Some("a.pdf"), 2),
            file(Some("b.txt"), 1),
            file(Some("a.pdf"), 1),
            file(Some("b.txt"), 2),
        ];
        let files = normalize_files(&raw).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["a.pdf"].len(), 2);
        assert_eq!(files["b.txt"].len(), 3);
        for versions in files.values() {
            assert!(versions.windows(2).all(|w| w[0].version <= w[1].version));
        }
        assert_eq!(files.values().map(Vec::len).sum::<usize>(), raw.len());
    }

    #[test]
    fn test_normalize_files_missing_name() {
        let raw = vec![file(Some("a.pdf"), 1), file(None, 2)];
        let err = normalize_files(&raw).unwrap_err();
        assert!(matches!(err, MigrateError::MalformedDump(_)));
    }

    #[test]
    fn test_extract_pids_dedupes() {
        let pids = extract_pids(&json!({"doi": "10.1/x"}), &[doi_fetcher as PidFetcher, doi_fetcher]);
        assert_eq!(pids.len(), 1);
    }

    #[test]
    fn test_is_deleted() {
        assert!(is_deleted(&json!({"collections": ["article", "deleted"]})));
        assert!(!is_deleted(&json!({"collections": ["article"]})));
        assert!(!is_deleted(&json!({"title": "x"})));
        assert!(!is_deleted(&json!({"collections": "deleted"})));
    }
}
