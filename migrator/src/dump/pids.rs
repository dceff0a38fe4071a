//! Persistent identifier fetchers
//!
//! A fetcher looks at one metadata document and returns the external
//! identifier it carries, if any.

use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An identifier extracted from record metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchedPid {
    pub pid_type: String,
    pub pid_value: String,
    pub provider: Option<String>,
}

impl FetchedPid {
    pub fn new(pid_type: &str, pid_value: impl Into<String>) -> Self {
        Self {
            pid_type: pid_type.to_string(),
            pid_value: pid_value.into(),
            provider: None,
        }
    }
}

/// `(known record uuid, metadata) -> identifier`
pub type PidFetcher = fn(Option<Uuid>, &Value) -> Option<FetchedPid>;

/// DOI stored in the top-level `doi` field
pub fn doi_fetcher(_record_uuid: Option<Uuid>, data: &Value) -> Option<FetchedPid> {
    let doi = data.get("doi")?.as_str()?.trim();
    if doi.is_empty() {
        return None;
    }
    Some(FetchedPid::new("doi", doi))
}

/// OAI identifier stored under `_oai.id`
pub fn oai_fetcher(_record_uuid: Option<Uuid>, data: &Value) -> Option<FetchedPid> {
    let id = data.get("_oai")?.get("id")?.as_str()?.trim();
    if id.is_empty() {
        return None;
    }
    Some(FetchedPid {
        pid_type: "oai".to_string(),
        pid_value: id.to_string(),
        provider: Some("oai".to_string()),
    })
}

/// Look up a builtin fetcher by its configuration name
pub fn fetcher_by_name(name: &str) -> Option<PidFetcher> {
    match name {
        "doi" => Some(doi_fetcher as PidFetcher),
        "oai" => Some(oai_fetcher as PidFetcher),
        _ => None,
    }
}

/// Parse a comma separated list such as `"doi,oai"`.
pub fn parse_fetchers(list: &str) -> Result<Vec<PidFetcher>> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            fetcher_by_name(name)
                .ok_or_else(|| MigrateError::Config(format!("unknown pid fetcher: {}", name)))
        })
        .collect()
}
