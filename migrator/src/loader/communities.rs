//! Community and featured community loading

use crate::db::models::{Community, FeaturedCommunity};
use crate::dump::{parse_timestamp, parse_timestamp_opt};
use crate::error::{MigrateError, Result};
use crate::store::MigrationStore;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One community dump item
#[derive(Debug, Clone, Deserialize)]
pub struct CommunityDump {
    pub id: String,
    pub id_user: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub page: String,
    #[serde(default)]
    pub curation_policy: String,
    #[serde(default)]
    pub last_record_accepted: Option<String>,
    #[serde(default)]
    pub logo_ext: Option<String>,
    #[serde(default)]
    pub ranking: i32,
    #[serde(default)]
    pub fixed_points: i32,
    pub created: String,
    pub last_modified: String,
}

impl CommunityDump {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| MigrateError::malformed(format!("community: {}", e)))
    }
}

/// One featured community dump item
#[derive(Debug, Clone, Deserialize)]
pub struct FeaturedDump {
    pub id: i64,
    pub id_community: String,
    pub start_date: String,
}

impl FeaturedDump {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| MigrateError::malformed(format!("featured community: {}", e)))
    }
}

/// Where community logos are read from and copied to
#[derive(Debug, Clone, Default)]
pub struct LogoOptions {
    /// Directory of legacy logos named `<community id>.<ext>`
    pub logos_dir: Option<PathBuf>,
    /// Destination for accepted logos; `None` skips copying
    pub storage_dir: Option<PathBuf>,
}

/// Normalize a legacy logo extension.
///
/// `None` and `"0"` mean no logo; a leading dot is stripped.
pub fn logo_ext_wash(ext: Option<&str>) -> Option<String> {
    match ext {
        None | Some("0") | Some("") => None,
        Some(ext) => {
            let ext = ext.strip_prefix('.').unwrap_or(ext);
            if ext.is_empty() {
                None
            } else {
                Some(ext.to_string())
            }
        }
    }
}

/// Load one community and copy its logo when one is found.
pub async fn load_community<S>(store: &mut S, dump: &CommunityDump, logos: &LogoOptions) -> Result<Community>
where
    S: MigrationStore + ?Sized,
{
    if store.get_user(dump.id_user).await?.is_none() {
        return Err(MigrateError::ReferencedEntityMissing {
            dependent: format!("community:{}", dump.id),
            missing: format!("user:{}", dump.id_user),
        });
    }

    let logo_ext = logo_ext_wash(dump.logo_ext.as_deref());
    let community = Community {
        id: dump.id.clone(),
        id_user: dump.id_user,
        title: dump.title.clone(),
        description: dump.description.clone(),
        page: dump.page.clone(),
        curation_policy: dump.curation_policy.clone(),
        last_record_accepted: parse_timestamp_opt(dump.last_record_accepted.as_deref())?,
        logo_ext: logo_ext.clone(),
        ranking: dump.ranking,
        fixed_points: dump.fixed_points,
        created: parse_timestamp(&dump.created)?,
        updated: parse_timestamp(&dump.last_modified)?,
    };
    store.insert_community(&community).await?;

    if let (Some(ext), Some(dir)) = (&logo_ext, &logos.logos_dir) {
        copy_logo(&community.id, ext, dir, logos.storage_dir.as_deref()).await?;
    }

    info!(community = %community.id, "community loaded");
    Ok(community)
}

/// Copy `<dir>/<id>.<ext>` into storage if it exists and is an image.
/// Returns the stored path.
async fn copy_logo(id: &str, ext: &str, dir: &Path, storage: Option<&Path>) -> Result<Option<PathBuf>> {
    let source = dir.join(format!("{}.{}", id, ext));
    if !source.is_file() {
        debug!(community = %id, path = %source.display(), "no logo file");
        return Ok(None);
    }

    let is_image = mime_guess::from_path(&source)
        .first()
        .map(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false);
    if !is_image {
        warn!(community = %id, path = %source.display(), "logo is not an image, skipping");
        return Ok(None);
    }

    let Some(storage) = storage else {
        return Ok(None);
    };
    tokio::fs::create_dir_all(storage).await?;
    let target = storage.join(format!("{}.{}", id, ext));
    tokio::fs::copy(&source, &target).await?;
    debug!(community = %id, path = %target.display(), "logo stored");
    Ok(Some(target))
}

/// Load one featured community entry.
pub async fn load_featured<S>(store: &mut S, dump: &FeaturedDump) -> Result<FeaturedCommunity>
where
    S: MigrationStore + ?Sized,
{
    if store.get_community(&dump.id_community).await?.is_none() {
        return Err(MigrateError::ReferencedEntityMissing {
            dependent: format!("featured:{}", dump.id),
            missing: format!("community:{}", dump.id_community),
        });
    }
    let featured = FeaturedCommunity {
        id: dump.id,
        id_community: dump.id_community.clone(),
        start_date: parse_timestamp(&dump.start_date)?,
    };
    store.insert_featured(&featured).await?;
    info!(featured = featured.id, community = %featured.id_community, "featured community loaded");
    Ok(featured)
}
