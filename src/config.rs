use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::error::ImportError;
use crate::reconcile::DuplicateIndexPolicy;

/// What to do with a filename pattern the table has never seen. Patterns
/// the table knows but marks not-passed are always silent skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnrecognizedPatternPolicy {
    #[default]
    Fail,
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub seqcenter_base_url: String,
    pub lims_base_url: String,
    pub catalog_base_url: String,
    pub ticket_base_url: String,
    pub storage: StorageConfig,
    pub report_path: Utf8PathBuf,
    #[serde(default = "default_recent_days")]
    pub recent_days: i64,
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    #[serde(default)]
    pub duplicate_index_policy: DuplicateIndexPolicy,
    #[serde(default)]
    pub unrecognized_pattern_policy: UnrecognizedPatternPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    Blob { endpoint: String, container: String },
    Server { root: Utf8PathBuf },
}

fn default_recent_days() -> i64 {
    10
}

fn default_upload_concurrency() -> usize {
    4
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Config, ImportError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("fqimport.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(ImportError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ImportError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| ImportError::ConfigParse(err.to_string()))
    }
}
