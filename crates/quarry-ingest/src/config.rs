//! On-disk configuration files.
//!
//! - `<dataset>/.quarry/crawl.toml` ([`CrawlConfig`]) names the pipeline
//!   template a dataset is crawled with and its flat keyword arguments.
//! - The collection file passed to `quarry discover` ([`CollectionConfig`])
//!   describes a listing page and how discovered datasets are initialised.

use crate::{Error, Result};
use quarry_store::METADATA_DIR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the per-dataset crawl configuration.
pub const CRAWL_CONFIG_FILE: &str = "crawl.toml";

/// Per-dataset crawl configuration.
///
/// ```toml
/// [crawl]
/// template = "dataset"
///
/// [crawl.args]
/// dataset_category = "vc"
/// dataset = "pvc-1"
/// leading_dirs_depth = "1"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub crawl: CrawlSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Pipeline template name.
    pub template: String,
    /// Keyword arguments for the template.
    #[serde(default)]
    pub args: toml::Table,
}

impl CrawlConfig {
    pub fn new(template: impl Into<String>, args: toml::Table) -> Self {
        Self {
            crawl: CrawlSection {
                template: template.into(),
                args,
            },
        }
    }

    /// Location of the file inside a dataset.
    pub fn location(dataset_root: &Path) -> PathBuf {
        dataset_root.join(METADATA_DIR).join(CRAWL_CONFIG_FILE)
    }

    pub fn load(dataset_root: &Path) -> Result<Self> {
        let path = Self::location(dataset_root);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self, dataset_root: &Path) -> Result<()> {
        let path = Self::location(dataset_root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Discovery configuration for a collection of datasets.
///
/// Every field has a default, so an empty file describes the CRCNS listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionConfig {
    /// Listing page to start from.
    pub url: String,
    /// Links followed from the listing page to category pages.
    pub listing_pattern: String,
    /// Pattern identifying a dataset page. Named groups become record fields
    /// and must include every entry of `data_fields`.
    pub dataset_pattern: String,
    /// Fields that identify a dataset.
    pub data_fields: Vec<String>,
    /// Dataset directory relative to the collection root.
    pub path_template: String,
    /// Template recorded in each new dataset's crawl configuration.
    pub dataset_template: String,
    /// DataCite query returning metadata for the collection's datasets.
    pub metadata_url: Option<String>,
    /// Text preceding the dataset name in the DataCite `AlternativeTitle`.
    pub metadata_prefix: String,
    /// Maximum age of cached listing pages, in seconds.
    pub max_age_secs: u64,
    /// Content backend of new dataset stores (`MD5E` or `SHA256E`).
    pub backend: String,
    /// Paths kept as plain entries in new dataset stores.
    pub largefiles_exclude: Vec<String>,
    /// Extra keyword arguments copied into every dataset's crawl
    /// configuration.
    pub args: toml::Table,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            url: "http://crcns.org/data-sets".to_string(),
            listing_pattern: r".*/data-sets/[^#/]+$".to_string(),
            dataset_pattern:
                r"(?P<url>.*/data-sets/(?P<dataset_category>[^/#]+)/(?P<dataset>[^_/#]+))$"
                    .to_string(),
            data_fields: vec!["dataset_category".to_string(), "dataset".to_string()],
            path_template: "%(dataset)s".to_string(),
            dataset_template: "dataset".to_string(),
            metadata_url: None,
            metadata_prefix: "CRCNS.org".to_string(),
            max_age_secs: 24 * 60 * 60,
            backend: "MD5E".to_string(),
            largefiles_exclude: vec![r"(^|/)README[^/]*$".to_string()],
            args: toml::Table::new(),
        }
    }
}

impl CollectionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_crawl_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut args = toml::Table::new();
        args.insert("dataset".into(), "pvc-1".into());
        args.insert("leading_dirs_depth".into(), 1i64.into());
        let config = CrawlConfig::new("dataset", args);
        config.save(dir.path()).unwrap();

        assert!(dir.path().join(".quarry/crawl.toml").exists());
        assert_eq!(CrawlConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_missing_crawl_config_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = CrawlConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_collection_defaults_and_overrides() {
        let config: CollectionConfig = toml::from_str(
            r#"
            url = "http://example.org/sets"
            [args]
            tarballs = "false"
            "#,
        )
        .unwrap();
        assert_eq!(config.url, "http://example.org/sets");
        assert_eq!(config.data_fields, vec!["dataset_category", "dataset"]);
        assert_eq!(config.args["tarballs"].as_str(), Some("false"));

        assert!(toml::from_str::<CollectionConfig>("bogus = 1").is_err());
    }
}
