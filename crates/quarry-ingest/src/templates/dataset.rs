//! Staged ingestion pipeline for a single dataset.
//!
//! ```text
//! switch incoming (dropping anything an interrupted run left staged)
//! [ enumerate files (manifest or page links) -> rename -> capture ]
//! switch incoming-processed
//! [ merge incoming (theirs, no commit) -> stop if unchanged
//!   [ find archives -> expand archives ] ]
//! switch master
//! merge incoming-processed
//! finalize
//! ```
//!
//! A failure inside either bracketed stage discards what that stage staged,
//! so the staging branches only ever hold fully processed commits.

use crate::annex::{Annexificator, ArchiveOptions, Collision};
use crate::fetch::Fetcher;
use crate::nodes::{a_href_match, crawl_url, parse_checksums, skip_if, sub};
use crate::pipeline::Pipeline;
use crate::{Error, Result};
use indexmap::IndexMap;
use quarry_core::{
    BRANCH_INCOMING, BRANCH_INCOMING_PROCESSED, BRANCH_MASTER, Record, interpolate,
    parse_rename_rules,
};
use quarry_store::{CommitMode, ContentStore, MergeOptions, MergeStrategy};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

pub const TEMPLATE_NAME: &str = "dataset";

/// Tracked files that are expanded during normalization.
pub const ARCHIVE_PATTERN: &str = r"\.(zip|tgz|tar(\..+)?)$";

/// Listed files that describe the download rather than being part of it.
const MANIFEST_FILES: &str = r"(checksums\.md5|filelist\.txt)$";

/// Links on the dataset page that point at archives.
const ARCHIVE_LINKS: &str = r".*/.*\.(tgz|tar.*|zip)";

/// Archive members that are never added.
const JUNK: &str = ".*__MACOSX.*";

const DEFAULT_DATASET_URL: &str = "http://crcns.org/data-sets/%(dataset_category)s/%(dataset)s";
const DEFAULT_CHECKSUMS_URL: &str =
    "https://portal.nersc.gov/project/crcns/download/%(dataset)s/checksums.md5";

/// Pages and manifests fetched within this window are served from cache.
const DEFAULT_MAX_AGE_SECS: u64 = 60 * 60;

const KNOWN_ARGS: &[&str] = &[
    "dataset",
    "dataset_category",
    "data_origin",
    "tarballs",
    "use_current_dir",
    "leading_dirs_depth",
    "rename",
    "dataset_url",
    "checksums_url",
    "max_age_secs",
];

/// Accepted for compatibility with older crawl configurations, no effect.
const IGNORED_ARGS: &[&str] = &["versioned_urls"];

/// How the files of a dataset are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataOrigin {
    /// From the published `checksums.md5` manifest.
    #[default]
    Checksums,
    /// From archive links on the dataset page.
    Urls,
}

/// Arguments of the dataset template.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetPipelineConfig {
    pub dataset: String,
    pub dataset_category: String,
    pub data_origin: DataOrigin,
    /// At least one archive must be present after capture.
    pub tarballs: bool,
    pub use_current_dir: bool,
    pub leading_dirs_depth: usize,
    /// Applied to captured file names and to extracted paths.
    pub rename: IndexMap<String, String>,
    pub dataset_url: String,
    pub checksums_url: String,
    /// Age threshold for cached pages and manifests; `None` always fetches.
    pub max_age: Option<Duration>,
}

impl DatasetPipelineConfig {
    /// Validate the flat keyword arguments from a crawl configuration.
    ///
    /// Values may be given as TOML scalars or as strings (`"2"`, `"false"`).
    pub fn from_args(args: &toml::Table) -> Result<Self> {
        for key in args.keys() {
            if IGNORED_ARGS.contains(&key.as_str()) {
                tracing::debug!(argument = %key, "Ignoring unused template argument");
            } else if !KNOWN_ARGS.contains(&key.as_str()) {
                return Err(Error::config(format!(
                    "unknown argument '{}' for template '{}'",
                    key, TEMPLATE_NAME
                )));
            }
        }

        let dataset = required_str(args, "dataset")?;
        let dataset_category = required_str(args, "dataset_category")?;
        let data_origin = match optional_str(args, "data_origin")?.as_deref() {
            None | Some("checksums") => DataOrigin::Checksums,
            Some("urls") => DataOrigin::Urls,
            Some(other) => {
                return Err(Error::config(format!(
                    "unknown data_origin '{}' (expected 'checksums' or 'urls')",
                    other
                )));
            }
        };

        let identity = Record::new()
            .with("dataset", dataset.as_str())
            .with("dataset_category", dataset_category.as_str());
        let url_arg = |key: &str, default: &str| -> Result<String> {
            let template = optional_str(args, key)?.unwrap_or_else(|| default.to_string());
            interpolate(&template, &identity).map_err(|e| Error::config(format!("{}: {}", key, e)))
        };

        Ok(Self {
            data_origin,
            tarballs: bool_arg(args, "tarballs", true)?,
            use_current_dir: bool_arg(args, "use_current_dir", false)?,
            leading_dirs_depth: usize_arg(args, "leading_dirs_depth", 2)?,
            rename: rename_arg(args)?,
            dataset_url: url_arg("dataset_url", DEFAULT_DATASET_URL)?,
            checksums_url: url_arg("checksums_url", DEFAULT_CHECKSUMS_URL)?,
            max_age: match usize_arg(args, "max_age_secs", DEFAULT_MAX_AGE_SECS as usize)? {
                0 => None,
                secs => Some(Duration::from_secs(secs as u64)),
            },
            dataset,
            dataset_category,
        })
    }

    fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            existing: Collision::ArchiveSuffix,
            strip_leading_dirs: true,
            leading_dirs_depth: self.leading_dirs_depth,
            leading_dirs_consider: vec!["crcns.*".to_string(), regex::escape(&self.dataset)],
            use_current_dir: self.use_current_dir,
            rename: self.rename.clone(),
            exclude: vec![JUNK.to_string()],
            delete: true,
        }
    }
}

fn optional_str(args: &toml::Table, key: &str) -> Result<Option<String>> {
    match args.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(Error::config(format!(
            "{} must be a string, got {}",
            key,
            other.type_str()
        ))),
    }
}

fn required_str(args: &toml::Table, key: &str) -> Result<String> {
    optional_str(args, key)?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::config(format!("missing required argument '{}'", key)))
}

fn bool_arg(args: &toml::Table, key: &str, default: bool) -> Result<bool> {
    match args.get(key) {
        None => Ok(default),
        Some(toml::Value::Boolean(b)) => Ok(*b),
        Some(toml::Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(Error::config(format!("{} must be a boolean, got '{}'", key, s))),
        },
        Some(other) => Err(Error::config(format!(
            "{} must be a boolean, got {}",
            key,
            other.type_str()
        ))),
    }
}

fn usize_arg(args: &toml::Table, key: &str, default: usize) -> Result<usize> {
    let invalid = |got: String| Error::config(format!("{} must be a non-negative integer, got {}", key, got));
    match args.get(key) {
        None => Ok(default),
        Some(toml::Value::Integer(i)) => usize::try_from(*i).map_err(|_| invalid(i.to_string())),
        Some(toml::Value::String(s)) => s.trim().parse().map_err(|_| invalid(format!("'{}'", s))),
        Some(other) => Err(invalid(other.type_str().to_string())),
    }
}

fn rename_arg(args: &toml::Table) -> Result<IndexMap<String, String>> {
    let rules: Vec<String> = match args.get("rename") {
        None => return Ok(IndexMap::new()),
        Some(toml::Value::String(rule)) => vec![rule.clone()],
        Some(toml::Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::config("rename rules must be strings"))
            })
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(Error::config(format!(
                "rename must be a string or a list of strings, got {}",
                other.type_str()
            )));
        }
    };
    let rules = parse_rename_rules(&rules).map_err(|e| Error::config(e.to_string()))?;
    for pattern in rules.keys() {
        Regex::new(pattern).map_err(|e| Error::config(format!("rename pattern: {}", e)))?;
    }
    Ok(rules)
}

/// Assemble the staged ingestion pipeline for one dataset.
pub fn dataset_pipeline<S: ContentStore + 'static>(
    config: &DatasetPipelineConfig,
    annex: &Annexificator<S>,
    fetcher: Arc<dyn Fetcher>,
) -> Result<Pipeline> {
    tracing::info!(dataset = %config.dataset, origin = ?config.data_origin, "Creating dataset pipeline");

    let seed = match config.data_origin {
        DataOrigin::Checksums => &config.checksums_url,
        DataOrigin::Urls => &config.dataset_url,
    };
    let mut crawl = crawl_url(Some(seed), Arc::clone(&fetcher));
    if let Some(max_age) = config.max_age {
        crawl = crawl.max_age(max_age);
    }

    let mut capture = Pipeline::new("capture").then(crawl);
    capture = match config.data_origin {
        DataOrigin::Checksums => capture
            .then(parse_checksums(Some("md5")))
            .then(skip_if([("url", MANIFEST_FILES)], false)?),
        DataOrigin::Urls => capture.then(a_href_match(ARCHIVE_LINKS)?.min_count(1)),
    };
    if !config.rename.is_empty() {
        let rules = IndexMap::from([("filename".to_string(), config.rename.clone())]);
        capture = capture.then(sub(&rules)?);
    }
    let capture = capture.then(annex.capture());

    let normalize = Pipeline::new("normalize")
        .then(annex.merge_branch(
            BRANCH_INCOMING,
            MergeOptions {
                strategy: MergeStrategy::Theirs,
                commit: CommitMode::Manual,
                allow_unrelated: true,
            },
        ))
        .then(
            Pipeline::new("extract")
                .then(annex.find_files(ARCHIVE_PATTERN, config.tarballs)?)
                .then(annex.add_archive_content(config.archive_options())?),
        );

    let publish = annex
        .merge_branch(
            BRANCH_INCOMING_PROCESSED,
            MergeOptions {
                allow_unrelated: true,
                ..MergeOptions::default()
            },
        )
        .skip_no_changes(false);

    Ok(Pipeline::new(format!("dataset {}", config.dataset))
        .then(annex.switch_branch(BRANCH_INCOMING, None).discard_pending())
        .then(annex.rollback_on_error(capture))
        .then(annex.switch_branch(BRANCH_INCOMING_PROCESSED, None))
        .then(annex.rollback_on_error(normalize))
        .then(annex.switch_branch(BRANCH_MASTER, None))
        .then(publish)
        .then(annex.finalize(true)))
}
