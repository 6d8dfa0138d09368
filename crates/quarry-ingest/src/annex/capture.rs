//! Downloading record URLs into the active branch.

use super::status::StatusDb;
use super::{AnnexConfig, join_rel};
use crate::fetch::{Fetcher, RemoteStatus};
use crate::pipeline::{Flow, Node, RunContext};
use crate::{Error, Result};
use md5::Md5;
use metrics::counter;
use parking_lot::Mutex;
use quarry_core::Record;
use quarry_store::{AddOptions, ContentStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Adds the content behind each record's `url` to the store.
///
/// The target path is `<path>/<filename>`; `filename` defaults to the last
/// segment of the URL. Emits the record with `filepath` set to the target,
/// whether or not a download was needed.
pub struct Capture<S> {
    store: Arc<Mutex<S>>,
    statusdb: Arc<Mutex<StatusDb>>,
    fetcher: Arc<dyn Fetcher>,
    config: AnnexConfig,
}

enum Captured {
    Added { changed: bool },
    Unchanged,
}

impl<S: ContentStore> Capture<S> {
    pub(super) fn new(
        store: Arc<Mutex<S>>,
        statusdb: Arc<Mutex<StatusDb>>,
        fetcher: Arc<dyn Fetcher>,
        config: AnnexConfig,
    ) -> Self {
        Self {
            store,
            statusdb,
            fetcher,
            config,
        }
    }

    fn capture(&self, url: &str, target: &str, record: &Record) -> Result<Captured> {
        let expected = expected_checksum(record);

        if let Some((digest, checksum)) = &expected
            && self.existing_matches(target, digest, checksum)?
        {
            return Ok(Captured::Unchanged);
        }

        let status = if self.config.use_statusdb {
            self.fetcher
                .status(url)?
                .filter(RemoteStatus::is_informative)
        } else {
            None
        };
        if let Some(status) = &status
            && self.statusdb.lock().get(target) == Some(status)
            && self.store.lock().entry(target).is_some()
        {
            return Ok(Captured::Unchanged);
        }

        let body = self.fetcher.fetch(url, None)?;
        if let Some((digest, checksum)) = &expected {
            verify(url, &body, digest, checksum)?;
        }

        let outcome = self.store.lock().add_bytes(
            target,
            &body,
            &AddOptions {
                url: Some(url.to_string()),
                force_git: false,
            },
        )?;
        if let Some(status) = status {
            self.statusdb.lock().set(target, status);
        }
        Ok(Captured::Added {
            changed: outcome.changed,
        })
    }

    /// The tracked content at `target` already has the published checksum.
    fn existing_matches(&self, target: &str, digest: &str, checksum: &str) -> Result<bool> {
        let store = self.store.lock();
        if store.entry(target).is_none() {
            return Ok(false);
        }
        let content = store.read_file(target)?;
        Ok(compute(digest, &content)? == checksum)
    }
}

impl<S: ContentStore> Node for Capture<S> {
    fn name(&self) -> &str {
        "capture"
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let url = record.require_str("url")?.to_string();
        let filename = match record.get_str("filename") {
            Some(name) => name.to_string(),
            None => url_basename(&url)?,
        };
        let target = join_rel(record.get_str("path").unwrap_or(""), &filename);

        match self.capture(&url, &target, &record) {
            Ok(Captured::Added { changed }) => {
                if changed {
                    counter!("annex_files_added_total").increment(1);
                    tracing::info!(path = %target, url = %url, "Added file");
                } else {
                    tracing::debug!(path = %target, "Downloaded content is unchanged");
                }
            }
            Ok(Captured::Unchanged) => {
                counter!("annex_downloads_skipped_total").increment(1);
                tracing::debug!(path = %target, "Remote file unchanged, skipping download");
            }
            Err(e) if self.config.continue_on_error && is_record_failure(&e) => {
                counter!("annex_records_failed_total").increment(1);
                tracing::warn!(url = %url, path = %target, "Skipping record: {}", e);
                return Ok(Flow::none());
            }
            Err(e) => return Err(e),
        }
        Ok(Flow::one(record.with("filepath", target)))
    }
}

/// Failures that concern a single payload and leave the run meaningful.
fn is_record_failure(error: &Error) -> bool {
    matches!(
        error,
        Error::Fetch { .. } | Error::Http(_) | Error::ChecksumMismatch { .. }
    )
}

fn expected_checksum(record: &Record) -> Option<(String, String)> {
    let digest = record.get_str("digest")?;
    let checksum = record.get_str("checksum")?;
    Some((digest.to_ascii_lowercase(), checksum.to_ascii_lowercase()))
}

fn compute(digest: &str, content: &[u8]) -> Result<String> {
    match digest {
        "md5" => Ok(hex::encode(Md5::digest(content))),
        "sha256" => Ok(hex::encode(Sha256::digest(content))),
        other => Err(Error::config(format!("unsupported digest '{}'", other))),
    }
}

fn verify(url: &str, content: &[u8], digest: &str, expected: &str) -> Result<()> {
    let actual = compute(digest, content)?;
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            url: url.to_string(),
            digest: digest.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

fn url_basename(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url)?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            quarry_core::Error::MissingField {
                field: "filename".to_string(),
            }
            .into()
        })
}
