//! DataCite metadata for discovered datasets.
//!
//! The DataCite search API returns one document per registered DOI with the
//! full metadata XML base64-encoded. Datasets are recognised by an
//! `AlternativeTitle` of the form `<prefix> <dataset name>`.

use crate::fetch::{Fetcher, fetch_text};
use crate::pipeline::{Flow, Node, RunContext};
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use quarry_core::Record;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?[Tt]itle(?:\s[^>]*)?>([^<]*)<").expect("valid title regex"));

/// What is known about one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub doi: Option<String>,
    pub title: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    response: SearchDocs,
}

#[derive(Deserialize)]
struct SearchDocs {
    docs: Vec<SearchDoc>,
}

#[derive(Deserialize)]
struct SearchDoc {
    #[serde(default)]
    doi: Option<String>,
    xml: String,
}

/// Parse a DataCite search response into per-dataset metadata, keyed by
/// dataset name in response order.
///
/// Documents that cannot be decoded or carry no matching alternative title
/// are logged and skipped. When two documents name the same dataset the
/// first one is kept.
pub fn parse_datacite_response(json: &str, prefix: &str) -> Result<IndexMap<String, DatasetMetadata>> {
    let response: SearchResponse = serde_json::from_str(json)?;
    let alternative = Regex::new(&format!(
        r"AlternativeTitle.?>{} ([^<]*)<",
        regex::escape(prefix)
    ))?;

    let mut datasets = IndexMap::new();
    for (i, doc) in response.response.docs.iter().enumerate() {
        let encoded: String = doc.xml.chars().filter(|c| !c.is_whitespace()).collect();
        let xml = match STANDARD.decode(encoded.as_bytes()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::warn!(doc = i, doi = ?doc.doi, "Skipping undecodable metadata: {}", e);
                continue;
            }
        };
        let Some(name) = alternative
            .captures(&xml)
            .map(|caps| caps[1].trim().to_string())
        else {
            tracing::warn!(doc = i, doi = ?doc.doi, "Failed to determine AlternativeTitle");
            continue;
        };
        if datasets.contains_key(&name) {
            tracing::warn!(dataset = %name, "Metadata for dataset already collected, keeping the first");
            continue;
        }
        let title = TITLE
            .captures_iter(&xml)
            .map(|caps| caps[1].trim().to_string())
            .find(|t| !t.is_empty() && !t.starts_with(prefix));
        datasets.insert(
            name,
            DatasetMetadata {
                doi: doc.doi.clone(),
                title,
            },
        );
    }
    tracing::debug!(datasets = datasets.len(), "Parsed DataCite metadata");
    Ok(datasets)
}

/// Adds `doi` and `title` to discovery records.
///
/// The metadata is fetched once, on the first record. Records whose dataset
/// has no metadata are logged and dropped.
pub struct AttachMetadata {
    url: String,
    prefix: String,
    field: String,
    fetcher: Arc<dyn Fetcher>,
    max_age: Option<Duration>,
    metadata: OnceCell<IndexMap<String, DatasetMetadata>>,
}

pub fn attach_metadata(url: &str, prefix: &str, fetcher: Arc<dyn Fetcher>) -> AttachMetadata {
    AttachMetadata {
        url: url.to_string(),
        prefix: prefix.to_string(),
        field: "dataset".to_string(),
        fetcher,
        max_age: None,
        metadata: OnceCell::new(),
    }
}

impl AttachMetadata {
    /// Record field holding the dataset name.
    pub fn field(mut self, field: &str) -> Self {
        self.field = field.to_string();
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    fn metadata(&self) -> Result<&IndexMap<String, DatasetMetadata>> {
        self.metadata.get_or_try_init(|| {
            let body = fetch_text(self.fetcher.as_ref(), &self.url, self.max_age)?;
            parse_datacite_response(&body, &self.prefix).map_err(|e| match e {
                Error::Json(e) => Error::Metadata(format!("{}: {}", self.url, e)),
                other => other,
            })
        })
    }
}

impl Node for AttachMetadata {
    fn name(&self) -> &str {
        "attach_metadata"
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, mut record: Record) -> Result<Flow<'a>> {
        let dataset = record.require_str(&self.field)?.to_string();
        let Some(meta) = self.metadata()?.get(&dataset) else {
            tracing::warn!(dataset = %dataset, "No metadata found for dataset, skipping");
            return Ok(Flow::none());
        };
        if let Some(doi) = &meta.doi {
            record.insert("doi", doi.as_str());
        }
        if let Some(title) = &meta.title {
            record.insert("title", title.as_str());
        }
        Ok(Flow::one(record))
    }
}
