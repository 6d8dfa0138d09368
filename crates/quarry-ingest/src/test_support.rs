//! Shared fixtures for unit tests.

use crate::fetch::{Fetcher, RemoteStatus};
use crate::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Pages {
    bodies: HashMap<String, Vec<u8>>,
    fetches: HashMap<String, usize>,
    max_ages: HashMap<String, Option<Duration>>,
    status_queries: usize,
}

/// In-memory fetcher. Clones share the same pages and counters.
#[derive(Clone, Default)]
pub struct StaticFetcher {
    pages: Arc<Mutex<Pages>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.set_page(url, body);
        self
    }

    pub fn set_page(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.pages.lock().bodies.insert(url.to_string(), body.into());
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.pages.lock().fetches.get(url).copied().unwrap_or(0)
    }

    /// Max age passed with the most recent fetch of `url`.
    pub fn last_max_age(&self, url: &str) -> Option<Duration> {
        self.pages.lock().max_ages.get(url).copied().flatten()
    }

    pub fn total_fetches(&self) -> usize {
        self.pages.lock().fetches.values().sum()
    }

    pub fn status_queries(&self) -> usize {
        self.pages.lock().status_queries
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str, max_age: Option<Duration>) -> Result<Vec<u8>> {
        let mut pages = self.pages.lock();
        *pages.fetches.entry(url.to_string()).or_default() += 1;
        pages.max_ages.insert(url.to_string(), max_age);
        pages.bodies.get(url).cloned().ok_or_else(|| Error::Fetch {
            url: url.to_string(),
            reason: "404 Not Found".to_string(),
        })
    }

    fn status(&self, url: &str) -> Result<Option<RemoteStatus>> {
        let mut pages = self.pages.lock();
        pages.status_queries += 1;
        Ok(pages.bodies.get(url).map(|body| RemoteStatus {
            size: Some(body.len() as u64),
            mtime: None,
            etag: Some(hex::encode(Sha256::digest(body))),
        }))
    }
}

/// Build a gzip-compressed tarball from `(path, content)` pairs.
pub fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Build a zip archive from `(path, content)` pairs.
pub fn zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (path, content) in files {
        writer.start_file(*path, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Hex MD5 of `content`.
pub fn md5_hex(content: &[u8]) -> String {
    hex::encode(md5::Md5::digest(content))
}
