//! Enumerating files from a published checksum manifest.

use crate::pipeline::{Flow, Node, RunContext};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use quarry_core::Record;
use regex::Regex;
use url::Url;

static LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]+)\s+\*?(.+?)\s*$").expect("valid checksum line pattern")
});

/// Digest algorithms the pipeline knows how to verify.
pub const KNOWN_DIGESTS: &[&str] = &["md5", "sha256"];

/// Turns a checksum manifest (`<hash>  <path>` per line, as written by
/// `md5sum`/`sha256sum`) into one record per listed file.
///
/// The manifest body is read from `response` and listed paths are resolved
/// against the manifest's `url`. Each record carries `url`, `path` (the
/// directory part, possibly empty), `filename`, `digest` and `checksum`.
pub struct ParseChecksums {
    digest: Option<String>,
}

/// Build a [`ParseChecksums`] node. With no digest the algorithm is taken from
/// the manifest URL's extension (`checksums.md5` gives `md5`).
pub fn parse_checksums(digest: Option<&str>) -> ParseChecksums {
    ParseChecksums {
        digest: digest.map(str::to_ascii_lowercase),
    }
}

impl ParseChecksums {
    fn digest_for(&self, manifest_url: &Url) -> Result<String> {
        if let Some(digest) = &self.digest {
            return Ok(digest.clone());
        }
        manifest_url
            .path()
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| KNOWN_DIGESTS.contains(&ext.as_str()))
            .ok_or_else(|| {
                Error::config(format!(
                    "cannot infer checksum algorithm from {}; pass a digest explicitly",
                    manifest_url
                ))
            })
    }

    /// Parse a whole manifest body.
    pub fn parse(&self, record: &Record) -> Result<Vec<Record>> {
        let body = record.require_str("response")?;
        let manifest_url = Url::parse(record.require_str("url")?)?;
        let digest = self.digest_for(&manifest_url)?;

        let mut template = record.clone();
        template.remove("response");

        let mut out = Vec::new();
        for (lineno, line) in body.lines().enumerate() {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let Some(caps) = LINE.captures(line) else {
                tracing::warn!(
                    manifest = %manifest_url,
                    line = lineno + 1,
                    "Skipping malformed checksum line: {:?}",
                    line
                );
                continue;
            };
            let checksum = caps[1].to_ascii_lowercase();
            let listed = caps[2].trim_start_matches("./");

            let url = match manifest_url.join(listed) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(manifest = %manifest_url, path = %listed, error = %e, "Skipping unresolvable entry");
                    continue;
                }
            };
            let (dir, filename) = listed.rsplit_once('/').unwrap_or(("", listed));

            out.push(
                template
                    .clone()
                    .with("url", url.to_string())
                    .with("path", dir)
                    .with("filename", filename)
                    .with("digest", digest.as_str())
                    .with("checksum", checksum),
            );
        }
        tracing::debug!(manifest = %manifest_url, entries = out.len(), "Parsed checksum manifest");
        Ok(out)
    }
}

impl Node for ParseChecksums {
    fn name(&self) -> &str {
        "parse_checksums"
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        Ok(Flow::from_vec(self.parse(&record)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
d41d8cd98f00b204e9800998ecf8427e  crcns_pvc1.tgz
0CC175B9C0F1B6A831C399E269772661 *docs/readme.txt
garbage line without hash

900150983cd24fb0d6963f7d28e17f72  ./filelist.txt
";

    fn manifest() -> Record {
        Record::new()
            .with("url", "https://portal.example.org/download/pvc-1/checksums.md5")
            .with("response", MANIFEST)
            .with("dataset", "pvc-1")
    }

    #[test]
    fn test_parse_manifest() {
        let records = parse_checksums(Some("md5")).parse(&manifest()).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].get_str("filename"), Some("crcns_pvc1.tgz"));
        assert_eq!(records[0].get_str("path"), Some(""));
        assert_eq!(
            records[0].get_str("url"),
            Some("https://portal.example.org/download/pvc-1/crcns_pvc1.tgz")
        );
        assert_eq!(records[0].get_str("checksum"), Some("d41d8cd98f00b204e9800998ecf8427e"));
        assert_eq!(records[0].get_str("dataset"), Some("pvc-1"));
        assert!(!records[0].contains("response"));

        assert_eq!(records[1].get_str("path"), Some("docs"));
        assert_eq!(records[1].get_str("filename"), Some("readme.txt"));
        assert_eq!(records[1].get_str("checksum"), Some("0cc175b9c0f1b6a831c399e269772661"));
        assert_eq!(records[2].get_str("filename"), Some("filelist.txt"));
    }

    #[test]
    fn test_digest_inferred_from_extension() {
        let records = parse_checksums(None).parse(&manifest()).unwrap();
        assert!(records.iter().all(|r| r.get_str("digest") == Some("md5")));
    }

    #[test]
    fn test_unknown_extension_is_config_error() {
        let record = manifest().with("url", "http://h/SUMS");
        assert!(matches!(
            parse_checksums(None).parse(&record),
            Err(Error::Config(_))
        ));
    }
}
