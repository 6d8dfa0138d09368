//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// Record contract or template error.
    #[error(transparent)]
    Core(#[from] quarry_core::Error),

    /// Content store error.
    #[error("store error: {0}")]
    Store(#[from] quarry_store::Error),

    /// Invalid pipeline configuration. Raised before any fetch or store access.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A resource could not be fetched.
    #[error("failed to fetch {url}: {reason}")]
    Fetch {
        /// Requested URL.
        url: String,
        /// Status line or transport error.
        reason: String,
    },

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Archives were required but none were found.
    #[error("no archives matching '{pattern}' found on branch '{branch}'")]
    MissingArchives {
        /// Pattern that found nothing.
        pattern: String,
        /// Branch that was searched.
        branch: String,
    },

    /// A page yielded fewer matches than the matcher requires.
    #[error("{url}: expected at least {expected} match(es) for '{pattern}', got {found}")]
    TooFewMatches {
        url: String,
        pattern: String,
        expected: usize,
        found: usize,
    },

    /// Archive format is not recognised.
    #[error("unsupported archive format: {0}")]
    UnsupportedArchive(String),

    /// Archive could not be read.
    #[error("archive error in {archive}: {reason}")]
    Archive {
        /// Archive path within the store.
        archive: String,
        reason: String,
    },

    /// Downloaded content does not match the published checksum.
    #[error("{digest} mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        digest: String,
        expected: String,
        actual: String,
    },

    /// Dataset already exists and the policy forbids touching it.
    #[error("dataset already exists at {0}")]
    DatasetExists(String),

    /// A naming collision while adding extracted files.
    #[error("{0} already exists and the collision policy is 'fail'")]
    FileExists(String),

    /// Malformed metadata response.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Cache database error.
    #[error("cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    /// Zip reading error.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML writing error.
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Invalid pattern.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Build a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_passes_through() {
        let err: Error = quarry_core::Error::MissingField {
            field: "url".to_string(),
        }
        .into();
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn test_too_few_matches_display() {
        let err = Error::TooFewMatches {
            url: "http://crcns.org/data-sets".to_string(),
            pattern: "/data-sets/.*".to_string(),
            expected: 1,
            found: 0,
        };
        assert_eq!(
            err.to_string(),
            "http://crcns.org/data-sets: expected at least 1 match(es) for '/data-sets/.*', got 0"
        );
    }
}
