//! Error types for the content store.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while operating on a store.
#[derive(Error, Debug)]
pub enum Error {
    /// The path does not contain a store.
    #[error("no store found at {0}")]
    NotAStore(PathBuf),

    /// A store already exists where one was to be created.
    #[error("a store already exists at {0}")]
    AlreadyExists(PathBuf),

    /// The store was written by a newer schema version.
    #[error("store at {0} uses an unsupported schema version")]
    UnsupportedSchema(PathBuf),

    /// Named branch does not exist.
    #[error("unknown branch '{0}'")]
    UnknownBranch(String),

    /// Operation requires a clean tree but there are uncommitted changes.
    #[error("branch '{0}' has uncommitted changes")]
    DirtyTree(String),

    /// Merge refused because the branches share no history.
    #[error("refusing to merge unrelated histories of '{theirs}' into '{ours}'")]
    UnrelatedHistories {
        /// The branch being merged into.
        ours: String,
        /// The branch being merged.
        theirs: String,
    },

    /// Three-way merge hit conflicting changes and no bias was requested.
    #[error("merge of '{branch}' conflicts on {} path(s): {}", paths.len(), paths.join(", "))]
    MergeConflict {
        /// The branch being merged.
        branch: String,
        /// Conflicting paths.
        paths: Vec<String>,
    },

    /// A path is absolute, escapes the store or targets store metadata.
    #[error("invalid store path '{0}'")]
    InvalidPath(String),

    /// A tree references content that is missing from the object directory.
    #[error("missing object for key {0}")]
    MissingObject(String),

    /// Unknown backend name in configuration.
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Invalid largefiles pattern.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Tree (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_conflict_display() {
        let err = Error::MergeConflict {
            branch: "incoming".to_string(),
            paths: vec!["a.txt".to_string(), "b/c.txt".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 path(s)"));
        assert!(msg.contains("a.txt, b/c.txt"));
    }

    #[test]
    fn test_unrelated_histories_display() {
        let err = Error::UnrelatedHistories {
            ours: "master".to_string(),
            theirs: "incoming-processed".to_string(),
        };
        assert!(err.to_string().contains("unrelated histories"));
    }
}
