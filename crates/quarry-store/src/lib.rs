//! Versioned, content-addressed storage for ingested datasets.
//!
//! The ingestion pipeline talks to a [`ContentStore`]: a repository with
//! named branches, commits, three-way merges and content keys derived from a
//! hashing [`Backend`]. [`LocalStore`] keeps everything under a dataset
//! directory, with metadata in SQLite and blobs in `.quarry/objects/`.

mod backend;
mod error;
mod local;
mod schema;
mod store;
mod tree;

pub use backend::Backend;
pub use error::{Error, Result};
pub use local::{LocalStore, METADATA_DIR};
pub use store::{
    AddOptions, AddOutcome, BranchSwitch, CommitId, CommitInfo, CommitMode, ContentStore,
    MergeOptions, MergeOutcome, MergeStrategy, StoreOptions,
};
pub use tree::{Entry, Tree};
