//! The content store interface consumed by the ingestion pipeline.

use crate::backend::Backend;
use crate::error::Result;
use crate::tree::Entry;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Hex commit identifier.
pub type CommitId = String;

/// Options fixed when a store is created.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Backend used to key added content.
    pub backend: Backend,
    /// Path patterns (searched, not anchored) for files that are kept as
    /// plain entries instead of being annexed.
    pub largefiles_exclude: Vec<String>,
}

/// How conflicting changes are resolved during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Three-way merge; conflicting paths abort the merge.
    #[default]
    Recursive,
    /// Keep the current tree, only record the merged history.
    Ours,
    /// Take the merged branch's tree as the result.
    Theirs,
}

/// Whether a successful merge is recorded right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Fast-forward when possible, otherwise commit the merge.
    #[default]
    Auto,
    /// Stage the merged tree without moving the branch head, even when a
    /// fast-forward is possible. The next `commit` records the merged
    /// branch as a parent; `reset` abandons the merge.
    Manual,
}

/// Options for [`ContentStore::merge_branch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    pub strategy: MergeStrategy,
    pub commit: CommitMode,
    /// Permit merging branches without a common ancestor.
    pub allow_unrelated: bool,
}

/// Result of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// New history was brought into the current branch.
    pub changed: bool,
    /// The current branch pointer was simply advanced (auto commit only).
    pub fast_forward: bool,
    /// Paths whose conflicting changes were settled by the strategy.
    pub conflicts_resolved: usize,
}

/// Options for adding content.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Source URL recorded for the content key.
    pub url: Option<String>,
    /// Store as a plain entry regardless of the largefiles rules.
    pub force_git: bool,
}

/// Result of adding content under a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    pub key: String,
    /// The staged entry for the path differs from what was there before.
    pub changed: bool,
    pub annexed: bool,
}

/// Result of switching branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSwitch {
    /// The branch did not exist and was created.
    pub created: bool,
    /// Branch that was active before the switch.
    pub previous: String,
}

/// A commit as reported by [`ContentStore::log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub message: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

/// A versioned, content-addressed repository with branches and merges.
///
/// Paths are relative and `/`-separated. Mutating operations act on the
/// active branch's staged tree; nothing becomes history until
/// [`commit`](Self::commit) (or an auto-committed merge).
pub trait ContentStore {
    /// Create a new store at `path` (the directory may already exist).
    fn create(path: &Path, options: StoreOptions) -> Result<Self>
    where
        Self: Sized;

    /// Open an existing store.
    fn open(path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Check whether `path` holds a store.
    fn is_store(path: &Path) -> bool
    where
        Self: Sized;

    fn root(&self) -> &Path;

    fn active_branch(&self) -> &str;

    fn branches(&self) -> Result<Vec<String>>;

    /// Head commit of `branch`, `None` while the branch has no commits.
    fn head(&self, branch: &str) -> Result<Option<CommitId>>;

    /// Make `name` the active branch, creating it when missing.
    ///
    /// A created branch starts at `parent`'s head, or as an orphan with an
    /// empty tree when no parent is given. Fails with `DirtyTree` if the
    /// active branch has uncommitted changes.
    fn switch_branch(&mut self, name: &str, parent: Option<&str>) -> Result<BranchSwitch>;

    /// Merge branch `name` into the active branch.
    fn merge_branch(&mut self, name: &str, options: &MergeOptions) -> Result<MergeOutcome>;

    fn add_bytes(&mut self, path: &str, content: &[u8], options: &AddOptions)
    -> Result<AddOutcome>;

    /// Add the file at `source` (which may be the working copy of `path`).
    fn add_file(&mut self, path: &str, source: &Path, options: &AddOptions) -> Result<AddOutcome>;

    /// Stop tracking `path` and delete its working copy. Returns whether it
    /// was tracked.
    fn remove_file(&mut self, path: &str) -> Result<bool>;

    fn entry(&self, path: &str) -> Option<Entry>;

    /// Key the file at `source` would get if added under a path named
    /// `filename`.
    fn content_key(&self, source: &Path, filename: &str) -> Result<String>;

    /// Tracked paths matching `pattern`, sorted.
    fn list_files(&self, pattern: &Regex) -> Vec<String>;

    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    fn register_url(&mut self, key: &str, url: &str) -> Result<()>;

    fn urls(&self, key: &str) -> Result<Vec<String>>;

    /// Staged changes or a pending merge exist.
    fn is_dirty(&self) -> bool;

    /// Record the staged tree on the active branch. Returns `None` when
    /// nothing changed and no merge is pending.
    fn commit(&mut self, message: &str) -> Result<Option<CommitId>>;

    /// Throw away staged changes and any pending merge, restoring the
    /// working tree to the active branch's head. Returns whether anything
    /// was discarded.
    fn reset(&mut self) -> Result<bool>;

    /// Commits reachable from `branch`, newest first.
    fn log(&self, branch: &str) -> Result<Vec<CommitInfo>>;

    fn set_config(&mut self, key: &str, value: &str) -> Result<()>;

    fn config(&self, key: &str) -> Result<Option<String>>;

    /// Directory for transient working state, safe to delete between runs.
    fn scratch_dir(&self) -> PathBuf;
}
