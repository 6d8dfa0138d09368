//! Adapter between pipeline records and the content store.
//!
//! [`Annexificator`] owns the store for the duration of a run and hands out
//! the nodes that drive the staged ingestion protocol:
//!
//! ```text
//! switch incoming ─► capture ─► switch incoming-processed ─► merge incoming
//!   ─► find archives ─► expand ─► switch master ─► merge incoming-processed
//!   ─► finalize
//! ```
//!
//! Every node takes the store lock only while it runs, so nodes can be freely
//! interleaved within one single-threaded pipeline.

mod archive;
mod capture;
mod extract;
mod status;

pub use archive::{AddArchiveContent, ArchiveOptions, Collision};
pub use capture::Capture;
pub use extract::{ArchiveFormat, extract, leading_directory};
pub use status::StatusDb;

use crate::fetch::Fetcher;
use crate::pipeline::{Flow, Node, Pipeline, RunContext};
use crate::{Error, Result};
use metrics::counter;
use parking_lot::Mutex;
use quarry_core::Record;
use quarry_store::{ContentStore, MergeOptions};
use regex::Regex;
use std::sync::Arc;

/// Behaviour of the capture node.
#[derive(Debug, Clone)]
pub struct AnnexConfig {
    /// Log and skip records whose download or verification fails instead of
    /// aborting the run.
    pub continue_on_error: bool,
    /// Consult the remote status (size, mtime, ETag) to skip unchanged files.
    pub use_statusdb: bool,
}

impl Default for AnnexConfig {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            use_statusdb: true,
        }
    }
}

/// Hands out store-mutating nodes that share one store and status db.
pub struct Annexificator<S> {
    store: Arc<Mutex<S>>,
    statusdb: Arc<Mutex<StatusDb>>,
    fetcher: Arc<dyn Fetcher>,
    config: AnnexConfig,
}

impl<S: ContentStore + 'static> Annexificator<S> {
    pub fn new(store: S, fetcher: Arc<dyn Fetcher>, config: AnnexConfig) -> Result<Self> {
        let statusdb = StatusDb::load(StatusDb::location(store.root()))?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            statusdb: Arc::new(Mutex::new(statusdb)),
            fetcher,
            config,
        })
    }

    /// Shared handle to the store.
    pub fn store(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.store)
    }

    /// Node that commits pending changes and makes `name` the active branch.
    pub fn switch_branch(&self, name: &str, parent: Option<&str>) -> SwitchBranch<S> {
        SwitchBranch {
            label: format!("switch_branch({name})"),
            store: self.store(),
            branch: name.to_string(),
            parent: parent.map(str::to_string),
            discard_pending: false,
        }
    }

    /// Wrap `inner` so that a failure discards whatever it staged before the
    /// error is passed on. The branch stays at its last commit.
    pub fn rollback_on_error(&self, inner: Pipeline) -> RollbackOnError<S> {
        RollbackOnError {
            store: self.store(),
            inner,
        }
    }

    /// Node that merges `name` into the active branch. By default it stops
    /// the enclosing pipeline when the merge brings in nothing new.
    pub fn merge_branch(&self, name: &str, options: MergeOptions) -> MergeBranch<S> {
        MergeBranch {
            label: format!("merge_branch({name})"),
            store: self.store(),
            branch: name.to_string(),
            options,
            skip_no_changes: true,
        }
    }

    /// Node that downloads each record's `url` into the active branch.
    pub fn capture(&self) -> Capture<S> {
        Capture::new(
            self.store(),
            Arc::clone(&self.statusdb),
            Arc::clone(&self.fetcher),
            self.config.clone(),
        )
    }

    /// Node that emits `{path, filename}` for tracked files matching `pattern`.
    pub fn find_files(&self, pattern: &str, fail_if_none: bool) -> Result<FindFiles<S>> {
        Ok(FindFiles {
            store: self.store(),
            pattern: Regex::new(pattern)?,
            fail_if_none,
        })
    }

    /// Node that expands the archive named by `{path, filename}`.
    pub fn add_archive_content(&self, options: ArchiveOptions) -> Result<AddArchiveContent<S>> {
        AddArchiveContent::new(self.store(), options)
    }

    /// Node that commits whatever is pending and tidies up scratch state.
    pub fn finalize(&self, cleanup: bool) -> Finalize<S> {
        Finalize {
            store: self.store(),
            statusdb: Arc::clone(&self.statusdb),
            cleanup,
        }
    }
}

fn commit_pending<S: ContentStore>(store: &mut S, message: &str) -> Result<()> {
    if store.is_dirty() {
        store.commit(message)?;
    }
    Ok(())
}

/// See [`Annexificator::switch_branch`].
pub struct SwitchBranch<S> {
    label: String,
    store: Arc<Mutex<S>>,
    branch: String,
    parent: Option<String>,
    discard_pending: bool,
}

impl<S> SwitchBranch<S> {
    /// Throw away uncommitted changes instead of committing them. Used at the
    /// start of a run, where anything pending was left by an interrupted one.
    pub fn discard_pending(mut self) -> Self {
        self.discard_pending = true;
        self
    }
}

impl<S: ContentStore> Node for SwitchBranch<S> {
    fn name(&self) -> &str {
        &self.label
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let mut store = self.store.lock();
        let active = store.active_branch().to_string();
        if self.discard_pending {
            if store.reset()? {
                tracing::warn!(branch = %active, "Dropped changes left by an interrupted run");
            }
        } else {
            commit_pending(
                &mut *store,
                &format!("Changes on {} before switching to {}", active, self.branch),
            )?;
        }
        store.switch_branch(&self.branch, self.parent.as_deref())?;
        Ok(Flow::one(record))
    }
}

/// See [`Annexificator::rollback_on_error`].
pub struct RollbackOnError<S> {
    store: Arc<Mutex<S>>,
    inner: Pipeline,
}

impl<S: ContentStore> Node for RollbackOnError<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    // A nested pipeline runs to completion inside `process`, so every error
    // it can raise surfaces here.
    fn process<'a>(&'a self, ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let err = match self.inner.process(ctx, record) {
            Ok(flow) => return Ok(flow),
            Err(err) => err,
        };
        let mut store = self.store.lock();
        match store.reset() {
            Ok(true) => tracing::warn!(
                stage = %self.inner.name(),
                branch = %store.active_branch(),
                error = %err,
                "Stage failed, discarded its uncommitted changes"
            ),
            Ok(false) => {}
            Err(reset_err) => tracing::error!(
                stage = %self.inner.name(),
                error = %reset_err,
                "Failed to discard changes after stage error"
            ),
        }
        Err(err)
    }
}

/// See [`Annexificator::merge_branch`].
pub struct MergeBranch<S> {
    label: String,
    store: Arc<Mutex<S>>,
    branch: String,
    options: MergeOptions,
    skip_no_changes: bool,
}

impl<S> MergeBranch<S> {
    /// Whether an unchanged merge stops the enclosing pipeline.
    pub fn skip_no_changes(mut self, skip: bool) -> Self {
        self.skip_no_changes = skip;
        self
    }
}

impl<S: ContentStore> Node for MergeBranch<S> {
    fn name(&self) -> &str {
        &self.label
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let mut store = self.store.lock();
        let active = store.active_branch().to_string();
        commit_pending(&mut *store, &format!("Changes on {} before merge", active))?;

        let outcome = store.merge_branch(&self.branch, &self.options)?;
        if outcome.changed {
            counter!("merge_total").increment(1);
            tracing::info!(
                branch = %self.branch,
                into = %active,
                fast_forward = outcome.fast_forward,
                "Merged new content"
            );
            Ok(Flow::one(record))
        } else if self.skip_no_changes {
            tracing::info!(branch = %self.branch, into = %active, "Nothing new to merge, skipping");
            Ok(Flow::Stop)
        } else {
            Ok(Flow::one(record))
        }
    }
}

/// See [`Annexificator::find_files`].
pub struct FindFiles<S> {
    store: Arc<Mutex<S>>,
    pattern: Regex,
    fail_if_none: bool,
}

impl<S: ContentStore> Node for FindFiles<S> {
    fn name(&self) -> &str {
        "find_files"
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let (files, branch) = {
            let store = self.store.lock();
            (
                store.list_files(&self.pattern),
                store.active_branch().to_string(),
            )
        };
        if files.is_empty() && self.fail_if_none {
            return Err(Error::MissingArchives {
                pattern: self.pattern.to_string(),
                branch,
            });
        }
        tracing::debug!(pattern = %self.pattern, count = files.len(), "Found files");

        Ok(Flow::stream(files.into_iter().map(move |file| {
            let (dir, filename) = file.rsplit_once('/').unwrap_or(("", &file));
            Ok(record.clone().with("path", dir).with("filename", filename))
        })))
    }
}

/// See [`Annexificator::finalize`].
pub struct Finalize<S> {
    store: Arc<Mutex<S>>,
    statusdb: Arc<Mutex<StatusDb>>,
    cleanup: bool,
}

impl<S: ContentStore> Node for Finalize<S> {
    fn name(&self) -> &str {
        "finalize"
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let mut store = self.store.lock();
        commit_pending(&mut *store, "Finalize crawl")?;

        if self.cleanup {
            let scratch = store.scratch_dir();
            if scratch.exists() {
                std::fs::remove_dir_all(&scratch)?;
                tracing::debug!(path = %scratch.display(), "Removed scratch directory");
            }
        }
        self.statusdb.lock().save()?;

        for branch in store.branches()? {
            let head = store.head(&branch)?;
            tracing::info!(
                branch = %branch,
                head = head.as_deref().map_or("-", |h| &h[..h.len().min(12)]),
                "Branch state"
            );
        }
        Ok(Flow::one(record))
    }
}

/// Join a directory and a relative path with `/`, tolerating an empty
/// directory.
pub(crate) fn join_rel(dir: &str, rel: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", dir, rel)
    }
}
