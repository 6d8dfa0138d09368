//! Filesystem-backed store.
//!
//! Layout under the store root:
//! - `.quarry/store.db` - commits, branches, refs, staged index, URLs, config
//! - `.quarry/objects/<key>` - content blobs
//! - `.quarry/tmp/` - scratch space
//! - everything else is the working tree of the active branch

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::schema;
use crate::store::{
    AddOptions, AddOutcome, BranchSwitch, CommitId, CommitInfo, CommitMode, ContentStore,
    MergeOptions, MergeOutcome, MergeStrategy, StoreOptions,
};
use crate::tree::{Entry, Tree, three_way_merge};

/// Name of the metadata directory inside a store root.
pub const METADATA_DIR: &str = ".quarry";

const DB_FILE: &str = "store.db";
const REF_HEAD: &str = "HEAD";
const REF_MERGE_HEAD: &str = "MERGE_HEAD";
const CONFIG_BACKEND: &str = "store.backend";
const CONFIG_LARGEFILES_EXCLUDE: &str = "store.largefiles-exclude";
const INITIAL_BRANCH: &str = "master";

/// A store rooted at a local directory.
pub struct LocalStore {
    root: PathBuf,
    conn: Connection,
    backend: Backend,
    largefiles_exclude: Vec<Regex>,
    active: String,
    /// Tree of the active branch's head commit.
    head_tree: Tree,
    /// Staged tree (mirrors `index_entries`).
    index: Tree,
    merge_head: Option<CommitId>,
}

impl LocalStore {
    fn open_db(root: &Path) -> Result<Connection> {
        let conn = Connection::open(root.join(METADATA_DIR).join(DB_FILE))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        if !schema::init_schema(&conn)? {
            return Err(Error::UnsupportedSchema(root.to_path_buf()));
        }
        Ok(conn)
    }

    fn load(root: PathBuf, conn: Connection) -> Result<Self> {
        let mut store = Self {
            root,
            conn,
            backend: Backend::default(),
            largefiles_exclude: Vec::new(),
            active: INITIAL_BRANCH.to_string(),
            head_tree: Tree::new(),
            index: Tree::new(),
            merge_head: None,
        };

        if let Some(backend) = store.config(CONFIG_BACKEND)? {
            store.backend = backend.parse()?;
        }
        if let Some(patterns) = store.config(CONFIG_LARGEFILES_EXCLUDE)? {
            let patterns: Vec<String> = serde_json::from_str(&patterns)?;
            store.largefiles_exclude = patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<std::result::Result<_, _>>()?;
        }
        if let Some(active) = store.get_ref(REF_HEAD)? {
            store.active = active;
        }
        store.merge_head = store.get_ref(REF_MERGE_HEAD)?;
        let head = store.head(&store.active)?;
        store.head_tree = store.load_tree(head.as_deref())?;
        store.index = store.load_index()?;
        Ok(store)
    }

    /// Backend used for new content.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Path of the blob for `key`.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(METADATA_DIR).join("objects").join(key)
    }

    /// Working-tree location of a tracked path.
    pub fn working_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.largefiles_exclude.iter().any(|re| re.is_match(path))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Refs and commits
    // ─────────────────────────────────────────────────────────────────────

    fn get_ref(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT target FROM refs WHERE name = ?", [name], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set_ref(&self, name: &str, target: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO refs (name, target) VALUES (?, ?)",
            params![name, target],
        )?;
        Ok(())
    }

    fn clear_ref(&self, name: &str) -> Result<()> {
        self.conn.execute("DELETE FROM refs WHERE name = ?", [name])?;
        Ok(())
    }

    /// `None` if the branch does not exist, `Some(None)` if it has no commits.
    fn lookup_branch(&self, name: &str) -> Result<Option<Option<CommitId>>> {
        Ok(self
            .conn
            .query_row("SELECT head FROM branches WHERE name = ?", [name], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set_branch_head(&self, name: &str, head: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO branches (name, head) VALUES (?, ?)",
            params![name, head],
        )?;
        Ok(())
    }

    fn load_tree(&self, commit: Option<&str>) -> Result<Tree> {
        let Some(commit) = commit else {
            return Ok(Tree::new());
        };
        let json: String =
            self.conn
                .query_row("SELECT tree FROM commits WHERE id = ?", [commit], |row| {
                    row.get(0)
                })?;
        Ok(serde_json::from_str(&json)?)
    }

    fn parents(&self, commit: &str) -> Result<Vec<CommitId>> {
        let (p1, p2): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT parent1, parent2 FROM commits WHERE id = ?",
            [commit],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(p1.into_iter().chain(p2).collect())
    }

    /// Commits reachable from `start` (inclusive), breadth-first.
    fn ancestors(&self, start: &str) -> Result<Vec<CommitId>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            queue.extend(self.parents(&id)?);
            order.push(id);
        }
        Ok(order)
    }

    fn is_ancestor(&self, candidate: &str, of: &str) -> Result<bool> {
        Ok(self.ancestors(of)?.iter().any(|id| id == candidate))
    }

    fn merge_base(&self, ours: &str, theirs: &str) -> Result<Option<CommitId>> {
        let ours: HashSet<CommitId> = self.ancestors(ours)?.into_iter().collect();
        Ok(self
            .ancestors(theirs)?
            .into_iter()
            .find(|id| ours.contains(id)))
    }

    fn write_commit(&self, parents: &[CommitId], message: &str, tree: &Tree) -> Result<CommitId> {
        let tree_json = serde_json::to_string(tree)?;
        let created_at = chrono::Utc::now().timestamp();

        let mut hasher = Sha256::new();
        for parent in parents {
            hasher.update(parent.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(message.as_bytes());
        hasher.update(b"\n");
        hasher.update(tree_json.as_bytes());
        hasher.update(created_at.to_le_bytes());
        let id = hex::encode(hasher.finalize());

        self.conn.execute(
            "INSERT OR IGNORE INTO commits (id, parent1, parent2, message, tree, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id,
                parents.first(),
                parents.get(1),
                message,
                tree_json,
                created_at
            ],
        )?;
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Index and working tree
    // ─────────────────────────────────────────────────────────────────────

    fn load_index(&self) -> Result<Tree> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, key, annexed FROM index_entries")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Entry {
                    key: row.get(1)?,
                    annexed: row.get(2)?,
                },
            ))
        })?;
        let mut tree = Tree::new();
        for row in rows {
            let (path, entry) = row?;
            tree.insert(path, entry);
        }
        Ok(tree)
    }

    fn stage_entry(&mut self, path: &str, entry: Entry) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO index_entries (path, key, annexed) VALUES (?, ?, ?)",
            params![path, entry.key, entry.annexed],
        )?;
        self.index.insert(path.to_string(), entry);
        Ok(())
    }

    fn replace_index(&mut self, tree: Tree) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM index_entries", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO index_entries (path, key, annexed) VALUES (?, ?, ?)")?;
            for (path, entry) in &tree {
                stmt.execute(params![path, entry.key, entry.annexed])?;
            }
        }
        tx.commit()?;
        self.index = tree;
        Ok(())
    }

    fn materialize(&self, path: &str, key: &str) -> Result<()> {
        let object = self.object_path(key);
        if !object.exists() {
            return Err(Error::MissingObject(key.to_string()));
        }
        let target = self.working_path(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if target.exists() {
            fs::remove_file(&target)?;
        }
        fs::copy(&object, &target)?;
        Ok(())
    }

    fn unlink_working(&self, path: &str) -> Result<()> {
        let target = self.working_path(path);
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut dir = target.parent();
        while let Some(d) = dir {
            if d == self.root || fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
        Ok(())
    }

    /// Bring the working tree from `from` to `to`, leaving untracked files alone.
    fn checkout(&self, from: &Tree, to: &Tree) -> Result<()> {
        for path in from.keys().filter(|p| !to.contains_key(*p)) {
            self.unlink_working(path)?;
        }
        for (path, entry) in to {
            if from.get(path) != Some(entry) || !self.working_path(path).exists() {
                self.materialize(path, &entry.key)?;
            }
        }
        Ok(())
    }

    fn store_object<F>(&self, key: &str, write: F) -> Result<()>
    where
        F: FnOnce(&Path) -> std::io::Result<()>,
    {
        let object = self.object_path(key);
        if object.exists() {
            return Ok(());
        }
        let tmp_dir = self.scratch_dir();
        fs::create_dir_all(&tmp_dir)?;
        if let Some(parent) = object.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = tmp_dir.join(format!("{}.{}.part", key, std::process::id()));
        write(&tmp)?;
        fs::rename(&tmp, &object)?;
        Ok(())
    }

    fn stage_content(&mut self, path: String, key: String, options: &AddOptions) -> Result<AddOutcome> {
        let annexed = !options.force_git && !self.is_excluded(&path);
        let entry = Entry {
            key: key.clone(),
            annexed,
        };
        let changed = self.index.get(&path) != Some(&entry);
        if changed || !self.working_path(&path).exists() {
            self.materialize(&path, &key)?;
        }
        if changed {
            self.stage_entry(&path, entry)?;
        }
        if let Some(url) = &options.url {
            self.register_url(&key, url)?;
        }
        tracing::debug!(path = %path, key = %key, changed, "Staged content");
        Ok(AddOutcome {
            key,
            changed,
            annexed,
        })
    }
    /// Tree for a true merge of `theirs` into `ours`, and how many
    /// conflicting paths the strategy settled.
    fn merge_trees(
        &self,
        name: &str,
        ours: &str,
        theirs: &str,
        their_tree: Tree,
        options: &MergeOptions,
    ) -> Result<(Tree, usize)> {
        let base = self.merge_base(ours, theirs)?;
        if base.is_none() && !options.allow_unrelated {
            return Err(Error::UnrelatedHistories {
                ours: self.active.clone(),
                theirs: name.to_string(),
            });
        }
        let base_tree = self.load_tree(base.as_deref())?;
        let merge = three_way_merge(&base_tree, &self.head_tree, &their_tree);

        Ok(match options.strategy {
            MergeStrategy::Recursive => {
                if !merge.conflicts.is_empty() {
                    return Err(Error::MergeConflict {
                        branch: name.to_string(),
                        paths: merge.conflicts,
                    });
                }
                (merge.tree, 0)
            }
            MergeStrategy::Ours => (self.head_tree.clone(), 0),
            MergeStrategy::Theirs => (their_tree, merge.conflicts.len()),
        })
    }
}

/// Validate and normalise a store-relative path.
fn normalize_path(path: &str) -> Result<String> {
    let parts: Vec<&str> = path
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if path.starts_with('/')
        || parts.is_empty()
        || parts.contains(&"..")
        || parts[0] == METADATA_DIR
    {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(parts.join("/"))
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl ContentStore for LocalStore {
    fn create(path: &Path, options: StoreOptions) -> Result<Self> {
        if Self::is_store(path) {
            return Err(Error::AlreadyExists(path.to_path_buf()));
        }
        fs::create_dir_all(path.join(METADATA_DIR).join("objects"))?;

        let conn = Self::open_db(path)?;
        conn.execute(
            "INSERT OR IGNORE INTO branches (name, head) VALUES (?, NULL)",
            [INITIAL_BRANCH],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO refs (name, target) VALUES (?, ?)",
            params![REF_HEAD, INITIAL_BRANCH],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            params![CONFIG_BACKEND, options.backend.as_str()],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            params![
                CONFIG_LARGEFILES_EXCLUDE,
                serde_json::to_string(&options.largefiles_exclude)?
            ],
        )?;

        tracing::info!(path = %path.display(), backend = options.backend.as_str(), "Created store");
        Self::load(path.to_path_buf(), conn)
    }

    fn open(path: &Path) -> Result<Self> {
        if !Self::is_store(path) {
            return Err(Error::NotAStore(path.to_path_buf()));
        }
        let conn = Self::open_db(path)?;
        Self::load(path.to_path_buf(), conn)
    }

    fn is_store(path: &Path) -> bool {
        path.join(METADATA_DIR).join(DB_FILE).is_file()
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn active_branch(&self) -> &str {
        &self.active
    }

    fn branches(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM branches ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn head(&self, branch: &str) -> Result<Option<CommitId>> {
        self.lookup_branch(branch)?
            .ok_or_else(|| Error::UnknownBranch(branch.to_string()))
    }

    fn switch_branch(&mut self, name: &str, parent: Option<&str>) -> Result<BranchSwitch> {
        let previous = self.active.clone();
        if name == self.active {
            return Ok(BranchSwitch {
                created: false,
                previous,
            });
        }
        if self.is_dirty() {
            return Err(Error::DirtyTree(previous));
        }

        let (head, created) = match self.lookup_branch(name)? {
            Some(head) => (head, false),
            None => {
                let head = match parent {
                    Some(parent) => self.head(parent)?,
                    None => None,
                };
                self.set_branch_head(name, head.as_deref())?;
                (head, true)
            }
        };

        let tree = self.load_tree(head.as_deref())?;
        self.checkout(&self.head_tree, &tree)?;
        self.replace_index(tree.clone())?;
        self.set_ref(REF_HEAD, name)?;
        self.active = name.to_string();
        self.head_tree = tree;

        tracing::info!(branch = %name, from = %previous, created, "Switched branch");
        Ok(BranchSwitch { created, previous })
    }

    fn merge_branch(&mut self, name: &str, options: &MergeOptions) -> Result<MergeOutcome> {
        if self.is_dirty() {
            return Err(Error::DirtyTree(self.active.clone()));
        }
        let Some(theirs) = self.head(name)? else {
            tracing::debug!(branch = %name, "Nothing to merge from branch without commits");
            return Ok(MergeOutcome::default());
        };
        let ours = self.head(&self.active)?;

        if let Some(ours) = &ours
            && (*ours == theirs || self.is_ancestor(&theirs, ours)?)
        {
            tracing::debug!(branch = %name, into = %self.active, "Already up to date");
            return Ok(MergeOutcome::default());
        }

        let their_tree = self.load_tree(Some(&theirs))?;
        let fast_forward = match &ours {
            None => true,
            Some(ours) => self.is_ancestor(ours, &theirs)?,
        };
        if fast_forward && options.commit == CommitMode::Auto {
            self.checkout(&self.head_tree, &their_tree)?;
            self.replace_index(their_tree.clone())?;
            self.set_branch_head(&self.active, Some(&theirs))?;
            self.head_tree = their_tree;
            tracing::info!(branch = %name, into = %self.active, "Fast-forwarded");
            return Ok(MergeOutcome {
                changed: true,
                fast_forward: true,
                conflicts_resolved: 0,
            });
        }

        // A manual merge only stages: the branch head moves on `commit`
        let (merged, conflicts_resolved) = match ours.as_deref() {
            Some(ours) if !fast_forward => {
                self.merge_trees(name, ours, &theirs, their_tree, options)?
            }
            _ => (their_tree, 0),
        };

        let ours_tree = self.head_tree.clone();
        self.checkout(&ours_tree, &merged)?;
        self.replace_index(merged)?;
        self.set_ref(REF_MERGE_HEAD, &theirs)?;
        self.merge_head = Some(theirs);
        tracing::info!(branch = %name, into = %self.active, conflicts_resolved, "Merged");

        if options.commit == CommitMode::Auto {
            let message = format!("Merge branch '{}' into {}", name, self.active);
            self.commit(&message)?;
        }
        Ok(MergeOutcome {
            changed: true,
            fast_forward: false,
            conflicts_resolved,
        })
    }

    fn reset(&mut self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        let head_tree = self.head_tree.clone();
        self.checkout(&self.index, &head_tree)?;
        self.replace_index(head_tree)?;
        self.clear_ref(REF_MERGE_HEAD)?;
        self.merge_head = None;
        tracing::warn!(branch = %self.active, "Discarded uncommitted changes");
        Ok(true)
    }

    fn add_bytes(
        &mut self,
        path: &str,
        content: &[u8],
        options: &AddOptions,
    ) -> Result<AddOutcome> {
        let path = normalize_path(path)?;
        let key = self.backend.key_for_bytes(content, file_name(&path));
        self.store_object(&key, |tmp| fs::write(tmp, content))?;
        self.stage_content(path, key, options)
    }

    fn add_file(&mut self, path: &str, source: &Path, options: &AddOptions) -> Result<AddOutcome> {
        let path = normalize_path(path)?;
        let mut file = fs::File::open(source)?;
        let key = self.backend.key_for_reader(&mut file, file_name(&path))?;
        self.store_object(&key, |tmp| fs::copy(source, tmp).map(|_| ()))?;
        self.stage_content(path, key, options)
    }

    fn remove_file(&mut self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        let tracked = self.index.remove(&path).is_some();
        if tracked {
            self.conn
                .execute("DELETE FROM index_entries WHERE path = ?", [&path])?;
            tracing::debug!(path = %path, "Removed file");
        }
        self.unlink_working(&path)?;
        Ok(tracked)
    }

    fn entry(&self, path: &str) -> Option<Entry> {
        let path = normalize_path(path).ok()?;
        self.index.get(&path).cloned()
    }

    fn content_key(&self, source: &Path, filename: &str) -> Result<String> {
        let mut file = fs::File::open(source)?;
        self.backend.key_for_reader(&mut file, filename)
    }

    fn list_files(&self, pattern: &Regex) -> Vec<String> {
        self.index
            .keys()
            .filter(|p| pattern.is_match(p))
            .cloned()
            .collect()
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path)?;
        let entry = self
            .index
            .get(&path)
            .ok_or_else(|| Error::InvalidPath(path.clone()))?;
        let object = self.object_path(&entry.key);
        if !object.exists() {
            return Err(Error::MissingObject(entry.key.clone()));
        }
        Ok(fs::read(object)?)
    }

    fn register_url(&mut self, key: &str, url: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO key_urls (key, url, added_at) VALUES (?, ?, ?)",
            params![key, url, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn urls(&self, key: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM key_urls WHERE key = ? ORDER BY added_at, url")?;
        let urls = stmt
            .query_map([key], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(urls)
    }

    fn is_dirty(&self) -> bool {
        self.merge_head.is_some() || self.index != self.head_tree
    }

    fn commit(&mut self, message: &str) -> Result<Option<CommitId>> {
        if !self.is_dirty() {
            return Ok(None);
        }
        let head = self.head(&self.active)?;
        let parents: Vec<CommitId> = head.into_iter().chain(self.merge_head.clone()).collect();
        let id = self.write_commit(&parents, message, &self.index)?;

        self.set_branch_head(&self.active, Some(&id))?;
        self.clear_ref(REF_MERGE_HEAD)?;
        self.merge_head = None;
        self.head_tree = self.index.clone();

        tracing::info!(branch = %self.active, commit = %&id[..12], "Committed: {}", message);
        Ok(Some(id))
    }

    fn log(&self, branch: &str) -> Result<Vec<CommitInfo>> {
        let Some(head) = self.head(branch)? else {
            return Ok(Vec::new());
        };
        let mut infos = Vec::new();
        for id in self.ancestors(&head)? {
            let (message, created_at): (String, i64) = self.conn.query_row(
                "SELECT message, created_at FROM commits WHERE id = ?",
                [&id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            infos.push(CommitInfo {
                parents: self.parents(&id)?,
                id,
                message,
                created_at,
            });
        }
        Ok(infos)
    }

    fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    fn config(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn scratch_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR).join("tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::create(dir.path(), StoreOptions::default()).unwrap();
        (dir, store)
    }

    fn theirs_manual() -> MergeOptions {
        MergeOptions {
            strategy: MergeStrategy::Theirs,
            commit: CommitMode::Manual,
            allow_unrelated: true,
        }
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = TempDir::new().unwrap();
        assert!(!LocalStore::is_store(dir.path()));
        {
            let mut store = LocalStore::create(dir.path(), StoreOptions::default()).unwrap();
            store.add_bytes("a.txt", b"alpha", &AddOptions::default()).unwrap();
            store.commit("add a").unwrap();
            store.set_config("dataset.name", "pvc-1").unwrap();
        }
        assert!(LocalStore::is_store(dir.path()));
        assert!(matches!(
            LocalStore::create(dir.path(), StoreOptions::default()),
            Err(Error::AlreadyExists(_))
        ));

        let store = LocalStore::open(dir.path()).unwrap();
        assert_eq!(store.active_branch(), "master");
        assert_eq!(store.read_file("a.txt").unwrap(), b"alpha");
        assert_eq!(store.config("dataset.name").unwrap().as_deref(), Some("pvc-1"));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_open_missing_store() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            LocalStore::open(dir.path()),
            Err(Error::NotAStore(_))
        ));
    }

    #[test]
    fn test_commit_none_when_unchanged() {
        let (_dir, mut store) = new_store();
        assert_eq!(store.commit("empty").unwrap(), None);

        let outcome = store.add_bytes("f.dat", b"x", &AddOptions::default()).unwrap();
        assert!(outcome.changed);
        assert!(store.commit("add").unwrap().is_some());

        let again = store.add_bytes("f.dat", b"x", &AddOptions::default()).unwrap();
        assert!(!again.changed);
        assert_eq!(store.commit("again").unwrap(), None);
        assert_eq!(store.log("master").unwrap().len(), 1);
    }

    #[test]
    fn test_largefiles_exclude() {
        let dir = TempDir::new().unwrap();
        let options = StoreOptions {
            largefiles_exclude: vec![r"\.txt$".to_string(), "^README".to_string()],
            ..Default::default()
        };
        let mut store = LocalStore::create(dir.path(), options).unwrap();
        assert!(!store.add_bytes("notes.txt", b"n", &AddOptions::default()).unwrap().annexed);
        assert!(!store.add_bytes("README", b"r", &AddOptions::default()).unwrap().annexed);
        assert!(store.add_bytes("data.bin", b"d", &AddOptions::default()).unwrap().annexed);
        let forced = AddOptions {
            force_git: true,
            ..Default::default()
        };
        assert!(!store.add_bytes("cfg.bin", b"c", &forced).unwrap().annexed);
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let (_dir, mut store) = new_store();
        for path in ["/etc/passwd", "../x", "a/../../b", ".quarry/store.db", ""] {
            assert!(
                matches!(
                    store.add_bytes(path, b"x", &AddOptions::default()),
                    Err(Error::InvalidPath(_))
                ),
                "{path}"
            );
        }
        let outcome = store.add_bytes("./a//b.txt", b"x", &AddOptions::default()).unwrap();
        assert!(outcome.changed);
        assert!(store.entry("a/b.txt").is_some());
    }

    #[test]
    fn test_orphan_branch_and_switch() {
        let (dir, mut store) = new_store();
        store.add_bytes("m.txt", b"master", &AddOptions::default()).unwrap();

        assert!(matches!(
            store.switch_branch("incoming", None),
            Err(Error::DirtyTree(_))
        ));
        store.commit("master content").unwrap();

        let switch = store.switch_branch("incoming", None).unwrap();
        assert!(switch.created);
        assert_eq!(switch.previous, "master");
        assert!(store.list_files(&Regex::new(".*").unwrap()).is_empty());
        assert!(!dir.path().join("m.txt").exists());
        assert_eq!(store.head("incoming").unwrap(), None);

        store.switch_branch("master", None).unwrap();
        assert!(dir.path().join("m.txt").exists());

        let child = store.switch_branch("child", Some("master")).unwrap();
        assert!(child.created);
        assert_eq!(store.head("child").unwrap(), store.head("master").unwrap());
    }

    #[test]
    fn test_merge_fast_forward_into_unborn() {
        let (dir, mut store) = new_store();
        store.switch_branch("incoming", None).unwrap();
        store.add_bytes("raw.tgz", b"archive", &AddOptions::default()).unwrap();
        store.commit("raw").unwrap();

        store.switch_branch("published", None).unwrap();
        let options = MergeOptions {
            allow_unrelated: true,
            ..Default::default()
        };
        let outcome = store.merge_branch("incoming", &options).unwrap();
        assert!(outcome.changed);
        assert!(outcome.fast_forward);
        assert!(!store.is_dirty());
        assert!(dir.path().join("raw.tgz").exists());
        assert_eq!(store.head("published").unwrap(), store.head("incoming").unwrap());

        let again = store.merge_branch("incoming", &options).unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn test_manual_merge_never_moves_head() {
        let (dir, mut store) = new_store();
        store.switch_branch("incoming", None).unwrap();
        store.add_bytes("raw.tgz", b"archive", &AddOptions::default()).unwrap();
        let raw = store.commit("raw").unwrap().unwrap();

        store.switch_branch("incoming-processed", None).unwrap();
        let outcome = store.merge_branch("incoming", &theirs_manual()).unwrap();
        assert!(outcome.changed);
        assert!(!outcome.fast_forward);
        assert!(store.is_dirty());
        assert_eq!(store.head("incoming-processed").unwrap(), None);
        assert!(dir.path().join("raw.tgz").exists());

        store.remove_file("raw.tgz").unwrap();
        store.add_bytes("raw/x.dat", b"x", &AddOptions::default()).unwrap();
        let id = store.commit("extracted").unwrap().unwrap();
        let log = store.log("incoming-processed").unwrap();
        assert_eq!(log[0].id, id);
        assert_eq!(log[0].parents, vec![raw]);

        let again = store.merge_branch("incoming", &theirs_manual()).unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn test_reset_abandons_pending_merge_across_reopen() {
        let (dir, mut store) = new_store();
        store.add_bytes("keep.txt", b"k", &AddOptions::default()).unwrap();
        store.commit("keep").unwrap();
        store.switch_branch("incoming", None).unwrap();
        store.add_bytes("raw.tgz", b"archive", &AddOptions::default()).unwrap();
        store.commit("raw").unwrap();
        store.switch_branch("master", None).unwrap();
        let head = store.head("master").unwrap();

        store.merge_branch("incoming", &theirs_manual()).unwrap();
        store.add_bytes("half/x.dat", b"x", &AddOptions::default()).unwrap();
        drop(store);

        let mut store = LocalStore::open(dir.path()).unwrap();
        assert!(store.is_dirty());
        assert!(store.reset().unwrap());
        assert!(!store.is_dirty());
        assert!(!store.reset().unwrap());
        assert_eq!(store.head("master").unwrap(), head);
        assert_eq!(store.list_files(&Regex::new("").unwrap()), vec!["keep.txt"]);
        assert!(!dir.path().join("raw.tgz").exists());
        assert!(!dir.path().join("half").exists());
        assert!(dir.path().join("keep.txt").exists());

        let reopened = LocalStore::open(dir.path()).unwrap();
        assert!(!reopened.is_dirty());
    }

    #[test]
    fn test_merge_from_unborn_is_noop() {
        let (_dir, mut store) = new_store();
        store.switch_branch("incoming", None).unwrap();
        store.switch_branch("master", None).unwrap();
        let outcome = store.merge_branch("incoming", &MergeOptions::default()).unwrap();
        assert_eq!(outcome, MergeOutcome::default());
    }

    #[test]
    fn test_unrelated_histories() {
        let (_dir, mut store) = new_store();
        store.add_bytes("m.txt", b"m", &AddOptions::default()).unwrap();
        store.commit("m").unwrap();
        store.switch_branch("other", None).unwrap();
        store.add_bytes("o.txt", b"o", &AddOptions::default()).unwrap();
        store.commit("o").unwrap();
        store.switch_branch("master", None).unwrap();

        assert!(matches!(
            store.merge_branch("other", &MergeOptions::default()),
            Err(Error::UnrelatedHistories { .. })
        ));

        let options = MergeOptions {
            allow_unrelated: true,
            ..Default::default()
        };
        let outcome = store.merge_branch("other", &options).unwrap();
        assert!(outcome.changed);
        assert!(!outcome.fast_forward);
        assert!(!store.is_dirty());
        assert_eq!(store.list_files(&Regex::new(r"\.txt$").unwrap()), vec!["m.txt", "o.txt"]);

        let head = store.head("master").unwrap().unwrap();
        assert_eq!(store.log("master").unwrap()[0].parents.len(), 2);
        assert_eq!(store.log("master").unwrap()[0].id, head);
        assert!(!store.merge_branch("other", &options).unwrap().changed);
    }

    #[test]
    fn test_theirs_merge_takes_their_tree() {
        let (_dir, mut store) = new_store();
        store.switch_branch("incoming", None).unwrap();
        store.add_bytes("a.tgz", b"v1", &AddOptions::default()).unwrap();
        store.commit("v1").unwrap();

        store.switch_branch("processed", Some("incoming")).unwrap();
        store.remove_file("a.tgz").unwrap();
        store.add_bytes("a/x.dat", b"x1", &AddOptions::default()).unwrap();
        store.commit("extract").unwrap();

        store.switch_branch("incoming", None).unwrap();
        store.add_bytes("a.tgz", b"v2", &AddOptions::default()).unwrap();
        store.commit("v2").unwrap();

        store.switch_branch("processed", None).unwrap();
        let outcome = store.merge_branch("incoming", &theirs_manual()).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.conflicts_resolved, 1);
        assert!(store.is_dirty());
        assert_eq!(store.read_file("a.tgz").unwrap(), b"v2");
        assert!(store.entry("a/x.dat").is_none());

        let id = store.commit("merge incoming").unwrap().unwrap();
        assert_eq!(store.log("processed").unwrap()[0].id, id);
        assert_eq!(store.log("processed").unwrap()[0].parents.len(), 2);
    }

    #[test]
    fn test_recursive_conflict_applies_nothing() {
        let (_dir, mut store) = new_store();
        store.add_bytes("f", b"base", &AddOptions::default()).unwrap();
        store.commit("base").unwrap();
        store.switch_branch("side", Some("master")).unwrap();
        store.add_bytes("f", b"side", &AddOptions::default()).unwrap();
        store.commit("side").unwrap();
        store.switch_branch("master", None).unwrap();
        store.add_bytes("f", b"main", &AddOptions::default()).unwrap();
        store.commit("main").unwrap();

        let err = store
            .merge_branch("side", &MergeOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::MergeConflict { ref paths, .. } if paths == &["f"]));
        assert!(!store.is_dirty());
        assert_eq!(store.read_file("f").unwrap(), b"main");
    }

    #[test]
    fn test_remove_file_prunes_dirs() {
        let (dir, mut store) = new_store();
        store.add_bytes("a/b/c.txt", b"c", &AddOptions::default()).unwrap();
        assert!(store.remove_file("a/b/c.txt").unwrap());
        assert!(!dir.path().join("a").exists());
        assert!(!store.remove_file("a/b/c.txt").unwrap());
    }

    #[test]
    fn test_urls_and_add_file() {
        let (dir, mut store) = new_store();
        let src = dir.path().join("download.part");
        fs::write(&src, b"payload").unwrap();
        let options = AddOptions {
            url: Some("http://example.com/f.dat".to_string()),
            ..Default::default()
        };
        let outcome = store.add_file("f.dat", &src, &options).unwrap();
        assert!(outcome.key.starts_with("SHA256E-s7--"));
        assert!(outcome.key.ends_with(".dat"));
        assert_eq!(store.urls(&outcome.key).unwrap(), vec!["http://example.com/f.dat"]);
        assert_eq!(fs::read(dir.path().join("f.dat")).unwrap(), b"payload");
    }
}
