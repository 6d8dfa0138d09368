//! Expanding tracked archives into individual files.

use super::extract::{ArchiveFormat, extract, leading_directory};
use super::join_rel;
use crate::pipeline::{Flow, Node, RunContext};
use crate::{Error, Result};
use indexmap::IndexMap;
use metrics::counter;
use parking_lot::Mutex;
use quarry_core::{Record, split_ext};
use quarry_store::{AddOptions, ContentStore};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

/// What to do when an extracted file would land on a path that is already
/// tracked with different content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Collision {
    /// Abort the run.
    #[default]
    Fail,
    /// Replace the tracked content.
    Overwrite,
    /// Append `-<archive stem>` to the file stem, falling back to a number.
    ArchiveSuffix,
    /// Append `-<n>` to the file stem.
    NumericSuffix,
}

/// Options for [`AddArchiveContent`].
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub existing: Collision,
    /// Remove the directory prefix shared by all members.
    pub strip_leading_dirs: bool,
    /// Upper bound on the number of stripped components.
    pub leading_dirs_depth: usize,
    /// If non-empty, only components fully matching one of these patterns
    /// are stripped.
    pub leading_dirs_consider: Vec<String>,
    /// Extract at the store root instead of next to the archive.
    pub use_current_dir: bool,
    /// Regex replacements applied in order to each member's relative path.
    pub rename: IndexMap<String, String>,
    /// Members whose path matches any of these patterns are not added.
    pub exclude: Vec<String>,
    /// Remove the archive once it has been expanded.
    pub delete: bool,
}

/// See [`Annexificator::add_archive_content`](super::Annexificator::add_archive_content).
///
/// Members are extracted into `<scratch>/archives/<archive key>/` and added
/// with the provenance URL `dl+archive:<archive key>#path=<member>`.
pub struct AddArchiveContent<S> {
    store: Arc<Mutex<S>>,
    existing: Collision,
    strip_leading_dirs: bool,
    leading_dirs_depth: usize,
    consider: Vec<Regex>,
    use_current_dir: bool,
    rename: Vec<(Regex, String)>,
    exclude: Vec<Regex>,
    delete: bool,
}

impl<S: ContentStore> AddArchiveContent<S> {
    pub(super) fn new(store: Arc<Mutex<S>>, options: ArchiveOptions) -> Result<Self> {
        let consider = options
            .leading_dirs_consider
            .iter()
            .map(|p| Regex::new(&format!("^(?:{})$", p)))
            .collect::<std::result::Result<_, _>>()?;
        let rename = options
            .rename
            .iter()
            .map(|(pattern, repl)| Ok((Regex::new(pattern)?, repl.clone())))
            .collect::<Result<_>>()?;
        let exclude = options
            .exclude
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<_, _>>()?;
        Ok(Self {
            store,
            existing: options.existing,
            strip_leading_dirs: options.strip_leading_dirs,
            leading_dirs_depth: options.leading_dirs_depth,
            consider,
            use_current_dir: options.use_current_dir,
            rename,
            exclude,
            delete: options.delete,
        })
    }

    /// Map an archive member to its path relative to the extraction target.
    fn member_target(&self, member: &str, strip: usize) -> String {
        let mut rel = member.splitn(strip + 1, '/').last().unwrap_or(member).to_string();
        for (pattern, repl) in &self.rename {
            rel = pattern.replace_all(&rel, repl.as_str()).into_owned();
        }
        rel
    }

    /// Resolve where a member goes, or `None` if identical content is
    /// already tracked there (or under its collision name).
    fn resolve_target(
        &self,
        store: &S,
        target: String,
        source: &Path,
        archive_name: &str,
    ) -> Result<Option<String>> {
        let Some(entry) = store.entry(&target) else {
            return Ok(Some(target));
        };
        let (dir, filename) = target.rsplit_once('/').unwrap_or(("", target.as_str()));
        let key = store.content_key(source, filename)?;
        if entry.key == key {
            return Ok(None);
        }

        let (stem, ext) = split_ext(filename);
        let usable = |name: String| {
            let candidate = join_rel(dir, &name);
            match store.entry(&candidate) {
                Some(other) if other.key != key => None,
                _ => Some(candidate),
            }
        };
        let resolved = match self.existing {
            Collision::Fail => return Err(Error::FileExists(target.clone())),
            Collision::Overwrite => return Ok(Some(target.clone())),
            Collision::ArchiveSuffix => {
                let (archive_stem, _) = split_ext(archive_name);
                usable(format!("{}-{}{}", stem, archive_stem, ext))
                    .or_else(|| numeric(stem, ext, &usable))
            }
            Collision::NumericSuffix => numeric(stem, ext, &usable),
        };
        match resolved {
            Some(candidate) if store.entry(&candidate).is_some() => Ok(None),
            Some(candidate) => {
                tracing::info!(path = %target, renamed = %candidate, "Renamed colliding file");
                Ok(Some(candidate))
            }
            None => Err(Error::FileExists(target.clone())),
        }
    }
}

fn numeric(stem: &str, ext: &str, usable: &impl Fn(String) -> Option<String>) -> Option<String> {
    (1..).find_map(|n| usable(format!("{}-{}{}", stem, n, ext)))
}

impl<S: ContentStore> Node for AddArchiveContent<S> {
    fn name(&self) -> &str {
        "add_archive_content"
    }

    fn process<'a>(&'a self, _ctx: &'a RunContext, record: Record) -> Result<Flow<'a>> {
        let filename = record.require_str("filename")?;
        let dir = record.get_str("path").unwrap_or("");
        let archive = join_rel(dir, filename);
        let format = match ArchiveFormat::detect(filename) {
            Ok(format) => format,
            Err(e) => {
                tracing::warn!(archive = %archive, "Skipping: {}", e);
                return Ok(Flow::none());
            }
        };

        let mut store = self.store.lock();
        let key = store
            .entry(&archive)
            .ok_or_else(|| Error::Archive {
                archive: archive.clone(),
                reason: "not tracked on the active branch".to_string(),
            })?
            .key;

        let scratch = store.scratch_dir().join("archives").join(&key);
        if scratch.exists() {
            std::fs::remove_dir_all(&scratch)?;
        }
        std::fs::create_dir_all(&scratch)?;

        let members = extract(format, &store.root().join(&archive), &scratch).map_err(|e| {
            Error::Archive {
                archive: archive.clone(),
                reason: e.to_string(),
            }
        })?;
        let total = members.len();
        let members: Vec<String> = members
            .into_iter()
            .filter(|m| !self.exclude.iter().any(|re| re.is_match(m)))
            .collect();

        let strip = if self.strip_leading_dirs {
            leading_directory(&members, self.leading_dirs_depth, &self.consider).len()
        } else {
            0
        };
        let base = if self.use_current_dir { "" } else { dir };

        let mut added = 0usize;
        for member in &members {
            let source = scratch.join(member);
            let target = join_rel(base, &self.member_target(member, strip));
            let Some(target) = self.resolve_target(&store, target, &source, filename)? else {
                tracing::debug!(member = %member, "Identical content already tracked");
                continue;
            };
            let outcome = store.add_file(
                &target,
                &source,
                &AddOptions {
                    url: Some(format!("dl+archive:{}#path={}", key, member)),
                    force_git: false,
                },
            )?;
            if outcome.changed {
                added += 1;
            }
        }

        if self.delete {
            store.remove_file(&archive)?;
        }
        counter!("archives_extracted_total").increment(1);
        counter!("archive_files_added_total").increment(added as u64);
        tracing::info!(
            archive = %archive,
            members = total,
            excluded = total - members.len(),
            stripped_dirs = strip,
            added,
            "Extracted archive"
        );

        Ok(Flow::one(record.with("extracted_files", added as i64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annex::{AnnexConfig, Annexificator};
    use crate::pipeline::Pipeline;
    use crate::test_support::{StaticFetcher, tar_gz, zip};
    use quarry_store::{LocalStore, StoreOptions};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Annexificator<LocalStore>) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::create(dir.path(), StoreOptions::default()).unwrap();
        let annex =
            Annexificator::new(store, Arc::new(StaticFetcher::new()), AnnexConfig::default())
                .unwrap();
        (dir, annex)
    }

    fn add(annex: &Annexificator<LocalStore>, path: &str, content: &[u8]) {
        annex
            .store()
            .lock()
            .add_bytes(path, content, &AddOptions::default())
            .unwrap();
    }

    fn expand(annex: &Annexificator<LocalStore>, options: ArchiveOptions, archive: &str) -> Result<()> {
        let (dir, filename) = archive.rsplit_once('/').unwrap_or(("", archive));
        Pipeline::new("t")
            .then(annex.add_archive_content(options)?)
            .collect(
                &RunContext::new(),
                Record::new().with("path", dir).with("filename", filename),
            )
            .map(|_| ())
    }

    fn files(annex: &Annexificator<LocalStore>) -> Vec<String> {
        annex.store().lock().list_files(&Regex::new("").unwrap())
    }

    #[test]
    fn test_expand_next_to_archive_and_delete() {
        let (_dir, annex) = setup();
        add(&annex, "d/x.tgz", &tar_gz(&[("a.txt", b"a"), ("sub/b.txt", b"b")]));
        let options = ArchiveOptions {
            delete: true,
            ..ArchiveOptions::default()
        };
        expand(&annex, options, "d/x.tgz").unwrap();
        assert_eq!(files(&annex), vec!["d/a.txt", "d/sub/b.txt"]);

        let store = annex.store();
        let store = store.lock();
        let key = store.entry("d/sub/b.txt").unwrap().key;
        let urls = store.urls(&key).unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].starts_with("dl+archive:SHA256E-"));
        assert!(urls[0].ends_with(".tgz#path=sub/b.txt"));
    }

    #[test]
    fn test_strip_wrapping_directory_named_like_dataset() {
        let (_dir, annex) = setup();
        add(&annex, "pvc-1.tgz", &tar_gz(&[("pvc-1/a.mat", b"a"), ("pvc-1/docs/r.txt", b"r")]));
        add(&annex, "plain.zip", &zip(&[("data/c.mat", b"c"), ("e.mat", b"e")]));
        let options = ArchiveOptions {
            strip_leading_dirs: true,
            leading_dirs_depth: 2,
            leading_dirs_consider: vec!["crcns.*".to_string(), "pvc-1".to_string()],
            delete: true,
            ..ArchiveOptions::default()
        };
        expand(&annex, options.clone(), "pvc-1.tgz").unwrap();
        expand(&annex, options, "plain.zip").unwrap();
        assert_eq!(files(&annex), vec!["a.mat", "data/c.mat", "docs/r.txt", "e.mat"]);
    }

    #[test]
    fn test_exclude_and_rename() {
        let (_dir, annex) = setup();
        add(
            &annex,
            "x.zip",
            &zip(&[("__MACOSX/._a.txt", b"junk"), ("a.txt", b"a"), ("b.TXT", b"b")]),
        );
        let options = ArchiveOptions {
            exclude: vec![".*__MACOSX.*".to_string()],
            rename: IndexMap::from([(r"\.TXT$".to_string(), ".txt".to_string())]),
            ..ArchiveOptions::default()
        };
        expand(&annex, options, "x.zip").unwrap();
        assert_eq!(files(&annex), vec!["a.txt", "b.txt", "x.zip"]);
    }

    #[test]
    fn test_collisions() {
        let (_dir, annex) = setup();
        add(&annex, "a.txt", b"original");
        add(&annex, "same.txt", b"same");
        add(&annex, "x.tar.gz", &tar_gz(&[("a.txt", b"new"), ("same.txt", b"same")]));

        let err = expand(&annex, ArchiveOptions::default(), "x.tar.gz").unwrap_err();
        assert!(matches!(err, Error::FileExists(p) if p == "a.txt"));

        let options = ArchiveOptions {
            existing: Collision::ArchiveSuffix,
            ..ArchiveOptions::default()
        };
        expand(&annex, options.clone(), "x.tar.gz").unwrap();
        assert_eq!(files(&annex), vec!["a-x.txt", "a.txt", "same.txt", "x.tar.gz"]);

        // Identical content under the suffixed name is not added again
        expand(&annex, options, "x.tar.gz").unwrap();
        assert_eq!(files(&annex), vec!["a-x.txt", "a.txt", "same.txt", "x.tar.gz"]);
    }

    #[test]
    fn test_numeric_suffix_and_overwrite() {
        let (_dir, annex) = setup();
        add(&annex, "a.txt", b"original");
        add(&annex, "x.zip", &zip(&[("a.txt", b"new")]));

        let options = ArchiveOptions {
            existing: Collision::NumericSuffix,
            ..ArchiveOptions::default()
        };
        expand(&annex, options, "x.zip").unwrap();
        assert_eq!(annex.store().lock().read_file("a-1.txt").unwrap(), b"new");

        let options = ArchiveOptions {
            existing: Collision::Overwrite,
            ..ArchiveOptions::default()
        };
        expand(&annex, options, "x.zip").unwrap();
        assert_eq!(annex.store().lock().read_file("a.txt").unwrap(), b"new");
    }

    #[test]
    fn test_unsupported_archive_is_skipped() {
        let (_dir, annex) = setup();
        add(&annex, "x.tar.bz2", b"bz");
        expand(&annex, ArchiveOptions::default(), "x.tar.bz2").unwrap();
        assert_eq!(files(&annex), vec!["x.tar.bz2"]);
    }
}
