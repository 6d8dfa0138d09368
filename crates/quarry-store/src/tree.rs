//! Snapshot trees and three-way merging.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A tracked file: its content key and whether it is annexed (large,
/// content-addressed) or kept as a plain entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Content key produced by the store's backend.
    pub key: String,
    /// `false` for paths matched by the largefiles exclusion rules.
    pub annexed: bool,
}

/// Path (relative, `/`-separated) to entry mapping.
pub type Tree = BTreeMap<String, Entry>;

/// Result of a three-way tree merge.
#[derive(Debug, Default)]
pub struct TreeMerge {
    /// The merged tree (conflicting paths keep ours).
    pub tree: Tree,
    /// Paths changed differently on both sides.
    pub conflicts: Vec<String>,
}

/// Merge `theirs` into `ours` relative to their common `base`.
///
/// A side that left a path untouched relative to the base yields to the other
/// side. Deletions count as changes.
pub fn three_way_merge(base: &Tree, ours: &Tree, theirs: &Tree) -> TreeMerge {
    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();

    let mut merged = TreeMerge::default();
    for path in paths {
        let b = base.get(path);
        let o = ours.get(path);
        let t = theirs.get(path);

        let chosen = if o == t || t == b {
            o
        } else if o == b {
            t
        } else {
            merged.conflicts.push(path.clone());
            o
        };

        if let Some(entry) = chosen {
            merged.tree.insert(path.clone(), entry.clone());
        }
    }
    merged
}
