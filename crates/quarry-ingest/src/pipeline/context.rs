//! Per-run state shared by the nodes of one pipeline run.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_SCOPE: AtomicUsize = AtomicUsize::new(1);

/// Identifies the state a node keeps in a [`RunContext`].
///
/// Each stateful node allocates one scope when it is constructed; copies that
/// should share state (e.g. a crawler and its recursive variant) share the
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope(usize);

impl Scope {
    /// Allocate a fresh scope.
    pub fn new() -> Self {
        Self(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

/// State carried across node invocations within a single run.
///
/// Holds the "already yielded" key sets used for de-duplication. Reuse one
/// context for a run; call [`reset`](Self::reset) (or make a new context)
/// before an independent run.
#[derive(Debug, Default)]
pub struct RunContext {
    seen: Mutex<HashMap<Scope, HashSet<String>>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `key` under `scope`. Returns `true` the first time a key is
    /// offered and `false` on every later call within the run.
    pub fn first_seen(&self, scope: Scope, key: &str) -> bool {
        let mut seen = self.seen.lock();
        let keys = seen.entry(scope).or_default();
        if keys.contains(key) {
            false
        } else {
            keys.insert(key.to_string());
            true
        }
    }

    /// Check without recording.
    pub fn was_seen(&self, scope: Scope, key: &str) -> bool {
        self.seen
            .lock()
            .get(&scope)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Forget all per-run state.
    pub fn reset(&self) {
        self.seen.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_per_scope() {
        let ctx = RunContext::new();
        let a = Scope::new();
        let b = Scope::new();
        assert_ne!(a, b);

        assert!(ctx.first_seen(a, "http://x/1"));
        assert!(!ctx.first_seen(a, "http://x/1"));
        assert!(ctx.first_seen(b, "http://x/1"));
        assert!(ctx.was_seen(a, "http://x/1"));
    }

    #[test]
    fn test_reset_clears_state() {
        let ctx = RunContext::new();
        let scope = Scope::new();
        ctx.first_seen(scope, "k");
        ctx.reset();
        assert!(!ctx.was_seen(scope, "k"));
        assert!(ctx.first_seen(scope, "k"));
    }
}
