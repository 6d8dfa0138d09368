//! SQLite-backed response cache.

use super::{Fetcher, RemoteStatus};
use crate::Result;
use metrics::counter;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::time::Duration;

/// Caches response bodies by URL so closely spaced runs do not hit the
/// network again. Only fetches that accept a cached copy (a `max_age` is
/// given) are stored. Status queries always go to the wrapped fetcher.
pub struct CachedFetcher<F> {
    inner: F,
    conn: Mutex<Connection>,
}

impl<F: Fetcher> CachedFetcher<F> {
    /// Open or create the cache database at `path`.
    pub fn open(inner: F, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(inner, conn)
    }

    /// In-memory cache (for testing).
    pub fn open_in_memory(inner: F) -> Result<Self> {
        Self::with_connection(inner, Connection::open_in_memory()?)
    }

    fn with_connection(inner: F, conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS responses (
                url TEXT PRIMARY KEY,
                body BLOB NOT NULL,
                fetched_at INTEGER NOT NULL
            )",
        )?;
        Ok(Self {
            inner,
            conn: Mutex::new(conn),
        })
    }

    fn lookup(&self, url: &str, max_age: Duration) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let row: Option<(Vec<u8>, i64)> = conn
            .query_row(
                "SELECT body, fetched_at FROM responses WHERE url = ?",
                [url],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let now = chrono::Utc::now().timestamp();
        Ok(row.and_then(|(body, fetched_at)| {
            let age = now.saturating_sub(fetched_at).max(0) as u64;
            (age <= max_age.as_secs()).then_some(body)
        }))
    }
}

impl<F: Fetcher> Fetcher for CachedFetcher<F> {
    fn fetch(&self, url: &str, max_age: Option<Duration>) -> Result<Vec<u8>> {
        let Some(max_age) = max_age else {
            return self.inner.fetch(url, None);
        };
        if let Some(body) = self.lookup(url, max_age)? {
            tracing::debug!(url = %url, "Cache hit");
            counter!("crawl_cache_hits_total").increment(1);
            return Ok(body);
        }

        let body = self.inner.fetch(url, Some(max_age))?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO responses (url, body, fetched_at) VALUES (?, ?, ?)",
            params![url, body, chrono::Utc::now().timestamp()],
        )?;
        Ok(body)
    }

    fn status(&self, url: &str) -> Result<Option<RemoteStatus>> {
        self.inner.status(url)
    }
}
