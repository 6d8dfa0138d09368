//! SQLite schema for the store's metadata database.
//!
//! The database lives at `<store>/.quarry/store.db` and records commits,
//! branch pointers, the staged tree (index), per-key source URLs and free-form
//! configuration.

use rusqlite::{Connection, Result};

/// Version written to new databases.
///
/// Stores written by a newer build are refused rather than migrated down.
pub const SCHEMA_VERSION: i32 = 1;

/// Bring `conn` up to [`SCHEMA_VERSION`].
///
/// Returns `false` when the database was written by a newer schema than this
/// build understands.
pub fn init_schema(conn: &Connection) -> Result<bool> {
    let stored = read_version(conn)?;

    if stored == 0 {
        create_store_tables(conn)?;
        write_version(conn, SCHEMA_VERSION)?;
    } else if stored > SCHEMA_VERSION {
        return Ok(false);
    }

    Ok(true)
}

/// Stored schema version, 0 for an empty database.
fn read_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn write_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_store_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Immutable commit objects; the tree is a JSON path -> entry map
        CREATE TABLE IF NOT EXISTS commits (
            id TEXT PRIMARY KEY,
            parent1 TEXT,
            parent2 TEXT,
            message TEXT NOT NULL,
            tree TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Branch pointers (head is NULL for a branch without commits)
        CREATE TABLE IF NOT EXISTS branches (
            name TEXT PRIMARY KEY,
            head TEXT
        );

        -- Symbolic refs: HEAD -> branch name, MERGE_HEAD -> commit id
        CREATE TABLE IF NOT EXISTS refs (
            name TEXT PRIMARY KEY,
            target TEXT NOT NULL
        );

        -- Staged tree of the active branch
        CREATE TABLE IF NOT EXISTS index_entries (
            path TEXT PRIMARY KEY,
            key TEXT NOT NULL,
            annexed INTEGER NOT NULL
        );

        -- Where content for a key can be obtained from
        CREATE TABLE IF NOT EXISTS key_urls (
            key TEXT NOT NULL,
            url TEXT NOT NULL,
            added_at INTEGER NOT NULL,
            PRIMARY KEY (key, url)
        );

        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_commits_parent1 ON commits(parent1);
        CREATE INDEX IF NOT EXISTS idx_key_urls_key ON key_urls(key);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_fresh_db_gets_store_tables() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(init_schema(&conn).unwrap());

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in ["commits", "branches", "refs", "index_entries", "key_urls", "config"] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert!(init_schema(&conn).unwrap());
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        write_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(!init_schema(&conn).unwrap());
    }
}
