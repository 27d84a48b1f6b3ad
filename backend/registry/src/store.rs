/// SQLite-backed store for the module runtime.
///
/// A single `rusqlite::Connection` behind a `tokio::sync::Mutex` serializes
/// every write; the backing database is the single source of truth and all
/// in-memory caches are populated from reads validated against it.
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use modforge_core::ModuleError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS modules (
        id            TEXT PRIMARY KEY,
        name          TEXT NOT NULL UNIQUE,
        display_name  TEXT NOT NULL,
        version       TEXT NOT NULL,
        description   TEXT,
        author        TEXT,
        kind          TEXT,
        category      TEXT,
        manifest      TEXT NOT NULL,
        status        TEXT NOT NULL,
        error_message TEXT,
        installed_at  INTEGER NOT NULL,
        enabled_at    INTEGER,
        disabled_at   INTEGER,
        updated_at    INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS module_dependencies (
        id              TEXT PRIMARY KEY,
        module_name     TEXT NOT NULL,
        dependency_name TEXT NOT NULL,
        version_range   TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_module_dependencies_dep
        ON module_dependencies(dependency_name);
    CREATE TABLE IF NOT EXISTS module_tags (
        module_name TEXT NOT NULL,
        tag         TEXT NOT NULL,
        PRIMARY KEY (module_name, tag)
    );
    CREATE TABLE IF NOT EXISTS module_permissions (
        id          TEXT PRIMARY KEY,
        module_name TEXT NOT NULL,
        code        TEXT NOT NULL,
        name        TEXT NOT NULL,
        description TEXT NOT NULL,
        category    TEXT
    );
    CREATE TABLE IF NOT EXISTS module_menus (
        id          TEXT NOT NULL,
        module_name TEXT NOT NULL,
        title       TEXT NOT NULL,
        path        TEXT NOT NULL,
        icon        TEXT,
        parent_id   TEXT,
        sort_order  INTEGER NOT NULL,
        permission  TEXT,
        visible     INTEGER NOT NULL DEFAULT 0,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL,
        PRIMARY KEY (id, module_name)
    );
    CREATE TABLE IF NOT EXISTS module_endpoints (
        id          TEXT PRIMARY KEY,
        module_name TEXT NOT NULL,
        method      TEXT NOT NULL,
        path        TEXT NOT NULL,
        description TEXT NOT NULL,
        permission  TEXT
    );
    CREATE TABLE IF NOT EXISTS permissions (
        id          TEXT PRIMARY KEY,
        code        TEXT NOT NULL UNIQUE,
        name        TEXT NOT NULL,
        description TEXT NOT NULL,
        category    TEXT,
        module_name TEXT NOT NULL,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS module_migrations (
        id          TEXT PRIMARY KEY,
        module_name TEXT NOT NULL,
        file_name   TEXT NOT NULL,
        applied_at  INTEGER NOT NULL,
        UNIQUE (module_name, file_name)
    );
";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .context("Failed to open module registry database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to set WAL mode")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize module registry schema")?;
        info!("Module store opened at {:?}", path.as_ref());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Acquire the connection. Held for the duration of one logical
    /// operation so read-then-write sequences do not interleave.
    pub async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// Map a rusqlite error into the runtime error taxonomy.
pub fn storage_err(e: rusqlite::Error) -> ModuleError {
    ModuleError::Storage(e.to_string())
}
