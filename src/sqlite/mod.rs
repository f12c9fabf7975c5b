// ABOUTME: SQLite connection adapter for the source and destination collaborator traits
// ABOUTME: Provides secure file path validation plus read-only and writable connections

pub mod converter;
pub mod reader;
pub mod writer;

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const ALLOWED_EXTENSIONS: [&str; 3] = ["db", "sqlite", "sqlite3"];

/// Validate a SQLite file path to prevent path traversal attacks
///
/// Security checks:
/// - Canonicalizes path to resolve symlinks and relative paths
/// - Verifies file exists and is a regular file (not directory)
/// - Checks file extension is .db, .sqlite, or .sqlite3
///
/// # Examples
///
/// ```no_run
/// # use seren_transfer::sqlite::validate_sqlite_path;
/// assert!(validate_sqlite_path("database.db").is_ok());
/// assert!(validate_sqlite_path("../../../etc/passwd").is_err());
/// ```
pub fn validate_sqlite_path(path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        bail!("SQLite file path cannot be empty");
    }

    let canonical = PathBuf::from(path).canonicalize().with_context(|| {
        format!(
            "Failed to resolve SQLite file path '{}'. \
             File may not exist or may not be readable.",
            path
        )
    })?;

    if !canonical.is_file() {
        bail!("Path '{}' is not a regular file (may be a directory)", path);
    }
    check_extension(&canonical, path)?;

    tracing::debug!("Validated SQLite path: {}", canonical.display());
    Ok(canonical)
}

fn check_extension(path: &Path, shown: &str) -> Result<()> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext) => Ok(()),
        Some(ext) => bail!(
            "Invalid SQLite file extension '{}'. Must be .db, .sqlite, or .sqlite3",
            ext
        ),
        None => bail!(
            "SQLite file '{}' has no extension. Must be .db, .sqlite, or .sqlite3",
            shown
        ),
    }
}

/// One SQLite database handle usable as a source or a destination
///
/// rusqlite connections are not `Sync`, so the handle lives behind a mutex;
/// cursors lock it from a blocking thread for the duration of a scan.
#[derive(Clone)]
pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
    label: String,
}

impl SqliteConnection {
    /// Open an existing database read-only for dumping
    pub fn open_read_only(path: &str) -> Result<Self> {
        let canonical = validate_sqlite_path(path)?;
        tracing::info!("Opening SQLite database: {}", canonical.display());

        let conn = Connection::open_with_flags(&canonical, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed to open SQLite database: {}", canonical.display()))?;
        verify(&conn)?;
        Ok(Self::from_connection(conn, canonical.display().to_string()))
    }

    /// Open a database for writing, creating the file if it does not exist
    pub fn open_writable(path: &str) -> Result<Self> {
        if path.is_empty() {
            bail!("SQLite file path cannot be empty");
        }
        let path_buf = PathBuf::from(path);
        check_extension(&path_buf, path)?;
        if path_buf.is_dir() {
            bail!("Path '{}' is a directory", path);
        }

        tracing::info!("Opening SQLite database for writing: {}", path);
        let conn = Connection::open(&path_buf)
            .with_context(|| format!("Failed to open SQLite database: {}", path))?;
        verify(&conn)?;
        Ok(Self::from_connection(conn, path.to_string()))
    }

    /// Wrap an already open connection, e.g. an in-memory database in tests
    pub fn from_connection(conn: Connection, label: impl Into<String>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run blocking work against the connection
    ///
    /// The guard never outlives the closure, so no lock is held across an await.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard: MutexGuard<'_, Connection> = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection to {} is poisoned", self.label))?;
        f(&guard)
    }

    pub(crate) fn shared(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

fn verify(conn: &Connection) -> Result<()> {
    let _version: String = conn
        .query_row("SELECT sqlite_version()", [], |row| row.get(0))
        .context("Failed to query SQLite version (database may be corrupted)")?;
    Ok(())
}
