use crate::core::error;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub const SAVES_DB_NAME: &str = "saves.db";

pub const SAVES_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS saves (
        name TEXT PRIMARY KEY,
        suite_module TEXT NOT NULL,
        summary_json TEXT NOT NULL,
        snapshot_json TEXT NOT NULL,
        saved_at INTEGER NOT NULL
    )
";

pub fn db_connect(db_path: &Path) -> Result<Connection, error::RunnerError> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).map_err(error::RunnerError::IoError)?;
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::RunnerError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::RunnerError::RusqliteError)?;
    Ok(conn)
}

pub fn saves_db_path(results_dir: &Path) -> PathBuf {
    results_dir.join(SAVES_DB_NAME)
}
