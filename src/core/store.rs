//! Saved runs.
//!
//! Every finished run (and every upload result reported against it) is
//! written to a SQLite database in the results directory so an operator can
//! list earlier runs with `getsaves` and bring one back with `loadstate`.

use crate::core::db;
use crate::core::error::RunnerError;
use crate::core::state::RunSnapshot;
use crate::core::time;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Flat description of a saved run, rendered by `getsaves`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummary {
    pub suite: String,
    pub product: String,
    pub build: Option<String>,
    pub state: String,
    pub executed_by: Option<String>,
    pub run_count: u32,
    pub pass_count: u32,
    pub fail_count: u32,
    pub start_time: u64,
    pub finish_time: u64,
    pub upload_state: String,
}

impl SaveSummary {
    pub fn from_snapshot(snap: &RunSnapshot) -> Self {
        Self {
            suite: snap.suite.name.clone(),
            product: snap.suite.product_name.clone(),
            build: snap.suite.build.clone(),
            state: snap.state.to_string(),
            executed_by: snap.executed_by.clone(),
            run_count: snap.counters.run_count,
            pass_count: snap.counters.pass_count,
            fail_count: snap.counters.fail_count,
            start_time: snap.start_time,
            finish_time: snap.finish_time,
            upload_state: snap.result_state.upload_state.as_str().to_string(),
        }
    }

    /// Field name and text pairs, in display order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("suite", self.suite.clone()),
            ("product", self.product.clone()),
            ("build", self.build.clone().unwrap_or_else(|| "None".into())),
            ("state", self.state.clone()),
            (
                "executedBy",
                self.executed_by.clone().unwrap_or_else(|| "None".into()),
            ),
            ("runCount", self.run_count.to_string()),
            ("passCount", self.pass_count.to_string()),
            ("failCount", self.fail_count.to_string()),
            ("startTime", self.start_time.to_string()),
            ("finishTime", self.finish_time.to_string()),
            ("uploadState", self.upload_state.clone()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SaveStore {
    db_path: PathBuf,
}

impl SaveStore {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db::saves_db_path(&results_dir.into()),
        }
    }

    fn connect(&self) -> Result<rusqlite::Connection, RunnerError> {
        let conn = db::db_connect(&self.db_path)?;
        conn.execute(db::SAVES_DB_SCHEMA, [])?;
        Ok(conn)
    }

    /// Inserts or replaces the save named after the snapshot's run id.
    pub fn save(&self, snap: &RunSnapshot) -> Result<(), RunnerError> {
        let conn = self.connect()?;
        let summary = serde_json::to_string(&SaveSummary::from_snapshot(snap))?;
        let body = serde_json::to_string(snap)?;
        conn.execute(
            "INSERT INTO saves (name, suite_module, summary_json, snapshot_json, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                summary_json = excluded.summary_json,
                snapshot_json = excluded.snapshot_json,
                saved_at = excluded.saved_at",
            params![
                snap.run_id,
                snap.suite.module,
                summary,
                body,
                time::now_epoch() as i64
            ],
        )?;
        Ok(())
    }

    /// Saves ordered by name.
    pub fn list(&self) -> Result<Vec<(String, SaveSummary)>, RunnerError> {
        if !self.db_path.exists() {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT name, summary_json FROM saves ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (name, json) = row?;
            out.push((name, serde_json::from_str(&json)?));
        }
        Ok(out)
    }

    pub fn load(&self, name: &str) -> Result<RunSnapshot, RunnerError> {
        let missing = || RunnerError::client(format!("no saved state named '{name}'"));
        if !self.db_path.exists() {
            return Err(missing());
        }
        let conn = self.connect()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM saves WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let body = body.ok_or_else(missing)?;
        Ok(serde_json::from_str(&body)?)
    }
}
