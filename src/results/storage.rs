//! Resume state storage
//!
//! Records, per session, which items must be rerun. Backed by SQLite.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{ItemId, SessionResults};

/// Resume store errors
#[derive(Error, Debug)]
pub enum ResumeError {
    #[error("Nothing to resume: {0}")]
    NotFound(String),

    #[error("Resume database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Failed to prepare resume database directory: {0}")]
    Io(#[from] std::io::Error),
}

pub type ResumeResult<T> = std::result::Result<T, ResumeError>;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS session_metadata (
    session_id TEXT PRIMARY KEY,
    source_folder TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS resume_state (
    id INTEGER PRIMARY KEY,
    session_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    function_name TEXT NOT NULL,
    variation_id TEXT NOT NULL,
    needs_rerun INTEGER NOT NULL,
    FOREIGN KEY (session_id) REFERENCES session_metadata(session_id)
);
CREATE INDEX IF NOT EXISTS idx_resume_state_session ON resume_state(session_id);
CREATE INDEX IF NOT EXISTS idx_session_metadata_folder ON session_metadata(source_folder);
"#;

/// One stored session, as listed by `sessions`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredSession {
    pub session_id: String,
    pub source_folder: String,
    pub created_at: DateTime<Utc>,
    pub rerun_count: usize,
}

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Handle on the resume database
pub struct ResumeStore {
    conn: Connection,
}

impl ResumeStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> ResumeResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!("Opened resume database {}", path.display());
        Self::init(conn)
    }

    /// Database that lives only as long as the handle
    #[cfg(test)]
    pub fn in_memory() -> ResumeResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Default database location under the user data directory
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("testfleet")
            .join("resume_state.db")
    }

    fn init(conn: Connection) -> ResumeResult<Self> {
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self { conn })
    }

    /// Record a finished session in one transaction
    pub fn save(
        &mut self,
        source_folder: &str,
        results: &SessionResults,
    ) -> ResumeResult<()> {
        self.save_at(source_folder, results, Utc::now())
    }

    fn save_at(
        &mut self,
        source_folder: &str,
        results: &SessionResults,
        created_at: DateTime<Utc>,
    ) -> ResumeResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO session_metadata (session_id, source_folder, created_at) VALUES (?1, ?2, ?3)",
            params![results.session_id, source_folder, timestamp(created_at)],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO resume_state (session_id, file_path, function_name, variation_id, needs_rerun)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in &results.records {
                stmt.execute(params![
                    results.session_id,
                    record.id.path,
                    record.id.function,
                    record.id.variation,
                    record.needs_rerun(),
                ])?;
            }
        }
        tx.commit()?;

        info!(
            "Saved resume state for session {} ({} to rerun)",
            results.session_id,
            results.rerun_count()
        );
        Ok(())
    }

    /// Newest session recorded for `source_folder`
    pub fn latest_session_for(&self, source_folder: &str) -> ResumeResult<String> {
        self.conn
            .query_row(
                "SELECT session_id FROM session_metadata WHERE source_folder = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![source_folder],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| ResumeError::NotFound(format!("no sessions found for {source_folder}")))
    }

    /// Items of `session_id` that must be rerun, in recorded order
    pub fn rerun_items(&self, session_id: &str) -> ResumeResult<Vec<ItemId>> {
        let known: Option<String> = self
            .conn
            .query_row(
                "SELECT session_id FROM session_metadata WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Err(ResumeError::NotFound(format!(
                "no resume data for session {session_id}"
            )));
        }

        let mut stmt = self.conn.prepare(
            "SELECT file_path, function_name, variation_id FROM resume_state
             WHERE session_id = ?1 AND needs_rerun = 1 ORDER BY id",
        )?;
        let items = stmt
            .query_map(params![session_id], |row| {
                Ok(ItemId {
                    path: row.get(0)?,
                    function: row.get(1)?,
                    variation: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Delete sessions created before `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> ResumeResult<usize> {
        let cutoff = timestamp(cutoff);
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM resume_state WHERE session_id IN
             (SELECT session_id FROM session_metadata WHERE created_at < ?1)",
            params![cutoff],
        )?;
        let removed = tx.execute(
            "DELETE FROM session_metadata WHERE created_at < ?1",
            params![cutoff],
        )?;
        tx.commit()?;

        if removed > 0 {
            debug!("Pruned {} old sessions", removed);
        }
        Ok(removed)
    }

    /// Sessions, newest first, optionally limited to one folder
    pub fn list_sessions(&self, source_folder: Option<&str>) -> ResumeResult<Vec<StoredSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.session_id, m.source_folder, m.created_at,
                    COALESCE(SUM(r.needs_rerun), 0)
             FROM session_metadata m
             LEFT JOIN resume_state r ON r.session_id = m.session_id
             WHERE ?1 IS NULL OR m.source_folder = ?1
             GROUP BY m.session_id
             ORDER BY m.created_at DESC, m.rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![source_folder], |row| {
                let created_at: String = row.get(2)?;
                let rerun_count: i64 = row.get(3)?;
                Ok((row.get(0)?, row.get(1)?, created_at, rerun_count))
            })?
            .collect::<Result<Vec<(String, String, String, i64)>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(session_id, source_folder, created_at, rerun_count)| StoredSession {
                session_id,
                source_folder,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
                rerun_count: rerun_count.max(0) as usize,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemResult;
    use chrono::Duration;
    use serde_json::json;

    fn ids(n: usize) -> Vec<ItemId> {
        (0..n)
            .map(|i| ItemId::new("suite.py", format!("test_{i}"), ""))
            .collect()
    }

    /// success, failure, never run
    fn mixed_session(session_id: &str) -> SessionResults {
        let mut results = SessionResults::new(session_id, ids(3));
        results.record(0, ItemResult::success(1));
        results.record(1, ItemResult::failure(1, json!({"message": "bad"})));
        results
    }

    #[test]
    fn test_round_trip_keeps_rerun_items_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("resume.db");

        {
            let mut store = ResumeStore::open(&path).unwrap();
            store.save("/src/project", &mixed_session("s1")).unwrap();
        }

        let store = ResumeStore::open(&path).unwrap();
        assert_eq!(store.latest_session_for("/src/project").unwrap(), "s1");
        let rerun = store.rerun_items("s1").unwrap();
        assert_eq!(rerun, vec![ids(3)[1].clone(), ids(3)[2].clone()]);
    }

    #[test]
    fn test_latest_of_two_saves() {
        let mut store = ResumeStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .save_at("/src", &mixed_session("older"), now - Duration::minutes(5))
            .unwrap();
        store.save_at("/src", &mixed_session("newer"), now).unwrap();

        assert_eq!(store.latest_session_for("/src").unwrap(), "newer");
    }

    #[test]
    fn test_same_timestamp_prefers_later_insert() {
        let mut store = ResumeStore::in_memory().unwrap();
        let now = Utc::now();
        store.save_at("/src", &mixed_session("first"), now).unwrap();
        store.save_at("/src", &mixed_session("second"), now).unwrap();

        assert_eq!(store.latest_session_for("/src").unwrap(), "second");
    }

    #[test]
    fn test_not_found_vs_nothing_to_rerun() {
        let mut store = ResumeStore::in_memory().unwrap();

        let mut clean = SessionResults::new("clean", ids(2));
        clean.record(0, ItemResult::success(1));
        clean.record(1, ItemResult::skip("later"));
        store.save("/src", &clean).unwrap();

        assert!(store.rerun_items("clean").unwrap().is_empty());
        assert!(matches!(
            store.rerun_items("missing"),
            Err(ResumeError::NotFound(_))
        ));
        assert!(matches!(
            store.latest_session_for("/elsewhere"),
            Err(ResumeError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_session_is_storage_error() {
        let mut store = ResumeStore::in_memory().unwrap();
        store.save("/src", &mixed_session("dup")).unwrap();

        let err = store.save("/src", &mixed_session("dup")).unwrap_err();
        assert!(matches!(err, ResumeError::Storage(_)));
        // the failed transaction left no extra rows behind
        assert_eq!(store.rerun_items("dup").unwrap().len(), 2);
    }

    #[test]
    fn test_prune_and_list() {
        let mut store = ResumeStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .save_at("/a", &mixed_session("old"), now - Duration::days(40))
            .unwrap();
        store.save_at("/a", &mixed_session("recent"), now).unwrap();
        store.save_at("/b", &mixed_session("other"), now).unwrap();

        let removed = store.prune_older_than(now - Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(matches!(
            store.rerun_items("old"),
            Err(ResumeError::NotFound(_))
        ));

        let listed = store.list_sessions(Some("/a")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, "recent");
        assert_eq!(listed[0].rerun_count, 2);

        assert_eq!(store.list_sessions(None).unwrap().len(), 2);
    }
}
