//! SQLite persistence layer.
//!
//! RULE: Only the store module talks to the database.
//! Everything else calls the traits in `ports`, never SQL directly.

mod player;
mod session;
mod transaction;

use crate::{
    error::LedgerResult,
    event::{EventLogEntry, LedgerEvent},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection};
use std::time::Duration;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default time a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LedgerStore {
    conn: Connection,
    max_version_retries: u32,
}

impl LedgerStore {
    pub fn open(path: &str) -> LedgerResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open (or create) the ledger database at `path`. `busy_timeout` bounds
    /// how long any statement waits for another writer.
    pub fn open_with_timeout(path: &str, busy_timeout: Duration) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(Self {
            conn,
            max_version_retries: 5,
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            max_version_retries: 5,
        })
    }

    /// Attempts at an optimistic session write before giving up with a conflict.
    pub fn with_version_retries(mut self, attempts: u32) -> Self {
        self.max_version_retries = attempts.max(1);
        self
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub(crate) fn append_event(
        conn: &Connection,
        subject_id: &str,
        event: &LedgerEvent,
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        conn.execute(
            "INSERT INTO event_log (event_type, subject_id, payload, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.type_name(),
                subject_id,
                serde_json::to_string(event)?,
                at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_subject(&self, subject_id: &str) -> LedgerResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, subject_id, payload, created_at_ms
             FROM event_log WHERE subject_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![subject_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    event_type: row.get(1)?,
                    subject_id: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: from_millis(row.get(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self) -> LedgerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))?;
        Ok(count)
    }
}

// ── Column conversions ─────────────────────────────────────────

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn parse_date(raw: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| anyhow::anyhow!("bad stored date '{raw}': {e}").into())
}

pub(crate) fn parse_datetime(raw: &str) -> LedgerResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
        .map_err(|e| anyhow::anyhow!("bad stored timestamp '{raw}': {e}").into())
}
