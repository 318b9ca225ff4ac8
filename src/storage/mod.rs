//! Durable persistence for trackers, price history, products, rules,
//! the job queue, and the scrape audit log
//!
//! One SQLite database holds every collection; access goes through the
//! repository traits in [`repository`] so business logic never sees raw
//! rows. The SQLite-backed implementations live in [`sqlite`], in-memory
//! implementations (used by tests and embedded runs) next to the traits.

pub mod repository;
pub mod sqlite;

pub use repository::{
    AuditLog, MemoryAuditLog, MemoryPriceHistoryStore, MemoryProductRepository,
    MemoryRuleRepository, MemoryTrackerStore, PriceHistoryStore, ProductRepository,
    RuleRepository, TrackerStore,
};
pub use sqlite::{
    SqliteAuditLog, SqlitePriceHistoryStore, SqliteProductRepository, SqliteRuleRepository,
    SqliteTrackerStore,
};

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::utils::error::StoreError;

/// Shared handle to the SQLite database
///
/// All stores clone the same connection handle; statements are short-lived
/// and run under the mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (and migrate) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Corrupt {
                    table: "database",
                    detail: format!("cannot create {}: {e}", parent.display()),
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        Self::create_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests and ephemeral runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn create_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trackers (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                competitor_name TEXT NOT NULL,
                raw_url TEXT NOT NULL,
                canonical_url TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                last_price TEXT,
                last_currency TEXT,
                last_checked_at TEXT,
                last_status TEXT NOT NULL DEFAULT 'new',
                failure_streak INTEGER NOT NULL DEFAULT 0,
                check_interval_secs INTEGER,
                in_flight_until TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_trackers_product_url
                ON trackers(product_id, canonical_url);

            CREATE TABLE IF NOT EXISTS price_history (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                tracker_id TEXT NOT NULL,
                competitor_name TEXT NOT NULL,
                price TEXT NOT NULL,
                currency TEXT NOT NULL,
                captured_at TEXT NOT NULL,
                source TEXT NOT NULL,
                adapter_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_tracker_time
                ON price_history(tracker_id, captured_at);
            CREATE INDEX IF NOT EXISTS idx_history_product_time
                ON price_history(product_id, captured_at);

            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                sku TEXT,
                category TEXT,
                cost TEXT,
                current_price TEXT NOT NULL,
                stock INTEGER,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS pricing_rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                rule_type TEXT NOT NULL,
                product_id TEXT,
                category TEXT,
                adjustment_pct TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                priority INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                tracker_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                url TEXT NOT NULL,
                allow_browser_fallback INTEGER NOT NULL,
                attempt INTEGER NOT NULL,
                max_attempts INTEGER NOT NULL,
                origin TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'ready',
                enqueued_at TEXT NOT NULL,
                not_before TEXT,
                reserved_by TEXT,
                reserved_until TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_state_time
                ON jobs(state, not_before, enqueued_at);

            CREATE TABLE IF NOT EXISTS dlq (
                job_id TEXT PRIMARY KEY,
                tracker_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                url TEXT NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                failed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scrape_audit (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                host TEXT NOT NULL,
                tracker_id TEXT,
                product_id TEXT,
                status TEXT NOT NULL,
                kind TEXT,
                detail TEXT,
                attempt INTEGER NOT NULL,
                elapsed_ms INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_time ON scrape_audit(recorded_at);",
        )
    }
}

/// Fixed-width RFC 3339 timestamp; lexicographic order equals time order
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str, table: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            detail: format!("bad timestamp {s:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let guard = conn.lock().unwrap();
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
                 ('trackers','price_history','products','pricing_rules','jobs','dlq','scrape_audit')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 7);
    }

    #[test]
    fn test_timestamp_roundtrip_and_ordering() {
        // Microsecond precision survives the roundtrip
        let earlier = parse_ts("2026-03-01T10:20:30.123456Z", "test").unwrap();
        let later = earlier + chrono::Duration::microseconds(1500);

        assert!(ts(earlier) < ts(later));
        assert_eq!(parse_ts(&ts(earlier), "test").unwrap(), earlier);
        assert_eq!(parse_ts(&ts(later), "test").unwrap(), later);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data.db");
        let db = Database::open(&path);
        assert!(db.is_ok());
        assert!(path.exists());
    }
}
