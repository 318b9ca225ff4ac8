//! SQLite-backed job queue
//!
//! Jobs live in the `jobs` table; reservation flips state under the
//! connection mutex, so two workers can never reserve the same job. DLQ
//! rows are keyed by job id, which makes the move-to-DLQ transition
//! exactly-once: the insert and the delete run in one transaction.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{JobQueue, JobState};
use crate::models::{DlqEntry, FailureKind, JobOrigin, ScrapeJob};
use crate::storage::{parse_ts, ts, Database};
use crate::utils::error::QueueError;

fn parse_time(s: &str) -> Result<chrono::DateTime<Utc>, QueueError> {
    parse_ts(s, "jobs").map_err(|e| QueueError::Corrupt(e.to_string()))
}

const JOB_COLUMNS: &str = "id, tracker_id, product_id, url, allow_browser_fallback, attempt, \
     max_attempts, origin, enqueued_at, not_before";

fn job_row(row: &Row) -> rusqlite::Result<(String, String, String, String, bool, u32, u32, String, String, Option<String>)>
{
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn job_from_raw(
    raw: (String, String, String, String, bool, u32, u32, String, String, Option<String>),
) -> Result<ScrapeJob, QueueError> {
    let parse_id = |s: &str| {
        Uuid::parse_str(s).map_err(|e| QueueError::Corrupt(format!("bad uuid {s:?}: {e}")))
    };
    Ok(ScrapeJob {
        id: parse_id(&raw.0)?,
        tracker_id: parse_id(&raw.1)?,
        product_id: parse_id(&raw.2)?,
        url: raw.3,
        allow_browser_fallback: raw.4,
        attempt: raw.5,
        max_attempts: raw.6,
        origin: JobOrigin::parse(&raw.7)
            .ok_or_else(|| QueueError::Corrupt(format!("bad origin {:?}", raw.7)))?,
        enqueued_at: parse_time(&raw.8)?,
        not_before: raw
            .9
            .map(|t| parse_time(&t)).transpose()?,
    })
}

/// Durable queue over the shared SQLite database
pub struct SqliteJobQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobQueue {
    pub fn new(db: &Database) -> Self {
        Self { conn: db.conn() }
    }
}

impl JobQueue for SqliteJobQueue {
    fn enqueue(&self, job: &ScrapeJob) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (id, tracker_id, product_id, url, allow_browser_fallback,
                               attempt, max_attempts, origin, state, enqueued_at, not_before)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'ready', ?9, ?10)",
            params![
                job.id.to_string(),
                job.tracker_id.to_string(),
                job.product_id.to_string(),
                job.url,
                job.allow_browser_fallback,
                job.attempt,
                job.max_attempts,
                job.origin.as_str(),
                ts(job.enqueued_at),
                job.not_before.map(ts),
            ],
        )?;
        Ok(())
    }

    fn reserve(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<ScrapeJob>, QueueError> {
        let now = Utc::now();
        let now_s = ts(now);
        let conn = self.conn.lock().unwrap();

        // Oldest visible job: ready past its delay, or a reservation that
        // expired without an ack (crash safety)
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE (state = 'ready' AND (not_before IS NULL OR not_before <= ?1))
                        OR (state = 'reserved' AND reserved_until <= ?1)
                     ORDER BY enqueued_at, id LIMIT 1"
                ),
                params![now_s],
                job_row,
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let job = job_from_raw(raw)?;

        let reserved_until = now
            + chrono::Duration::from_std(visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        conn.execute(
            "UPDATE jobs SET state = ?1, reserved_by = ?2, reserved_until = ?3 WHERE id = ?4",
            params![
                JobState::Reserved.as_str(),
                worker_id,
                ts(reserved_until),
                job.id.to_string()
            ],
        )?;

        Ok(Some(job))
    }

    fn ack(&self, job_id: Uuid) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM jobs WHERE id = ?1", params![job_id.to_string()])?;
        if deleted == 0 {
            return Err(QueueError::JobNotFound(job_id));
        }
        Ok(())
    }

    fn nack(&self, job_id: Uuid, next_delay: Duration) -> Result<(), QueueError> {
        let not_before = Utc::now()
            + chrono::Duration::from_std(next_delay).unwrap_or_else(|_| chrono::Duration::zero());
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE jobs SET state = 'ready', attempt = attempt + 1, origin = ?1,
                             not_before = ?2, reserved_by = NULL, reserved_until = NULL
             WHERE id = ?3",
            params![
                JobOrigin::Retry.as_str(),
                ts(not_before),
                job_id.to_string()
            ],
        )?;
        if updated == 0 {
            return Err(QueueError::JobNotFound(job_id));
        }
        Ok(())
    }

    fn move_to_dlq(
        &self,
        job_id: Uuid,
        kind: FailureKind,
        detail: &str,
    ) -> Result<(), QueueError> {
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction()?;

        let raw = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id.to_string()],
                job_row,
            )
            .optional()?;
        let Some(raw) = raw else {
            return Err(QueueError::JobNotFound(job_id));
        };
        let job = job_from_raw(raw)?;

        tx.execute(
            "INSERT INTO dlq (job_id, tracker_id, product_id, url, kind, detail, attempts, failed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.id.to_string(),
                job.tracker_id.to_string(),
                job.product_id.to_string(),
                job.url,
                kind.as_str(),
                detail,
                job.attempt,
                ts(Utc::now()),
            ],
        )?;
        tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id.to_string()])?;
        tx.commit()?;
        Ok(())
    }

    fn depth(&self) -> Result<u64, QueueError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn dlq_depth(&self) -> Result<u64, QueueError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dlq", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn dlq_entries(&self, limit: usize) -> Result<Vec<DlqEntry>, QueueError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_id, tracker_id, product_id, url, kind, detail, attempts, failed_at
             FROM dlq ORDER BY failed_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, u32>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|raw| {
                let parse_id = |s: &str| {
                    Uuid::parse_str(s)
                        .map_err(|e| QueueError::Corrupt(format!("bad uuid {s:?}: {e}")))
                };
                Ok(DlqEntry {
                    job_id: parse_id(&raw.0)?,
                    tracker_id: parse_id(&raw.1)?,
                    product_id: parse_id(&raw.2)?,
                    url: raw.3,
                    kind: FailureKind::parse(&raw.4)
                        .ok_or_else(|| QueueError::Corrupt(format!("bad kind {:?}", raw.4)))?,
                    detail: raw.5,
                    attempts: raw.6,
                    failed_at: parse_time(&raw.7)?,
                })
            })
            .collect()
    }
}
