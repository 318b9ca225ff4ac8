//! SQLite-backed store implementations
//!
//! Each store clones the shared [`Database`] connection handle and runs
//! short statements under its mutex. Domain rows are read as primitive
//! tuples and converted afterwards, so enum tags and decimals are validated
//! at the store boundary instead of leaking raw shapes upward.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::repository::{
    is_due, AuditLog, PriceHistoryStore, ProductRepository, RuleRepository, TrackerStore,
};
use super::{parse_ts, ts, Database};
use crate::models::{
    AuditRecord, AuditStatus, CompetitorTracker, FailureKind, FetchSource, NewTracker,
    PricePoint, PricingRule, Product, RuleStatus, RuleType, ScrapeSummary, TrackerStatus,
};
use crate::utils::error::StoreError;

fn parse_uuid(s: &str, table: &'static str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt {
        table,
        detail: format!("bad uuid {s:?}: {e}"),
    })
}

fn parse_decimal(s: &str, table: &'static str) -> Result<Decimal, StoreError> {
    Decimal::from_str(s).map_err(|e| StoreError::Corrupt {
        table,
        detail: format!("bad decimal {s:?}: {e}"),
    })
}

// ============================================================================
// Trackers
// ============================================================================

/// SQLite tracker store; uniqueness is enforced by a unique index on
/// `(product_id, canonical_url)`
pub struct SqliteTrackerStore {
    conn: Arc<Mutex<Connection>>,
}

struct TrackerRow {
    id: String,
    product_id: String,
    competitor_name: String,
    raw_url: String,
    canonical_url: String,
    active: bool,
    last_price: Option<String>,
    last_currency: Option<String>,
    last_checked_at: Option<String>,
    last_status: String,
    failure_streak: u32,
    check_interval_secs: Option<i64>,
    in_flight_until: Option<String>,
    version: i64,
    created_at: String,
}

const TRACKER_COLUMNS: &str = "id, product_id, competitor_name, raw_url, canonical_url, active, \
     last_price, last_currency, last_checked_at, last_status, failure_streak, \
     check_interval_secs, in_flight_until, version, created_at";

fn tracker_row(row: &Row) -> rusqlite::Result<TrackerRow> {
    Ok(TrackerRow {
        id: row.get(0)?,
        product_id: row.get(1)?,
        competitor_name: row.get(2)?,
        raw_url: row.get(3)?,
        canonical_url: row.get(4)?,
        active: row.get(5)?,
        last_price: row.get(6)?,
        last_currency: row.get(7)?,
        last_checked_at: row.get(8)?,
        last_status: row.get(9)?,
        failure_streak: row.get(10)?,
        check_interval_secs: row.get(11)?,
        in_flight_until: row.get(12)?,
        version: row.get(13)?,
        created_at: row.get(14)?,
    })
}

impl TrackerRow {
    fn into_domain(self) -> Result<CompetitorTracker, StoreError> {
        const T: &str = "trackers";
        Ok(CompetitorTracker {
            id: parse_uuid(&self.id, T)?,
            product_id: parse_uuid(&self.product_id, T)?,
            competitor_name: self.competitor_name,
            raw_url: self.raw_url,
            canonical_url: self.canonical_url,
            active: self.active,
            last_price: self
                .last_price
                .map(|p| parse_decimal(&p, T))
                .transpose()?,
            last_currency: self.last_currency,
            last_checked_at: self
                .last_checked_at
                .map(|t| parse_ts(&t, T))
                .transpose()?,
            last_status: TrackerStatus::parse(&self.last_status).ok_or(StoreError::Corrupt {
                table: T,
                detail: format!("bad status {:?}", self.last_status),
            })?,
            failure_streak: self.failure_streak,
            check_interval_secs: self.check_interval_secs.map(|v| v.max(0) as u64),
            in_flight_until: self
                .in_flight_until
                .map(|t| parse_ts(&t, T))
                .transpose()?,
            version: self.version,
            created_at: parse_ts(&self.created_at, T)?,
        })
    }
}

impl SqliteTrackerStore {
    pub fn new(db: &Database) -> Self {
        Self { conn: db.conn() }
    }

    fn get_by_key(
        conn: &Connection,
        product_id: Uuid,
        canonical_url: &str,
    ) -> Result<Option<CompetitorTracker>, StoreError> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {TRACKER_COLUMNS} FROM trackers
                     WHERE product_id = ?1 AND canonical_url = ?2"
                ),
                params![product_id.to_string(), canonical_url],
                tracker_row,
            )
            .optional()?;
        row.map(TrackerRow::into_domain).transpose()
    }

    fn get_by_id(conn: &Connection, id: Uuid) -> Result<Option<CompetitorTracker>, StoreError> {
        let row = conn
            .query_row(
                &format!("SELECT {TRACKER_COLUMNS} FROM trackers WHERE id = ?1"),
                params![id.to_string()],
                tracker_row,
            )
            .optional()?;
        row.map(TrackerRow::into_domain).transpose()
    }
}

impl TrackerStore for SqliteTrackerStore {
    fn create_or_get(&self, new: NewTracker) -> Result<(CompetitorTracker, bool), StoreError> {
        let conn = self.conn.lock().unwrap();

        let inserted = conn.execute(
            "INSERT INTO trackers (id, product_id, competitor_name, raw_url, canonical_url,
                                   active, last_status, failure_streak, check_interval_secs,
                                   version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'new', 0, ?7, 0, ?8)
             ON CONFLICT(product_id, canonical_url) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                new.product_id.to_string(),
                new.competitor_name,
                new.raw_url,
                new.canonical_url,
                new.active,
                new.check_interval_secs.map(|v| v as i64),
                ts(Utc::now()),
            ],
        )?;

        let tracker = Self::get_by_key(&conn, new.product_id, &new.canonical_url)?.ok_or(
            StoreError::Corrupt {
                table: "trackers",
                detail: "tracker vanished after insert".to_string(),
            },
        )?;
        Ok((tracker, inserted == 1))
    }

    fn get(&self, id: Uuid) -> Result<Option<CompetitorTracker>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::get_by_id(&conn, id)
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<CompetitorTracker>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers ORDER BY created_at, id LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], tracker_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(TrackerRow::into_domain)
            .collect()
    }

    fn for_product(&self, product_id: Uuid) -> Result<Vec<CompetitorTracker>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers
             WHERE product_id = ?1 AND active = 1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![product_id.to_string()], tracker_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(TrackerRow::into_domain)
            .collect()
    }

    fn list_due(
        &self,
        now: DateTime<Utc>,
        default_interval: Duration,
        limit: usize,
    ) -> Result<Vec<CompetitorTracker>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers
             WHERE active = 1 AND last_status != 'dead'
             ORDER BY last_checked_at IS NOT NULL, last_checked_at, id"
        ))?;
        let rows = stmt.query_map([], tracker_row)?;

        let mut due = Vec::new();
        for row in rows {
            let tracker = row?.into_domain()?;
            if is_due(&tracker, now, default_interval) {
                due.push(tracker);
                if due.len() >= limit {
                    break;
                }
            }
        }
        Ok(due)
    }

    fn mark_in_flight(&self, id: Uuid, until: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE trackers SET in_flight_until = ?1, version = version + 1
             WHERE id = ?2 AND (in_flight_until IS NULL OR in_flight_until <= ?3)",
            params![ts(until), id.to_string(), ts(Utc::now())],
        )?;
        if updated == 1 {
            return Ok(true);
        }
        if Self::get_by_id(&conn, id)?.is_none() {
            return Err(StoreError::NotFound(format!("tracker {id}")));
        }
        Ok(false)
    }

    fn update_after_scrape(
        &self,
        id: Uuid,
        summary: &ScrapeSummary,
    ) -> Result<CompetitorTracker, StoreError> {
        let conn = self.conn.lock().unwrap();
        let ok = summary.status == TrackerStatus::Ok;
        let updated = conn.execute(
            "UPDATE trackers SET
                last_checked_at = ?1,
                last_status = ?2,
                in_flight_until = NULL,
                last_price = CASE WHEN ?3 THEN ?4 ELSE last_price END,
                last_currency = CASE WHEN ?3 THEN ?5 ELSE last_currency END,
                failure_streak = CASE WHEN ?3 THEN 0 ELSE failure_streak + 1 END,
                version = version + 1
             WHERE id = ?6",
            params![
                ts(summary.checked_at),
                summary.status.as_str(),
                ok,
                summary.price.map(|p| p.to_string()),
                summary.currency,
                id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("tracker {id}")));
        }
        Self::get_by_id(&conn, id)?.ok_or(StoreError::NotFound(format!("tracker {id}")))
    }

    fn mark_dead(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE trackers SET last_status = 'dead', version = version + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("tracker {id}")));
        }
        Ok(())
    }

    fn revive(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE trackers SET last_status = 'new', failure_streak = 0, version = version + 1
             WHERE id = ?1",
            params![id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("tracker {id}")));
        }
        Ok(())
    }

    fn update_url(
        &self,
        id: Uuid,
        raw_url: &str,
        canonical_url: &str,
    ) -> Result<CompetitorTracker, StoreError> {
        let conn = self.conn.lock().unwrap();

        let tracker =
            Self::get_by_id(&conn, id)?.ok_or(StoreError::NotFound(format!("tracker {id}")))?;
        if let Some(existing) = Self::get_by_key(&conn, tracker.product_id, canonical_url)? {
            if existing.id != id {
                return Err(StoreError::Corrupt {
                    table: "trackers",
                    detail: format!("duplicate canonical URL {canonical_url} for product"),
                });
            }
        }

        conn.execute(
            "UPDATE trackers SET raw_url = ?1, canonical_url = ?2, version = version + 1
             WHERE id = ?3",
            params![raw_url, canonical_url, id.to_string()],
        )?;
        Self::get_by_id(&conn, id)?.ok_or(StoreError::NotFound(format!("tracker {id}")))
    }

    fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM trackers WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted == 1)
    }

    fn count_by_status(&self, status: TrackerStatus) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trackers WHERE last_status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

// ============================================================================
// Price history
// ============================================================================

/// Append-only SQLite price history
pub struct SqlitePriceHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

const POINT_COLUMNS: &str =
    "id, product_id, tracker_id, competitor_name, price, currency, captured_at, source, adapter_id";

fn point_row(row: &Row) -> rusqlite::Result<(String, String, String, String, String, String, String, String, String)>
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
    ))
}

fn point_from_raw(
    raw: (String, String, String, String, String, String, String, String, String),
) -> Result<PricePoint, StoreError> {
    const T: &str = "price_history";
    Ok(PricePoint {
        id: parse_uuid(&raw.0, T)?,
        product_id: parse_uuid(&raw.1, T)?,
        tracker_id: parse_uuid(&raw.2, T)?,
        competitor_name: raw.3,
        price: parse_decimal(&raw.4, T)?,
        currency: raw.5,
        captured_at: parse_ts(&raw.6, T)?,
        source: FetchSource::parse(&raw.7).ok_or(StoreError::Corrupt {
            table: T,
            detail: format!("bad source {:?}", raw.7),
        })?,
        adapter_id: raw.8,
    })
}

impl SqlitePriceHistoryStore {
    pub fn new(db: &Database) -> Self {
        Self { conn: db.conn() }
    }

    fn query_points(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, point_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(point_from_raw)
            .collect()
    }
}

impl PriceHistoryStore for SqlitePriceHistoryStore {
    fn append(&self, point: &PricePoint) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO price_history (id, product_id, tracker_id, competitor_name,
                                        price, currency, captured_at, source, adapter_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                point.id.to_string(),
                point.product_id.to_string(),
                point.tracker_id.to_string(),
                point.competitor_name,
                point.price.to_string(),
                point.currency,
                ts(point.captured_at),
                point.source.as_str(),
                point.adapter_id,
            ],
        )?;
        Ok(())
    }

    fn range(
        &self,
        tracker_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_points(
            &conn,
            &format!(
                "SELECT {POINT_COLUMNS} FROM price_history
                 WHERE tracker_id = ?1 AND captured_at >= ?2 AND captured_at <= ?3
                 ORDER BY captured_at ASC"
            ),
            params![tracker_id.to_string(), ts(from), ts(to)],
        )
    }

    fn latest(&self, tracker_id: Uuid) -> Result<Option<PricePoint>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {POINT_COLUMNS} FROM price_history
                     WHERE tracker_id = ?1 ORDER BY captured_at DESC LIMIT 1"
                ),
                params![tracker_id.to_string()],
                point_row,
            )
            .optional()?;
        raw.map(point_from_raw).transpose()
    }

    fn history_for_product(
        &self,
        product_id: Uuid,
        days: u32,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let conn = self.conn.lock().unwrap();
        Self::query_points(
            &conn,
            &format!(
                "SELECT {POINT_COLUMNS} FROM price_history
                 WHERE product_id = ?1 AND captured_at >= ?2
                 ORDER BY captured_at ASC"
            ),
            params![product_id.to_string(), ts(cutoff)],
        )
    }

    fn compact(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM price_history WHERE captured_at < ?1",
            params![ts(before)],
        )?;
        Ok(deleted as u64)
    }
}

// ============================================================================
// Products
// ============================================================================

/// SQLite mirror of the external product catalog
pub struct SqliteProductRepository {
    conn: Arc<Mutex<Connection>>,
}

fn product_row(
    row: &Row,
) -> rusqlite::Result<(String, String, Option<String>, Option<String>, Option<String>, String, Option<i64>, bool)>
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
    ))
}

fn product_from_raw(
    raw: (String, String, Option<String>, Option<String>, Option<String>, String, Option<i64>, bool),
) -> Result<Product, StoreError> {
    const T: &str = "products";
    Ok(Product {
        id: parse_uuid(&raw.0, T)?,
        name: raw.1,
        sku: raw.2,
        category: raw.3,
        cost: raw.4.map(|c| parse_decimal(&c, T)).transpose()?,
        current_price: parse_decimal(&raw.5, T)?,
        stock: raw.6,
        active: raw.7,
    })
}

impl SqliteProductRepository {
    pub fn new(db: &Database) -> Self {
        Self { conn: db.conn() }
    }
}

impl ProductRepository for SqliteProductRepository {
    fn get(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                "SELECT id, name, sku, category, cost, current_price, stock, active
                 FROM products WHERE id = ?1",
                params![id.to_string()],
                product_row,
            )
            .optional()?;
        raw.map(product_from_raw).transpose()
    }

    fn upsert(&self, product: &Product) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO products (id, name, sku, category, cost, current_price, stock, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                product.id.to_string(),
                product.name,
                product.sku,
                product.category,
                product.cost.map(|c| c.to_string()),
                product.current_price.to_string(),
                product.stock,
                product.active,
            ],
        )?;
        Ok(())
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Product>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, sku, category, cost, current_price, stock, active
             FROM products ORDER BY id LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], product_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(product_from_raw)
            .collect()
    }
}

// ============================================================================
// Pricing rules
// ============================================================================

/// SQLite rule store
pub struct SqliteRuleRepository {
    conn: Arc<Mutex<Connection>>,
}

fn rule_row(
    row: &Row,
) -> rusqlite::Result<(String, String, String, Option<String>, Option<String>, String, String, i32)>
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
    ))
}

fn rule_from_raw(
    raw: (String, String, String, Option<String>, Option<String>, String, String, i32),
) -> Result<PricingRule, StoreError> {
    const T: &str = "pricing_rules";
    Ok(PricingRule {
        id: parse_uuid(&raw.0, T)?,
        name: raw.1,
        rule_type: RuleType::parse(&raw.2).ok_or(StoreError::Corrupt {
            table: T,
            detail: format!("bad rule type {:?}", raw.2),
        })?,
        product_id: raw.3.map(|p| parse_uuid(&p, T)).transpose()?,
        category: raw.4,
        adjustment_pct: parse_decimal(&raw.5, T)?,
        status: RuleStatus::parse(&raw.6).ok_or(StoreError::Corrupt {
            table: T,
            detail: format!("bad rule status {:?}", raw.6),
        })?,
        priority: raw.7,
    })
}

impl SqliteRuleRepository {
    pub fn new(db: &Database) -> Self {
        Self { conn: db.conn() }
    }
}

impl RuleRepository for SqliteRuleRepository {
    fn create(&self, rule: &PricingRule) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pricing_rules (id, name, rule_type, product_id, category,
                                        adjustment_pct, status, priority)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                rule.id.to_string(),
                rule.name,
                rule.rule_type.as_str(),
                rule.product_id.map(|p| p.to_string()),
                rule.category,
                rule.adjustment_pct.to_string(),
                rule.status.as_str(),
                rule.priority,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<PricingRule>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                "SELECT id, name, rule_type, product_id, category, adjustment_pct, status, priority
                 FROM pricing_rules WHERE id = ?1",
                params![id.to_string()],
                rule_row,
            )
            .optional()?;
        raw.map(rule_from_raw).transpose()
    }

    fn list(&self) -> Result<Vec<PricingRule>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, rule_type, product_id, category, adjustment_pct, status, priority
             FROM pricing_rules ORDER BY id",
        )?;
        let rows = stmt.query_map([], rule_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(rule_from_raw)
            .collect()
    }

    fn update(&self, rule: &PricingRule) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE pricing_rules SET name = ?1, rule_type = ?2, product_id = ?3, category = ?4,
                                      adjustment_pct = ?5, status = ?6, priority = ?7
             WHERE id = ?8",
            params![
                rule.name,
                rule.rule_type.as_str(),
                rule.product_id.map(|p| p.to_string()),
                rule.category,
                rule.adjustment_pct.to_string(),
                rule.status.as_str(),
                rule.priority,
                rule.id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("rule {}", rule.id)));
        }
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM pricing_rules WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(deleted == 1)
    }
}

// ============================================================================
// Scrape audit log
// ============================================================================

/// SQLite-backed scrape execution trail
pub struct SqliteAuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditLog {
    pub fn new(db: &Database) -> Self {
        Self { conn: db.conn() }
    }
}

impl AuditLog for SqliteAuditLog {
    fn record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scrape_audit (id, url, host, tracker_id, product_id, status,
                                       kind, detail, attempt, elapsed_ms, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.to_string(),
                record.url,
                record.host,
                record.tracker_id.map(|t| t.to_string()),
                record.product_id.map(|p| p.to_string()),
                record.status.as_str(),
                record.kind.map(|k| k.as_str()),
                record.detail,
                record.attempt,
                record.elapsed_ms as i64,
                ts(record.recorded_at),
            ],
        )?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        const T: &str = "scrape_audit";
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, url, host, tracker_id, product_id, status, kind, detail,
                    attempt, elapsed_ms, recorded_at
             FROM scrape_audit ORDER BY recorded_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, u32>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, String>(10)?,
            ))
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|raw| {
                Ok(AuditRecord {
                    id: parse_uuid(&raw.0, T)?,
                    url: raw.1,
                    host: raw.2,
                    tracker_id: raw.3.map(|t| parse_uuid(&t, T)).transpose()?,
                    product_id: raw.4.map(|p| parse_uuid(&p, T)).transpose()?,
                    status: AuditStatus::parse(&raw.5).ok_or(StoreError::Corrupt {
                        table: T,
                        detail: format!("bad status {:?}", raw.5),
                    })?,
                    kind: raw
                        .6
                        .map(|k| {
                            FailureKind::parse(&k).ok_or(StoreError::Corrupt {
                                table: T,
                                detail: format!("bad kind {k:?}"),
                            })
                        })
                        .transpose()?,
                    detail: raw.7,
                    attempt: raw.8,
                    elapsed_ms: raw.9 as u64,
                    recorded_at: parse_ts(&raw.10, T)?,
                })
            })
            .collect()
    }
}
