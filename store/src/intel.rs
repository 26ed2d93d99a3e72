// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Local threat-indicator table.
//!
//! Indicators are unique by `(type, value)`. A successful lookup counts
//! the hit in the same transaction as the match test; expired indicators
//! deactivate on touch and never match.

use crate::alerts::StoreError;
use crate::db::{open_file, open_memory, ts_from_sql, ts_to_sql};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use tracing::{info, warn};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS threat_indicators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    indicator_type TEXT NOT NULL,
    indicator_value TEXT NOT NULL UNIQUE,
    severity TEXT NOT NULL,
    confidence REAL NOT NULL,
    source TEXT,
    description TEXT,
    tags TEXT,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    expires_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    false_positive INTEGER NOT NULL DEFAULT 0,
    hit_count INTEGER NOT NULL DEFAULT 0,
    last_hit TEXT
);
CREATE INDEX IF NOT EXISTS idx_indicators_type ON threat_indicators (indicator_type);
";

/// Kind of indicator value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorType {
    Ip,
    Mac,
    Domain,
    Hash,
    Url,
}

impl IndicatorType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorType::Ip => "ip",
            IndicatorType::Mac => "mac",
            IndicatorType::Domain => "domain",
            IndicatorType::Hash => "hash",
            IndicatorType::Url => "url",
        }
    }
}

impl Display for IndicatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IndicatorType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(IndicatorType::Ip),
            "mac" => Ok(IndicatorType::Mac),
            "domain" => Ok(IndicatorType::Domain),
            "hash" => Ok(IndicatorType::Hash),
            "url" => Ok(IndicatorType::Url),
            other => Err(StoreError::Corrupt(format!("bad indicator type '{other}'"))),
        }
    }
}

/// Severity label for an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorSeverity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl IndicatorSeverity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorSeverity::Critical => "critical",
            IndicatorSeverity::High => "high",
            IndicatorSeverity::Medium => "medium",
            IndicatorSeverity::Low => "low",
            IndicatorSeverity::Info => "info",
        }
    }
}

impl Display for IndicatorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IndicatorSeverity {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(IndicatorSeverity::Critical),
            "high" => Ok(IndicatorSeverity::High),
            "medium" => Ok(IndicatorSeverity::Medium),
            "low" => Ok(IndicatorSeverity::Low),
            "info" => Ok(IndicatorSeverity::Info),
            other => Err(StoreError::Corrupt(format!("bad severity '{other}'"))),
        }
    }
}

/// A durable indicator row, hydrated.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ThreatIndicator {
    pub id: i64,
    pub indicator_type: IndicatorType,
    pub indicator_value: String,
    pub severity: IndicatorSeverity,
    pub confidence: f64,
    pub source: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub false_positive: bool,
    pub hit_count: i64,
    pub last_hit: Option<DateTime<Utc>>,
}

/// Creation request.
#[derive(Debug, Clone)]
pub struct NewIndicator {
    pub indicator_type: IndicatorType,
    pub indicator_value: String,
    pub severity: IndicatorSeverity,
    pub confidence: f64,
    pub source: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Auto-expire after this many hours.
    pub ttl_hours: Option<i64>,
}

impl NewIndicator {
    #[must_use]
    pub fn new(indicator_type: IndicatorType, value: &str) -> Self {
        NewIndicator {
            indicator_type,
            indicator_value: value.to_owned(),
            severity: IndicatorSeverity::Medium,
            confidence: 0.5,
            source: None,
            description: None,
            tags: Vec::new(),
            ttl_hours: None,
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct IndicatorUpdate {
    pub severity: Option<IndicatorSeverity>,
    pub confidence: Option<f64>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub false_positive: Option<bool>,
}

/// Aggregate counters over the indicator table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ThreatIntelStats {
    pub total: i64,
    pub active: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_severity: BTreeMap<String, i64>,
    pub total_hits: i64,
}

/// The indicator store.
pub struct ThreatIntelStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = "id, indicator_type, indicator_value, severity, confidence, source,
    description, tags, first_seen, last_seen, expires_at, is_active, false_positive, hit_count, last_hit";

type RawIndicatorRow = (
    i64,
    String,
    String,
    String,
    f64,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    bool,
    bool,
    i64,
    Option<String>,
);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawIndicatorRow> {
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
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
    ))
}

fn hydrate(raw: RawIndicatorRow) -> Result<ThreatIndicator, StoreError> {
    let (
        id,
        indicator_type,
        indicator_value,
        severity,
        confidence,
        source,
        description,
        tags,
        first_seen,
        last_seen,
        expires_at,
        is_active,
        false_positive,
        hit_count,
        last_hit,
    ) = raw;
    Ok(ThreatIndicator {
        id,
        indicator_type: indicator_type.parse()?,
        indicator_value,
        severity: severity.parse()?,
        confidence,
        source,
        description,
        tags: tags
            .map(|text| {
                text.split(',')
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        first_seen: ts_from_sql(&first_seen)
            .ok_or_else(|| StoreError::Corrupt(format!("indicator {id}: bad first_seen")))?,
        last_seen: ts_from_sql(&last_seen)
            .ok_or_else(|| StoreError::Corrupt(format!("indicator {id}: bad last_seen")))?,
        expires_at: expires_at.as_deref().and_then(ts_from_sql),
        is_active,
        false_positive,
        hit_count,
        last_hit: last_hit.as_deref().and_then(ts_from_sql),
    })
}

impl ThreatIntelStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = open_file(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!("threat intel store open at {}", path.display());
        Ok(ThreatIntelStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = open_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(ThreatIntelStore {
            conn: Mutex::new(conn),
        })
    }

    /// Insert an indicator, or refresh `last_seen` when the value already
    /// exists. Returns the stored row.
    pub fn add(&self, new: &NewIndicator) -> Result<ThreatIndicator, StoreError> {
        let now = Utc::now();
        let id = {
            let conn = self.conn.lock();
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM threat_indicators WHERE indicator_value = ?1",
                    [&new.indicator_value],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                warn!(value = %new.indicator_value, "indicator already exists, refreshing last_seen");
                conn.execute(
                    "UPDATE threat_indicators SET last_seen = ?1 WHERE id = ?2",
                    params![ts_to_sql(now), id],
                )?;
                id
            } else {
                let expires_at = new
                    .ttl_hours
                    .map(|hours| ts_to_sql(now + Duration::hours(hours)));
                conn.execute(
                    "INSERT INTO threat_indicators
                     (indicator_type, indicator_value, severity, confidence, source, description,
                      tags, first_seen, last_seen, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        new.indicator_type.as_str(),
                        new.indicator_value,
                        new.severity.as_str(),
                        new.confidence,
                        new.source,
                        new.description,
                        if new.tags.is_empty() { None } else { Some(new.tags.join(",")) },
                        ts_to_sql(now),
                        ts_to_sql(now),
                        expires_at,
                    ],
                )?;
                conn.last_insert_rowid()
            }
        };
        #[allow(clippy::unwrap_used)] // the row was just written
        Ok(self.get(id)?.unwrap())
    }

    pub fn get(&self, id: i64) -> Result<Option<ThreatIndicator>, StoreError> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM threat_indicators WHERE id = ?1"),
                [id],
                read_row,
            )
            .optional()?
        };
        raw.map(hydrate).transpose()
    }

    /// Match a value against active, non-false-positive indicators.
    ///
    /// A hit increments `hit_count` and stamps `last_hit` in the same
    /// transaction; an expired indicator is deactivated and misses.
    pub fn search_and_hit(&self, value: &str) -> Result<Option<ThreatIndicator>, StoreError> {
        let now = Utc::now();
        let hit = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let raw = tx
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM threat_indicators
                         WHERE indicator_value = ?1 AND is_active = 1 AND false_positive = 0"
                    ),
                    [value],
                    read_row,
                )
                .optional()?;
            let matched = match raw {
                None => None,
                Some(raw) => {
                    let expired = raw
                        .10
                        .as_deref()
                        .and_then(ts_from_sql)
                        .is_some_and(|expires| expires < now);
                    if expired {
                        info!(value, "indicator expired, deactivating");
                        tx.execute(
                            "UPDATE threat_indicators SET is_active = 0 WHERE id = ?1",
                            [raw.0],
                        )?;
                        None
                    } else {
                        tx.execute(
                            "UPDATE threat_indicators
                             SET hit_count = hit_count + 1, last_hit = ?1 WHERE id = ?2",
                            params![ts_to_sql(now), raw.0],
                        )?;
                        Some(raw.0)
                    }
                }
            };
            tx.commit()?;
            matched
        };
        match hit {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    /// List indicators with optional filters, unexpired only, most
    /// recently seen first.
    pub fn list(
        &self,
        indicator_type: Option<IndicatorType>,
        severity: Option<IndicatorSeverity>,
        is_active: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ThreatIndicator>, StoreError> {
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM threat_indicators
             WHERE is_active = ?1 AND (expires_at IS NULL OR expires_at > ?2)"
        );
        let now = ts_to_sql(Utc::now());
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(is_active), Box::new(now)];
        if let Some(kind) = indicator_type {
            params_vec.push(Box::new(kind.as_str()));
            sql.push_str(&format!(" AND indicator_type = ?{}", params_vec.len()));
        }
        if let Some(level) = severity {
            params_vec.push(Box::new(level.as_str()));
            sql.push_str(&format!(" AND severity = ?{}", params_vec.len()));
        }
        #[allow(clippy::cast_possible_wrap)]
        params_vec.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY last_seen DESC LIMIT ?{}", params_vec.len()));
        #[allow(clippy::cast_possible_wrap)]
        params_vec.push(Box::new(offset as i64));
        sql.push_str(&format!(" OFFSET ?{}", params_vec.len()));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params_vec.iter().map(AsRef::as_ref)),
            read_row,
        )?;
        let mut indicators = Vec::new();
        for row in rows {
            indicators.push(hydrate(row?)?);
        }
        Ok(indicators)
    }

    /// Apply a partial update. Returns the updated row, or `None` when
    /// the id is unknown.
    pub fn update(
        &self,
        id: i64,
        update: &IndicatorUpdate,
    ) -> Result<Option<ThreatIndicator>, StoreError> {
        {
            let conn = self.conn.lock();
            let mut sets: Vec<String> = Vec::new();
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(severity) = update.severity {
                params_vec.push(Box::new(severity.as_str()));
                sets.push(format!("severity = ?{}", params_vec.len()));
            }
            if let Some(confidence) = update.confidence {
                params_vec.push(Box::new(confidence));
                sets.push(format!("confidence = ?{}", params_vec.len()));
            }
            if let Some(description) = &update.description {
                params_vec.push(Box::new(description.clone()));
                sets.push(format!("description = ?{}", params_vec.len()));
            }
            if let Some(tags) = &update.tags {
                params_vec.push(Box::new(if tags.is_empty() {
                    None
                } else {
                    Some(tags.join(","))
                }));
                sets.push(format!("tags = ?{}", params_vec.len()));
            }
            if let Some(is_active) = update.is_active {
                params_vec.push(Box::new(is_active));
                sets.push(format!("is_active = ?{}", params_vec.len()));
            }
            if let Some(false_positive) = update.false_positive {
                params_vec.push(Box::new(false_positive));
                sets.push(format!("false_positive = ?{}", params_vec.len()));
            }
            if sets.is_empty() {
                return self.get(id);
            }
            params_vec.push(Box::new(ts_to_sql(Utc::now())));
            sets.push(format!("last_seen = ?{}", params_vec.len()));
            params_vec.push(Box::new(id));
            let sql = format!(
                "UPDATE threat_indicators SET {} WHERE id = ?{}",
                sets.join(", "),
                params_vec.len()
            );
            conn.execute(
                &sql,
                rusqlite::params_from_iter(params_vec.iter().map(AsRef::as_ref)),
            )?;
        }
        self.get(id)
    }

    /// Delete an indicator. Returns false when the id is unknown.
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM threat_indicators WHERE id = ?1", [id])?
        };
        Ok(deleted > 0)
    }

    /// Import a batch; returns `(added, failed)`.
    pub fn bulk_import(&self, indicators: &[NewIndicator]) -> (usize, usize) {
        let mut added = 0;
        let mut failed = 0;
        for indicator in indicators {
            match self.add(indicator) {
                Ok(_) => added += 1,
                Err(e) => {
                    warn!(value = %indicator.indicator_value, "import failed: {e}");
                    failed += 1;
                }
            }
        }
        info!("bulk import complete: {added} added, {failed} failed");
        (added, failed)
    }

    /// Hard-delete expired indicators.
    pub fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let removed = {
            let conn = self.conn.lock();
            conn.execute(
                "DELETE FROM threat_indicators WHERE expires_at IS NOT NULL AND expires_at < ?1",
                [ts_to_sql(Utc::now())],
            )?
        };
        if removed > 0 {
            info!("cleaned up {removed} expired indicators");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<ThreatIntelStats, StoreError> {
        let conn = self.conn.lock();
        let total: i64 =
            conn.query_row("SELECT COUNT(*) FROM threat_indicators", [], |row| row.get(0))?;
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM threat_indicators WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        let total_hits: i64 = conn.query_row(
            "SELECT COALESCE(SUM(hit_count), 0) FROM threat_indicators",
            [],
            |row| row.get(0),
        )?;
        let mut by_type = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT indicator_type, COUNT(*) FROM threat_indicators GROUP BY 1")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?;
            for row in rows {
                let (kind, count) = row?;
                by_type.insert(kind, count);
            }
        }
        let mut by_severity = BTreeMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT severity, COUNT(*) FROM threat_indicators GROUP BY 1")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?;
            for row in rows {
                let (severity, count) = row?;
                by_severity.insert(severity, count);
            }
        }
        Ok(ThreatIntelStats {
            total,
            active,
            by_type,
            by_severity,
            total_hits,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_is_upsert_on_value() {
        let store = ThreatIntelStore::open_in_memory().unwrap();
        let first = store
            .add(&NewIndicator::new(IndicatorType::Ip, "10.6.6.6"))
            .unwrap();
        let second = store
            .add(&NewIndicator::new(IndicatorType::Ip, "10.6.6.6"))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.last_seen >= first.last_seen);
        assert_eq!(store.stats().unwrap().total, 1);
    }

    // Property: a matching lookup counts the hit transactionally.
    #[test]
    fn search_hit_increments_counters() {
        let store = ThreatIntelStore::open_in_memory().unwrap();
        store
            .add(&NewIndicator::new(IndicatorType::Mac, "DE:AD:BE:EF:CA:FE"))
            .unwrap();
        let first = store.search_and_hit("DE:AD:BE:EF:CA:FE").unwrap().unwrap();
        assert_eq!(first.hit_count, 1);
        assert!(first.last_hit.is_some());
        let second = store.search_and_hit("DE:AD:BE:EF:CA:FE").unwrap().unwrap();
        assert_eq!(second.hit_count, 2);
        assert!(store.search_and_hit("absent").unwrap().is_none());
    }

    #[test]
    fn expired_indicator_misses_and_deactivates() {
        let store = ThreatIntelStore::open_in_memory().unwrap();
        let mut new = NewIndicator::new(IndicatorType::Ip, "10.9.9.9");
        new.ttl_hours = Some(-1); // already expired
        let created = store.add(&new).unwrap();
        assert!(store.search_and_hit("10.9.9.9").unwrap().is_none());
        let after = store.get(created.id).unwrap().unwrap();
        assert!(!after.is_active);
        assert_eq!(after.hit_count, 0);
    }

    #[test]
    fn false_positive_never_matches() {
        let store = ThreatIntelStore::open_in_memory().unwrap();
        let created = store
            .add(&NewIndicator::new(IndicatorType::Ip, "10.1.2.3"))
            .unwrap();
        store
            .update(
                created.id,
                &IndicatorUpdate {
                    false_positive: Some(true),
                    ..IndicatorUpdate::default()
                },
            )
            .unwrap();
        assert!(store.search_and_hit("10.1.2.3").unwrap().is_none());
    }

    #[test]
    fn list_filters_and_pages() {
        let store = ThreatIntelStore::open_in_memory().unwrap();
        for n in 0..5u8 {
            let mut new = NewIndicator::new(IndicatorType::Ip, &format!("10.0.0.{n}"));
            new.severity = if n % 2 == 0 {
                IndicatorSeverity::High
            } else {
                IndicatorSeverity::Low
            };
            store.add(&new).unwrap();
        }
        store
            .add(&NewIndicator::new(IndicatorType::Mac, "02:00:00:00:00:01"))
            .unwrap();
        let highs = store
            .list(Some(IndicatorType::Ip), Some(IndicatorSeverity::High), true, 100, 0)
            .unwrap();
        assert_eq!(highs.len(), 3);
        let paged = store.list(None, None, true, 2, 0).unwrap();
        assert_eq!(paged.len(), 2);
    }

    #[test]
    fn update_delete_cleanup() {
        let store = ThreatIntelStore::open_in_memory().unwrap();
        let created = store
            .add(&NewIndicator::new(IndicatorType::Domain, "evil.example"))
            .unwrap();
        let updated = store
            .update(
                created.id,
                &IndicatorUpdate {
                    severity: Some(IndicatorSeverity::Critical),
                    confidence: Some(0.9),
                    tags: Some(vec!["feed".to_owned(), "manual".to_owned()]),
                    ..IndicatorUpdate::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.severity, IndicatorSeverity::Critical);
        assert!((updated.confidence - 0.9).abs() < 1e-9);
        assert_eq!(updated.tags, vec!["feed", "manual"]);

        let mut expiring = NewIndicator::new(IndicatorType::Url, "http://bad.example");
        expiring.ttl_hours = Some(-2);
        store.add(&expiring).unwrap();
        assert_eq!(store.cleanup_expired().unwrap(), 1);

        assert!(store.delete(created.id).unwrap());
        assert!(!store.delete(created.id).unwrap());
    }
}
