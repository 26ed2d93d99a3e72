// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! The append-only alert log.

use crate::db::{open_file, open_memory, ts_from_sql, ts_to_sql};
use chrono::{DateTime, Utc};
use detect::{AlertModule, Detection};
use net::Mac;
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{info, warn};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    module TEXT NOT NULL,
    reason TEXT NOT NULL,
    src_ip TEXT,
    src_mac TEXT,
    details TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts (timestamp);
CREATE INDEX IF NOT EXISTS idx_alerts_src_ip ON alerts (src_ip);
CREATE TABLE IF NOT EXISTS archived_alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_id INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    module TEXT NOT NULL,
    reason TEXT NOT NULL,
    src_ip TEXT,
    src_mac TEXT,
    details TEXT NOT NULL DEFAULT '{}',
    archived_at TEXT NOT NULL,
    archive_reason TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_archived_alerts_archived_at ON archived_alerts (archived_at);
";

/// Errors from the persistent stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A durable alert. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Alert {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub module: AlertModule,
    pub reason: String,
    pub src_ip: Option<Ipv4Addr>,
    pub src_mac: Option<Mac>,
    pub details: Map<String, Value>,
}

/// An alert about to be inserted.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub module: AlertModule,
    pub reason: String,
    pub src_ip: Option<Ipv4Addr>,
    pub src_mac: Option<Mac>,
    pub details: Map<String, Value>,
}

impl From<Detection> for NewAlert {
    fn from(detection: Detection) -> Self {
        NewAlert {
            module: detection.module,
            reason: detection.reason,
            src_ip: detection.src_ip,
            src_mac: detection.src_mac,
            details: detection.details,
        }
    }
}

/// Counters over the active and archived tables.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertStoreStats {
    pub active_alerts: i64,
    pub archived_alerts: i64,
    pub total_alerts: i64,
    pub active_by_module: BTreeMap<String, i64>,
    pub oldest_active: Option<DateTime<Utc>>,
    pub newest_active: Option<DateTime<Utc>>,
}

type AlertCallback = Box<dyn Fn(&Alert) + Send + Sync>;

pub(crate) type RawAlertRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
);

/// The alert store. One connection, one writer path; readers share the
/// same handle under the mutex, which keeps id assignment serial and
/// strictly increasing.
pub struct AlertStore {
    pub(crate) conn: Mutex<Connection>,
    on_insert: RwLock<Option<AlertCallback>>,
}

impl AlertStore {
    /// Open (and migrate) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = open_file(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!("alert store open at {}", path.display());
        Ok(AlertStore {
            conn: Mutex::new(conn),
            on_insert: RwLock::new(None),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = open_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(AlertStore {
            conn: Mutex::new(conn),
            on_insert: RwLock::new(None),
        })
    }

    /// Install the post-commit publish hook. The callback must not
    /// block; the broadcast hub's enqueue is non-blocking by design.
    pub fn set_on_insert(&self, callback: AlertCallback) {
        *self.on_insert.write() = Some(callback);
    }

    /// Append one alert. The row commits before the publish hook runs.
    pub fn insert(&self, new: &NewAlert) -> Result<Alert, StoreError> {
        let timestamp = Utc::now();
        let details_text = Value::Object(new.details.clone()).to_string();
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO alerts (timestamp, module, reason, src_ip, src_mac, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    ts_to_sql(timestamp),
                    new.module.as_str(),
                    new.reason,
                    new.src_ip.map(|ip| ip.to_string()),
                    new.src_mac.map(|mac| mac.to_string()),
                    details_text,
                ],
            )?;
            conn.last_insert_rowid()
        };
        let alert = Alert {
            id,
            timestamp,
            module: new.module,
            reason: new.reason.clone(),
            src_ip: new.src_ip,
            src_mac: new.src_mac,
            details: new.details.clone(),
        };
        warn!(
            "[ALERT] ({}) {} | IP={} | MAC={}",
            alert.module,
            alert.reason,
            alert.src_ip.map_or_else(|| "-".to_owned(), |ip| ip.to_string()),
            alert.src_mac.map_or_else(|| "-".to_owned(), |mac| mac.to_string()),
        );
        if let Some(callback) = &*self.on_insert.read() {
            callback(&alert);
        }
        Ok(alert)
    }

    pub(crate) fn hydrate(raw: RawAlertRow) -> Result<Alert, StoreError> {
        let (id, timestamp, module, reason, src_ip, src_mac, details) = raw;
        let timestamp = ts_from_sql(&timestamp)
            .ok_or_else(|| StoreError::Corrupt(format!("alert {id}: bad timestamp")))?;
        let module: AlertModule = module
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("alert {id}: bad module '{module}'")))?;
        let src_ip = match src_ip {
            Some(text) => Some(
                text.parse()
                    .map_err(|_| StoreError::Corrupt(format!("alert {id}: bad ip '{text}'")))?,
            ),
            None => None,
        };
        let src_mac = match src_mac {
            Some(text) => Some(
                Mac::try_from(text.as_str())
                    .map_err(|_| StoreError::Corrupt(format!("alert {id}: bad mac '{text}'")))?,
            ),
            None => None,
        };
        let details = match serde_json::from_str::<Value>(&details) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Ok(Alert {
            id,
            timestamp,
            module,
            reason,
            src_ip,
            src_mac,
            details,
        })
    }

    fn query_alerts(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;
        let mut alerts = Vec::new();
        for raw in rows {
            alerts.push(Self::hydrate(raw?)?);
        }
        Ok(alerts)
    }

    /// Most recent alerts, newest first.
    pub fn latest(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        self.query_alerts(
            "SELECT id, timestamp, module, reason, src_ip, src_mac, details
             FROM alerts ORDER BY id DESC LIMIT ?1",
            &[&(limit as i64)],
        )
    }

    /// Paged history, newest first.
    pub fn history(&self, limit: usize, offset: usize) -> Result<Vec<Alert>, StoreError> {
        self.query_alerts(
            "SELECT id, timestamp, module, reason, src_ip, src_mac, details
             FROM alerts ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            &[&(limit as i64), &(offset as i64)],
        )
    }

    /// Alerts with id greater than `after`, oldest first. The learner's
    /// collection path.
    pub fn since(&self, after: i64, limit: usize) -> Result<Vec<Alert>, StoreError> {
        self.query_alerts(
            "SELECT id, timestamp, module, reason, src_ip, src_mac, details
             FROM alerts WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            &[&after, &(limit as i64)],
        )
    }

    /// How many alerts have id greater than `after`.
    pub fn count_since(&self, after: i64) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let count =
            conn.query_row("SELECT COUNT(*) FROM alerts WHERE id > ?1", [after], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    /// Alerts attributed to one source IP, newest first.
    pub fn by_source(&self, src_ip: Ipv4Addr, limit: usize) -> Result<Vec<Alert>, StoreError> {
        self.query_alerts(
            "SELECT id, timestamp, module, reason, src_ip, src_mac, details
             FROM alerts WHERE src_ip = ?1 ORDER BY id DESC LIMIT ?2",
            &[&src_ip.to_string(), &(limit as i64)],
        )
    }

    /// One alert by id.
    pub fn get(&self, id: i64) -> Result<Option<Alert>, StoreError> {
        let raw: Option<RawAlertRow> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT id, timestamp, module, reason, src_ip, src_mac, details
                 FROM alerts WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?
        };
        raw.map(Self::hydrate).transpose()
    }

    /// Counters over both tables.
    pub fn stats(&self) -> Result<AlertStoreStats, StoreError> {
        let conn = self.conn.lock();
        let active_alerts: i64 =
            conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        let archived_alerts: i64 =
            conn.query_row("SELECT COUNT(*) FROM archived_alerts", [], |row| row.get(0))?;
        let mut active_by_module = BTreeMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT module, COUNT(*) FROM alerts GROUP BY module")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?;
            for row in rows {
                let (module, count) = row?;
                active_by_module.insert(module, count);
            }
        }
        let bounds: (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM alerts",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(AlertStoreStats {
            active_alerts,
            archived_alerts,
            total_alerts: active_alerts + archived_alerts,
            active_by_module,
            oldest_active: bounds.0.as_deref().and_then(ts_from_sql),
            newest_active: bounds.1.as_deref().and_then(ts_from_sql),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn new_alert(module: AlertModule, reason: &str, last_octet: u8) -> NewAlert {
        NewAlert {
            module,
            reason: reason.to_owned(),
            src_ip: Some(Ipv4Addr::new(192, 168, 1, last_octet)),
            src_mac: Some(Mac([2, 0, 0, 0, 0, last_octet])),
            details: Map::new(),
        }
    }

    // Property: ids assigned by the store are strictly increasing.
    #[test]
    fn ids_are_strictly_increasing() {
        let store = AlertStore::open_in_memory().unwrap();
        let mut previous = 0;
        for n in 0..50u8 {
            let alert = store
                .insert(&new_alert(AlertModule::Dfa, "conflict", n))
                .unwrap();
            assert!(alert.id > previous);
            previous = alert.id;
        }
    }

    #[test]
    fn insert_round_trips_fields_and_details() {
        let store = AlertStore::open_in_memory().unwrap();
        let mut new = new_alert(AlertModule::Ann, "Model predicted spoof (prob=0.9731)", 9);
        new.details
            .insert("confidence".to_owned(), Value::from(0.9731));
        let inserted = store.insert(&new).unwrap();
        let fetched = store.get(inserted.id).unwrap().unwrap();
        assert_eq!(fetched.module, AlertModule::Ann);
        assert_eq!(fetched.reason, new.reason);
        assert_eq!(fetched.src_ip, new.src_ip);
        assert_eq!(fetched.src_mac, new.src_mac);
        assert_eq!(
            fetched.details.get("confidence").and_then(Value::as_f64),
            Some(0.9731)
        );
    }

    #[test]
    fn queries_order_and_page() {
        let store = AlertStore::open_in_memory().unwrap();
        for n in 0..10u8 {
            store
                .insert(&new_alert(AlertModule::Dfa, &format!("alert {n}"), n))
                .unwrap();
        }
        let latest = store.latest(3).unwrap();
        assert_eq!(latest.len(), 3);
        assert!(latest[0].id > latest[1].id && latest[1].id > latest[2].id);

        let page = store.history(4, 4).unwrap();
        assert_eq!(page.len(), 4);
        assert_eq!(page[0].id, latest[0].id - 4);

        let since = store.since(5, 100).unwrap();
        assert_eq!(since.len(), 5);
        assert!(since.windows(2).all(|pair| pair[0].id < pair[1].id));
        assert_eq!(store.count_since(5).unwrap(), 5);

        let by_source = store
            .by_source(Ipv4Addr::new(192, 168, 1, 3), 10)
            .unwrap();
        assert_eq!(by_source.len(), 1);
    }

    #[test]
    fn stats_count_by_module() {
        let store = AlertStore::open_in_memory().unwrap();
        for _ in 0..3 {
            store
                .insert(&new_alert(AlertModule::Dfa, "conflict", 1))
                .unwrap();
        }
        store
            .insert(&new_alert(AlertModule::Ann, "spoof", 2))
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.active_alerts, 4);
        assert_eq!(stats.archived_alerts, 0);
        assert_eq!(stats.active_by_module.get("DFA"), Some(&3));
        assert_eq!(stats.active_by_module.get("ANN"), Some(&1));
        assert!(stats.oldest_active.is_some());
    }

    #[test]
    fn publish_hook_fires_after_insert() {
        let store = AlertStore::open_in_memory().unwrap();
        let published = Arc::new(AtomicU64::new(0));
        let seen = published.clone();
        store.set_on_insert(Box::new(move |alert| {
            assert!(alert.id > 0);
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        store
            .insert(&new_alert(AlertModule::Dfa, "conflict", 1))
            .unwrap();
        store
            .insert(&new_alert(AlertModule::Dfa, "conflict", 2))
            .unwrap();
        assert_eq!(published.load(Ordering::SeqCst), 2);
    }
}
