// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Alert lifecycle: archive, rotate, cleanup.
//!
//! Each move is one transaction: rows are copied into `archived_alerts`
//! and deleted from `alerts` atomically, so an alert is always in exactly
//! one table.

use crate::alerts::{AlertStore, StoreError};
use crate::db::{ts_from_sql, ts_to_sql};
use chrono::{DateTime, Duration, Utc};
use net::Mac;
use rusqlite::ToSql;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::net::Ipv4Addr;
use tracing::info;

/// Why an alert left the active table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    Manual,
    CsvExport,
    AutoRotation,
    SizeLimit,
}

impl ArchiveReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveReason::Manual => "manual",
            ArchiveReason::CsvExport => "csv_export",
            ArchiveReason::AutoRotation => "auto_rotation",
            ArchiveReason::SizeLimit => "size_limit",
        }
    }
}

impl Display for ArchiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row in the archive table. Shape mirrors [`crate::Alert`] plus the
/// archival metadata.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ArchivedAlert {
    pub id: i64,
    pub original_id: i64,
    pub timestamp: DateTime<Utc>,
    pub module: String,
    pub reason: String,
    pub src_ip: Option<Ipv4Addr>,
    pub src_mac: Option<Mac>,
    pub details: Map<String, Value>,
    pub archived_at: DateTime<Utc>,
    pub archive_reason: String,
}

const ARCHIVE_COLUMNS: &str =
    "original_id, timestamp, module, reason, src_ip, src_mac, details, archived_at, archive_reason";

impl AlertStore {
    /// Move the named alerts into the archive. Returns how many moved.
    pub fn archive_ids(&self, ids: &[i64], reason: ArchiveReason) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = ts_to_sql(Utc::now());
        let reason_text = reason.as_str();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let insert_placeholders: Vec<String> =
            (0..ids.len()).map(|i| format!("?{}", i + 3)).collect();
        let insert_sql = format!(
            "INSERT INTO archived_alerts ({ARCHIVE_COLUMNS})
             SELECT id, timestamp, module, reason, src_ip, src_mac, details, ?1, ?2
             FROM alerts WHERE id IN ({})",
            insert_placeholders.join(", ")
        );
        let mut insert_params: Vec<&dyn ToSql> = vec![&now, &reason_text];
        for id in ids {
            insert_params.push(id);
        }
        let moved = tx.execute(&insert_sql, insert_params.as_slice())?;

        let delete_placeholders: Vec<String> =
            (0..ids.len()).map(|i| format!("?{}", i + 1)).collect();
        let delete_sql = format!(
            "DELETE FROM alerts WHERE id IN ({})",
            delete_placeholders.join(", ")
        );
        let delete_params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
        tx.execute(&delete_sql, delete_params.as_slice())?;
        tx.commit()?;
        info!("archived {moved} alerts (reason: {reason})");
        Ok(moved)
    }

    /// Move every active alert into the archive.
    pub fn archive_all(&self, reason: ArchiveReason) -> Result<usize, StoreError> {
        let now = ts_to_sql(Utc::now());
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let moved = tx.execute(
            &format!(
                "INSERT INTO archived_alerts ({ARCHIVE_COLUMNS})
                 SELECT id, timestamp, module, reason, src_ip, src_mac, details, ?1, ?2
                 FROM alerts"
            ),
            rusqlite::params![now, reason.as_str()],
        )?;
        tx.execute("DELETE FROM alerts", [])?;
        tx.commit()?;
        info!("archived all {moved} alerts (reason: {reason})");
        Ok(moved)
    }

    /// Archive active alerts older than `days_to_keep` days.
    pub fn rotate(&self, days_to_keep: i64) -> Result<usize, StoreError> {
        let cutoff = ts_to_sql(Utc::now() - Duration::days(days_to_keep));
        let now = ts_to_sql(Utc::now());
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let moved = tx.execute(
            &format!(
                "INSERT INTO archived_alerts ({ARCHIVE_COLUMNS})
                 SELECT id, timestamp, module, reason, src_ip, src_mac, details, ?1, ?2
                 FROM alerts WHERE timestamp < ?3"
            ),
            rusqlite::params![now, ArchiveReason::AutoRotation.as_str(), cutoff],
        )?;
        tx.execute("DELETE FROM alerts WHERE timestamp < ?1", [&cutoff])?;
        tx.commit()?;
        if moved > 0 {
            info!("rotated {moved} alerts older than {days_to_keep} days");
        }
        Ok(moved)
    }

    /// Keep only the newest `max_alerts` active alerts; archive the rest.
    pub fn limit_active(&self, max_alerts: usize) -> Result<usize, StoreError> {
        let overflow_ids: Vec<i64> = {
            let conn = self.conn.lock();
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
            #[allow(clippy::cast_possible_wrap)]
            let overflow = total - max_alerts as i64;
            if overflow <= 0 {
                return Ok(0);
            }
            let mut stmt =
                conn.prepare("SELECT id FROM alerts ORDER BY timestamp ASC, id ASC LIMIT ?1")?;
            let rows = stmt.query_map([overflow], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        self.archive_ids(&overflow_ids, ArchiveReason::SizeLimit)
    }

    /// Hard-delete archived alerts older than `days_to_keep` days.
    pub fn cleanup_archives(&self, days_to_keep: i64) -> Result<usize, StoreError> {
        let cutoff = ts_to_sql(Utc::now() - Duration::days(days_to_keep));
        let deleted = {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM archived_alerts WHERE archived_at < ?1", [&cutoff])?
        };
        if deleted > 0 {
            info!("deleted {deleted} archived alerts older than {days_to_keep} days");
        }
        Ok(deleted)
    }

    /// Archived alerts from the last `days` days, newest archive first.
    pub fn archived_recent(&self, days: i64, limit: usize) -> Result<Vec<ArchivedAlert>, StoreError> {
        let cutoff = ts_to_sql(Utc::now() - Duration::days(days));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, original_id, timestamp, module, reason, src_ip, src_mac, details,
                    archived_at, archive_reason
             FROM archived_alerts WHERE archived_at >= ?1
             ORDER BY archived_at DESC LIMIT ?2",
        )?;
        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map(rusqlite::params![cutoff, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;
        let mut archived = Vec::new();
        for row in rows {
            let (id, original_id, timestamp, module, reason, src_ip, src_mac, details, archived_at, archive_reason) =
                row?;
            let timestamp = ts_from_sql(&timestamp)
                .ok_or_else(|| StoreError::Corrupt(format!("archived {id}: bad timestamp")))?;
            let archived_at = ts_from_sql(&archived_at)
                .ok_or_else(|| StoreError::Corrupt(format!("archived {id}: bad archived_at")))?;
            let src_ip = src_ip.and_then(|text| text.parse().ok());
            let src_mac = src_mac.and_then(|text| Mac::try_from(text.as_str()).ok());
            let details = match serde_json::from_str::<Value>(&details) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            archived.push(ArchivedAlert {
                id,
                original_id,
                timestamp,
                module,
                reason,
                src_ip,
                src_mac,
                details,
                archived_at,
                archive_reason,
            });
        }
        Ok(archived)
    }
}
