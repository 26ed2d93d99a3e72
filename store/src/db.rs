// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Shared connection plumbing and timestamp canonicalization.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Fixed-width UTC timestamp format. Lexicographic order equals time
/// order, so cutoff comparisons can happen in SQL.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub(crate) fn open_file(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

pub(crate) fn open_memory() -> rusqlite::Result<Connection> {
    Connection::open_in_memory()
}

pub(crate) fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub(crate) fn ts_from_sql(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
