use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, Result as SqliteResult, Row};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::record::{self, UrlRecord};

/// Read-only handle to the `urls` record store. Ingestion is the only
/// writer; the rollup engine scans whatever snapshot is present.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    pub fn open(path: &Path) -> Result<Self> {
        info!(action = "open", component = "record_store", path = ?path, "Opening record store");

        if !path.exists() {
            anyhow::bail!("Record store not found at {:?}", path);
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open record store at {:?}", path))?;

        let has_urls_table: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'urls'",
                [],
                |row| row.get::<_, i64>(0).map(|n| n > 0),
            )
            .context("Failed to inspect record store schema")?;

        if !has_urls_table {
            anyhow::bail!("Record store at {:?} has no 'urls' table", path);
        }

        Ok(Self { conn })
    }

    /// The derived-dataset store shares the record store's database, so
    /// the publisher and summary reader borrow this handle.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn total_records(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM urls", [], |row| row.get(0))
            .context("Failed to count records")?;
        Ok(count.max(0) as u64)
    }

    /// Scans the full record set in a fixed order so a repeated run over an
    /// unchanged store sees an identical record sequence.
    pub fn scan(&self) -> Result<Vec<UrlRecord>> {
        let start_time = Instant::now();
        info!(action = "start", component = "record_store", "Scanning record store");

        let records: Vec<UrlRecord> = self
            .conn
            .prepare(
                "SELECT url, domain, tld, type, url_length, num_subdomains, \
                 has_https, threat_score, timestamp FROM urls ORDER BY id",
            )
            .context("Failed to prepare record scan")?
            .query_map([], read_record)
            .context("Failed to scan records")?
            .collect::<SqliteResult<Vec<UrlRecord>>>()
            .context("Failed to read record rows")?;

        info!(
            action = "complete",
            component = "record_store",
            record_count = records.len(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Record scan completed"
        );

        Ok(records)
    }
}

fn read_record(row: &Row<'_>) -> SqliteResult<UrlRecord> {
    let url: String = row.get(0)?;

    let domain = match row.get::<_, Option<String>>(1)? {
        Some(domain) if !domain.is_empty() => domain,
        _ => record::derive_domain(&url).unwrap_or_else(|| {
            warn!(
                action = "derive",
                component = "record_store",
                url = url.as_str(),
                "Could not derive domain from URL"
            );
            String::new()
        }),
    };

    // Negative lengths are malformed; treat them as absent rather than
    // failing the scan.
    let url_length = row
        .get::<_, Option<i64>>(4)?
        .and_then(|n| u32::try_from(n).ok());
    let num_subdomains = row
        .get::<_, Option<i64>>(5)?
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0);
    let has_https = row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0;
    let timestamp = row
        .get::<_, Option<String>>(8)?
        .and_then(|raw| parse_timestamp(&raw));

    Ok(UrlRecord {
        url,
        domain,
        tld: row.get(2)?,
        classification: row.get(3)?,
        url_length,
        num_subdomains,
        has_https,
        threat_score: row.get(7)?,
        timestamp,
    })
}

/// Ingestion writes either RFC 3339 or the bare `%Y-%m-%d %H:%M:%S`
/// shape; anything else reads as absent.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    })
}
