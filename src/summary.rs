use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;

use crate::dataset::{self, DatasetRow};
use crate::record::BENIGN;

/// Scalar summary consumed verbatim by the dashboard.
#[derive(Debug, Serialize)]
pub struct ThreatSummary {
    pub total_urls: u64,
    pub malicious_urls: u64,
    pub benign_urls: u64,
    pub threat_percentage: f64,
    pub avg_threat_score: f64,
    pub last_updated: String,
}

/// Read-only access to the derived datasets. Holds no cached state;
/// every read reflects the datasets as currently published.
pub struct SummaryReader<'a> {
    conn: &'a Connection,
}

impl<'a> SummaryReader<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn threat_summary(&self) -> Result<ThreatSummary> {
        let total_urls: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM urls", [], |row| row.get(0))
            .context("Failed to count records")?;
        let total_urls = total_urls.max(0) as u64;

        let counts = self.read_dataset("counts_by_type")?;
        let malicious_urls = counts
            .iter()
            .filter(|row| row.key != BENIGN)
            .map(|row| row.value as u64)
            .sum::<u64>();

        let threat_percentage = if total_urls > 0 {
            round2(malicious_urls as f64 / total_urls as f64 * 100.0)
        } else {
            0.0
        };

        // Unweighted mean of the per-classification means; each
        // classification counts as one sample regardless of size.
        let scores = self.read_dataset("threat_scores")?;
        let avg_threat_score = if scores.is_empty() {
            0.0
        } else {
            round2(scores.iter().map(|row| row.value).sum::<f64>() / scores.len() as f64)
        };

        Ok(ThreatSummary {
            total_urls,
            malicious_urls,
            // A hand-edited store can leave counts_by_type claiming more
            // malicious records than the live table holds.
            benign_urls: total_urls.saturating_sub(malicious_urls),
            threat_percentage,
            avg_threat_score,
            last_updated: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        })
    }

    /// Top-N rows of a named dataset, ordered by measure descending with
    /// the key as tie-break. A dataset that was never published reads as
    /// empty.
    pub fn top_rows(&self, dataset: &str, n: usize) -> Result<Vec<DatasetRow>> {
        dataset::ensure_valid_name(dataset)?;
        if !self.dataset_exists(dataset)? {
            return Ok(Vec::new());
        }

        let rows = self
            .conn
            .prepare(&format!(
                "SELECT key, value FROM \"{dataset}\" ORDER BY value DESC, key ASC LIMIT ?1"
            ))?
            .query_map([n as i64], |row| {
                Ok(DatasetRow {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<DatasetRow>>>()
            .with_context(|| format!("Failed to read dataset '{dataset}'"))?;
        Ok(rows)
    }

    fn read_dataset(&self, dataset: &str) -> Result<Vec<DatasetRow>> {
        dataset::ensure_valid_name(dataset)?;
        if !self.dataset_exists(dataset)? {
            return Ok(Vec::new());
        }

        let rows = self
            .conn
            .prepare(&format!(
                "SELECT key, value FROM \"{dataset}\" ORDER BY key"
            ))?
            .query_map([], |row| {
                Ok(DatasetRow {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<DatasetRow>>>()
            .with_context(|| format!("Failed to read dataset '{dataset}'"))?;
        Ok(rows)
    }

    fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [dataset],
                |row| row.get(0),
            )
            .context("Failed to inspect dataset store")?;
        Ok(count > 0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
