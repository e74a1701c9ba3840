use rusqlite::{params, Connection};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// One row of a derived dataset: grouping key plus its numeric measure.
/// Composite keys are encoded as `"<classification>|<bucket>"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRow {
    pub key: String,
    pub value: f64,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Invalid dataset name '{dataset}'")]
    InvalidName { dataset: String },

    #[error("Storage error while publishing '{dataset}': {source}")]
    Storage {
        dataset: String,
        #[source]
        source: rusqlite::Error,
    },
}

/// Write path for derived datasets. Readers must observe either the
/// complete prior version of a dataset or the complete new one.
pub trait Publish {
    fn publish(&self, name: &str, rows: &[DatasetRow]) -> Result<(), PublishError>;
}

/// Publishes each dataset as one SQLite transaction: clear, insert, commit.
/// A failed publish rolls back, leaving the prior version intact.
pub struct SqlitePublisher<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePublisher<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl Publish for SqlitePublisher<'_> {
    fn publish(&self, name: &str, rows: &[DatasetRow]) -> Result<(), PublishError> {
        ensure_valid_name(name)?;
        let start_time = Instant::now();

        let storage = |source| PublishError::Storage {
            dataset: name.to_string(),
            source,
        };

        let tx = self.conn.unchecked_transaction().map_err(storage)?;

        // An empty result set still replaces the prior rows; "no groups
        // found" is a distinct state from "never computed".
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{name}\" (key TEXT PRIMARY KEY, value REAL NOT NULL); \
             DELETE FROM \"{name}\";"
        ))
        .map_err(storage)?;

        {
            let mut insert = tx
                .prepare(&format!(
                    "INSERT INTO \"{name}\" (key, value) VALUES (?1, ?2)"
                ))
                .map_err(storage)?;
            for row in rows {
                insert.execute(params![row.key, row.value]).map_err(storage)?;
            }
        }

        tx.commit().map_err(storage)?;

        info!(
            action = "publish",
            component = "dataset_publisher",
            dataset = name,
            row_count = rows.len(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Dataset published"
        );
        Ok(())
    }
}

/// Dataset names become table identifiers, so they are restricted to a
/// safe character set instead of being escaped.
pub fn ensure_valid_name(name: &str) -> Result<(), PublishError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PublishError::InvalidName {
            dataset: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn rows(pairs: &[(&str, f64)]) -> Vec<DatasetRow> {
        pairs
            .iter()
            .map(|(key, value)| DatasetRow {
                key: key.to_string(),
                value: *value,
            })
            .collect()
    }

    fn read_all(conn: &Connection, name: &str) -> Vec<(String, f64)> {
        conn.prepare(&format!("SELECT key, value FROM \"{name}\" ORDER BY key"))
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn publish_replaces_prior_version() {
        let conn = open_conn();
        let publisher = SqlitePublisher::new(&conn);

        publisher
            .publish("counts_by_type", &rows(&[("benign", 3.0), ("phishing", 1.0)]))
            .unwrap();
        publisher
            .publish("counts_by_type", &rows(&[("defacement", 2.0)]))
            .unwrap();

        assert_eq!(
            read_all(&conn, "counts_by_type"),
            vec![("defacement".to_string(), 2.0)]
        );
    }

    #[test]
    fn publish_empty_clears_prior_rows() {
        let conn = open_conn();
        let publisher = SqlitePublisher::new(&conn);

        publisher
            .publish("malicious_tld_counts", &rows(&[("ru", 5.0)]))
            .unwrap();
        publisher.publish("malicious_tld_counts", &[]).unwrap();

        assert!(read_all(&conn, "malicious_tld_counts").is_empty());
    }

    #[test]
    fn rejects_unsafe_dataset_names() {
        let conn = open_conn();
        let publisher = SqlitePublisher::new(&conn);

        let result = publisher.publish("counts; DROP TABLE urls", &[]);
        assert!(matches!(result, Err(PublishError::InvalidName { .. })));
    }
}
