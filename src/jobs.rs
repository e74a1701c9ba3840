use rayon::prelude::*;
use std::collections::HashMap;

use crate::dataset::DatasetRow;
use crate::record::UrlRecord;

/// Static configuration for one aggregation job: a pure reduction from
/// the scanned record set to `(grouping key, measure)` rows.
pub struct JobSpec {
    pub name: &'static str,
    pub dataset: &'static str,
    pub reduce: fn(&[UrlRecord]) -> Vec<DatasetRow>,
}

/// The fixed job list, in declaration order. Jobs are independent and
/// side-effect free; ordering only matters for the publish phase.
pub static JOBS: [JobSpec; 5] = [
    JobSpec {
        name: "counts-by-type",
        dataset: "counts_by_type",
        reduce: counts_by_type,
    },
    JobSpec {
        name: "malicious-domains",
        dataset: "mal_domains",
        reduce: malicious_domains,
    },
    JobSpec {
        name: "malicious-tld-counts",
        dataset: "malicious_tld_counts",
        reduce: malicious_tld_counts,
    },
    JobSpec {
        name: "url-length-histogram",
        dataset: "url_length_by_type",
        reduce: url_length_by_type,
    },
    JobSpec {
        name: "threat-scores",
        dataset: "threat_scores",
        reduce: threat_scores,
    },
];

pub fn counts_by_type(records: &[UrlRecord]) -> Vec<DatasetRow> {
    count_groups(records, |record| {
        Some(record.classification_or_unknown().to_string())
    })
}

pub fn malicious_domains(records: &[UrlRecord]) -> Vec<DatasetRow> {
    count_groups(records, |record| {
        if !record.is_malicious() {
            return None;
        }
        if record.domain.is_empty() {
            Some(crate::record::UNKNOWN.to_string())
        } else {
            Some(record.domain.clone())
        }
    })
}

pub fn malicious_tld_counts(records: &[UrlRecord]) -> Vec<DatasetRow> {
    count_groups(records, |record| {
        if record.is_malicious() {
            // Substitute before grouping so every missing-TLD record
            // collapses into the one "unknown" group.
            Some(record.tld_or_unknown().to_string())
        } else {
            None
        }
    })
}

pub fn url_length_by_type(records: &[UrlRecord]) -> Vec<DatasetRow> {
    count_groups(records, |record| {
        let bucket = length_bucket(record.url_length.unwrap_or(0));
        Some(format!("{}|{}", record.classification_or_unknown(), bucket))
    })
}

/// Per-classification arithmetic mean of the records that carry a score.
/// Classifications with no scored records are omitted.
pub fn threat_scores(records: &[UrlRecord]) -> Vec<DatasetRow> {
    let groups: HashMap<String, Vec<f64>> = records
        .par_iter()
        .fold(HashMap::new, |mut acc: HashMap<String, Vec<f64>>, record| {
            if let Some(score) = record.threat_score {
                acc.entry(record.classification_or_unknown().to_string())
                    .or_default()
                    .push(score);
            }
            acc
        })
        .reduce(HashMap::new, |mut merged, partial| {
            for (key, mut scores) in partial {
                merged.entry(key).or_default().append(&mut scores);
            }
            merged
        });

    let mut rows: Vec<DatasetRow> = groups
        .into_iter()
        .map(|(key, mut scores)| {
            // Summation order must not depend on how rayon split the
            // input, or repeated runs would drift in the low bits.
            scores.sort_by(f64::total_cmp);
            DatasetRow {
                key,
                value: compensated_mean(&scores),
            }
        })
        .collect();
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    rows
}

/// Lower-edge-50 histogram bucket, labelled `"<lower>-<lower+49>"`.
pub fn length_bucket(url_length: u32) -> String {
    let lower = (url_length / 50) * 50;
    format!("{}-{}", lower, lower + 49)
}

/// Counting reduction shared by the four count jobs. Returns one row per
/// distinct key, sorted by key so output is deterministic regardless of
/// how the parallel fold partitioned the records.
fn count_groups<F>(records: &[UrlRecord], key_of: F) -> Vec<DatasetRow>
where
    F: Fn(&UrlRecord) -> Option<String> + Sync,
{
    let counts: HashMap<String, u64> = records
        .par_iter()
        .fold(HashMap::new, |mut acc: HashMap<String, u64>, record| {
            if let Some(key) = key_of(record) {
                *acc.entry(key).or_insert(0) += 1;
            }
            acc
        })
        .reduce(HashMap::new, |mut merged, partial| {
            for (key, count) in partial {
                *merged.entry(key).or_insert(0) += count;
            }
            merged
        });

    let mut rows: Vec<DatasetRow> = counts
        .into_iter()
        .map(|(key, count)| DatasetRow {
            key,
            value: count as f64,
        })
        .collect();
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    rows
}

fn compensated_mean(sorted_scores: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for &score in sorted_scores {
        let adjusted = score - compensation;
        let next = sum + adjusted;
        compensation = (next - sum) - adjusted;
        sum = next;
    }
    sum / sorted_scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        classification: Option<&str>,
        domain: &str,
        tld: Option<&str>,
        url_length: Option<u32>,
        threat_score: Option<f64>,
    ) -> UrlRecord {
        UrlRecord {
            url: format!("http://{domain}/x"),
            domain: domain.to_string(),
            tld: tld.map(|s| s.to_string()),
            classification: classification.map(|s| s.to_string()),
            url_length,
            num_subdomains: 0,
            has_https: false,
            threat_score,
            timestamp: None,
        }
    }

    fn as_pairs(rows: &[DatasetRow]) -> Vec<(&str, f64)> {
        rows.iter().map(|row| (row.key.as_str(), row.value)).collect()
    }

    #[test]
    fn length_bucket_edges() {
        assert_eq!(length_bucket(0), "0-49");
        assert_eq!(length_bucket(49), "0-49");
        assert_eq!(length_bucket(50), "50-99");
        assert_eq!(length_bucket(70), "50-99");
        assert_eq!(length_bucket(250), "250-299");
    }

    #[test]
    fn counts_by_type_groups_all_records() {
        let records = vec![
            record(Some("benign"), "a.com", None, Some(30), None),
            record(Some("phishing"), "b.com", Some("ru"), Some(70), None),
            record(Some("phishing"), "b.com", Some("ru"), Some(80), None),
            record(None, "c.com", None, None, None),
        ];
        let rows = counts_by_type(&records);
        assert_eq!(
            as_pairs(&rows),
            vec![("benign", 1.0), ("phishing", 2.0), ("unknown", 1.0)]
        );
        let total: f64 = rows.iter().map(|r| r.value).sum();
        assert_eq!(total, records.len() as f64);
    }

    #[test]
    fn malicious_domains_excludes_benign_only_domains() {
        let records = vec![
            record(Some("benign"), "safe.com", None, None, None),
            record(Some("phishing"), "b.com", None, None, None),
            record(Some("malware"), "b.com", None, None, None),
        ];
        let rows = malicious_domains(&records);
        assert_eq!(as_pairs(&rows), vec![("b.com", 2.0)]);
    }

    #[test]
    fn missing_tld_collapses_into_unknown() {
        let records = vec![
            record(Some("phishing"), "a.com", None, None, None),
            record(Some("malware"), "b.com", None, None, None),
            record(Some("phishing"), "c.ru", Some("ru"), None, None),
            record(Some("benign"), "d.com", None, None, None),
        ];
        let rows = malicious_tld_counts(&records);
        assert_eq!(as_pairs(&rows), vec![("ru", 1.0), ("unknown", 2.0)]);
    }

    #[test]
    fn histogram_buckets_missing_length_as_zero() {
        let records = vec![
            record(Some("benign"), "a.com", None, Some(30), None),
            record(Some("phishing"), "b.com", None, Some(70), None),
            record(Some("phishing"), "b.com", None, Some(80), None),
            record(Some("phishing"), "b.com", None, None, None),
        ];
        let rows = url_length_by_type(&records);
        assert_eq!(
            as_pairs(&rows),
            vec![
                ("benign|0-49", 1.0),
                ("phishing|0-49", 1.0),
                ("phishing|50-99", 2.0),
            ]
        );
    }

    #[test]
    fn threat_scores_means_per_classification() {
        let records = vec![
            record(Some("phishing"), "a.com", None, None, Some(0.8)),
            record(Some("phishing"), "b.com", None, None, Some(0.6)),
            record(Some("benign"), "c.com", None, None, Some(0.1)),
            // No score: its classification must not appear at all.
            record(Some("defacement"), "d.com", None, None, None),
        ];
        let rows = threat_scores(&records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "benign");
        assert!((rows[0].value - 0.1).abs() < 1e-12);
        assert_eq!(rows[1].key, "phishing");
        assert!((rows[1].value - 0.7).abs() < 1e-12);
    }

    #[test]
    fn reducers_are_deterministic_across_runs() {
        let records: Vec<UrlRecord> = (0..500)
            .map(|i| {
                record(
                    Some(if i % 3 == 0 { "benign" } else { "phishing" }),
                    &format!("d{}.com", i % 17),
                    if i % 5 == 0 { None } else { Some("ru") },
                    Some(i % 300),
                    Some(i as f64 * 0.001),
                )
            })
            .collect();

        for job in &JOBS {
            let first = (job.reduce)(&records);
            let second = (job.reduce)(&records);
            assert_eq!(first, second, "job '{}' drifted between runs", job.name);
        }
    }
}
