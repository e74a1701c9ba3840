use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::time::Duration;
use tracing::error;

use urlrollup::{
    utils, Args, JobStatus, RecordStore, RollupOptions, RollupReport, SqlitePublisher,
    SummaryReader, JOBS,
};

fn main() -> Result<()> {
    let args = Args::parse();
    utils::setup_logging(args.verbose);
    utils::validate_args(&args)?;

    // Only a store-level fatal error exits non-zero; per-job failures do
    // not, because the run still completed.
    match run(&args) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(action = "abort", component = "main", error = %e, "Rollup run aborted");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let store = RecordStore::open(&args.db)?;
    let records = store.scan()?;

    let publisher = SqlitePublisher::new(store.connection());
    let opts = RollupOptions {
        workers: args.workers,
        job_timeout: Duration::from_secs(args.job_timeout_secs),
    };
    let report = urlrollup::run_rollup(records, &publisher, &opts)?;

    let reader = SummaryReader::new(store.connection());
    if args.json {
        print_json(args, &report, &reader)
    } else {
        print_text(args, &report, &reader)
    }
}

fn print_text(args: &Args, report: &RollupReport, reader: &SummaryReader) -> Result<()> {
    println!("\n--- Rollup Report ---");
    for outcome in &report.outcomes {
        println!("- {} -> {}: {}", outcome.job, outcome.dataset, outcome.status);
    }
    println!(
        "{} of {} jobs failed ({} ms)",
        report.failed_jobs(),
        report.outcomes.len(),
        report.duration.as_millis()
    );

    if let Some(top) = args.top {
        for job in &JOBS {
            let rows = reader.top_rows(job.dataset, top)?;
            println!("\nTop {} of {}:", std::cmp::min(top, rows.len()), job.dataset);
            for row in rows {
                println!("- {}: {}", row.key, format_measure(row.value));
            }
        }
    }

    if args.summary {
        let summary = reader.threat_summary()?;
        println!("\n--- Threat Summary ---");
        println!("Total URLs analyzed: {}", utils::format_number(summary.total_urls));
        println!("Malicious URLs: {}", utils::format_number(summary.malicious_urls));
        println!("Benign URLs: {}", utils::format_number(summary.benign_urls));
        println!("Threat percentage: {}%", summary.threat_percentage);
        println!("Average threat score: {}", summary.avg_threat_score);
        println!("Last updated: {}", summary.last_updated);
    }

    Ok(())
}

fn print_json(args: &Args, report: &RollupReport, reader: &SummaryReader) -> Result<()> {
    let jobs: Vec<serde_json::Value> = report
        .outcomes
        .iter()
        .map(|outcome| {
            json!({
                "job": outcome.job,
                "dataset": outcome.dataset,
                "status": outcome.status.to_string(),
                "failed": matches!(outcome.status, JobStatus::Failed { .. }),
            })
        })
        .collect();

    let mut output = json!({ "jobs": jobs });

    if let Some(top) = args.top {
        let mut datasets = serde_json::Map::new();
        for job in &JOBS {
            let rows = reader.top_rows(job.dataset, top)?;
            datasets.insert(job.dataset.to_string(), serde_json::to_value(rows)?);
        }
        output["datasets"] = serde_json::Value::Object(datasets);
    }

    if args.summary {
        output["summary"] = serde_json::to_value(reader.threat_summary()?)?;
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Counts print as integers, means with their decimals.
fn format_measure(value: f64) -> String {
    if value.fract() == 0.0 {
        utils::format_number(value as u64)
    } else {
        format!("{value:.4}")
    }
}
