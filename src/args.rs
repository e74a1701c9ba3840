use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "urlrollup",
    about = "Run the rollup jobs over the URL record store and republish the derived datasets",
    version,
    long_about = None
)]
pub struct Args {
    /// Path to the record store database
    #[arg(short, long, default_value = "cyber_intel.db")]
    pub db: PathBuf,

    /// Number of top rows to display per count dataset
    #[arg(short, long)]
    pub top: Option<usize>,

    /// Print the scalar summary statistics after the run
    #[arg(short, long)]
    pub summary: bool,

    /// Emit summary and top rows as JSON
    #[arg(long)]
    pub json: bool,

    /// Number of worker threads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Per-job wall-clock budget in seconds
    #[arg(long, default_value_t = 300)]
    pub job_timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
