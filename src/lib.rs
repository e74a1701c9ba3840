pub mod args;
pub mod dataset;
pub mod jobs;
pub mod orchestrator;
pub mod record;
pub mod store;
pub mod summary;
pub mod utils;

pub use args::Args;
pub use dataset::{DatasetRow, Publish, PublishError, SqlitePublisher};
pub use jobs::JOBS;
pub use orchestrator::{run_rollup, JobOutcome, JobStatus, RollupOptions, RollupReport};
pub use record::UrlRecord;
pub use store::RecordStore;
pub use summary::{SummaryReader, ThreatSummary};
