//! Batch scheduling: cadence resolution, domain-grouped batch runs, and the
//! cron-driven service that ties the pipeline together.

pub mod batch;
pub mod cadence;
pub mod service;

pub use batch::BatchRunner;
pub use cadence::{next_due, resolve_cron, validate_cron, ScheduleError};
pub use service::PipelineService;
