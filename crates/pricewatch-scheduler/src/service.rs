//! The long-running pipeline service: cron registration plus the manual
//! entry points the user-facing layer calls.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use pricewatch_core::{
    CollaboratorError, ExtractionOutcome, ExtractionTarget, FailureCounter, PipelineConfig,
    ScheduleSpec, StoreHealth, TargetRepository,
};
use pricewatch_healing::TargetState;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use crate::batch::BatchRunner;
use crate::cadence::{next_due, resolve_cron, validate_cron, ScheduleError};

pub struct PipelineService {
    runner: Arc<BatchRunner>,
    repo: Arc<dyn TargetRepository>,
    default_cron: String,
    default_jitter_minutes: i64,
    min_interval: Duration,
    failure_threshold: u32,
}

impl PipelineService {
    #[must_use]
    pub fn new(
        runner: Arc<BatchRunner>,
        repo: Arc<dyn TargetRepository>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            runner,
            repo,
            default_cron: config.default_cron.clone(),
            default_jitter_minutes: config.default_jitter_minutes,
            min_interval: Duration::hours(i64::from(config.min_interval_hours)),
            failure_threshold: config.failure_threshold,
        }
    }

    /// Registers the recurring batch job on the scheduler. A tick that
    /// fires while a batch is still running only picks up domains the
    /// running batch has not claimed.
    ///
    /// # Errors
    ///
    /// Returns [`JobSchedulerError`] if the job cannot be created or added.
    pub async fn register(self: &Arc<Self>, scheduler: &JobScheduler) -> Result<(), JobSchedulerError> {
        let service = Arc::clone(self);
        let job = Job::new_async(self.default_cron.as_str(), move |_job_id, _scheduler| {
            let service = Arc::clone(&service);
            Box::pin(async move {
                info!("scheduled batch tick");
                service.runner.run_due(Utc::now()).await;
            })
        })?;
        scheduler.add(job).await?;
        info!(cron = %self.default_cron, "batch job registered");
        Ok(())
    }

    /// Immediate one-off check for a single target, outside the schedule.
    pub async fn run_now(&self, target: &ExtractionTarget) -> ExtractionOutcome {
        self.runner.process_target(target).await
    }

    /// Puts a terminal target back into rotation with clean counters.
    ///
    /// # Errors
    ///
    /// Propagates repository errors; the target's state is then unchanged
    /// or partially cleared and safe to retry.
    pub async fn manual_retry(&self, target: Uuid) -> Result<(), CollaboratorError> {
        self.repo.clear_terminal(target).await?;
        self.repo
            .set_failure_counter(target, FailureCounter::default())
            .await?;
        info!(%target, "target returned to rotation");
        Ok(())
    }

    #[must_use]
    pub fn domain_health(&self, domain: &str) -> StoreHealth {
        self.runner.domain_health(domain)
    }

    /// Current lifecycle state of a target, derived from its persisted
    /// counters and terminal mark.
    ///
    /// # Errors
    ///
    /// Propagates repository errors.
    pub async fn target_state(&self, target: Uuid) -> Result<TargetState, CollaboratorError> {
        let terminal = self.repo.terminal_reason(target).await?;
        let counter = self.repo.failure_counter(target).await?;
        Ok(TargetState::derive(terminal, counter, self.failure_threshold))
    }

    /// Validates the effective schedule for a target and computes its next
    /// due time after `after`, jitter included.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError`] when the winning cron expression is
    /// invalid or runs more often than the configured minimum interval.
    pub fn next_check(
        &self,
        target: &ExtractionTarget,
        product_schedule: Option<&ScheduleSpec>,
        store_schedule: Option<&ScheduleSpec>,
        after: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let cron = resolve_cron(product_schedule, store_schedule, &self.default_cron);
        if let Err(err) = validate_cron(cron, self.min_interval) {
            error!(%err, "rejected schedule");
            return Err(err);
        }
        next_due(cron, after, target.id, self.default_jitter_minutes)
    }
}
