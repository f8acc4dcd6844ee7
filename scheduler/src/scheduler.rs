//! The owned rollup scheduler.
//!
//! One instance is constructed at process start and drives everything:
//! recurring cron ticks, manual triggers, the per-run orchestration
//! (collect → aggregate → persist), and the read lookups dashboards consume.
//!
//! A run fans out its families concurrently and attributes each family's
//! failure individually; a family that fails aggregation never takes down a
//! sibling family's snapshot, and snapshots persisted before the failure
//! stay persisted even though the job record reports the failure.

use crate::{
    job::{
        ErrorKind,
        JobId,
        JobType,
        RollupJob,
        Trigger,
    },
    store::{
        JobStore,
        SnapshotStore,
        StoreError,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use edupulse_aggregator::{
    aggregate_family,
    AggregateError,
    MetricSnapshot,
    Scope,
};
use edupulse_collector::{
    AccessToken,
    Collector,
    MetricFamily,
    TenantDirectory,
    TenantId,
    Window,
};
use futures::future::join_all;
use std::{
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    warn,
};

pub const HOURLY_CRON: &str = "0 0 * * * *";

/// Rejections surfaced synchronously to the triggering caller. Everything
/// else about a run is observed asynchronously through its job record.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("a rollup covering these families is already pending or processing")]
    Conflict,
    #[error("invalid rollup request: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TriggerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::JobConflict { .. } => TriggerError::Conflict,
            other => TriggerError::Store(other),
        }
    }
}

struct FamilyFailure {
    family: MetricFamily,
    kind: ErrorKind,
    message: String,
}

pub struct RollupScheduler {
    collector: Collector,
    tenants: Arc<dyn TenantDirectory>,
    snapshots: Arc<dyn SnapshotStore>,
    jobs: Arc<dyn JobStore>,
    run_budget: Duration,
}

impl RollupScheduler {
    pub fn new(
        collector: Collector,
        tenants: Arc<dyn TenantDirectory>,
        snapshots: Arc<dyn SnapshotStore>,
        jobs: Arc<dyn JobStore>,
        run_budget: Duration,
    ) -> Self {
        Self {
            collector,
            tenants,
            snapshots,
            jobs,
            run_budget,
        }
    }

    /// Creates a pending job and runs it in the background. Returns the job
    /// as created; its progress is observed via [`RollupScheduler::job`].
    pub async fn trigger_run(
        self: Arc<Self>,
        job_type: JobType,
        window: Option<Window>,
        trigger: Trigger,
    ) -> Result<RollupJob, TriggerError> {
        let job = self.create_job(job_type, window, trigger).await?;

        let spawned = job.clone();
        tokio::spawn(async move {
            self.execute(spawned).await;
        });

        Ok(job)
    }

    /// Creates a job and runs it to completion before returning. Used by the
    /// one-shot CLI path and by tests.
    pub async fn run_now(
        &self,
        job_type: JobType,
        window: Option<Window>,
        trigger: Trigger,
    ) -> Result<RollupJob, TriggerError> {
        let job = self.create_job(job_type, window, trigger).await?;
        let id = job.id;
        self.execute(job).await;
        Ok(self
            .jobs
            .get(id)
            .await?
            .unwrap_or_else(|| unreachable!("job was just created")))
    }

    async fn create_job(
        &self,
        job_type: JobType,
        window: Option<Window>,
        trigger: Trigger,
    ) -> Result<RollupJob, TriggerError> {
        let now = Utc::now();
        let window = match window {
            Some(window) => window,
            None => Window::hour_ending(now),
        };
        if window.start >= window.end {
            return Err(TriggerError::Configuration(format!(
                "window start {} is not before window end {}",
                window.start, window.end
            )));
        }

        let job = RollupJob::new(job_type, window, trigger, now);
        self.jobs.create(&job).await?;
        info!(job_id = %job.id, job_type = %job.job_type, window = %window, %trigger, "rollup: job created");
        Ok(job)
    }

    /// Runs one job to a terminal state, enforcing the wall-clock budget.
    async fn execute(&self, mut job: RollupJob) {
        let started = Utc::now();
        if let Err(error) = job.start(started) {
            error!(job_id = %job.id, %error, "rollup: job could not start");
            return;
        }
        if let Err(error) = self.jobs.update(&job).await {
            error!(job_id = %job.id, %error, "rollup: job update failed");
        }

        let outcome = tokio::time::timeout(self.run_budget, self.run_families(&mut job)).await;

        let finished = Utc::now();
        let result = match outcome {
            Ok(Ok(())) => job.complete(finished),
            Ok(Err(failure)) => {
                warn!(
                    job_id = %job.id,
                    family = %failure.family,
                    kind = %failure.kind,
                    message = %failure.message,
                    "rollup: run failed"
                );
                job.fail(
                    failure.kind,
                    format!("{} family: {}", failure.family, failure.message),
                    finished,
                )
            }
            Err(_) => job.fail(
                ErrorKind::Timeout,
                format!("run exceeded the {}s budget", self.run_budget.as_secs()),
                finished,
            ),
        };
        if let Err(error) = result {
            error!(job_id = %job.id, %error, "rollup: job could not finish");
        }

        if let Err(error) = self.jobs.update(&job).await {
            error!(job_id = %job.id, %error, "rollup: job update failed");
        }
        info!(
            job_id = %job.id,
            status = %job.status,
            processed_sources = job.processed_sources,
            "rollup: job finished"
        );
    }

    /// Collects, aggregates, and persists every family of the job
    /// concurrently. The first failing family decides the job's recorded
    /// error; the other families' snapshots are unaffected either way.
    async fn run_families(&self, job: &mut RollupJob) -> Result<(), FamilyFailure> {
        let window = job.window();

        let token = match self.collector.begin_run().await {
            Ok(token) => token,
            Err(failure) => {
                return Err(FamilyFailure {
                    family: job.job_type.families()[0],
                    kind: ErrorKind::InsufficientSources,
                    message: format!("token minting failed: {failure}"),
                });
            }
        };

        // Losing the directory degrades to a global-only run; per-tenant
        // children simply come back next tick.
        let tenants = match self.tenants.list_tenants(&token).await {
            Ok(tenants) => tenants,
            Err(failure) => {
                warn!(%failure, "rollup: tenant directory unavailable, producing global-only snapshots");
                Vec::new()
            }
        };

        let results = join_all(job.job_type.families().into_iter().map(|family| {
            let token = token.clone();
            let tenants = tenants.as_slice();
            async move {
                self.run_family(family, &window, tenants, &token).await
            }
        }))
        .await;

        let mut first_failure = None;
        for result in results {
            match result {
                Ok(fetched) => job.processed_sources += fetched,
                Err(failure) => {
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
            }
        }

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// One family's rollup: fan out, aggregate, persist. Returns how many
    /// sources answered across all scopes.
    async fn run_family(
        &self,
        family: MetricFamily,
        window: &Window,
        tenants: &[TenantId],
        token: &AccessToken,
    ) -> Result<usize, FamilyFailure> {
        let collection = self
            .collector
            .collect_with_tenants(family, window, tenants, token)
            .await;

        let fetched = collection.global.fetched()
            + collection
                .tenants
                .values()
                .map(|output| output.fetched())
                .sum::<usize>();

        let previous = self
            .snapshots
            .latest(family, &Scope::Global)
            .await
            .map_err(|error| FamilyFailure {
                family,
                kind: ErrorKind::SourceUnavailable,
                message: format!("previous snapshot lookup failed: {error}"),
            })?;

        let snapshot = aggregate_family(family, &collection, window, previous.as_ref(), Utc::now())
            .map_err(|error| match error {
                AggregateError::InsufficientSources { .. } => FamilyFailure {
                    family,
                    kind: ErrorKind::InsufficientSources,
                    message: error.to_string(),
                },
            })?;

        match self.snapshots.persist(&snapshot).await {
            Ok(()) => {
                debug!(family = %family, window = %window, children = snapshot.scoped_children.len(), "rollup: snapshot persisted");
                Ok(fetched)
            }
            // An out-of-order window is logged and dropped; the family still
            // counts as processed because stored state is consistent.
            Err(StoreError::OutOfOrderWindow { .. }) => {
                warn!(family = %family, window = %window, "rollup: out-of-order snapshot dropped");
                Ok(fetched)
            }
            Err(error) => Err(FamilyFailure {
                family,
                kind: ErrorKind::SourceUnavailable,
                message: format!("snapshot persistence failed: {error}"),
            }),
        }
    }

    /// Registers the recurring cadence and returns the tick task. An invalid
    /// expression is reported and replaced with the hourly default, never
    /// silently unscheduled.
    pub fn schedule_recurring(
        self: Arc<Self>,
        cron_spec: &str,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let schedule = parse_cron_or_hourly(cron_spec);
        let scheduler = self;

        tokio::spawn(async move {
            info!("scheduler: recurring rollups registered");
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    warn!("scheduler: cron schedule has no upcoming fire times, stopping");
                    break;
                };
                let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                debug!(fire_at = %next, "scheduler: sleeping until next tick");

                tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("scheduler: shutdown requested, stopping recurring rollups");
                        break;
                    }
                    () = tokio::time::sleep(delay) => {
                        let window = Window::hour_ending(next);
                        match Arc::clone(&scheduler).trigger_run(JobType::Full, Some(window), Trigger::Scheduled).await {
                            Ok(job) => info!(job_id = %job.id, "scheduler: tick triggered"),
                            Err(TriggerError::Conflict) => {
                                warn!("scheduler: previous rollup still active, tick skipped");
                            }
                            Err(error) => error!(%error, "scheduler: tick failed to trigger"),
                        }
                    }
                }
            }
        })
    }

    pub async fn latest_snapshot(
        &self,
        family: MetricFamily,
        scope: &Scope,
    ) -> Result<Option<MetricSnapshot>, StoreError> {
        self.snapshots.latest(family, scope).await
    }

    pub async fn snapshot_as_of(
        &self,
        family: MetricFamily,
        scope: &Scope,
        date: DateTime<Utc>,
    ) -> Result<Option<MetricSnapshot>, StoreError> {
        self.snapshots.as_of(family, scope, date).await
    }

    pub async fn job(&self, id: JobId) -> Result<Option<RollupJob>, StoreError> {
        self.jobs.get(id).await
    }

    pub async fn recent_jobs(&self, limit: usize) -> Result<Vec<RollupJob>, StoreError> {
        self.jobs.list_recent(limit).await
    }
}

/// Parses a 6-field cron expression, reporting invalid input and falling
/// back to the hourly default.
pub fn parse_cron_or_hourly(spec: &str) -> cron::Schedule {
    match cron::Schedule::from_str(spec) {
        Ok(schedule) => schedule,
        Err(error) => {
            error!(%spec, %error, "scheduler: invalid cron expression, falling back to hourly");
            cron::Schedule::from_str(HOURLY_CRON).expect("hourly default must parse")
        }
    }
}
