//! Snapshot and job persistence.
//!
//! The traits are the seam a document-database adapter plugs into; the
//! in-memory implementation backs tests and single-node deployments.
//!
//! Two rules live at this boundary rather than in callers:
//!
//! - Snapshots within one (scope, family) are append-only and totally
//!   ordered by `window_start`; an out-of-order write is rejected and leaves
//!   stored state untouched.
//! - At most one non-terminal job may cover a family at a time; a
//!   conflicting job creation is rejected atomically.

use crate::job::{
    JobId,
    JobStatus,
    RollupJob,
};
use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use edupulse_aggregator::{
    MetricSnapshot,
    Scope,
};
use edupulse_collector::MetricFamily;
use std::{
    collections::HashMap,
    sync::{
        PoisonError,
        RwLock,
    },
};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("a job covering {job_type} is already {status}")]
    JobConflict {
        job_type: String,
        status: JobStatus,
    },
    #[error(
        "snapshot for {family}/{scope} at {window_start} is older than the latest persisted ({latest})"
    )]
    OutOfOrderWindow {
        family: MetricFamily,
        scope: String,
        window_start: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("storage failure: {0}")]
    Storage(String),
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persists a snapshot, enforcing the per-(scope, family) window
    /// ordering. Tenant children are materialized as rows of their own so
    /// tenant-scoped reads work the same way as global ones.
    async fn persist(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError>;

    async fn latest(
        &self,
        family: MetricFamily,
        scope: &Scope,
    ) -> Result<Option<MetricSnapshot>, StoreError>;

    /// The most recent snapshot with `window_start <= date`.
    async fn as_of(
        &self,
        family: MetricFamily,
        scope: &Scope,
        date: DateTime<Utc>,
    ) -> Result<Option<MetricSnapshot>, StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job, rejecting it if a non-terminal job already covers
    /// an overlapping family set. Check and insert happen under one lock;
    /// this is the advisory-lock analogue of a unique partial index.
    async fn create(&self, job: &RollupJob) -> Result<(), StoreError>;

    async fn update(&self, job: &RollupJob) -> Result<(), StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<RollupJob>, StoreError>;

    /// Most recent jobs first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<RollupJob>, StoreError>;
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    rows: RwLock<HashMap<(MetricFamily, Scope), Vec<MetricSnapshot>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_row(
        rows: &mut HashMap<(MetricFamily, Scope), Vec<MetricSnapshot>>,
        snapshot: MetricSnapshot,
    ) -> Result<(), StoreError> {
        let key = (snapshot.metric_family, snapshot.scope.clone());
        let series = rows.entry(key).or_default();

        if let Some(last) = series.last() {
            if snapshot.window_start < last.window_start {
                return Err(StoreError::OutOfOrderWindow {
                    family: snapshot.metric_family,
                    scope: snapshot.scope.to_string(),
                    window_start: snapshot.window_start,
                    latest: last.window_start,
                });
            }
        }

        series.push(snapshot);
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn persist(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(poison_err)?;

        Self::insert_row(&mut rows, snapshot.clone())?;

        // Children share the parent's window; a child rejection means the
        // tenant series saw a newer window out of band, and only that row is
        // dropped.
        for child in &snapshot.scoped_children {
            if let Err(error) = Self::insert_row(&mut rows, snapshot.child_as_snapshot(child)) {
                warn!(%error, tenant = %child.tenant_id, "store: tenant snapshot dropped");
            }
        }

        Ok(())
    }

    async fn latest(
        &self,
        family: MetricFamily,
        scope: &Scope,
    ) -> Result<Option<MetricSnapshot>, StoreError> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows
            .get(&(family, scope.clone()))
            .and_then(|series| series.last().cloned()))
    }

    async fn as_of(
        &self,
        family: MetricFamily,
        scope: &Scope,
        date: DateTime<Utc>,
    ) -> Result<Option<MetricSnapshot>, StoreError> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows.get(&(family, scope.clone())).and_then(|series| {
            series
                .iter()
                .rev()
                .find(|snapshot| snapshot.window_start <= date)
                .cloned()
        }))
    }
}

/// In-memory job store.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<Vec<RollupJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &RollupJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;

        if let Some(active) = jobs
            .iter()
            .find(|existing| !existing.status.is_terminal() && existing.job_type.overlaps(&job.job_type))
        {
            return Err(StoreError::JobConflict {
                job_type: active.job_type.to_string(),
                status: active.status,
            });
        }

        jobs.push(job.clone());
        Ok(())
    }

    async fn update(&self, job: &RollupJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        let stored = jobs
            .iter_mut()
            .find(|existing| existing.id == job.id)
            .ok_or(StoreError::JobNotFound(job.id))?;
        *stored = job.clone();
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<RollupJob>, StoreError> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        Ok(jobs.iter().find(|job| job.id == id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<RollupJob>, StoreError> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        Ok(jobs.iter().rev().take(limit).cloned().collect())
    }
}
