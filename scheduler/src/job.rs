//! Rollup job records.
//!
//! A job is the audit trail of one run. Its status only ever moves forward
//! (pending → processing → completed/failed); a failed job is re-triggered
//! as a new job, never resurrected.

use chrono::{
    DateTime,
    Utc,
};
use edupulse_collector::{
    MetricFamily,
    Window,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Job status machine states.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the transition from self to target is valid.
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Processing),
            Self::Processing => matches!(target, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed => false,
        }
    }
}

/// What a run covers: one metric family, or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum JobType {
    Family(MetricFamily),
    Full,
}

impl JobType {
    /// The families this job aggregates.
    pub fn families(&self) -> Vec<MetricFamily> {
        use strum::IntoEnumIterator;
        match self {
            JobType::Family(family) => vec![*family],
            JobType::Full => MetricFamily::iter().collect(),
        }
    }

    /// Whether two job types contend for the same families.
    pub fn overlaps(&self, other: &JobType) -> bool {
        match (self, other) {
            (JobType::Full, _) | (_, JobType::Full) => true,
            (JobType::Family(a), JobType::Family(b)) => a == b,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Family(family) => family.fmt(f),
            JobType::Full => write!(f, "full"),
        }
    }
}

impl FromStr for JobType {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("full") {
            return Ok(JobType::Full);
        }
        MetricFamily::from_str(s).map(JobType::Family)
    }
}

impl From<JobType> for String {
    fn from(job_type: JobType) -> Self {
        job_type.to_string()
    }
}

impl TryFrom<String> for JobType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobType::from_str(&value).map_err(|_| format!("unknown job type: {value}"))
    }
}

/// How the run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Trigger {
    Manual,
    Scheduled,
}

/// Failure classification recorded on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ErrorKind {
    SourceUnavailable,
    InsufficientSources,
    Timeout,
    ConfigurationError,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

/// One scheduled or manually triggered rollup run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupJob {
    pub id: JobId,
    pub job_type: JobType,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: JobStatus,
    pub trigger: Trigger,
    /// Upstream sources that answered across every scope of the run.
    pub processed_sources: usize,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid job status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl RollupJob {
    pub fn new(job_type: JobType, window: Window, trigger: Trigger, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::generate(),
            job_type,
            window_start: window.start,
            window_end: window.end,
            status: JobStatus::Pending,
            trigger,
            processed_sources: 0,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn window(&self) -> Window {
        Window {
            start: self.window_start,
            end: self.window_end,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Completed)?;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn fail(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(JobError {
            kind,
            message: message.into(),
        });
        self.finished_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn job() -> RollupJob {
        let window = Window::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap(),
        )
        .unwrap();
        RollupJob::new(JobType::Full, window, Trigger::Manual, Utc::now())
    }

    #[test]
    fn status_walks_forward_only() {
        let mut job = job();
        let now = Utc::now();

        job.start(now).unwrap();
        assert_eq!(job.status, JobStatus::Processing);

        job.complete(now).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.status.is_terminal());

        // Terminal states never regress.
        assert!(job.fail(ErrorKind::Timeout, "late", now).is_err());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn pending_jobs_cannot_complete_without_processing() {
        let mut job = job();
        let err = job.complete(Utc::now()).unwrap_err();
        assert_eq!(err.from, JobStatus::Pending);
        assert_eq!(err.to, JobStatus::Completed);
    }

    #[test]
    fn failing_records_the_error() {
        let mut job = job();
        let now = Utc::now();
        job.start(now).unwrap();
        job.fail(ErrorKind::InsufficientSources, "badge source down", now)
            .unwrap();

        let error = job.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::InsufficientSources);
        assert_eq!(error.message, "badge source down");
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn full_jobs_overlap_every_family() {
        assert!(JobType::Full.overlaps(&JobType::Family(MetricFamily::Badge)));
        assert!(JobType::Family(MetricFamily::Badge).overlaps(&JobType::Full));
        assert!(JobType::Family(MetricFamily::Task).overlaps(&JobType::Family(MetricFamily::Task)));
        assert!(!JobType::Family(MetricFamily::Task).overlaps(&JobType::Family(MetricFamily::User)));
    }

    #[test]
    fn job_type_parses_family_names_and_full() {
        assert_eq!(JobType::from_str("full").unwrap(), JobType::Full);
        assert_eq!(
            JobType::from_str("task").unwrap(),
            JobType::Family(MetricFamily::Task)
        );
        assert!(JobType::from_str("grades").is_err());
    }
}
