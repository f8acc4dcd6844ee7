//! Per-family source tables.
//!
//! Each metric family is backed by a fixed set of upstream endpoints. A
//! source is described by where it lives, how to call it, and which of the
//! three payload shapes it returns. The collector iterates these tables; the
//! aggregator looks values up by [`SourceKey`].

use crate::family::MetricFamily;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

/// Identifies one upstream fetch within a family.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum SourceKey {
    // user family
    UserTotals,
    ActiveUsers,
    NewUsers,
    RoleBreakdown,
    // task family
    TaskTotals,
    CompletedTasks,
    PendingTasks,
    TaskCategoryBreakdown,
    // point family
    PointsEarned,
    PointsSpent,
    PointsBalance,
    PointsEarnedSeries,
    TransactionTypeBreakdown,
    // badge family
    BadgesAwarded,
    BadgeRecipients,
    BadgeTypeBreakdown,
    BadgeLevelBreakdown,
}

// `AggregateError::InsufficientSources` carries a `SourceKey` in a field named
// `source`, which `thiserror` treats as the error's source and therefore
// requires to implement `std::error::Error`. `SourceKey` already provides the
// `Debug` + `Display` supertraits, so this is an empty marker impl.
impl std::error::Error for SourceKey {}

/// Which sibling service a source lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    User,
    Task,
    Point,
    Badge,
}

/// Payload shape of a source's `data` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `{ "data": { "total": <n> } }`
    Count,
    /// `{ "data": { "breakdown": { "<key>": <n>, ... } } }`
    Breakdown,
    /// `{ "data": { "series": [ { "date": ..., "value": ... }, ... ] } }`
    Series,
}

/// Static description of one upstream source.
#[derive(Debug, Clone, Copy)]
pub struct SourceSpec {
    pub key: SourceKey,
    pub service: ServiceKind,
    pub path: &'static str,
    /// Fixed query parameters; window bounds and tenant scoping are appended
    /// by the client.
    pub query: &'static [(&'static str, &'static str)],
    pub kind: SourceKind,
}

const USER_SOURCES: &[SourceSpec] = &[
    SourceSpec {
        key: SourceKey::UserTotals,
        service: ServiceKind::User,
        path: "api/users/count",
        query: &[],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::ActiveUsers,
        service: ServiceKind::User,
        path: "api/users/count",
        query: &[("active", "true")],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::NewUsers,
        service: ServiceKind::User,
        path: "api/users/count",
        query: &[("createdWithinWindow", "true")],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::RoleBreakdown,
        service: ServiceKind::User,
        path: "api/users/breakdown",
        query: &[("by", "role")],
        kind: SourceKind::Breakdown,
    },
];

const TASK_SOURCES: &[SourceSpec] = &[
    SourceSpec {
        key: SourceKey::TaskTotals,
        service: ServiceKind::Task,
        path: "api/tasks/count",
        query: &[],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::CompletedTasks,
        service: ServiceKind::Task,
        path: "api/tasks/count",
        query: &[("status", "completed")],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::PendingTasks,
        service: ServiceKind::Task,
        path: "api/tasks/count",
        query: &[("status", "pending")],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::TaskCategoryBreakdown,
        service: ServiceKind::Task,
        path: "api/tasks/breakdown",
        query: &[("by", "category")],
        kind: SourceKind::Breakdown,
    },
];

const POINT_SOURCES: &[SourceSpec] = &[
    SourceSpec {
        key: SourceKey::PointsEarned,
        service: ServiceKind::Point,
        path: "api/points/earned/total",
        query: &[],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::PointsSpent,
        service: ServiceKind::Point,
        path: "api/points/spent/total",
        query: &[],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::PointsBalance,
        service: ServiceKind::Point,
        path: "api/points/balance/total",
        query: &[],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::PointsEarnedSeries,
        service: ServiceKind::Point,
        path: "api/points/earned/series",
        query: &[],
        kind: SourceKind::Series,
    },
    SourceSpec {
        key: SourceKey::TransactionTypeBreakdown,
        service: ServiceKind::Point,
        path: "api/points/breakdown",
        query: &[("by", "type")],
        kind: SourceKind::Breakdown,
    },
];

const BADGE_SOURCES: &[SourceSpec] = &[
    SourceSpec {
        key: SourceKey::BadgesAwarded,
        service: ServiceKind::Badge,
        path: "api/badges/awarded/count",
        query: &[],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::BadgeRecipients,
        service: ServiceKind::Badge,
        path: "api/badges/recipients/count",
        query: &[],
        kind: SourceKind::Count,
    },
    SourceSpec {
        key: SourceKey::BadgeTypeBreakdown,
        service: ServiceKind::Badge,
        path: "api/badges/breakdown",
        query: &[("by", "type")],
        kind: SourceKind::Breakdown,
    },
    SourceSpec {
        key: SourceKey::BadgeLevelBreakdown,
        service: ServiceKind::Badge,
        path: "api/badges/breakdown",
        query: &[("by", "level")],
        kind: SourceKind::Breakdown,
    },
];

impl MetricFamily {
    /// All sources this family fans out to.
    pub fn sources(&self) -> &'static [SourceSpec] {
        match self {
            MetricFamily::User => USER_SOURCES,
            MetricFamily::Task => TASK_SOURCES,
            MetricFamily::Point => POINT_SOURCES,
            MetricFamily::Badge => BADGE_SOURCES,
        }
    }

    /// The source that must succeed for this family's snapshot to be
    /// trustworthy. Anything else failing degrades to zero-filled values.
    pub fn primary_source(&self) -> SourceKey {
        match self {
            MetricFamily::User => SourceKey::UserTotals,
            MetricFamily::Task => SourceKey::TaskTotals,
            MetricFamily::Point => SourceKey::PointsEarned,
            MetricFamily::Badge => SourceKey::BadgesAwarded,
        }
    }
}

/// One point of a cumulative series, as reported by an upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: DateTime<Utc>,
    pub value: f64,
}

/// A raw value fetched from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Count(u64),
    Breakdown(BTreeMap<String, u64>),
    Series(Vec<SeriesPoint>),
}

impl RawValue {
    pub fn as_count(&self) -> Option<u64> {
        match self {
            RawValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_breakdown(&self) -> Option<&BTreeMap<String, u64>> {
        match self {
            RawValue::Breakdown(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&[SeriesPoint]> {
        match self {
            RawValue::Series(points) => Some(points),
            _ => None,
        }
    }
}

/// Why one upstream call produced no value. Recorded per source and absorbed
/// by the run; never raised as an exception.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum SourceFailure {
    #[error("source timed out after {0}s")]
    TimedOut(u64),
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("source returned a malformed payload: {0}")]
    Malformed(String),
}
