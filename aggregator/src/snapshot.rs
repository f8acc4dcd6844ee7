use chrono::{
    DateTime,
    Utc,
};
use edupulse_collector::{
    MetricFamily,
    TenantId,
    Window,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

/// The partition a snapshot applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    Global,
    Tenant(TenantId),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Tenant(id) => write!(f, "{id}"),
        }
    }
}

/// Wire names of the snapshot counters, kept camelCase for the dashboard
/// consumers.
pub mod keys {
    // user family
    pub const TOTAL_USERS: &str = "totalUsers";
    pub const ACTIVE_USERS: &str = "activeUsers";
    pub const NEW_USERS: &str = "newUsers";
    pub const ACTIVE_RATE: &str = "activeRate";
    pub const GROWTH_RATE: &str = "growthRate";
    pub const ROLES: &str = "roles";

    // task family
    pub const TOTAL_TASKS: &str = "totalTasks";
    pub const COMPLETED_TASKS: &str = "completedTasks";
    pub const PENDING_TASKS: &str = "pendingTasks";
    pub const COMPLETION_RATE: &str = "completionRate";
    pub const AVERAGE_COMPLETION_TIME_HOURS: &str = "averageCompletionTimeHours";
    pub const CATEGORIES: &str = "categories";

    // point family
    pub const TOTAL_POINTS_EARNED: &str = "totalPointsEarned";
    pub const TOTAL_POINTS_SPENT: &str = "totalPointsSpent";
    pub const CURRENT_BALANCE: &str = "currentBalance";
    pub const ECONOMY_HEALTH_RATIO: &str = "economyHealthRatio";
    pub const POINTS_EARNING_RATE: &str = "pointsEarningRate";
    pub const INFLATION_RATE: &str = "inflationRate";
    pub const TRANSACTION_TYPES: &str = "transactionTypes";

    // badge family
    pub const TOTAL_BADGES_AWARDED: &str = "totalBadgesAwarded";
    pub const UNIQUE_RECIPIENTS: &str = "uniqueRecipients";
    pub const AWARD_RATE: &str = "awardRate";
    pub const BADGE_TYPES: &str = "badgeTypes";
    pub const LEVELS: &str = "levels";
}

/// One tenant's share of a snapshot, same shape as the global totals but
/// restricted to that tenant's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSnapshot {
    pub tenant_id: TenantId,
    pub totals: BTreeMap<String, f64>,
    pub breakdowns: BTreeMap<String, BTreeMap<String, u64>>,
    pub derived: BTreeMap<String, f64>,
}

/// An immutable, point-in-time aggregated metrics record for one scope and
/// metric family.
///
/// `derived` values are pure functions of `totals` (plus the previous
/// snapshot for rate-of-change metrics) computed at write time. A snapshot is
/// only ever created whole; it is superseded by the next rollup, never
/// edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub scope: Scope,
    pub metric_family: MetricFamily,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub totals: BTreeMap<String, f64>,
    pub breakdowns: BTreeMap<String, BTreeMap<String, u64>>,
    pub derived: BTreeMap<String, f64>,
    pub scoped_children: Vec<TenantSnapshot>,
    /// Set once by the scheduler at persistence time; the only wall-clock
    /// field of a snapshot.
    pub created_at: DateTime<Utc>,
}

impl MetricSnapshot {
    pub fn window(&self) -> Window {
        Window {
            start: self.window_start,
            end: self.window_end,
        }
    }

    pub fn total(&self, key: &str) -> f64 {
        self.totals.get(key).copied().unwrap_or(0.0)
    }

    pub fn derived_value(&self, key: &str) -> f64 {
        self.derived.get(key).copied().unwrap_or(0.0)
    }

    pub fn child(&self, tenant: &TenantId) -> Option<&TenantSnapshot> {
        self.scoped_children
            .iter()
            .find(|child| &child.tenant_id == tenant)
    }

    /// Materializes one embedded child as a standalone snapshot row. Used by
    /// the storage adapter, which indexes tenant scopes as rows of their own.
    pub fn child_as_snapshot(&self, child: &TenantSnapshot) -> MetricSnapshot {
        MetricSnapshot {
            scope: Scope::Tenant(child.tenant_id.clone()),
            metric_family: self.metric_family,
            window_start: self.window_start,
            window_end: self.window_end,
            totals: child.totals.clone(),
            breakdowns: child.breakdowns.clone(),
            derived: child.derived.clone(),
            scoped_children: Vec::new(),
            created_at: self.created_at,
        }
    }
}
