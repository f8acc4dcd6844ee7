//! Family-specific aggregation.
//!
//! Each family maps its collector output to the snapshot shape with the same
//! rules: absent values aggregate as zero/empty, unknown breakdown
//! categories are retained verbatim, and a snapshot is produced whole or not
//! at all. The one hard requirement is the family's primary count source; a
//! fan-out that lost it cannot produce a trustworthy snapshot and fails with
//! [`AggregateError::InsufficientSources`].

use crate::{
    arithmetic::{
        per_capita,
        per_day_rate,
        percent_change,
        rate,
    },
    snapshot::{
        keys,
        MetricSnapshot,
        Scope,
        TenantSnapshot,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use edupulse_collector::{
    CollectorOutput,
    FamilyCollection,
    MetricFamily,
    SourceKey,
    Window,
};
use std::collections::BTreeMap;

/// The task service does not expose completion timestamps yet, so the
/// average completion time stays a fixed placeholder until it does.
const AVERAGE_COMPLETION_TIME_HOURS: f64 = 24.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    #[error("{family} family: primary source {source} produced no value")]
    InsufficientSources {
        family: MetricFamily,
        source: SourceKey,
    },
}

struct Parts {
    totals: BTreeMap<String, f64>,
    breakdowns: BTreeMap<String, BTreeMap<String, u64>>,
    derived: BTreeMap<String, f64>,
}

/// Aggregates one family's collection into a complete global snapshot with
/// one child per collected tenant.
///
/// `previous` is the latest persisted global snapshot of the same family,
/// used only for rate-of-change metrics; `created_at` is stamped by the
/// caller so the arithmetic itself never reads the clock.
pub fn aggregate_family(
    family: MetricFamily,
    collection: &FamilyCollection,
    window: &Window,
    previous: Option<&MetricSnapshot>,
    created_at: DateTime<Utc>,
) -> Result<MetricSnapshot, AggregateError> {
    let primary = family.primary_source();
    if collection.global.count(primary).is_none() {
        return Err(AggregateError::InsufficientSources {
            family,
            source: primary,
        });
    }

    let global = family_parts(family, &collection.global, previous.map(|p| &p.totals));

    let scoped_children = collection
        .tenants
        .iter()
        .map(|(tenant, output)| {
            let previous_totals = previous
                .and_then(|p| p.child(tenant))
                .map(|child| &child.totals);
            let parts = family_parts(family, output, previous_totals);
            TenantSnapshot {
                tenant_id: tenant.clone(),
                totals: parts.totals,
                breakdowns: parts.breakdowns,
                derived: parts.derived,
            }
        })
        .collect();

    Ok(MetricSnapshot {
        scope: Scope::Global,
        metric_family: family,
        window_start: window.start,
        window_end: window.end,
        totals: global.totals,
        breakdowns: global.breakdowns,
        derived: global.derived,
        scoped_children,
        created_at,
    })
}

fn family_parts(
    family: MetricFamily,
    output: &CollectorOutput,
    previous_totals: Option<&BTreeMap<String, f64>>,
) -> Parts {
    match family {
        MetricFamily::User => user_parts(output, previous_totals),
        MetricFamily::Task => task_parts(output),
        MetricFamily::Point => point_parts(output, previous_totals),
        MetricFamily::Badge => badge_parts(output),
    }
}

fn count(output: &CollectorOutput, key: SourceKey) -> f64 {
    output.count(key).unwrap_or(0) as f64
}

fn breakdown(output: &CollectorOutput, key: SourceKey) -> BTreeMap<String, u64> {
    output.breakdown(key).cloned().unwrap_or_default()
}

fn previous_total(previous_totals: Option<&BTreeMap<String, f64>>, key: &str) -> Option<f64> {
    previous_totals.and_then(|totals| totals.get(key).copied())
}

fn user_parts(output: &CollectorOutput, previous_totals: Option<&BTreeMap<String, f64>>) -> Parts {
    let total = count(output, SourceKey::UserTotals);
    let active = count(output, SourceKey::ActiveUsers);
    let new_users = count(output, SourceKey::NewUsers);

    let mut totals = BTreeMap::new();
    totals.insert(keys::TOTAL_USERS.to_string(), total);
    totals.insert(keys::ACTIVE_USERS.to_string(), active);
    totals.insert(keys::NEW_USERS.to_string(), new_users);

    let mut breakdowns = BTreeMap::new();
    breakdowns.insert(
        keys::ROLES.to_string(),
        breakdown(output, SourceKey::RoleBreakdown),
    );

    let mut derived = BTreeMap::new();
    derived.insert(keys::ACTIVE_RATE.to_string(), rate(active, total));
    derived.insert(
        keys::GROWTH_RATE.to_string(),
        percent_change(total, previous_total(previous_totals, keys::TOTAL_USERS)),
    );

    Parts {
        totals,
        breakdowns,
        derived,
    }
}

fn task_parts(output: &CollectorOutput) -> Parts {
    let total = count(output, SourceKey::TaskTotals);
    let completed = count(output, SourceKey::CompletedTasks);
    let pending = count(output, SourceKey::PendingTasks);

    let mut totals = BTreeMap::new();
    totals.insert(keys::TOTAL_TASKS.to_string(), total);
    totals.insert(keys::COMPLETED_TASKS.to_string(), completed);
    totals.insert(keys::PENDING_TASKS.to_string(), pending);

    let mut breakdowns = BTreeMap::new();
    breakdowns.insert(
        keys::CATEGORIES.to_string(),
        breakdown(output, SourceKey::TaskCategoryBreakdown),
    );

    let mut derived = BTreeMap::new();
    derived.insert(keys::COMPLETION_RATE.to_string(), rate(completed, total));
    derived.insert(
        keys::AVERAGE_COMPLETION_TIME_HOURS.to_string(),
        AVERAGE_COMPLETION_TIME_HOURS,
    );

    Parts {
        totals,
        breakdowns,
        derived,
    }
}

fn point_parts(output: &CollectorOutput, previous_totals: Option<&BTreeMap<String, f64>>) -> Parts {
    let earned = count(output, SourceKey::PointsEarned);
    let spent = count(output, SourceKey::PointsSpent);
    let balance = count(output, SourceKey::PointsBalance);

    let mut totals = BTreeMap::new();
    totals.insert(keys::TOTAL_POINTS_EARNED.to_string(), earned);
    totals.insert(keys::TOTAL_POINTS_SPENT.to_string(), spent);
    totals.insert(keys::CURRENT_BALANCE.to_string(), balance);

    let mut breakdowns = BTreeMap::new();
    breakdowns.insert(
        keys::TRANSACTION_TYPES.to_string(),
        breakdown(output, SourceKey::TransactionTypeBreakdown),
    );

    let series = output
        .series(SourceKey::PointsEarnedSeries)
        .unwrap_or_default();

    let mut derived = BTreeMap::new();
    derived.insert(keys::ECONOMY_HEALTH_RATIO.to_string(), rate(spent, earned));
    derived.insert(keys::POINTS_EARNING_RATE.to_string(), per_day_rate(series));
    derived.insert(
        keys::INFLATION_RATE.to_string(),
        percent_change(
            earned,
            previous_total(previous_totals, keys::TOTAL_POINTS_EARNED),
        ),
    );

    Parts {
        totals,
        breakdowns,
        derived,
    }
}

fn badge_parts(output: &CollectorOutput) -> Parts {
    let awarded = count(output, SourceKey::BadgesAwarded);
    let recipients = count(output, SourceKey::BadgeRecipients);

    let mut totals = BTreeMap::new();
    totals.insert(keys::TOTAL_BADGES_AWARDED.to_string(), awarded);
    totals.insert(keys::UNIQUE_RECIPIENTS.to_string(), recipients);

    let mut breakdowns = BTreeMap::new();
    breakdowns.insert(
        keys::BADGE_TYPES.to_string(),
        breakdown(output, SourceKey::BadgeTypeBreakdown),
    );
    breakdowns.insert(
        keys::LEVELS.to_string(),
        breakdown(output, SourceKey::BadgeLevelBreakdown),
    );

    let mut derived = BTreeMap::new();
    derived.insert(
        keys::AWARD_RATE.to_string(),
        per_capita(awarded, recipients),
    );

    Parts {
        totals,
        breakdowns,
        derived,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use edupulse_collector::{
        RawValue,
        SeriesPoint,
        SourceFailure,
        TenantId,
    };
    use pretty_assertions::assert_eq;

    fn window() -> Window {
        Window::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 5).unwrap()
    }

    fn task_output(total: u64, completed: u64) -> CollectorOutput {
        let mut output = CollectorOutput::default();
        output
            .values
            .insert(SourceKey::TaskTotals, RawValue::Count(total));
        output
            .values
            .insert(SourceKey::CompletedTasks, RawValue::Count(completed));
        output
            .values
            .insert(SourceKey::PendingTasks, RawValue::Count(total - completed));
        output.values.insert(
            SourceKey::TaskCategoryBreakdown,
            RawValue::Breakdown(BTreeMap::from([
                ("homework".to_string(), 40),
                ("chores".to_string(), 60),
            ])),
        );
        output
    }

    #[test]
    fn task_completion_rate_comes_out_as_a_percentage() {
        let collection = FamilyCollection {
            global: task_output(100, 60),
            tenants: BTreeMap::new(),
        };

        let snapshot =
            aggregate_family(MetricFamily::Task, &collection, &window(), None, created_at())
                .unwrap();

        assert_eq!(snapshot.total(keys::TOTAL_TASKS), 100.0);
        assert_eq!(snapshot.total(keys::COMPLETED_TASKS), 60.0);
        assert_eq!(snapshot.derived_value(keys::COMPLETION_RATE), 60.0);
    }

    #[test]
    fn empty_totals_never_produce_nan_rates() {
        let collection = FamilyCollection {
            global: task_output(0, 0),
            tenants: BTreeMap::new(),
        };

        let snapshot =
            aggregate_family(MetricFamily::Task, &collection, &window(), None, created_at())
                .unwrap();

        assert_eq!(snapshot.derived_value(keys::COMPLETION_RATE), 0.0);
        assert!(snapshot.derived.values().all(|v| v.is_finite()));
    }

    #[test]
    fn missing_primary_source_is_insufficient() {
        let mut output = task_output(100, 60);
        output.values.remove(&SourceKey::TaskTotals);
        output
            .failures
            .insert(SourceKey::TaskTotals, SourceFailure::TimedOut(10));
        let collection = FamilyCollection {
            global: output,
            tenants: BTreeMap::new(),
        };

        let err = aggregate_family(MetricFamily::Task, &collection, &window(), None, created_at())
            .unwrap_err();

        assert_eq!(
            err,
            AggregateError::InsufficientSources {
                family: MetricFamily::Task,
                source: SourceKey::TaskTotals,
            }
        );
    }

    #[test]
    fn secondary_source_failures_degrade_to_zero() {
        let mut output = task_output(100, 60);
        output.values.remove(&SourceKey::CompletedTasks);
        output
            .failures
            .insert(SourceKey::CompletedTasks, SourceFailure::Unavailable("503".into()));
        let collection = FamilyCollection {
            global: output,
            tenants: BTreeMap::new(),
        };

        let snapshot =
            aggregate_family(MetricFamily::Task, &collection, &window(), None, created_at())
                .unwrap();

        assert_eq!(snapshot.total(keys::COMPLETED_TASKS), 0.0);
        assert_eq!(snapshot.derived_value(keys::COMPLETION_RATE), 0.0);
    }

    #[test]
    fn unknown_breakdown_categories_are_retained() {
        let mut output = task_output(10, 5);
        output.values.insert(
            SourceKey::TaskCategoryBreakdown,
            RawValue::Breakdown(BTreeMap::from([
                ("homework".to_string(), 5),
                ("community-service".to_string(), 5),
            ])),
        );
        let collection = FamilyCollection {
            global: output,
            tenants: BTreeMap::new(),
        };

        let snapshot =
            aggregate_family(MetricFamily::Task, &collection, &window(), None, created_at())
                .unwrap();

        let categories = snapshot.breakdowns.get(keys::CATEGORIES).unwrap();
        assert_eq!(categories.get("community-service"), Some(&5));
    }

    #[test]
    fn tenants_with_no_records_still_get_all_zero_children() {
        let collection = FamilyCollection {
            global: task_output(100, 60),
            tenants: BTreeMap::from([
                (TenantId::from("school-1"), task_output(20, 10)),
                (TenantId::from("school-empty"), CollectorOutput::default()),
            ]),
        };

        let snapshot =
            aggregate_family(MetricFamily::Task, &collection, &window(), None, created_at())
                .unwrap();

        assert_eq!(snapshot.scoped_children.len(), 2);
        let empty = snapshot.child(&TenantId::from("school-empty")).unwrap();
        assert_eq!(empty.totals.get(keys::TOTAL_TASKS), Some(&0.0));
        assert_eq!(empty.derived.get(keys::COMPLETION_RATE), Some(&0.0));
    }

    fn point_output(earned: u64, spent: u64) -> CollectorOutput {
        let mut output = CollectorOutput::default();
        output
            .values
            .insert(SourceKey::PointsEarned, RawValue::Count(earned));
        output
            .values
            .insert(SourceKey::PointsSpent, RawValue::Count(spent));
        output
            .values
            .insert(SourceKey::PointsBalance, RawValue::Count(earned - spent));
        output.values.insert(
            SourceKey::PointsEarnedSeries,
            RawValue::Series(vec![
                SeriesPoint {
                    date: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
                    value: 1000.0,
                },
                SeriesPoint {
                    date: Utc.with_ymd_and_hms(2025, 6, 6, 0, 0, 0).unwrap(),
                    value: 1500.0,
                },
            ]),
        );
        output
    }

    #[test]
    fn points_earning_rate_is_normalized_per_day() {
        let collection = FamilyCollection {
            global: point_output(1500, 300),
            tenants: BTreeMap::new(),
        };

        let snapshot = aggregate_family(
            MetricFamily::Point,
            &collection,
            &window(),
            None,
            created_at(),
        )
        .unwrap();

        // 500 points over 5 days.
        assert_eq!(snapshot.derived_value(keys::POINTS_EARNING_RATE), 100.0);
        assert_eq!(snapshot.derived_value(keys::ECONOMY_HEALTH_RATIO), 20.0);
        // No previous snapshot: inflation defined as zero.
        assert_eq!(snapshot.derived_value(keys::INFLATION_RATE), 0.0);
    }

    #[test]
    fn inflation_rate_uses_the_previous_snapshot() {
        let previous = aggregate_family(
            MetricFamily::Point,
            &FamilyCollection {
                global: point_output(1000, 100),
                tenants: BTreeMap::new(),
            },
            &window(),
            None,
            created_at(),
        )
        .unwrap();

        let snapshot = aggregate_family(
            MetricFamily::Point,
            &FamilyCollection {
                global: point_output(1500, 300),
                tenants: BTreeMap::new(),
            },
            &window(),
            Some(&previous),
            created_at(),
        )
        .unwrap();

        assert_eq!(snapshot.derived_value(keys::INFLATION_RATE), 50.0);
    }

    #[test]
    fn aggregation_is_deterministic_for_identical_input() {
        let collection = FamilyCollection {
            global: point_output(1500, 300),
            tenants: BTreeMap::from([(TenantId::from("school-1"), point_output(100, 20))]),
        };

        let a = aggregate_family(
            MetricFamily::Point,
            &collection,
            &window(),
            None,
            created_at(),
        )
        .unwrap();
        let b = aggregate_family(
            MetricFamily::Point,
            &collection,
            &window(),
            None,
            created_at(),
        )
        .unwrap();

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
