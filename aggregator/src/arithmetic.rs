//! The shared aggregation arithmetic.
//!
//! Every helper is total: zero denominators yield exactly `0.0`, never NaN
//! or infinity, so snapshot consumers can render values unguarded.

use edupulse_collector::SeriesPoint;

/// `part / whole * 100`, or `0` when `whole` is zero.
pub fn rate(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

/// Period-over-period change in percent, or `0` when there is no previous
/// value to compare against.
pub fn percent_change(current: f64, previous: Option<f64>) -> f64 {
    match previous {
        Some(previous) if previous != 0.0 => (current - previous) / previous * 100.0,
        _ => 0.0,
    }
}

/// `value / population`, or `0` when the population is zero.
pub fn per_capita(value: f64, population: f64) -> f64 {
    if population == 0.0 {
        0.0
    } else {
        value / population
    }
}

/// Average daily growth over a cumulative series: the delta between the
/// earliest and latest point divided by the days between them. Clamped to at
/// least one day so same-day windows cannot blow up the rate.
pub fn per_day_rate(series: &[SeriesPoint]) -> f64 {
    let (earliest, latest) = match (series.first(), series.last()) {
        (Some(earliest), Some(latest)) => (earliest, latest),
        _ => return 0.0,
    };

    let days = (latest.date - earliest.date).num_days().max(1);
    (latest.value - earliest.value) / days as f64
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{
        TimeZone,
        Utc,
    };

    #[test]
    fn rate_of_zero_total_is_exactly_zero() {
        assert_eq!(rate(0.0, 0.0), 0.0);
        assert_eq!(rate(60.0, 0.0), 0.0);
        assert!(rate(60.0, 0.0).is_finite());
    }

    #[test]
    fn rate_is_a_percentage() {
        assert_eq!(rate(60.0, 100.0), 60.0);
        assert_eq!(rate(1.0, 3.0), 100.0 / 3.0);
    }

    #[test]
    fn percent_change_without_a_baseline_is_exactly_zero() {
        assert_eq!(percent_change(42.0, None), 0.0);
        assert_eq!(percent_change(42.0, Some(0.0)), 0.0);
    }

    #[test]
    fn percent_change_tracks_growth_and_decline() {
        assert_eq!(percent_change(150.0, Some(100.0)), 50.0);
        assert_eq!(percent_change(50.0, Some(100.0)), -50.0);
    }

    #[test]
    fn per_day_rate_spans_the_series() {
        let series = vec![
            SeriesPoint {
                date: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
                value: 1000.0,
            },
            SeriesPoint {
                date: Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap(),
                value: 1180.0,
            },
            SeriesPoint {
                date: Utc.with_ymd_and_hms(2025, 6, 6, 0, 0, 0).unwrap(),
                value: 1500.0,
            },
        ];
        // 500 points over 5 days.
        assert_eq!(per_day_rate(&series), 100.0);
    }

    #[test]
    fn per_day_rate_clamps_same_day_windows() {
        let day = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let series = vec![
            SeriesPoint {
                date: day,
                value: 100.0,
            },
            SeriesPoint {
                date: day + chrono::Duration::hours(6),
                value: 400.0,
            },
        ];
        // Same calendar day: divide by one, not by a near-zero fraction.
        assert_eq!(per_day_rate(&series), 300.0);
    }

    #[test]
    fn per_day_rate_of_empty_or_single_series_is_zero() {
        assert_eq!(per_day_rate(&[]), 0.0);

        let single = vec![SeriesPoint {
            date: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            value: 500.0,
        }];
        assert_eq!(per_day_rate(&single), 0.0);
    }

    #[test]
    fn per_capita_guards_the_empty_population() {
        assert_eq!(per_capita(30.0, 0.0), 0.0);
        assert_eq!(per_capita(30.0, 10.0), 3.0);
    }
}
