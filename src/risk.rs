use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*(day|week|month)").expect("duration pattern compiles")
});

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::High,
        RiskLevel::Medium,
        RiskLevel::Low,
        RiskLevel::None,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn is_at_risk(self) -> bool {
        self >= RiskLevel::Medium
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Offsets and gaps used to classify an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, clap::Args)]
pub struct RiskThresholds {
    /// Days past the estimated duration after which a learner is high risk
    #[arg(long, env = "COURSE_PROGRESS_HIGH_OVERDUE_DAYS", default_value_t = 60)]
    pub high_overdue_days: i64,
    /// Days past the estimated duration after which a learner is medium risk
    #[arg(long, env = "COURSE_PROGRESS_MEDIUM_OVERDUE_DAYS", default_value_t = 30)]
    pub medium_overdue_days: i64,
    /// Progress gap (percentage points) that marks medium risk
    #[arg(long, env = "COURSE_PROGRESS_MEDIUM_GAP", default_value_t = 50.0)]
    pub medium_gap: f64,
    /// Progress gap (percentage points) that marks low risk
    #[arg(long, env = "COURSE_PROGRESS_LOW_GAP", default_value_t = 25.0)]
    pub low_gap: f64,
    /// Estimated course length when the duration text cannot be parsed
    #[arg(long, env = "COURSE_PROGRESS_DEFAULT_DURATION_DAYS", default_value_t = 30)]
    pub default_duration_days: i64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high_overdue_days: 60,
            medium_overdue_days: 30,
            medium_gap: 50.0,
            low_gap: 25.0,
            default_duration_days: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub days_enrolled: i64,
    pub estimated_days: i64,
    pub expected_progress: f64,
    pub progress_gap: f64,
}

/// Parses free text like "2 months" or "10 Days" into a day count.
pub fn parse_duration_days(duration: &str) -> Option<i64> {
    let captures = DURATION_PATTERN.captures(duration)?;
    let amount: i64 = captures[1].parse().ok()?;
    let unit = captures[2].to_ascii_lowercase();
    let per_unit = match unit.as_str() {
        "month" => 30,
        "week" => 7,
        _ => 1,
    };
    amount.checked_mul(per_unit).filter(|days| *days > 0)
}

pub fn estimated_days(duration: Option<&str>, thresholds: &RiskThresholds) -> i64 {
    duration
        .and_then(parse_duration_days)
        .unwrap_or(thresholds.default_duration_days.max(1))
}

pub fn days_enrolled(enrolled_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - enrolled_at).num_seconds().div_euclid(SECONDS_PER_DAY)
}

pub fn assess(
    progress: i32,
    enrolled_at: DateTime<Utc>,
    duration: Option<&str>,
    thresholds: &RiskThresholds,
    now: DateTime<Utc>,
) -> RiskAssessment {
    let days_enrolled = days_enrolled(enrolled_at, now);
    let estimated_days = estimated_days(duration, thresholds);
    let expected_progress = (days_enrolled as f64 / estimated_days as f64 * 100.0).min(100.0);
    let progress_gap = expected_progress - f64::from(progress);

    let level = if days_enrolled > estimated_days.saturating_add(thresholds.high_overdue_days) {
        RiskLevel::High
    } else if days_enrolled > estimated_days.saturating_add(thresholds.medium_overdue_days) {
        RiskLevel::Medium
    } else if progress_gap > thresholds.medium_gap {
        RiskLevel::Medium
    } else if progress_gap > thresholds.low_gap {
        RiskLevel::Low
    } else {
        RiskLevel::None
    };

    RiskAssessment {
        level,
        days_enrolled,
        estimated_days,
        expected_progress,
        progress_gap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn assess_days_ago(days_ago: i64, duration: Option<&str>, progress: i32) -> RiskAssessment {
        let now = Utc::now();
        assess(
            progress,
            now - Duration::days(days_ago),
            duration,
            &RiskThresholds::default(),
            now,
        )
    }

    #[test]
    fn durations_parse_by_unit() {
        assert_eq!(parse_duration_days("2 months"), Some(60));
        assert_eq!(parse_duration_days("3 Weeks"), Some(21));
        assert_eq!(parse_duration_days("about 10 DAYS of work"), Some(10));
        assert_eq!(parse_duration_days("6weeks"), Some(42));
        assert_eq!(parse_duration_days("garbage text"), None);
        assert_eq!(parse_duration_days("0 days"), None);
    }

    #[test]
    fn unparseable_duration_falls_back_to_default() {
        let thresholds = RiskThresholds::default();
        assert_eq!(estimated_days(Some("garbage text"), &thresholds), 30);
        assert_eq!(estimated_days(None, &thresholds), 30);
        let assessment = assess_days_ago(10, Some("garbage text"), 0);
        assert_eq!(assessment.estimated_days, 30);
        assert_eq!(assessment.level, RiskLevel::Low);
    }

    #[test]
    fn long_overdue_enrollment_is_high_risk() {
        let assessment = assess_days_ago(95, Some("1 month"), 10);
        assert_eq!(assessment.days_enrolled, 95);
        assert_eq!(assessment.expected_progress, 100.0);
        assert_eq!(assessment.progress_gap, 90.0);
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[test]
    fn overdue_offsets_take_precedence_over_gap() {
        assert_eq!(assess_days_ago(61, Some("1 month"), 100).level, RiskLevel::Medium);
        assert_eq!(assess_days_ago(60, Some("1 month"), 100).level, RiskLevel::None);
        assert_eq!(assess_days_ago(91, Some("1 month"), 100).level, RiskLevel::High);
    }

    #[test]
    fn gap_thresholds_classify_within_schedule() {
        assert_eq!(assess_days_ago(20, Some("1 month"), 10).level, RiskLevel::Medium);
        assert_eq!(assess_days_ago(15, Some("1 month"), 20).level, RiskLevel::Low);
        assert_eq!(assess_days_ago(15, Some("1 month"), 40).level, RiskLevel::None);
    }

    #[test]
    fn learners_ahead_of_schedule_are_not_at_risk() {
        let assessment = assess_days_ago(3, Some("2 months"), 90);
        assert!(assessment.progress_gap < 0.0);
        assert_eq!(assessment.level, RiskLevel::None);
    }

    #[test]
    fn risk_never_decreases_as_days_pass() {
        let mut previous = RiskLevel::None;
        for days in 0..200 {
            let level = assess_days_ago(days, Some("6 weeks"), 30).level;
            assert!(level >= previous, "risk dropped at day {days}");
            previous = level;
        }
        assert_eq!(previous, RiskLevel::High);
    }

    #[test]
    fn huge_durations_and_offsets_do_not_overflow() {
        let assessment = assess_days_ago(5, Some("9223372036854775800 days"), 0);
        assert_eq!(assessment.estimated_days, 9_223_372_036_854_775_800);
        assert_eq!(assessment.level, RiskLevel::None);

        let now = Utc::now();
        let thresholds = RiskThresholds {
            high_overdue_days: i64::MAX,
            medium_overdue_days: i64::MAX,
            ..RiskThresholds::default()
        };
        let level = assess(100, now - Duration::days(500), Some("1 week"), &thresholds, now).level;
        assert_eq!(level, RiskLevel::None);
    }

    #[test]
    fn custom_thresholds_are_honoured() {
        let now = Utc::now();
        let thresholds = RiskThresholds {
            high_overdue_days: 10,
            medium_overdue_days: 5,
            default_duration_days: 7,
            ..RiskThresholds::default()
        };
        let level = assess(100, now - Duration::days(18), None, &thresholds, now).level;
        assert_eq!(level, RiskLevel::High);
    }

    #[test]
    fn future_enrollment_counts_as_day_zero_or_earlier() {
        let now = Utc::now();
        let assessment = assess(
            0,
            now + Duration::hours(5),
            Some("1 week"),
            &RiskThresholds::default(),
            now,
        );
        assert_eq!(assessment.days_enrolled, -1);
        assert_eq!(assessment.level, RiskLevel::None);
    }
}
