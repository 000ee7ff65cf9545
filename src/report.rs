use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{CourseOverview, CourseSummary, EnrollmentSnapshot};
use crate::overview;
use crate::risk::{RiskLevel, RiskThresholds};

pub fn summarize_by_course(overviews: &[CourseOverview]) -> Vec<CourseSummary> {
    let mut map: HashMap<String, (usize, usize, i64)> = HashMap::new();

    for overview in overviews {
        let entry = map.entry(overview.course_slug.clone()).or_insert((0, 0, 0));
        entry.0 += 1;
        if overview.completed {
            entry.1 += 1;
        }
        entry.2 += i64::from(overview.percentage);
    }

    let mut summaries: Vec<CourseSummary> = map
        .into_iter()
        .map(|(course_slug, (enrolled, completed, total_progress))| CourseSummary {
            course_slug,
            enrolled,
            completed,
            avg_progress: if enrolled == 0 {
                0.0
            } else {
                total_progress as f64 / enrolled as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.enrolled
            .cmp(&a.enrolled)
            .then_with(|| a.course_slug.cmp(&b.course_slug))
    });
    summaries
}

pub fn build_report(
    course: Option<&str>,
    snapshots: &[EnrollmentSnapshot],
    thresholds: &RiskThresholds,
    now: DateTime<Utc>,
) -> String {
    let rows: Vec<(&EnrollmentSnapshot, CourseOverview)> = snapshots
        .iter()
        .map(|snapshot| (snapshot, overview::course_overview(snapshot, thresholds, now)))
        .collect();
    let overviews: Vec<CourseOverview> = rows.iter().map(|(_, row)| row.clone()).collect();
    let totals = overview::tally(&overviews);
    let summaries = summarize_by_course(&overviews);

    let mut output = String::new();
    let course_label = course.unwrap_or("all courses");

    let _ = writeln!(output, "# Course Progress Report");
    let _ = writeln!(
        output,
        "Generated for {} on {}",
        course_label,
        now.date_naive()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if rows.is_empty() {
        let _ = writeln!(output, "No enrollments recorded for this scope.");
    } else {
        for level in RiskLevel::ALL {
            let count = overviews
                .iter()
                .filter(|row| !row.completed && row.risk_level == level)
                .count();
            let _ = writeln!(output, "- {}: {} enrollments", level, count);
        }
        let _ = writeln!(
            output,
            "- completed: {} of {} ({} at risk, {} on track)",
            totals.completed, totals.total, totals.at_risk, totals.on_track
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Learners");

    let mut at_risk: Vec<&(&EnrollmentSnapshot, CourseOverview)> = rows
        .iter()
        .filter(|(_, row)| !row.completed && row.risk_level != RiskLevel::None)
        .collect();
    at_risk.sort_by(|a, b| {
        b.1.risk_level
            .cmp(&a.1.risk_level)
            .then_with(|| a.1.percentage.cmp(&b.1.percentage))
            .then_with(|| a.1.enrolled_at.cmp(&b.1.enrolled_at))
    });

    if at_risk.is_empty() {
        let _ = writeln!(output, "No learners at risk in this scope.");
    } else {
        for (snapshot, row) in at_risk.into_iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}, {}) {} risk at {}% since {}",
                snapshot.enrollment.learner_name,
                snapshot.enrollment.learner_email,
                row.course_slug,
                row.risk_level,
                row.percentage,
                row.enrolled_at.date_naive()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Course Completion");

    if summaries.is_empty() {
        let _ = writeln!(output, "No enrollments recorded for this scope.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} enrolled, {} completed (avg progress {:.1}%)",
                summary.course_slug, summary.enrolled, summary.completed, summary.avg_progress
            );
        }
    }

    output
}
