use chrono::{DateTime, Utc};

use crate::models::{CourseOverview, EnrollmentSnapshot, LearnerOverview, OverviewTotals};
use crate::progress;
use crate::risk::{self, RiskThresholds};

/// Progress and risk for one enrollment, recomputed from its components
/// rather than read from the stored percentage.
pub fn course_overview(
    snapshot: &EnrollmentSnapshot,
    thresholds: &RiskThresholds,
    now: DateTime<Utc>,
) -> CourseOverview {
    let EnrollmentSnapshot { enrollment, course } = snapshot;
    let result = progress::aggregate(enrollment, course);

    if result.progress != enrollment.progress || result.completed != enrollment.completed {
        tracing::debug!(
            enrollment = %enrollment.enrollment_id,
            stored = enrollment.progress,
            recomputed = result.progress,
            stored_completed = enrollment.completed,
            recomputed_completed = result.completed,
            "stored progress is stale"
        );
    }

    let risk_level = risk::assess(
        result.progress,
        enrollment.enrolled_at,
        course.duration.as_deref(),
        thresholds,
        now,
    )
    .level;

    CourseOverview {
        course_slug: course.slug.clone(),
        course_title: course.title.clone(),
        percentage: result.progress,
        completed: result.completed,
        risk_level,
        time_spent: enrollment.time_spent_minutes,
        enrolled_at: enrollment.enrolled_at,
        estimated_duration: course.duration.clone(),
    }
}

/// Completed enrollments count as completed whatever their risk level.
pub fn tally(courses: &[CourseOverview]) -> OverviewTotals {
    let mut totals = OverviewTotals {
        total: courses.len(),
        ..OverviewTotals::default()
    };

    for course in courses {
        if course.completed {
            totals.completed += 1;
        } else if course.risk_level.is_at_risk() {
            totals.at_risk += 1;
        } else {
            totals.on_track += 1;
        }
    }

    totals
}

pub fn learner_overview(
    learner_email: &str,
    snapshots: &[EnrollmentSnapshot],
    thresholds: &RiskThresholds,
    now: DateTime<Utc>,
) -> LearnerOverview {
    let mut courses: Vec<CourseOverview> = snapshots
        .iter()
        .filter(|snapshot| snapshot.enrollment.learner_email == learner_email)
        .map(|snapshot| course_overview(snapshot, thresholds, now))
        .collect();
    courses.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));

    let totals = tally(&courses);
    LearnerOverview {
        learner_email: learner_email.to_string(),
        courses,
        totals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CourseStructure, EnrollmentRecord, ModuleProgress, ProjectProgress, SectionOutline,
    };
    use crate::risk::RiskLevel;
    use chrono::Duration;
    use uuid::Uuid;

    fn snapshot(
        email: &str,
        days_ago: i64,
        completed_modules: usize,
        total_modules: usize,
    ) -> EnrollmentSnapshot {
        let module_ids: Vec<Uuid> = (0..total_modules).map(|_| Uuid::new_v4()).collect();
        let course = CourseStructure {
            course_id: Uuid::new_v4(),
            slug: format!("course-{days_ago}"),
            title: "Data Literacy".to_string(),
            duration: Some("1 month".to_string()),
            has_project: false,
            sections: vec![SectionOutline {
                section_id: Uuid::new_v4(),
                title: "Foundations".to_string(),
                module_ids: module_ids.clone(),
            }],
            assignment_ids: Vec::new(),
        };
        let enrollment = EnrollmentRecord {
            enrollment_id: Uuid::new_v4(),
            learner_name: "Jules Moreno".to_string(),
            learner_email: email.to_string(),
            course_id: course.course_id,
            progress: 0,
            completed: false,
            enrolled_at: Utc::now() - Duration::days(days_ago),
            time_spent_minutes: 45,
            module_progress: module_ids
                .iter()
                .take(completed_modules)
                .map(|module_id| ModuleProgress {
                    module_id: *module_id,
                    completed: true,
                    score: None,
                })
                .collect(),
            assignment_progress: Vec::new(),
            project_progress: ProjectProgress::default(),
        };
        EnrollmentSnapshot { enrollment, course }
    }

    #[test]
    fn overview_recomputes_percentage_from_components() {
        let snap = snapshot("jules@example.com", 2, 1, 2);
        let overview = course_overview(&snap, &RiskThresholds::default(), Utc::now());
        assert_eq!(overview.percentage, 20);
        assert_eq!(overview.time_spent, 45);
        assert_eq!(overview.estimated_duration.as_deref(), Some("1 month"));
        assert_eq!(overview.risk_level, RiskLevel::None);
    }

    #[test]
    fn completed_overdue_course_keeps_classifier_risk() {
        let now = Utc::now();
        let snap = snapshot("jules@example.com", 95, 1, 1);
        let overview = course_overview(&snap, &RiskThresholds::default(), now);
        let direct = risk::assess(
            40,
            snap.enrollment.enrolled_at,
            Some("1 month"),
            &RiskThresholds::default(),
            now,
        )
        .level;

        assert!(overview.completed);
        assert_eq!(overview.percentage, 40);
        assert_eq!(direct, RiskLevel::High);
        assert_eq!(overview.risk_level, direct);

        let totals = tally(&[overview]);
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.at_risk, 0);
    }

    #[test]
    fn totals_split_completed_at_risk_and_on_track() {
        let snapshots = vec![
            snapshot("jules@example.com", 400, 3, 3),
            snapshot("jules@example.com", 100, 0, 3),
            snapshot("jules@example.com", 20, 0, 3),
            snapshot("jules@example.com", 1, 0, 3),
            snapshot("kiara@example.com", 100, 0, 3),
        ];
        let overview = learner_overview(
            "jules@example.com",
            &snapshots,
            &RiskThresholds::default(),
            Utc::now(),
        );

        assert_eq!(overview.courses.len(), 4);
        assert_eq!(
            overview.totals,
            OverviewTotals {
                at_risk: 2,
                on_track: 1,
                completed: 1,
                total: 4,
            }
        );
        assert_eq!(overview.courses[0].enrolled_at, snapshots[3].enrollment.enrolled_at);
    }

    #[test]
    fn low_risk_counts_as_on_track() {
        let snap = snapshot("jules@example.com", 10, 0, 3);
        let overview = course_overview(&snap, &RiskThresholds::default(), Utc::now());
        assert_eq!(overview.risk_level, RiskLevel::Low);
        assert_eq!(tally(&[overview]).on_track, 1);
    }
}
