use std::collections::HashSet;

use uuid::Uuid;

use crate::models::{CourseStructure, EnrollmentRecord, ProgressResult, SectionProgress};

pub const MODULE_WEIGHT: f64 = 0.40;
pub const ASSIGNMENT_WEIGHT: f64 = 0.30;
pub const PROJECT_WEIGHT: f64 = 0.30;
pub const PASSING_SCORE: i32 = 70;

pub fn is_passing(score: Option<i32>) -> bool {
    score.is_some_and(|value| value >= PASSING_SCORE)
}

/// Recomputes percent-complete and the completion flag from the weighted
/// module, assignment and project components.
pub fn aggregate(enrollment: &EnrollmentRecord, course: &CourseStructure) -> ProgressResult {
    let course_modules: HashSet<Uuid> = course.module_ids().copied().collect();
    let course_assignments: HashSet<Uuid> = course.assignment_ids.iter().copied().collect();

    let completed_modules: HashSet<Uuid> = enrollment
        .module_progress
        .iter()
        .filter(|entry| entry.completed && course_modules.contains(&entry.module_id))
        .map(|entry| entry.module_id)
        .collect();

    let passed_assignments: HashSet<Uuid> = enrollment
        .assignment_progress
        .iter()
        .filter(|entry| {
            entry.submitted
                && is_passing(entry.score)
                && course_assignments.contains(&entry.assignment_id)
        })
        .map(|entry| entry.assignment_id)
        .collect();

    let project_passed = course.has_project
        && enrollment.project_progress.submitted
        && is_passing(enrollment.project_progress.score);

    let module_term = ratio(completed_modules.len(), course_modules.len()) * MODULE_WEIGHT;
    let assignment_term =
        ratio(passed_assignments.len(), course_assignments.len()) * ASSIGNMENT_WEIGHT;
    let project_term = if project_passed { PROJECT_WEIGHT } else { 0.0 };

    let progress = ((module_term + assignment_term + project_term) * 100.0)
        .min(100.0)
        .round() as i32;

    let completed = completed_modules.len() == course_modules.len()
        && passed_assignments.len() == course_assignments.len()
        && (!course.has_project || project_passed);

    let section_progress = course
        .sections
        .iter()
        .map(|section| {
            let done = section
                .module_ids
                .iter()
                .filter(|id| completed_modules.contains(id))
                .count();
            SectionProgress {
                section_id: section.section_id,
                title: section.title.clone(),
                completed_modules: done,
                total_modules: section.module_ids.len(),
                percentage: (ratio(done, section.module_ids.len()) * 100.0).round() as i32,
            }
        })
        .collect();

    ProgressResult {
        progress,
        completed,
        section_progress,
        gradable_components: course_modules.len()
            + course_assignments.len()
            + usize::from(course.has_project),
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssignmentProgress, ModuleProgress, ProjectProgress, SectionOutline};
    use chrono::Utc;

    fn course(sections: Vec<Vec<Uuid>>, assignments: usize, has_project: bool) -> CourseStructure {
        CourseStructure {
            course_id: Uuid::new_v4(),
            slug: "rust-101".to_string(),
            title: "Rust 101".to_string(),
            duration: Some("1 month".to_string()),
            has_project,
            sections: sections
                .into_iter()
                .enumerate()
                .map(|(index, module_ids)| SectionOutline {
                    section_id: Uuid::new_v4(),
                    title: format!("Section {}", index + 1),
                    module_ids,
                })
                .collect(),
            assignment_ids: (0..assignments).map(|_| Uuid::new_v4()).collect(),
        }
    }

    fn enrollment(course: &CourseStructure) -> EnrollmentRecord {
        EnrollmentRecord {
            enrollment_id: Uuid::new_v4(),
            learner_name: "Avery Lee".to_string(),
            learner_email: "avery@example.com".to_string(),
            course_id: course.course_id,
            progress: 0,
            completed: false,
            enrolled_at: Utc::now(),
            time_spent_minutes: 0,
            module_progress: Vec::new(),
            assignment_progress: Vec::new(),
            project_progress: ProjectProgress::default(),
        }
    }

    fn modules(count: usize) -> Vec<Uuid> {
        (0..count).map(|_| Uuid::new_v4()).collect()
    }

    fn complete(record: &mut EnrollmentRecord, module_id: Uuid) {
        record.module_progress.push(ModuleProgress {
            module_id,
            completed: true,
            score: None,
        });
    }

    fn submit(record: &mut EnrollmentRecord, assignment_id: Uuid, score: Option<i32>) {
        record.assignment_progress.push(AssignmentProgress {
            assignment_id,
            submitted: true,
            score,
        });
    }

    #[test]
    fn empty_course_is_vacuously_complete() {
        let course = course(Vec::new(), 0, false);
        let result = aggregate(&enrollment(&course), &course);
        assert_eq!(result.progress, 0);
        assert!(result.completed);
        assert!(!result.has_gradable_components());
    }

    #[test]
    fn mixed_components_weight_as_expected() {
        let course = course(vec![modules(2), modules(2)], 2, false);
        let mut record = enrollment(&course);
        complete(&mut record, course.sections[0].module_ids[0]);
        complete(&mut record, course.sections[0].module_ids[1]);
        submit(&mut record, course.assignment_ids[0], Some(80));

        let result = aggregate(&record, &course);
        assert_eq!(result.progress, 35);
        assert!(!result.completed);
        assert_eq!(result.section_progress[0].percentage, 100);
        assert_eq!(result.section_progress[1].percentage, 0);
        assert_eq!(result.section_progress[1].total_modules, 2);
    }

    #[test]
    fn failing_or_ungraded_assignments_do_not_count() {
        let course = course(vec![modules(1)], 2, false);
        let mut record = enrollment(&course);
        submit(&mut record, course.assignment_ids[0], Some(69));
        submit(&mut record, course.assignment_ids[1], None);

        let result = aggregate(&record, &course);
        assert_eq!(result.progress, 0);
        assert!(!result.completed);
    }

    #[test]
    fn everything_passed_is_complete_and_full() {
        let course = course(vec![modules(3)], 1, true);
        let mut record = enrollment(&course);
        for module_id in course.sections[0].module_ids.clone() {
            complete(&mut record, module_id);
        }
        submit(&mut record, course.assignment_ids[0], Some(70));
        record.project_progress = ProjectProgress {
            submitted: true,
            score: Some(92),
        };

        let result = aggregate(&record, &course);
        assert_eq!(result.progress, 100);
        assert!(result.completed);
    }

    #[test]
    fn everything_passed_without_project_is_complete() {
        let course = course(vec![modules(2), modules(1)], 2, false);
        let mut record = enrollment(&course);
        for module_id in course.module_ids().copied().collect::<Vec<_>>() {
            complete(&mut record, module_id);
        }
        submit(&mut record, course.assignment_ids[0], Some(70));
        submit(&mut record, course.assignment_ids[1], Some(95));

        let result = aggregate(&record, &course);
        assert_eq!(result.progress, 70);
        assert!(result.completed);
    }

    #[test]
    fn progress_stays_within_bounds_across_combinations() {
        for module_total in 0..=3 {
            for modules_done in 0..=module_total {
                for assignment_total in 0..=2 {
                    for assignments_passed in 0..=assignment_total {
                        for has_project in [false, true] {
                            for project_passed in [false, true] {
                                let course =
                                    course(vec![modules(module_total)], assignment_total, has_project);
                                let mut record = enrollment(&course);
                                for module_id in course.sections[0].module_ids.iter().take(modules_done) {
                                    complete(&mut record, *module_id);
                                }
                                for (index, assignment_id) in course.assignment_ids.iter().enumerate() {
                                    let score = if index < assignments_passed { 85 } else { 40 };
                                    submit(&mut record, *assignment_id, Some(score));
                                }
                                record.project_progress = ProjectProgress {
                                    submitted: true,
                                    score: Some(if project_passed { 90 } else { 10 }),
                                };

                                let result = aggregate(&record, &course);
                                assert!(
                                    (0..=100).contains(&result.progress),
                                    "progress {} out of range",
                                    result.progress
                                );
                                let expected_complete = modules_done == module_total
                                    && assignments_passed == assignment_total
                                    && (!has_project || project_passed);
                                assert_eq!(result.completed, expected_complete);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn missing_project_term_blocks_completion() {
        let course = course(vec![modules(1)], 0, true);
        let mut record = enrollment(&course);
        complete(&mut record, course.sections[0].module_ids[0]);
        record.project_progress = ProjectProgress {
            submitted: true,
            score: Some(50),
        };

        let result = aggregate(&record, &course);
        assert_eq!(result.progress, 40);
        assert!(!result.completed);
    }

    #[test]
    fn project_progress_ignored_when_course_has_no_project() {
        let course = course(vec![modules(1)], 0, false);
        let mut record = enrollment(&course);
        record.project_progress = ProjectProgress {
            submitted: true,
            score: Some(100),
        };

        let result = aggregate(&record, &course);
        assert_eq!(result.progress, 0);
        assert!(!result.completed);
    }

    #[test]
    fn duplicate_and_foreign_entries_do_not_inflate_progress() {
        let course = course(vec![modules(2)], 0, false);
        let mut record = enrollment(&course);
        let first = course.sections[0].module_ids[0];
        complete(&mut record, first);
        complete(&mut record, first);
        complete(&mut record, Uuid::new_v4());
        submit(&mut record, Uuid::new_v4(), Some(100));

        let result = aggregate(&record, &course);
        assert_eq!(result.progress, 20);
        assert!(!result.completed);
        assert!((0..=100).contains(&result.progress));
    }
}
