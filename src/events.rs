use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::db;
use crate::error::{ProgressError, Result};
use crate::models::{ModuleKind, ProgressResult, SubmissionType};
use crate::progress;

#[derive(Debug, Clone, PartialEq)]
pub enum EventAction {
    Enroll {
        full_name: String,
    },
    CompleteModule {
        module: String,
        minutes: Option<i32>,
    },
    SubmitAssignment {
        assignment: String,
        submission_type: SubmissionType,
        content: Option<String>,
    },
    GradeAssignment {
        assignment: String,
        score: i32,
    },
    SubmitProject {
        content: Option<String>,
    },
    GradeProject {
        score: i32,
    },
    SubmitQuiz {
        module: String,
        score: i32,
    },
    LogTime {
        minutes: i32,
    },
    Recompute,
}

impl EventAction {
    pub fn name(&self) -> &'static str {
        match self {
            EventAction::Enroll { .. } => "enroll",
            EventAction::CompleteModule { .. } => "complete_module",
            EventAction::SubmitAssignment { .. } => "submit_assignment",
            EventAction::GradeAssignment { .. } => "grade_assignment",
            EventAction::SubmitProject { .. } => "submit_project",
            EventAction::GradeProject { .. } => "grade_project",
            EventAction::SubmitQuiz { .. } => "submit_quiz",
            EventAction::LogTime { .. } => "log_time",
            EventAction::Recompute => "recompute",
        }
    }
}

/// Something a learner (or their grader) did to one enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnerEvent {
    pub email: String,
    pub course: String,
    pub occurred_at: DateTime<Utc>,
    pub action: EventAction,
}

#[derive(Debug, Clone)]
pub struct EventOutcome {
    pub enrollment_id: Uuid,
    pub result: ProgressResult,
}

#[derive(Debug, Clone, Copy)]
struct EnrollmentHandle {
    enrollment_id: Uuid,
    course_id: Uuid,
}

pub fn validate(action: &EventAction) -> Result<()> {
    match action {
        EventAction::Enroll { full_name } if full_name.trim().is_empty() => Err(
            ProgressError::Validation("learner name must not be empty".to_string()),
        ),
        EventAction::GradeAssignment { score, .. }
        | EventAction::GradeProject { score }
        | EventAction::SubmitQuiz { score, .. }
            if !(0..=100).contains(score) =>
        {
            Err(ProgressError::Validation(format!(
                "score {score} is outside 0-100"
            )))
        }
        EventAction::LogTime { minutes }
        | EventAction::CompleteModule {
            minutes: Some(minutes),
            ..
        } if *minutes <= 0 => Err(ProgressError::Validation(format!(
            "time spent must be positive, got {minutes} minutes"
        ))),
        EventAction::SubmitAssignment {
            submission_type: SubmissionType::Any,
            ..
        } => Err(ProgressError::Validation(
            "invalid submission type `any`; use text, file or link".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Applies one event inside a transaction that holds the enrollment row lock,
/// then recomputes and stores the enrollment's progress.
pub async fn apply(pool: &PgPool, event: &LearnerEvent) -> Result<EventOutcome> {
    validate(&event.action)?;

    let mut tx = pool.begin().await?;

    if let EventAction::Enroll { full_name } = &event.action {
        create_enrollment(&mut tx, event, full_name).await?;
    }

    let handle = lock_enrollment(&mut tx, &event.email, &event.course).await?;
    let at = event.occurred_at;

    match &event.action {
        EventAction::Enroll { .. } | EventAction::Recompute => {}
        EventAction::CompleteModule { module, minutes } => {
            complete_module(&mut tx, handle, module, at).await?;
            if let Some(minutes) = minutes {
                add_time(&mut tx, handle, *minutes).await?;
            }
        }
        EventAction::SubmitAssignment {
            assignment,
            submission_type,
            content,
        } => {
            submit_assignment(
                &mut tx,
                handle,
                assignment,
                *submission_type,
                content.as_deref(),
                at,
            )
            .await?;
        }
        EventAction::GradeAssignment { assignment, score } => {
            grade_assignment(&mut tx, handle, assignment, *score, at).await?;
        }
        EventAction::SubmitProject { content } => {
            submit_project(&mut tx, handle, &event.course, content.as_deref(), at).await?;
        }
        EventAction::GradeProject { score } => {
            grade_project(&mut tx, handle, &event.course, *score).await?;
        }
        EventAction::SubmitQuiz { module, score } => {
            submit_quiz(&mut tx, handle, module, *score, at).await?;
        }
        EventAction::LogTime { minutes } => {
            add_time(&mut tx, handle, *minutes).await?;
        }
    }

    let result = recompute(&mut tx, handle, at).await?;
    tx.commit().await?;

    tracing::info!(
        event = event.action.name(),
        email = %event.email,
        course = %event.course,
        progress = result.progress,
        completed = result.completed,
        "progress recomputed"
    );

    Ok(EventOutcome {
        enrollment_id: handle.enrollment_id,
        result,
    })
}

async fn create_enrollment(
    conn: &mut PgConnection,
    event: &LearnerEvent,
    full_name: &str,
) -> Result<()> {
    let course_id = db::find_course_id(conn, &event.course).await?;

    let learner_id: Uuid = sqlx::query(
        r#"
        INSERT INTO course_progress.learners (id, full_name, email)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name.trim())
    .bind(&event.email)
    .fetch_one(&mut *conn)
    .await?
    .get("id");

    let inserted = sqlx::query(
        r#"
        INSERT INTO course_progress.enrollments
        (id, learner_id, course_id, enrolled_at, updated_at)
        VALUES ($1, $2, $3, $4, $4)
        ON CONFLICT (learner_id, course_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(learner_id)
    .bind(course_id)
    .bind(event.occurred_at)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(ProgressError::Validation(format!(
            "{} is already enrolled in {}",
            event.email, event.course
        )));
    }

    Ok(())
}

async fn lock_enrollment(
    conn: &mut PgConnection,
    email: &str,
    course: &str,
) -> Result<EnrollmentHandle> {
    let course_id = db::find_course_id(conn, course).await?;
    let learner_id = db::find_learner_id(conn, email).await?;

    let row = sqlx::query(
        "SELECT id FROM course_progress.enrollments \
         WHERE learner_id = $1 AND course_id = $2 FOR UPDATE",
    )
    .bind(learner_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ProgressError::NotFound(format!("{email} is not enrolled in {course}")))?;

    Ok(EnrollmentHandle {
        enrollment_id: row.get("id"),
        course_id,
    })
}

async fn find_module(
    conn: &mut PgConnection,
    course_id: Uuid,
    key: &str,
) -> Result<(Uuid, ModuleKind)> {
    let row = sqlx::query(
        "SELECT id, kind FROM course_progress.modules WHERE course_id = $1 AND key = $2",
    )
    .bind(course_id)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ProgressError::NotFound(format!("module {key}")))?;

    let kind: String = row.get("kind");
    Ok((row.get("id"), kind.parse()?))
}

async fn complete_module(
    conn: &mut PgConnection,
    handle: EnrollmentHandle,
    key: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let (module_id, _) = find_module(conn, handle.course_id, key).await?;

    sqlx::query(
        r#"
        INSERT INTO course_progress.module_progress AS mp
        (enrollment_id, module_id, completed, completed_at)
        VALUES ($1, $2, TRUE, $3)
        ON CONFLICT (enrollment_id, module_id) DO UPDATE
        SET completed = TRUE, completed_at = COALESCE(mp.completed_at, EXCLUDED.completed_at)
        "#,
    )
    .bind(handle.enrollment_id)
    .bind(module_id)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn submit_quiz(
    conn: &mut PgConnection,
    handle: EnrollmentHandle,
    key: &str,
    score: i32,
    at: DateTime<Utc>,
) -> Result<()> {
    let (module_id, kind) = find_module(conn, handle.course_id, key).await?;
    if kind != ModuleKind::Quiz {
        return Err(ProgressError::Validation(format!(
            "module {key} is a {} module, not a quiz",
            kind.as_str()
        )));
    }

    let passed = progress::is_passing(Some(score));
    sqlx::query(
        r#"
        INSERT INTO course_progress.module_progress AS mp
        (enrollment_id, module_id, completed, score, attempts, completed_at)
        VALUES ($1, $2, $3, $4, 1, $5)
        ON CONFLICT (enrollment_id, module_id) DO UPDATE
        SET score = GREATEST(COALESCE(mp.score, 0), EXCLUDED.score),
            attempts = mp.attempts + 1,
            completed = mp.completed OR EXCLUDED.completed,
            completed_at = COALESCE(mp.completed_at, EXCLUDED.completed_at)
        "#,
    )
    .bind(handle.enrollment_id)
    .bind(module_id)
    .bind(passed)
    .bind(score)
    .bind(passed.then_some(at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn find_assignment(conn: &mut PgConnection, course_id: Uuid, key: &str) -> Result<Uuid> {
    let row = sqlx::query(
        "SELECT id FROM course_progress.assignments WHERE course_id = $1 AND key = $2",
    )
    .bind(course_id)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ProgressError::NotFound(format!("assignment {key}")))?;

    Ok(row.get("id"))
}

async fn submit_assignment(
    conn: &mut PgConnection,
    handle: EnrollmentHandle,
    key: &str,
    submission_type: SubmissionType,
    content: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    let row = sqlx::query(
        "SELECT id, submission_type, due_at FROM course_progress.assignments \
         WHERE course_id = $1 AND key = $2",
    )
    .bind(handle.course_id)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ProgressError::NotFound(format!("assignment {key}")))?;

    let assignment_id: Uuid = row.get("id");
    let expected: SubmissionType = row.get::<String, _>("submission_type").parse()?;
    let due_at: Option<DateTime<Utc>> = row.get("due_at");

    if !expected.accepts(submission_type) {
        return Err(ProgressError::Validation(format!(
            "assignment {key} expects a {expected} submission, got {submission_type}"
        )));
    }
    if let Some(due_at) = due_at {
        if at > due_at {
            return Err(ProgressError::Validation(format!(
                "deadline for assignment {key} passed at {due_at}"
            )));
        }
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO course_progress.assignment_progress
        (enrollment_id, assignment_id, submitted, submission_type, content, submitted_at)
        VALUES ($1, $2, TRUE, $3, $4, $5)
        ON CONFLICT (enrollment_id, assignment_id) DO NOTHING
        "#,
    )
    .bind(handle.enrollment_id)
    .bind(assignment_id)
    .bind(submission_type.as_str())
    .bind(content)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(ProgressError::Validation(format!(
            "assignment {key} was already submitted"
        )));
    }

    Ok(())
}

async fn grade_assignment(
    conn: &mut PgConnection,
    handle: EnrollmentHandle,
    key: &str,
    score: i32,
    at: DateTime<Utc>,
) -> Result<()> {
    let assignment_id = find_assignment(conn, handle.course_id, key).await?;

    let updated = sqlx::query(
        "UPDATE course_progress.assignment_progress SET score = $3, graded_at = $4 \
         WHERE enrollment_id = $1 AND assignment_id = $2 AND submitted",
    )
    .bind(handle.enrollment_id)
    .bind(assignment_id)
    .bind(score)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ProgressError::Validation(format!(
            "assignment {key} has not been submitted"
        )));
    }

    Ok(())
}

async fn ensure_project(conn: &mut PgConnection, handle: EnrollmentHandle, course: &str) -> Result<()> {
    let has_project: bool =
        sqlx::query("SELECT has_project FROM course_progress.courses WHERE id = $1")
            .bind(handle.course_id)
            .fetch_one(&mut *conn)
            .await?
            .get("has_project");

    if has_project {
        Ok(())
    } else {
        Err(ProgressError::NotFound(format!("{course} has no project")))
    }
}

async fn submit_project(
    conn: &mut PgConnection,
    handle: EnrollmentHandle,
    course: &str,
    content: Option<&str>,
    at: DateTime<Utc>,
) -> Result<()> {
    ensure_project(conn, handle, course).await?;

    let updated = sqlx::query(
        "UPDATE course_progress.enrollments \
         SET project_submitted = TRUE, project_content = $2, project_submitted_at = $3 \
         WHERE id = $1 AND NOT project_submitted",
    )
    .bind(handle.enrollment_id)
    .bind(content)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ProgressError::Validation(format!(
            "project for {course} was already submitted"
        )));
    }

    Ok(())
}

async fn grade_project(
    conn: &mut PgConnection,
    handle: EnrollmentHandle,
    course: &str,
    score: i32,
) -> Result<()> {
    ensure_project(conn, handle, course).await?;

    let updated = sqlx::query(
        "UPDATE course_progress.enrollments SET project_score = $2 \
         WHERE id = $1 AND project_submitted",
    )
    .bind(handle.enrollment_id)
    .bind(score)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(ProgressError::Validation(format!(
            "project for {course} has not been submitted"
        )));
    }

    Ok(())
}

async fn add_time(conn: &mut PgConnection, handle: EnrollmentHandle, minutes: i32) -> Result<()> {
    sqlx::query(
        "UPDATE course_progress.enrollments \
         SET time_spent_minutes = time_spent_minutes + $2 WHERE id = $1",
    )
    .bind(handle.enrollment_id)
    .bind(minutes)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn recompute(
    conn: &mut PgConnection,
    handle: EnrollmentHandle,
    at: DateTime<Utc>,
) -> Result<ProgressResult> {
    let course = db::load_course(conn, handle.course_id).await?;
    let enrollment = db::load_enrollment(conn, handle.enrollment_id).await?;
    let result = progress::aggregate(&enrollment, &course);

    if !result.has_gradable_components() {
        tracing::warn!(
            course = %course.slug,
            "course has no modules, assignments or project; enrollment counts as complete"
        );
    }

    db::save_progress(conn, handle.enrollment_id, &result, at).await?;
    Ok(result)
}
