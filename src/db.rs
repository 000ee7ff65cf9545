use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::{ProgressError, Result};
use crate::events::{self, EventAction, LearnerEvent};
use crate::models::{
    AssignmentProgress, CourseStructure, EnrollmentRecord, EnrollmentSnapshot, ModuleProgress,
    ProgressResult, ProjectProgress, SectionOutline, SubmissionType,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn find_course_id(conn: &mut PgConnection, slug: &str) -> Result<Uuid> {
    let row = sqlx::query("SELECT id FROM course_progress.courses WHERE slug = $1")
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ProgressError::NotFound(format!("course {slug}")))?;
    Ok(row.get("id"))
}

pub async fn find_learner_id(conn: &mut PgConnection, email: &str) -> Result<Uuid> {
    let row = sqlx::query("SELECT id FROM course_progress.learners WHERE email = $1")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ProgressError::NotFound(format!("learner {email}")))?;
    Ok(row.get("id"))
}

pub async fn load_course(conn: &mut PgConnection, course_id: Uuid) -> Result<CourseStructure> {
    let course = sqlx::query(
        "SELECT id, slug, title, duration, has_project FROM course_progress.courses WHERE id = $1",
    )
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ProgressError::NotFound(format!("course {course_id}")))?;

    let module_rows = sqlx::query(
        "SELECT s.id AS section_id, s.title, m.id AS module_id \
         FROM course_progress.sections s \
         LEFT JOIN course_progress.modules m ON m.section_id = s.id \
         WHERE s.course_id = $1 \
         ORDER BY s.position, m.position",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut sections: Vec<SectionOutline> = Vec::new();
    for row in module_rows {
        let section_id: Uuid = row.get("section_id");
        let module_id: Option<Uuid> = row.get("module_id");

        if sections.last().map(|section| section.section_id) != Some(section_id) {
            sections.push(SectionOutline {
                section_id,
                title: row.get("title"),
                module_ids: Vec::new(),
            });
        }
        if let (Some(section), Some(module_id)) = (sections.last_mut(), module_id) {
            section.module_ids.push(module_id);
        }
    }

    let assignment_ids: Vec<Uuid> = sqlx::query(
        "SELECT id FROM course_progress.assignments WHERE course_id = $1 ORDER BY key",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|row| row.get("id"))
    .collect();

    Ok(CourseStructure {
        course_id: course.get("id"),
        slug: course.get("slug"),
        title: course.get("title"),
        duration: course.get("duration"),
        has_project: course.get("has_project"),
        sections,
        assignment_ids,
    })
}

pub async fn load_enrollment(
    conn: &mut PgConnection,
    enrollment_id: Uuid,
) -> Result<EnrollmentRecord> {
    let row = sqlx::query(
        "SELECT e.id, l.full_name, l.email, e.course_id, e.progress, \
         e.completed, e.enrolled_at, e.time_spent_minutes, e.project_submitted, e.project_score \
         FROM course_progress.enrollments e \
         JOIN course_progress.learners l ON l.id = e.learner_id \
         WHERE e.id = $1",
    )
    .bind(enrollment_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ProgressError::NotFound(format!("enrollment {enrollment_id}")))?;

    let module_progress: Vec<ModuleProgress> = sqlx::query(
        "SELECT module_id, completed, score FROM course_progress.module_progress \
         WHERE enrollment_id = $1",
    )
    .bind(enrollment_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|entry| ModuleProgress {
        module_id: entry.get("module_id"),
        completed: entry.get("completed"),
        score: entry.get("score"),
    })
    .collect();

    let assignment_progress: Vec<AssignmentProgress> = sqlx::query(
        "SELECT assignment_id, submitted, score FROM course_progress.assignment_progress \
         WHERE enrollment_id = $1",
    )
    .bind(enrollment_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|entry| AssignmentProgress {
        assignment_id: entry.get("assignment_id"),
        submitted: entry.get("submitted"),
        score: entry.get("score"),
    })
    .collect();

    Ok(EnrollmentRecord {
        enrollment_id: row.get("id"),
        learner_name: row.get("full_name"),
        learner_email: row.get("email"),
        course_id: row.get("course_id"),
        progress: row.get("progress"),
        completed: row.get("completed"),
        enrolled_at: row.get("enrolled_at"),
        time_spent_minutes: row.get("time_spent_minutes"),
        module_progress,
        assignment_progress,
        project_progress: ProjectProgress {
            submitted: row.get("project_submitted"),
            score: row.get("project_score"),
        },
    })
}

pub async fn save_progress(
    conn: &mut PgConnection,
    enrollment_id: Uuid,
    result: &ProgressResult,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE course_progress.enrollments
        SET progress = $2,
            completed = $3,
            completed_at = CASE WHEN $3 THEN COALESCE(completed_at, $4) ELSE NULL END,
            updated_at = $4
        WHERE id = $1
        "#,
    )
    .bind(enrollment_id)
    .bind(result.progress)
    .bind(result.completed)
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn fetch_snapshots(
    pool: &PgPool,
    course: Option<&str>,
    email: Option<&str>,
) -> Result<Vec<EnrollmentSnapshot>> {
    let mut query = String::from(
        "SELECT e.id \
         FROM course_progress.enrollments e \
         JOIN course_progress.learners l ON l.id = e.learner_id \
         JOIN course_progress.courses c ON c.id = e.course_id \
         WHERE TRUE",
    );

    let mut filters = Vec::new();
    if let Some(value) = course {
        filters.push(value);
        query.push_str(&format!(" AND c.slug = ${}", filters.len()));
    }
    if let Some(value) = email {
        filters.push(value);
        query.push_str(&format!(" AND l.email = ${}", filters.len()));
    }
    query.push_str(" ORDER BY e.enrolled_at");

    let mut rows = sqlx::query(&query);
    for value in filters {
        rows = rows.bind(value);
    }
    let records = rows.fetch_all(pool).await?;

    let mut conn = pool.acquire().await?;
    let mut courses: HashMap<Uuid, CourseStructure> = HashMap::new();
    let mut snapshots = Vec::with_capacity(records.len());

    for row in records {
        let enrollment = load_enrollment(&mut conn, row.get("id")).await?;
        if !courses.contains_key(&enrollment.course_id) {
            let structure = load_course(&mut conn, enrollment.course_id).await?;
            courses.insert(structure.course_id, structure);
        }
        let course = courses[&enrollment.course_id].clone();
        snapshots.push(EnrollmentSnapshot { enrollment, course });
    }

    Ok(snapshots)
}

struct SeedCourse<'a> {
    id: &'a str,
    slug: &'a str,
    title: &'a str,
    duration: Option<&'a str>,
    has_project: bool,
    sections: &'a [(&'a str, &'a [(&'a str, &'a str, &'a str)])],
    assignments: &'a [(&'a str, &'a str, &'a str, Option<i64>)],
}

const SEED_COURSES: &[SeedCourse<'static>] = &[
    SeedCourse {
        id: "8c1d7f0e-5a2b-4c64-9f1e-2b7a4d3c9e10",
        slug: "rust-foundations",
        title: "Rust Foundations",
        duration: Some("6 weeks"),
        has_project: true,
        sections: &[
            (
                "Getting started",
                &[
                    ("install", "Installing the toolchain", "video"),
                    ("ownership", "Ownership and borrowing", "pdf"),
                    ("ownership-quiz", "Ownership check-in", "quiz"),
                ],
            ),
            (
                "Working with data",
                &[
                    ("structs", "Structs and enums", "video"),
                    ("collections", "Collections", "pdf"),
                ],
            ),
        ],
        assignments: &[
            ("cli-todo", "Build a todo CLI", "link", None),
            ("error-essay", "Error handling write-up", "text", Some(60)),
        ],
    },
    SeedCourse {
        id: "b4f0a0c2-6d3e-4f1a-8e55-7c2d9a1b3f44",
        slug: "sql-basics",
        title: "SQL Basics",
        duration: Some("1 month"),
        has_project: false,
        sections: &[(
            "Querying",
            &[
                ("select", "SELECT and WHERE", "video"),
                ("joins", "Joins", "video"),
                ("joins-quiz", "Joins quiz", "quiz"),
            ],
        )],
        assignments: &[("report-query", "Write a reporting query", "file", None)],
    },
];

async fn seed_course(pool: &PgPool, course: &SeedCourse<'_>) -> anyhow::Result<()> {
    let now = Utc::now();
    let course_id = Uuid::parse_str(course.id)?;

    sqlx::query(
        r#"
        INSERT INTO course_progress.courses (id, slug, title, duration, has_project)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (slug) DO UPDATE
        SET title = EXCLUDED.title, duration = EXCLUDED.duration,
            has_project = EXCLUDED.has_project
        "#,
    )
    .bind(course_id)
    .bind(course.slug)
    .bind(course.title)
    .bind(course.duration)
    .bind(course.has_project)
    .execute(pool)
    .await?;

    for (position, (section_title, modules)) in course.sections.iter().enumerate() {
        let section_id: Uuid = sqlx::query(
            r#"
            INSERT INTO course_progress.sections (id, course_id, title, position)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (course_id, position) DO UPDATE SET title = EXCLUDED.title
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(course_id)
        .bind(*section_title)
        .bind(position as i32)
        .fetch_one(pool)
        .await?
        .get("id");

        for (module_position, (key, title, kind)) in modules.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO course_progress.modules
                (id, course_id, section_id, key, title, kind, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (course_id, key) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(course_id)
            .bind(section_id)
            .bind(*key)
            .bind(*title)
            .bind(*kind)
            .bind(module_position as i32)
            .execute(pool)
            .await?;
        }
    }

    for (key, title, submission_type, due_in_days) in course.assignments.iter() {
        sqlx::query(
            r#"
            INSERT INTO course_progress.assignments
            (id, course_id, key, title, submission_type, due_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (course_id, key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(course_id)
        .bind(*key)
        .bind(*title)
        .bind(*submission_type)
        .bind(due_in_days.map(|days| now + Duration::days(days)))
        .execute(pool)
        .await?;
    }

    Ok(())
}

fn seed_events(now: DateTime<Utc>) -> Vec<LearnerEvent> {
    let event = |email: &str, course: &str, days_ago: i64, action: EventAction| LearnerEvent {
        email: email.to_string(),
        course: course.to_string(),
        occurred_at: now - Duration::days(days_ago),
        action,
    };
    let enroll = |name: &str| EventAction::Enroll {
        full_name: name.to_string(),
    };
    let module = |key: &str, minutes: i32| EventAction::CompleteModule {
        module: key.to_string(),
        minutes: Some(minutes),
    };

    let avery = "avery.lee@example.com";
    let jules = "jules.moreno@example.com";
    let kiara = "kiara.patel@example.com";

    vec![
        event(avery, "rust-foundations", 20, enroll("Avery Lee")),
        event(avery, "rust-foundations", 19, module("install", 25)),
        event(avery, "rust-foundations", 17, module("ownership", 50)),
        event(
            avery,
            "rust-foundations",
            16,
            EventAction::SubmitQuiz {
                module: "ownership-quiz".to_string(),
                score: 85,
            },
        ),
        event(
            avery,
            "rust-foundations",
            10,
            EventAction::SubmitAssignment {
                assignment: "cli-todo".to_string(),
                submission_type: SubmissionType::Link,
                content: Some("https://example.com/avery/todo".to_string()),
            },
        ),
        event(
            avery,
            "rust-foundations",
            8,
            EventAction::GradeAssignment {
                assignment: "cli-todo".to_string(),
                score: 88,
            },
        ),
        event(jules, "sql-basics", 95, enroll("Jules Moreno")),
        event(jules, "sql-basics", 90, module("select", 30)),
        event(kiara, "sql-basics", 40, enroll("Kiara Patel")),
        event(kiara, "sql-basics", 38, module("select", 20)),
        event(kiara, "sql-basics", 35, module("joins", 35)),
        event(
            kiara,
            "sql-basics",
            34,
            EventAction::SubmitQuiz {
                module: "joins-quiz".to_string(),
                score: 74,
            },
        ),
        event(
            kiara,
            "sql-basics",
            30,
            EventAction::SubmitAssignment {
                assignment: "report-query".to_string(),
                submission_type: SubmissionType::File,
                content: Some("report.sql".to_string()),
            },
        ),
        event(
            kiara,
            "sql-basics",
            28,
            EventAction::GradeAssignment {
                assignment: "report-query".to_string(),
                score: 91,
            },
        ),
        event(kiara, "rust-foundations", 12, enroll("Kiara Patel")),
    ]
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    for course in SEED_COURSES {
        seed_course(pool, course)
            .await
            .with_context(|| format!("failed to seed course {}", course.slug))?;
    }

    for event in seed_events(Utc::now()) {
        match events::apply(pool, &event).await {
            Ok(_) => {}
            Err(err) if err.is_rejection() => {
                tracing::debug!(event = event.action.name(), error = %err, "seed event skipped");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CsvEvent {
    Enroll,
    CompleteModule,
    SubmitAssignment,
    GradeAssignment,
    SubmitProject,
    GradeProject,
    SubmitQuiz,
    LogTime,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    email: String,
    full_name: Option<String>,
    course: String,
    event: CsvEvent,
    target: Option<String>,
    score: Option<i32>,
    minutes: Option<i32>,
    submission_type: Option<String>,
    content: Option<String>,
    occurred_at: Option<DateTime<Utc>>,
}

impl CsvRow {
    fn into_event(self, now: DateTime<Utc>) -> Result<LearnerEvent> {
        let missing = |field: &str| {
            ProgressError::Validation(format!("{:?} row is missing {field}", self.event))
        };
        let target = || self.target.clone().ok_or_else(|| missing("target"));
        let score = || self.score.ok_or_else(|| missing("score"));

        let action = match self.event {
            CsvEvent::Enroll => EventAction::Enroll {
                full_name: self.full_name.clone().ok_or_else(|| missing("full_name"))?,
            },
            CsvEvent::CompleteModule => EventAction::CompleteModule {
                module: target()?,
                minutes: self.minutes,
            },
            CsvEvent::SubmitAssignment => EventAction::SubmitAssignment {
                assignment: target()?,
                submission_type: self
                    .submission_type
                    .as_deref()
                    .ok_or_else(|| missing("submission_type"))?
                    .parse()?,
                content: self.content.clone(),
            },
            CsvEvent::GradeAssignment => EventAction::GradeAssignment {
                assignment: target()?,
                score: score()?,
            },
            CsvEvent::SubmitProject => EventAction::SubmitProject {
                content: self.content.clone(),
            },
            CsvEvent::GradeProject => EventAction::GradeProject { score: score()? },
            CsvEvent::SubmitQuiz => EventAction::SubmitQuiz {
                module: target()?,
                score: score()?,
            },
            CsvEvent::LogTime => EventAction::LogTime {
                minutes: self.minutes.ok_or_else(|| missing("minutes"))?,
            },
        };

        Ok(LearnerEvent {
            email: self.email,
            course: self.course,
            occurred_at: self.occurred_at.unwrap_or(now),
            action,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub applied: usize,
    pub skipped: usize,
}

/// Applies each CSV row as its own event. Rejected rows are logged and
/// skipped; database failures abort the import.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed row on line {line}"))?;

        let outcome = match row.into_event(Utc::now()) {
            Ok(event) => events::apply(pool, &event).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(_) => summary.applied += 1,
            Err(err) if err.is_rejection() => {
                tracing::warn!(line, error = %err, "skipping rejected row");
                summary.skipped += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to apply row on line {line}"));
            }
        }
    }

    Ok(summary)
}
