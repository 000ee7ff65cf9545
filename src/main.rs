use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod db;
mod error;
mod events;
mod models;
mod overview;
mod progress;
mod report;
mod risk;

use error::ProgressError;
use events::{EventAction, EventOutcome, LearnerEvent};
use models::SubmissionType;
use risk::RiskThresholds;

#[derive(Parser)]
#[command(name = "course-progress")]
#[command(about = "Course progress and learner risk tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Which enrollment an event applies to.
#[derive(Args)]
struct Target {
    /// Learner email
    #[arg(long)]
    email: String,
    /// Course slug
    #[arg(long)]
    course: String,
    /// When the event happened (RFC 3339), defaults to now
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

impl Target {
    fn event(self, action: EventAction) -> LearnerEvent {
        LearnerEvent {
            email: self.email,
            course: self.course,
            occurred_at: self.at.unwrap_or_else(Utc::now),
            action,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo courses, learners and progress
    Seed,
    /// Apply learner events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Enroll a learner in a course
    Enroll {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        name: String,
    },
    /// Mark a module as completed
    CompleteModule {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        module: String,
        /// Minutes spent on the module
        #[arg(long)]
        minutes: Option<i32>,
    },
    /// Submit an assignment
    SubmitAssignment {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        assignment: String,
        #[arg(long, value_enum, default_value_t = SubmissionType::Text)]
        submission_type: SubmissionType,
        #[arg(long)]
        content: Option<String>,
    },
    /// Record the grade for a submitted assignment
    GradeAssignment {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        assignment: String,
        #[arg(long)]
        score: i32,
    },
    /// Submit the course project
    SubmitProject {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        content: Option<String>,
    },
    /// Record the grade for a submitted project
    GradeProject {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        score: i32,
    },
    /// Record a quiz attempt
    SubmitQuiz {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        module: String,
        #[arg(long)]
        score: i32,
    },
    /// Add time spent to an enrollment
    LogTime {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        minutes: i32,
    },
    /// Recompute stored progress from completed components
    Recompute {
        #[command(flatten)]
        target: Target,
    },
    /// Show per-course progress and risk for a learner
    Overview {
        #[arg(long)]
        email: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        thresholds: RiskThresholds,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        course: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[command(flatten)]
        thresholds: RiskThresholds,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        if let Some(rejection) = err.downcast_ref::<ProgressError>() {
            tracing::error!(status = rejection.status_code(), "{rejection}");
        }
        return Err(err);
    }

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let event = match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
            return Ok(());
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
            return Ok(());
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&pool, &csv).await?;
            println!(
                "Applied {} events from {} ({} skipped).",
                summary.applied,
                csv.display(),
                summary.skipped
            );
            return Ok(());
        }
        Commands::Overview {
            email,
            json,
            thresholds,
        } => {
            let snapshots = db::fetch_snapshots(&pool, None, Some(email.as_str())).await?;
            let overview = overview::learner_overview(&email, &snapshots, &thresholds, Utc::now());

            if json {
                println!("{}", serde_json::to_string_pretty(&overview)?);
            } else if overview.courses.is_empty() {
                println!("{email} is not enrolled in any course.");
            } else {
                println!("Courses for {email}:");
                for course in &overview.courses {
                    println!(
                        "- {} ({}) {}% risk {} after {} minutes, enrolled {} ({})",
                        course.course_title,
                        course.course_slug,
                        course.percentage,
                        course.risk_level,
                        course.time_spent,
                        course.enrolled_at.date_naive(),
                        course.estimated_duration.as_deref().unwrap_or("no estimate")
                    );
                }
                let totals = &overview.totals;
                println!(
                    "{} total: {} completed, {} on track, {} at risk",
                    totals.total, totals.completed, totals.on_track, totals.at_risk
                );
            }
            return Ok(());
        }
        Commands::Report {
            course,
            out,
            thresholds,
        } => {
            let snapshots = db::fetch_snapshots(&pool, course.as_deref(), None).await?;
            let report =
                report::build_report(course.as_deref(), &snapshots, &thresholds, Utc::now());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
            return Ok(());
        }
        Commands::Enroll { target, name } => target.event(EventAction::Enroll { full_name: name }),
        Commands::CompleteModule {
            target,
            module,
            minutes,
        } => target.event(EventAction::CompleteModule { module, minutes }),
        Commands::SubmitAssignment {
            target,
            assignment,
            submission_type,
            content,
        } => target.event(EventAction::SubmitAssignment {
            assignment,
            submission_type,
            content,
        }),
        Commands::GradeAssignment {
            target,
            assignment,
            score,
        } => target.event(EventAction::GradeAssignment { assignment, score }),
        Commands::SubmitProject { target, content } => {
            target.event(EventAction::SubmitProject { content })
        }
        Commands::GradeProject { target, score } => {
            target.event(EventAction::GradeProject { score })
        }
        Commands::SubmitQuiz {
            target,
            module,
            score,
        } => target.event(EventAction::SubmitQuiz { module, score }),
        Commands::LogTime { target, minutes } => target.event(EventAction::LogTime { minutes }),
        Commands::Recompute { target } => target.event(EventAction::Recompute),
    };

    let outcome = events::apply(&pool, &event).await?;
    print_outcome(&event, &outcome);
    Ok(())
}

fn print_outcome(event: &LearnerEvent, outcome: &EventOutcome) {
    let result = &outcome.result;
    tracing::debug!(enrollment = %outcome.enrollment_id, "event applied");
    println!(
        "{} in {}: {}% complete{}",
        event.email,
        event.course,
        result.progress,
        if result.completed { " (course completed)" } else { "" }
    );
    for section in &result.section_progress {
        println!(
            "- {}: {}/{} modules ({}%)",
            section.title, section.completed_modules, section.total_modules, section.percentage
        );
    }
}
