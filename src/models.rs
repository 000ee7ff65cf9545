use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProgressError;
use crate::risk::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Video,
    Pdf,
    Quiz,
}

impl ModuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Video => "video",
            ModuleKind::Pdf => "pdf",
            ModuleKind::Quiz => "quiz",
        }
    }
}

impl FromStr for ModuleKind {
    type Err = ProgressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "video" => Ok(ModuleKind::Video),
            "pdf" => Ok(ModuleKind::Pdf),
            "quiz" => Ok(ModuleKind::Quiz),
            other => Err(ProgressError::Validation(format!("unknown module kind `{other}`"))),
        }
    }
}

/// How a learner hands work in. `Any` is only meaningful on the assignment side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionType {
    Text,
    File,
    Link,
    Any,
}

impl SubmissionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionType::Text => "text",
            SubmissionType::File => "file",
            SubmissionType::Link => "link",
            SubmissionType::Any => "any",
        }
    }

    /// Whether an assignment expecting `self` accepts a submission of `submitted`.
    pub fn accepts(self, submitted: SubmissionType) -> bool {
        self == SubmissionType::Any || self == submitted
    }
}

impl FromStr for SubmissionType {
    type Err = ProgressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(SubmissionType::Text),
            "file" => Ok(SubmissionType::File),
            "link" => Ok(SubmissionType::Link),
            "any" => Ok(SubmissionType::Any),
            other => Err(ProgressError::Validation(format!(
                "invalid submission type `{other}`"
            ))),
        }
    }
}

impl fmt::Display for SubmissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SectionOutline {
    pub section_id: Uuid,
    pub title: String,
    pub module_ids: Vec<Uuid>,
}

/// The parts of a course the progress formula counts against.
#[derive(Debug, Clone)]
pub struct CourseStructure {
    pub course_id: Uuid,
    pub slug: String,
    pub title: String,
    pub duration: Option<String>,
    pub has_project: bool,
    pub sections: Vec<SectionOutline>,
    pub assignment_ids: Vec<Uuid>,
}

impl CourseStructure {
    pub fn module_ids(&self) -> impl Iterator<Item = &Uuid> {
        self.sections.iter().flat_map(|section| section.module_ids.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleProgress {
    pub module_id: Uuid,
    pub completed: bool,
    pub score: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentProgress {
    pub assignment_id: Uuid,
    pub submitted: bool,
    pub score: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectProgress {
    pub submitted: bool,
    pub score: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct EnrollmentRecord {
    pub enrollment_id: Uuid,
    pub learner_name: String,
    pub learner_email: String,
    pub course_id: Uuid,
    pub progress: i32,
    pub completed: bool,
    pub enrolled_at: DateTime<Utc>,
    pub time_spent_minutes: i32,
    pub module_progress: Vec<ModuleProgress>,
    pub assignment_progress: Vec<AssignmentProgress>,
    pub project_progress: ProjectProgress,
}

/// An enrollment loaded together with the course it belongs to.
#[derive(Debug, Clone)]
pub struct EnrollmentSnapshot {
    pub enrollment: EnrollmentRecord,
    pub course: CourseStructure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionProgress {
    pub section_id: Uuid,
    pub title: String,
    pub completed_modules: usize,
    pub total_modules: usize,
    pub percentage: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressResult {
    pub progress: i32,
    pub completed: bool,
    pub section_progress: Vec<SectionProgress>,
    pub gradable_components: usize,
}

impl ProgressResult {
    /// False when the course has no modules, no assignments and no project.
    pub fn has_gradable_components(&self) -> bool {
        self.gradable_components > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseOverview {
    pub course_slug: String,
    pub course_title: String,
    pub percentage: i32,
    pub completed: bool,
    pub risk_level: RiskLevel,
    pub time_spent: i32,
    pub enrolled_at: DateTime<Utc>,
    pub estimated_duration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverviewTotals {
    pub at_risk: usize,
    pub on_track: usize,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerOverview {
    pub learner_email: String,
    pub courses: Vec<CourseOverview>,
    pub totals: OverviewTotals,
}

#[derive(Debug, Clone)]
pub struct CourseSummary {
    pub course_slug: String,
    pub enrolled: usize,
    pub completed: usize,
    pub avg_progress: f64,
}
