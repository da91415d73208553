use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ErrorClass;

/// Default cap on retries after the first execution.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Extensions recognised as 3D model uploads, convertible or not.
pub const MODEL_EXTENSIONS: &[&str] = &[
    "stl", "obj", "ply", "dxd", "3dm", "step", "stp", "iges", "igs", "fbx", "dae", "3ds", "blend",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    Image,
    Video,
    Audio,
    Document,
    Model3d,
}

impl JobCategory {
    pub const ALL: [JobCategory; 5] = [
        JobCategory::Image,
        JobCategory::Video,
        JobCategory::Audio,
        JobCategory::Document,
        JobCategory::Model3d,
    ];

    /// Fixed queue priority, lower is served first.
    pub fn priority(&self) -> i32 {
        match self {
            JobCategory::Image => 1,
            JobCategory::Document => 2,
            JobCategory::Audio => 3,
            JobCategory::Video => 4,
            JobCategory::Model3d => 5,
        }
    }

    /// Classify an upload from its MIME type, falling back to the filename extension.
    pub fn detect(mime_type: &str, filename: &str) -> Self {
        let extension = file_extension(filename).unwrap_or_default();
        if MODEL_EXTENSIONS.contains(&extension.as_str()) || mime_type.starts_with("model/") {
            return JobCategory::Model3d;
        }
        match mime_type.split('/').next().unwrap_or_default() {
            "image" => JobCategory::Image,
            "video" => JobCategory::Video,
            "audio" => JobCategory::Audio,
            _ => JobCategory::Document,
        }
    }
}

impl Display for JobCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobCategory::Image => write!(f, "image"),
            JobCategory::Video => write!(f, "video"),
            JobCategory::Audio => write!(f, "audio"),
            JobCategory::Document => write!(f, "document"),
            JobCategory::Model3d => write!(f, "model3d"),
        }
    }
}

impl FromStr for JobCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(JobCategory::Image),
            "video" => Ok(JobCategory::Video),
            "audio" => Ok(JobCategory::Audio),
            "document" => Ok(JobCategory::Document),
            "model3d" => Ok(JobCategory::Model3d),
            _ => Err(anyhow::anyhow!("Invalid job category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Active => write!(f, "active"),
            JobState::Delayed => write!(f, "delayed"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// What the upload endpoint hands over. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub message_id: String,
    pub room_id: String,
    pub source_locator: String,
    pub original_filename: String,
    pub mime_type: String,
}

impl JobPayload {
    /// Lowercased extension of the original filename, without the dot.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.original_filename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    Thumbnail,
    Render,
}

impl DerivedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedKind::Thumbnail => "thumbnail",
            DerivedKind::Render => "render",
        }
    }
}

impl Display for DerivedKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// A persisted derived asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedResult {
    pub kind: DerivedKind,
    pub locator: String,
    pub url: String,
    pub content_type: String,
    /// Set for renders that went out with geometry compression.
    #[serde(default)]
    pub compressed: bool,
    /// Validation findings that did not block the result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub class: ErrorClass,
    pub message: String,
    pub attempts: u32,
}

/// Terminal outcome stored on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResult {
    Derived(DerivedResult),
    /// Deliberately produced nothing. Terminal, but neither an asset nor a failure.
    NoOp { reason: String },
    Error(JobFailure),
}

impl JobResult {
    pub fn is_error(&self) -> bool {
        matches!(self, JobResult::Error(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            JobResult::Error(failure) => Some(&failure.message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub category: JobCategory,
    pub payload: JobPayload,
    pub priority: i32,
    /// Executions started so far.
    pub attempts: u32,
    /// Retries allowed after the first execution.
    pub max_attempts: u32,
    pub state: JobState,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When a Delayed job becomes eligible again.
    pub available_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(category: JobCategory, payload: JobPayload, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            payload,
            priority: category.priority(),
            attempts: 0,
            max_attempts,
            state: JobState::Waiting,
            result: None,
            created_at: Utc::now(),
            last_attempt_at: None,
            available_at: None,
            finished_at: None,
        }
    }

    /// Retries already consumed, i.e. executions beyond the first.
    pub fn retries_used(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn can_retry(&self) -> bool {
        self.retries_used() < self.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            category: self.category,
            state: self.state,
            attempts: self.attempts,
            error: self
                .result
                .as_ref()
                .and_then(JobResult::error_message)
                .map(str::to_owned),
            result: self.result.clone(),
        }
    }
}

/// Observability view of a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub category: JobCategory,
    pub state: JobState,
    pub attempts: u32,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl JobStats {
    /// Jobs that still need a worker.
    pub fn pending(&self) -> usize {
        self.waiting + self.active + self.delayed
    }

    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Waiting => self.waiting += 1,
            JobState::Active => self.active += 1,
            JobState::Delayed => self.delayed += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }
}

pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}
