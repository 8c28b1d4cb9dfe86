//! Jobs and execution records.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::WorkflowDefinition;

static JOB_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a job.
///
/// A millisecond UTC timestamp followed by a process-wide counter, so two
/// jobs created on the same clock tick still get distinct IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh ID.
    pub fn generate() -> Self {
        let seq = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{:06}", Utc::now().format("%Y%m%d%H%M%S%3f"), seq))
    }

    /// Borrow the ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One runtime request to execute a workflow.
///
/// Immutable once created. The definition is the snapshot taken at enqueue
/// time, so later edits to the stored workflow do not affect queued jobs.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique ID
    pub id: JobId,
    /// Definition to run
    pub workflow: Arc<WorkflowDefinition>,
    /// Triggering event
    pub event: String,
    /// Arbitrary event data (branch, changed files, ...)
    pub payload: HashMap<String, Value>,
    /// When the job was queued
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Create a job with a fresh ID.
    pub fn new(
        workflow: Arc<WorkflowDefinition>,
        event: impl Into<String>,
        payload: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: JobId::generate(),
            workflow,
            event: event.into(),
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// Status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Waiting for a worker
    Queued,
    /// Claimed by a worker
    Running,
    /// All matching steps succeeded, or the job was skipped
    Completed,
    /// A step failed or could not be executed
    Failed,
}

impl ExecutionStatus {
    /// Check if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal transition from this status.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running) | (Self::Running, Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a completed job executed no steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The workflow's conditions did not hold for the job's context
    ConditionsNotMet(String),
    /// No step is tagged with the triggering event
    NoMatchingSteps,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConditionsNotMet(reason) => write!(f, "conditions not met: {}", reason),
            Self::NoMatchingSteps => f.write_str("no steps match the event"),
        }
    }
}

/// Result of executing a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name
    pub name: String,
    /// Command that was run
    pub command: String,
    /// Whether the step succeeded
    pub success: bool,
    /// Exit code, if the process exited normally
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Execution fault detail (spawn failure, timeout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status and results of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Job this record tracks
    pub job_id: JobId,
    /// Workflow name
    pub workflow: String,
    /// Triggering event
    pub event: String,
    /// Current status
    pub status: ExecutionStatus,
    /// When the job was queued
    pub enqueued_at: DateTime<Utc>,
    /// When a worker claimed the job
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-step results, in execution order
    pub steps: Vec<StepResult>,
    /// Failure description for failed jobs
    pub error: Option<String>,
    /// Set when a completed job deliberately executed nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl ExecutionRecord {
    /// Create the initial `queued` record for a job.
    pub fn queued(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            workflow: job.workflow.name.clone(),
            event: job.event.clone(),
            status: ExecutionStatus::Queued,
            enqueued_at: job.enqueued_at,
            started_at: None,
            finished_at: None,
            steps: Vec::new(),
            error: None,
            skipped: None,
        }
    }

    /// Whether the job was skipped rather than run.
    pub fn was_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Total runtime in milliseconds, once terminal.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// One-line status summary for display.
    pub fn summary(&self) -> String {
        match (&self.status, &self.skipped, &self.error) {
            (ExecutionStatus::Completed, Some(skip), _) => format!("completed (skipped: {})", skip),
            (ExecutionStatus::Failed, _, Some(err)) => format!("failed: {}", err),
            (status, _, _) => {
                let ok = self.steps.iter().filter(|s| s.success).count();
                format!("{} ({}/{} steps ok)", status, ok, self.steps.len())
            }
        }
    }
}
