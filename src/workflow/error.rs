//! Workflow error types.

use thiserror::Error;

use super::record::JobId;

/// Result type for definition and store operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised while parsing, validating or persisting workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The definition failed validation; every reason is listed.
    #[error("Invalid workflow definition: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// The name cannot be used as a storage key.
    #[error("Invalid workflow name '{0}': use letters, digits, '.', '_' or '-' (max 128)")]
    InvalidName(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid YAML.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The document has the right shape but could not be mapped onto a definition.
    #[error("Malformed document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported synchronously by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No workflow with this name is stored.
    #[error("Workflow '{0}' not found")]
    NotFound(String),

    /// The stored definition no longer passes validation.
    #[error("Workflow '{name}' is no longer valid: {}", .reasons.join("; "))]
    InvalidDefinition { name: String, reasons: Vec<String> },

    /// The workflow does not react to this event.
    #[error("Workflow '{workflow}' does not accept event '{event}'")]
    EventNotAccepted { workflow: String, event: String },

    /// The worker pool has been shut down.
    #[error("Engine is shut down; job {0} was not queued")]
    ShutDown(JobId),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] WorkflowError),
}

/// Faults raised when a step could not be executed at all.
///
/// A command that runs and exits non-zero is not a fault; it is reported
/// through [`super::StepOutput::success`].
#[derive(Debug, Error)]
pub enum StepError {
    /// The interpreter could not be started.
    #[error("Failed to start '{shell}': {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },

    /// The process started but its output could not be collected.
    #[error("IO error while running step: {0}")]
    Io(#[from] std::io::Error),

    /// The process outlived its time budget and was killed.
    #[error("Step timed out after {0:?}")]
    Timeout(std::time::Duration),
}
