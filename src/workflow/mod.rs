//! Workflow execution engine.
//!
//! Workflows are named, validated definitions of ordered shell steps, each
//! tagged with the repository event that activates it. The [`Engine`]
//! queues jobs for incoming events and runs them on a fixed worker pool,
//! tracking each job's [`ExecutionRecord`] from `queued` to a terminal
//! status.

mod condition;
mod engine;
mod error;
mod record;
mod schema;
mod step;
mod store;
mod template;
mod validator;

pub use condition::{
    ConditionContext, ConditionEvaluator, ConditionOutcome, BRANCH_KEY, CHANGED_FILES_KEY,
};
pub use engine::{Engine, EngineConfig, DEFAULT_WORKERS};
pub use error::{EngineError, StepError, WorkflowError, WorkflowResult};
pub use record::{ExecutionRecord, ExecutionStatus, Job, JobId, SkipReason, StepResult};
pub use schema::{Conditions, Step, WorkflowDefinition, CONDITION_KEYS};
pub use step::{ShellStepExecutor, StepContext, StepExecutor, StepOutput, ENV_PREFIX};
pub use store::{is_valid_name, FileWorkflowStore, MemoryWorkflowStore, WorkflowStore};
pub use template::TemplateLibrary;
pub use validator::{ValidationReport, WorkflowValidator, DEFAULT_EVENTS};
