//! # Repoflow
//!
//! Event-driven workflow engine for repository automation.
//!
//! Repoflow stores named workflows (ordered shell steps, each tagged with
//! the repository event that activates it) and runs them when events such
//! as `push`, `pull_request` or `merge` arrive. Jobs are queued without
//! blocking the caller and executed by a fixed pool of workers; every job's
//! status and results can be polled while it runs and remain in the
//! history once it finishes.
//!
//! ## Quick Start
//!
//! ```bash
//! # Store a workflow
//! repoflow set ci.yaml
//!
//! # Trigger it for a push on the current branch
//! repoflow run ci --event push --git
//!
//! # Inspect past runs
//! repoflow history
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod core;
pub mod workflow;

#[cfg(feature = "git")]
pub mod git;

#[cfg(feature = "git")]
pub use git::GitRepository;

// Re-export commonly used types
pub use core::{Config, RunLog};
pub use workflow::{
    Engine, EngineConfig, EngineError, ExecutionRecord, ExecutionStatus, FileWorkflowStore, JobId,
    ShellStepExecutor, Step, StepExecutor, WorkflowDefinition, WorkflowError, WorkflowStore,
    WorkflowValidator,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "repoflow";
