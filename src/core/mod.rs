//! Core types and functionality for Repoflow.
//!
//! This module contains the ambient pieces shared by the library and the
//! binary: configuration and the persisted run log.

mod config;
mod history;

pub use config::{Config, EngineSettings, HistoryConfig, WorkflowsConfig, CONFIG_ENV};
pub use history::{RunHistory, RunLog};
