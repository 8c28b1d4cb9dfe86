//! Workflow schema definitions.
//!
//! Defines the YAML/JSON structure of workflow documents.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique name, also used as the storage key
    pub name: String,

    /// Human-readable description (may be empty)
    pub description: String,

    /// Trigger events this workflow reacts to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,

    /// Steps to execute, in declared order
    pub steps: Vec<Step>,

    /// Predicates gating whether a job actually runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

/// A step in a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Name of the step
    pub name: String,

    /// Event that activates this step
    pub event: String,

    /// Shell command to execute
    pub command: String,

    /// Timeout in seconds, overriding the engine default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Extra environment variables for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

/// Conditions gating a workflow run.
///
/// Every declared predicate must hold for a job to execute its steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Conditions {
    /// Glob pattern the current branch must match (e.g. `main`, `release/*`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Glob patterns; at least one changed file must match one of them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_changes: Option<Vec<String>>,
}

/// Names of the predicates understood by [`Conditions`].
pub const CONDITION_KEYS: &[&str] = &["branch", "file_changes"];

impl WorkflowDefinition {
    /// Create a definition with no steps, events or conditions.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            events: Vec::new(),
            steps: Vec::new(),
            conditions: None,
        }
    }

    /// Add a declared trigger event.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    /// Append a step.
    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the gating conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Get the number of steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Steps activated by `event`, in declared order.
    pub fn steps_for<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a Step> + 'a {
        self.steps.iter().filter(move |s| s.event == event)
    }

    /// Whether the definition declares an explicit event set.
    pub fn declares_events(&self) -> bool {
        !self.events.is_empty()
    }
}

impl Step {
    /// Create a new step.
    pub fn new(
        name: impl Into<String>,
        event: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            event: event.into(),
            command: command.into(),
            timeout: None,
            env: None,
        }
    }

    /// Set a timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.get_or_insert_with(HashMap::new).insert(key.into(), value.into());
        self
    }
}

impl Conditions {
    /// Whether no predicate is declared.
    pub fn is_empty(&self) -> bool {
        self.branch.is_none() && self.file_changes.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workflow_yaml() {
        let yaml = r#"
name: ci
description: Build and test on push
events: [push, pull_request]
conditions:
  branch: main
  file_changes: ["*.rs", "Cargo.toml"]
steps:
  - name: build
    event: push
    command: cargo build
  - name: test
    event: push
    command: cargo test
    timeout: 600
  - name: review
    event: pull_request
    command: ./scripts/review.sh
    env:
      LEVEL: strict
"#;

        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(def.name, "ci");
        assert_eq!(def.events, vec!["push", "pull_request"]);
        assert_eq!(def.step_count(), 3);
        assert_eq!(def.steps[1].timeout, Some(600));
        assert_eq!(def.steps[2].env.as_ref().unwrap().get("LEVEL"), Some(&"strict".to_string()));

        let conditions = def.conditions.unwrap();
        assert_eq!(conditions.branch.as_deref(), Some("main"));
        assert_eq!(conditions.file_changes.unwrap().len(), 2);
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{"name": "x", "description": "", "steps": []}"#;
        let def: WorkflowDefinition = serde_json::from_str(json).unwrap();

        assert!(def.events.is_empty());
        assert!(def.conditions.is_none());
        assert!(!def.declares_events());
    }

    #[test]
    fn test_steps_for_keeps_declared_order() {
        let def = WorkflowDefinition::new("order", "")
            .with_step(Step::new("a", "push", "true"))
            .with_step(Step::new("b", "merge", "true"))
            .with_step(Step::new("c", "push", "true"));

        let names: Vec<_> = def.steps_for("push").map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(def.steps_for("pull_request").count(), 0);
    }

    #[test]
    fn test_unknown_condition_rejected() {
        let yaml = "author: alice\n";
        assert!(serde_yaml::from_str::<Conditions>(yaml).is_err());
    }

    #[test]
    fn test_serialization_skips_empty_optionals() {
        let def = WorkflowDefinition::new("lean", "no extras")
            .with_step(Step::new("only", "push", "true"));

        let yaml = serde_yaml::to_string(&def).unwrap();
        assert!(!yaml.contains("events"));
        assert!(!yaml.contains("conditions"));
        assert!(!yaml.contains("timeout"));
    }
}
