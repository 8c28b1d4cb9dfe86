//! Workflow definition validation.
//!
//! Validation runs in two passes. The structural pass walks the raw document
//! and checks field presence and types; the semantic pass checks a typed
//! [`WorkflowDefinition`] against the configured event allow-list. Both
//! collect every problem instead of stopping at the first one.

use serde_json::Value;

use super::error::{WorkflowError, WorkflowResult};
use super::schema::{WorkflowDefinition, CONDITION_KEYS};
use super::store::is_valid_name;

/// Events accepted when configuration does not say otherwise.
pub const DEFAULT_EVENTS: &[&str] = &["push", "pull_request", "merge"];

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Human-readable reasons, empty when valid
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Whether validation passed.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, reason: impl Into<String>) {
        self.errors.push(reason.into());
    }

    /// Convert into a result, listing every reason on failure.
    pub fn into_result(self) -> WorkflowResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(WorkflowError::Invalid(self.errors))
        }
    }
}

/// Validator for workflow definitions.
#[derive(Debug, Clone)]
pub struct WorkflowValidator {
    allowed_events: Vec<String>,
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new(DEFAULT_EVENTS.iter().map(|e| (*e).to_string()).collect())
    }
}

impl WorkflowValidator {
    /// Create a validator accepting the given trigger events.
    pub fn new(allowed_events: Vec<String>) -> Self {
        Self { allowed_events }
    }

    /// The configured event allow-list.
    pub fn allowed_events(&self) -> &[String] {
        &self.allowed_events
    }

    /// Whether an event is in the allow-list.
    pub fn is_allowed_event(&self, event: &str) -> bool {
        self.allowed_events.iter().any(|e| e == event)
    }

    /// Validate an untyped document, then the definition it describes.
    pub fn validate_document(&self, doc: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();
        check_structure(doc, &mut report);

        if !report.is_ok() {
            return report;
        }

        match serde_json::from_value::<WorkflowDefinition>(doc.clone()) {
            Ok(def) => self.validate(&def),
            Err(e) => {
                report.push(format!("Malformed workflow document: {}", e));
                report
            }
        }
    }

    /// Validate a typed definition.
    pub fn validate(&self, def: &WorkflowDefinition) -> ValidationReport {
        let mut report = ValidationReport::default();

        if def.name.trim().is_empty() {
            report.push("Workflow name cannot be empty");
        } else if !is_valid_name(&def.name) {
            report.push(format!(
                "Workflow name '{}' may only contain letters, digits, '.', '_' and '-'",
                def.name
            ));
        }

        for event in &def.events {
            if !self.is_allowed_event(event) {
                report.push(format!("Event '{}' is not a recognized trigger", event));
            }
        }

        for (i, step) in def.steps.iter().enumerate() {
            let label = if step.name.trim().is_empty() {
                report.push(format!("Step {} has no name", i + 1));
                format!("#{}", i + 1)
            } else {
                step.name.clone()
            };

            if step.command.trim().is_empty() {
                report.push(format!("Step '{}' has no command", label));
            }

            if step.event.trim().is_empty() {
                report.push(format!("Step '{}' has no event", label));
            } else if def.declares_events() {
                if !def.events.contains(&step.event) {
                    report.push(format!(
                        "Step '{}' uses event '{}' which is not declared in events",
                        label, step.event
                    ));
                }
            } else if !self.is_allowed_event(&step.event) {
                report.push(format!(
                    "Step '{}' uses event '{}' which is not a recognized trigger",
                    label, step.event
                ));
            }

            if step.timeout == Some(0) {
                report.push(format!("Step '{}' has a zero timeout", label));
            }
        }

        if let Some(ref conditions) = def.conditions {
            if let Some(ref branch) = conditions.branch {
                if let Err(e) = glob::Pattern::new(branch) {
                    report.push(format!("Invalid branch pattern '{}': {}", branch, e));
                }
            }
            if let Some(ref patterns) = conditions.file_changes {
                if patterns.is_empty() {
                    report.push("Condition 'file_changes' must list at least one pattern");
                }
                for pattern in patterns {
                    if let Err(e) = glob::Pattern::new(pattern) {
                        report.push(format!("Invalid file pattern '{}': {}", pattern, e));
                    }
                }
            }
        }

        report
    }

    /// Parse a YAML or JSON document into a validated definition.
    pub fn parse_definition(&self, content: &str) -> WorkflowResult<WorkflowDefinition> {
        let doc: Value = serde_yaml::from_str(content)?;
        self.validate_document(&doc).into_result()?;
        Ok(serde_json::from_value(doc)?)
    }
}

/// Structural checks over the raw document.
fn check_structure(doc: &Value, report: &mut ValidationReport) {
    let Some(obj) = doc.as_object() else {
        report.push("Workflow document must be a mapping");
        return;
    };

    for field in ["name", "description"] {
        match obj.get(field) {
            None => report.push(format!("Missing required field '{}'", field)),
            Some(v) if !v.is_string() => report.push(format!("Field '{}' must be a string", field)),
            Some(_) => {}
        }
    }

    match obj.get("steps") {
        None => report.push("Missing required field 'steps'"),
        Some(Value::Array(steps)) => {
            for (i, step) in steps.iter().enumerate() {
                check_step(i + 1, step, report);
            }
        }
        Some(_) => report.push("Field 'steps' must be a list"),
    }

    if let Some(events) = obj.get("events") {
        match events {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        report.push(format!("Event {} must be a string", i + 1));
                    }
                }
            }
            _ => report.push("Field 'events' must be a list of strings"),
        }
    }

    if let Some(conditions) = obj.get("conditions") {
        check_conditions(conditions, report);
    }
}

fn check_step(index: usize, step: &Value, report: &mut ValidationReport) {
    let Some(obj) = step.as_object() else {
        report.push(format!("Step {} must be a mapping", index));
        return;
    };

    for field in ["name", "command", "event"] {
        match obj.get(field) {
            None => report.push(format!("Step {} is missing '{}'", index, field)),
            Some(v) if !v.is_string() => {
                report.push(format!("Step {} field '{}' must be a string", index, field));
            }
            Some(_) => {}
        }
    }

    if let Some(timeout) = obj.get("timeout") {
        if !timeout.is_u64() {
            report.push(format!("Step {} field 'timeout' must be a whole number of seconds", index));
        }
    }

    if let Some(env) = obj.get("env") {
        let all_strings = env.as_object().is_some_and(|m| m.values().all(Value::is_string));
        if !all_strings {
            report.push(format!("Step {} field 'env' must map names to strings", index));
        }
    }
}

fn check_conditions(conditions: &Value, report: &mut ValidationReport) {
    let Some(obj) = conditions.as_object() else {
        report.push("Field 'conditions' must be a mapping");
        return;
    };

    for (key, value) in obj {
        match key.as_str() {
            "branch" => {
                if !value.is_string() {
                    report.push("Condition 'branch' must be a string");
                }
            }
            "file_changes" => {
                let ok = value.as_array().is_some_and(|a| a.iter().all(Value::is_string));
                if !ok {
                    report.push("Condition 'file_changes' must be a list of strings");
                }
            }
            other => report.push(format!(
                "Unknown condition '{}' (expected one of: {})",
                other,
                CONDITION_KEYS.join(", ")
            )),
        }
    }
}
