//! Condition evaluation.
//!
//! Decides whether a claimed job should execute its steps, based on the
//! workflow's declared [`Conditions`] and the repository context carried in
//! the job payload.

use std::collections::HashMap;

use glob::{MatchOptions, Pattern};
use serde_json::Value;

use super::schema::Conditions;

/// Payload key holding the current branch name.
pub const BRANCH_KEY: &str = "branch";

/// Payload key holding the list of changed files.
pub const CHANGED_FILES_KEY: &str = "changed_files";

/// Repository context a job runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionContext {
    /// Current branch, if known
    pub branch: Option<String>,
    /// Files changed by the triggering event
    pub changed_files: Vec<String>,
}

impl ConditionContext {
    /// Extract the context from a job payload.
    ///
    /// Non-string entries in `changed_files` are ignored.
    pub fn from_payload(payload: &HashMap<String, Value>) -> Self {
        let branch = payload.get(BRANCH_KEY).and_then(Value::as_str).map(str::to_string);
        let changed_files = payload
            .get(CHANGED_FILES_KEY)
            .and_then(Value::as_array)
            .map(|files| files.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Self { branch, changed_files }
    }
}

/// Result of evaluating a job's conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    /// Every declared predicate holds
    Matched,
    /// A predicate failed; the job is skipped
    NotMet(String),
}

impl ConditionOutcome {
    /// Whether the job should proceed.
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// Stateless evaluator for workflow conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Create an evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate all declared conditions (logical AND).
    ///
    /// `None` or empty conditions always match.
    pub fn evaluate(
        &self,
        conditions: Option<&Conditions>,
        ctx: &ConditionContext,
    ) -> ConditionOutcome {
        let Some(conditions) = conditions else {
            return ConditionOutcome::Matched;
        };

        if let Some(ref pattern) = conditions.branch {
            match ctx.branch.as_deref() {
                None => {
                    return ConditionOutcome::NotMet(format!(
                        "branch must match '{}' but no branch was supplied",
                        pattern
                    ));
                }
                Some(branch) if !glob_matches(pattern, branch) => {
                    return ConditionOutcome::NotMet(format!(
                        "branch '{}' does not match '{}'",
                        branch, pattern
                    ));
                }
                Some(_) => {}
            }
        }

        if let Some(ref patterns) = conditions.file_changes {
            let hit = ctx
                .changed_files
                .iter()
                .any(|file| patterns.iter().any(|p| file_matches(p, file)));

            if !hit {
                return ConditionOutcome::NotMet(format!(
                    "no changed file matches {}",
                    patterns.join(", ")
                ));
            }
        }

        ConditionOutcome::Matched
    }

    /// Convenience wrapper returning only whether the job should proceed.
    pub fn matches(&self, conditions: Option<&Conditions>, ctx: &ConditionContext) -> bool {
        self.evaluate(conditions, ctx).is_match()
    }
}

/// Match a branch pattern. `*` does not cross `/`.
fn glob_matches(pattern: &str, value: &str) -> bool {
    let options = MatchOptions { require_literal_separator: true, ..MatchOptions::new() };
    Pattern::new(pattern).map(|p| p.matches_with(value, options)).unwrap_or(false)
}

/// Match a changed-file pattern.
///
/// Patterns without a `/` are matched against the file name alone, so
/// `*.py` matches `src/app/main.py`.
fn file_matches(pattern: &str, path: &str) -> bool {
    if pattern.contains('/') {
        return glob_matches(pattern, path);
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    glob_matches(pattern, file_name)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx(branch: Option<&str>, files: &[&str]) -> ConditionContext {
        ConditionContext {
            branch: branch.map(str::to_string),
            changed_files: files.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    fn conditions(branch: Option<&str>, files: Option<&[&str]>) -> Conditions {
        Conditions {
            branch: branch.map(str::to_string),
            file_changes: files.map(|f| f.iter().map(|p| (*p).to_string()).collect()),
        }
    }

    #[test]
    fn test_no_conditions_always_match() {
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.matches(None, &ConditionContext::default()));
        assert!(evaluator.matches(Some(&Conditions::default()), &ConditionContext::default()));
    }

    #[test]
    fn test_branch_condition() {
        let evaluator = ConditionEvaluator::new();
        let cond = conditions(Some("main"), None);

        assert!(evaluator.matches(Some(&cond), &ctx(Some("main"), &[])));
        assert!(!evaluator.matches(Some(&cond), &ctx(Some("develop"), &[])));
        assert!(!evaluator.matches(Some(&cond), &ctx(None, &[])));
    }

    #[test]
    fn test_branch_glob_does_not_cross_separator() {
        let evaluator = ConditionEvaluator::new();
        let cond = conditions(Some("release/*"), None);

        assert!(evaluator.matches(Some(&cond), &ctx(Some("release/1.2"), &[])));
        assert!(!evaluator.matches(Some(&cond), &ctx(Some("release/1.2/hotfix"), &[])));
    }

    #[test]
    fn test_file_change_condition() {
        let evaluator = ConditionEvaluator::new();
        let cond = conditions(None, Some(&["*.py"]));

        assert!(evaluator.matches(Some(&cond), &ctx(None, &["README.md", "src/app/main.py"])));
        assert!(!evaluator.matches(Some(&cond), &ctx(None, &["README.md"])));
        assert!(!evaluator.matches(Some(&cond), &ctx(None, &[])));
    }

    #[test]
    fn test_file_pattern_with_directory() {
        let evaluator = ConditionEvaluator::new();
        let cond = conditions(None, Some(&["docs/**/*.md"]));

        assert!(evaluator.matches(Some(&cond), &ctx(None, &["docs/guide/intro.md"])));
        assert!(!evaluator.matches(Some(&cond), &ctx(None, &["intro.md"])));
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let evaluator = ConditionEvaluator::new();
        let cond = conditions(Some("main"), Some(&["*.py"]));

        assert!(evaluator.matches(Some(&cond), &ctx(Some("main"), &["a.py"])));

        let outcome = evaluator.evaluate(Some(&cond), &ctx(Some("main"), &["a.rs"]));
        assert_eq!(outcome, ConditionOutcome::NotMet("no changed file matches *.py".to_string()));

        let outcome = evaluator.evaluate(Some(&cond), &ctx(Some("dev"), &["a.py"]));
        assert!(matches!(outcome, ConditionOutcome::NotMet(reason) if reason.contains("dev")));
    }

    #[test]
    fn test_context_from_payload() {
        let payload: HashMap<String, Value> = [
            ("branch".to_string(), json!("main")),
            ("changed_files".to_string(), json!(["a.py", 3, "b/c.rs"])),
            ("author".to_string(), json!("someone")),
        ]
        .into_iter()
        .collect();

        let context = ConditionContext::from_payload(&payload);
        assert_eq!(context, ctx(Some("main"), &["a.py", "b/c.rs"]));
        assert_eq!(ConditionContext::from_payload(&HashMap::new()), ConditionContext::default());
    }
}
