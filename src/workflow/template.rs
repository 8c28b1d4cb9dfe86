//! Reusable workflow templates.
//!
//! A template is an ordinary workflow definition kept in its own store.
//! Instantiating one copies it under a new name so the copy can be stored
//! and triggered like any other workflow.

use std::sync::Arc;

use super::error::WorkflowResult;
use super::schema::WorkflowDefinition;
use super::store::WorkflowStore;
use super::validator::WorkflowValidator;

/// Library of workflow templates.
pub struct TemplateLibrary {
    store: Arc<dyn WorkflowStore>,
    validator: WorkflowValidator,
}

impl TemplateLibrary {
    /// Create a library over `store`.
    pub fn new(store: Arc<dyn WorkflowStore>, validator: WorkflowValidator) -> Self {
        Self { store, validator }
    }

    /// Validate and save a template under its own name.
    pub fn create_template(&self, template: &WorkflowDefinition) -> WorkflowResult<()> {
        self.validator.validate(template).into_result()?;
        self.store.save(&template.name, template)?;
        tracing::info!(template = template.name, "Template saved");
        Ok(())
    }

    /// All templates, sorted by name.
    pub fn list_templates(&self) -> WorkflowResult<Vec<WorkflowDefinition>> {
        self.store.list()
    }

    /// Delete a template.
    pub fn remove_template(&self, name: &str) -> WorkflowResult<bool> {
        self.store.delete(name)
    }

    /// Copy a template under `name`, optionally replacing its description.
    ///
    /// Returns `None` when the template does not exist. The copy is
    /// validated but not stored.
    pub fn instantiate(
        &self,
        template: &str,
        name: &str,
        description: Option<&str>,
    ) -> WorkflowResult<Option<WorkflowDefinition>> {
        let Some(mut def) = self.store.load(template)? else {
            return Ok(None);
        };

        def.name = name.to_string();
        if let Some(description) = description {
            def.description = description.to_string();
        }

        self.validator.validate(&def).into_result()?;
        Ok(Some(def))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::error::WorkflowError;
    use crate::workflow::schema::Step;
    use crate::workflow::store::MemoryWorkflowStore;

    fn library() -> TemplateLibrary {
        TemplateLibrary::new(Arc::new(MemoryWorkflowStore::new()), WorkflowValidator::default())
    }

    fn template() -> WorkflowDefinition {
        WorkflowDefinition::new("rust-ci", "Build and test a cargo project")
            .with_event("push")
            .with_step(Step::new("build", "push", "cargo build"))
            .with_step(Step::new("test", "push", "cargo test"))
    }

    #[test]
    fn test_create_and_instantiate() {
        let lib = library();
        lib.create_template(&template()).unwrap();

        let def = lib.instantiate("rust-ci", "api-ci", Some("CI for the API crate")).unwrap().unwrap();
        assert_eq!(def.name, "api-ci");
        assert_eq!(def.description, "CI for the API crate");
        assert_eq!(def.steps, template().steps);

        let kept = lib.instantiate("rust-ci", "web-ci", None).unwrap().unwrap();
        assert_eq!(kept.description, template().description);
    }

    #[test]
    fn test_missing_template() {
        assert!(library().instantiate("nope", "x", None).unwrap().is_none());
    }

    #[test]
    fn test_invalid_template_or_name_rejected() {
        let lib = library();
        let bad = WorkflowDefinition::new("bad", "").with_step(Step::new("s", "push", ""));
        assert!(matches!(lib.create_template(&bad), Err(WorkflowError::Invalid(_))));

        lib.create_template(&template()).unwrap();
        assert!(lib.instantiate("rust-ci", "no/slashes", None).is_err());
    }

    #[test]
    fn test_list_and_remove() {
        let lib = library();
        lib.create_template(&template()).unwrap();

        assert_eq!(lib.list_templates().unwrap().len(), 1);
        assert!(lib.remove_template("rust-ci").unwrap());
        assert!(lib.list_templates().unwrap().is_empty());
    }
}
