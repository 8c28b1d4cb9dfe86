//! Workflow persistence.
//!
//! Definitions are stored one document per workflow name. The file-backed
//! store replaces documents atomically so a concurrent reader sees either the
//! old or the new definition, never a partial write.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use super::error::{WorkflowError, WorkflowResult};
use super::schema::WorkflowDefinition;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("valid name pattern"));

/// Whether a workflow name is safe to use as a storage key.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

fn check_name(name: &str) -> WorkflowResult<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidName(name.to_string()))
    }
}

/// Storage for named workflow definitions.
///
/// Callers validate definitions before saving; the store only guarantees
/// that a saved document is never visible half-written.
pub trait WorkflowStore: Send + Sync {
    /// Create or replace the definition stored under `name`.
    fn save(&self, name: &str, def: &WorkflowDefinition) -> WorkflowResult<()>;

    /// Load a definition, `None` if nothing is stored under `name`.
    fn load(&self, name: &str) -> WorkflowResult<Option<WorkflowDefinition>>;

    /// All stored definitions, sorted by name.
    fn list(&self) -> WorkflowResult<Vec<WorkflowDefinition>>;

    /// Delete a definition. Returns whether anything was removed.
    fn delete(&self, name: &str) -> WorkflowResult<bool>;
}

/// File-backed store keeping one YAML document per workflow.
#[derive(Debug, Clone)]
pub struct FileWorkflowStore {
    dir: PathBuf,
}

impl FileWorkflowStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the documents.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.yaml", name))
    }
}

impl WorkflowStore for FileWorkflowStore {
    fn save(&self, name: &str, def: &WorkflowDefinition) -> WorkflowResult<()> {
        check_name(name)?;
        fs::create_dir_all(&self.dir)?;

        let content = serde_yaml::to_string(def)?;

        // Temp file in the same directory so the rename stays on one filesystem
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(name)).map_err(|e| WorkflowError::Io(e.error))?;

        tracing::debug!(workflow = name, dir = ?self.dir, "Saved workflow");
        Ok(())
    }

    fn load(&self, name: &str) -> WorkflowResult<Option<WorkflowDefinition>> {
        check_name(name)?;

        let path = self.path_for(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_yaml::from_str(&content)?))
    }

    fn list(&self) -> WorkflowResult<Vec<WorkflowDefinition>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut defs = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.extension().map_or(true, |e| e != "yaml") {
                continue;
            }

            let parsed = fs::read_to_string(&path)
                .map_err(WorkflowError::from)
                .and_then(|c| serde_yaml::from_str::<WorkflowDefinition>(&c).map_err(Into::into));

            match parsed {
                Ok(def) => defs.push(def),
                Err(e) => tracing::warn!(path = ?path, error = %e, "Skipping unreadable workflow"),
            }
        }

        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    fn delete(&self, name: &str) -> WorkflowResult<bool> {
        check_name(name)?;

        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<BTreeMap<String, WorkflowDefinition>>,
}

impl MemoryWorkflowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for MemoryWorkflowStore {
    fn save(&self, name: &str, def: &WorkflowDefinition) -> WorkflowResult<()> {
        check_name(name)?;
        self.workflows.write().insert(name.to_string(), def.clone());
        Ok(())
    }

    fn load(&self, name: &str) -> WorkflowResult<Option<WorkflowDefinition>> {
        Ok(self.workflows.read().get(name).cloned())
    }

    fn list(&self) -> WorkflowResult<Vec<WorkflowDefinition>> {
        Ok(self.workflows.read().values().cloned().collect())
    }

    fn delete(&self, name: &str) -> WorkflowResult<bool> {
        Ok(self.workflows.write().remove(name).is_some())
    }
}
