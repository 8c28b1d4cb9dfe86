//! Git integration module.
//!
//! Reads the repository context a workflow job runs against: the current
//! branch and the files changed in the working tree. The engine never calls
//! this directly; the context travels in the job payload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use git2::{Repository, StatusOptions};
use serde_json::Value;

use crate::workflow::{BRANCH_KEY, CHANGED_FILES_KEY};

/// Git repository wrapper exposing the context workflows care about.
pub struct GitRepository {
    repo: Repository,
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository").field("root", &self.root()).finish()
    }
}

impl GitRepository {
    /// Open a Git repository from the given path.
    ///
    /// This will search up the directory tree to find a Git repository.
    #[must_use]
    pub fn discover(path: impl AsRef<Path>) -> Option<Self> {
        Repository::discover(path.as_ref()).ok().map(|repo| Self { repo })
    }

    /// Open a Git repository at the exact path.
    #[must_use]
    pub fn open(path: impl AsRef<Path>) -> Option<Self> {
        Repository::open(path.as_ref()).ok().map(|repo| Self { repo })
    }

    /// Get the repository root path.
    #[must_use]
    pub fn root(&self) -> Option<PathBuf> {
        self.repo.workdir().map(Path::to_path_buf)
    }

    /// Get the current branch name (None on detached or unborn HEAD).
    #[must_use]
    pub fn current_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;

        if head.is_branch() {
            head.shorthand().map(String::from)
        } else {
            None
        }
    }

    /// Paths with staged, unstaged or untracked changes, relative to the root.
    pub fn changed_files(&self) -> anyhow::Result<Vec<String>> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .include_unmodified(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut files: Vec<String> =
            statuses.iter().filter_map(|entry| entry.path().map(String::from)).collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Job payload describing the current repository state.
    ///
    /// Sets `branch` (when on a branch) and `changed_files`.
    pub fn event_payload(&self) -> anyhow::Result<HashMap<String, Value>> {
        let mut payload = HashMap::new();

        if let Some(branch) = self.current_branch() {
            payload.insert(BRANCH_KEY.to_string(), Value::String(branch));
        }

        let files = self.changed_files()?.into_iter().map(Value::String).collect();
        payload.insert(CHANGED_FILES_KEY.to_string(), Value::Array(files));

        Ok(payload)
    }
}

/// Discover Git repository from the current directory.
#[must_use]
pub fn discover_repo() -> Option<GitRepository> {
    std::env::current_dir().ok().and_then(GitRepository::discover)
}

#[cfg(test)]
mod tests {
    use git2::{RepositoryInitOptions, Signature};

    use super::*;

    fn init_repo(dir: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        Repository::init_opts(dir, &opts).unwrap()
    }

    fn commit_all(repo: &Repository) {
        let mut index = repo.index().unwrap();
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
    }

    #[test]
    fn test_unborn_head_has_no_branch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let repo = GitRepository::open(dir.path()).unwrap();
        assert!(repo.current_branch().is_none());
    }

    #[test]
    fn test_branch_and_changed_files() {
        let dir = tempfile::tempdir().unwrap();
        let raw = init_repo(dir.path());

        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        commit_all(&raw);

        std::fs::write(dir.path().join("README.md"), "changed").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src").join("app.py"), "print()").unwrap();

        let repo = GitRepository::discover(dir.path().join("src")).unwrap();
        assert_eq!(repo.current_branch().as_deref(), Some("main"));
        assert_eq!(repo.changed_files().unwrap(), vec!["README.md", "src/app.py"]);

        let payload = repo.event_payload().unwrap();
        assert_eq!(payload[BRANCH_KEY], Value::from("main"));
        assert_eq!(payload[CHANGED_FILES_KEY].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitRepository::open(dir.path()).is_none());
    }
}
