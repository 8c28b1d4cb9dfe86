//! Persisted run log.
//!
//! The engine keeps its history in memory for the lifetime of the process.
//! The run log stores terminal records on disk so runs started by one CLI
//! invocation can be inspected from the next.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::workflow::{ExecutionRecord, JobId};

/// Stored run log data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunHistory {
    /// Terminal records, oldest first
    pub records: Vec<ExecutionRecord>,
    /// Version for future migrations
    #[serde(default)]
    pub version: u32,
}

/// File-backed run log.
#[derive(Debug)]
pub struct RunLog {
    /// Path to the log file
    path: PathBuf,
    /// Loaded data
    history: RunHistory,
    /// Maximum number of records to keep
    max_entries: usize,
}

impl RunLog {
    /// Open the log at `path`, starting empty if the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let path = path.into();
        let history = match Self::load_history(&path) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Ignoring unreadable run log");
                RunHistory::default()
            }
        };

        Self { path, history, max_entries: max_entries.max(1) }
    }

    fn load_history(path: &Path) -> anyhow::Result<RunHistory> {
        if !path.exists() {
            return Ok(RunHistory::default());
        }

        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append terminal records, pruning the oldest beyond the limit.
    ///
    /// Non-terminal records are ignored.
    pub fn append(&mut self, records: impl IntoIterator<Item = ExecutionRecord>) {
        self.history.records.extend(records.into_iter().filter(|r| r.status.is_terminal()));

        let excess = self.history.records.len().saturating_sub(self.max_entries);
        if excess > 0 {
            self.history.records.drain(..excess);
        }
    }

    /// Append records and save, merging with whatever other processes
    /// wrote since this log was opened.
    ///
    /// Holds an advisory lock on `<path>.lock` across reload, append and
    /// save, so overlapping runs do not drop each other's records.
    pub fn commit(
        &mut self,
        records: impl IntoIterator<Item = ExecutionRecord>,
    ) -> anyhow::Result<()> {
        fs::create_dir_all(self.dir())?;
        let _lock = lock_log(&self.path)?;

        match Self::load_history(&self.path) {
            Ok(history) => self.history = history,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Overwriting unreadable run log");
            }
        }

        self.append(records);
        self.save()
    }

    /// Write the log atomically.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = self.dir();
        fs::create_dir_all(dir)?;

        let content = serde_json::to_string_pretty(&self.history)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&self.path)?;
        Ok(())
    }

    fn dir(&self) -> &Path {
        self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."))
    }

    /// Find a record by job ID.
    pub fn find(&self, id: &JobId) -> Option<&ExecutionRecord> {
        self.history.records.iter().find(|r| &r.job_id == id)
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[ExecutionRecord] {
        &self.history.records
    }

    /// The most recent `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> &[ExecutionRecord] {
        let start = self.history.records.len().saturating_sub(limit);
        &self.history.records[start..]
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.history.records.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.history.records.is_empty()
    }
}

/// Take an exclusive lock on the log's sidecar lock file, blocking until free.
///
/// The log itself is replaced by rename on save, so it cannot carry the lock.
#[cfg(unix)]
fn lock_log(path: &Path) -> anyhow::Result<nix::fcntl::Flock<fs::File>> {
    use nix::fcntl::{Flock, FlockArg};

    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");

    let file = fs::OpenOptions::new().create(true).truncate(false).write(true).open(&lock_path)?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| anyhow::anyhow!("Failed to lock run log: {errno}"))
}

#[cfg(not(unix))]
fn lock_log(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
