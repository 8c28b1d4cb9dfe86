//! Workflow execution engine.
//!
//! Owns the job queue, a fixed pool of workers draining it, and the
//! status/history tables. Enqueueing never waits for a worker; status and
//! history reads are snapshots that never wait on running work.
//!
//! The status map and the history list sit behind a single lock, so a
//! terminal status, its end timestamp and the history append become visible
//! together.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::condition::{ConditionContext, ConditionEvaluator, ConditionOutcome};
use super::error::{EngineError, WorkflowResult};
use super::record::{ExecutionRecord, ExecutionStatus, Job, JobId, SkipReason, StepResult};
use super::schema::{Conditions, WorkflowDefinition};
use super::step::{StepContext, StepExecutor};
use super::store::WorkflowStore;
use super::validator::{ValidationReport, WorkflowValidator};

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Time budget for steps that do not set their own timeout
    pub step_timeout: Option<Duration>,
    /// Working directory for step commands
    pub working_dir: Option<PathBuf>,
    /// Recognized trigger events
    pub allowed_events: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            step_timeout: None,
            working_dir: None,
            allowed_events: WorkflowValidator::default().allowed_events().to_vec(),
        }
    }
}

impl EngineConfig {
    /// Set the number of workers (at least one).
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the default step timeout.
    #[must_use]
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Set the working directory for step commands.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Replace the event allow-list.
    #[must_use]
    pub fn allowed_events(mut self, events: Vec<String>) -> Self {
        self.allowed_events = events;
        self
    }
}

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<JobId, ExecutionRecord>,
    /// Terminal records, in completion order
    history: Vec<ExecutionRecord>,
}

/// How a job ended.
struct Outcome {
    status: ExecutionStatus,
    error: Option<String>,
    skipped: Option<SkipReason>,
}

impl Outcome {
    fn completed() -> Self {
        Self { status: ExecutionStatus::Completed, error: None, skipped: None }
    }

    fn skipped(reason: SkipReason) -> Self {
        Self { status: ExecutionStatus::Completed, error: None, skipped: Some(reason) }
    }

    fn failed(error: String) -> Self {
        Self { status: ExecutionStatus::Failed, error: Some(error), skipped: None }
    }
}

/// State shared between the engine handle and its workers.
struct Shared {
    tables: Mutex<Tables>,
    finished: Notify,
    store: Arc<dyn WorkflowStore>,
    executor: Arc<dyn StepExecutor>,
    validator: WorkflowValidator,
    evaluator: ConditionEvaluator,
    config: EngineConfig,
}

/// The workflow execution engine.
pub struct Engine {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.shared.tables.lock();
        f.debug_struct("Engine")
            .field("workers", &self.shared.config.workers)
            .field("jobs", &tables.records.len())
            .field("history", &tables.history.len())
            .finish()
    }
}

impl Engine {
    /// Start the engine and its worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: EngineConfig,
        store: Arc<dyn WorkflowStore>,
        executor: Arc<dyn StepExecutor>,
    ) -> Self {
        let workers = config.workers.max(1);
        let validator = WorkflowValidator::new(config.allowed_events.clone());

        let shared = Arc::new(Shared {
            tables: Mutex::new(Tables::default()),
            finished: Notify::new(),
            store,
            executor,
            validator,
            evaluator: ConditionEvaluator::new(),
            config,
        });

        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers)
            .map(|worker| {
                let shared = Arc::clone(&shared);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        // Only one idle worker waits on the channel; the rest park on the lock
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };
                        shared.process(worker, job).await;
                    }
                    tracing::debug!(worker, "Worker stopped");
                })
            })
            .collect();

        tracing::info!(workers, "Workflow engine started");

        Self { shared, queue: Mutex::new(Some(tx)), workers: Mutex::new(handles) }
    }

    /// The validator used for definitions, configured with the engine's allow-list.
    pub fn validator(&self) -> &WorkflowValidator {
        &self.shared.validator
    }

    // --- Definitions ---

    /// Validate an untyped workflow document without storing it.
    pub fn validate_definition(&self, doc: &Value) -> ValidationReport {
        self.shared.validator.validate_document(doc)
    }

    /// Validate and store a definition, replacing any previous one.
    pub fn set_workflow(&self, def: &WorkflowDefinition) -> WorkflowResult<()> {
        self.shared.validator.validate(def).into_result()?;
        self.shared.store.save(&def.name, def)?;
        tracing::info!(workflow = def.name, steps = def.step_count(), "Workflow stored");
        Ok(())
    }

    /// Store a definition with the given conditions replacing its own.
    pub fn set_conditional_workflow(
        &self,
        def: &WorkflowDefinition,
        conditions: Conditions,
    ) -> WorkflowResult<()> {
        let def = def.clone().with_conditions(conditions);
        self.set_workflow(&def)
    }

    /// Load a stored definition.
    pub fn get_workflow(&self, name: &str) -> WorkflowResult<Option<WorkflowDefinition>> {
        self.shared.store.load(name)
    }

    /// All stored definitions.
    pub fn list_workflows(&self) -> WorkflowResult<Vec<WorkflowDefinition>> {
        self.shared.store.list()
    }

    /// Delete a stored definition. Queued jobs keep their snapshot.
    pub fn remove_workflow(&self, name: &str) -> WorkflowResult<bool> {
        let removed = self.shared.store.delete(name)?;
        if removed {
            tracing::info!(workflow = name, "Workflow removed");
        }
        Ok(removed)
    }

    // --- Execution ---

    /// Queue a run of `workflow` for `event`.
    ///
    /// Returns as soon as the job is queued. Fails without creating a job
    /// when the workflow is missing, no longer valid, or does not accept the
    /// event.
    pub fn enqueue_execution(
        &self,
        workflow: &str,
        event: &str,
        payload: HashMap<String, Value>,
    ) -> Result<JobId, EngineError> {
        let def = self
            .shared
            .store
            .load(workflow)?
            .ok_or_else(|| EngineError::NotFound(workflow.to_string()))?;

        let report = self.shared.validator.validate(&def);
        if !report.is_ok() {
            return Err(EngineError::InvalidDefinition {
                name: workflow.to_string(),
                reasons: report.errors,
            });
        }

        if !self.accepts_event(&def, event) {
            return Err(EngineError::EventNotAccepted {
                workflow: workflow.to_string(),
                event: event.to_string(),
            });
        }

        let job = Job::new(Arc::new(def), event, payload);
        let id = job.id.clone();

        // The record must exist before a worker can claim the job
        self.shared.tables.lock().records.insert(id.clone(), ExecutionRecord::queued(&job));

        let sent = self.queue.lock().as_ref().is_some_and(|tx| tx.send(job).is_ok());
        if !sent {
            self.shared.tables.lock().records.remove(&id);
            return Err(EngineError::ShutDown(id));
        }

        tracing::info!(job_id = %id, workflow, event, "Job queued");
        Ok(id)
    }

    /// Queue `event` for several workflows with an empty payload.
    ///
    /// Each workflow is attempted independently; failures are logged and
    /// left out of the returned IDs.
    pub fn enqueue_many<S: AsRef<str>>(&self, workflows: &[S], event: &str) -> Vec<JobId> {
        self.enqueue_many_with(workflows, event, &HashMap::new())
    }

    /// Like [`Engine::enqueue_many`], sharing one payload between all jobs.
    pub fn enqueue_many_with<S: AsRef<str>>(
        &self,
        workflows: &[S],
        event: &str,
        payload: &HashMap<String, Value>,
    ) -> Vec<JobId> {
        workflows
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                match self.enqueue_execution(name, event, payload.clone()) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        tracing::warn!(workflow = name, event, error = %e, "Could not queue workflow");
                        None
                    }
                }
            })
            .collect()
    }

    /// Whether `def` reacts to `event`.
    ///
    /// A definition with declared events accepts exactly those; one without
    /// accepts any recognized trigger.
    pub fn accepts_event(&self, def: &WorkflowDefinition, event: &str) -> bool {
        if def.declares_events() {
            def.events.iter().any(|e| e == event)
        } else {
            self.shared.validator.is_allowed_event(event)
        }
    }

    // --- Status ---

    /// Snapshot of a job's record.
    pub fn status(&self, id: &JobId) -> Option<ExecutionRecord> {
        self.shared.tables.lock().records.get(id).cloned()
    }

    /// Terminal records, oldest completion first. Running jobs are not included.
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.shared.tables.lock().history.clone()
    }

    /// Number of jobs not yet terminal.
    pub fn pending_count(&self) -> usize {
        self.shared.tables.lock().records.values().filter(|r| !r.status.is_terminal()).count()
    }

    /// Wait until a job reaches a terminal status.
    ///
    /// Returns `None` for unknown IDs.
    pub async fn wait_for(&self, id: &JobId) -> Option<ExecutionRecord> {
        loop {
            let notified = self.shared.finished.notified();
            tokio::pin!(notified);
            // Register before checking so a transition in between is not missed
            notified.as_mut().enable();

            let record = self.status(id)?;
            if record.status.is_terminal() {
                return Some(record);
            }
            notified.await;
        }
    }

    /// Wait for several jobs, in the order given.
    pub async fn wait_all(&self, ids: &[JobId]) -> Vec<ExecutionRecord> {
        let waits = ids.iter().map(|id| self.wait_for(id));
        futures::future::join_all(waits).await.into_iter().flatten().collect()
    }

    /// Stop accepting jobs, let the workers drain the queue, and join them.
    pub async fn shutdown(&self) {
        self.queue.lock().take();
        let handles = std::mem::take(&mut *self.workers.lock());

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker terminated abnormally");
            }
        }
        tracing::info!("Workflow engine stopped");
    }
}

impl Shared {
    /// Run one claimed job to a terminal status.
    async fn process(&self, worker: usize, job: Job) {
        let span = tracing::info_span!("job", job_id = %job.id, workflow = job.workflow.name);
        self.process_in_span(worker, job).instrument(span).await;
    }

    async fn process_in_span(&self, worker: usize, job: Job) {
        self.mark_running(&job.id);
        tracing::debug!(worker, event = job.event, "Job claimed");

        // A panicking executor must not leave the record stuck or kill the worker
        let outcome = match AssertUnwindSafe(self.run_steps(&job)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::failed("Step execution panicked".to_string()),
        };

        match outcome.status {
            ExecutionStatus::Failed => tracing::warn!(
                error = outcome.error.as_deref().unwrap_or_default(),
                "Job failed"
            ),
            _ => tracing::info!(skipped = ?outcome.skipped, "Job completed"),
        }

        self.finish(&job.id, outcome);
    }

    async fn run_steps(&self, job: &Job) -> Outcome {
        let ctx = ConditionContext::from_payload(&job.payload);
        if let ConditionOutcome::NotMet(reason) =
            self.evaluator.evaluate(job.workflow.conditions.as_ref(), &ctx)
        {
            tracing::debug!(reason, "Skipping job (conditions not met)");
            return Outcome::skipped(SkipReason::ConditionsNotMet(reason));
        }

        let steps: Vec<_> = job.workflow.steps_for(&job.event).collect();
        if steps.is_empty() {
            return Outcome::skipped(SkipReason::NoMatchingSteps);
        }

        for step in steps {
            let step_ctx = StepContext::for_step(
                job,
                step,
                self.config.working_dir.clone(),
                self.config.step_timeout,
            );

            tracing::info!(step = step.name, command = step.command, "Executing step");
            let start = Instant::now();

            let (result, failure) = match self.executor.run(step, &step_ctx).await {
                Ok(output) => {
                    let failure = (!output.success).then(|| match output.exit_code {
                        Some(code) => format!("Step '{}' exited with code {}", step.name, code),
                        None => format!("Step '{}' was terminated by a signal", step.name),
                    });
                    let result = StepResult {
                        name: step.name.clone(),
                        command: step.command.clone(),
                        success: output.success,
                        exit_code: output.exit_code,
                        stdout: output.stdout,
                        stderr: output.stderr,
                        duration_ms: output.duration.as_millis() as u64,
                        error: None,
                    };
                    (result, failure)
                }
                Err(e) => {
                    let result = StepResult {
                        name: step.name.clone(),
                        command: step.command.clone(),
                        success: false,
                        exit_code: None,
                        stdout: String::new(),
                        stderr: String::new(),
                        duration_ms: start.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                    };
                    (result, Some(format!("Step '{}' could not be executed: {}", step.name, e)))
                }
            };

            self.push_step(&job.id, result);

            if let Some(error) = failure {
                return Outcome::failed(error);
            }
        }

        Outcome::completed()
    }

    fn mark_running(&self, id: &JobId) {
        let mut tables = self.tables.lock();
        if let Some(record) = tables.records.get_mut(id) {
            if record.status.can_transition_to(ExecutionStatus::Running) {
                record.status = ExecutionStatus::Running;
                record.started_at = Some(Utc::now());
            }
        }
    }

    fn push_step(&self, id: &JobId, result: StepResult) {
        if let Some(record) = self.tables.lock().records.get_mut(id) {
            record.steps.push(result);
        }
    }

    /// Apply the terminal transition and append to history, exactly once.
    fn finish(&self, id: &JobId, outcome: Outcome) {
        {
            let mut guard = self.tables.lock();
            let Tables { records, history } = &mut *guard;

            let Some(record) = records.get_mut(id) else { return };
            if !record.status.can_transition_to(outcome.status) {
                tracing::warn!(job_id = %id, from = %record.status, to = %outcome.status, "Ignoring illegal transition");
                return;
            }

            record.status = outcome.status;
            record.finished_at = Some(Utc::now());
            record.error = outcome.error;
            record.skipped = outcome.skipped;
            history.push(record.clone());
        }

        self.finished.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::workflow::error::StepError;
    use crate::workflow::schema::Step;
    use crate::workflow::step::StepOutput;
    use crate::workflow::store::MemoryWorkflowStore;

    /// Executor that never shells out: `ok*` succeeds, `fail*` exits 1,
    /// `broken*` cannot start, `panic*` panics.
    #[derive(Default)]
    struct FakeExecutor {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StepExecutor for FakeExecutor {
        async fn run(&self, step: &Step, _ctx: &StepContext) -> Result<StepOutput, StepError> {
            self.calls.lock().push(step.command.clone());
            tokio::task::yield_now().await;

            let success = match step.command.as_str() {
                c if c.starts_with("broken") => {
                    return Err(StepError::Io(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "permission denied",
                    )));
                }
                c if c.starts_with("panic") => panic!("executor bug"),
                c => !c.starts_with("fail"),
            };

            Ok(StepOutput {
                success,
                exit_code: Some(i32::from(!success)),
                stdout: format!("ran {}", step.command),
                stderr: String::new(),
                duration: Duration::from_millis(1),
            })
        }
    }

    fn engine_with(defs: &[WorkflowDefinition]) -> (Engine, Arc<FakeExecutor>) {
        let store = Arc::new(MemoryWorkflowStore::new());
        for def in defs {
            store.save(&def.name, def).unwrap();
        }
        let executor = Arc::new(FakeExecutor::default());
        let engine = Engine::start(EngineConfig::default().workers(3), store, executor.clone());
        (engine, executor)
    }

    fn workflow(name: &str, steps: &[(&str, &str)]) -> WorkflowDefinition {
        steps.iter().enumerate().fold(
            WorkflowDefinition::new(name, "test").with_event("push").with_event("merge"),
            |def, (i, (event, cmd))| def.with_step(Step::new(format!("step-{}", i + 1), *event, *cmd)),
        )
    }

    #[tokio::test]
    async fn test_single_successful_step() {
        let (engine, _) = engine_with(&[workflow("ci", &[("push", "ok")])]);

        let id = engine.enqueue_execution("ci", "push", HashMap::new()).unwrap();
        let record = engine.wait_for(&id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.steps.len(), 1);
        assert!(record.steps[0].success);
        assert!(record.started_at.is_some() && record.finished_at.is_some());
        assert!(!record.was_skipped());
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let (engine, executor) = engine_with(&[workflow("ci", &[("push", "fail"), ("push", "ok")])]);

        let id = engine.enqueue_execution("ci", "push", HashMap::new()).unwrap();
        let record = engine.wait_for(&id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.steps.len(), 1);
        assert_eq!(record.error.as_deref(), Some("Step 'step-1' exited with code 1"));
        assert_eq!(*executor.calls.lock(), vec!["fail"]);
    }

    #[tokio::test]
    async fn test_only_matching_steps_run_in_order() {
        let (engine, executor) = engine_with(&[workflow(
            "ci",
            &[("push", "ok-build"), ("merge", "ok-release"), ("push", "ok-test")],
        )]);

        let id = engine.enqueue_execution("ci", "push", HashMap::new()).unwrap();
        let record = engine.wait_for(&id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(*executor.calls.lock(), vec!["ok-build", "ok-test"]);
    }

    #[tokio::test]
    async fn test_execution_fault_is_recorded_with_detail() {
        let (engine, _) = engine_with(&[workflow("ci", &[("push", "broken"), ("push", "ok")])]);

        let id = engine.enqueue_execution("ci", "push", HashMap::new()).unwrap();
        let record = engine.wait_for(&id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.steps.len(), 1);
        assert!(record.steps[0].error.as_deref().unwrap().contains("permission denied"));
        assert!(record.error.unwrap().contains("could not be executed"));
    }

    #[tokio::test]
    async fn test_panicking_executor_is_contained() {
        let (engine, _) = engine_with(&[
            workflow("bad", &[("push", "panic")]),
            workflow("good", &[("push", "ok")]),
        ]);

        let bad = engine.enqueue_execution("bad", "push", HashMap::new()).unwrap();
        let record = engine.wait_for(&bad).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);

        // Workers survive and keep serving jobs
        let ids = engine.enqueue_many(&["good", "good", "good", "good"], "push");
        let records = engine.wait_all(&ids).await;
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.status == ExecutionStatus::Completed));
    }

    #[tokio::test]
    async fn test_no_matching_steps_is_a_noop_success() {
        let (engine, executor) = engine_with(&[workflow("ci", &[("push", "ok")])]);

        let id = engine.enqueue_execution("ci", "merge", HashMap::new()).unwrap();
        let record = engine.wait_for(&id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.steps.is_empty());
        assert_eq!(record.skipped, Some(SkipReason::NoMatchingSteps));
        assert!(executor.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unmet_conditions_skip() {
        let def = workflow("ci", &[("push", "ok")]).with_conditions(Conditions {
            branch: Some("main".to_string()),
            file_changes: None,
        });
        let (engine, executor) = engine_with(&[def]);

        let payload = HashMap::from([("branch".to_string(), Value::from("feature/x"))]);
        let id = engine.enqueue_execution("ci", "push", payload).unwrap();
        let record = engine.wait_for(&id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.steps.is_empty());
        assert!(matches!(record.skipped, Some(SkipReason::ConditionsNotMet(_))));
        assert!(executor.calls.lock().is_empty());

        let payload = HashMap::from([("branch".to_string(), Value::from("main"))]);
        let id = engine.enqueue_execution("ci", "push", payload).unwrap();
        let record = engine.wait_for(&id).await.unwrap();
        assert_eq!(record.steps.len(), 1);
        assert!(!record.was_skipped());
    }

    #[tokio::test]
    async fn test_enqueue_errors_create_no_job() {
        let (engine, _) = engine_with(&[workflow("ci", &[("push", "ok")])]);

        let err = engine.enqueue_execution("missing", "push", HashMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = engine.enqueue_execution("ci", "pull_request", HashMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::EventNotAccepted { .. }));

        assert_eq!(engine.pending_count(), 0);
        assert!(engine.status(&JobId::generate()).is_none());
        assert!(engine.wait_for(&JobId::from("nope")).await.is_none());
    }

    #[tokio::test]
    async fn test_stored_definition_revalidated() {
        let store = Arc::new(MemoryWorkflowStore::new());
        // Bypass set_workflow to plant a definition the validator rejects
        let bad = WorkflowDefinition::new("legacy", "").with_step(Step::new("x", "deploy", "ok"));
        store.save("legacy", &bad).unwrap();

        let engine =
            Engine::start(EngineConfig::default(), store, Arc::new(FakeExecutor::default()));
        let err = engine.enqueue_execution("legacy", "push", HashMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition { .. }));
    }

    #[tokio::test]
    async fn test_set_workflow_rejects_invalid() {
        let (engine, _) = engine_with(&[]);

        let invalid = WorkflowDefinition::new("", "").with_step(Step::new("s", "push", ""));
        assert!(engine.set_workflow(&invalid).is_err());
        assert!(engine.list_workflows().unwrap().is_empty());

        let valid = workflow("ci", &[("push", "ok")]);
        engine.set_workflow(&valid).unwrap();
        assert_eq!(engine.get_workflow("ci").unwrap(), Some(valid));

        assert!(engine.remove_workflow("ci").unwrap());
        assert!(!engine.remove_workflow("ci").unwrap());
    }

    #[tokio::test]
    async fn test_set_conditional_workflow() {
        let (engine, _) = engine_with(&[]);
        let conditions =
            Conditions { branch: Some("main".to_string()), file_changes: Some(vec!["*.py".to_string()]) };

        engine.set_conditional_workflow(&workflow("cond", &[("push", "ok")]), conditions.clone()).unwrap();
        assert_eq!(engine.get_workflow("cond").unwrap().unwrap().conditions, Some(conditions));
    }

    #[tokio::test]
    async fn test_events_fall_back_to_allow_list() {
        let def = WorkflowDefinition::new("open", "").with_step(Step::new("s", "merge", "ok"));
        let (engine, _) = engine_with(&[def]);

        assert!(engine.enqueue_execution("open", "pull_request", HashMap::new()).is_ok());
        assert!(engine.enqueue_execution("open", "tag", HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_enqueue_many_skips_failures() {
        let (engine, _) = engine_with(&[
            workflow("a", &[("push", "ok")]),
            workflow("b", &[("push", "ok")]),
        ]);

        let ids = engine.enqueue_many(&["a", "missing", "b"], "push");
        assert_eq!(ids.len(), 2);

        let records = engine.wait_all(&ids).await;
        assert_eq!(records.iter().map(|r| r.workflow.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_history_is_terminal_only_and_ordered() {
        let (engine, _) = engine_with(&[workflow("ci", &[("push", "ok")])]);

        let ids: Vec<_> = (0..10)
            .map(|_| engine.enqueue_execution("ci", "push", HashMap::new()).unwrap())
            .collect();
        engine.wait_all(&ids).await;

        let history = engine.history();
        assert_eq!(history.len(), 10);
        assert!(history.iter().all(|r| r.status.is_terminal() && r.finished_at.is_some()));
        assert!(history.windows(2).all(|w| w[0].finished_at <= w[1].finished_at));
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_and_rejects_new_jobs() {
        let (engine, _) = engine_with(&[workflow("ci", &[("push", "ok")])]);

        let ids: Vec<_> = (0..20)
            .map(|_| engine.enqueue_execution("ci", "push", HashMap::new()).unwrap())
            .collect();
        engine.shutdown().await;

        for id in &ids {
            assert_eq!(engine.status(id).unwrap().status, ExecutionStatus::Completed);
        }

        let err = engine.enqueue_execution("ci", "push", HashMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::ShutDown(_)));
        assert_eq!(engine.history().len(), 20);
    }
}
