//! Repoflow - event-driven workflow engine for repository automation.
//!
//! Stores workflow definitions and runs them for repository events on a
//! bounded worker pool.

#![allow(clippy::single_match_else)]

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repoflow::workflow::{
    Conditions, ExecutionRecord, ExecutionStatus, FileWorkflowStore, JobId, TemplateLibrary,
    WorkflowDefinition, WorkflowStore, WorkflowValidator, BRANCH_KEY, CHANGED_FILES_KEY,
};
use repoflow::{Config, Engine, RunLog, ShellStepExecutor};

/// Event-driven workflow engine for repository automation
#[derive(Parser)]
#[command(name = "repoflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow document without storing it
    Validate {
        /// Path to a YAML or JSON workflow document
        file: String,
    },

    /// Validate and store a workflow
    Set {
        /// Path to a YAML or JSON workflow document
        file: String,

        /// Conditions document overriding the workflow's own
        #[arg(short, long)]
        conditions: Option<String>,
    },

    /// Remove a stored workflow
    Remove {
        /// Workflow name
        name: String,
    },

    /// List stored workflows
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show a stored workflow
    Show {
        /// Workflow name
        name: String,
    },

    /// Run a workflow for an event and wait for it to finish
    Run {
        /// Workflow name
        name: String,

        /// Triggering event (push, pull_request, merge, ...)
        #[arg(short, long)]
        event: String,

        /// Payload entries (key=value)
        #[arg(short, long)]
        payload: Vec<String>,

        /// Branch the event happened on
        #[arg(short, long)]
        branch: Option<String>,

        /// Changed file paths
        #[arg(long = "changed-file")]
        changed_files: Vec<String>,

        /// Fill branch and changed files from the current Git repository
        #[arg(long)]
        git: bool,
    },

    /// Run several workflows concurrently for one event
    RunMany {
        /// Comma-separated workflow names
        #[arg(value_delimiter = ',', required = true)]
        names: Vec<String>,

        /// Triggering event
        #[arg(short, long)]
        event: String,

        /// Fill branch and changed files from the current Git repository
        #[arg(long)]
        git: bool,
    },

    /// Show a past run by job ID
    Status {
        /// Job ID
        job_id: String,
    },

    /// Show recent runs
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Manage workflow templates
    Template {
        /// Template operation
        #[command(subcommand)]
        operation: TemplateOperation,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum TemplateOperation {
    /// Store a workflow document as a template
    Create {
        /// Path to a YAML or JSON workflow document
        file: String,
    },

    /// List templates
    List,

    /// Create a workflow from a template
    Apply {
        /// Template name
        template: String,

        /// Name of the new workflow
        name: String,

        /// Description of the new workflow
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Remove a template
    Remove {
        /// Template name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    // Setup logging
    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("warn") };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Validate { file } => cmd_validate(&file)?,
        Commands::Set { file, conditions } => cmd_set(&file, conditions.as_deref()).await?,
        Commands::Remove { name } => cmd_remove(&name).await?,
        Commands::List { format } => cmd_list(&format).await?,
        Commands::Show { name } => cmd_show(&name).await?,
        Commands::Run { name, event, payload, branch, changed_files, git } => {
            let payload = build_payload(&payload, branch, changed_files, git)?;
            cmd_run(&[name], &event, payload, cli.verbose).await?;
        }
        Commands::RunMany { names, event, git } => {
            let payload = build_payload(&[], None, Vec::new(), git)?;
            cmd_run(&names, &event, payload, cli.verbose).await?;
        }
        Commands::Status { job_id } => cmd_status(&job_id)?,
        Commands::History { limit, format } => cmd_history(limit, &format)?,
        Commands::Template { operation } => cmd_template(operation).await?,
        Commands::Config { path } => cmd_config(path)?,
        Commands::Completions { shell } => cmd_completions(shell),
    }

    Ok(())
}

/// Start an engine over the configured workflow directory.
fn open_engine(config: &Config) -> Engine {
    let store = Arc::new(FileWorkflowStore::new(config.workflows_dir()));
    Engine::start(config.engine_config(), store, Arc::new(ShellStepExecutor::new()))
}

fn read_document(file: &str) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {file}"))
}

/// Validate a workflow document.
fn cmd_validate(file: &str) -> Result<()> {
    let config = Config::load()?;
    let validator = WorkflowValidator::new(config.workflows.allowed_events.clone());

    let doc: Value = serde_yaml::from_str(&read_document(file)?)
        .with_context(|| format!("{file} is not valid YAML"))?;
    let report = validator.validate_document(&doc);

    if report.is_ok() {
        println!("{file}: valid");
        return Ok(());
    }

    println!("{file}: {} problem(s)", report.errors.len());
    for error in &report.errors {
        println!("  - {error}");
    }
    std::process::exit(1);
}

/// Store a workflow, optionally with overriding conditions.
async fn cmd_set(file: &str, conditions: Option<&str>) -> Result<()> {
    let config = Config::load()?;
    let engine = open_engine(&config);

    let def = engine.validator().parse_definition(&read_document(file)?)?;

    match conditions {
        Some(path) => {
            let conditions: Conditions = serde_yaml::from_str(&read_document(path)?)
                .with_context(|| format!("Invalid conditions document {path}"))?;
            engine.set_conditional_workflow(&def, conditions)?;
        }
        None => engine.set_workflow(&def)?,
    }

    println!("Stored workflow '{}' ({} steps)", def.name, def.step_count());
    engine.shutdown().await;
    Ok(())
}

/// Remove a stored workflow.
async fn cmd_remove(name: &str) -> Result<()> {
    let config = Config::load()?;
    let engine = open_engine(&config);

    let removed = engine.remove_workflow(name)?;
    engine.shutdown().await;

    if !removed {
        anyhow::bail!("Workflow '{name}' not found");
    }
    println!("Removed workflow '{name}'");
    Ok(())
}

/// List stored workflows.
async fn cmd_list(format: &str) -> Result<()> {
    let config = Config::load()?;
    let engine = open_engine(&config);
    let workflows = engine.list_workflows()?;
    engine.shutdown().await;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&workflows)?;
            println!("{json}");
        }
        _ => {
            for def in &workflows {
                print_summary(def);
            }
            println!("\nTotal: {} workflows", workflows.len());
        }
    }

    Ok(())
}

fn print_summary(def: &WorkflowDefinition) {
    let events = if def.declares_events() { def.events.join(",") } else { "*".to_string() };
    println!("{} [{}] {} steps - {}", def.name, events, def.step_count(), def.description);
}

/// Print a stored workflow as YAML.
async fn cmd_show(name: &str) -> Result<()> {
    let config = Config::load()?;
    let engine = open_engine(&config);
    let def = engine.get_workflow(name)?;
    engine.shutdown().await;

    let def = def.ok_or_else(|| anyhow::anyhow!("Workflow '{name}' not found"))?;
    print!("{}", serde_yaml::to_string(&def)?);
    Ok(())
}

/// Assemble a job payload from command-line flags.
fn build_payload(
    entries: &[String],
    branch: Option<String>,
    changed_files: Vec<String>,
    git: bool,
) -> Result<HashMap<String, Value>> {
    let mut payload = if git { git_payload()? } else { HashMap::new() };

    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Payload entry '{entry}' must be key=value"))?;
        // Accept JSON literals, fall back to a plain string
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
        payload.insert(key.to_string(), value);
    }

    if let Some(branch) = branch {
        payload.insert(BRANCH_KEY.to_string(), Value::String(branch));
    }
    if !changed_files.is_empty() {
        let files = changed_files.into_iter().map(Value::String).collect();
        payload.insert(CHANGED_FILES_KEY.to_string(), Value::Array(files));
    }

    Ok(payload)
}

#[cfg(feature = "git")]
fn git_payload() -> Result<HashMap<String, Value>> {
    let repo = repoflow::git::discover_repo()
        .ok_or_else(|| anyhow::anyhow!("Not inside a Git repository"))?;
    repo.event_payload()
}

#[cfg(not(feature = "git"))]
fn git_payload() -> Result<HashMap<String, Value>> {
    anyhow::bail!("repoflow was built without Git support")
}

/// Queue workflows for an event, wait for them and record the results.
async fn cmd_run(
    names: &[String],
    event: &str,
    payload: HashMap<String, Value>,
    verbose: bool,
) -> Result<()> {
    let config = Config::load()?;
    let engine = open_engine(&config);

    let ids: Vec<JobId> = if let [name] = names {
        vec![engine.enqueue_execution(name, event, payload)?]
    } else {
        engine.enqueue_many_with(names, event, &payload)
    };

    if ids.is_empty() {
        engine.shutdown().await;
        anyhow::bail!("No workflow could be queued for event '{event}'");
    }

    let records = engine.wait_all(&ids).await;
    engine.shutdown().await;

    for record in &records {
        print_record(record, verbose);
    }

    let mut log = RunLog::open(config.history_path(), config.history.max_entries);
    if let Err(e) = log.commit(records.iter().cloned()) {
        tracing::warn!(path = ?log.path(), error = %e, "Failed to save run log");
    }

    let queued_all = ids.len() == names.len();
    let failed = records.iter().any(|r| r.status == ExecutionStatus::Failed);
    if failed || !queued_all {
        std::process::exit(1);
    }
    Ok(())
}

fn print_record(record: &ExecutionRecord, verbose: bool) {
    println!("{} {} [{}] {}", record.job_id, record.workflow, record.event, record.summary());

    for step in &record.steps {
        let mark = if step.success { "ok" } else { "FAILED" };
        println!("  {} {} ({} ms)", mark, step.name, step.duration_ms);

        if verbose || !step.success {
            for line in step.stdout.lines().chain(step.stderr.lines()) {
                println!("    | {line}");
            }
            if let Some(ref error) = step.error {
                println!("    | {error}");
            }
        }
    }
}

/// Show one past run.
fn cmd_status(job_id: &str) -> Result<()> {
    let config = Config::load()?;
    let log = RunLog::open(config.history_path(), config.history.max_entries);

    let record = log
        .find(&JobId::from(job_id))
        .ok_or_else(|| anyhow::anyhow!("No run with job ID '{job_id}'"))?;
    print_record(record, true);
    Ok(())
}

/// Show recent runs.
fn cmd_history(limit: usize, format: &str) -> Result<()> {
    let config = Config::load()?;
    let log = RunLog::open(config.history_path(), config.history.max_entries);
    let records = log.recent(limit);

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(records)?;
            println!("{json}");
        }
        _ => {
            if records.is_empty() {
                println!("No runs recorded");
            }
            for record in records {
                let when = record.finished_at.unwrap_or(record.enqueued_at);
                println!(
                    "{} {} {} [{}] {}",
                    when.format("%Y-%m-%d %H:%M:%S"),
                    record.job_id,
                    record.workflow,
                    record.event,
                    record.summary()
                );
            }
        }
    }

    Ok(())
}

/// Handle template commands.
async fn cmd_template(operation: TemplateOperation) -> Result<()> {
    let config = Config::load()?;
    let validator = WorkflowValidator::new(config.workflows.allowed_events.clone());
    let store: Arc<dyn WorkflowStore> = Arc::new(FileWorkflowStore::new(config.templates_dir()));
    let library = TemplateLibrary::new(store, validator.clone());

    match operation {
        TemplateOperation::Create { file } => {
            let def = validator.parse_definition(&read_document(&file)?)?;
            library.create_template(&def)?;
            println!("Stored template '{}'", def.name);
        }
        TemplateOperation::List => {
            let templates = library.list_templates()?;
            for def in &templates {
                print_summary(def);
            }
            println!("\nTotal: {} templates", templates.len());
        }
        TemplateOperation::Apply { template, name, description } => {
            let def = library
                .instantiate(&template, &name, description.as_deref())?
                .ok_or_else(|| anyhow::anyhow!("Template '{template}' not found"))?;

            let engine = open_engine(&config);
            let stored = engine.set_workflow(&def);
            engine.shutdown().await;
            stored?;

            println!("Created workflow '{name}' from template '{template}'");
        }
        TemplateOperation::Remove { name } => {
            if !library.remove_template(&name)? {
                anyhow::bail!("Template '{name}' not found");
            }
            println!("Removed template '{name}'");
        }
    }

    Ok(())
}

/// Show configuration.
fn cmd_config(show_path: bool) -> Result<()> {
    if show_path {
        match std::env::var(repoflow::core::CONFIG_ENV) {
            Ok(path) => println!("{}", Path::new(&path).display()),
            Err(_) => {
                if let Some(path) = Config::config_dir() {
                    println!("{}", path.join("config.toml").display());
                }
            }
        }
        return Ok(());
    }

    let config = Config::load()?;
    let toml = toml::to_string_pretty(&config)?;
    println!("{toml}");

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "repoflow", &mut io::stdout());
}
