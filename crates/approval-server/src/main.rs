//! Approval gate executable
//!
//! `run` executes the approval task of a workflow definition against a JSON
//! record store and blocks until the record is approved, rejected, deleted or
//! the gate is stopped. `approve`, `reject` and `stop` write the signal files
//! a running gate reacts to.

mod signals;
mod task_runner;

use anyhow::Context;
use approval_core::{
    paths, ApprovalGate, EngineConfig, JsonFileStore, Notifier, SmtpMailer, WorkflowDefinition,
    WorkflowRun,
};
use approval_types::{RunId, TaskId, TaskStatus, WorkflowId};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use task_runner::ShellTaskRunner;
use tokio_util::sync::CancellationToken;

/// Exit code of a gate interrupted by Ctrl-C
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run_gate(sub).await,
        Some(("approve", sub)) => {
            init_approval_root(sub, None);
            let target = SignalTarget::from_matches(sub)?;
            let task_id = parse_task_id(sub)?;
            let path = paths::trigger_path(&paths::approval_root(), target.workflow_id, target.run_id, task_id);
            paths::write_signal(&path, &target.by)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Approved task {} as {}: {}", task_id, target.by, path.display());
            Ok(ExitCode::SUCCESS)
        }
        Some(("reject", sub)) => {
            init_approval_root(sub, None);
            let target = SignalTarget::from_matches(sub)?;
            let path = paths::rejected_path(&paths::approval_root(), target.workflow_id, target.run_id);
            paths::write_signal(&path, &target.by)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Rejected run {} as {}: {}", target.run_id, target.by, path.display());
            Ok(ExitCode::SUCCESS)
        }
        Some(("stop", sub)) => {
            init_approval_root(sub, None);
            let target = SignalTarget::from_matches(sub)?;
            let task_id = parse_task_id(sub)?;
            let path = paths::stopped_path(&paths::approval_root(), target.workflow_id, target.run_id, task_id);
            paths::write_signal(&path, &target.by)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Requested stop of task {} as {}: {}", task_id, target.by, path.display());
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            log::error!("No action specified. Use --help for options.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cli() -> Command {
    let signal_args = [
        Arg::new("workflow-id")
            .long("workflow-id")
            .value_name("ID")
            .help("Workflow id of the running gate")
            .required(true),
        Arg::new("run-id")
            .long("run-id")
            .value_name("UUID")
            .help("Run id printed by the running gate")
            .required(true),
        Arg::new("by")
            .long("by")
            .value_name("USERNAME")
            .help("User performing the action")
            .default_value(""),
    ];

    let task_arg = Arg::new("task-id")
        .long("task-id")
        .value_name("ID")
        .help("Task id of the approval gate")
        .required(true);

    Command::new("approval-gate")
        .version("1.0.0")
        .about("Record approval gate for workflow runs")
        .subcommand_required(true)
        .arg(
            Arg::new("approval-root")
                .long("approval-root")
                .value_name("DIR")
                .help("Root directory for approval signal files")
                .global(true)
        )
        .subcommand(
            Command::new("run")
                .about("Run the approval gate of a workflow")
                .arg(
                    Arg::new("workflow")
                        .long("workflow")
                        .short('w')
                        .value_name("FILE")
                        .help("Workflow definition file")
                        .required(true)
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .value_name("FILE")
                        .help("Engine configuration file")
                )
                .arg(
                    Arg::new("store")
                        .long("store")
                        .value_name("FILE")
                        .help("JSON record store")
                        .default_value("/var/lib/approval-gate/records.json")
                )
                .arg(
                    Arg::new("run-id")
                        .long("run-id")
                        .value_name("UUID")
                        .help("Run id to use instead of a fresh one")
                )
        )
        .subcommand(
            Command::new("approve")
                .about("Approve a waiting gate")
                .args(signal_args.clone())
                .arg(task_arg.clone())
        )
        .subcommand(
            Command::new("reject")
                .about("Reject a workflow run")
                .args(signal_args.clone())
        )
        .subcommand(
            Command::new("stop")
                .about("Stop a waiting gate")
                .args(signal_args)
                .arg(task_arg)
        )
}

/// Initialize the approval root from the CLI, then the engine config
fn init_approval_root(matches: &ArgMatches, configured: Option<&PathBuf>) {
    let root = matches.get_one::<String>("approval-root")
        .cloned()
        .or_else(|| configured.map(|p| p.display().to_string()));

    if let Some(root) = root {
        if let Err(e) = paths::init_approval_root(root) {
            log::warn!("Approval root initialization warning: {}", e);
        }
    }
    log::info!("Using approval root: {}", paths::approval_root().display());
}

/// Run addressed by a signal sub-command
struct SignalTarget {
    workflow_id: WorkflowId,
    run_id: RunId,
    by: String,
}

impl SignalTarget {
    fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let workflow_id = required(matches, "workflow-id")?
            .parse::<u32>()
            .context("Invalid workflow id")?;
        let run_id = required(matches, "run-id")?.parse::<RunId>()?;
        let by = matches.get_one::<String>("by").cloned().unwrap_or_default();

        Ok(Self {
            workflow_id: WorkflowId::new(workflow_id),
            run_id,
            by,
        })
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> anyhow::Result<&'a String> {
    matches.get_one::<String>(name)
        .with_context(|| format!("--{} is required", name))
}

fn parse_task_id(matches: &ArgMatches) -> anyhow::Result<TaskId> {
    Ok(required(matches, "task-id")?.parse::<TaskId>()?)
}

async fn run_gate(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = match matches.get_one::<String>("config") {
        Some(path) => {
            let config = EngineConfig::from_file(path)?;
            log::info!("Loaded configuration from {}", path);
            config
        }
        None => EngineConfig::default(),
    };
    init_approval_root(matches, config.approval_root.as_ref());

    let workflow_path = required(matches, "workflow")?;
    let workflow = WorkflowDefinition::from_file(workflow_path)?;
    log::info!("Loaded workflow {} ({}) from {}", workflow.id, workflow.name, workflow_path);

    let store_path = required(matches, "store")?;
    let store = Arc::new(JsonFileStore::open(store_path)?);
    log::info!("Using record store {}", store.path().display());

    let mut notifier = Notifier::new(store.clone());
    if config.email.enabled {
        notifier = notifier.with_mailer(Arc::new(SmtpMailer::new(&config.email.smtp)?));
    }

    let run_id = match matches.get_one::<String>("run-id") {
        Some(id) => id.parse::<RunId>()?,
        None => RunId::new(),
    };
    let run = Arc::new(
        WorkflowRun::with_run_id(workflow.id, run_id, workflow.started_by.clone())
            .approval(workflow.approval),
    );
    log::info!("Workflow {} run {} started by {}", workflow.id, run.run_id(), workflow.started_by);

    let gate = ApprovalGate::new(
        workflow.gate.task_id,
        workflow.gate.settings.clone(),
        store,
        Arc::new(notifier),
        Arc::new(ShellTaskRunner::new(workflow.tasks.clone())),
        run.clone(),
    )
    .poll_interval(config.polling.interval())
    .max_wait(config.polling.max_wait());
    log::info!("Approve with: approval-gate approve --workflow-id {} --run-id {} --task-id {}",
        workflow.id, run.run_id(), gate.task_id());

    let cancel = CancellationToken::new();
    let watcher = signals::spawn_watcher(run.clone(), cancel.clone())?;

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received, stopping approval gate");
                cancel.cancel();
            }
        })
    };

    let result = gate.run(&cancel).await;

    cancel.cancel();
    ctrl_c.abort();
    if let Err(e) = watcher.await {
        log::error!("Signal watcher task panicked: {}", e);
    }

    Ok(match result {
        Ok(TaskStatus::Success) => ExitCode::SUCCESS,
        Ok(TaskStatus::Error) => ExitCode::FAILURE,
        Err(e) => {
            log::warn!("{}", e);
            ExitCode::from(EXIT_CANCELLED)
        }
    })
}
