//! `easel` — drive an autonomous coding CLI against canvas copies of a git
//! working tree and merge the results back.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};

use easel_core::config::{load_config, EaselConfig};
use easel_core::ledger::CommitRef;
use easel_core::project::GitProject;
use easel_core::types::{CanvasId, ElementId, ProcessId, ProcessKind, ProcessState, WorkspaceSession};
use easel_driver::{DriverEvent, DriverInstance, ProcessRegistry, SessionDriver};
use easel_git::{add_all, commit, CommitOutcome, GitCli};
use easel_term::PtyTransport;
use easeld::{reconcile, JsonlEventLog, Orchestrator, SqliteStore, TuiResolver};

#[derive(Parser)]
#[command(name = "easel", about = "Canvas-isolated coding-agent orchestrator")]
struct Cli {
    /// Path to the config file.
    #[arg(long, default_value = "easel.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Create a project rooted at the given directory (default: cwd) with
    /// its first canvas.
    Init {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Show canvases, their locks, tasks, and agents.
    Status,
    /// Create a new canvas as a copy of the project root.
    CanvasNew { name: String },
    /// Queue a prompting task on the current canvas.
    TaskAdd { prompt: String },
    /// Run the current prompting task through the automation driver and
    /// commit the result.
    Run,
    /// Revert a completed task (and everything after it).
    TaskRevert { task: String },
    /// Restore every task up to and including the given one.
    TaskRestore { task: String },
    /// Merge a canvas back into the project root.
    Merge { canvas: String },
    /// Downgrade stale "running" process claims after a restart.
    Recover,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        EaselConfig::default()
    };

    match cli.command {
        CliCommand::Init { root } => init(&config, root),
        CliCommand::Status => status(&config),
        CliCommand::CanvasNew { name } => canvas_new(&config, &name),
        CliCommand::TaskAdd { prompt } => task_add(&config, &prompt),
        CliCommand::Run => run_task(&config),
        CliCommand::TaskRevert { task } => task_revert(&config, &task),
        CliCommand::TaskRestore { task } => task_restore(&config, &task),
        CliCommand::Merge { canvas } => merge(&config, &canvas),
        CliCommand::Recover => recover(&config),
    }
}

fn open_store(config: &EaselConfig) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = config.storage.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.storage.db_path)?;
    store.migrate()?;
    Ok(store)
}

fn load_project(store: &SqliteStore) -> anyhow::Result<GitProject> {
    store
        .load_project()?
        .ok_or_else(|| anyhow!("no project found; run `easel init` first"))
}

fn orchestrator(config: &EaselConfig) -> Orchestrator {
    Orchestrator::new(
        GitCli::default(),
        config.clone(),
        JsonlEventLog::new(&config.storage.event_log_dir),
    )
}

fn find_canvas(project: &GitProject, needle: &str) -> anyhow::Result<CanvasId> {
    project
        .canvases()
        .iter()
        .find(|c| c.id.0 == needle || c.name == needle)
        .map(|c| c.id.clone())
        .ok_or_else(|| anyhow!("no canvas named or identified by '{needle}'"))
}

fn init(config: &EaselConfig, root: Option<PathBuf>) -> anyhow::Result<()> {
    let root = match root {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let store = open_store(config)?;
    if store.load_project()?.is_some() {
        bail!("a project already exists at {}", config.storage.db_path.display());
    }

    let mut project = GitProject::new(WorkspaceSession::local(&root));

    // The first canvas is the only implicitly created one.
    let canvas_path = config.storage.canvas_dir.join("main");
    easeld::workspace::copy_directory(&root, &canvas_path)?;
    let canvas_id = project
        .ensure_default_canvas(WorkspaceSession::local(&canvas_path))
        .expect("fresh project has no canvas");

    store.save_project(&project)?;
    println!("initialized project at {} with canvas {canvas_id}", root.display());
    Ok(())
}

fn status(config: &EaselConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let project = load_project(&store)?;

    println!("root: {}", project.root_session.path().display());
    for (index, canvas) in project.canvases().iter().enumerate() {
        let marker = if index == project.current_canvas_index() {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {} [{}] lock={} tasks={}",
            canvas.id, canvas.name, canvas.lock, canvas.ledger.len()
        );
        for task in canvas.ledger.tasks() {
            println!("    {} [{}] {}", task.id, task.phase.tag(), task.prompt);
        }
    }
    for agent in project.agents() {
        println!(
            "agent {} [{}] status={} attempts={}/{}",
            agent.id,
            agent.kind,
            agent.status.tag(),
            agent.context.attempts,
            agent.context.max_attempts
        );
    }
    Ok(())
}

fn canvas_new(config: &EaselConfig, name: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let project = Mutex::new(load_project(&store)?);

    let orchestrator = orchestrator(config);
    let canvas_path = config.storage.canvas_dir.join(name);
    let canvas_id = orchestrator.create_canvas(&project, name, &canvas_path)?;

    store.save_project(&project.lock().unwrap())?;
    println!("created canvas {canvas_id} at {}", canvas_path.display());
    Ok(())
}

fn task_add(config: &EaselConfig, prompt: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let mut project = load_project(&store)?;

    let canvas_id = project
        .current_canvas()
        .map(|c| c.id.clone())
        .ok_or_else(|| anyhow!("project has no canvas"))?;
    let task_id = project
        .create_task(&canvas_id, prompt)
        .ok_or_else(|| anyhow!("canvas {canvas_id} is locked; cannot add tasks"))?;

    store.save_project(&project)?;
    println!("queued {task_id} on {canvas_id}");
    Ok(())
}

fn run_task(config: &EaselConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let mut project = load_project(&store)?;

    let canvas_id = project
        .current_canvas()
        .map(|c| c.id.clone())
        .ok_or_else(|| anyhow!("project has no canvas"))?;
    let canvas = project.canvas(&canvas_id).expect("current canvas");
    let session = canvas.session.clone();
    let task = canvas
        .ledger
        .current_prompting_task()
        .ok_or_else(|| anyhow!("no prompting task on {canvas_id}; queue one with task-add"))?;
    let task_id = task.id.clone();
    let prompt = task.prompt.clone();

    let registry = Arc::new(ProcessRegistry::new());
    let transport = PtyTransport::with_shell(config.driver.shell_bin.clone());
    let (driver, events) = SessionDriver::new(transport, config.driver.clone());

    let process_id = ProcessId::new(format!("run-{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()));
    registry.register(process_id.clone(), driver.clone() as Arc<dyn DriverInstance>);

    project.start_task(&canvas_id, &task_id, Some(process_id.clone()));
    let mut process_state = ProcessState::new(
        process_id.clone(),
        ProcessKind::Task,
        ElementId::new("cli"),
    )
    .with_prompt(prompt.clone());

    let registry_for_ready = Arc::clone(&registry);
    driver.start_task(&session, &prompt, |terminal_id| {
        registry_for_ready.associate_terminal(&ElementId::new("cli"), terminal_id.clone());
        process_state.terminal_id = Some(terminal_id.clone());
    })?;
    project.add_process_state(&canvas_id, process_state);
    store.save_project(&project)?;

    println!("running task {task_id} on {canvas_id}...");
    let deadline =
        std::time::Instant::now() + Duration::from_secs(config.merge.attempt_timeout_secs);
    let outcome = loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            break Err(anyhow!("task timed out"));
        }
        match events.recv_timeout(remaining) {
            Ok(DriverEvent::TaskCompleted) => break Ok(()),
            Ok(DriverEvent::TaskError { message }) => break Err(anyhow!(message)),
            Ok(_) => continue,
            Err(_) => break Err(anyhow!("task timed out")),
        }
    };

    driver.cleanup(true);
    registry.unregister(&process_id);

    let git = GitCli::default();
    let commit_ref = match outcome {
        Ok(()) => {
            add_all(&git, &session)?;
            match commit(&git, &session, &prompt)? {
                CommitOutcome::Committed { hash } => CommitRef::Hash(hash),
                CommitOutcome::NothingToCommit => CommitRef::NoChanges,
            }
        }
        Err(err) => {
            project.update_process_state(&canvas_id, &process_id, |p| p.mark_error());
            store.save_project(&project)?;
            return Err(err);
        }
    };

    project.update_process_state(&canvas_id, &process_id, |p| p.mark_completed());
    project.complete_task(&canvas_id, &task_id, commit_ref.clone(), Vec::new());
    store.save_project(&project)?;
    println!("task {task_id} completed ({commit_ref})");
    Ok(())
}

fn current_canvas_and_task(
    project: &GitProject,
    needle: &str,
) -> anyhow::Result<(CanvasId, easel_core::types::TaskId)> {
    let canvas = project
        .current_canvas()
        .ok_or_else(|| anyhow!("project has no canvas"))?;
    let task = canvas
        .ledger
        .tasks()
        .iter()
        .find(|t| t.id.0 == needle)
        .ok_or_else(|| anyhow!("no task '{needle}' on canvas {}", canvas.id))?;
    Ok((canvas.id.clone(), task.id.clone()))
}

fn task_revert(config: &EaselConfig, task: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let mut project = load_project(&store)?;
    let (canvas_id, task_id) = current_canvas_and_task(&project, task)?;

    let canvas = project.canvas(&canvas_id).expect("current canvas");
    let session = canvas.session.clone();
    let target = canvas
        .ledger
        .revert_target_commit(&task_id)
        .ok_or_else(|| anyhow!("task {task_id} is not completed; nothing to revert"))?;

    if !project.revert_task(&canvas_id, &task_id) {
        bail!("could not revert task {task_id}");
    }

    let git = GitCli::default();
    match &target {
        easel_core::ledger::RevertTarget::Commit(hash) => {
            easel_git::revert_to_commit(&git, &session, hash)?;
            println!("reverted {task_id} and later tasks; working tree reset to {hash}");
        }
        easel_core::ledger::RevertTarget::BeforeOldest => {
            println!(
                "reverted {task_id} and later tasks; no tracked commit precedes it, \
                 working tree left as is"
            );
        }
    }

    store.save_project(&project)?;
    Ok(())
}

fn task_restore(config: &EaselConfig, task: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let mut project = load_project(&store)?;
    let (canvas_id, task_id) = current_canvas_and_task(&project, task)?;

    let canvas = project.canvas(&canvas_id).expect("current canvas");
    let session = canvas.session.clone();
    let commit = canvas.ledger.task(&task_id).and_then(|t| match &t.phase {
        easel_core::ledger::TaskPhase::Completed { commit, .. } => Some(commit.clone()),
        _ => None,
    });

    if !project.restore_task(&canvas_id, &task_id) {
        bail!("task {task_id} is not completed; nothing to restore");
    }

    let git = GitCli::default();
    match commit {
        Some(CommitRef::Hash(hash)) => {
            easel_git::revert_to_commit(&git, &session, &hash)?;
            println!("restored tasks through {task_id}; working tree reset to {hash}");
        }
        _ => println!("restored tasks through {task_id}"),
    }

    store.save_project(&project)?;
    Ok(())
}

fn merge(config: &EaselConfig, canvas: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let project = Mutex::new(load_project(&store)?);
    let canvas_id = find_canvas(&project.lock().unwrap(), canvas)?;

    let orchestrator = orchestrator(config);
    let registry = Arc::new(ProcessRegistry::new());
    let mut resolver = TuiResolver::new(
        PtyTransport::with_shell(config.driver.shell_bin.clone()),
        config.driver.clone(),
        Arc::clone(&registry),
    );

    let result = orchestrator.merge_canvas_to_root(&project, &canvas_id, &mut resolver);
    store.save_project(&project.lock().unwrap())?;

    if result.success {
        println!("canvas {canvas_id} merged");
        Ok(())
    } else {
        bail!(
            "merge failed: {}",
            result.message.unwrap_or_else(|| "unknown".to_string())
        )
    }
}

fn recover(config: &EaselConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let mut project = load_project(&store)?;

    // A fresh process has no live drivers; every "running" claim is stale.
    let registry = ProcessRegistry::new();
    let recovered = reconcile(&mut project, &registry);

    let event_log = JsonlEventLog::new(&config.storage.event_log_dir);
    for entry in &recovered {
        let event = easel_core::events::CanvasEvent::now(
            easel_core::types::EventId::new(format!(
                "E{}-recover",
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
            )),
            Some(entry.canvas_id.clone()),
            easel_core::events::EventKind::ProcessRecovered {
                process_id: entry.process_id.clone(),
                task_id: entry.task_id.clone(),
            },
        );
        if let Err(err) = event_log.append_both(&event) {
            eprintln!("[recover] failed to append event: {err}");
        }
        match &entry.task_id {
            Some(task_id) => println!(
                "recovered process {} on {}: task {task_id} force-completed with no commit",
                entry.process_id, entry.canvas_id
            ),
            None => println!(
                "recovered process {} on {}",
                entry.process_id, entry.canvas_id
            ),
        }
    }
    if recovered.is_empty() {
        println!("nothing to recover");
    }

    store.save_project(&project)?;
    Ok(())
}
