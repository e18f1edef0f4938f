//! Canvas lock orchestration: validates preconditions, runs merge agents,
//! and guarantees a canvas is never left locked by a dead agent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use easel_core::agent::{AgentStatus, BackgroundAgent, MergeContext};
use easel_core::canvas::{Canvas, LockState};
use easel_core::config::EaselConfig;
use easel_core::events::{CanvasEvent, EventKind};
use easel_core::project::GitProject;
use easel_core::types::{AgentId, CanvasId, EventId, WorkspaceSession};
use easel_git::{create_branch, GitCli};

use crate::event_log::JsonlEventLog;
use crate::merge_agent::{MergeAgentRunner, ResolverDriver};
use crate::workspace::{copy_directory, path_exists, WorkspaceError};

/// Result of asking for a canvas merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStartResult {
    pub success: bool,
    pub agent_id: Option<AgentId>,
    pub message: Option<String>,
}

impl MergeStartResult {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            agent_id: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("canvas not found: {0}")]
    CanvasNotFound(CanvasId),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Git(#[from] easel_git::GitError),
}

pub struct Orchestrator {
    pub git: GitCli,
    pub config: EaselConfig,
    pub event_log: JsonlEventLog,
    event_seq: AtomicU64,
}

impl Orchestrator {
    pub fn new(git: GitCli, config: EaselConfig, event_log: JsonlEventLog) -> Self {
        Self {
            git,
            config,
            event_log,
            event_seq: AtomicU64::new(0),
        }
    }

    fn log_event(&self, canvas_id: Option<CanvasId>, agent_id: Option<AgentId>, kind: EventKind) {
        let seq = self.event_seq.fetch_add(1, Ordering::SeqCst);
        let mut event = CanvasEvent::now(
            EventId::new(format!("E{}-{}", Utc::now().timestamp_millis(), seq)),
            canvas_id,
            kind,
        );
        if let Some(agent_id) = agent_id {
            event = event.with_agent(agent_id);
        }
        if let Err(err) = self.event_log.append_both(&event) {
            eprintln!("[orchestrator] failed to append event: {err}");
        }
    }

    /// Create a new canvas as an explicit copy of the project root, on its
    /// own branch.
    pub fn create_canvas(
        &self,
        project: &Mutex<GitProject>,
        name: &str,
        canvas_path: &std::path::Path,
    ) -> Result<CanvasId, OrchestratorError> {
        let root_session = project.lock().unwrap().root_session.clone();
        copy_directory(root_session.path(), canvas_path)?;

        let session = WorkspaceSession::local(canvas_path);
        create_branch(&self.git, &session, &format!("canvas/{name}"))?;

        let canvas_id = CanvasId::new(format!(
            "canvas-{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let canvas = Canvas::new(canvas_id.clone(), name, session);
        project.lock().unwrap().add_canvas(canvas);

        self.log_event(Some(canvas_id.clone()), None, EventKind::CanvasCreated);
        Ok(canvas_id)
    }

    /// Merge a canvas's work back into the project root, resolving
    /// conflicts through the automation driver.
    ///
    /// Failure before the lock is taken leaves the canvas untouched; every
    /// failure after it releases the lock back to normal.
    pub fn merge_canvas_to_root(
        &self,
        project: &Mutex<GitProject>,
        canvas_id: &CanvasId,
        resolver: &mut dyn ResolverDriver,
    ) -> MergeStartResult {
        let (root_session, canvas_session, history) = {
            let project = project.lock().unwrap();
            let Some(canvas) = project.canvas(canvas_id) else {
                return MergeStartResult::failure(format!("canvas not found: {canvas_id}"));
            };
            let history = canvas
                .ledger
                .tasks()
                .iter()
                .map(|task| task.prompt.clone())
                .collect::<Vec<_>>();
            (
                project.root_session.clone(),
                canvas.session.clone(),
                history,
            )
        };

        // A canvas whose working copy vanished gets no agent and no lock
        // transition at all.
        if !path_exists(canvas_session.path()) {
            return MergeStartResult::failure(format!(
                "canvas working directory does not exist: {}",
                canvas_session.path().display()
            ));
        }

        let agent_id = AgentId::new(format!(
            "merge-{}-{}",
            canvas_id,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        if !project
            .lock()
            .unwrap()
            .lock_canvas(canvas_id, LockState::Merging, &agent_id)
        {
            return MergeStartResult::failure(format!("canvas {canvas_id} is already locked"));
        }
        self.log_event(
            Some(canvas_id.clone()),
            Some(agent_id.clone()),
            EventKind::LockChanged {
                state: LockState::Merging,
            },
        );

        let mut context = MergeContext::new(root_session, canvas_session);
        context.history = history;
        context.max_attempts = self.config.merge.max_attempts;

        project
            .lock()
            .unwrap()
            .add_agent(BackgroundAgent::new_merge(agent_id.clone(), context.clone()));
        self.log_event(
            Some(canvas_id.clone()),
            Some(agent_id.clone()),
            EventKind::MergeStarted {
                max_attempts: context.max_attempts,
            },
        );

        let runner = MergeAgentRunner {
            git: &self.git,
            attempt_timeout: Duration::from_secs(self.config.merge.attempt_timeout_secs),
        };
        let result = runner.run(&mut context, resolver, |status| {
            eprintln!("[merge-agent] {agent_id}: {}", status.tag());
            project
                .lock()
                .unwrap()
                .set_agent_status(&agent_id, status);
        });

        // Write the final context back before settling status and lock.
        project.lock().unwrap().update_agent(&agent_id, |agent| {
            agent.context = context.clone();
        });

        match result {
            Ok(true) => {
                let mut project = project.lock().unwrap();
                project.set_agent_status(&agent_id, AgentStatus::Completed);
                project.lock_canvas(canvas_id, LockState::Merged, &agent_id);
                drop(project);
                self.log_event(
                    Some(canvas_id.clone()),
                    Some(agent_id.clone()),
                    EventKind::MergeCompleted,
                );
                MergeStartResult {
                    success: true,
                    agent_id: Some(agent_id),
                    message: None,
                }
            }
            Ok(false) => {
                let message = format!(
                    "merge not completed after {} attempts; resolve remaining conflicts manually",
                    context.max_attempts
                );
                self.fail_and_unlock(project, canvas_id, &agent_id, &message);
                MergeStartResult {
                    success: false,
                    agent_id: Some(agent_id),
                    message: Some(message),
                }
            }
            Err(err) => {
                let message = err.to_string();
                self.fail_and_unlock(project, canvas_id, &agent_id, &message);
                MergeStartResult {
                    success: false,
                    agent_id: Some(agent_id),
                    message: Some(message),
                }
            }
        }
    }

    /// Shared failure path: the agent is marked failed and the canvas is
    /// always returned to normal.
    fn fail_and_unlock(
        &self,
        project: &Mutex<GitProject>,
        canvas_id: &CanvasId,
        agent_id: &AgentId,
        message: &str,
    ) {
        let mut project = project.lock().unwrap();
        project.set_agent_status(
            agent_id,
            AgentStatus::Failed {
                message: message.to_string(),
            },
        );
        project.unlock_canvas(canvas_id, Some(agent_id));
        drop(project);
        self.log_event(
            Some(canvas_id.clone()),
            Some(agent_id.clone()),
            EventKind::MergeFailed {
                reason: message.to_string(),
            },
        );
        eprintln!("[merge-agent] {agent_id}: failed: {message}");
    }
}
