//! GitProject — the aggregate root owning a project's canvases and
//! background agents.
//!
//! Canvases and agents are mutated only through the project's methods; every
//! successful mutation fires a change notification to subscribers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;

use crate::agent::{AgentStatus, BackgroundAgent};
use crate::canvas::{Canvas, LockState};
use crate::ledger::{CommitRef, LedgerTask};
use crate::types::{AgentId, CanvasId, ProcessId, ProcessState, TaskId, WorkspaceSession};

/// Notification sent to subscribers after a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectChange {
    CanvasAdded { canvas_id: CanvasId },
    CanvasLockChanged { canvas_id: CanvasId, state: LockState },
    CurrentCanvasChanged { index: usize },
    TaskChanged { canvas_id: CanvasId, task_id: TaskId },
    ProcessChanged { canvas_id: CanvasId, process_id: ProcessId },
    AgentChanged { agent_id: AgentId },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GitProject {
    pub root_session: WorkspaceSession,
    canvases: Vec<Canvas>,
    current_canvas: usize,
    agents: Vec<BackgroundAgent>,
    #[serde(skip)]
    subscribers: Vec<mpsc::Sender<ProjectChange>>,
}

impl GitProject {
    pub fn new(root_session: WorkspaceSession) -> Self {
        Self {
            root_session,
            canvases: Vec::new(),
            current_canvas: 0,
            agents: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Rebuild a project from persisted parts.
    pub fn from_parts(
        root_session: WorkspaceSession,
        canvases: Vec<Canvas>,
        current_canvas: usize,
        agents: Vec<BackgroundAgent>,
    ) -> Self {
        let current_canvas = if canvases.is_empty() {
            0
        } else {
            current_canvas.min(canvases.len() - 1)
        };
        Self {
            root_session,
            canvases,
            current_canvas,
            agents,
            subscribers: Vec::new(),
        }
    }

    /// Receive a change notification for every subsequent mutation.
    pub fn subscribe(&mut self) -> mpsc::Receiver<ProjectChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, change: ProjectChange) {
        self.subscribers
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn canvases(&self) -> &[Canvas] {
        &self.canvases
    }

    pub fn agents(&self) -> &[BackgroundAgent] {
        &self.agents
    }

    pub fn canvas(&self, id: &CanvasId) -> Option<&Canvas> {
        self.canvases.iter().find(|c| &c.id == id)
    }

    fn canvas_mut(&mut self, id: &CanvasId) -> Option<&mut Canvas> {
        self.canvases.iter_mut().find(|c| &c.id == id)
    }

    pub fn agent(&self, id: &AgentId) -> Option<&BackgroundAgent> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn current_canvas(&self) -> Option<&Canvas> {
        self.canvases.get(self.current_canvas)
    }

    pub fn current_canvas_index(&self) -> usize {
        self.current_canvas
    }

    pub fn set_current_canvas(&mut self, index: usize) -> bool {
        if index >= self.canvases.len() {
            return false;
        }
        self.current_canvas = index;
        self.notify(ProjectChange::CurrentCanvasChanged { index });
        true
    }

    /// Add an explicitly created canvas (a copy of the root working tree,
    /// produced by the workspace collaborator).
    pub fn add_canvas(&mut self, canvas: Canvas) -> CanvasId {
        let id = canvas.id.clone();
        self.canvases.push(canvas);
        self.notify(ProjectChange::CanvasAdded { canvas_id: id.clone() });
        id
    }

    /// Auto-create the first canvas when the project has none. Any later
    /// canvas must come from an explicit user action.
    pub fn ensure_default_canvas(&mut self, session: WorkspaceSession) -> Option<CanvasId> {
        if !self.canvases.is_empty() {
            return None;
        }
        let canvas = Canvas::new(CanvasId::new("canvas-0"), "main", session);
        Some(self.add_canvas(canvas))
    }

    // --- Canvas locking -------------------------------------------------

    /// Acquire or advance a canvas's lock on behalf of `agent`.
    ///
    /// Fails when the canvas is already in a non-normal state held by a
    /// different agent, or when the transition is not a forward one.
    pub fn lock_canvas(&mut self, id: &CanvasId, state: LockState, agent: &AgentId) -> bool {
        let Some(canvas) = self.canvas_mut(id) else {
            return false;
        };
        if canvas.lock != LockState::Normal && canvas.locking_agent.as_ref() != Some(agent) {
            return false;
        }
        if !canvas.lock.can_advance_to(state) {
            return false;
        }
        canvas.lock = state;
        canvas.locking_agent = Some(agent.clone());
        canvas.locked_at = Some(Utc::now());
        canvas.touch();
        self.notify(ProjectChange::CanvasLockChanged {
            canvas_id: id.clone(),
            state,
        });
        true
    }

    /// Release a canvas back to normal. With an agent given, only the
    /// current holder may release; without one, the release is
    /// unconditional (operator override).
    pub fn unlock_canvas(&mut self, id: &CanvasId, agent: Option<&AgentId>) -> bool {
        let Some(canvas) = self.canvas_mut(id) else {
            return false;
        };
        if let Some(agent) = agent {
            if canvas.lock != LockState::Normal && canvas.locking_agent.as_ref() != Some(agent) {
                return false;
            }
        }
        canvas.lock = LockState::Normal;
        canvas.locking_agent = None;
        canvas.locked_at = None;
        canvas.touch();
        self.notify(ProjectChange::CanvasLockChanged {
            canvas_id: id.clone(),
            state: LockState::Normal,
        });
        true
    }

    // --- Ledger operations (creation and edits are lock-gated) ----------

    /// Create a prompting task. Refused while the canvas is locked.
    pub fn create_task(&mut self, canvas_id: &CanvasId, prompt: impl Into<String>) -> Option<TaskId> {
        let canvas = self.canvas_mut(canvas_id)?;
        if !canvas.accepts_task_edits() {
            return None;
        }
        let task_id = canvas.ledger.create_prompting_task(prompt);
        canvas.touch();
        self.notify(ProjectChange::TaskChanged {
            canvas_id: canvas_id.clone(),
            task_id: task_id.clone(),
        });
        Some(task_id)
    }

    /// Edit a prompting task's text. Refused while the canvas is locked.
    pub fn update_task_prompt(
        &mut self,
        canvas_id: &CanvasId,
        task_id: &TaskId,
        text: impl Into<String>,
    ) -> bool {
        let Some(canvas) = self.canvas_mut(canvas_id) else {
            return false;
        };
        if !canvas.accepts_task_edits() {
            return false;
        }
        if !canvas.ledger.update_task_prompt(task_id, text) {
            return false;
        }
        canvas.touch();
        self.notify(ProjectChange::TaskChanged {
            canvas_id: canvas_id.clone(),
            task_id: task_id.clone(),
        });
        true
    }

    pub fn start_task(
        &mut self,
        canvas_id: &CanvasId,
        task_id: &TaskId,
        process_id: Option<ProcessId>,
    ) -> bool {
        let Some(canvas) = self.canvas_mut(canvas_id) else {
            return false;
        };
        if !canvas.ledger.start_task(task_id, process_id) {
            return false;
        }
        canvas.touch();
        self.notify(ProjectChange::TaskChanged {
            canvas_id: canvas_id.clone(),
            task_id: task_id.clone(),
        });
        true
    }

    pub fn complete_task(
        &mut self,
        canvas_id: &CanvasId,
        task_id: &TaskId,
        commit: CommitRef,
        depends_on: Vec<TaskId>,
    ) -> bool {
        let Some(canvas) = self.canvas_mut(canvas_id) else {
            return false;
        };
        if !canvas.ledger.complete_task(task_id, commit, depends_on) {
            return false;
        }
        canvas.touch();
        self.notify(ProjectChange::TaskChanged {
            canvas_id: canvas_id.clone(),
            task_id: task_id.clone(),
        });
        true
    }

    pub fn revert_task(&mut self, canvas_id: &CanvasId, task_id: &TaskId) -> bool {
        let Some(canvas) = self.canvas_mut(canvas_id) else {
            return false;
        };
        if !canvas.ledger.revert_task(task_id) {
            return false;
        }
        canvas.touch();
        self.notify(ProjectChange::TaskChanged {
            canvas_id: canvas_id.clone(),
            task_id: task_id.clone(),
        });
        true
    }

    pub fn restore_task(&mut self, canvas_id: &CanvasId, task_id: &TaskId) -> bool {
        let Some(canvas) = self.canvas_mut(canvas_id) else {
            return false;
        };
        if !canvas.ledger.restore_task(task_id) {
            return false;
        }
        canvas.touch();
        self.notify(ProjectChange::TaskChanged {
            canvas_id: canvas_id.clone(),
            task_id: task_id.clone(),
        });
        true
    }

    pub fn current_in_progress_task(&self, canvas_id: &CanvasId) -> Option<&LedgerTask> {
        self.canvas(canvas_id)?.ledger.current_in_progress_task()
    }

    // --- Process records ------------------------------------------------

    pub fn add_process_state(&mut self, canvas_id: &CanvasId, process: ProcessState) -> bool {
        let Some(canvas) = self.canvas_mut(canvas_id) else {
            return false;
        };
        let process_id = process.process_id.clone();
        canvas.processes.push(process);
        canvas.touch();
        self.notify(ProjectChange::ProcessChanged {
            canvas_id: canvas_id.clone(),
            process_id,
        });
        true
    }

    pub fn update_process_state(
        &mut self,
        canvas_id: &CanvasId,
        process_id: &ProcessId,
        update: impl FnOnce(&mut ProcessState),
    ) -> bool {
        let Some(canvas) = self.canvas_mut(canvas_id) else {
            return false;
        };
        let Some(process) = canvas
            .processes
            .iter_mut()
            .find(|p| &p.process_id == process_id)
        else {
            return false;
        };
        update(process);
        canvas.touch();
        self.notify(ProjectChange::ProcessChanged {
            canvas_id: canvas_id.clone(),
            process_id: process_id.clone(),
        });
        true
    }

    // --- Background agents ----------------------------------------------

    pub fn add_agent(&mut self, agent: BackgroundAgent) -> AgentId {
        let id = agent.id.clone();
        self.agents.push(agent);
        self.notify(ProjectChange::AgentChanged { agent_id: id.clone() });
        id
    }

    pub fn set_agent_status(&mut self, id: &AgentId, status: AgentStatus) -> bool {
        let Some(agent) = self.agents.iter_mut().find(|a| &a.id == id) else {
            return false;
        };
        agent.set_status(status);
        self.notify(ProjectChange::AgentChanged { agent_id: id.clone() });
        true
    }

    pub fn update_agent(
        &mut self,
        id: &AgentId,
        update: impl FnOnce(&mut BackgroundAgent),
    ) -> bool {
        let Some(agent) = self.agents.iter_mut().find(|a| &a.id == id) else {
            return false;
        };
        update(agent);
        agent.updated_at = Utc::now();
        self.notify(ProjectChange::AgentChanged { agent_id: id.clone() });
        true
    }
}
