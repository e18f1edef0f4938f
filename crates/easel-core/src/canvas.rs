//! Canvas — an isolated copy of the project working tree with its own task
//! history and lock state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::TaskLedger;
use crate::types::{AgentId, CanvasId, ProcessState, WorkspaceSession};

/// Mutual-exclusion state of a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    #[default]
    Normal,
    Merging,
    Merged,
}

impl LockState {
    pub fn as_str(self) -> &'static str {
        match self {
            LockState::Normal => "normal",
            LockState::Merging => "merging",
            LockState::Merged => "merged",
        }
    }

    /// A canvas accepts task creation and prompt edits only while normal.
    pub fn accepts_task_edits(self) -> bool {
        matches!(self, LockState::Normal)
    }

    /// Forward lock transitions: normal→merging, merging→merged. Unlocking
    /// back to normal is handled separately by the lock owner.
    pub fn can_advance_to(self, next: LockState) -> bool {
        matches!(
            (self, next),
            (LockState::Normal, LockState::Merging) | (LockState::Merging, LockState::Merged)
        )
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One isolated workspace. Created only by explicit copy-of-root, except the
/// first canvas a project auto-creates when it has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    pub id: CanvasId,
    pub name: String,
    pub session: WorkspaceSession,
    #[serde(default)]
    pub ledger: TaskLedger,
    #[serde(default)]
    pub processes: Vec<ProcessState>,
    #[serde(default)]
    pub lock: LockState,
    #[serde(default)]
    pub locking_agent: Option<AgentId>,
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Canvas {
    pub fn new(id: CanvasId, name: impl Into<String>, session: WorkspaceSession) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            session,
            ledger: TaskLedger::new(),
            processes: Vec::new(),
            lock: LockState::Normal,
            locking_agent: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn accepts_task_edits(&self) -> bool {
        self.lock.accepts_task_edits()
    }

    /// True when `agent` currently holds this canvas's lock.
    pub fn is_locked_by(&self, agent: &AgentId) -> bool {
        self.lock != LockState::Normal && self.locking_agent.as_ref() == Some(agent)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
