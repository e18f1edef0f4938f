//! Structured event records written to the JSONL event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canvas::LockState;
use crate::ledger::CommitRef;
use crate::types::{AgentId, CanvasId, EventId, ProcessId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CanvasCreated,
    TaskCreated {
        task_id: TaskId,
    },
    TaskStarted {
        task_id: TaskId,
        process_id: Option<ProcessId>,
    },
    TaskCompleted {
        task_id: TaskId,
        commit: CommitRef,
    },
    TaskReverted {
        task_id: TaskId,
    },
    TaskRestored {
        task_id: TaskId,
    },
    LockChanged {
        state: LockState,
    },
    MergeStarted {
        max_attempts: u32,
    },
    MergeAttemptStarted {
        attempt: u32,
    },
    MergeAttemptFinished {
        attempt: u32,
        clean: bool,
    },
    MergeCompleted,
    MergeFailed {
        reason: String,
    },
    ProcessRecovered {
        process_id: ProcessId,
        task_id: Option<TaskId>,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasEvent {
    pub id: EventId,
    pub canvas_id: Option<CanvasId>,
    pub agent_id: Option<AgentId>,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl CanvasEvent {
    pub fn now(id: EventId, canvas_id: Option<CanvasId>, kind: EventKind) -> Self {
        Self {
            id,
            canvas_id,
            agent_id: None,
            at: Utc::now(),
            kind,
        }
    }

    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }
}
