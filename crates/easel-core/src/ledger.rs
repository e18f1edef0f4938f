//! Per-canvas task lifecycle ledger.
//!
//! Tasks move strictly forward through Prompting → InProgress → Completed.
//! Completed tasks are anchored to a commit reference; reverting a task also
//! reverts everything after it, restoring re-applies everything up to and
//! including it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ProcessId, TaskId};

/// Serialized form of the "completed with nothing to commit" sentinel.
pub const NO_CHANGES_SENTINEL: &str = "NO_CHANGES";

/// What a completed task is anchored to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommitRef {
    /// No commit recorded (lossy recovery, or not yet known).
    Missing,
    /// The run succeeded but left nothing to commit.
    NoChanges,
    /// A real commit hash.
    Hash(String),
}

impl CommitRef {
    /// True only for a real commit hash.
    pub fn is_real(&self) -> bool {
        matches!(self, CommitRef::Hash(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommitRef::Missing => "",
            CommitRef::NoChanges => NO_CHANGES_SENTINEL,
            CommitRef::Hash(hash) => hash,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "" => CommitRef::Missing,
            NO_CHANGES_SENTINEL => CommitRef::NoChanges,
            hash => CommitRef::Hash(hash.to_string()),
        }
    }
}

impl Serialize for CommitRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CommitRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(CommitRef::parse(&raw))
    }
}

impl std::fmt::Display for CommitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a ledger task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TaskPhase {
    Prompting,
    InProgress {
        started_at: DateTime<Utc>,
        process_id: Option<ProcessId>,
    },
    Completed {
        completed_at: DateTime<Utc>,
        commit: CommitRef,
        is_reverted: bool,
        #[serde(default)]
        depends_on: Vec<TaskId>,
    },
}

impl TaskPhase {
    pub fn tag(&self) -> &'static str {
        match self {
            TaskPhase::Prompting => "prompting",
            TaskPhase::InProgress { .. } => "in_progress",
            TaskPhase::Completed { .. } => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTask {
    pub id: TaskId,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub phase: TaskPhase,
}

impl LedgerTask {
    pub fn is_prompting(&self) -> bool {
        matches!(self.phase, TaskPhase::Prompting)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.phase, TaskPhase::InProgress { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, TaskPhase::Completed { .. })
    }

    pub fn is_reverted(&self) -> bool {
        matches!(
            self.phase,
            TaskPhase::Completed {
                is_reverted: true,
                ..
            }
        )
    }
}

/// Where a revert should land in git history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertTarget {
    /// Reset to this commit hash.
    Commit(String),
    /// No real commit exists before the task: one step before the oldest
    /// tracked commit.
    BeforeOldest,
}

/// Ordered record of a canvas's tasks, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskLedger {
    tasks: Vec<LedgerTask>,
    #[serde(default)]
    next_seq: u64,
}

impl TaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[LedgerTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: &TaskId) -> Option<&LedgerTask> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    /// Create a new task holding a free-text prompt.
    pub fn create_prompting_task(&mut self, prompt: impl Into<String>) -> TaskId {
        let id = TaskId::new(format!("task-{}", self.next_seq));
        self.next_seq += 1;
        self.tasks.push(LedgerTask {
            id: id.clone(),
            prompt: prompt.into(),
            created_at: Utc::now(),
            phase: TaskPhase::Prompting,
        });
        id
    }

    /// Move a Prompting task to InProgress. Returns false if the task does
    /// not exist or is not Prompting.
    pub fn start_task(&mut self, id: &TaskId, process_id: Option<ProcessId>) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| &t.id == id) else {
            return false;
        };
        if !matches!(task.phase, TaskPhase::Prompting) {
            return false;
        }
        task.phase = TaskPhase::InProgress {
            started_at: Utc::now(),
            process_id,
        };
        true
    }

    /// Move an InProgress task to Completed with the given commit reference.
    pub fn complete_task(&mut self, id: &TaskId, commit: CommitRef, depends_on: Vec<TaskId>) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| &t.id == id) else {
            return false;
        };
        if !matches!(task.phase, TaskPhase::InProgress { .. }) {
            return false;
        }
        task.phase = TaskPhase::Completed {
            completed_at: Utc::now(),
            commit,
            is_reverted: false,
            depends_on,
        };
        true
    }

    /// Replace the prompt text. Only legal while Prompting.
    pub fn update_task_prompt(&mut self, id: &TaskId, text: impl Into<String>) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| &t.id == id) else {
            return false;
        };
        if !matches!(task.phase, TaskPhase::Prompting) {
            return false;
        }
        task.prompt = text.into();
        true
    }

    /// The most recently created task still in Prompting.
    pub fn current_prompting_task(&self) -> Option<&LedgerTask> {
        self.tasks.iter().rev().find(|t| t.is_prompting())
    }

    /// The most recent InProgress task.
    pub fn current_in_progress_task(&self) -> Option<&LedgerTask> {
        self.tasks.iter().rev().find(|t| t.is_in_progress())
    }

    /// Mark `id` and every completed task after it as reverted.
    /// Returns false if `id` is not a completed task.
    pub fn revert_task(&mut self, id: &TaskId) -> bool {
        let Some(k) = self.completed_position(id) else {
            return false;
        };
        let mut pos = 0usize;
        for task in self.tasks.iter_mut() {
            if let TaskPhase::Completed { is_reverted, .. } = &mut task.phase {
                if pos >= k {
                    *is_reverted = true;
                }
                pos += 1;
            }
        }
        true
    }

    /// Clear the reverted flag on every completed task up to and including
    /// `id`. Tasks after `id` keep whatever flag they have.
    pub fn restore_task(&mut self, id: &TaskId) -> bool {
        let Some(k) = self.completed_position(id) else {
            return false;
        };
        let mut pos = 0usize;
        for task in self.tasks.iter_mut() {
            if let TaskPhase::Completed { is_reverted, .. } = &mut task.phase {
                if pos <= k {
                    *is_reverted = false;
                }
                pos += 1;
            }
        }
        true
    }

    /// The commit a revert of `id` should reset the working tree to: the
    /// nearest completed task strictly before `id` holding a real hash.
    pub fn revert_target_commit(&self, id: &TaskId) -> Option<RevertTarget> {
        let k = self.completed_position(id)?;
        let completed: Vec<&LedgerTask> = self.completed_tasks().collect();
        let target = completed[..k].iter().rev().find_map(|task| match &task.phase {
            TaskPhase::Completed {
                commit: CommitRef::Hash(hash),
                ..
            } => Some(hash.clone()),
            _ => None,
        });
        Some(match target {
            Some(hash) => RevertTarget::Commit(hash),
            None => RevertTarget::BeforeOldest,
        })
    }

    fn completed_tasks(&self) -> impl Iterator<Item = &LedgerTask> {
        self.tasks.iter().filter(|t| t.is_completed())
    }

    /// Position of `id` among completed tasks in creation order.
    fn completed_position(&self, id: &TaskId) -> Option<usize> {
        self.completed_tasks().position(|t| &t.id == id)
    }
}
