//! Background agents — bounded-retry orchestration units that drive the CLI
//! tool toward a goal state. The only kind today is the merge agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, ProcessId, WorkspaceSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Merge,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Merge => "merge",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Checking,
    Running,
    Completed,
    Failed { message: String },
}

impl AgentStatus {
    pub fn tag(&self) -> &'static str {
        match self {
            AgentStatus::Initializing => "initializing",
            AgentStatus::Checking => "checking",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Failed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AgentStatus::Failed { .. })
    }
}

fn default_max_attempts() -> u32 {
    3
}

/// Everything a merge agent carries across attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeContext {
    pub root_session: WorkspaceSession,
    pub canvas_session: WorkspaceSession,
    /// Prompts from the canvas's task history, oldest first, given to the
    /// CLI tool as context for conflict resolution.
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub conflict_files: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub root_branch: String,
    pub canvas_branch: String,
}

impl MergeContext {
    pub fn new(root_session: WorkspaceSession, canvas_session: WorkspaceSession) -> Self {
        Self {
            root_session,
            canvas_session,
            history: Vec::new(),
            conflict_files: Vec::new(),
            attempts: 0,
            max_attempts: default_max_attempts(),
            root_branch: String::new(),
            canvas_branch: String::new(),
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundAgent {
    pub id: AgentId,
    pub kind: AgentKind,
    pub session: WorkspaceSession,
    pub status: AgentStatus,
    #[serde(default)]
    pub process_id: Option<ProcessId>,
    pub context: MergeContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackgroundAgent {
    pub fn new_merge(id: AgentId, context: MergeContext) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: AgentKind::Merge,
            session: context.canvas_session.clone(),
            status: AgentStatus::Initializing,
            process_id: None,
            context,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: AgentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
