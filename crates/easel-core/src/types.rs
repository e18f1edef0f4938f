//! Core identifiers and shared records for the canvas orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of one isolated canvas workspace.
    CanvasId
);
string_id!(
    /// Identifier of a ledger task.
    TaskId
);
string_id!(
    /// Identifier of a running (or once-running) driver process.
    ProcessId
);
string_id!(
    /// Identifier of a live terminal session owned by the transport.
    TerminalId
);
string_id!(
    /// Identifier of a background agent.
    AgentId
);
string_id!(
    /// Identifier of the UI element a process was started from.
    ElementId
);
string_id!(
    /// Identifier of a logged event.
    EventId
);

/// Where a workspace lives: a plain local directory or a directory inside a
/// named remote distribution (WSL-style).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkspaceSession {
    Local { path: PathBuf },
    Distribution { name: String, path: PathBuf },
}

impl WorkspaceSession {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        WorkspaceSession::Local { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        match self {
            WorkspaceSession::Local { path } => path,
            WorkspaceSession::Distribution { path, .. } => path,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, WorkspaceSession::Local { .. })
    }
}

/// What a recorded process was doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// A user-submitted coding task driven through the CLI tool.
    Task,
    /// A merge-agent conflict-resolution run.
    Merge,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Task => "task",
            ProcessKind::Merge => "merge",
        }
    }
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Completed,
    Error,
}

impl ProcessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Completed | ProcessStatus::Error)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "running" => Ok(ProcessStatus::Running),
            "completed" => Ok(ProcessStatus::Completed),
            "error" => Ok(ProcessStatus::Error),
            other => Err(format!(
                "invalid process status '{other}'. valid values: running, completed, error"
            )),
        }
    }
}

/// Persisted record of a driver process.
///
/// This is a durable *claim* about a process; the process registry holds the
/// live instance and is the only authority on whether one is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    pub process_id: ProcessId,
    pub terminal_id: Option<TerminalId>,
    pub kind: ProcessKind,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    pub element_id: ElementId,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl ProcessState {
    pub fn new(process_id: ProcessId, kind: ProcessKind, element_id: ElementId) -> Self {
        Self {
            process_id,
            terminal_id: None,
            kind,
            status: ProcessStatus::Running,
            started_at: Utc::now(),
            element_id,
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn mark_completed(&mut self) {
        self.status = ProcessStatus::Completed;
    }

    pub fn mark_error(&mut self) {
        self.status = ProcessStatus::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_their_inner_string() {
        assert_eq!(CanvasId::new("c1").to_string(), "c1");
        assert_eq!(ProcessId::new("p-42").as_ref(), "p-42");
    }

    #[test]
    fn workspace_session_exposes_path_for_both_variants() {
        let local = WorkspaceSession::local("/tmp/work");
        assert_eq!(local.path(), Path::new("/tmp/work"));
        assert!(local.is_local());

        let remote = WorkspaceSession::Distribution {
            name: "ubuntu".to_string(),
            path: PathBuf::from("/home/dev/work"),
        };
        assert_eq!(remote.path(), Path::new("/home/dev/work"));
        assert!(!remote.is_local());
    }

    #[test]
    fn process_status_serializes_as_snake_case() {
        let json = serde_json::to_string(&ProcessStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let decoded: ProcessStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(decoded, ProcessStatus::Error);
    }

    #[test]
    fn process_status_terminal_check() {
        assert!(!ProcessStatus::Running.is_terminal());
        assert!(ProcessStatus::Completed.is_terminal());
        assert!(ProcessStatus::Error.is_terminal());
    }

    #[test]
    fn process_state_starts_running_and_marks_terminal() {
        let mut state = ProcessState::new(
            ProcessId::new("p1"),
            ProcessKind::Task,
            ElementId::new("el-1"),
        )
        .with_prompt("add a health endpoint");

        assert_eq!(state.status, ProcessStatus::Running);
        assert_eq!(state.prompt.as_deref(), Some("add a health endpoint"));

        state.mark_completed();
        assert_eq!(state.status, ProcessStatus::Completed);

        state.mark_error();
        assert_eq!(state.status, ProcessStatus::Error);
    }

    #[test]
    fn process_state_roundtrips_through_json() {
        let state = ProcessState::new(
            ProcessId::new("p2"),
            ProcessKind::Merge,
            ElementId::new("el-2"),
        );
        let json = serde_json::to_string(&state).unwrap();
        let decoded: ProcessState = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn process_status_parses_from_str() {
        assert_eq!(
            "completed".parse::<ProcessStatus>().unwrap(),
            ProcessStatus::Completed
        );
        assert!("bogus".parse::<ProcessStatus>().is_err());
    }
}
