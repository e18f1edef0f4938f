pub mod event_log;
pub mod merge_agent;
pub mod orchestrator;
pub mod persistence;
pub mod recovery;
pub mod workspace;

pub use event_log::{EventLogError, JsonlEventLog};
pub use merge_agent::{
    MergeAgentError, MergeAgentRunner, ResolverDriver, ResolverOutcome, TuiResolver,
};
pub use orchestrator::{MergeStartResult, Orchestrator, OrchestratorError};
pub use persistence::{PersistenceError, SqliteStore};
pub use recovery::{reconcile, RecoveredProcess};
