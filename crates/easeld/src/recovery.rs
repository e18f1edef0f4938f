//! Lost-driver-instance recovery.
//!
//! After a restart, persisted ProcessState records may still claim
//! "running" while the registry has no live instance. Those claims are
//! downgraded: the process is marked completed and its in-progress ledger
//! task is force-completed with an empty commit reference. This is a lossy,
//! best-effort path and is surfaced as an observable event.

use easel_core::ledger::{CommitRef, TaskPhase};
use easel_core::project::GitProject;
use easel_core::types::{CanvasId, ProcessId, ProcessStatus, TaskId};
use easel_driver::ProcessRegistry;

/// One downgraded process claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredProcess {
    pub canvas_id: CanvasId,
    pub process_id: ProcessId,
    /// The ledger task that was force-completed, when one matched.
    pub task_id: Option<TaskId>,
}

/// Reconcile persisted process claims against the registry's facts.
pub fn reconcile(project: &mut GitProject, registry: &ProcessRegistry) -> Vec<RecoveredProcess> {
    let mut stale: Vec<(CanvasId, ProcessId, Option<TaskId>)> = Vec::new();

    for canvas in project.canvases() {
        for process in &canvas.processes {
            if process.status != ProcessStatus::Running {
                continue;
            }
            if registry.get(&process.process_id).is_some() {
                continue;
            }
            let task_id = canvas.ledger.tasks().iter().find_map(|task| {
                match &task.phase {
                    TaskPhase::InProgress {
                        process_id: Some(process_id),
                        ..
                    } if process_id == &process.process_id => Some(task.id.clone()),
                    _ => None,
                }
            });
            stale.push((canvas.id.clone(), process.process_id.clone(), task_id));
        }
    }

    let mut recovered = Vec::new();
    for (canvas_id, process_id, task_id) in stale {
        project.update_process_state(&canvas_id, &process_id, |process| {
            process.mark_completed();
        });
        if let Some(task_id) = &task_id {
            project.complete_task(&canvas_id, task_id, CommitRef::Missing, Vec::new());
        }
        recovered.push(RecoveredProcess {
            canvas_id,
            process_id,
            task_id,
        });
    }
    recovered
}
