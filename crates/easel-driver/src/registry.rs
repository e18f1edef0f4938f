//! Process registry — the single authority on driver liveness.
//!
//! Persisted `ProcessState` records are a claim; this registry holds the
//! live instances and is the fact. It is an explicitly constructed,
//! injected component so tests build isolated registries, and all access
//! goes through one mutex because it is touched from UI re-renders, the
//! orchestrator, and driver cleanup alike.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use easel_core::types::{ElementId, ProcessId, TerminalId};

/// A live driver registered under a process id.
pub trait DriverInstance: Send + Sync {
    /// Liveness predicate. Instances that cannot tell are assumed running
    /// while registered.
    fn is_running(&self) -> bool {
        true
    }

    /// Tear down the instance's terminal and internal state.
    fn cleanup(&self, force: bool);
}

#[derive(Default)]
struct RegistryInner {
    drivers: HashMap<String, Arc<dyn DriverInstance>>,
    terminals: HashMap<String, TerminalId>,
}

#[derive(Default)]
pub struct ProcessRegistry {
    inner: Mutex<RegistryInner>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, process_id: ProcessId, driver: Arc<dyn DriverInstance>) {
        self.inner
            .lock()
            .unwrap()
            .drivers
            .insert(process_id.0, driver);
    }

    pub fn get(&self, process_id: &ProcessId) -> Option<Arc<dyn DriverInstance>> {
        self.inner.lock().unwrap().drivers.get(&process_id.0).cloned()
    }

    pub fn unregister(&self, process_id: &ProcessId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .drivers
            .remove(&process_id.0)
            .is_some()
    }

    /// False for unknown ids; otherwise the instance's own predicate.
    pub fn is_running(&self, process_id: &ProcessId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .drivers
            .get(&process_id.0)
            .map(|driver| driver.is_running())
            .unwrap_or(false)
    }

    /// Remember which terminal a UI element is attached to, so a rebuilt
    /// view can find its way back.
    pub fn associate_terminal(&self, element_id: &ElementId, terminal_id: TerminalId) {
        self.inner
            .lock()
            .unwrap()
            .terminals
            .insert(element_id.0.clone(), terminal_id);
    }

    pub fn lookup_terminal(&self, element_id: &ElementId) -> Option<TerminalId> {
        self.inner
            .lock()
            .unwrap()
            .terminals
            .get(&element_id.0)
            .cloned()
    }

    /// Drop every entry whose instance reports not running. Returns the
    /// removed ids.
    pub fn sweep(&self) -> Vec<ProcessId> {
        let mut inner = self.inner.lock().unwrap();
        let dead: Vec<String> = inner
            .drivers
            .iter()
            .filter(|(_, driver)| !driver.is_running())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            inner.drivers.remove(id);
        }
        dead.into_iter().map(ProcessId::new).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().drivers.is_empty()
    }
}
