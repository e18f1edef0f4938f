//! TUI automation driver.
//!
//! Owns one terminal session, rebuilds its screen buffer from the
//! transport's event stream, and steers the CLI coding tool by matching
//! the visible window against the trigger table and injecting keystrokes.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use easel_core::config::DriverConfig;
use easel_core::types::{TerminalId, WorkspaceSession};
use easel_term::{ScreenBuffer, TerminalMessage, TerminalSpec, TerminalTransport, TermError};

use crate::keys;
use crate::registry::DriverInstance;
use crate::triggers::{
    completion_hint, default_trigger_table, evaluate, has_prompt_marker, Trigger, TriggerAction,
    TriggerContext,
};

/// The driven tool refuses grids smaller than this.
pub const MIN_LINES: u16 = 24;
pub const MIN_COLS: u16 = 80;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("a task is already running on this driver")]
    AlreadyRunning,
    #[error("no task is active on this driver")]
    NoActiveTask,
    #[error(transparent)]
    Terminal(#[from] TermError),
}

/// Notifications emitted while a task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    TaskStarted,
    /// The current visible window after applying a batch of events.
    ScreenUpdate { window: String },
    /// The advisory "looks done" heuristic fired. Never authoritative.
    CompletionHint,
    /// The tool idles at a reusable prompt; a new task may be submitted
    /// without relaunching it.
    SessionReady,
    TaskCompleted,
    TaskError { message: String },
}

#[derive(Default)]
struct DriverState {
    terminal_id: Option<TerminalId>,
    task_active: bool,
    prompt_injected: bool,
    end_of_input_sent: bool,
    session_ready: bool,
    hint_armed: bool,
    prompt: Option<String>,
}

pub struct SessionDriver {
    transport: Arc<dyn TerminalTransport>,
    config: DriverConfig,
    table: Vec<Trigger>,
    events: mpsc::Sender<DriverEvent>,
    state: Mutex<DriverState>,
}

impl SessionDriver {
    pub fn new(
        transport: Arc<dyn TerminalTransport>,
        config: DriverConfig,
    ) -> (Arc<Self>, mpsc::Receiver<DriverEvent>) {
        Self::with_table(transport, config, default_trigger_table())
    }

    /// Build a driver with a custom trigger table (new CLI wording slots in
    /// here without touching the control flow).
    pub fn with_table(
        transport: Arc<dyn TerminalTransport>,
        config: DriverConfig,
        table: Vec<Trigger>,
    ) -> (Arc<Self>, mpsc::Receiver<DriverEvent>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self {
                transport,
                config,
                table,
                events: tx,
                state: Mutex::new(DriverState::default()),
            }),
            rx,
        )
    }

    fn emit(&self, event: DriverEvent) {
        let _ = self.events.send(event);
    }

    /// Open a terminal in `session`, launch the tool, and steer it through
    /// `prompt` with no human input. The terminal id is reported through
    /// `on_ready` before the tool is launched.
    pub fn start_task(
        self: &Arc<Self>,
        session: &WorkspaceSession,
        prompt: &str,
        on_ready: impl FnOnce(&TerminalId),
    ) -> Result<(), DriverError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.task_active {
                return Err(DriverError::AlreadyRunning);
            }

            // Session reuse: the tool already idles at its prompt, so the
            // running watch thread will inject straight away.
            if let Some(terminal_id) = state.terminal_id.clone() {
                if state.session_ready && self.transport.is_alive(&terminal_id) {
                    state.task_active = true;
                    state.prompt_injected = false;
                    state.end_of_input_sent = false;
                    state.session_ready = false;
                    state.prompt = Some(prompt.to_string());
                    drop(state);
                    on_ready(&terminal_id);
                    self.emit(DriverEvent::TaskStarted);
                    return Ok(());
                }
            }
        }

        let lines = self.config.lines.max(MIN_LINES);
        let cols = self.config.cols.max(MIN_COLS);
        let spec = TerminalSpec::new(session.clone(), lines, cols);
        let handle = self.transport.connect(&spec)?;
        let terminal_id = handle.id.clone();

        {
            let mut state = self.state.lock().unwrap();
            if state.task_active {
                drop(state);
                let _ = self.transport.kill(&terminal_id);
                return Err(DriverError::AlreadyRunning);
            }
            state.terminal_id = Some(terminal_id.clone());
            state.task_active = true;
            state.prompt_injected = false;
            state.end_of_input_sent = false;
            state.session_ready = false;
            state.hint_armed = false;
            state.prompt = Some(prompt.to_string());
        }

        on_ready(&terminal_id);
        self.emit(DriverEvent::TaskStarted);

        // Diagnostic probes: tool availability and working directory.
        // Their output lands in the buffer; failures are not fatal.
        let _ = self.transport.send_input_line(
            &terminal_id,
            &format!("command -v {}", self.config.tool_bin),
        );
        let _ = self.transport.send_input_line(&terminal_id, "pwd");

        // Launch the tool itself.
        self.transport
            .send_input_line(&terminal_id, &self.config.tool_bin)?;

        let driver = Arc::clone(self);
        let height = lines as usize;
        thread::spawn(move || driver.watch_loop(handle.messages, terminal_id, height));

        Ok(())
    }

    /// Soft stop: interrupt the tool, keep the terminal alive for reuse.
    pub fn stop_task(&self) -> Result<(), DriverError> {
        let terminal_id = {
            let mut state = self.state.lock().unwrap();
            if !state.task_active {
                return Err(DriverError::NoActiveTask);
            }
            let Some(terminal_id) = state.terminal_id.clone() else {
                return Err(DriverError::NoActiveTask);
            };
            state.task_active = false;
            state.prompt_injected = false;
            state.prompt = None;
            terminal_id
        };
        self.transport.send_ctrl_c(&terminal_id)?;
        Ok(())
    }

    /// True once the tool idles at a reusable prompt after a prior task.
    pub fn is_session_ready(&self) -> bool {
        self.state.lock().unwrap().session_ready
    }

    pub fn terminal_id(&self) -> Option<TerminalId> {
        self.state.lock().unwrap().terminal_id.clone()
    }

    fn watch_loop(
        self: Arc<Self>,
        messages: mpsc::Receiver<TerminalMessage>,
        terminal_id: TerminalId,
        height: usize,
    ) {
        let mut buffer = ScreenBuffer::new();
        while let Ok(message) = messages.recv() {
            match message {
                TerminalMessage::Events(events) => {
                    buffer.apply_all(&events);
                    let window = buffer.window_text(height);
                    self.handle_window(&terminal_id, &window);
                    self.emit(DriverEvent::ScreenUpdate { window });
                }
                TerminalMessage::Disconnected => break,
            }
        }
        self.handle_disconnect();
    }

    fn handle_window(&self, terminal_id: &TerminalId, window: &str) {
        let mut state = self.state.lock().unwrap();

        if !state.task_active {
            // Between tasks: watch for the reusable idle prompt.
            if !state.session_ready && has_prompt_marker(window) {
                state.session_ready = true;
                drop(state);
                self.emit(DriverEvent::SessionReady);
            }
            return;
        }

        let ctx = TriggerContext {
            window,
            prompt_injected: state.prompt_injected,
        };
        let action = evaluate(&self.table, &ctx).map(|t| t.action);

        match action {
            Some(TriggerAction::SendEnter) => {
                drop(state);
                let _ = self.transport.send_raw_input(terminal_id, keys::ENTER);
            }
            Some(TriggerAction::SendShiftTab) => {
                drop(state);
                let _ = self.transport.send_raw_input(terminal_id, keys::SHIFT_TAB);
            }
            Some(TriggerAction::InjectPrompt) => {
                state.prompt_injected = true;
                let prompt = state.prompt.clone().unwrap_or_default();
                drop(state);
                let _ = self.transport.send_raw_input(terminal_id, &prompt);
                thread::sleep(Duration::from_millis(self.config.settle_delay_ms));
                let _ = self.transport.send_raw_input(terminal_id, keys::ENTER);
            }
            Some(TriggerAction::SendEndOfInput) => {
                // The table is the authoritative completion signal: the tool
                // idles again after the injected prompt ran.
                state.end_of_input_sent = true;
                state.task_active = false;
                state.hint_armed = false;
                drop(state);
                let _ = self.transport.send_raw_input(terminal_id, keys::CTRL_D);
                let _ = self.transport.send_raw_input(terminal_id, keys::CTRL_D);
                self.emit(DriverEvent::TaskCompleted);
            }
            Some(TriggerAction::Wait) | None => {
                // Advisory heuristic: completion-looking text plus an idle
                // prompt arms a hint; further activity disarms it.
                if completion_hint(window) {
                    if !state.hint_armed {
                        state.hint_armed = true;
                        drop(state);
                        self.emit(DriverEvent::CompletionHint);
                    }
                } else {
                    state.hint_armed = false;
                }
            }
        }
    }

    fn handle_disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        let was_active = state.task_active;
        state.task_active = false;
        state.terminal_id = None;
        state.session_ready = false;
        state.prompt = None;
        drop(state);

        if was_active {
            self.emit(DriverEvent::TaskError {
                message: "terminal disconnected before task completion".to_string(),
            });
        }
    }
}

impl DriverInstance for SessionDriver {
    fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap();
        if state.task_active {
            return true;
        }
        state
            .terminal_id
            .as_ref()
            .map(|id| self.transport.is_alive(id))
            .unwrap_or(false)
    }

    /// Hard teardown. Without `force` a driver with an active task is left
    /// alone; with it the terminal is killed unconditionally. The caller
    /// removes the driver from the registry afterwards.
    fn cleanup(&self, force: bool) {
        let mut state = self.state.lock().unwrap();
        if state.task_active && !force {
            return;
        }
        if let Some(terminal_id) = state.terminal_id.take() {
            let _ = self.transport.kill(&terminal_id);
        }
        *state = DriverState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easel_term::{LineItem, TerminalEvent, TerminalHandle};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    /// Transport the tests drive by hand: records written bytes, lets the
    /// test push event batches, and reports scripted liveness.
    struct ScriptedTransport {
        sent: Mutex<Vec<String>>,
        outgoing: Mutex<HashMap<String, mpsc::Sender<TerminalMessage>>>,
        alive: AtomicBool,
    }

    impl ScriptedTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                outgoing: Mutex::new(HashMap::new()),
                alive: AtomicBool::new(true),
            })
        }

        fn push_window(&self, id: &TerminalId, lines: &[&str]) {
            let events = vec![TerminalEvent::ScreenUpdate {
                screen: lines
                    .iter()
                    .map(|text| vec![LineItem::plain(*text)])
                    .collect(),
                cursor_line: 0,
                cursor_col: 0,
            }];
            self.outgoing.lock().unwrap()[&id.0]
                .send(TerminalMessage::Events(events))
                .unwrap();
        }

        fn disconnect(&self, id: &TerminalId) {
            self.alive.store(false, Ordering::SeqCst);
            self.outgoing.lock().unwrap()[&id.0]
                .send(TerminalMessage::Disconnected)
                .unwrap();
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl TerminalTransport for ScriptedTransport {
        fn connect(&self, _spec: &TerminalSpec) -> Result<TerminalHandle, TermError> {
            let id = TerminalId::new(format!("t-{}", self.outgoing.lock().unwrap().len()));
            let (tx, rx) = mpsc::channel();
            self.outgoing.lock().unwrap().insert(id.0.clone(), tx);
            self.alive.store(true, Ordering::SeqCst);
            Ok(TerminalHandle { id, messages: rx })
        }

        fn send_raw_input(&self, _id: &TerminalId, data: &str) -> Result<(), TermError> {
            self.sent.lock().unwrap().push(data.to_string());
            Ok(())
        }

        fn resize(&self, _id: &TerminalId, _lines: u16, _cols: u16) -> Result<(), TermError> {
            Ok(())
        }

        fn kill(&self, _id: &TerminalId) -> Result<(), TermError> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_alive(&self, _id: &TerminalId) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    fn test_config() -> DriverConfig {
        DriverConfig {
            settle_delay_ms: 0,
            ..DriverConfig::default()
        }
    }

    fn wait_for_event(
        rx: &mpsc::Receiver<DriverEvent>,
        want: fn(&DriverEvent) -> bool,
        label: &str,
    ) -> DriverEvent {
        loop {
            let event = rx
                .recv_timeout(RECV_TIMEOUT)
                .unwrap_or_else(|_| panic!("timed out waiting for {label}"));
            if want(&event) {
                return event;
            }
        }
    }

    fn start(
        driver: &Arc<SessionDriver>,
        session: &WorkspaceSession,
        prompt: &str,
    ) -> TerminalId {
        let mut captured = None;
        driver
            .start_task(session, prompt, |id| captured = Some(id.clone()))
            .expect("start task");
        captured.expect("terminal id reported before continuing")
    }

    #[test]
    fn start_task_rejects_a_second_concurrent_task() {
        let transport = ScriptedTransport::new();
        let (driver, _rx) = SessionDriver::new(transport.clone(), test_config());
        let session = WorkspaceSession::local("/tmp/w");

        start(&driver, &session, "first");
        let err = driver
            .start_task(&session, "second", |_| {})
            .expect_err("second task must fail");
        assert!(matches!(err, DriverError::AlreadyRunning));
    }

    #[test]
    fn startup_probes_then_launches_the_tool() {
        let transport = ScriptedTransport::new();
        let (driver, _rx) = SessionDriver::new(transport.clone(), test_config());
        start(&driver, &WorkspaceSession::local("/tmp/w"), "task");

        let sent = transport.sent();
        assert_eq!(sent[0], "command -v claude\n");
        assert_eq!(sent[1], "pwd\n");
        assert_eq!(sent[2], "claude\n");
    }

    #[test]
    fn full_run_walks_trust_inject_and_completion() {
        let transport = ScriptedTransport::new();
        let (driver, rx) = SessionDriver::new(transport.clone(), test_config());
        let id = start(&driver, &WorkspaceSession::local("/tmp/w"), "fix the bug");

        wait_for_event(&rx, |e| matches!(e, DriverEvent::TaskStarted), "task start");

        // Trust question: accepted with Enter.
        transport.push_window(
            &id,
            &["Do you trust the files in this folder?", "Enter to confirm"],
        );
        wait_for_event(&rx, |e| matches!(e, DriverEvent::ScreenUpdate { .. }), "screen");
        assert_eq!(transport.sent().last().unwrap(), keys::ENTER);

        // Fresh prompt: inject the task, then Enter.
        transport.push_window(&id, &["│ > Try \"something\""]);
        wait_for_event(&rx, |e| matches!(e, DriverEvent::ScreenUpdate { .. }), "screen");
        let sent = transport.sent();
        assert!(sent.contains(&"fix the bug".to_string()));
        assert_eq!(sent.last().unwrap(), keys::ENTER);

        // Working screen: nothing sent.
        let sent_before = transport.sent().len();
        transport.push_window(&id, &["✶ Working… (esc to interrupt)"]);
        wait_for_event(&rx, |e| matches!(e, DriverEvent::ScreenUpdate { .. }), "screen");
        assert_eq!(transport.sent().len(), sent_before);

        // Idle prompt without the hint: double end-of-input, completed.
        transport.push_window(&id, &["│ > "]);
        wait_for_event(&rx, |e| matches!(e, DriverEvent::TaskCompleted), "completion");
        let sent = transport.sent();
        assert_eq!(&sent[sent.len() - 2..], [keys::CTRL_D, keys::CTRL_D]);
    }

    #[test]
    fn prompt_injection_fires_at_most_once_per_run() {
        let transport = ScriptedTransport::new();
        let (driver, rx) = SessionDriver::new(transport.clone(), test_config());
        let id = start(&driver, &WorkspaceSession::local("/tmp/w"), "do it");

        transport.push_window(&id, &["> Try \"x\""]);
        wait_for_event(&rx, |e| matches!(e, DriverEvent::ScreenUpdate { .. }), "screen");
        let after_first = transport
            .sent()
            .iter()
            .filter(|s| s.as_str() == "do it")
            .count();
        assert_eq!(after_first, 1);

        // The same screen again: already injected, no second injection.
        transport.push_window(&id, &["> Try \"x\""]);
        wait_for_event(&rx, |e| matches!(e, DriverEvent::ScreenUpdate { .. }), "screen");
        let after_second = transport
            .sent()
            .iter()
            .filter(|s| s.as_str() == "do it")
            .count();
        assert_eq!(after_second, 1);
    }

    #[test]
    fn disconnect_mid_task_reports_an_error() {
        let transport = ScriptedTransport::new();
        let (driver, rx) = SessionDriver::new(transport.clone(), test_config());
        let id = start(&driver, &WorkspaceSession::local("/tmp/w"), "task");

        transport.disconnect(&id);
        let event = wait_for_event(
            &rx,
            |e| matches!(e, DriverEvent::TaskError { .. }),
            "task error",
        );
        assert!(matches!(event, DriverEvent::TaskError { message } if message.contains("disconnected")));
        assert!(!driver.is_running());
    }

    #[test]
    fn stop_task_interrupts_and_later_idle_prompt_readies_the_session() {
        let transport = ScriptedTransport::new();
        let (driver, rx) = SessionDriver::new(transport.clone(), test_config());
        let id = start(&driver, &WorkspaceSession::local("/tmp/w"), "task");

        driver.stop_task().expect("stop");
        assert_eq!(transport.sent().last().unwrap(), keys::CTRL_C);
        assert!(!driver.is_session_ready());

        // The tool settles back at its prompt: session becomes reusable.
        transport.push_window(&id, &["│ > "]);
        wait_for_event(&rx, |e| matches!(e, DriverEvent::SessionReady), "ready");
        assert!(driver.is_session_ready());

        // Reuse: a new task goes straight to injection on the same terminal.
        let mut reused = None;
        driver
            .start_task(&WorkspaceSession::local("/tmp/w"), "next task", |tid| {
                reused = Some(tid.clone())
            })
            .expect("reuse session");
        assert_eq!(reused, Some(id.clone()));
        assert!(!driver.is_session_ready());

        transport.push_window(&id, &["│ > "]);
        wait_for_event(&rx, |e| matches!(e, DriverEvent::ScreenUpdate { .. }), "screen");
        assert!(transport.sent().contains(&"next task".to_string()));
    }

    #[test]
    fn stop_task_without_active_task_fails() {
        let transport = ScriptedTransport::new();
        let (driver, _rx) = SessionDriver::new(transport, test_config());
        assert!(matches!(
            driver.stop_task(),
            Err(DriverError::NoActiveTask)
        ));
    }

    #[test]
    fn completion_hint_is_advisory_only() {
        let transport = ScriptedTransport::new();
        let (driver, rx) = SessionDriver::new(transport.clone(), test_config());
        let id = start(&driver, &WorkspaceSession::local("/tmp/w"), "task");

        transport.push_window(&id, &["all tests finished", "user@host:~/repo$"]);
        wait_for_event(&rx, |e| matches!(e, DriverEvent::CompletionHint), "hint");

        // The hint did not complete the task.
        assert!(driver.is_running());
        let err = driver.start_task(&WorkspaceSession::local("/tmp/w"), "x", |_| {});
        assert!(matches!(err, Err(DriverError::AlreadyRunning)));
    }

    #[test]
    fn cleanup_without_force_spares_an_active_task() {
        let transport = ScriptedTransport::new();
        let (driver, _rx) = SessionDriver::new(transport.clone(), test_config());
        start(&driver, &WorkspaceSession::local("/tmp/w"), "task");

        driver.cleanup(false);
        assert!(driver.is_running());

        driver.cleanup(true);
        assert!(!driver.is_running());
        assert!(driver.terminal_id().is_none());
    }
}
