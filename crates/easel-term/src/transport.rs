//! Terminal transport contract.
//!
//! The driver talks to terminals only through this trait, so tests can
//! substitute a scripted transport for the real PTY.

use std::collections::HashMap;
use std::sync::mpsc;

use easel_core::types::{TerminalId, WorkspaceSession};

use crate::error::TermError;
use crate::events::TerminalEvent;

/// What a caller asks the transport to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSpec {
    pub session: WorkspaceSession,
    pub lines: u16,
    pub cols: u16,
    /// Command run inside the shell instead of an interactive prompt.
    pub shell_command: Option<String>,
    pub environment: HashMap<String, String>,
}

impl TerminalSpec {
    pub fn new(session: WorkspaceSession, lines: u16, cols: u16) -> Self {
        Self {
            session,
            lines,
            cols,
            shell_command: None,
            environment: HashMap::new(),
        }
    }
}

/// One delivery from the transport to the terminal's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalMessage {
    Events(Vec<TerminalEvent>),
    Disconnected,
}

/// A connected terminal: its id plus the ordered message stream.
#[derive(Debug)]
pub struct TerminalHandle {
    pub id: TerminalId,
    pub messages: mpsc::Receiver<TerminalMessage>,
}

pub trait TerminalTransport: Send + Sync {
    fn connect(&self, spec: &TerminalSpec) -> Result<TerminalHandle, TermError>;

    fn send_raw_input(&self, id: &TerminalId, data: &str) -> Result<(), TermError>;

    fn resize(&self, id: &TerminalId, lines: u16, cols: u16) -> Result<(), TermError>;

    fn kill(&self, id: &TerminalId) -> Result<(), TermError>;

    fn is_alive(&self, id: &TerminalId) -> bool;

    /// Send one line of input followed by a newline.
    fn send_input_line(&self, id: &TerminalId, line: &str) -> Result<(), TermError> {
        self.send_raw_input(id, &format!("{line}\n"))
    }

    fn send_ctrl_c(&self, id: &TerminalId) -> Result<(), TermError> {
        self.send_raw_input(id, "\x03")
    }

    fn send_ctrl_d(&self, id: &TerminalId) -> Result<(), TermError> {
        self.send_raw_input(id, "\x04")
    }
}
