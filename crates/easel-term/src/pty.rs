//! PTY-backed terminal transport.
//!
//! Opens a pseudo-terminal, spawns the session shell inside it, and pumps
//! its output through a reader thread into terminal events. Escape
//! sequences are stripped, not rendered: the consumers only pattern-match
//! text and rebuild a line grid.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use unicode_width::UnicodeWidthStr;

use easel_core::types::{TerminalId, WorkspaceSession};

use crate::error::TermError;
use crate::events::{LineItem, TerminalEvent};
use crate::transport::{TerminalHandle, TerminalMessage, TerminalSpec, TerminalTransport};

const TAB_STOP: usize = 4;

struct PtyEntry {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn std::io::Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

pub struct PtyTransport {
    shell: String,
    entries: Mutex<HashMap<String, PtyEntry>>,
    next_id: Mutex<u64>,
}

impl PtyTransport {
    pub fn new() -> Arc<Self> {
        Self::with_shell(default_shell())
    }

    pub fn with_shell(shell: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            shell: shell.into(),
            entries: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        })
    }

    fn allocate_id(&self) -> TerminalId {
        let mut next = self.next_id.lock().unwrap();
        let id = TerminalId::new(format!("term-{}", *next));
        *next += 1;
        id
    }

    fn build_command(&self, spec: &TerminalSpec) -> CommandBuilder {
        let mut cmd = match &spec.session {
            WorkspaceSession::Local { path } => {
                let mut c = CommandBuilder::new(&self.shell);
                c.arg("-i");
                c.cwd(path);
                c
            }
            WorkspaceSession::Distribution { name, path } => {
                let mut c = CommandBuilder::new("wsl");
                c.arg("-d");
                c.arg(name);
                c.arg("--cd");
                c.arg(path);
                c
            }
        };

        if let Some(shell_command) = &spec.shell_command {
            cmd.arg("-c");
            cmd.arg(shell_command);
        }
        for (key, value) in &spec.environment {
            cmd.env(key, value);
        }
        cmd
    }
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "bash".to_string())
}

impl TerminalTransport for PtyTransport {
    fn connect(&self, spec: &TerminalSpec) -> Result<TerminalHandle, TermError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: spec.lines,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| TermError::PtySetup {
                message: err.to_string(),
            })?;

        let child = pair
            .slave
            .spawn_command(self.build_command(spec))
            .map_err(|err| TermError::Spawn {
                message: err.to_string(),
            })?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| TermError::PtySetup {
                message: err.to_string(),
            })?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| TermError::PtySetup {
                message: err.to_string(),
            })?;

        let id = self.allocate_id();
        let (tx, rx) = mpsc::channel::<TerminalMessage>();

        thread::spawn(move || {
            let mut assembler = LineAssembler::new();
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        let events = assembler.feed(&text);
                        if !events.is_empty() && tx.send(TerminalMessage::Events(events)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = tx.send(TerminalMessage::Disconnected);
        });

        self.entries.lock().unwrap().insert(
            id.0.clone(),
            PtyEntry {
                master: pair.master,
                writer,
                child,
            },
        );

        Ok(TerminalHandle { id, messages: rx })
    }

    fn send_raw_input(&self, id: &TerminalId, data: &str) -> Result<(), TermError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&id.0)
            .ok_or_else(|| TermError::NotConnected { id: id.clone() })?;
        entry
            .writer
            .write_all(data.as_bytes())
            .and_then(|_| entry.writer.flush())
            .map_err(|source| TermError::Write {
                id: id.clone(),
                source,
            })
    }

    fn resize(&self, id: &TerminalId, lines: u16, cols: u16) -> Result<(), TermError> {
        let entries = self.entries.lock().unwrap();
        let entry = entries
            .get(&id.0)
            .ok_or_else(|| TermError::NotConnected { id: id.clone() })?;
        entry
            .master
            .resize(PtySize {
                rows: lines,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| TermError::Resize {
                id: id.clone(),
                message: err.to_string(),
            })
    }

    fn kill(&self, id: &TerminalId) -> Result<(), TermError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(mut entry) = entries.remove(&id.0) else {
            return Err(TermError::NotConnected { id: id.clone() });
        };
        let _ = entry.child.kill();
        Ok(())
    }

    fn is_alive(&self, id: &TerminalId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        entries
            .get_mut(&id.0)
            .map(|entry| matches!(entry.child.try_wait(), Ok(None)))
            .unwrap_or(false)
    }
}

/// Turns a raw output stream into line-grid events.
///
/// Completed lines arrive as `NewLines`; an in-progress last line (no
/// trailing newline yet, e.g. a prompt) is published as a `Patch` of its
/// index and re-patched as more bytes arrive. A carriage return restarts
/// the in-progress line, which is how interactive tools redraw it.
struct LineAssembler {
    next_line: u64,
    partial: String,
    partial_published: bool,
}

impl LineAssembler {
    fn new() -> Self {
        Self {
            next_line: 0,
            partial: String::new(),
            partial_published: false,
        }
    }

    fn feed(&mut self, raw: &str) -> Vec<TerminalEvent> {
        let text = strip_escape_sequences(raw);
        let mut events = Vec::new();
        let mut completed: Vec<Vec<LineItem>> = Vec::new();

        for ch in text.chars() {
            match ch {
                '\n' => {
                    let line = vec![LineItem::plain(std::mem::take(&mut self.partial))];
                    if self.partial_published {
                        // The line already exists in the grid; finalize it
                        // in place rather than appending a duplicate.
                        self.flush_new_lines(&mut completed, &mut events);
                        events.push(TerminalEvent::Patch {
                            line: self.next_line,
                            items: line,
                        });
                    } else {
                        completed.push(line);
                    }
                    self.partial_published = false;
                    self.next_line += 1;
                }
                '\r' => {
                    self.partial.clear();
                }
                '\t' => {
                    let col = UnicodeWidthStr::width(self.partial.as_str());
                    let pad = TAB_STOP - (col % TAB_STOP);
                    self.partial.push_str(&" ".repeat(pad));
                }
                ch if ch.is_control() => {}
                ch => self.partial.push(ch),
            }
        }

        self.flush_new_lines(&mut completed, &mut events);

        if !self.partial.is_empty() || self.partial_published {
            events.push(TerminalEvent::Patch {
                line: self.next_line,
                items: vec![LineItem::plain(self.partial.clone())],
            });
            self.partial_published = true;
        }

        events
    }

    fn flush_new_lines(
        &mut self,
        completed: &mut Vec<Vec<LineItem>>,
        events: &mut Vec<TerminalEvent>,
    ) {
        if !completed.is_empty() {
            events.push(TerminalEvent::NewLines {
                lines: std::mem::take(completed),
            });
        }
    }
}

/// Drop ANSI/VT escape sequences, keeping printable text and line controls.
fn strip_escape_sequences(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\u{1b}' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            // CSI: parameters then one final byte in 0x40..=0x7e.
            Some('[') => {
                for follow in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&follow) {
                        break;
                    }
                }
            }
            // OSC: terminated by BEL or ESC \.
            Some(']') => {
                while let Some(follow) = chars.next() {
                    if follow == '\u{07}' {
                        break;
                    }
                    if follow == '\u{1b}' {
                        chars.next();
                        break;
                    }
                }
            }
            // Two-byte sequences (ESC c, ESC =, ...): skip the byte.
            Some(_) => {}
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ScreenBuffer;

    fn feed_into_buffer(chunks: &[&str]) -> ScreenBuffer {
        let mut assembler = LineAssembler::new();
        let mut buffer = ScreenBuffer::new();
        for chunk in chunks {
            for event in assembler.feed(chunk) {
                buffer.apply(&event);
            }
        }
        buffer
    }

    #[test]
    fn strip_escape_sequences_removes_csi_and_osc() {
        assert_eq!(strip_escape_sequences("\u{1b}[31mred\u{1b}[0m"), "red");
        assert_eq!(strip_escape_sequences("\u{1b}]0;title\u{07}rest"), "rest");
        assert_eq!(strip_escape_sequences("plain"), "plain");
    }

    #[test]
    fn completed_lines_become_new_lines() {
        let buffer = feed_into_buffer(&["one\ntwo\n"]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.line_text(0).unwrap(), "one");
        assert_eq!(buffer.line_text(1).unwrap(), "two");
    }

    #[test]
    fn trailing_partial_line_is_patched_in_place() {
        let buffer = feed_into_buffer(&["out\n> "]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.line_text(1).unwrap(), "> ");

        // More bytes extend the same line rather than appending a new one.
        let buffer = feed_into_buffer(&["out\n> ", "claude"]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.line_text(1).unwrap(), "> claude");
    }

    #[test]
    fn newline_after_published_partial_finalizes_in_place() {
        let buffer = feed_into_buffer(&["> half", "done\nnext\n"]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.line_text(0).unwrap(), "> halfdone");
        assert_eq!(buffer.line_text(1).unwrap(), "next");
    }

    #[test]
    fn carriage_return_restarts_the_current_line() {
        let buffer = feed_into_buffer(&["progress 10%\rprogress 90%"]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.line_text(0).unwrap(), "progress 90%");
    }

    #[test]
    fn tabs_expand_to_the_next_stop() {
        let buffer = feed_into_buffer(&["ab\tc\n"]);
        assert_eq!(buffer.line_text(0).unwrap(), "ab  c");
    }

    #[test]
    fn styled_noise_does_not_break_line_accounting() {
        let buffer = feed_into_buffer(&["\u{1b}[2J\u{1b}[1;1Hhello\n\u{1b}[32m$\u{1b}[0m "]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.line_text(0).unwrap(), "hello");
        assert_eq!(buffer.line_text(1).unwrap(), "$ ");
    }
}
