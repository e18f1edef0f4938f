//! Screen-buffer reconstructor.
//!
//! Replays terminal events in arrival order into a line grid. Only the
//! driver instance owning a terminal applies events to its buffer.

use crate::events::{line_text, Line, TerminalEvent};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenBuffer {
    lines: Vec<Line>,
    cursor: (u16, u16),
}

impl ScreenBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// (line, col) of the last cursor position reported by the transport.
    pub fn cursor(&self) -> (u16, u16) {
        self.cursor
    }

    /// Apply one event. Events are never dropped and never fail; a patch
    /// beyond the current length pads with empty lines first.
    pub fn apply(&mut self, event: &TerminalEvent) {
        match event {
            TerminalEvent::ScreenUpdate {
                screen,
                cursor_line,
                cursor_col,
            } => {
                self.lines = screen.clone();
                self.cursor = (*cursor_line, *cursor_col);
            }
            TerminalEvent::NewLines { lines } => {
                self.lines.extend(lines.iter().cloned());
            }
            TerminalEvent::Patch { line, items } => {
                let index = *line as usize;
                if index >= self.lines.len() {
                    self.lines.resize_with(index + 1, Vec::new);
                }
                self.lines[index] = items.clone();
            }
            TerminalEvent::CursorMove { line, col } => {
                self.cursor = (*line, *col);
            }
        }
    }

    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a TerminalEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// The last `height` lines, in original order.
    pub fn visible_window(&self, height: usize) -> &[Line] {
        let start = self.lines.len().saturating_sub(height);
        &self.lines[start..]
    }

    pub fn line_text(&self, index: usize) -> Option<String> {
        self.lines.get(index).map(|line| line_text(line))
    }

    /// Text of the visible window, lines joined with `\n`.
    pub fn window_text(&self, height: usize) -> String {
        self.visible_window(height)
            .iter()
            .map(|line| line_text(line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
