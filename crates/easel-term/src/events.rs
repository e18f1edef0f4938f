//! Terminal event protocol.
//!
//! The transport emits these events; the screen buffer replays them in
//! arrival order to rebuild the visible line grid. Field and variant names
//! follow the transport's wire format.

use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    Default,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
    Extended(u8),
    Rgb(u8, u8, u8),
}

/// One styled run of text within a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub lexeme: String,
    pub width: u16,
    #[serde(default)]
    pub is_bold: bool,
    #[serde(default)]
    pub is_italic: bool,
    #[serde(default)]
    pub is_underline: bool,
    #[serde(default)]
    pub foreground_color: Option<Color>,
    #[serde(default)]
    pub background_color: Option<Color>,
}

impl LineItem {
    /// An unstyled item with its display width computed from the text.
    pub fn plain(lexeme: impl Into<String>) -> Self {
        let lexeme = lexeme.into();
        Self {
            width: UnicodeWidthStr::width(lexeme.as_str()) as u16,
            lexeme,
            is_bold: false,
            is_italic: false,
            is_underline: false,
            foreground_color: None,
            background_color: None,
        }
    }
}

/// A line is an ordered sequence of styled items.
pub type Line = Vec<LineItem>;

/// Concatenated text of one line.
pub fn line_text(line: &[LineItem]) -> String {
    line.iter().map(|item| item.lexeme.as_str()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TerminalEvent {
    /// Replace the whole buffer (bulk redraw).
    #[serde(rename = "screenUpdate")]
    ScreenUpdate {
        screen: Vec<Line>,
        cursor_line: u16,
        cursor_col: u16,
    },
    /// Append lines at the end (normal scroll/output).
    #[serde(rename = "newLines")]
    NewLines { lines: Vec<Line> },
    /// Replace exactly one line in place.
    #[serde(rename = "patch")]
    Patch { line: u64, items: Vec<LineItem> },
    /// Cursor moved; buffer contents untouched.
    #[serde(rename = "cursorMove")]
    CursorMove { line: u16, col: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_item_computes_display_width() {
        assert_eq!(LineItem::plain("hello").width, 5);
        assert_eq!(LineItem::plain("").width, 0);
        // Wide CJK characters take two columns each.
        assert_eq!(LineItem::plain("日本").width, 4);
    }

    #[test]
    fn line_text_concatenates_lexemes() {
        let line = vec![LineItem::plain("$ "), LineItem::plain("claude")];
        assert_eq!(line_text(&line), "$ claude");
    }

    #[test]
    fn events_serialize_with_wire_tags() {
        let event = TerminalEvent::NewLines {
            lines: vec![vec![LineItem::plain("ok")]],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"newLines\""));

        let event = TerminalEvent::Patch {
            line: 3,
            items: vec![LineItem::plain("> ")],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"patch\""));

        let decoded: TerminalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn cursor_move_roundtrips() {
        let event = TerminalEvent::CursorMove { line: 5, col: 12 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"cursorMove\""));
        let decoded: TerminalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }
}
