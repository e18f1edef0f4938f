pub mod buffer;
pub mod error;
pub mod events;
pub mod pty;
pub mod transport;

pub use buffer::ScreenBuffer;
pub use error::TermError;
pub use events::{line_text, Color, Line, LineItem, TerminalEvent};
pub use pty::PtyTransport;
pub use transport::{TerminalHandle, TerminalMessage, TerminalSpec, TerminalTransport};
