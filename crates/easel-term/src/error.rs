use easel_core::types::TerminalId;

#[derive(Debug, thiserror::Error)]
pub enum TermError {
    #[error("pty setup failed: {message}")]
    PtySetup { message: String },
    #[error("terminal spawn failed: {message}")]
    Spawn { message: String },
    #[error("no terminal connection with id {id}")]
    NotConnected { id: TerminalId },
    #[error("terminal write failed ({id}): {source}")]
    Write {
        id: TerminalId,
        #[source]
        source: std::io::Error,
    },
    #[error("terminal resize failed ({id}): {message}")]
    Resize { id: TerminalId, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_names_the_terminal() {
        let err = TermError::NotConnected {
            id: TerminalId::new("t-9"),
        };
        assert_eq!(err.to_string(), "no terminal connection with id t-9");
    }

    #[test]
    fn write_error_keeps_io_source() {
        use std::error::Error;
        let err = TermError::Write {
            id: TerminalId::new("t-1"),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"),
        };
        assert!(err.to_string().contains("terminal write failed (t-1)"));
        assert!(err.source().is_some());
    }
}
