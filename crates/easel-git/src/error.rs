use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git command returned non-zero exit ({command}) status={status:?}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("git command output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8Output {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
    #[error("invalid git output: {context}")]
    Parse { context: String },
}

#[cfg(test)]
mod tests {
    use super::GitError;
    use std::error::Error;

    #[test]
    fn io_variant_includes_command_and_source() {
        let err = GitError::Io {
            command: "git status".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing binary"),
        };
        assert!(err.to_string().contains("git command failed to start"));
        assert!(err.source().is_some());
    }

    #[test]
    fn command_failed_variant_mentions_status() {
        let err = GitError::CommandFailed {
            command: "git merge feature".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "CONFLICT".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("git merge feature"));
        assert!(rendered.contains("status=Some(1)"));
    }
}
