//! Append-only JSONL event log: one global file plus one file per canvas.

use easel_core::events::CanvasEvent;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize event: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to log file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlEventLog {
    pub root: PathBuf,
    pub global_file: PathBuf,
    pub canvas_dir: PathBuf,
}

impl JsonlEventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let global_file = root.join("global.jsonl");
        let canvas_dir = root.join("canvases");
        Self {
            root,
            global_file,
            canvas_dir,
        }
    }

    pub fn ensure_layout(&self) -> Result<(), EventLogError> {
        fs::create_dir_all(&self.root).map_err(|source| EventLogError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        fs::create_dir_all(&self.canvas_dir).map_err(|source| EventLogError::CreateDir {
            path: self.canvas_dir.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn append_global(&self, event: &CanvasEvent) -> Result<(), EventLogError> {
        append_json_line(&self.global_file, event)
    }

    pub fn append_canvas(&self, event: &CanvasEvent) -> Result<(), EventLogError> {
        if let Some(canvas_id) = &event.canvas_id {
            let file = self.canvas_dir.join(format!("{}.jsonl", canvas_id.0));
            append_json_line(&file, event)?;
        }
        Ok(())
    }

    pub fn append_both(&self, event: &CanvasEvent) -> Result<(), EventLogError> {
        self.ensure_layout()?;
        self.append_global(event)?;
        self.append_canvas(event)?;
        Ok(())
    }

    pub fn canvas_log_path(&self, canvas_id: &str) -> PathBuf {
        self.canvas_dir.join(format!("{canvas_id}.jsonl"))
    }

    pub fn global_log_path(&self) -> &Path {
        self.global_file.as_path()
    }
}

fn append_json_line(path: &Path, event: &CanvasEvent) -> Result<(), EventLogError> {
    let line =
        serde_json::to_string(event).map_err(|source| EventLogError::Serialize { source })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;

    file.write_all(line.as_bytes())
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;
    file.write_all(b"\n").map_err(|source| EventLogError::Append {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
