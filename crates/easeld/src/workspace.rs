//! Filesystem collaborator: canvas working copies are plain directory
//! copies of the project root.

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("source is not a directory: {path}")]
    NotADirectory { path: PathBuf },
    #[error("filesystem operation failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn path_exists(path: &Path) -> bool {
    path.exists()
}

/// Recursively copy `src` into `dst` (created fresh). Symlinks are copied
/// as the files they point at.
pub fn copy_directory(src: &Path, dst: &Path) -> Result<(), WorkspaceError> {
    if !src.is_dir() {
        return Err(WorkspaceError::NotADirectory {
            path: src.to_path_buf(),
        });
    }
    fs::create_dir_all(dst).map_err(|source| WorkspaceError::Io {
        path: dst.to_path_buf(),
        source,
    })?;

    let entries = fs::read_dir(src).map_err(|source| WorkspaceError::Io {
        path: src.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| WorkspaceError::Io {
            path: src.to_path_buf(),
            source,
        })?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_directory(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|source| WorkspaceError::Io {
                path: from.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

pub fn delete_path(path: &Path) -> Result<(), WorkspaceError> {
    if !path.exists() {
        return Ok(());
    }
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_directory_replicates_nested_trees() {
        let root = tempfile::tempdir().expect("tempdir");
        let src = root.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "top").unwrap();
        fs::write(src.join("nested/b.txt"), "deep").unwrap();

        let dst = root.path().join("dst");
        copy_directory(&src, &dst).expect("copy");

        assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "top");
        assert_eq!(fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "deep");
    }

    #[test]
    fn copy_directory_rejects_files() {
        let root = tempfile::tempdir().expect("tempdir");
        let file = root.path().join("plain.txt");
        fs::write(&file, "x").unwrap();

        let err = copy_directory(&file, &root.path().join("out")).expect_err("should fail");
        assert!(matches!(err, WorkspaceError::NotADirectory { .. }));
    }

    #[test]
    fn delete_path_handles_files_dirs_and_absence() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = root.path().join("d");
        fs::create_dir_all(dir.join("inner")).unwrap();
        let file = root.path().join("f.txt");
        fs::write(&file, "x").unwrap();

        delete_path(&dir).expect("delete dir");
        delete_path(&file).expect("delete file");
        delete_path(&root.path().join("missing")).expect("missing is fine");

        assert!(!dir.exists());
        assert!(!file.exists());
    }
}
