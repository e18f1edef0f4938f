//! Typed git operations over a workspace session.

use easel_core::types::WorkspaceSession;

use crate::command::GitCli;
use crate::error::GitError;

/// Result of a commit attempt. "Nothing to commit" is an ordinary outcome,
/// never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { hash: String },
    NothingToCommit,
}

/// Result of merging a branch into the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeState {
    Clean,
    Conflicted { files: Vec<String> },
}

pub fn current_branch(git: &GitCli, session: &WorkspaceSession) -> Result<String, GitError> {
    let output = git.run(session, ["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

pub fn head_commit(git: &GitCli, session: &WorkspaceSession) -> Result<String, GitError> {
    let output = git.run(session, ["rev-parse", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

pub fn has_uncommitted_changes(
    git: &GitCli,
    session: &WorkspaceSession,
) -> Result<bool, GitError> {
    let output = git.run(session, ["status", "--porcelain"])?;
    Ok(!output.stdout.trim().is_empty())
}

pub fn add_all(git: &GitCli, session: &WorkspaceSession) -> Result<(), GitError> {
    git.run(session, ["add", "-A"])?;
    Ok(())
}

pub fn add_files(
    git: &GitCli,
    session: &WorkspaceSession,
    files: &[String],
) -> Result<(), GitError> {
    let mut args = vec!["add".to_string(), "--".to_string()];
    args.extend(files.iter().cloned());
    git.run(session, args)?;
    Ok(())
}

/// Discard working-tree changes to one file.
pub fn discard_file_changes(
    git: &GitCli,
    session: &WorkspaceSession,
    file: &str,
) -> Result<(), GitError> {
    git.run(session, ["checkout", "--", file])?;
    Ok(())
}

/// Hard-reset the working tree to a commit.
pub fn revert_to_commit(
    git: &GitCli,
    session: &WorkspaceSession,
    commit: &str,
) -> Result<(), GitError> {
    git.run(session, ["reset", "--hard", commit])?;
    Ok(())
}

pub fn create_branch(
    git: &GitCli,
    session: &WorkspaceSession,
    name: &str,
) -> Result<(), GitError> {
    git.run(session, ["checkout", "-b", name])?;
    Ok(())
}

/// Commit staged changes, classifying the empty case as an outcome.
pub fn commit(
    git: &GitCli,
    session: &WorkspaceSession,
    message: &str,
) -> Result<CommitOutcome, GitError> {
    match git.run(session, ["commit", "-m", message]) {
        Ok(_) => {
            let hash = head_commit(git, session)?;
            Ok(CommitOutcome::Committed { hash })
        }
        Err(GitError::CommandFailed { stdout, stderr, .. })
            if mentions_nothing_to_commit(&stdout) || mentions_nothing_to_commit(&stderr) =>
        {
            Ok(CommitOutcome::NothingToCommit)
        }
        Err(err) => Err(err),
    }
}

fn mentions_nothing_to_commit(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("nothing to commit")
        || lower.contains("nothing added to commit")
        || lower.contains("working tree clean")
}

/// Paths with unmerged index entries (conflicts still to resolve).
pub fn unmerged_paths(
    git: &GitCli,
    session: &WorkspaceSession,
) -> Result<Vec<String>, GitError> {
    let output = git.run(session, ["ls-files", "-u"])?;
    let mut files = Vec::new();
    for line in output.stdout.lines() {
        // Format: "<mode> <hash> <stage>\t<path>".
        let Some((_, path)) = line.split_once('\t') else {
            return Err(GitError::Parse {
                context: format!("unexpected ls-files -u line: {line}"),
            });
        };
        let path = path.to_string();
        if !files.contains(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Tracked files still containing conflict markers. Pattern-based, like the
/// rest of the completion detection.
pub fn conflict_marker_files(
    git: &GitCli,
    session: &WorkspaceSession,
) -> Result<Vec<String>, GitError> {
    match git.run(session, ["grep", "-l", "-e", "<<<<<<< ", "--"]) {
        Ok(output) => Ok(output.stdout.lines().map(str::to_string).collect()),
        // Exit status 1 means no matches.
        Err(GitError::CommandFailed {
            status: Some(1), ..
        }) => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

/// True while a started merge has not yet been committed.
pub fn merge_in_progress(git: &GitCli, session: &WorkspaceSession) -> bool {
    git.run(session, ["rev-parse", "-q", "--verify", "MERGE_HEAD"])
        .is_ok()
}

/// Merge `branch` into the current branch, reporting conflicts as a state
/// instead of an error.
pub fn merge_branch(
    git: &GitCli,
    session: &WorkspaceSession,
    branch: &str,
) -> Result<MergeState, GitError> {
    match git.run(session, ["merge", "--no-edit", branch]) {
        Ok(_) => Ok(MergeState::Clean),
        Err(GitError::CommandFailed { stdout, stderr, .. })
            if stdout.contains("CONFLICT")
                || stderr.contains("CONFLICT")
                || stdout.contains("Automatic merge failed") =>
        {
            let files = unmerged_paths(git, session)?;
            Ok(MergeState::Conflicted { files })
        }
        Err(err) => Err(err),
    }
}
