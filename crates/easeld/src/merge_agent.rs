//! Merge background agent — a bounded-retry loop that drives the CLI tool
//! to resolve merge conflicts between a canvas branch and the project root.

use std::sync::Arc;
use std::time::Duration;

use easel_core::agent::{AgentStatus, MergeContext};
use easel_core::config::DriverConfig;
use easel_core::types::{ProcessId, WorkspaceSession};
use easel_driver::{DriverEvent, DriverInstance, ProcessRegistry, SessionDriver};
use easel_git::{
    add_all, commit, conflict_marker_files, current_branch, merge_branch, merge_in_progress,
    unmerged_paths, CommitOutcome, GitCli, GitError, MergeState,
};
use easel_term::TerminalTransport;

#[derive(Debug, thiserror::Error)]
pub enum MergeAgentError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("driver failed to start: {message}")]
    DriverStart { message: String },
    #[error("merge attempt timed out after {secs} seconds")]
    AttemptTimeout { secs: u64 },
}

/// How one driver run inside a merge attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverOutcome {
    Completed,
    /// The run errored; whatever it left behind is still committed and
    /// re-checked.
    Error(String),
    TimedOut,
}

/// Seam between the merge loop and the TUI automation driver, so tests can
/// resolve conflicts without a terminal.
pub trait ResolverDriver: Send {
    fn run_task(
        &mut self,
        session: &WorkspaceSession,
        prompt: &str,
        timeout: Duration,
    ) -> Result<ResolverOutcome, MergeAgentError>;
}

/// Production resolver: one fresh driver task per merge attempt, registered
/// for its lifetime and torn down afterwards.
pub struct TuiResolver {
    transport: Arc<dyn TerminalTransport>,
    config: DriverConfig,
    registry: Arc<ProcessRegistry>,
    run_seq: u64,
}

impl TuiResolver {
    pub fn new(
        transport: Arc<dyn TerminalTransport>,
        config: DriverConfig,
        registry: Arc<ProcessRegistry>,
    ) -> Self {
        Self {
            transport,
            config,
            registry,
            run_seq: 0,
        }
    }
}

impl ResolverDriver for TuiResolver {
    fn run_task(
        &mut self,
        session: &WorkspaceSession,
        prompt: &str,
        timeout: Duration,
    ) -> Result<ResolverOutcome, MergeAgentError> {
        let (driver, events) = SessionDriver::new(self.transport.clone(), self.config.clone());
        let process_id = ProcessId::new(format!("merge-run-{}", self.run_seq));
        self.run_seq += 1;

        self.registry
            .register(process_id.clone(), driver.clone() as Arc<dyn DriverInstance>);

        let started = driver.start_task(session, prompt, |_| {});
        if let Err(err) = started {
            self.registry.unregister(&process_id);
            return Err(MergeAgentError::DriverStart {
                message: err.to_string(),
            });
        }

        let deadline = std::time::Instant::now() + timeout;
        let outcome = loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break ResolverOutcome::TimedOut;
            }
            match events.recv_timeout(remaining) {
                Ok(DriverEvent::TaskCompleted) => break ResolverOutcome::Completed,
                Ok(DriverEvent::TaskError { message }) => break ResolverOutcome::Error(message),
                Ok(_) => continue,
                Err(_) => break ResolverOutcome::TimedOut,
            }
        };

        driver.cleanup(true);
        self.registry.unregister(&process_id);
        Ok(outcome)
    }
}

/// Drives one merge context to completion or failure.
pub struct MergeAgentRunner<'a> {
    pub git: &'a GitCli,
    pub attempt_timeout: Duration,
}

impl MergeAgentRunner<'_> {
    /// Detect both branch names. The root falls back to "main", the canvas
    /// to the root's resolved name.
    pub fn setup(&self, ctx: &mut MergeContext) -> Result<(), MergeAgentError> {
        ctx.root_branch = current_branch(self.git, &ctx.root_session)
            .unwrap_or_else(|_| "main".to_string());
        ctx.canvas_branch = current_branch(self.git, &ctx.canvas_session)
            .unwrap_or_else(|_| ctx.root_branch.clone());
        Ok(())
    }

    /// Is the merge already clean? Updates the context's conflict list as a
    /// side effect. Clean means: no unmerged index entries, no files left
    /// holding conflict markers, and any in-progress merge committed.
    pub fn check_completion(&self, ctx: &mut MergeContext) -> Result<bool, MergeAgentError> {
        let conflicts = unmerged_paths(self.git, &ctx.canvas_session)?;
        if !conflicts.is_empty() {
            ctx.conflict_files = conflicts;
            return Ok(false);
        }

        let markers = conflict_marker_files(self.git, &ctx.canvas_session)?;
        if !markers.is_empty() {
            ctx.conflict_files = markers;
            return Ok(false);
        }

        if merge_in_progress(self.git, &ctx.canvas_session) {
            // Conflicts resolved and staged; conclude the merge.
            let message = format!("Merge {} into {}", ctx.root_branch, ctx.canvas_branch);
            commit(self.git, &ctx.canvas_session, &message)?;
            ctx.conflict_files.clear();
            return Ok(true);
        }

        match merge_branch(self.git, &ctx.canvas_session, &ctx.root_branch)? {
            MergeState::Clean => {
                ctx.conflict_files.clear();
                Ok(true)
            }
            MergeState::Conflicted { files } => {
                ctx.conflict_files = files;
                Ok(false)
            }
        }
    }

    /// Conflict instructions plus the canvas's accumulated prompt history.
    pub fn build_prompt(&self, ctx: &MergeContext) -> String {
        let mut prompt = format!(
            "Resolve the git merge conflicts in this repository. Branch '{}' is being merged \
             into '{}'. Keep the intent of both sides, stage every resolved file with git add, \
             and do not commit.",
            ctx.root_branch, ctx.canvas_branch
        );
        if !ctx.conflict_files.is_empty() {
            prompt.push_str("\nConflicted files:");
            for file in &ctx.conflict_files {
                prompt.push_str("\n- ");
                prompt.push_str(file);
            }
        }
        if !ctx.history.is_empty() {
            prompt.push_str("\nEarlier tasks on this branch, oldest first:");
            for entry in &ctx.history {
                prompt.push_str("\n- ");
                prompt.push_str(entry);
            }
        }
        prompt
    }

    /// Run the bounded-retry loop. Returns whether the merge completed
    /// within the attempt budget; `observe` sees every status transition.
    pub fn run(
        &self,
        ctx: &mut MergeContext,
        resolver: &mut dyn ResolverDriver,
        mut observe: impl FnMut(AgentStatus),
    ) -> Result<bool, MergeAgentError> {
        observe(AgentStatus::Checking);
        self.setup(ctx)?;
        if self.check_completion(ctx)? {
            return Ok(true);
        }

        while !ctx.attempts_exhausted() {
            ctx.attempts += 1;
            observe(AgentStatus::Running);

            let prompt = self.build_prompt(ctx);
            let outcome =
                resolver.run_task(&ctx.canvas_session, &prompt, self.attempt_timeout)?;
            match outcome {
                ResolverOutcome::Completed => {}
                // A failed run may still have resolved something; commit and
                // re-check rather than discarding the attempt.
                ResolverOutcome::Error(_) => {}
                ResolverOutcome::TimedOut => {
                    return Err(MergeAgentError::AttemptTimeout {
                        secs: self.attempt_timeout.as_secs(),
                    });
                }
            }

            add_all(self.git, &ctx.canvas_session)?;
            let message = format!(
                "Merge {} into {} (attempt {})",
                ctx.root_branch, ctx.canvas_branch, ctx.attempts
            );
            // "Nothing to commit" is a normal outcome here.
            let _: CommitOutcome = commit(self.git, &ctx.canvas_session, &message)?;

            observe(AgentStatus::Checking);
            if self.check_completion(ctx)? {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easel_core::types::WorkspaceSession;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;

    fn run_git(cwd: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn init_repo(root: &Path) {
        fs::create_dir_all(root).expect("create repo dir");
        run_git(root, &["init", "-b", "main"]);
        run_git(root, &["config", "user.name", "Test User"]);
        run_git(root, &["config", "user.email", "test@example.com"]);
        fs::write(root.join("shared.txt"), "base\n").expect("write");
        run_git(root, &["add", "shared.txt"]);
        run_git(root, &["commit", "-m", "base"]);
    }

    /// Root repo plus a canvas clone whose branch conflicts with root.
    fn conflicting_pair(dir: &Path) -> (PathBuf, PathBuf) {
        let root = dir.join("root");
        init_repo(&root);

        let canvas = dir.join("canvas");
        run_git(dir, &["clone", root.to_str().unwrap(), "canvas"]);
        run_git(&canvas, &["config", "user.name", "Test User"]);
        run_git(&canvas, &["config", "user.email", "test@example.com"]);
        run_git(&canvas, &["checkout", "-b", "canvas/feature"]);
        fs::write(canvas.join("shared.txt"), "canvas version\n").expect("write");
        run_git(&canvas, &["commit", "-am", "canvas change"]);

        // Diverge root after the clone, then bring the commit into the
        // canvas repo so the branch name resolves locally.
        fs::write(root.join("shared.txt"), "root version\n").expect("write");
        run_git(&root, &["commit", "-am", "root change"]);
        run_git(&canvas, &["fetch", "origin"]);
        run_git(&canvas, &["branch", "-f", "main", "origin/main"]);

        (root, canvas)
    }

    struct FixingResolver {
        resolution: &'static str,
        calls: u32,
    }

    impl ResolverDriver for FixingResolver {
        fn run_task(
            &mut self,
            session: &WorkspaceSession,
            prompt: &str,
            _timeout: Duration,
        ) -> Result<ResolverOutcome, MergeAgentError> {
            self.calls += 1;
            assert!(prompt.contains("shared.txt"));
            fs::write(session.path().join("shared.txt"), self.resolution).unwrap();
            run_git(session.path(), &["add", "shared.txt"]);
            Ok(ResolverOutcome::Completed)
        }
    }

    struct UselessResolver {
        calls: u32,
    }

    impl ResolverDriver for UselessResolver {
        fn run_task(
            &mut self,
            _session: &WorkspaceSession,
            _prompt: &str,
            _timeout: Duration,
        ) -> Result<ResolverOutcome, MergeAgentError> {
            self.calls += 1;
            Ok(ResolverOutcome::Error("no progress".to_string()))
        }
    }

    fn runner(git: &GitCli) -> MergeAgentRunner<'_> {
        MergeAgentRunner {
            git,
            attempt_timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn setup_detects_branches_with_fallbacks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (root, canvas) = conflicting_pair(dir.path());
        let git = GitCli::default();

        let mut ctx = MergeContext::new(
            WorkspaceSession::local(&root),
            WorkspaceSession::local(&canvas),
        );
        runner(&git).setup(&mut ctx).expect("setup");
        assert_eq!(ctx.root_branch, "main");
        assert_eq!(ctx.canvas_branch, "canvas/feature");

        // Detection failure falls back to "main" and then to the root name.
        let mut ctx = MergeContext::new(
            WorkspaceSession::local(dir.path().join("missing-a")),
            WorkspaceSession::local(dir.path().join("missing-b")),
        );
        runner(&git).setup(&mut ctx).expect("setup");
        assert_eq!(ctx.root_branch, "main");
        assert_eq!(ctx.canvas_branch, "main");
    }

    #[test]
    fn conflicting_merge_resolves_within_one_attempt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (root, canvas) = conflicting_pair(dir.path());
        let git = GitCli::default();

        let mut ctx = MergeContext::new(
            WorkspaceSession::local(&root),
            WorkspaceSession::local(&canvas),
        );
        let mut resolver = FixingResolver {
            resolution: "merged version\n",
            calls: 0,
        };
        let mut statuses = Vec::new();

        let completed = runner(&git)
            .run(&mut ctx, &mut resolver, |s| statuses.push(s))
            .expect("run");

        assert!(completed);
        assert_eq!(resolver.calls, 1);
        assert_eq!(ctx.attempts, 1);
        assert!(ctx.conflict_files.is_empty());
        assert_eq!(
            fs::read_to_string(canvas.join("shared.txt")).unwrap(),
            "merged version\n"
        );
        assert!(!merge_in_progress(&git, &WorkspaceSession::local(&canvas)));
        assert_eq!(statuses.first(), Some(&AgentStatus::Checking));
        assert!(statuses.contains(&AgentStatus::Running));
    }

    #[test]
    fn clean_merge_completes_without_invoking_the_resolver() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        init_repo(&root);

        let canvas = dir.path().join("canvas");
        run_git(dir.path(), &["clone", root.to_str().unwrap(), "canvas"]);
        run_git(&canvas, &["config", "user.name", "Test User"]);
        run_git(&canvas, &["config", "user.email", "test@example.com"]);
        run_git(&canvas, &["checkout", "-b", "canvas/feature"]);
        fs::write(canvas.join("new.txt"), "addition\n").expect("write");
        run_git(&canvas, &["add", "new.txt"]);
        run_git(&canvas, &["commit", "-m", "non-conflicting"]);

        let git = GitCli::default();
        let mut ctx = MergeContext::new(
            WorkspaceSession::local(&root),
            WorkspaceSession::local(&canvas),
        );
        let mut resolver = UselessResolver { calls: 0 };

        let completed = runner(&git)
            .run(&mut ctx, &mut resolver, |_| {})
            .expect("run");

        assert!(completed);
        assert_eq!(resolver.calls, 0);
        assert_eq!(ctx.attempts, 0);
    }

    #[test]
    fn useless_resolver_exhausts_the_attempt_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (root, canvas) = conflicting_pair(dir.path());
        let git = GitCli::default();

        let mut ctx = MergeContext::new(
            WorkspaceSession::local(&root),
            WorkspaceSession::local(&canvas),
        );
        let mut resolver = UselessResolver { calls: 0 };

        let completed = runner(&git)
            .run(&mut ctx, &mut resolver, |_| {})
            .expect("run");

        assert!(!completed);
        assert_eq!(resolver.calls, 3);
        assert_eq!(ctx.attempts, 3);
        assert!(!ctx.conflict_files.is_empty());
    }

    #[test]
    fn timeout_is_a_fatal_error_not_a_silent_retry() {
        struct TimingOutResolver;
        impl ResolverDriver for TimingOutResolver {
            fn run_task(
                &mut self,
                _session: &WorkspaceSession,
                _prompt: &str,
                _timeout: Duration,
            ) -> Result<ResolverOutcome, MergeAgentError> {
                Ok(ResolverOutcome::TimedOut)
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let (root, canvas) = conflicting_pair(dir.path());
        let git = GitCli::default();

        let mut ctx = MergeContext::new(
            WorkspaceSession::local(&root),
            WorkspaceSession::local(&canvas),
        );
        let err = runner(&git)
            .run(&mut ctx, &mut TimingOutResolver, |_| {})
            .expect_err("timeout must abort");
        assert!(matches!(err, MergeAgentError::AttemptTimeout { .. }));
        assert_eq!(ctx.attempts, 1);
    }

    #[test]
    fn nothing_to_commit_does_not_abort_the_loop() {
        // The second attempt leaves nothing behind (its commit reports
        // "nothing to commit"); the loop proceeds to the third attempt,
        // which resolves the conflict.
        struct ThirdTryResolver {
            calls: u32,
        }
        impl ResolverDriver for ThirdTryResolver {
            fn run_task(
                &mut self,
                session: &WorkspaceSession,
                _prompt: &str,
                _timeout: Duration,
            ) -> Result<ResolverOutcome, MergeAgentError> {
                self.calls += 1;
                if self.calls >= 3 {
                    fs::write(session.path().join("shared.txt"), "third try\n").unwrap();
                    run_git(session.path(), &["add", "shared.txt"]);
                }
                Ok(ResolverOutcome::Completed)
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let (root, canvas) = conflicting_pair(dir.path());
        let git = GitCli::default();

        let mut ctx = MergeContext::new(
            WorkspaceSession::local(&root),
            WorkspaceSession::local(&canvas),
        );
        let mut resolver = ThirdTryResolver { calls: 0 };

        let completed = runner(&git)
            .run(&mut ctx, &mut resolver, |_| {})
            .expect("run");

        assert!(completed);
        assert_eq!(resolver.calls, 3);
        assert_eq!(ctx.attempts, 3);
        assert_eq!(
            fs::read_to_string(canvas.join("shared.txt")).unwrap(),
            "third try\n"
        );
    }

    #[test]
    fn build_prompt_lists_conflicts_and_history() {
        let git = GitCli::default();
        let mut ctx = MergeContext::new(
            WorkspaceSession::local("/tmp/root"),
            WorkspaceSession::local("/tmp/canvas"),
        );
        ctx.root_branch = "main".to_string();
        ctx.canvas_branch = "canvas/feature".to_string();
        ctx.conflict_files = vec!["src/lib.rs".to_string()];
        ctx.history = vec!["add the parser".to_string(), "fix the tests".to_string()];

        let prompt = runner(&git).build_prompt(&ctx);
        assert!(prompt.contains("'main'"));
        assert!(prompt.contains("'canvas/feature'"));
        assert!(prompt.contains("- src/lib.rs"));
        assert!(prompt.contains("- add the parser"));
        assert!(prompt.contains("- fix the tests"));
    }
}
