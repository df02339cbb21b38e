//! Git CLI wrapper for operations that touch the network or the working tree.
//!
//! Reads (status, refs, remotes, blobs) go through libgit2 in [`super::repo`];
//! everything that fetches, merges, resets or checks out runs the system git
//! so that credentials helpers, shallow clones and merge drivers behave the
//! way the operator expects.

use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Path exists but is not a git repository (or does not exist at all).
    #[error("not a valid git repository: {0}")]
    RepositoryInvalid(String),
    /// No branch is checked out.
    #[error("HEAD is detached in {0}")]
    DetachedHead(String),
    /// A git subprocess exited with a non-zero status.
    #[error("`git {command}` failed with exit code {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },
    /// Output parsing or unexpected git data.
    #[error("failed to parse git data: {0}")]
    ParseError(String),
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Validate that a git ref or remote name does not contain dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
pub(crate) fn validate_git_ref(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.contains("..") {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain '..'",
            name
        )));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b == 0 || b < 0x20) {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}

/// Git CLI wrapper with non-interactive settings.
#[derive(Debug, Clone)]
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Create a Command running inside `dir`.
    ///
    /// Applies:
    /// - `GIT_TERMINAL_PROMPT=0` - never block on a credentials prompt
    /// - `core.hooksPath=` - app repos' hooks do not run during updates
    /// - stdin from /dev/null
    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["-c", "core.hooksPath="]);
        cmd.arg("-C").arg(dir);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run git with `args` in `dir`, returning stdout on success.
    fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        log::debug!("git -C {} {}", dir.display(), args.join(" "));

        let output = self.command(dir).args(args).output()?;

        if !output.status.success() {
            let mut captured = String::from_utf8_lossy(&output.stderr).into_owned();
            captured.push_str(&String::from_utf8_lossy(&output.stdout));
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                exit_code: output.status.code().unwrap_or(-1),
                output: captured.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Check whether a usable git binary is on PATH.
    #[cfg(test)]
    pub fn is_available(&self) -> bool {
        Command::new(&self.git_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Fetch a remote using its configured refspecs.
    pub fn fetch(&self, dir: &Path, remote: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        self.run(dir, &["fetch", remote])?;
        Ok(())
    }

    /// Fetch a single branch of a remote into its remote-tracking ref,
    /// regardless of which branches the remote is configured to track.
    pub fn fetch_branch(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        validate_git_ref(branch, "branch")?;

        let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, remote);
        self.run(dir, &["fetch", remote, &refspec])?;
        Ok(())
    }

    /// Fetch every configured remote.
    pub fn fetch_all(&self, dir: &Path) -> Result<(), GitError> {
        self.run(dir, &["fetch", "--all"])?;
        Ok(())
    }

    /// Fetch a remote, converting a shallow clone into a full one.
    pub fn fetch_unshallow(&self, dir: &Path, remote: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        self.run(dir, &["fetch", remote, "--unshallow"])?;
        Ok(())
    }

    /// Pull `remote/branch` into the current branch.
    pub fn pull(&self, dir: &Path, remote: &str, branch: &str, rebase: bool) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        validate_git_ref(branch, "branch")?;

        let mode = if rebase { "--rebase" } else { "--no-rebase" };
        self.run(dir, &["pull", mode, remote, branch])?;
        Ok(())
    }

    /// Reset the working tree and current branch to `remote/branch`,
    /// discarding local commits and changes.
    pub fn hard_reset(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        validate_git_ref(branch, "branch")?;

        let target = format!("{}/{}", remote, branch);
        self.run(dir, &["reset", "--hard", &target])?;
        Ok(())
    }

    /// Check out a local branch (creating it from a remote-tracking branch
    /// if git can guess one).
    pub fn checkout(&self, dir: &Path, branch: &str) -> Result<(), GitError> {
        validate_git_ref(branch, "branch")?;
        self.run(dir, &["checkout", branch])?;
        Ok(())
    }

    /// Merge `remote/branch` into the current branch.
    pub fn merge(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;
        validate_git_ref(branch, "branch")?;

        let target = format!("{}/{}", remote, branch);
        self.run(dir, &["merge", &target])?;
        Ok(())
    }

    /// Replace a remote's fetch refspecs so that it tracks every branch.
    pub fn track_all_branches(&self, dir: &Path, remote: &str) -> Result<(), GitError> {
        validate_git_ref(remote, "remote")?;

        let key = format!("remote.{}.fetch", remote);
        match self.run(dir, &["config", "--unset-all", &key]) {
            Ok(_) => {}
            // Exit code 5: the key was not set to begin with
            Err(GitError::CommandFailed { exit_code: 5, .. }) => {}
            Err(e) => return Err(e),
        }

        let refspec = format!("+refs/heads/*:refs/remotes/{}/*", remote);
        self.run(dir, &["config", "--add", &key, &refspec])?;
        Ok(())
    }

    /// Summarise the files touched by the last `commits` commits.
    pub fn diff_stat(&self, dir: &Path, commits: usize) -> Result<String, GitError> {
        let base = format!("HEAD~{}", commits);
        self.run(dir, &["diff", "--stat", &base, "HEAD"])
    }
}
