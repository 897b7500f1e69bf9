//! Git worktree isolation for agent runs.
//!
//! Each bead gets its own worktree at `<tmp>/ralph-<bead-id>` on branch
//! `ralph/<bead-id>`, so concurrent agents never share a checkout. The
//! bridge resolves the source repository once (the work dir may itself
//! be a worktree) and drives plain `git worktree` commands against it.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from worktree operations.
#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("not a git repository: {}", .0.display())]
    NotARepo(PathBuf),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Manages the per-bead worktrees for one orchestrator run.
#[derive(Debug)]
pub struct WorktreeBridge {
    work_dir: PathBuf,
    source_repo: PathBuf,
    base_branch: String,
}

/// Directory a bead's worktree lives at.
pub fn worktree_path(bead_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ralph-{bead_id}"))
}

/// Branch a bead's worktree is checked out on.
pub fn branch_name(bead_id: &str) -> String {
    format!("ralph/{bead_id}")
}

/// Resolve the repository that owns `work_dir`.
///
/// A plain repo has a `.git` directory and is its own source. A linked
/// worktree has a `.git` file of the form
/// `gitdir: <source>/.git/worktrees/<name>`; the source is the prefix
/// before `/.git/worktrees/`.
fn resolve_source_repo(work_dir: &Path) -> Result<PathBuf, WorktreeError> {
    let dot_git = work_dir.join(".git");
    let meta = std::fs::metadata(&dot_git)
        .map_err(|_| WorktreeError::NotARepo(work_dir.to_path_buf()))?;

    if meta.is_dir() {
        return Ok(work_dir.to_path_buf());
    }

    let contents = std::fs::read_to_string(&dot_git)?;
    let gitdir = contents
        .trim()
        .strip_prefix("gitdir:")
        .ok_or_else(|| WorktreeError::NotARepo(work_dir.to_path_buf()))?
        .trim();
    match gitdir.find("/.git/worktrees/") {
        Some(idx) => Ok(PathBuf::from(&gitdir[..idx])),
        None => Err(WorktreeError::NotARepo(work_dir.to_path_buf())),
    }
}

async fn git(cwd: &Path, args: &[&str]) -> Result<std::process::Output, WorktreeError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await?;
    Ok(output)
}

/// Run git and fail on non-zero exit.
async fn git_ok(cwd: &Path, args: &[&str]) -> Result<std::process::Output, WorktreeError> {
    let output = git(cwd, args).await?;
    if !output.status.success() {
        return Err(WorktreeError::Git {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

async fn current_branch(dir: &Path) -> Result<String, WorktreeError> {
    let output = git_ok(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl WorktreeBridge {
    /// Resolve the source repository behind `work_dir` and capture the
    /// branch new worktree branches fork from. The resolved source
    /// never changes for the lifetime of the bridge.
    pub async fn new(work_dir: impl AsRef<Path>) -> Result<Self, WorktreeError> {
        let work_dir = work_dir.as_ref().to_path_buf();
        let source_repo = resolve_source_repo(&work_dir)?;
        let base_branch = current_branch(&work_dir).await?;
        debug!(
            source = %source_repo.display(),
            base_branch = %base_branch,
            "resolved source repository"
        );
        Ok(Self {
            work_dir,
            source_repo,
            base_branch,
        })
    }

    pub fn source_repo(&self) -> &Path {
        &self.source_repo
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// Create the worktree for a bead and return `(path, branch)`.
    ///
    /// A fresh branch forks from the captured base branch; an existing
    /// `ralph/<bead-id>` branch is reused as-is so a retried bead keeps
    /// its earlier commits. Hooks are suppressed for the add by pointing
    /// `core.hooksPath` at an empty directory that is dropped afterwards.
    pub async fn create_worktree(
        &self,
        bead_id: &str,
    ) -> Result<(PathBuf, String), WorktreeError> {
        let path = worktree_path(bead_id);
        let branch = branch_name(bead_id);
        let path_str = path.display().to_string();
        let branch_ref = format!("refs/heads/{branch}");

        let branch_exists = git(
            &self.source_repo,
            &["rev-parse", "--verify", "--quiet", &branch_ref],
        )
        .await?
        .status
        .success();

        let hooks_dir = tempfile::tempdir()?;
        let hooks_config = format!("core.hooksPath={}", hooks_dir.path().display());

        if branch_exists {
            git_ok(
                &self.source_repo,
                &["-c", &hooks_config, "worktree", "add", &path_str, &branch],
            )
            .await?;
        } else {
            git_ok(
                &self.source_repo,
                &[
                    "-c",
                    &hooks_config,
                    "worktree",
                    "add",
                    "-b",
                    &branch,
                    &path_str,
                    &self.base_branch,
                ],
            )
            .await?;
        }
        debug!(bead_id, path = %path.display(), branch = %branch, "created worktree");
        Ok((path, branch))
    }

    /// Forcefully remove a worktree. Idempotent: a worktree that is
    /// already gone counts as removed. The `ralph/<bead-id>` branch is
    /// deliberately preserved so later merges or pushes can still
    /// reference it.
    pub async fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError> {
        let path_str = path.display().to_string();
        let output = git(
            &self.source_repo,
            &["worktree", "remove", &path_str, "--force"],
        )
        .await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("not found")
            || stderr.contains("no such file")
            || stderr.contains("is not a working tree")
        {
            return Ok(());
        }
        Err(WorktreeError::Git {
            command: format!("worktree remove {path_str} --force"),
            stderr: stderr.trim().to_string(),
        })
    }

    /// Directory of the worktree checked out on `branch`, if any.
    pub async fn find_worktree_for_branch(
        &self,
        branch: &str,
    ) -> Result<Option<PathBuf>, WorktreeError> {
        let output = git_ok(&self.source_repo, &["worktree", "list", "--porcelain"]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let wanted = format!("refs/heads/{branch}");

        let mut current_path: Option<PathBuf> = None;
        for line in stdout.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                current_path = Some(PathBuf::from(path));
            } else if let Some(branch_ref) = line.strip_prefix("branch ") {
                if branch_ref == wanted {
                    return Ok(current_path);
                }
            }
        }
        Ok(None)
    }

    /// Directory to run merges in: the base work dir if it is already on
    /// `target_branch`, else an existing worktree checked out on it,
    /// else the source repository.
    pub async fn merge_repo(&self, target_branch: &str) -> Result<PathBuf, WorktreeError> {
        if current_branch(&self.work_dir).await? == target_branch {
            return Ok(self.work_dir.clone());
        }
        if let Some(path) = self.find_worktree_for_branch(target_branch).await? {
            return Ok(path);
        }
        Ok(self.source_repo.clone())
    }
}

/// HEAD commit hash of a checkout, for the landing check.
pub async fn head_commit(dir: &Path) -> Result<String, WorktreeError> {
    let output = git_ok(dir, &["log", "-1", "--format=%H"]).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether a checkout has no uncommitted changes.
pub async fn is_clean(dir: &Path) -> Result<bool, WorktreeError> {
    let output = git_ok(dir, &["status", "--porcelain"]).await?;
    Ok(output.stdout.iter().all(|b| b.is_ascii_whitespace()))
}
