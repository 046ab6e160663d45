#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use tracing::info;

use crate::core::process::{Captured, Invocation, Runner};
use crate::error::WtError;

#[derive(Clone, Copy)]
pub struct Git<'r> {
    runner: &'r dyn Runner,
    repo_root: &'r Path,
}

/// Locates the main repository root for `dir`: the parent of
/// `git rev-parse --git-common-dir`, so linked worktrees share one root.
pub fn find_repo_root(runner: &dyn Runner, dir: &Path) -> Result<PathBuf, WtError> {
    let out = runner.capture(
        &Invocation::new("git")
            .args(["rev-parse", "--git-common-dir"])
            .cwd(dir)
            .tolerant(),
    )?;
    if !out.success() {
        return Err(WtError::NotInGitRepo);
    }
    let common = PathBuf::from(out.stdout.trim());
    let common = if common.is_absolute() {
        common
    } else {
        dir.join(common)
    };
    let common = common.canonicalize().unwrap_or(common);
    common
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| WtError::parse("git", format!("git dir {} has no parent", common.display())))
}

impl<'r> Git<'r> {
    #[must_use]
    pub fn new(runner: &'r dyn Runner, repo_root: &'r Path) -> Self {
        Self { runner, repo_root }
    }

    #[must_use]
    pub fn repo_root(&self) -> &'r Path {
        self.repo_root
    }

    #[must_use]
    pub fn repo_name(&self) -> String {
        self.repo_root
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("repo")
            .to_owned()
    }

    pub fn run(&self, args: &[&str]) -> Result<String, WtError> {
        self.run_in_dir(self.repo_root, args)
    }

    pub fn run_in_dir(&self, dir: &Path, args: &[&str]) -> Result<String, WtError> {
        let out = self
            .runner
            .capture(&Invocation::new("git").args(args.iter().copied()).cwd(dir))?;
        Ok(out.stdout)
    }

    pub fn run_raw(&self, dir: &Path, args: &[&str]) -> Result<Captured, WtError> {
        self.runner.capture(
            &Invocation::new("git")
                .args(args.iter().copied())
                .cwd(dir)
                .tolerant(),
        )
    }

    pub fn remote_url(&self, dir: &Path) -> Result<Option<String>, WtError> {
        let out = self.run_raw(dir, &["remote", "get-url", "origin"])?;
        let url = out.stdout.trim();
        Ok((out.success() && !url.is_empty()).then(|| url.to_owned()))
    }

    pub fn set_remote_url(&self, dir: &Path, url: &str) -> Result<(), WtError> {
        self.run_in_dir(dir, &["remote", "set-url", "origin", url])?;
        Ok(())
    }

    /// `origin/HEAD` when set, else the first of `main`/`master` that exists,
    /// else `main`.
    pub fn default_branch(&self) -> Result<String, WtError> {
        let out = self.run_raw(
            self.repo_root,
            &["symbolic-ref", "--quiet", "refs/remotes/origin/HEAD"],
        )?;
        if out.success()
            && let Some(name) = out.stdout.trim().rsplit('/').next()
            && !name.is_empty()
        {
            return Ok(name.to_owned());
        }
        for candidate in ["main", "master"] {
            if self.branch_exists(candidate)? {
                return Ok(candidate.to_owned());
            }
        }
        Ok("main".to_owned())
    }

    pub fn current_branch(&self, dir: &Path) -> Result<Option<String>, WtError> {
        let out = self.run_raw(dir, &["branch", "--show-current"])?;
        let name = out.stdout.trim();
        Ok((out.success() && !name.is_empty()).then(|| name.to_owned()))
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool, WtError> {
        let refname = format!("refs/heads/{branch}");
        let out = self.run_raw(self.repo_root, &["rev-parse", "--verify", "--quiet", &refname])?;
        Ok(out.success())
    }

    pub fn remote_branch_exists(&self, branch: &str) -> Result<bool, WtError> {
        let refname = format!("refs/remotes/origin/{branch}");
        let out = self.run_raw(self.repo_root, &["rev-parse", "--verify", "--quiet", &refname])?;
        Ok(out.success())
    }

    /// Local branch names, then `origin/...` remote branches when asked.
    pub fn list_branches(&self, include_remote: bool) -> Result<Vec<String>, WtError> {
        let mut args = vec!["branch", "--format=%(refname)"];
        if include_remote {
            args.push("-a");
        }
        let out = self.run(&args)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.ends_with("/HEAD"))
            .filter_map(|l| {
                l.strip_prefix("refs/heads/")
                    .or_else(|| l.strip_prefix("refs/remotes/"))
            })
            .map(str::to_owned)
            .collect())
    }

    /// Best effort; an offline fetch is not an error.
    pub fn fetch_origin(&self) -> Result<bool, WtError> {
        Ok(self.run_raw(self.repo_root, &["fetch", "origin"])?.success())
    }

    pub fn fetch_pull_request(&self, number: u64, branch: &str) -> Result<(), WtError> {
        let refspec = format!("pull/{number}/head:{branch}");
        self.run(&["fetch", "origin", &refspec])?;
        info!(number, branch, "fetched pull request");
        Ok(())
    }

    pub fn create_branch(&self, branch: &str, base: &str) -> Result<(), WtError> {
        self.run(&["branch", branch, base])?;
        info!(branch, base, "created branch");
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str, force: bool) -> Result<(), WtError> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, branch])?;
        info!(branch, force, "deleted branch");
        Ok(())
    }

    pub fn list_worktrees_porcelain(&self) -> Result<String, WtError> {
        self.run(&["worktree", "list", "--porcelain"])
    }

    pub fn add_worktree(&self, path: &Path, branch: &str, create_branch: bool) -> Result<(), WtError> {
        let path = path.to_string_lossy();
        if create_branch {
            self.run(&["worktree", "add", "-b", branch, &path])?;
        } else {
            self.run(&["worktree", "add", &path, branch])?;
        }
        Ok(())
    }

    pub fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), WtError> {
        let path = path.to_string_lossy();
        if force {
            self.run(&["worktree", "remove", "--force", &path])?;
        } else {
            self.run(&["worktree", "remove", &path])?;
        }
        Ok(())
    }

    pub fn is_dirty(&self, dir: &Path) -> Result<bool, WtError> {
        let out = self.run_in_dir(dir, &["status", "--porcelain"])?;
        Ok(!out.trim().is_empty())
    }

    pub fn pull_ff_only(&self, dir: &Path) -> Result<bool, WtError> {
        Ok(self.run_raw(dir, &["pull", "--ff-only"])?.success())
    }
}
