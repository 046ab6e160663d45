#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::core::git::Git;
use crate::core::resolve::Candidate;
use crate::core::validate;
use crate::error::WtError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub name: String,
    /// `None` for a detached HEAD.
    pub branch: Option<String>,
    pub head: String,
    pub is_current: bool,
    pub is_main: bool,
    pub is_bare: bool,
}

impl Worktree {
    #[must_use]
    pub fn branch_label(&self) -> &str {
        self.branch.as_deref().unwrap_or("(detached)")
    }
}

impl Candidate for Worktree {
    fn keys(&self) -> Vec<String> {
        let mut keys = vec![self.name.clone()];
        if let Some(b) = &self.branch {
            keys.push(b.clone());
        }
        keys
    }

    fn label(&self) -> String {
        let mut label = format!("{}  [{}]", self.name, self.branch_label());
        if self.is_main {
            label.push_str("  (main)");
        }
        if self.is_current {
            label.push_str("  *");
        }
        label
    }
}

/// How the branch for a new worktree comes to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchStart {
    Existing,
    /// `git worktree add -b`, starting from HEAD of the main worktree.
    New,
    /// `git branch B BASE`, then add the worktree for it.
    FromBase(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub branch: String,
    pub start: BranchStart,
}

pub struct WorktreeManager<'r> {
    git: Git<'r>,
    dir_suffix: String,
    cwd: PathBuf,
}

impl<'r> WorktreeManager<'r> {
    #[must_use]
    pub fn new(git: Git<'r>, dir_suffix: &str, cwd: &Path) -> Self {
        Self {
            git,
            dir_suffix: dir_suffix.to_owned(),
            cwd: canonical(cwd),
        }
    }

    #[must_use]
    pub fn git(&self) -> Git<'r> {
        self.git
    }

    /// `<repo parent>/<repo name><suffix>`
    #[must_use]
    pub fn worktrees_dir(&self) -> PathBuf {
        let root = self.git.repo_root();
        let base = root.parent().unwrap_or(root);
        base.join(format!("{}{}", self.git.repo_name(), self.dir_suffix))
    }

    #[must_use]
    pub fn worktree_path(&self, name: &str) -> PathBuf {
        self.worktrees_dir().join(name)
    }

    pub fn list(&self) -> Result<Vec<Worktree>, WtError> {
        let out = self.git.list_worktrees_porcelain()?;
        let mut worktrees = parse_worktree_porcelain(&out)?;
        mark_current(&mut worktrees, &self.cwd);
        Ok(worktrees)
    }

    pub fn current(&self) -> Result<Option<Worktree>, WtError> {
        Ok(self.list()?.into_iter().find(|w| w.is_current))
    }

    pub fn main(&self) -> Result<Worktree, WtError> {
        self.list()?
            .into_iter()
            .find(|w| w.is_main)
            .ok_or_else(|| WtError::parse("git", "worktree list is empty"))
    }

    pub fn create(&self, req: &CreateRequest) -> Result<PathBuf, WtError> {
        validate::worktree_name(&req.name)?;
        validate::branch_name(&req.branch)?;

        let existing = self.list()?;
        if let Some(wt) = existing
            .iter()
            .find(|w| w.branch.as_deref() == Some(req.branch.as_str()))
        {
            return Err(WtError::DuplicateWorktree {
                branch: req.branch.clone(),
                path: wt.path.clone(),
            });
        }

        let path = self.worktree_path(&req.name);
        if path.exists() {
            return Err(WtError::WorktreePathExists(path));
        }
        let parent = self.worktrees_dir();
        std::fs::create_dir_all(&parent).map_err(|e| WtError::io(&parent, e))?;

        match &req.start {
            BranchStart::Existing => self.git.add_worktree(&path, &req.branch, false)?,
            BranchStart::New => self.git.add_worktree(&path, &req.branch, true)?,
            BranchStart::FromBase(base) => {
                self.git.create_branch(&req.branch, base)?;
                self.git.add_worktree(&path, &req.branch, false)?;
            }
        }
        info!(name = %req.name, branch = %req.branch, path = %path.display(), "created worktree");
        Ok(path)
    }

    /// Refuses the worktree the process is in and the main worktree; git
    /// itself refuses a dirty one unless `force`.
    pub fn remove(&self, target: &Worktree, force: bool) -> Result<(), WtError> {
        if self.cwd.starts_with(canonical(&target.path)) {
            return Err(WtError::CannotRemoveCurrentWorktree(target.path.clone()));
        }
        if target.is_main {
            return Err(WtError::Validation(format!(
                "cannot remove the main worktree ({})",
                target.path.display()
            )));
        }
        self.git.remove_worktree(&target.path, force)?;
        info!(path = %target.path.display(), force, "removed worktree");
        Ok(())
    }

    /// Points later `remove` checks at a new process directory.
    pub fn set_cwd(&mut self, cwd: &Path) {
        self.cwd = canonical(cwd);
    }
}

fn canonical(p: &Path) -> PathBuf {
    p.canonicalize().unwrap_or_else(|_| p.to_path_buf())
}

/// The deepest worktree containing `cwd` is current.
fn mark_current(worktrees: &mut [Worktree], cwd: &Path) {
    let best = worktrees
        .iter()
        .enumerate()
        .filter(|(_, w)| cwd.starts_with(canonical(&w.path)))
        .max_by_key(|(_, w)| w.path.components().count())
        .map(|(i, _)| i);
    for (i, w) in worktrees.iter_mut().enumerate() {
        w.is_current = Some(i) == best;
    }
}

fn parse_worktree_porcelain(out: &str) -> Result<Vec<Worktree>, WtError> {
    let mut worktrees: Vec<Worktree> = Vec::new();
    let mut cur: Option<Worktree> = None;

    for line in out.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if let Some(wt) = cur.take() {
                worktrees.push(wt);
            }
            continue;
        }
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(wt) = cur.take() {
                worktrees.push(wt);
            }
            let path = PathBuf::from(path);
            let name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            cur = Some(Worktree {
                path,
                name,
                branch: None,
                head: String::new(),
                is_current: false,
                is_main: worktrees.is_empty(),
                is_bare: false,
            });
            continue;
        }
        let Some(wt) = cur.as_mut() else {
            return Err(WtError::parse(
                "git",
                format!("worktree record does not start with a 'worktree' line: {line:?}"),
            ));
        };
        if let Some(branch) = line.strip_prefix("branch ") {
            wt.branch = Some(branch.trim().trim_start_matches("refs/heads/").to_owned());
        } else if let Some(head) = line.strip_prefix("HEAD ") {
            head.trim().clone_into(&mut wt.head);
        } else if line == "bare" {
            wt.is_bare = true;
        }
    }
    if let Some(wt) = cur.take() {
        worktrees.push(wt);
    }
    Ok(worktrees)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worktree_list_porcelain() {
        let out = r#"worktree /repo
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /repo.worktrees/feature
HEAD 2222222222222222222222222222222222222222
branch refs/heads/feature/test

worktree /repo.worktrees/detached
HEAD 3333333333333333333333333333333333333333
detached
"#;

        let entries = parse_worktree_porcelain(out).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            Worktree {
                path: PathBuf::from("/repo"),
                name: "repo".to_owned(),
                branch: Some("main".to_owned()),
                head: "1111111111111111111111111111111111111111".to_owned(),
                is_current: false,
                is_main: true,
                is_bare: false,
            }
        );
        assert_eq!(entries[1].branch.as_deref(), Some("feature/test"));
        assert_eq!(entries[1].name, "feature");
        assert!(!entries[1].is_main);
        assert_eq!(entries[2].branch, None);
        assert_eq!(entries[2].branch_label(), "(detached)");
    }

    #[test]
    fn record_without_worktree_line_is_a_parse_error() {
        let err = parse_worktree_porcelain("HEAD abc\nbranch refs/heads/main\n").unwrap_err();
        assert!(matches!(err, WtError::Parse { .. }));

        let err =
            parse_worktree_porcelain("worktree /repo\nHEAD abc\n\nHEAD def\n").unwrap_err();
        assert!(matches!(err, WtError::Parse { .. }));
    }

    #[test]
    fn deepest_containing_worktree_is_current() {
        let mut wts = parse_worktree_porcelain(
            "worktree /work/repo\nHEAD a\nbranch refs/heads/main\n\nworktree /work/repo/nested\nHEAD b\nbranch refs/heads/x\n",
        )
        .unwrap();
        mark_current(&mut wts, Path::new("/work/repo/nested/src"));
        assert!(!wts[0].is_current);
        assert!(wts[1].is_current);

        mark_current(&mut wts, Path::new("/elsewhere"));
        assert!(wts.iter().all(|w| !w.is_current));
    }
}
