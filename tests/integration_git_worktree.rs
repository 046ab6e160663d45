use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use workflow_tools::core::git::Git;
use workflow_tools::core::process::SystemRunner;
use workflow_tools::core::resolve;
use workflow_tools::core::worktree::{BranchStart, CreateRequest, WorktreeManager};
use workflow_tools::error::WtError;
use workflow_tools::tui::picker::NonInteractivePicker;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn run(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command");
    if !out.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
    }
}

/// A repository with one commit on `main`, returned canonicalized.
fn init_repo(td: &Path) -> PathBuf {
    let repo = td.join("repo");
    std::fs::create_dir_all(&repo).expect("mkdir repo");
    run(&repo, &["init", "-b", "main"]);
    run(&repo, &["config", "user.email", "test@example.com"]);
    run(&repo, &["config", "user.name", "Test"]);
    std::fs::write(repo.join("README.md"), "hello\n").expect("write");
    run(&repo, &["add", "."]);
    run(&repo, &["commit", "-m", "init"]);
    repo.canonicalize().expect("canonical repo")
}

fn runner() -> SystemRunner {
    SystemRunner::new(Duration::from_secs(60)).expect("runner")
}

fn request(name: &str, branch: &str) -> CreateRequest {
    CreateRequest {
        name: name.to_owned(),
        branch: branch.to_owned(),
        start: BranchStart::New,
    }
}

#[test]
fn create_then_list_shows_branch_once() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let td = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(td.path());
    let runner = runner();
    let wm = WorktreeManager::new(Git::new(&runner, &repo), ".worktrees", &repo);

    let path = wm.create(&request("feature-x", "feature/x")).expect("create");
    assert!(path.ends_with("repo.worktrees/feature-x"));
    assert!(path.join("README.md").exists());

    let listed = wm.list().expect("list");
    let matching: Vec<_> = listed
        .iter()
        .filter(|w| w.branch.as_deref() == Some("feature/x"))
        .collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].name, "feature-x");
    assert!(listed.iter().any(|w| w.is_main && w.is_current));

    let err = wm.create(&request("again", "feature/x")).unwrap_err();
    assert!(matches!(err, WtError::DuplicateWorktree { .. }));
}

#[test]
fn remove_by_fragment_leaves_main() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let td = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(td.path());
    let runner = runner();
    let wm = WorktreeManager::new(Git::new(&runner, &repo), ".worktrees", &repo);
    wm.create(&request("feature-x", "feature-x")).expect("create");

    let candidates: Vec<_> = wm.list().expect("list").into_iter().filter(|w| !w.is_main).collect();
    let index = resolve::resolve(&NonInteractivePicker, "worktree", "", &candidates, Some("feat"))
        .expect("resolve")
        .expect("selected");
    wm.remove(&candidates[index], false).expect("remove");

    let listed = wm.list().expect("list");
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_main);
    assert_eq!(listed[0].branch.as_deref(), Some("main"));
}

#[test]
fn removing_current_worktree_fails_without_changes() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let td = tempfile::tempdir().expect("tempdir");
    let repo = init_repo(td.path());
    let runner = runner();
    let creator = WorktreeManager::new(Git::new(&runner, &repo), ".worktrees", &repo);
    let path = creator.create(&request("feature-x", "feature-x")).expect("create");

    // Standing inside the new worktree.
    let wm = WorktreeManager::new(Git::new(&runner, &repo), ".worktrees", &path);
    let current = wm.current().expect("current").expect("inside a worktree");
    assert_eq!(current.name, "feature-x");

    let err = wm.remove(&current, true).unwrap_err();
    assert!(matches!(err, WtError::CannotRemoveCurrentWorktree(_)));
    assert!(path.exists());
    assert_eq!(wm.list().expect("list").len(), 2);
}
