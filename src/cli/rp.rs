#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::cli::{Context, cancelled, choose_option, pick, print_json, truncate};
use crate::config;
use crate::core::git::Git;
use crate::core::github::{GitHub, OwnRepo, Visibility};
use crate::core::naming::parse_github_url;
use crate::core::process::{Invocation, Runner as _};
use crate::core::repos::{FileCacheStore, RepoManager, RepoRecord, RemoteType};
use crate::core::resolve::Candidate;
use crate::core::validate;
use crate::error::WtError;
use crate::output::table::Table;
use crate::shell::handoff::{Handoff, RP_CD_FILE};
use crate::tui::picker::NonInteractivePicker;
use crate::tui::prompt;

const REFRESH_ENTRY: &str = "[refresh list]";
const CUSTOM_PATH: &str = "[+] Enter custom path...";

#[derive(Debug, Parser)]
#[command(args_conflicts_with_subcommands = true)]
pub struct RpArgs {
    #[command(subcommand)]
    pub cmd: Option<RpCmd>,
    /// Repository to switch to
    pub name: Option<String>,
    /// Rescan instead of using the cache
    #[arg(short = 'r', long = "refresh")]
    pub refresh: bool,
}

#[derive(Debug, Subcommand)]
pub enum RpCmd {
    /// Switch to a local repository
    #[command(visible_alias = "sw")]
    Switch(SwitchArgs),
    #[command(visible_alias = "ls")]
    List(ListArgs),
    /// Rescan the configured directories
    #[command(visible_alias = "rf")]
    Refresh,
    /// Create a GitHub repository and clone it
    #[command(visible_alias = "cr")]
    Create(CreateArgs),
    /// Fork a GitHub repository and clone the fork
    #[command(visible_alias = "fk")]
    Fork(ForkArgs),
    /// Clone one of your GitHub repositories
    #[command(visible_alias = "cl")]
    Clone(CloneArgs),
    /// Rename a repository locally and on GitHub
    #[command(visible_alias = "rn")]
    Rename(RenameArgs),
}

#[derive(Debug, Parser)]
pub struct SwitchArgs {
    pub name: Option<String>,
    #[arg(short = 'r', long = "refresh")]
    pub refresh: bool,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    #[arg(long = "json", conflicts_with_all = ["path_only", "csv"])]
    pub json: bool,
    /// One path per line
    #[arg(long = "path-only", conflicts_with = "csv")]
    pub path_only: bool,
    #[arg(long = "csv")]
    pub csv: bool,
    #[arg(short = 'r', long = "refresh")]
    pub refresh: bool,
}

#[derive(Debug, Parser)]
pub struct CreateArgs {
    pub name: String,
    /// Public instead of private
    #[arg(long = "public")]
    pub public: bool,
    #[arg(short = 'd', long = "description")]
    pub description: Option<String>,
    /// Directory to clone into
    #[arg(short = 'p', long = "path")]
    pub path: Option<String>,
    #[arg(long = "no-clone")]
    pub no_clone: bool,
}

#[derive(Debug, Parser)]
pub struct ForkArgs {
    /// OWNER/REPO; searched interactively when omitted
    pub repo: Option<String>,
    #[arg(short = 'p', long = "path")]
    pub path: Option<String>,
    /// Local directory name for the clone
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,
    #[arg(long = "no-clone")]
    pub no_clone: bool,
}

#[derive(Debug, Parser)]
pub struct CloneArgs {
    pub name: Option<String>,
    #[arg(short = 'p', long = "path")]
    pub path: Option<String>,
    /// Clone every repository that is not cloned yet
    #[arg(short = 'a', long = "all", conflicts_with = "name")]
    pub all: bool,
}

#[derive(Debug, Parser)]
pub struct RenameArgs {
    pub old: String,
    pub new: String,
    #[arg(long = "local-only", conflicts_with = "github_only")]
    pub local_only: bool,
    #[arg(long = "github-only")]
    pub github_only: bool,
}

pub fn run(ctx: &Context, args: RpArgs) -> anyhow::Result<ExitCode> {
    let repos = &ctx.cfg.repos;
    let manager = RepoManager::new(
        FileCacheStore::new(repos.cache_path()?),
        repos.scan_dirs()?,
        repos.scan_depth,
        Duration::from_secs(repos.cache_ttl_seconds),
    );

    match args.cmd {
        None => switch(ctx, &manager, args.name.as_deref(), args.refresh),
        Some(RpCmd::Switch(a)) => switch(ctx, &manager, a.name.as_deref(), a.refresh || args.refresh),
        Some(RpCmd::List(a)) => list(&manager, &a),
        Some(RpCmd::Refresh) => refresh(&manager),
        Some(RpCmd::Create(a)) => create(ctx, &manager, a),
        Some(RpCmd::Fork(a)) => fork(ctx, &manager, a),
        Some(RpCmd::Clone(a)) => clone(ctx, &manager, a),
        Some(RpCmd::Rename(a)) => rename(ctx, &manager, &a),
    }
}

type Manager = RepoManager<FileCacheStore>;

fn cd(path: &Path) -> anyhow::Result<()> {
    Handoff::from_env(RP_CD_FILE).request_directory_change(path)?;
    Ok(())
}

fn switch(ctx: &Context, manager: &Manager, name: Option<&str>, refresh: bool) -> anyhow::Result<ExitCode> {
    let (mut repos, mut from_cache) = manager.repos(refresh)?;
    if repos.is_empty() {
        anyhow::bail!("no repositories found under the configured scan paths; check repos.scan_paths");
    }

    let target = if name.is_none() && ctx.picker().is_interactive() {
        // A cached list gets a rescan entry on top.
        loop {
            let mut options: Vec<String> = Vec::with_capacity(repos.len() + 1);
            if from_cache {
                options.push(REFRESH_ENTRY.to_owned());
            }
            options.extend(repos.iter().map(Candidate::label));
            let Some(index) = choose_option(ctx.picker(), "Select repository", &options, "pass NAME")? else {
                return Ok(cancelled());
            };
            if from_cache && index == 0 {
                println!("Scanning for repositories...");
                repos = manager.refresh()?;
                from_cache = false;
                continue;
            }
            let offset = usize::from(from_cache);
            break repos[index - offset].clone();
        }
    } else {
        let Some(found) = pick(ctx.picker(), "repository", "Select repository", &repos, name)? else {
            return Ok(cancelled());
        };
        found.clone()
    };

    if let Err(e) = manager.touch(&target.path) {
        warn!(path = %target.path.display(), error = %e, "failed to record access time");
    }
    cd(&target.path)?;
    Ok(ExitCode::SUCCESS)
}

fn list(manager: &Manager, args: &ListArgs) -> anyhow::Result<ExitCode> {
    let (repos, _) = manager.repos(args.refresh)?;
    if args.json {
        print_json(&repos)?;
        return Ok(ExitCode::SUCCESS);
    }
    if args.path_only {
        for r in &repos {
            println!("{}", r.path.display());
        }
        return Ok(ExitCode::SUCCESS);
    }
    if repos.is_empty() {
        println!("No repositories found.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = Table::new(["NAME", "REMOTE", "PATH"]);
    for r in &repos {
        let remote = match (&r.remote, r.remote_type) {
            (Some(remote), _) => remote.clone(),
            (None, RemoteType::Local) => "local".to_owned(),
            (None, _) => "other".to_owned(),
        };
        table.row([
            r.name.clone(),
            remote,
            config::tilde_path(&r.path.to_string_lossy()),
        ]);
    }
    if args.csv {
        table.print_csv()?;
    } else {
        table.print()?;
        println!("\n{} repositories", repos.len());
    }
    Ok(ExitCode::SUCCESS)
}

fn refresh(manager: &Manager) -> anyhow::Result<ExitCode> {
    println!("Scanning for repositories...");
    let repos = manager.refresh()?;
    println!("Found {} repositories", repos.len());
    Ok(ExitCode::SUCCESS)
}

/// Scan dirs and their visible subdirectories, for choosing where to clone.
fn destination_choices(bases: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for base in bases.iter().filter(|b| b.is_dir()) {
        out.push(base.clone());
        let Ok(entries) = std::fs::read_dir(base) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .filter(|e| !e.path().join(".git").exists())
            .map(|e| e.path())
            .collect();
        children.sort();
        out.extend(children);
    }
    out
}

fn select_destination(ctx: &Context, manager: &Manager, given: Option<&str>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(p) = given {
        return Ok(Some(config::expand_path(p)?));
    }
    let dirs = destination_choices(manager.scan_dirs());
    let mut options: Vec<String> = dirs
        .iter()
        .map(|d| config::tilde_path(&d.to_string_lossy()))
        .collect();
    options.push(CUSTOM_PATH.to_owned());
    let Some(index) = choose_option(ctx.picker(), "Select destination", &options, "pass -p PATH")? else {
        return Ok(None);
    };
    if index < dirs.len() {
        return Ok(Some(dirs[index].clone()));
    }
    let raw = prompt::prompt_line("Path", None)?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(config::expand_path(raw.trim())?))
}

/// Clones over SSH first, then through gh; records the result in the cache.
fn clone_into(ctx: &Context, manager: &Manager, gh: &GitHub<'_>, full_name: &str, dest: &Path) -> anyhow::Result<RepoRecord> {
    if dest.exists() {
        anyhow::bail!("{} already exists", dest.display());
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WtError::io(parent, e))?;
    }

    println!("Cloning {full_name} into {}...", dest.display());
    let ssh = Invocation::new("git")
        .args(["clone", &format!("git@github.com:{full_name}.git")])
        .arg(dest.to_string_lossy())
        .tolerant();
    let out = ctx.runner.capture(&ssh)?;
    if !out.success() {
        warn!(full_name, stderr = %out.stderr.trim(), "ssh clone failed, falling back to gh");
        println!("SSH clone failed, trying gh...");
        if !gh.clone_repo(full_name, dest)? {
            anyhow::bail!("failed to clone {full_name}");
        }
    }
    if !dest.join(".git").exists() {
        anyhow::bail!("clone of {full_name} did not produce a repository at {}", dest.display());
    }

    let record = manager.add(dest)?;
    info!(full_name, path = %dest.display(), "cloned repository");
    println!("Cloned to {}", dest.display());
    Ok(record)
}

fn create(ctx: &Context, manager: &Manager, args: CreateArgs) -> anyhow::Result<ExitCode> {
    validate::repo_name(&args.name)?;
    let gh = GitHub::new(&ctx.runner, &ctx.cwd);
    let visibility = if args.public { Visibility::Public } else { Visibility::Private };

    let url = gh.create_repo(&args.name, visibility, args.description.as_deref())?;
    println!("Created {url}");
    if args.no_clone {
        return Ok(ExitCode::SUCCESS);
    }

    let owner = match parse_github_url(&url) {
        Some((owner, _)) => owner,
        None => gh.viewer_login()?,
    };
    let Some(dest) = select_destination(ctx, manager, args.path.as_deref())? else {
        return Ok(cancelled());
    };
    let record = clone_into(ctx, manager, &gh, &format!("{owner}/{}", args.name), &dest.join(&args.name))?;
    cd(&record.path)?;
    Ok(ExitCode::SUCCESS)
}

fn fork(ctx: &Context, manager: &Manager, args: ForkArgs) -> anyhow::Result<ExitCode> {
    let gh = GitHub::new(&ctx.runner, &ctx.cwd);

    let full_name = match args.repo {
        Some(r) => r,
        None => {
            let query = prompt::prompt_line("Search GitHub", None)?;
            if query.trim().is_empty() {
                return Ok(cancelled());
            }
            let hits = gh.search_repos(query.trim())?;
            if hits.is_empty() {
                anyhow::bail!("no repositories match '{}'", query.trim());
            }
            let Some(hit) = pick(ctx.picker(), "repository", "Select repository to fork", &hits, None)? else {
                return Ok(cancelled());
            };
            hit.full_name.clone()
        }
    };
    let (_, repo) = validate::full_repo_name(&full_name)?;
    let local_name = args.name.unwrap_or_else(|| repo.clone());
    validate::repo_name(&local_name)?;

    gh.fork_repo(&full_name)?;
    println!("Forked {full_name}");
    if args.no_clone {
        return Ok(ExitCode::SUCCESS);
    }

    // The fork keeps the upstream name on GitHub; -n only names the directory.
    let viewer = gh.viewer_login()?;
    let Some(dest) = select_destination(ctx, manager, args.path.as_deref())? else {
        return Ok(cancelled());
    };
    let record = clone_into(ctx, manager, &gh, &format!("{viewer}/{repo}"), &dest.join(&local_name))?;
    cd(&record.path)?;
    Ok(ExitCode::SUCCESS)
}

/// One of the user's GitHub repositories and its local clone, if any.
struct CloneChoice {
    repo: OwnRepo,
    local: Option<PathBuf>,
}

impl Candidate for CloneChoice {
    fn keys(&self) -> Vec<String> {
        vec![self.repo.name.clone()]
    }

    fn label(&self) -> String {
        let mut label = self.repo.name.clone();
        if let Some(d) = self.repo.description.as_deref().filter(|d| !d.is_empty()) {
            label.push_str("  ");
            label.push_str(&truncate(d, 40));
        }
        if self.local.is_some() {
            label.push_str("  [cloned]");
        }
        label
    }
}

fn clone(ctx: &Context, manager: &Manager, args: CloneArgs) -> anyhow::Result<ExitCode> {
    let gh = GitHub::new(&ctx.runner, &ctx.cwd);
    println!("Fetching your repositories...");
    let own = gh.list_own_repos()?;
    let (local, _) = manager.repos(false)?;
    let choices: Vec<CloneChoice> = own
        .into_iter()
        .map(|repo| {
            let local = local
                .iter()
                .find(|r| r.name == repo.name)
                .map(|r| r.path.clone());
            CloneChoice { repo, local }
        })
        .collect();
    if choices.is_empty() {
        anyhow::bail!("no repositories found on your GitHub account");
    }

    let targets: Vec<&CloneChoice> = if args.all {
        let missing: Vec<&CloneChoice> = choices.iter().filter(|c| c.local.is_none()).collect();
        if missing.is_empty() {
            println!("All repositories are already cloned.");
            return Ok(ExitCode::SUCCESS);
        }
        missing
    } else {
        let Some(choice) = pick(ctx.picker(), "repository", "Select repository to clone", &choices, args.name.as_deref())? else {
            return Ok(cancelled());
        };
        if let Some(path) = &choice.local {
            println!("Already cloned, switching to {}", path.display());
            cd(path)?;
            return Ok(ExitCode::SUCCESS);
        }
        vec![choice]
    };

    let Some(dest) = select_destination(ctx, manager, args.path.as_deref())? else {
        return Ok(cancelled());
    };
    let viewer = gh.viewer_login()?;
    let mut last = None;
    let mut failed = 0usize;
    for choice in &targets {
        let path = dest.join(&choice.repo.name);
        if path.exists() {
            warn!(path = %path.display(), "clone target exists; skipping");
            eprintln!("warning: {} already exists, skipping", path.display());
            continue;
        }
        match clone_into(ctx, manager, &gh, &format!("{viewer}/{}", choice.repo.name), &path) {
            Ok(record) => last = Some(record.path),
            Err(e) if args.all => {
                failed += 1;
                eprintln!("warning: {e:#}");
            }
            Err(e) => return Err(e),
        }
    }

    if args.all {
        println!("Cloned {} of {} repositories", targets.len() - failed, targets.len());
    } else if let Some(path) = last {
        cd(&path)?;
    }
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn rename(ctx: &Context, manager: &Manager, args: &RenameArgs) -> anyhow::Result<ExitCode> {
    validate::repo_name(&args.new)?;
    let (repos, _) = manager.repos(false)?;

    let record = if args.github_only {
        match pick(&NonInteractivePicker, "repository", "", &repos, Some(&args.old)) {
            Ok(found) => found.cloned(),
            Err(WtError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        }
    } else {
        match pick(ctx.picker(), "repository", "Select repository to rename", &repos, Some(&args.old))? {
            Some(found) => Some(found.clone()),
            None => return Ok(cancelled()),
        }
    };

    let mut renamed_local: Option<(PathBuf, PathBuf)> = None;
    if !args.github_only
        && let Some(record) = &record
    {
        let new_path = record
            .path
            .parent()
            .map_or_else(|| PathBuf::from(&args.new), |p| p.join(&args.new));
        if new_path.exists() {
            anyhow::bail!("{} already exists", new_path.display());
        }
        std::fs::rename(&record.path, &new_path).map_err(|e| WtError::io(&record.path, e))?;
        info!(from = %record.path.display(), to = %new_path.display(), "renamed local repository");
        println!("Renamed {} -> {}", record.path.display(), new_path.display());
        update_cache(manager, &record.path, &new_path);
        renamed_local = Some((record.path.clone(), new_path));
    }

    if !args.local_only {
        let gh = GitHub::new(&ctx.runner, &ctx.cwd);
        let full_name = match record.as_ref().and_then(|r| r.remote.clone()) {
            Some(remote) => remote,
            None => format!("{}/{}", gh.viewer_login()?, args.old),
        };
        let (owner, _) = validate::full_repo_name(&full_name)?;

        if let Err(e) = gh.rename_repo(&full_name, &args.new) {
            if let Some((old_path, new_path)) = &renamed_local {
                revert_local(manager, old_path, new_path);
            }
            return Err(e.into());
        }
        println!("Renamed {full_name} -> {owner}/{} on GitHub", args.new);

        if let Some((_, new_path)) = &renamed_local {
            let url = format!("git@github.com:{owner}/{}.git", args.new);
            let git = Git::new(&ctx.runner, new_path);
            match git.set_remote_url(new_path, &url) {
                Ok(()) => {
                    println!("Updated origin to {url}");
                    update_cache(manager, new_path, new_path);
                }
                Err(e) => {
                    warn!(error = %e, "failed to update origin url");
                    eprintln!("warning: could not update origin: {e}");
                }
            }
        }
    }

    if let Some((_, new_path)) = &renamed_local {
        cd(new_path)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn update_cache(manager: &Manager, old: &Path, new: &Path) {
    let result = manager.remove(old).and_then(|()| manager.add(new).map(|_| ()));
    if let Err(e) = result {
        warn!(error = %e, "failed to update repo cache after rename");
    }
}

fn revert_local(manager: &Manager, old_path: &Path, new_path: &Path) {
    match std::fs::rename(new_path, old_path) {
        Ok(()) => {
            update_cache(manager, new_path, old_path);
            println!("Reverted local rename");
        }
        Err(e) => {
            warn!(error = %e, "failed to revert local rename");
            eprintln!(
                "warning: could not move {} back to {}: {e}",
                new_path.display(),
                old_path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_choices_skip_hidden_and_repos() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("code");
        std::fs::create_dir_all(base.join("work")).unwrap();
        std::fs::create_dir_all(base.join(".cache")).unwrap();
        std::fs::create_dir_all(base.join("already/.git")).unwrap();
        std::fs::write(base.join("notes.txt"), "x").unwrap();

        let got = destination_choices(&[base.clone(), tmp.path().join("missing")]);
        assert_eq!(got, vec![base.clone(), base.join("work")]);
    }

    #[test]
    fn clone_choice_marks_local_copies() {
        let choice = CloneChoice {
            repo: OwnRepo {
                name: "tool".to_owned(),
                url: String::new(),
                description: Some("A small tool".to_owned()),
            },
            local: Some(PathBuf::from("/tmp/tool")),
        };
        assert_eq!(choice.label(), "tool  A small tool  [cloned]");
        assert_eq!(choice.keys(), vec!["tool".to_owned()]);
    }
}
