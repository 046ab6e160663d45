#![forbid(unsafe_code)]

use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::cli::{Context, cancelled, choose_option, exit_status, pick, print_json};
use crate::core::color::{self, ColorInput, GITIGNORE_PATTERN};
use crate::core::git::Git;
use crate::core::github::{GitHub, PrFilter};
use crate::core::naming::suggest_worktree_name;
use crate::core::process::{Invocation, Runner as _};
use crate::core::validate;
use crate::core::worktree::{BranchStart, CreateRequest, Worktree, WorktreeManager};
use crate::error::WtError;
use crate::output::table::Table;
use crate::shell::handoff::{Handoff, WT_CD_FILE};
use crate::tui::picker::NonInteractivePicker;
use crate::tui::prompt;

const GITIGNORE_DECLINED_VAR: &str = "WT_GITIGNORE_DECLINED";
const NEW_BRANCH: &str = "[+] Create new branch";

#[derive(Debug, Parser)]
#[command(args_conflicts_with_subcommands = true)]
pub struct WtArgs {
    #[command(subcommand)]
    pub cmd: Option<WtCmd>,
    /// Worktree to switch to
    pub name: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum WtCmd {
    /// Switch to a worktree
    #[command(visible_alias = "sw")]
    Switch(NameArg),
    /// Create a worktree for an existing or new branch
    #[command(visible_alias = "cr")]
    Create(CreateArgs),
    /// Create a worktree from an open pull request
    Pr(NameArg),
    /// Create a worktree with a new branch
    #[command(visible_alias = "fk")]
    Fork(CreateArgs),
    #[command(visible_alias = "ls")]
    List(ListArgs),
    #[command(visible_alias = "rm")]
    Remove(RemoveArgs),
    /// Run claude inside a worktree
    #[command(visible_alias = "c")]
    Claude(NameArg),
    /// Print a worktree's path
    Path(PathArgs),
    /// Remove the worktree you are in
    Cleanup,
    /// Show, set or reset the editor title-bar color
    Color(ColorArgs),
    /// Open the worktree's color workspace in VS Code
    Code(NameArg),
}

#[derive(Debug, Parser)]
pub struct NameArg {
    pub name: Option<String>,
}

#[derive(Debug, Parser)]
pub struct CreateArgs {
    /// Worktree directory name
    pub name: Option<String>,
    #[arg(short = 'b', long = "branch")]
    pub branch: Option<String>,
    /// Start point for a new branch
    #[arg(long = "base")]
    pub base: Option<String>,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    #[arg(long = "json", conflicts_with = "csv")]
    pub json: bool,
    #[arg(long = "csv")]
    pub csv: bool,
}

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    pub name: Option<String>,
    /// Skip confirmation and remove even with uncommitted changes
    #[arg(short = 'f', long = "force")]
    pub force: bool,
}

#[derive(Debug, Parser)]
pub struct PathArgs {
    pub name: String,
}

#[derive(Debug, Parser)]
pub struct ColorArgs {
    /// Preset name or six-digit hex
    pub color: Option<String>,
    #[arg(short = 'w', long = "worktree")]
    pub worktree: Option<String>,
    #[arg(long = "reset", conflicts_with = "color")]
    pub reset: bool,
}

pub fn run(ctx: &Context, args: WtArgs) -> anyhow::Result<ExitCode> {
    let root = ctx.repo_root()?;
    let git = Git::new(&ctx.runner, &root);
    let mut manager = WorktreeManager::new(git, &ctx.cfg.worktree.dir_suffix, &ctx.cwd);

    match args.cmd {
        None => switch(ctx, &manager, args.name.as_deref()),
        Some(WtCmd::Switch(a)) => switch(ctx, &manager, a.name.as_deref()),
        Some(WtCmd::Create(a)) => create(ctx, &manager, a),
        Some(WtCmd::Pr(a)) => from_pr(ctx, &manager, a.name),
        Some(WtCmd::Fork(a)) => fork(ctx, &manager, a),
        Some(WtCmd::List(a)) => list(&manager, &a),
        Some(WtCmd::Remove(a)) => remove(ctx, &manager, &a),
        Some(WtCmd::Claude(a)) => claude(ctx, &manager, a.name.as_deref()),
        Some(WtCmd::Path(a)) => path(&manager, &a.name),
        Some(WtCmd::Cleanup) => cleanup(&mut manager),
        Some(WtCmd::Color(a)) => color_cmd(ctx, &manager, &a),
        Some(WtCmd::Code(a)) => code(ctx, &manager, a.name.as_deref()),
    }
}

fn selectable(manager: &WorktreeManager<'_>) -> Result<Vec<Worktree>, WtError> {
    Ok(manager.list()?.into_iter().filter(|w| !w.is_bare).collect())
}

fn switch(ctx: &Context, manager: &WorktreeManager<'_>, name: Option<&str>) -> anyhow::Result<ExitCode> {
    let worktrees = selectable(manager)?;
    let Some(target) = pick(ctx.picker(), "worktree", "Select worktree", &worktrees, name)? else {
        return Ok(cancelled());
    };

    let mut handoff = Handoff::from_env(WT_CD_FILE);
    handoff.request_directory_change(&target.path)?;

    if let Some(branch) = auto_color_branch(ctx.cfg.color.auto_assign, target)
        && let Err(e) = auto_assign_color(ctx, &mut handoff, manager.git().repo_root(), &target.path, branch)
    {
        warn!(path = %target.path.display(), error = %e, "color assignment failed");
        eprintln!("warning: could not assign a color: {e}");
    }
    if ctx.cfg.color.tab_color {
        let current = color::read_color(&target.path).unwrap_or(None);
        color::apply_tab_color(current.as_deref());
    }
    Ok(ExitCode::SUCCESS)
}

/// The branch to color lazily on switch. The main worktree and detached
/// heads keep the editor default.
fn auto_color_branch(enabled: bool, target: &Worktree) -> Option<&str> {
    if !enabled || target.is_main {
        return None;
    }
    target.branch.as_deref()
}

/// Writes the branch's default color unless a sidecar already exists.
fn assign_default_color(dir: &Path, branch: &str) -> Result<bool, WtError> {
    if color::find_sidecar(dir)?.is_some() {
        return Ok(false);
    }
    let (preset, hex) = color::default_preset_for(branch);
    color::write_color(dir, branch, hex)?;
    info!(branch, preset, "assigned default color");
    Ok(true)
}

fn auto_assign_color(
    ctx: &Context,
    handoff: &mut Handoff,
    repo_root: &Path,
    dir: &Path,
    branch: &str,
) -> anyhow::Result<()> {
    if assign_default_color(dir, branch)? {
        ensure_ignored(ctx, handoff, repo_root)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GitignoreStep {
    AlreadyIgnored,
    /// Declined earlier in this shell session.
    Declined,
    NoTerminal,
    Ask,
}

fn gitignore_step(repo_root: &Path, declined: Option<&str>, interactive: bool) -> GitignoreStep {
    if color::gitignore_has_pattern(repo_root) {
        GitignoreStep::AlreadyIgnored
    } else if declined == Some("1") {
        GitignoreStep::Declined
    } else if !interactive {
        GitignoreStep::NoTerminal
    } else {
        GitignoreStep::Ask
    }
}

fn apply_gitignore_answer(handoff: &mut Handoff, repo_root: &Path, accepted: bool) -> Result<(), WtError> {
    if accepted {
        color::ensure_gitignore_pattern(repo_root)?;
        println!("Added '{GITIGNORE_PATTERN}' to .gitignore");
    } else {
        handoff.request_environment_export(GITIGNORE_DECLINED_VAR, "1")?;
    }
    Ok(())
}

/// Asks once per shell session before adding the sidecar pattern to `.gitignore`.
fn ensure_ignored(ctx: &Context, handoff: &mut Handoff, repo_root: &Path) -> anyhow::Result<()> {
    let declined = std::env::var(GITIGNORE_DECLINED_VAR).ok();
    match gitignore_step(repo_root, declined.as_deref(), ctx.picker().is_interactive()) {
        GitignoreStep::AlreadyIgnored | GitignoreStep::Declined => Ok(()),
        GitignoreStep::NoTerminal => {
            warn!(repo = %repo_root.display(), "sidecar pattern missing from .gitignore; not prompting without a terminal");
            Ok(())
        }
        GitignoreStep::Ask => {
            let accepted = prompt::confirm(&format!("Add '{GITIGNORE_PATTERN}' to .gitignore?"), true)?;
            Ok(apply_gitignore_answer(handoff, repo_root, accepted)?)
        }
    }
}

fn finish_create(manager: &WorktreeManager<'_>, req: &CreateRequest) -> anyhow::Result<ExitCode> {
    let path = manager.create(req)?;
    println!("Created worktree '{}'", req.name);
    println!("  {}", path.display());
    Handoff::from_env(WT_CD_FILE).request_directory_change(&path)?;
    Ok(ExitCode::SUCCESS)
}

fn worktree_name(name: Option<String>, branch: &str) -> anyhow::Result<String> {
    let name = match name {
        Some(n) => n,
        None => prompt::prompt_line("Worktree name", Some(&suggest_worktree_name(branch)))?,
    };
    validate::worktree_name(&name)?;
    Ok(name)
}

/// Branch start for "the commit checked out where I stand".
fn head_start(manager: &WorktreeManager<'_>) -> Result<BranchStart, WtError> {
    Ok(match manager.current()? {
        Some(wt) if !wt.head.is_empty() => BranchStart::FromBase(wt.head),
        _ => BranchStart::New,
    })
}

/// A branch name as typed or picked: `origin/x` becomes local `x`, tracking
/// the remote one when `x` does not exist yet.
fn existing_branch(git: Git<'_>, picked: &str) -> Result<(String, BranchStart), WtError> {
    let local = picked.strip_prefix("origin/").unwrap_or(picked);
    if git.branch_exists(local)? {
        return Ok((local.to_owned(), BranchStart::Existing));
    }
    if local == picked {
        return Err(WtError::not_found("branch", picked));
    }
    Ok((local.to_owned(), BranchStart::FromBase(picked.to_owned())))
}

/// The default branch, preferring its remote-tracking ref for the latest commits.
fn default_base(git: Git<'_>) -> Result<String, WtError> {
    let default = git.default_branch()?;
    if git.remote_branch_exists(&default)? {
        Ok(format!("origin/{default}"))
    } else {
        Ok(default)
    }
}

fn pick_branch(ctx: &Context, git: Git<'_>, title: &str) -> anyhow::Result<Option<String>> {
    let branches = git.list_branches(true)?;
    let Some(i) = choose_option(ctx.picker(), title, &branches, "pass --base")? else {
        return Ok(None);
    };
    Ok(Some(branches[i].clone()))
}

fn create(ctx: &Context, manager: &WorktreeManager<'_>, args: CreateArgs) -> anyhow::Result<ExitCode> {
    let git = manager.git();

    if let Some(branch) = args.branch {
        let name = args.name.unwrap_or_else(|| suggest_worktree_name(&branch));
        let start = if git.branch_exists(&branch)? {
            if args.base.is_some() {
                anyhow::bail!("branch '{branch}' already exists; drop --base to use it");
            }
            BranchStart::Existing
        } else {
            BranchStart::FromBase(match args.base {
                Some(base) => base,
                None => default_base(git)?,
            })
        };
        return finish_create(manager, &CreateRequest { name, branch, start });
    }

    let branches = git.list_branches(true)?;
    let mut options = vec![NEW_BRANCH.to_owned()];
    options.extend(branches.iter().cloned());
    let Some(index) = choose_option(ctx.picker(), "Select branch", &options, "pass -b BRANCH")? else {
        return Ok(cancelled());
    };

    let (branch, start) = if index == 0 {
        let branch = prompt::prompt_line("New branch name", None)?;
        validate::branch_name(&branch)?;
        let start = match args.base {
            Some(base) => BranchStart::FromBase(base),
            None => {
                git.fetch_origin()?;
                let default = git.default_branch()?;
                let choices = vec![
                    format!("{default} (default)"),
                    "HEAD (current)".to_owned(),
                    "Pick a branch...".to_owned(),
                ];
                match choose_option(ctx.picker(), "Branch from", &choices, "pass --base")? {
                    None => return Ok(cancelled()),
                    Some(0) => BranchStart::FromBase(default_base(git)?),
                    Some(1) => head_start(manager)?,
                    Some(_) => match pick_branch(ctx, git, "Select base branch")? {
                        Some(b) => BranchStart::FromBase(b),
                        None => return Ok(cancelled()),
                    },
                }
            }
        };
        (branch, start)
    } else {
        existing_branch(git, &options[index])?
    };

    let name = worktree_name(args.name, &branch)?;
    finish_create(manager, &CreateRequest { name, branch, start })
}

fn fork(ctx: &Context, manager: &WorktreeManager<'_>, args: CreateArgs) -> anyhow::Result<ExitCode> {
    let git = manager.git();
    let branch = match args.branch {
        Some(b) => b,
        None => prompt::prompt_line("New branch name", None)?,
    };
    validate::branch_name(&branch)?;
    if git.branch_exists(&branch)? {
        anyhow::bail!("branch '{branch}' already exists; use 'wt create -b {branch}'");
    }

    let start = match args.base {
        Some(base) if base == "HEAD" => head_start(manager)?,
        Some(base) => BranchStart::FromBase(base),
        None => {
            let default = git.default_branch()?;
            let choices = vec![
                "HEAD (current)".to_owned(),
                default,
                "Pick a branch...".to_owned(),
            ];
            match choose_option(ctx.picker(), "Branch from", &choices, "pass --base")? {
                None => return Ok(cancelled()),
                Some(0) => head_start(manager)?,
                Some(1) => {
                    git.fetch_origin()?;
                    BranchStart::FromBase(default_base(git)?)
                }
                Some(_) => {
                    git.fetch_origin()?;
                    match pick_branch(ctx, git, "Select base branch")? {
                        Some(b) => BranchStart::FromBase(b),
                        None => return Ok(cancelled()),
                    }
                }
            }
        }
    };

    let name = worktree_name(args.name, &branch)?;
    finish_create(manager, &CreateRequest { name, branch, start })
}

fn from_pr(ctx: &Context, manager: &WorktreeManager<'_>, name: Option<String>) -> anyhow::Result<ExitCode> {
    let git = manager.git();
    let gh = GitHub::new(&ctx.runner, git.repo_root());
    println!("Fetching PRs from GitHub...");
    let prs = gh.list_prs(&PrFilter {
        author: None,
        include_drafts: true,
    })?;
    if prs.is_empty() {
        anyhow::bail!("no open pull requests found");
    }
    let Some(pr) = pick(ctx.picker(), "pull request", "Select PR", &prs, None)? else {
        return Ok(cancelled());
    };
    let number = validate::pr_number(pr.number)?;
    let branch = pr.head_ref_name.clone();
    let name = worktree_name(name, &branch)?;

    println!("Fetching PR #{number}...");
    git.fetch_pull_request(number, &branch)?;
    finish_create(
        manager,
        &CreateRequest {
            name,
            branch,
            start: BranchStart::Existing,
        },
    )
}

fn list(manager: &WorktreeManager<'_>, args: &ListArgs) -> anyhow::Result<ExitCode> {
    let worktrees = manager.list()?;
    if args.json {
        print_json(&worktrees)?;
        return Ok(ExitCode::SUCCESS);
    }
    if worktrees.is_empty() {
        println!("No worktrees found.");
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = Table::new(["NAME", "BRANCH", "HEAD", "PATH"]);
    for wt in &worktrees {
        let marker = if wt.is_current { "* " } else { "  " };
        let branch = if wt.is_bare { "(bare)" } else { wt.branch_label() };
        table.row([
            format!("{marker}{}", wt.name),
            branch.to_owned(),
            wt.head.chars().take(8).collect(),
            wt.path.display().to_string(),
        ]);
    }
    if args.csv {
        table.print_csv()?;
    } else {
        table.print()?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Confirms a dirty worktree; returns the force flag to use, or `None` to stop.
fn confirm_dirty(manager: &WorktreeManager<'_>, wt: &Worktree, force: bool) -> anyhow::Result<Option<bool>> {
    if force || !manager.git().is_dirty(&wt.path)? {
        return Ok(Some(force));
    }
    let ok = prompt::confirm(
        &format!("Worktree '{}' has uncommitted changes. Remove anyway?", wt.name),
        false,
    )?;
    Ok(ok.then_some(true))
}

fn remove(ctx: &Context, manager: &WorktreeManager<'_>, args: &RemoveArgs) -> anyhow::Result<ExitCode> {
    let worktrees: Vec<Worktree> = selectable(manager)?
        .into_iter()
        .filter(|w| !w.is_main)
        .collect();
    let Some(target) = pick(
        ctx.picker(),
        "worktree",
        "Select worktree to remove",
        &worktrees,
        args.name.as_deref(),
    )?
    else {
        return Ok(cancelled());
    };
    if target.is_current {
        return Err(WtError::CannotRemoveCurrentWorktree(target.path.clone()).into());
    }

    if !args.force && !prompt::confirm(&format!("Remove worktree '{}'?", target.name), false)? {
        return Ok(cancelled());
    }
    let Some(force) = confirm_dirty(manager, target, args.force)? else {
        return Ok(cancelled());
    };
    manager.remove(target, force)?;
    println!("Removed worktree '{}'", target.name);
    Ok(ExitCode::SUCCESS)
}

fn claude(ctx: &Context, manager: &WorktreeManager<'_>, name: Option<&str>) -> anyhow::Result<ExitCode> {
    let worktrees = selectable(manager)?;
    let Some(target) = pick(ctx.picker(), "worktree", "Select worktree for Claude", &worktrees, name)? else {
        return Ok(cancelled());
    };
    println!("Opening Claude in {}...", target.path.display());
    let code = ctx
        .runner
        .interactive(&Invocation::new("claude").cwd(&target.path))?;
    Ok(exit_status(code))
}

fn path(manager: &WorktreeManager<'_>, name: &str) -> anyhow::Result<ExitCode> {
    let worktrees = selectable(manager)?;
    // Output is meant for `$(...)`, so never open a picker.
    let Some(target) = pick(&NonInteractivePicker, "worktree", "", &worktrees, Some(name))? else {
        return Ok(ExitCode::from(1));
    };
    println!("{}", target.path.display());
    Ok(ExitCode::SUCCESS)
}

fn cleanup(manager: &mut WorktreeManager<'_>) -> anyhow::Result<ExitCode> {
    let current = manager
        .current()?
        .ok_or_else(|| WtError::Validation("not inside a worktree of this repository".to_owned()))?;
    if current.is_main {
        anyhow::bail!("cannot clean up the main worktree");
    }
    if !prompt::confirm(&format!("Remove current worktree '{}'?", current.name), false)? {
        return Ok(cancelled());
    }
    let Some(force) = confirm_dirty(manager, &current, false)? else {
        return Ok(cancelled());
    };

    let main = manager.main()?;
    let handoff = Handoff::from_env(WT_CD_FILE);
    leave_and_remove(manager, &handoff, &current, &main.path, force, |dir| {
        std::env::set_current_dir(dir)
    })?;
    println!("Removed worktree '{}'", current.name);

    if let Some(branch) = current.branch.as_deref() {
        offer_branch_delete(manager.git(), branch)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Sends the shell and this process to `main` first, so neither is left in
/// the deleted directory, then removes `current`.
fn leave_and_remove(
    manager: &mut WorktreeManager<'_>,
    handoff: &Handoff,
    current: &Worktree,
    main: &Path,
    force: bool,
    enter: impl FnOnce(&Path) -> std::io::Result<()>,
) -> Result<(), WtError> {
    handoff.request_directory_change(main)?;
    enter(main).map_err(|e| WtError::io(main, e))?;
    manager.set_cwd(main);
    manager.remove(current, force)
}

fn offer_branch_delete(git: Git<'_>, branch: &str) -> anyhow::Result<()> {
    if !prompt::confirm(&format!("Delete branch '{branch}'?"), false)? {
        return Ok(());
    }
    match git.delete_branch(branch, false) {
        Ok(()) => {
            println!("Deleted branch '{branch}'");
            return Ok(());
        }
        Err(e) => warn!(branch, error = %e, "branch delete refused"),
    }
    if prompt::confirm(&format!("Branch '{branch}' is not fully merged. Force delete?"), false)? {
        git.delete_branch(branch, true)?;
        println!("Force deleted branch '{branch}'");
    }
    Ok(())
}

fn color_target(ctx: &Context, manager: &WorktreeManager<'_>, fragment: Option<&str>) -> anyhow::Result<Option<Worktree>> {
    let worktrees = selectable(manager)?;
    if let Some(frag) = fragment {
        return Ok(pick(ctx.picker(), "worktree", "Select worktree", &worktrees, Some(frag))?.cloned());
    }
    Ok(Some(
        worktrees
            .into_iter()
            .find(|w| w.is_current)
            .ok_or_else(|| WtError::Validation("not inside a worktree; pass -w WORKTREE".to_owned()))?,
    ))
}

fn color_cmd(ctx: &Context, manager: &WorktreeManager<'_>, args: &ColorArgs) -> anyhow::Result<ExitCode> {
    let Some(target) = color_target(ctx, manager, args.worktree.as_deref())? else {
        return Ok(cancelled());
    };
    let tab = ctx.cfg.color.tab_color && target.is_current;

    if args.reset {
        if color::reset_color(&target.path)? {
            println!("Reset color for '{}'", target.name);
        } else {
            println!("No color set for '{}'", target.name);
        }
        if tab {
            color::apply_tab_color(None);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let Some(raw) = args.color.as_deref() else {
        match color::read_color(&target.path)? {
            Some(hex) => println!("#{hex}"),
            None => println!("No color set for '{}'", target.name),
        }
        return Ok(ExitCode::SUCCESS);
    };

    let input = ColorInput::parse(raw);
    let hex = input.hex()?;
    let branch = target.branch.as_deref().unwrap_or("detached");
    let path = color::write_color(&target.path, branch, hex)?;
    match &input {
        ColorInput::Preset { name, .. } => println!("Set color for '{}' to {name} (#{hex})", target.name),
        _ => println!("Set color for '{}' to #{hex}", target.name),
    }
    println!("  {}", path.display());

    let mut handoff = Handoff::from_env(WT_CD_FILE);
    if let Err(e) = ensure_ignored(ctx, &mut handoff, manager.git().repo_root()) {
        warn!(error = %e, "gitignore update failed");
        eprintln!("warning: could not update .gitignore: {e}");
    }
    if tab {
        color::apply_tab_color(Some(hex));
    }
    Ok(ExitCode::SUCCESS)
}

fn code(ctx: &Context, manager: &WorktreeManager<'_>, name: Option<&str>) -> anyhow::Result<ExitCode> {
    let worktrees = selectable(manager)?;
    let Some(target) = pick(ctx.picker(), "worktree", "Select worktree", &worktrees, name)? else {
        return Ok(cancelled());
    };

    let workspace = match color::find_sidecar(&target.path)? {
        Some(p) => p,
        None => {
            let branch = target.branch.as_deref().unwrap_or("detached");
            let (_, hex) = color::default_preset_for(branch);
            let p = color::write_color(&target.path, branch, hex)?;
            let mut handoff = Handoff::from_env(WT_CD_FILE);
            if let Err(e) = ensure_ignored(ctx, &mut handoff, manager.git().repo_root()) {
                warn!(error = %e, "gitignore update failed");
                eprintln!("warning: could not update .gitignore: {e}");
            }
            p
        }
    };
    println!("Opening {} in VS Code...", workspace.display());
    let code = ctx.runner.interactive(
        &Invocation::new("code")
            .arg(workspace.to_string_lossy())
            .cwd(&target.path),
    )?;
    Ok(exit_status(code))
}
