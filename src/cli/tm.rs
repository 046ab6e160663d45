#![forbid(unsafe_code)]

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::cli::{Context, cancelled, choose_option, pick};
use crate::core::git::{self, Git};
use crate::core::naming::sanitize_session_name;
use crate::core::resolve::Candidate;
use crate::error::WtError;
use crate::mux::Mux;
use crate::mux::tmux::TmuxMux;
use crate::output::table::Table;
use crate::tui::picker::Picker;
use crate::tui::prompt;

const NEW_SESSION: &str = "[+] Create new session";

#[derive(Debug, Parser)]
pub struct TmArgs {
    #[command(subcommand)]
    pub cmd: Option<TmCmd>,
}

#[derive(Debug, Subcommand)]
pub enum TmCmd {
    /// Create a session (default name: the current branch)
    #[command(visible_alias = "c")]
    Create(NameArg),
    #[command(visible_alias = "a")]
    Attach(NameArg),
    #[command(visible_alias = "ls")]
    List(ListArgs),
    #[command(visible_alias = "k")]
    Kill(KillArgs),
}

#[derive(Debug, Parser)]
pub struct NameArg {
    pub name: Option<String>,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    #[arg(long = "csv")]
    pub csv: bool,
}

#[derive(Debug, Parser)]
pub struct KillArgs {
    pub name: Option<String>,
    /// Kill without confirmation
    #[arg(short = 'f', long = "force")]
    pub force: bool,
}

pub fn run(ctx: &Context, args: TmArgs) -> anyhow::Result<ExitCode> {
    let tmux = TmuxMux::new(&ctx.runner, &ctx.cfg.tmux.command);
    let host = tmux.hostname();
    let mux: &dyn Mux = &tmux;
    let picker = ctx.picker();

    match args.cmd {
        None => default_action(ctx, mux, picker, &host),
        Some(TmCmd::Create(a)) => {
            refuse_inside(mux, &host, "create")?;
            let name = match a.name {
                Some(n) => n,
                None => prompt::prompt_line("Session name", Some(&suggested_name(ctx, &host)))?,
            };
            create_session(mux, picker, &name)
        }
        Some(TmCmd::Attach(a)) => {
            refuse_inside(mux, &host, "attach")?;
            attach(ctx, mux, picker, &host, a.name.as_deref())
        }
        Some(TmCmd::List(a)) => list(mux, a.csv),
        Some(TmCmd::Kill(a)) => {
            refuse_inside(mux, &host, "kill")?;
            kill(mux, picker, &a)
        }
    }
}

fn inside_tmux() -> bool {
    std::env::var_os("TMUX").is_some()
}

fn refuse_inside(mux: &dyn Mux, host: &str, verb: &str) -> anyhow::Result<()> {
    if !inside_tmux() {
        return Ok(());
    }
    let session = mux.current_session()?.unwrap_or_else(|| "?".to_owned());
    Err(WtError::Validation(format!(
        "cannot run 'tm {verb}' from inside tmux session {session}@{host}"
    ))
    .into())
}

/// The current branch made session-safe, or the host name outside a repository.
fn suggested_name(ctx: &Context, host: &str) -> String {
    let branch = git::find_repo_root(&ctx.runner, &ctx.cwd)
        .ok()
        .and_then(|root| Git::new(&ctx.runner, &root).current_branch(&root).ok().flatten());
    branch
        .and_then(|b| sanitize_session_name(&b).ok())
        .or_else(|| sanitize_session_name(host).ok())
        .unwrap_or_else(|| "main".to_owned())
}

fn default_action(ctx: &Context, mux: &dyn Mux, picker: &dyn Picker, host: &str) -> anyhow::Result<ExitCode> {
    if inside_tmux() {
        print_current(mux, host)?;
        return Ok(ExitCode::SUCCESS);
    }

    let suggested = suggested_name(ctx, host);
    let sessions = mux.list_sessions()?;
    if sessions.iter().any(|s| s.name == suggested) {
        return attach_session(mux, picker, &suggested);
    }

    let mut options = vec![NEW_SESSION.to_owned()];
    options.extend(sessions.iter().map(Candidate::label));
    let title = if sessions.is_empty() { "No sessions found" } else { "Select session" };
    let Some(index) = choose_option(picker, title, &options, "use 'tm create NAME' or 'tm attach NAME'")? else {
        return Ok(cancelled());
    };
    if index == 0 {
        let name = prompt::prompt_line("Session name", Some(&suggested))?;
        return create_session(mux, picker, &name);
    }
    attach_session(mux, picker, &sessions[index - 1].name)
}

fn print_current(mux: &dyn Mux, host: &str) -> anyhow::Result<()> {
    let Some(name) = mux.current_session()? else {
        anyhow::bail!("could not determine the current tmux session");
    };
    println!("Inside tmux session: {name}@{host}");
    if let Some(current) = mux.list_sessions()?.into_iter().find(|s| s.name == name) {
        println!("  Windows: {}", current.windows);
        println!("  Clients: {}", current.status());
    }
    Ok(())
}

fn create_session(mux: &dyn Mux, picker: &dyn Picker, raw: &str) -> anyhow::Result<ExitCode> {
    let name = sanitize_session_name(raw)?;
    if name != raw {
        println!("  (sanitized to '{name}')");
    }
    if mux.has_session(&name)? {
        if !picker.is_interactive() {
            anyhow::bail!("session '{name}' already exists; use 'tm attach {name}'");
        }
        if prompt::confirm(&format!("Session '{name}' already exists. Attach to it?"), true)? {
            return attach_session(mux, picker, &name);
        }
        return Ok(cancelled());
    }
    println!("Creating session '{name}'...");
    mux.create(&name)?;
    Ok(ExitCode::SUCCESS)
}

/// Attaches, asking how to share a session another client already holds.
fn attach_session(mux: &dyn Mux, picker: &dyn Picker, name: &str) -> anyhow::Result<ExitCode> {
    let Some(session) = mux.list_sessions()?.into_iter().find(|s| s.name == name) else {
        return Err(WtError::not_found("session", name).into());
    };
    if !session.attached {
        println!("Attaching to session '{name}'...");
        mux.attach(name, false)?;
        return Ok(ExitCode::SUCCESS);
    }

    let grouped = mux.next_grouped_name(name)?;
    let options = vec![
        format!("[+] Create new window ({grouped})"),
        "[D] Detach other client and attach".to_owned(),
        "[J] Join session (share with other client)".to_owned(),
    ];
    println!("Session '{name}' is already attached.");
    let hint = "detach the other client first";
    match choose_option(picker, "How do you want to attach?", &options, hint)? {
        None => Ok(cancelled()),
        Some(0) => {
            println!("Creating grouped session '{grouped}'...");
            mux.create_grouped(&grouped, name)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(1) => {
            println!("Detaching other client and attaching...");
            mux.attach(name, true)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(_) => {
            println!("Joining session '{name}'...");
            mux.attach(name, false)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn attach(ctx: &Context, mux: &dyn Mux, picker: &dyn Picker, host: &str, name: Option<&str>) -> anyhow::Result<ExitCode> {
    let sessions = mux.list_sessions()?;
    if sessions.is_empty() {
        eprintln!("No tmux sessions found.");
        if !picker.is_interactive() || !prompt::confirm("Create a new session?", true)? {
            return Ok(ExitCode::from(1));
        }
        let name = prompt::prompt_line("Session name", Some(&suggested_name(ctx, host)))?;
        return create_session(mux, picker, &name);
    }

    let target = if name.is_none() && sessions.len() == 1 {
        &sessions[0]
    } else {
        match pick(picker, "session", "Select session", &sessions, name)? {
            Some(s) => s,
            None => return Ok(cancelled()),
        }
    };
    attach_session(mux, picker, &target.name)
}

fn list(mux: &dyn Mux, csv: bool) -> anyhow::Result<ExitCode> {
    let sessions = mux.list_sessions()?;
    if sessions.is_empty() {
        println!("No tmux sessions found.");
        return Ok(ExitCode::SUCCESS);
    }
    let current = mux.current_session()?;
    let mut table = Table::new(["NAME", "STATUS", "WINDOWS"]);
    for s in &sessions {
        let marker = if current.as_deref() == Some(s.name.as_str()) { "* " } else { "  " };
        table.row([format!("{marker}{}", s.name), s.status().to_owned(), s.windows.to_string()]);
    }
    if csv {
        table.print_csv()?;
    } else {
        table.print()?;
    }
    Ok(ExitCode::SUCCESS)
}

fn kill(mux: &dyn Mux, picker: &dyn Picker, args: &KillArgs) -> anyhow::Result<ExitCode> {
    let sessions = mux.list_sessions()?;
    let Some(target) = pick(picker, "session", "Select session to kill", &sessions, args.name.as_deref())? else {
        return Ok(cancelled());
    };
    if !args.force && !prompt::confirm(&format!("Kill session '{}'?", target.name), false)? {
        return Ok(cancelled());
    }
    mux.kill(&target.name)?;
    info!(session = %target.name, "session killed by user");
    println!("Killed session '{}'", target.name);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::Captured;
    use crate::core::process::fake::FakeRunner;
    use crate::tui::picker::NonInteractivePicker;

    fn runner_with(sessions: &str) -> FakeRunner {
        let runner = FakeRunner::default();
        runner
            .on(&["tmux", "list-sessions"], Captured::ok(sessions))
            .on(&["tmux", "has-session"], Captured::failed(1, ""))
            .on(&["tmux", "attach-session"], Captured::ok(""))
            .on(&["tmux", "new-session"], Captured::ok(""))
            .on(&["tmux", "kill-session"], Captured::ok(""))
            .on(&["hostname"], Captured::ok("box.example.com\n"));
        runner
    }

    fn tmux_calls(runner: &FakeRunner) -> Vec<String> {
        runner
            .call_lines()
            .into_iter()
            .filter(|l| l.starts_with("tmux ") && !l.starts_with("tmux list-sessions"))
            .collect()
    }

    #[test]
    fn detached_session_attaches_directly() {
        let runner = runner_with("dev\t0\t2\n");
        let mux = TmuxMux::new(&runner, "tmux");
        attach_session(&mux, &NonInteractivePicker, "dev").unwrap();
        assert_eq!(tmux_calls(&runner), vec!["tmux attach-session -t dev".to_owned()]);
    }

    #[test]
    fn attached_session_needs_a_choice() {
        let runner = runner_with("dev\t1\t2\n");
        let mux = TmuxMux::new(&runner, "tmux");
        let err = attach_session(&mux, &NonInteractivePicker, "dev").unwrap_err();
        assert!(matches!(err.downcast_ref::<WtError>(), Some(WtError::Validation(_))));
        assert!(tmux_calls(&runner).iter().all(|c| !c.starts_with("tmux attach-session")));
    }

    #[test]
    fn unknown_session_is_not_found() {
        let runner = runner_with("dev\t0\t2\n");
        let mux = TmuxMux::new(&runner, "tmux");
        let err = attach_session(&mux, &NonInteractivePicker, "prod").unwrap_err();
        assert!(matches!(err.downcast_ref::<WtError>(), Some(WtError::NotFound { .. })));
    }

    #[test]
    fn create_sanitizes_branch_like_names() {
        let runner = runner_with("");
        let mux = TmuxMux::new(&runner, "tmux");
        create_session(&mux, &NonInteractivePicker, "feat/login.v2").unwrap();
        let calls = tmux_calls(&runner);
        assert_eq!(calls.last().map(String::as_str), Some("tmux new-session -s feat-login-v2"));
    }

    #[test]
    fn kill_resolves_fragment_when_forced() {
        let runner = runner_with("dev\t0\t2\nprod\t0\t1\n");
        let mux = TmuxMux::new(&runner, "tmux");
        let args = KillArgs {
            name: Some("pro".to_owned()),
            force: true,
        };
        kill(&mux, &NonInteractivePicker, &args).unwrap();
        assert_eq!(tmux_calls(&runner), vec!["tmux kill-session -t prod".to_owned()]);
    }
}
