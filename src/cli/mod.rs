#![forbid(unsafe_code)]

pub mod pr;
pub mod rp;
pub mod tm;
pub mod wt;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{CommandFactory as _, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use crate::config::{self, Config};
use crate::core::git;
use crate::core::process::{DEFAULT_TIMEOUT, SystemRunner};
use crate::core::resolve::{self, Candidate};
use crate::error::WtError;
use crate::logger;
use crate::shell::clipboard;
use crate::shell::init::{self, InstallOutcome, Shell};
use crate::tui::picker::{Picker, PickerItem, TerminalPicker};

#[derive(Debug, Parser)]
#[command(
    name = "workflow-tools",
    version,
    about = "Worktree, pull request, repository and tmux workflows"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Git worktrees
    Wt(wt::WtArgs),
    /// Local and GitHub repositories
    Rp(rp::RpArgs),
    /// Pull requests and review threads
    Pr(pr::PrArgs),
    /// Tmux sessions
    Tm(tm::TmArgs),
    /// Install or print the shell integration
    Install(InstallArgs),
    Completion(CompletionArgs),
    Config(ConfigArgs),
    Version,
}

#[derive(Debug, Parser)]
pub struct InstallArgs {
    #[arg(long = "shell", value_enum, default_value_t = Shell::Auto)]
    pub shell: Shell,
    /// Print the wrapper script instead of editing the rc file
    #[arg(long = "print")]
    pub print: bool,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    List,
    Set(ConfigSetArgs),
    Get(ConfigGetArgs),
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

/// What every dispatcher needs: settings, the process runner and the picker.
pub struct Context {
    pub cfg: Config,
    pub runner: SystemRunner,
    pub picker: Box<dyn Picker>,
    pub cwd: PathBuf,
}

impl Context {
    pub fn new(cfg: Config) -> anyhow::Result<Self> {
        let runner = SystemRunner::new(cfg.process.timeout())?;
        let cwd = std::env::current_dir().context("failed to read the current directory")?;
        Ok(Self {
            cfg,
            runner,
            picker: Box::new(TerminalPicker),
            cwd,
        })
    }

    #[must_use]
    pub fn picker(&self) -> &dyn Picker {
        self.picker.as_ref()
    }

    pub fn repo_root(&self) -> Result<PathBuf, WtError> {
        git::find_repo_root(&self.runner, &self.cwd)
    }
}

pub fn main() -> ExitCode {
    let cli = Cli::parse();

    // Config problems are reported by the commands that need it.
    let cfg = config::load().map(|(cfg, _doc, _paths)| cfg);
    let level = cfg
        .as_ref()
        .map_or_else(|_| "info".to_owned(), |c| c.log.level.clone());
    if let Err(err) = logger::init(&level) {
        eprintln!("warning: logging disabled: {err:#}");
    }

    let argv: Vec<String> = std::env::args().collect();
    info!(argv = ?argv, "start");
    match run(cli, cfg) {
        Ok(code) => {
            info!("finish");
            code
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "failed");
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli, cfg: anyhow::Result<Config>) -> anyhow::Result<ExitCode> {
    match cli.cmd {
        Commands::Completion(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, init::BIN_NAME, &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(args) => cmd_config(args),
        Commands::Install(args) => cmd_install(&args),
        Commands::Version => Ok(cmd_version()),
        Commands::Wt(args) => wt::run(&Context::new(cfg?)?, args),
        Commands::Rp(args) => rp::run(&Context::new(cfg?)?, args),
        Commands::Pr(args) => pr::run(&Context::new(cfg?)?, args),
        Commands::Tm(args) => tm::run(&Context::new(cfg?)?, args),
    }
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<ExitCode> {
    match args.cmd {
        ConfigCmd::List => {
            print!("{}", config::list_resolved_toml()?);
        }
        ConfigCmd::Set(set) => {
            config::set_value_string(&set.key, &set.value)?;
            info!(key = %set.key, value = %set.value, "config updated");
            println!("Set {} = {}", set.key, set.value);
        }
        ConfigCmd::Get(get) => match config::get_value_string(&get.key)? {
            Some(v) => println!("{v}"),
            None => anyhow::bail!(
                "configuration key '{}' not found - use 'workflow-tools config list' to see available keys",
                get.key
            ),
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_install(args: &InstallArgs) -> anyhow::Result<ExitCode> {
    let shell = args.shell.detect(std::env::var("SHELL").ok().as_deref());
    if args.print {
        print!("{}", init::render(shell, init::BIN_NAME));
        return Ok(ExitCode::SUCCESS);
    }
    let home = config::home_dir().context("cannot determine the home directory")?;
    let rc = match init::install(shell, &home)? {
        InstallOutcome::Added(rc) => {
            println!("Added shell integration to {}", rc.display());
            rc
        }
        InstallOutcome::AlreadyPresent(rc) => {
            println!("Shell integration already present in {}", rc.display());
            rc
        }
    };
    let source = format!("source {}", rc.display());
    println!("Restart your shell or run: {source}");
    let runner = SystemRunner::new(DEFAULT_TIMEOUT)?;
    if clipboard::copy(&runner, &source) {
        println!("  (copied to clipboard)");
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_version() -> ExitCode {
    println!("workflow-tools version {}", env!("CARGO_PKG_VERSION"));
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

/// Resolves a fragment to one item. `None` means the user cancelled.
pub(crate) fn pick<'a, T: Candidate>(
    picker: &dyn Picker,
    kind: &str,
    title: &str,
    items: &'a [T],
    fragment: Option<&str>,
) -> Result<Option<&'a T>, WtError> {
    Ok(resolve::resolve(picker, kind, title, items, fragment)?.map(|i| &items[i]))
}

/// Menu over fixed options; needs a terminal.
pub(crate) fn choose_option(
    picker: &dyn Picker,
    title: &str,
    options: &[String],
    hint: &str,
) -> Result<Option<usize>, WtError> {
    if !picker.is_interactive() {
        return Err(WtError::Validation(format!(
            "{title}: no terminal for interactive selection; {hint}"
        )));
    }
    let items: Vec<PickerItem> = options.iter().map(PickerItem::new).collect();
    picker.pick_one(title, &items, "")
}

pub(crate) fn cancelled() -> ExitCode {
    println!("Cancelled.");
    ExitCode::SUCCESS
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Maps a child's exit status onto ours.
pub(crate) fn exit_status(code: i32) -> ExitCode {
    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

#[must_use]
pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push_str("...");
    }
    out
}
