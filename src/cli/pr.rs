#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use crate::cli::{Context, cancelled, choose_option, pick, print_json};
use crate::core::git::Git;
use crate::core::github::{GitHub, PREVIEW_SHORT, PrFilter, PullRequest, ReviewThread, preview};
use crate::core::naming::suggest_worktree_name;
use crate::core::resolve::{self, picker_items};
use crate::core::validate;
use crate::core::worktree::{BranchStart, CreateRequest, WorktreeManager};
use crate::error::WtError;
use crate::shell::clipboard;
use crate::shell::handoff::{Handoff, WT_CD_FILE};
use crate::tui::picker::Picker;
use crate::tui::prompt;

const DIFF_CONTEXT_LINES: usize = 5;

#[derive(Debug, Parser)]
pub struct PrArgs {
    #[command(subcommand)]
    pub cmd: Option<PrCmd>,
    /// Pull request number (default: the current branch's)
    #[arg(short = 'p', long = "pr", global = true)]
    pub pr: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum PrCmd {
    /// Description, review threads and discussion
    #[command(visible_alias = "i")]
    Info(InfoArgs),
    /// Open pull requests in this repository
    #[command(visible_alias = "ls")]
    List(ListArgs),
    #[command(visible_alias = "d")]
    Diff(NumberArg),
    /// Changed files, one per line
    #[command(visible_alias = "f")]
    Files(NumberArg),
    /// Review threads with their ids
    #[command(visible_alias = "t")]
    Threads(ThreadsArgs),
    #[command(visible_alias = "r")]
    Resolve(ResolveArgs),
    #[command(visible_alias = "ur")]
    Unresolve(UnresolveArgs),
    /// Reply to a review thread
    #[command(visible_alias = "re")]
    Reply(ReplyArgs),
    /// Post a discussion comment
    #[command(visible_alias = "c")]
    Comment(CommentArgs),
    #[command(visible_alias = "a")]
    Approve(ApproveArgs),
    #[command(name = "request-changes", visible_alias = "rc")]
    RequestChanges(RequestChangesArgs),
    /// Mark a draft ready for review
    Ready(NumberArg),
    /// Convert to draft
    Draft(NumberArg),
    /// Open in the browser
    #[command(visible_alias = "o")]
    Open(NumberArg),
    /// Create or update a worktree for the pull request's branch
    #[command(visible_aliases = ["co", "sw"])]
    Checkout(CheckoutArgs),
    Close(CloseArgs),
}

#[derive(Debug, Parser)]
pub struct NumberArg {
    pub number: Option<u64>,
}

#[derive(Debug, Parser)]
pub struct InfoArgs {
    pub number: Option<u64>,
    #[arg(short = 'j', long = "json")]
    pub json: bool,
    /// Full diff context for each thread
    #[arg(short = 'f', long = "full")]
    pub full: bool,
    /// Include resolved threads
    #[arg(short = 'r', long = "resolved")]
    pub resolved: bool,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    #[arg(short = 'a', long = "author", conflicts_with = "mine")]
    pub author: Option<String>,
    #[arg(short = 'm', long = "mine")]
    pub mine: bool,
    #[arg(long = "no-draft")]
    pub no_draft: bool,
    #[arg(short = 'j', long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ThreadsArgs {
    pub number: Option<u64>,
    #[arg(short = 'r', long = "resolved")]
    pub resolved: bool,
    #[arg(short = 'j', long = "json")]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ResolveArgs {
    /// Thread ids or fragments of them
    pub ids: Vec<String>,
    /// Every unresolved thread
    #[arg(short = 'a', long = "all", conflicts_with = "ids")]
    pub all: bool,
}

#[derive(Debug, Parser)]
pub struct UnresolveArgs {
    pub ids: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct ReplyArgs {
    pub id: Option<String>,
    pub message: Option<String>,
    /// Resolve the thread after replying
    #[arg(short = 'r', long = "resolve")]
    pub resolve: bool,
}

#[derive(Debug, Parser)]
pub struct CommentArgs {
    pub message: Option<String>,
    pub number: Option<u64>,
}

#[derive(Debug, Parser)]
pub struct ApproveArgs {
    pub number: Option<u64>,
    #[arg(short = 'm', long = "message")]
    pub message: Option<String>,
}

#[derive(Debug, Parser)]
pub struct RequestChangesArgs {
    pub message: String,
    pub number: Option<u64>,
}

#[derive(Debug, Parser)]
pub struct CheckoutArgs {
    pub number: Option<u64>,
    /// Worktree name
    pub name: Option<String>,
}

#[derive(Debug, Parser)]
pub struct CloseArgs {
    pub number: Option<u64>,
    #[arg(short = 'f', long = "force")]
    pub force: bool,
}

pub fn run(ctx: &Context, args: PrArgs) -> anyhow::Result<ExitCode> {
    let gh = GitHub::new(&ctx.runner, &ctx.cwd);
    let default = args.pr;
    let num = |n: Option<u64>| n.or(default);

    match args.cmd {
        None => interactive(ctx, &gh, default),
        Some(PrCmd::Info(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            info(&gh, &pr, &a)
        }
        Some(PrCmd::List(a)) => list(&gh, &a),
        Some(PrCmd::Diff(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            print!("{}", gh.pr_diff(pr.number)?);
            Ok(ExitCode::SUCCESS)
        }
        Some(PrCmd::Files(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            for f in gh.pr_files(pr.number)? {
                println!("{f}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(PrCmd::Threads(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            threads(&gh, &pr, a.resolved, a.json)
        }
        Some(PrCmd::Resolve(a)) => {
            let pr = target_pr(&gh, default)?;
            let request = if a.all { ThreadRequest::All } else { ThreadRequest::Ids(a.ids) };
            thread_action(&gh, ctx.picker(), &pr, request, ThreadAction::Resolve)
        }
        Some(PrCmd::Unresolve(a)) => {
            let pr = target_pr(&gh, default)?;
            thread_action(&gh, ctx.picker(), &pr, ThreadRequest::Ids(a.ids), ThreadAction::Unresolve)
        }
        Some(PrCmd::Reply(a)) => {
            let pr = target_pr(&gh, default)?;
            reply(&gh, ctx.picker(), &pr, a)
        }
        Some(PrCmd::Comment(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            comment(&gh, &pr, a.message)
        }
        Some(PrCmd::Approve(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            gh.approve(pr.number, a.message.as_deref())?;
            println!("Approved PR #{}", pr.number);
            Ok(ExitCode::SUCCESS)
        }
        Some(PrCmd::RequestChanges(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            gh.request_changes(pr.number, &a.message)?;
            println!("Requested changes on PR #{}", pr.number);
            Ok(ExitCode::SUCCESS)
        }
        Some(PrCmd::Ready(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            gh.mark_ready(pr.number)?;
            println!("PR #{} is ready for review", pr.number);
            Ok(ExitCode::SUCCESS)
        }
        Some(PrCmd::Draft(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            gh.mark_draft(pr.number)?;
            println!("PR #{} converted to draft", pr.number);
            Ok(ExitCode::SUCCESS)
        }
        Some(PrCmd::Open(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            open(&gh, &pr, |url| clipboard::copy(&ctx.runner, url))
        }
        Some(PrCmd::Checkout(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            checkout(ctx, &pr, a.name)
        }
        Some(PrCmd::Close(a)) => {
            let pr = target_pr(&gh, num(a.number))?;
            if !a.force && !prompt::confirm(&format!("Close PR #{}?", pr.number), false)? {
                return Ok(cancelled());
            }
            gh.close_pr(pr.number)?;
            println!("Closed PR #{}", pr.number);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// The numbered pull request, or the one for the current branch.
fn target_pr(gh: &GitHub<'_>, number: Option<u64>) -> anyhow::Result<PullRequest> {
    if let Some(n) = number {
        validate::pr_number(n)?;
    }
    gh.view_pr(number)?.ok_or_else(|| missing_pr(number).into())
}

fn missing_pr(number: Option<u64>) -> WtError {
    match number {
        Some(n) => WtError::not_found("pull request", format!("#{n}")),
        None => WtError::not_found("pull request", "for the current branch"),
    }
}

/// Relative age for recent timestamps, the date otherwise.
fn format_date(raw: &str, now: OffsetDateTime) -> String {
    let Ok(t) = OffsetDateTime::parse(raw, &Rfc3339) else {
        return raw.to_owned();
    };
    let diff = now - t;
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{n} {unit}s ago")
        }
    };
    if diff < time::Duration::minutes(1) {
        "just now".to_owned()
    } else if diff < time::Duration::hours(1) {
        plural(diff.whole_minutes(), "min")
    } else if diff < time::Duration::days(1) {
        plural(diff.whole_hours(), "hour")
    } else if diff < time::Duration::days(7) {
        plural(diff.whole_days(), "day")
    } else {
        t.date().to_string()
    }
}

fn date(raw: &str) -> String {
    format_date(raw, OffsetDateTime::now_utc())
}

/// Last few lines of a diff hunk unless `full`.
fn hunk_context(hunk: &str, full: bool) -> String {
    let hunk = hunk.trim();
    if full {
        return hunk.to_owned();
    }
    let lines: Vec<&str> = hunk.lines().collect();
    let start = lines.len().saturating_sub(DIFF_CONTEXT_LINES);
    lines[start..].join("\n")
}

fn print_summary(pr: &PullRequest) {
    let draft = if pr.is_draft { " [DRAFT]" } else { "" };
    println!("\nPR #{}: {}{draft}", pr.number, pr.title);
    println!("{}", pr.url);
    println!(
        "  Author: {} | Base: {} <- {}",
        pr.author.login, pr.base_ref_name, pr.head_ref_name
    );
    let review = pr
        .review_decision
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(|d| format!(" | Review: {d}"))
        .unwrap_or_default();
    println!(
        "  +{} -{} in {} files{review}\n",
        pr.additions, pr.deletions, pr.changed_files
    );
}

fn info(gh: &GitHub<'_>, pr: &PullRequest, args: &InfoArgs) -> anyhow::Result<ExitCode> {
    let (owner, repo) = gh.repo_view()?;
    let threads = gh.review_threads(&owner, &repo, pr.number)?;
    let comments = gh.issue_comments(&owner, &repo, pr.number)?;

    if args.json {
        print_json(&serde_json::json!({
            "pr": pr,
            "review_threads": threads,
            "discussion_comments": comments,
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    let draft = if pr.is_draft { " [DRAFT]" } else { "" };
    println!("# PR #{}: {}{draft}\n", pr.number, pr.title);
    println!("**URL:** {}", pr.url);
    println!("**Author:** {}", pr.author.login);
    println!("**State:** {}", pr.state);
    if let Some(d) = pr.review_decision.as_deref().filter(|d| !d.is_empty()) {
        println!("**Review Decision:** {d}");
    }
    if let Some(m) = pr.mergeable.as_deref().filter(|m| !m.is_empty()) {
        println!("**Mergeable:** {m}");
    }
    println!("**Base:** {} <- {}", pr.base_ref_name, pr.head_ref_name);
    println!(
        "**Changes:** +{} -{} in {} files\n",
        pr.additions, pr.deletions, pr.changed_files
    );
    println!("## Description\n");
    match pr.body.as_deref().filter(|b| !b.trim().is_empty()) {
        Some(body) => println!("{body}\n"),
        None => println!("*No description provided*\n"),
    }

    let shown: Vec<&ReviewThread> = threads
        .iter()
        .filter(|t| args.resolved || !t.is_resolved)
        .collect();
    if args.resolved {
        let resolved = threads.iter().filter(|t| t.is_resolved).count();
        println!(
            "## Review Comments ({} unresolved, {resolved} resolved)\n",
            threads.len() - resolved
        );
    } else {
        println!("## Unresolved Review Comments ({})\n", shown.len());
    }
    if shown.is_empty() {
        println!("*No review comments to display*\n");
    }
    for t in shown {
        let resolved = if t.is_resolved { "[RESOLVED] " } else { "" };
        let outdated = if t.is_outdated { "[outdated] " } else { "" };
        let line = t
            .line
            .or(t.start_line)
            .map_or_else(|| "?".to_owned(), |l| l.to_string());
        println!("### {resolved}{outdated}{}:{line}", t.path);
        println!("**Thread ID:** `{}`\n", t.id);
        for (i, c) in t.comments.iter().enumerate() {
            if i == 0
                && let Some(hunk) = c.diff_hunk.as_deref()
            {
                println!("```diff\n{}\n```\n", hunk_context(hunk, args.full));
            }
            println!("**{}** ({}):\n", c.author, date(&c.created_at));
            println!("{}\n", c.body);
        }
    }

    println!("## Discussion Comments ({})\n", comments.len());
    if comments.is_empty() {
        println!("*No discussion comments*");
    }
    for c in &comments {
        println!("### {} ({})\n", c.user.login, date(&c.created_at));
        println!("{}\n", c.body);
    }
    Ok(ExitCode::SUCCESS)
}

fn list(gh: &GitHub<'_>, args: &ListArgs) -> anyhow::Result<ExitCode> {
    let author = if args.mine {
        Some(gh.viewer_login()?)
    } else {
        args.author.clone()
    };
    let prs = gh.list_prs(&PrFilter {
        author,
        include_drafts: !args.no_draft,
    })?;
    if args.json {
        print_json(&prs)?;
        return Ok(ExitCode::SUCCESS);
    }
    if prs.is_empty() {
        println!("No open PRs found");
        return Ok(ExitCode::SUCCESS);
    }
    for pr in &prs {
        let draft = if pr.is_draft { " [draft]" } else { "" };
        println!(
            "  #{}{draft} {} - {} @{}",
            pr.number, pr.head_ref_name, pr.title, pr.author.login
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn threads(gh: &GitHub<'_>, pr: &PullRequest, include_resolved: bool, json: bool) -> anyhow::Result<ExitCode> {
    let (owner, repo) = gh.repo_view()?;
    let threads: Vec<ReviewThread> = gh
        .review_threads(&owner, &repo, pr.number)?
        .into_iter()
        .filter(|t| include_resolved || !t.is_resolved)
        .collect();
    if json {
        print_json(&threads)?;
        return Ok(ExitCode::SUCCESS);
    }
    if threads.is_empty() {
        println!("No threads to display");
        return Ok(ExitCode::SUCCESS);
    }
    for t in &threads {
        println!(
            "  {}  {}  [{}]  \"{}\"",
            t.id,
            t.location(),
            t.status(),
            preview(t.first_body(), PREVIEW_SHORT)
        );
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadAction {
    Resolve,
    Unresolve,
}

impl ThreadAction {
    /// Threads this action can change.
    fn applies_to(self, t: &ReviewThread) -> bool {
        match self {
            Self::Resolve => !t.is_resolved,
            Self::Unresolve => t.is_resolved,
        }
    }

    fn apply(self, gh: &GitHub<'_>, thread_id: &str) -> Result<(), WtError> {
        match self {
            Self::Resolve => gh.resolve_thread(thread_id),
            Self::Unresolve => gh.unresolve_thread(thread_id),
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Unresolve => "unresolve",
        }
    }

    fn past(self) -> &'static str {
        match self {
            Self::Resolve => "Resolved",
            Self::Unresolve => "Unresolved",
        }
    }
}

#[derive(Debug)]
enum ThreadRequest {
    /// Fragments typed by the user; empty means pick interactively.
    Ids(Vec<String>),
    All,
}

/// Thread ids for `request`. Every fragment is resolved before anything
/// changes, so one bad fragment aborts the whole batch.
fn select_threads(
    picker: &dyn Picker,
    threads: &[ReviewThread],
    request: ThreadRequest,
    action: ThreadAction,
) -> Result<Option<Vec<String>>, WtError> {
    let fragments = match request {
        ThreadRequest::All => {
            return Ok(Some(
                threads
                    .iter()
                    .filter(|t| action.applies_to(t))
                    .map(|t| t.id.clone())
                    .collect(),
            ));
        }
        ThreadRequest::Ids(ids) => ids,
    };

    if fragments.is_empty() {
        let pool: Vec<&ReviewThread> = threads.iter().filter(|t| action.applies_to(t)).collect();
        if pool.is_empty() {
            return Ok(Some(Vec::new()));
        }
        if !picker.is_interactive() {
            return Err(WtError::Validation(
                "no thread ids given and no terminal to pick from".to_owned(),
            ));
        }
        let owned: Vec<ReviewThread> = pool.into_iter().cloned().collect();
        let title = format!("Select threads to {}", action.verb());
        return Ok(picker
            .pick_many(&title, &picker_items(&owned))?
            .map(|picked| picked.into_iter().map(|i| owned[i].id.clone()).collect()));
    }

    let mut ids: Vec<String> = Vec::with_capacity(fragments.len());
    let mut seen = HashSet::new();
    for frag in &fragments {
        match resolve::resolve(picker, "review thread", "Select thread", threads, Some(frag))? {
            Some(i) => {
                if seen.insert(i) {
                    ids.push(threads[i].id.clone());
                }
            }
            None => return Ok(None),
        }
    }
    Ok(Some(ids))
}

fn thread_action(
    gh: &GitHub<'_>,
    picker: &dyn Picker,
    pr: &PullRequest,
    request: ThreadRequest,
    action: ThreadAction,
) -> anyhow::Result<ExitCode> {
    let (owner, repo) = gh.repo_view()?;
    let threads = gh.review_threads(&owner, &repo, pr.number)?;
    let Some(ids) = select_threads(picker, &threads, request, action)? else {
        return Ok(cancelled());
    };
    if ids.is_empty() {
        println!("No threads to change");
        return Ok(ExitCode::SUCCESS);
    }

    let mut failed = 0usize;
    for id in &ids {
        match action.apply(gh, id) {
            Ok(()) => println!("{} {id}", action.past()),
            Err(e) => {
                failed += 1;
                warn!(thread_id = %id, error = %e, "thread update failed");
                eprintln!("Error: {id}: {e}");
            }
        }
    }
    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn reply(gh: &GitHub<'_>, picker: &dyn Picker, pr: &PullRequest, args: ReplyArgs) -> anyhow::Result<ExitCode> {
    let (owner, repo) = gh.repo_view()?;
    let mut threads = gh.review_threads(&owner, &repo, pr.number)?;
    if threads.is_empty() {
        println!("No threads to reply to");
        return Ok(ExitCode::SUCCESS);
    }
    // Open threads first.
    threads.sort_by_key(|t| t.is_resolved);

    let Some(thread) = pick(picker, "review thread", "Select thread to reply to", &threads, args.id.as_deref())? else {
        return Ok(cancelled());
    };
    if args.id.is_none() {
        println!("\n--- Thread: {} ---", thread.location());
        for c in &thread.comments {
            println!("@{} ({}):\n{}\n", c.author, date(&c.created_at), c.body);
        }
    }

    let message = match args.message {
        Some(m) => m,
        None => prompt::prompt_line("Reply", None)?,
    };
    if message.trim().is_empty() {
        return Ok(cancelled());
    }

    post_reply(gh, pr, &thread.id, &message)?;
    println!("Replied to {}", thread.id);
    if args.resolve {
        gh.resolve_thread(&thread.id)?;
        println!("Resolved {}", thread.id);
    }
    Ok(ExitCode::SUCCESS)
}

/// Replies land in a pending review. A review the user already had open is
/// left for them to submit; one created by the reply is submitted here.
fn post_reply(gh: &GitHub<'_>, pr: &PullRequest, thread_id: &str, body: &str) -> Result<(), WtError> {
    let viewer = gh.viewer_login()?;
    let existing = gh.pending_review(&pr.id, &viewer)?;
    gh.reply_to_thread(thread_id, body, &pr.id)?;
    if existing.is_some() {
        println!("Reply added to your pending review; submit it on GitHub to publish.");
        return Ok(());
    }
    if let Some(review_id) = gh.pending_review(&pr.id, &viewer)? {
        gh.submit_pending_review(&pr.id, &review_id)?;
    }
    Ok(())
}

fn comment(gh: &GitHub<'_>, pr: &PullRequest, message: Option<String>) -> anyhow::Result<ExitCode> {
    let message = match message {
        Some(m) => m,
        None => prompt::prompt_line("Comment", None)?,
    };
    if message.trim().is_empty() {
        return Ok(cancelled());
    }
    gh.post_comment(pr.number, &message)?;
    println!("Commented on PR #{}", pr.number);
    Ok(ExitCode::SUCCESS)
}

/// Opens the PR in the browser. The URL also goes to the clipboard, which is
/// all that works when no browser can be launched.
fn open(gh: &GitHub<'_>, pr: &PullRequest, copy: impl FnOnce(&str) -> bool) -> anyhow::Result<ExitCode> {
    println!("Opening PR #{} in browser...", pr.number);
    println!("  {}", pr.url);
    let copied = copy(&pr.url);
    if copied {
        println!("  (copied to clipboard)");
    }
    if let Err(e) = gh.open_in_browser(pr.number) {
        if !copied {
            return Err(e.into());
        }
        warn!(number = pr.number, error = %e, "browser did not open");
        eprintln!("warning: could not open a browser: {e}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Creates a worktree for the PR branch, or fast-forwards an existing one.
fn checkout(ctx: &Context, pr: &PullRequest, name: Option<String>) -> anyhow::Result<ExitCode> {
    let number = validate::pr_number(pr.number)?;
    let root = ctx.repo_root()?;
    let manager = WorktreeManager::new(Git::new(&ctx.runner, &root), &ctx.cfg.worktree.dir_suffix, &ctx.cwd);
    let git = manager.git();

    let name = match name {
        Some(n) => n,
        None => prompt::prompt_line("Worktree name", Some(&suggest_worktree_name(&pr.head_ref_name)))?,
    };
    validate::worktree_name(&name)?;

    let handoff = Handoff::from_env(WT_CD_FILE);
    let path = manager.worktree_path(&name);
    if path.exists() {
        println!("Worktree '{name}' already exists, pulling latest changes...");
        if git.pull_ff_only(&path)? {
            println!("Updated to latest");
        } else {
            warn!(path = %path.display(), "fast-forward pull failed");
            eprintln!("warning: could not pull (local changes or diverged history)");
        }
        handoff.request_directory_change(&path)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("Fetching PR #{number}...");
    git.fetch_pull_request(number, &pr.head_ref_name)?;
    let created = manager.create(&CreateRequest {
        name: name.clone(),
        branch: pr.head_ref_name.clone(),
        start: BranchStart::Existing,
    })?;
    println!("Created worktree '{name}'");
    println!("  {}", created.display());
    handoff.request_directory_change(&created)?;
    Ok(ExitCode::SUCCESS)
}

/// Bare `pr`: the selected PR's summary, then an action menu on a terminal.
fn interactive(ctx: &Context, gh: &GitHub<'_>, number: Option<u64>) -> anyhow::Result<ExitCode> {
    let mut pr = match gh.view_pr(number)? {
        Some(pr) => pr,
        None if number.is_some() || !ctx.picker().is_interactive() => {
            return Err(missing_pr(number).into());
        }
        None => {
            let prs = gh.list_prs(&PrFilter {
                author: None,
                include_drafts: true,
            })?;
            if prs.is_empty() {
                anyhow::bail!("no open pull requests found");
            }
            let Some(picked) = pick(ctx.picker(), "pull request", "Select PR", &prs, None)? else {
                return Ok(cancelled());
            };
            target_pr(gh, Some(picked.number))?
        }
    };

    print_summary(&pr);
    if !ctx.picker().is_interactive() {
        return Ok(ExitCode::SUCCESS);
    }

    loop {
        let actions: Vec<String> = [
            "View full info",
            "View threads",
            "View files",
            "View diff",
            "Open in browser",
            "Create worktree",
            "Resolve threads",
            "Reply to thread",
            "Post comment",
            "Approve",
            "Request changes",
            if pr.is_draft { "Mark ready for review" } else { "Convert to draft" },
            "Quit",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();

        let Some(choice) = choose_option(ctx.picker(), "Action", &actions, "pass a subcommand")? else {
            println!("Done.");
            return Ok(ExitCode::SUCCESS);
        };
        let n = Some(pr.number);
        let result = match choice {
            0 => info(
                gh,
                &pr,
                &InfoArgs {
                    number: n,
                    json: false,
                    full: false,
                    resolved: false,
                },
            ),
            1 => threads(gh, &pr, false, false),
            2 => gh.pr_files(pr.number).map_err(anyhow::Error::from).map(|files| {
                for f in files {
                    println!("{f}");
                }
                ExitCode::SUCCESS
            }),
            3 => gh.pr_diff(pr.number).map_err(anyhow::Error::from).map(|d| {
                print!("{d}");
                ExitCode::SUCCESS
            }),
            4 => open(gh, &pr, |url| clipboard::copy(&ctx.runner, url)),
            // The worktree handoff moves the shell away, so stop here.
            5 => return checkout(ctx, &pr, None),
            6 => thread_action(gh, ctx.picker(), &pr, ThreadRequest::Ids(Vec::new()), ThreadAction::Resolve),
            7 => reply(
                gh,
                ctx.picker(),
                &pr,
                ReplyArgs {
                    id: None,
                    message: None,
                    resolve: false,
                },
            ),
            8 => comment(gh, &pr, None),
            9 => gh.approve(pr.number, None).map_err(anyhow::Error::from).map(|()| {
                println!("Approved PR #{}", pr.number);
                ExitCode::SUCCESS
            }),
            10 => {
                let message = prompt::prompt_line("Message", None)?;
                gh.request_changes(pr.number, &message).map_err(anyhow::Error::from).map(|()| {
                    println!("Requested changes on PR #{}", pr.number);
                    ExitCode::SUCCESS
                })
            }
            11 => {
                let toggled = if pr.is_draft { gh.mark_ready(pr.number) } else { gh.mark_draft(pr.number) };
                toggled.map_err(anyhow::Error::from).and_then(|()| {
                    pr = target_pr(gh, n)?;
                    println!("PR #{} is now {}", pr.number, if pr.is_draft { "a draft" } else { "ready for review" });
                    Ok(ExitCode::SUCCESS)
                })
            }
            _ => {
                println!("Done.");
                return Ok(ExitCode::SUCCESS);
            }
        };
        if let Err(e) = result {
            eprintln!("Error: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::Captured;
    use crate::core::process::fake::FakeRunner;
    use crate::tui::picker::NonInteractivePicker;

    const REPO_JSON: &str = r#"{"owner":{"login":"acme"},"name":"widgets"}"#;
    const THREADS_JSON: &str = r#"{"data":{"repository":{"pullRequest":{"reviewThreads":{"nodes":[
        {"id":"PRRT_12ab","isResolved":false,"isOutdated":false,"path":"src/a.rs","line":3,"startLine":null,
         "comments":{"nodes":[{"id":"C1","author":{"login":"bob"},"body":"typo","createdAt":"2024-05-01T10:00:00Z","diffHunk":null}]}},
        {"id":"PRRT_12cd","isResolved":true,"isOutdated":false,"path":"src/b.rs","line":9,"startLine":null,
         "comments":{"nodes":[{"id":"C2","author":{"login":"bob"},"body":"nit","createdAt":"2024-05-01T10:00:00Z","diffHunk":null}]}}
    ]}}}}}"#;

    fn pr() -> PullRequest {
        serde_json::from_str(
            r#"{"number":7,"id":"PR_7","title":"Fix","headRefName":"fix/typo","url":"https://github.com/acme/widgets/pull/7"}"#,
        )
        .unwrap()
    }

    fn scripted() -> FakeRunner {
        let runner = FakeRunner::default();
        runner
            .on(&["gh", "repo", "view"], Captured::ok(REPO_JSON))
            .on(&["gh", "api", "graphql"], Captured::ok(THREADS_JSON));
        runner
    }

    fn mutations(runner: &FakeRunner) -> Vec<String> {
        runner
            .call_lines()
            .into_iter()
            .filter(|l| l.contains("threadId="))
            .collect()
    }

    #[test]
    fn ambiguous_thread_fragment_changes_nothing() {
        let runner = scripted();
        let gh = GitHub::new(&runner, std::path::Path::new("/repo"));
        let err = thread_action(
            &gh,
            &NonInteractivePicker,
            &pr(),
            ThreadRequest::Ids(vec!["12".to_owned()]),
            ThreadAction::Resolve,
        )
        .unwrap_err();
        match err.downcast_ref::<WtError>() {
            Some(WtError::AmbiguousSelection { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(mutations(&runner).is_empty());
    }

    #[test]
    fn resolve_all_touches_only_open_threads() {
        let runner = scripted();
        let gh = GitHub::new(&runner, std::path::Path::new("/repo"));
        let code = thread_action(&gh, &NonInteractivePicker, &pr(), ThreadRequest::All, ThreadAction::Resolve).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        let calls = mutations(&runner);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("threadId=PRRT_12ab"));
    }

    #[test]
    fn short_thread_fragment_resolves_uniquely() {
        let runner = scripted();
        let gh = GitHub::new(&runner, std::path::Path::new("/repo"));
        let threads = gh.review_threads("acme", "widgets", 7).unwrap();
        let ids = select_threads(
            &NonInteractivePicker,
            &threads,
            ThreadRequest::Ids(vec!["12c".to_owned()]),
            ThreadAction::Unresolve,
        )
        .unwrap();
        assert_eq!(ids, Some(vec!["PRRT_12cd".to_owned()]));
    }

    #[test]
    fn repeated_fragments_select_each_thread_once() {
        let runner = scripted();
        let gh = GitHub::new(&runner, std::path::Path::new("/repo"));
        let threads = gh.review_threads("acme", "widgets", 7).unwrap();
        let ids = select_threads(
            &NonInteractivePicker,
            &threads,
            ThreadRequest::Ids(vec!["12ab".to_owned(), "12c".to_owned(), "PRRT_12ab".to_owned()]),
            ThreadAction::Unresolve,
        )
        .unwrap();
        assert_eq!(ids, Some(vec!["PRRT_12ab".to_owned(), "PRRT_12cd".to_owned()]));
    }

    #[test]
    fn missing_ids_without_terminal_is_an_error() {
        let runner = scripted();
        let gh = GitHub::new(&runner, std::path::Path::new("/repo"));
        let threads = gh.review_threads("acme", "widgets", 7).unwrap();
        let err = select_threads(&NonInteractivePicker, &threads, ThreadRequest::Ids(Vec::new()), ThreadAction::Resolve)
            .unwrap_err();
        assert!(matches!(err, WtError::Validation(_)));
    }

    #[test]
    fn open_survives_missing_browser_once_copied() {
        let runner = FakeRunner::default();
        runner.on(&["gh", "pr", "view"], Captured::failed(1, "no browser"));
        let gh = GitHub::new(&runner, std::path::Path::new("/repo"));

        let mut copied = None;
        let code = open(&gh, &pr(), |url| {
            copied = Some(url.to_owned());
            true
        })
        .unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        assert_eq!(copied.as_deref(), Some("https://github.com/acme/widgets/pull/7"));

        let err = open(&gh, &pr(), |_| false).unwrap_err();
        assert!(matches!(err.downcast_ref::<WtError>(), Some(WtError::ExternalTool { .. })));
    }

    #[test]
    fn dates_are_relative_when_recent() {
        let now = OffsetDateTime::parse("2024-05-10T12:00:00Z", &Rfc3339).unwrap();
        assert_eq!(format_date("2024-05-10T11:59:30Z", now), "just now");
        assert_eq!(format_date("2024-05-10T11:00:00Z", now), "1 hour ago");
        assert_eq!(format_date("2024-05-08T12:00:00Z", now), "2 days ago");
        assert_eq!(format_date("2024-04-01T12:00:00Z", now), "2024-04-01");
        assert_eq!(format_date("yesterday", now), "yesterday");
    }

    #[test]
    fn hunk_context_keeps_tail() {
        let hunk = "@@ -1,7 +1,7 @@\na\nb\nc\nd\ne\nf\n";
        assert_eq!(hunk_context(hunk, false), "b\nc\nd\ne\nf");
        assert!(hunk_context(hunk, true).starts_with("@@"));
    }
}
