#![forbid(unsafe_code)]

//! Typed access to GitHub through the `gh` CLI (`--json` output and
//! `gh api graphql`).

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::process::{Invocation, Runner};
use crate::core::resolve::Candidate;
use crate::error::WtError;

const PR_LIST_FIELDS: &str = "number,title,headRefName,isDraft,id,author,url,updatedAt";
const PR_VIEW_FIELDS: &str = "number,title,body,url,state,author,baseRefName,headRefName,reviewDecision,additions,deletions,changedFiles,isDraft,mergeable,id";

const THREADS_QUERY: &str = r"query($owner: String!, $repo: String!, $pr: Int!) {
  repository(owner: $owner, name: $repo) {
    pullRequest(number: $pr) {
      reviewThreads(first: 100) {
        nodes {
          id
          isResolved
          isOutdated
          path
          line
          startLine
          comments(first: 50) {
            nodes { id author { login } body createdAt diffHunk }
          }
        }
      }
    }
  }
}";

const RESOLVE_MUTATION: &str = r"mutation($threadId: ID!) {
  resolveReviewThread(input: {threadId: $threadId}) { thread { isResolved } }
}";

const UNRESOLVE_MUTATION: &str = r"mutation($threadId: ID!) {
  unresolveReviewThread(input: {threadId: $threadId}) { thread { isResolved } }
}";

const FIRST_COMMENT_QUERY: &str = r"query($threadId: ID!) {
  node(id: $threadId) {
    ... on PullRequestReviewThread { comments(first: 1) { nodes { id } } }
  }
}";

const REPLY_MUTATION: &str = r"mutation($prId: ID!, $commentId: ID!, $body: String!) {
  addPullRequestReviewComment(input: {pullRequestId: $prId, inReplyTo: $commentId, body: $body}) {
    comment { id }
  }
}";

const PENDING_REVIEW_QUERY: &str = r"query($prId: ID!) {
  node(id: $prId) {
    ... on PullRequest {
      reviews(first: 10, states: PENDING) { nodes { id author { login } state } }
    }
  }
}";

const SUBMIT_REVIEW_MUTATION: &str = r"mutation($prId: ID!, $reviewId: ID!) {
  submitPullRequestReview(input: {pullRequestId: $prId, pullRequestReviewId: $reviewId, event: COMMENT}) {
    pullRequestReview { state }
  }
}";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub base_ref_name: String,
    pub head_ref_name: String,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub mergeable: Option<String>,
    #[serde(default)]
    pub review_decision: Option<String>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub changed_files: u64,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Candidate for PullRequest {
    fn keys(&self) -> Vec<String> {
        vec![self.number.to_string(), self.head_ref_name.clone()]
    }

    fn label(&self) -> String {
        let draft = if self.is_draft { " [draft]" } else { "" };
        format!("#{}  {}  ({}){draft}", self.number, self.title, self.head_ref_name)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThreadComment {
    pub id: String,
    pub author: String,
    pub body: String,
    pub created_at: String,
    pub diff_hunk: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReviewThread {
    pub id: String,
    pub path: String,
    pub line: Option<u64>,
    pub start_line: Option<u64>,
    pub is_resolved: bool,
    pub is_outdated: bool,
    pub comments: Vec<ThreadComment>,
}

pub const PREVIEW_SHORT: usize = 40;
pub const PREVIEW_LONG: usize = 50;

/// First line of `text`, cut to `max` characters with `...`.
#[must_use]
pub fn preview(text: &str, max: usize) -> String {
    let first = text.lines().next().unwrap_or("").trim();
    if first.chars().count() <= max {
        return first.to_owned();
    }
    let cut: String = first.chars().take(max).collect();
    format!("{cut}...")
}

impl ReviewThread {
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.strip_prefix("PRRT_").unwrap_or(&self.id)
    }

    #[must_use]
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{line}", self.path),
            None => self.path.clone(),
        }
    }

    #[must_use]
    pub fn status(&self) -> &'static str {
        match (self.is_resolved, self.is_outdated) {
            (true, _) => "resolved",
            (false, true) => "outdated",
            (false, false) => "open",
        }
    }

    #[must_use]
    pub fn first_body(&self) -> &str {
        self.comments.first().map_or("", |c| c.body.as_str())
    }
}

impl Candidate for ReviewThread {
    fn keys(&self) -> Vec<String> {
        vec![self.id.clone(), self.short_id().to_owned()]
    }

    fn label(&self) -> String {
        format!(
            "{}  {}  [{}]  \"{}\"",
            self.id,
            self.location(),
            self.status(),
            preview(self.first_body(), PREVIEW_LONG)
        )
    }

    fn preview(&self) -> String {
        self.comments
            .iter()
            .map(|c| format!("@{}: {}", c.author, c.body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscussionComment {
    pub id: u64,
    #[serde(default)]
    pub user: Author,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnRepo {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Candidate for SearchHit {
    fn keys(&self) -> Vec<String> {
        vec![self.full_name.clone()]
    }

    fn label(&self) -> String {
        match self.description.as_deref().filter(|d| !d.is_empty()) {
            Some(d) => format!("{}  {}", self.full_name, preview(d, PREVIEW_SHORT)),
            None => self.full_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PrFilter {
    pub author: Option<String>,
    pub include_drafts: bool,
}

/// A GraphQL variable; strings go through `-f` so gh never interprets them.
#[derive(Debug, Clone, Copy)]
enum Var<'a> {
    Str(&'a str),
    Int(u64),
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsData {
    repository: Option<ThreadsRepo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsRepo {
    pull_request: Option<ThreadsPr>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsPr {
    review_threads: Nodes<RawThread>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThread {
    id: String,
    #[serde(default)]
    is_resolved: bool,
    #[serde(default)]
    is_outdated: bool,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    line: Option<u64>,
    #[serde(default)]
    start_line: Option<u64>,
    comments: Nodes<RawComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawComment {
    id: String,
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    diff_hunk: Option<String>,
}

impl From<RawThread> for ReviewThread {
    fn from(t: RawThread) -> Self {
        Self {
            id: t.id,
            path: t.path.unwrap_or_else(|| "unknown".to_owned()),
            line: t.line,
            start_line: t.start_line,
            is_resolved: t.is_resolved,
            is_outdated: t.is_outdated,
            comments: t
                .comments
                .nodes
                .into_iter()
                .map(|c| ThreadComment {
                    id: c.id,
                    author: c.author.map_or_else(|| "unknown".to_owned(), |a| a.login),
                    body: c.body,
                    created_at: c.created_at,
                    diff_hunk: c.diff_hunk,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeData<T> {
    node: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CommentIds {
    comments: Nodes<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PendingReviews {
    reviews: Nodes<PendingReview>,
}

#[derive(Debug, Deserialize)]
struct PendingReview {
    id: String,
    #[serde(default)]
    author: Option<Author>,
}

#[derive(Debug, Deserialize)]
struct RepoView {
    owner: Author,
    name: String,
}

pub struct GitHub<'r> {
    runner: &'r dyn Runner,
    cwd: PathBuf,
}

impl<'r> GitHub<'r> {
    #[must_use]
    pub fn new(runner: &'r dyn Runner, cwd: &Path) -> Self {
        Self {
            runner,
            cwd: cwd.to_path_buf(),
        }
    }

    fn gh(&self, args: &[&str]) -> Invocation {
        Invocation::new("gh")
            .args(args.iter().copied())
            .cwd(&self.cwd)
    }

    fn run(&self, args: &[&str]) -> Result<String, WtError> {
        Ok(self.runner.capture(&self.gh(args))?.stdout)
    }

    fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, WtError> {
        let out = self.run(args)?;
        serde_json::from_str(&out).map_err(|e| {
            WtError::parse("gh", format!("gh {}: {e}", args.first().copied().unwrap_or("")))
        })
    }

    fn graphql<T: DeserializeOwned>(&self, query: &str, vars: &[(&str, Var<'_>)]) -> Result<T, WtError> {
        let mut args: Vec<String> = vec!["api".to_owned(), "graphql".to_owned()];
        for (name, value) in vars {
            match value {
                Var::Str(s) => args.extend(["-f".to_owned(), format!("{name}={s}")]),
                Var::Int(n) => args.extend(["-F".to_owned(), format!("{name}={n}")]),
            }
        }
        args.extend(["-f".to_owned(), format!("query={query}")]);

        let inv = Invocation::new("gh").args(args).cwd(&self.cwd).tolerant();
        let out = self.runner.capture(&inv)?;

        // gh exits nonzero on GraphQL errors but still prints the response.
        if let Ok(resp) = serde_json::from_str::<GraphQlResponse<T>>(&out.stdout) {
            if !resp.errors.is_empty() {
                return Err(WtError::ExternalTool {
                    program: "gh".to_owned(),
                    args: "api graphql".to_owned(),
                    code: out.code,
                    stderr: resp
                        .errors
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; "),
                });
            }
            if let Some(data) = resp.data {
                return Ok(data);
            }
        }
        if !out.success() {
            return Err(WtError::ExternalTool {
                program: "gh".to_owned(),
                args: "api graphql".to_owned(),
                code: out.code,
                stderr: out.stderr.trim().to_owned(),
            });
        }
        Err(WtError::parse("gh", "graphql response has no data"))
    }

    /// `(owner, name)` of the repository in the working directory.
    pub fn repo_view(&self) -> Result<(String, String), WtError> {
        let view: RepoView = self.run_json(&["repo", "view", "--json", "owner,name"])?;
        Ok((view.owner.login, view.name))
    }

    pub fn viewer_login(&self) -> Result<String, WtError> {
        let login = self.run(&["api", "user", "--jq", ".login"])?;
        let login = login.trim();
        if login.is_empty() {
            return Err(WtError::parse("gh", "empty viewer login"));
        }
        Ok(login.to_owned())
    }

    /// Open PRs, most recently updated first.
    pub fn list_prs(&self, filter: &PrFilter) -> Result<Vec<PullRequest>, WtError> {
        let mut args = vec!["pr", "list", "--json", PR_LIST_FIELDS, "--limit", "100"];
        if let Some(author) = filter.author.as_deref() {
            args.extend(["--author", author]);
        }
        if !filter.include_drafts {
            args.push("--draft=false");
        }
        let mut prs: Vec<PullRequest> = self.run_json(&args)?;
        prs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(prs)
    }

    /// The PR for `number`, or for the current branch. `None` when there is none.
    pub fn view_pr(&self, number: Option<u64>) -> Result<Option<PullRequest>, WtError> {
        let num = number.map(|n| n.to_string());
        let mut args = vec!["pr", "view"];
        if let Some(n) = num.as_deref() {
            args.push(n);
        }
        args.extend(["--json", PR_VIEW_FIELDS]);
        let out = self.runner.capture(&self.gh(&args).tolerant())?;
        if !out.success() {
            if out.stderr.to_lowercase().contains("no pull requests found") {
                return Ok(None);
            }
            return Err(WtError::ExternalTool {
                program: "gh".to_owned(),
                args: args.join(" "),
                code: out.code,
                stderr: out.stderr.trim().to_owned(),
            });
        }
        serde_json::from_str(&out.stdout)
            .map(Some)
            .map_err(|e| WtError::parse("gh", format!("gh pr view: {e}")))
    }

    pub fn pr_diff(&self, number: u64) -> Result<String, WtError> {
        self.run(&["pr", "diff", &number.to_string()])
    }

    pub fn pr_files(&self, number: u64) -> Result<Vec<String>, WtError> {
        let out = self.run(&[
            "pr",
            "view",
            &number.to_string(),
            "--json",
            "files",
            "--jq",
            ".files[].path",
        ])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    pub fn review_threads(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<ReviewThread>, WtError> {
        let data: ThreadsData = self.graphql(
            THREADS_QUERY,
            &[
                ("owner", Var::Str(owner)),
                ("repo", Var::Str(repo)),
                ("pr", Var::Int(number)),
            ],
        )?;
        let repository = data
            .repository
            .ok_or_else(|| WtError::not_found("repository", format!("{owner}/{repo}")))?;
        let pr = repository
            .pull_request
            .ok_or_else(|| WtError::not_found("pull request", format!("#{number}")))?;
        Ok(pr.review_threads.nodes.into_iter().map(Into::into).collect())
    }

    pub fn issue_comments(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<DiscussionComment>, WtError> {
        self.run_json(&["api", &format!("repos/{owner}/{repo}/issues/{number}/comments")])
    }

    pub fn resolve_thread(&self, thread_id: &str) -> Result<(), WtError> {
        let _: serde_json::Value =
            self.graphql(RESOLVE_MUTATION, &[("threadId", Var::Str(thread_id))])?;
        info!(thread_id, "resolved review thread");
        Ok(())
    }

    pub fn unresolve_thread(&self, thread_id: &str) -> Result<(), WtError> {
        let _: serde_json::Value =
            self.graphql(UNRESOLVE_MUTATION, &[("threadId", Var::Str(thread_id))])?;
        info!(thread_id, "unresolved review thread");
        Ok(())
    }

    /// The viewer's pending review on the PR, if any.
    pub fn pending_review(&self, pr_id: &str, viewer: &str) -> Result<Option<String>, WtError> {
        let data: NodeData<PendingReviews> =
            self.graphql(PENDING_REVIEW_QUERY, &[("prId", Var::Str(pr_id))])?;
        Ok(data.node.and_then(|n| {
            n.reviews
                .nodes
                .into_iter()
                .find(|r| r.author.as_ref().is_some_and(|a| a.login == viewer))
                .map(|r| r.id)
        }))
    }

    /// Replies to the first comment of the thread. The reply lands in a
    /// pending review, which the caller submits.
    pub fn reply_to_thread(&self, thread_id: &str, body: &str, pr_id: &str) -> Result<(), WtError> {
        let data: NodeData<CommentIds> =
            self.graphql(FIRST_COMMENT_QUERY, &[("threadId", Var::Str(thread_id))])?;
        let comment_id = data
            .node
            .and_then(|n| n.comments.nodes.into_iter().next())
            .map(|c| c.id)
            .ok_or_else(|| WtError::not_found("comment in thread", thread_id))?;
        let _: serde_json::Value = self.graphql(
            REPLY_MUTATION,
            &[
                ("prId", Var::Str(pr_id)),
                ("commentId", Var::Str(&comment_id)),
                ("body", Var::Str(body)),
            ],
        )?;
        info!(thread_id, "replied to review thread");
        Ok(())
    }

    pub fn submit_pending_review(&self, pr_id: &str, review_id: &str) -> Result<(), WtError> {
        let _: serde_json::Value = self.graphql(
            SUBMIT_REVIEW_MUTATION,
            &[("prId", Var::Str(pr_id)), ("reviewId", Var::Str(review_id))],
        )?;
        info!(review_id, "submitted pending review");
        Ok(())
    }

    pub fn post_comment(&self, number: u64, body: &str) -> Result<(), WtError> {
        self.run(&["pr", "comment", &number.to_string(), "--body", body])?;
        info!(number, "posted comment");
        Ok(())
    }

    pub fn approve(&self, number: u64, body: Option<&str>) -> Result<(), WtError> {
        let n = number.to_string();
        let mut args = vec!["pr", "review", n.as_str(), "--approve"];
        if let Some(b) = body {
            args.extend(["--body", b]);
        }
        self.run(&args)?;
        info!(number, "approved pull request");
        Ok(())
    }

    pub fn request_changes(&self, number: u64, body: &str) -> Result<(), WtError> {
        self.run(&["pr", "review", &number.to_string(), "--request-changes", "--body", body])?;
        info!(number, "requested changes");
        Ok(())
    }

    pub fn mark_ready(&self, number: u64) -> Result<(), WtError> {
        self.run(&["pr", "ready", &number.to_string()])?;
        info!(number, "marked ready");
        Ok(())
    }

    pub fn mark_draft(&self, number: u64) -> Result<(), WtError> {
        self.run(&["pr", "ready", &number.to_string(), "--undo"])?;
        info!(number, "converted to draft");
        Ok(())
    }

    pub fn close_pr(&self, number: u64) -> Result<(), WtError> {
        self.run(&["pr", "close", &number.to_string()])?;
        info!(number, "closed pull request");
        Ok(())
    }

    pub fn open_in_browser(&self, number: u64) -> Result<(), WtError> {
        self.run(&["pr", "view", &number.to_string(), "--web"])?;
        Ok(())
    }

    /// Returns the URL gh prints for the new repository.
    pub fn create_repo(&self, name: &str, visibility: Visibility, description: Option<&str>) -> Result<String, WtError> {
        let vis = match visibility {
            Visibility::Public => "--public",
            Visibility::Private => "--private",
        };
        let mut args = vec!["repo", "create", name, vis];
        if let Some(d) = description {
            args.extend(["--description", d]);
        }
        let url = self.run(&args)?.trim().to_owned();
        info!(name, url = %url, "created repository");
        Ok(url)
    }

    pub fn fork_repo(&self, full_name: &str) -> Result<(), WtError> {
        self.run(&["repo", "fork", full_name, "--clone=false"])?;
        info!(full_name, "forked repository");
        Ok(())
    }

    pub fn rename_repo(&self, full_name: &str, new_name: &str) -> Result<(), WtError> {
        self.run(&["repo", "rename", new_name, "--repo", full_name, "--yes"])?;
        info!(full_name, new_name, "renamed repository on GitHub");
        Ok(())
    }

    pub fn list_own_repos(&self) -> Result<Vec<OwnRepo>, WtError> {
        self.run_json(&["repo", "list", "--json", "name,url,description", "--limit", "100"])
    }

    pub fn search_repos(&self, query: &str) -> Result<Vec<SearchHit>, WtError> {
        self.run_json(&[
            "search",
            "repos",
            "--json",
            "fullName,description",
            "--limit",
            "20",
            query,
        ])
    }

    /// `gh repo clone` with the terminal attached; returns whether it succeeded.
    pub fn clone_repo(&self, full_name: &str, dest: &Path) -> Result<bool, WtError> {
        let inv = Invocation::new("gh")
            .args(["repo", "clone", full_name])
            .arg(dest.to_string_lossy())
            .cwd(&self.cwd);
        Ok(self.runner.interactive(&inv)? == 0)
    }
}
