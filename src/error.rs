#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WtError {
    #[error("not inside a git repository")]
    NotInGitRepo,

    #[error("{0} is required but was not found in PATH")]
    ToolNotFound(String),

    #[error("{program} {args} failed{}: {stderr}", .code.map(|c| format!(" (exit {c})")).unwrap_or_default())]
    ExternalTool {
        program: String,
        args: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected output from {tool}: {detail} (the installed {tool} version may be incompatible)")]
    Parse { tool: String, detail: String },

    #[error("{program} did not finish within {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("multiple {kind} match '{query}': {}; refine your pattern", .candidates.join(", "))]
    AmbiguousSelection {
        kind: String,
        query: String,
        candidates: Vec<String>,
    },

    #[error("branch '{branch}' already has a worktree at {}", .path.display())]
    DuplicateWorktree { branch: String, path: PathBuf },

    #[error("worktree path already exists: {}", .0.display())]
    WorktreePathExists(PathBuf),

    #[error("cannot remove the worktree you are in ({}); use 'wt cleanup' instead", .0.display())]
    CannotRemoveCurrentWorktree(PathBuf),

    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("{0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid config key '{0}'")]
    InvalidConfigKey(String),

    #[error("invalid config value for '{key}': {msg}")]
    InvalidConfigValue { key: String, msg: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl WtError {
    pub(crate) fn parse(tool: &str, detail: impl Into<String>) -> Self {
        Self::Parse {
            tool: tool.to_owned(),
            detail: detail.into(),
        }
    }

    pub(crate) fn not_found(kind: &str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.to_owned(),
            name: name.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            path: path.into(),
            source,
        }
    }
}
