#![forbid(unsafe_code)]

//! Subprocess execution for every external tool (`git`, `gh`, `tmux`,
//! `code`, `claude`).
//!
//! All calls go through [`Runner`] so that the layers above can be driven by a
//! scripted fake in tests. Calls are never retried.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt as _;
use tracing::debug;

use crate::error::WtError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// A nonzero exit is returned to the caller instead of becoming an error.
    pub tolerant: bool,
    /// Written to the child's stdin, which is then closed.
    pub input: Option<String>,
}

impl Invocation {
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
            tolerant: false,
            input: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    #[must_use]
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    #[must_use]
    pub fn tolerant(mut self) -> Self {
        self.tolerant = true;
        self
    }

    #[must_use]
    pub fn input(mut self, text: &str) -> Self {
        self.input = Some(text.to_owned());
        self
    }

    #[must_use]
    pub fn display_args(&self) -> String {
        self.args.join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl Captured {
    #[must_use]
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_owned(),
            stderr: String::new(),
            code: Some(0),
        }
    }

    #[must_use]
    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.to_owned(),
            code: Some(code),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait Runner {
    /// Runs with captured output. Fails on nonzero exit unless the invocation is tolerant.
    fn capture(&self, inv: &Invocation) -> Result<Captured, WtError>;

    /// Runs with inherited stdio and returns the exit status.
    fn interactive(&self, inv: &Invocation) -> Result<i32, WtError>;
}

/// Applies the tolerant flag to a finished call.
pub fn check_exit(inv: &Invocation, captured: Captured) -> Result<Captured, WtError> {
    if inv.tolerant || captured.success() {
        return Ok(captured);
    }
    Err(WtError::ExternalTool {
        program: inv.program.clone(),
        args: inv.display_args(),
        code: captured.code,
        stderr: captured.stderr.trim().to_owned(),
    })
}

fn spawn_error(program: &str, err: &std::io::Error) -> WtError {
    match err.kind() {
        std::io::ErrorKind::NotFound => WtError::ToolNotFound(program.to_owned()),
        _ => WtError::Other(format!("failed to run {program}: {err}")),
    }
}

/// Runs real processes on a private current-thread tokio runtime, which
/// provides the timeout and kills the child when it expires.
pub struct SystemRunner {
    rt: tokio::runtime::Runtime,
    default_timeout: Duration,
}

impl SystemRunner {
    pub fn new(default_timeout: Duration) -> Result<Self, WtError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(|e| WtError::Other(format!("failed to start process runtime: {e}")))?;
        Ok(Self {
            rt,
            default_timeout,
        })
    }

    fn command(inv: &Invocation) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&inv.program);
        cmd.args(&inv.args);
        if let Some(dir) = &inv.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl Runner for SystemRunner {
    fn capture(&self, inv: &Invocation) -> Result<Captured, WtError> {
        let limit = inv.timeout.unwrap_or(self.default_timeout);
        let mut cmd = Self::command(inv);
        cmd.stdin(if inv.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        debug!(program = %inv.program, args = %inv.display_args(), cwd = ?inv.cwd, "exec");
        let run = async {
            let Some(text) = &inv.input else {
                return cmd.output().await;
            };
            let mut child = cmd.spawn()?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(text.as_bytes()).await?;
            }
            child.wait_with_output().await
        };
        let res = self
            .rt
            .block_on(async { tokio::time::timeout(limit, run).await });
        let out = match res {
            Ok(out) => out.map_err(|e| spawn_error(&inv.program, &e))?,
            Err(_) => {
                debug!(program = %inv.program, seconds = limit.as_secs(), "timeout");
                return Err(WtError::Timeout {
                    program: inv.program.clone(),
                    seconds: limit.as_secs(),
                });
            }
        };

        let captured = Captured {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            code: out.status.code(),
        };
        debug!(program = %inv.program, code = ?captured.code, "exit");
        check_exit(inv, captured)
    }

    fn interactive(&self, inv: &Invocation) -> Result<i32, WtError> {
        let mut cmd = Self::command(inv);
        debug!(program = %inv.program, args = %inv.display_args(), "exec interactive");
        let status = self
            .rt
            .block_on(cmd.status())
            .map_err(|e| spawn_error(&inv.program, &e))?;
        let code = status.code().unwrap_or(1);
        debug!(program = %inv.program, code, "exit");
        Ok(code)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;

    use super::*;

    /// Scripted runner: answers by the longest matching `program args...`
    /// prefix and records every call.
    #[derive(Default)]
    pub(crate) struct FakeRunner {
        rules: RefCell<Vec<(Vec<String>, Captured)>>,
        pub(crate) calls: RefCell<Vec<Invocation>>,
    }

    impl FakeRunner {
        pub(crate) fn on(&self, prefix: &[&str], response: Captured) -> &Self {
            self.rules.borrow_mut().push((
                prefix.iter().map(|s| (*s).to_owned()).collect(),
                response,
            ));
            self
        }

        pub(crate) fn call_lines(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|c| format!("{} {}", c.program, c.display_args()))
                .collect()
        }

        fn respond(&self, inv: &Invocation) -> Result<Captured, WtError> {
            self.calls.borrow_mut().push(inv.clone());
            let mut full = vec![inv.program.clone()];
            full.extend(inv.args.iter().cloned());
            let rules = self.rules.borrow();
            let best = rules
                .iter()
                .filter(|(prefix, _)| full.starts_with(prefix))
                .max_by_key(|(prefix, _)| prefix.len());
            match best {
                Some((_, resp)) => Ok(resp.clone()),
                None => Err(WtError::Other(format!(
                    "no scripted response for: {}",
                    full.join(" ")
                ))),
            }
        }
    }

    impl Runner for FakeRunner {
        fn capture(&self, inv: &Invocation) -> Result<Captured, WtError> {
            let resp = self.respond(inv)?;
            check_exit(inv, resp)
        }

        fn interactive(&self, inv: &Invocation) -> Result<i32, WtError> {
            Ok(self.respond(inv)?.code.unwrap_or(1))
        }
    }
}
