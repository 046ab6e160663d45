#![forbid(unsafe_code)]

use std::io::Write as _;

use tracing::info;

use crate::core::naming::{short_hostname, strip_control_chars};
use crate::core::process::{Invocation, Runner};
use crate::error::WtError;
use crate::mux::{Mux, SessionInfo};

const LIST_FORMAT: &str = "#{session_name}\t#{session_attached}\t#{session_windows}";

pub struct TmuxMux<'r> {
    runner: &'r dyn Runner,
    command: String,
}

impl<'r> TmuxMux<'r> {
    #[must_use]
    pub fn new(runner: &'r dyn Runner, command: &str) -> Self {
        Self {
            runner,
            command: command.to_owned(),
        }
    }

    fn tmux<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> Invocation {
        Invocation::new(&self.command).args(args)
    }

    fn run_attached(&self, args: &[&str]) -> Result<(), WtError> {
        let inv = self.tmux(args.iter().copied());
        let code = self.runner.interactive(&inv)?;
        if code == 0 {
            Ok(())
        } else {
            Err(WtError::ExternalTool {
                program: self.command.clone(),
                args: inv.display_args(),
                code: Some(code),
                stderr: String::new(),
            })
        }
    }

    /// Host name without its domain, for terminal titles.
    #[must_use]
    pub fn hostname(&self) -> String {
        let inv = Invocation::new("hostname").tolerant();
        match self.runner.capture(&inv) {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                short_hostname(out.stdout.trim()).to_owned()
            }
            _ => "localhost".to_owned(),
        }
    }

    fn set_terminal_title(&self, session: &str) {
        print!("{}", title_escape(session, &self.hostname()));
        let _ = std::io::stdout().flush();
    }
}

/// `OSC 0` title sequence with control characters removed from both parts.
#[must_use]
pub fn title_escape(session: &str, host: &str) -> String {
    format!(
        "\x1b]0;{}@{}\x07",
        strip_control_chars(session),
        strip_control_chars(host)
    )
}

pub fn parse_sessions(stdout: &str) -> Result<Vec<SessionInfo>, WtError> {
    let mut sessions = Vec::new();
    for line in stdout.lines() {
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        let [name, attached, windows] = parts.as_slice() else {
            return Err(WtError::parse(
                "tmux",
                format!("expected 3 tab-separated fields, got: {line:?}"),
            ));
        };
        let windows = windows
            .parse::<u32>()
            .map_err(|_| WtError::parse("tmux", format!("non-numeric window count in: {line:?}")))?;
        sessions.push(SessionInfo {
            name: (*name).to_owned(),
            attached: *attached != "0",
            windows,
        });
    }
    Ok(sessions)
}

impl Mux for TmuxMux<'_> {
    fn list_sessions(&self) -> Result<Vec<SessionInfo>, WtError> {
        let out = self
            .runner
            .capture(&self.tmux(["list-sessions", "-F", LIST_FORMAT]).tolerant())?;
        // No server running.
        if !out.success() {
            return Ok(Vec::new());
        }
        parse_sessions(&out.stdout)
    }

    fn has_session(&self, name: &str) -> Result<bool, WtError> {
        let out = self
            .runner
            .capture(&self.tmux(["has-session", "-t", name]).tolerant())?;
        Ok(out.success())
    }

    fn current_session(&self) -> Result<Option<String>, WtError> {
        if std::env::var_os("TMUX").is_none() {
            return Ok(None);
        }
        let out = self
            .runner
            .capture(&self.tmux(["display-message", "-p", "#{session_name}"]).tolerant())?;
        let name = out.stdout.trim();
        Ok((out.success() && !name.is_empty()).then(|| name.to_owned()))
    }

    fn create(&self, name: &str) -> Result<(), WtError> {
        info!(session = name, "creating tmux session");
        self.set_terminal_title(name);
        self.run_attached(&["new-session", "-s", name])
    }

    fn attach(&self, name: &str, detach_others: bool) -> Result<(), WtError> {
        info!(session = name, detach_others, "attaching tmux session");
        self.set_terminal_title(name);
        if detach_others {
            self.run_attached(&["attach-session", "-d", "-t", name])
        } else {
            self.run_attached(&["attach-session", "-t", name])
        }
    }

    fn create_grouped(&self, name: &str, target: &str) -> Result<(), WtError> {
        info!(session = name, target, "creating grouped tmux session");
        self.set_terminal_title(name);
        self.run_attached(&["new-session", "-t", target, "-s", name])
    }

    fn kill(&self, name: &str) -> Result<(), WtError> {
        self.runner.capture(&self.tmux(["kill-session", "-t", name]))?;
        info!(session = name, "killed tmux session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::Captured;
    use crate::core::process::fake::FakeRunner;

    #[test]
    fn parses_session_lines() {
        let sessions = parse_sessions("main\t1\t3\nwork:tab\t0\t1\n").unwrap();
        assert_eq!(
            sessions,
            vec![
                SessionInfo {
                    name: "main".to_owned(),
                    attached: true,
                    windows: 3
                },
                SessionInfo {
                    name: "work:tab".to_owned(),
                    attached: false,
                    windows: 1
                },
            ]
        );
    }

    #[test]
    fn malformed_session_lines_are_parse_errors() {
        assert!(matches!(
            parse_sessions("main 1 3\n").unwrap_err(),
            WtError::Parse { .. }
        ));
        assert!(matches!(
            parse_sessions("main\t1\tmany\n").unwrap_err(),
            WtError::Parse { .. }
        ));
    }

    #[test]
    fn no_server_is_empty_list() {
        let runner = FakeRunner::default();
        runner.on(
            &["tmux", "list-sessions"],
            Captured::failed(1, "no server running on /tmp/tmux-1000/default"),
        );
        let mux = TmuxMux::new(&runner, "tmux");
        assert!(mux.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn grouped_name_skips_taken_suffixes() {
        let runner = FakeRunner::default();
        runner
            .on(&["tmux", "has-session"], Captured::failed(1, ""))
            .on(&["tmux", "has-session", "-t", "dev.2"], Captured::ok(""));
        let mux = TmuxMux::new(&runner, "tmux");
        assert_eq!(mux.next_grouped_name("dev").unwrap(), "dev.3");
    }

    #[test]
    fn kill_failure_surfaces_stderr() {
        let runner = FakeRunner::default();
        runner.on(
            &["tmux", "kill-session"],
            Captured::failed(1, "can't find session: nope"),
        );
        let mux = TmuxMux::new(&runner, "tmux");
        let err = mux.kill("nope").unwrap_err();
        assert!(matches!(err, WtError::ExternalTool { ref stderr, .. } if stderr.contains("can't find")));
    }

    #[test]
    fn title_strips_control_characters() {
        assert_eq!(title_escape("a\x1bb", "host\n"), "\x1b]0;ab@host\x07");
    }
}
