#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::WtError;

pub const BIN_NAME: &str = "workflow-tools";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Shell {
    Zsh,
    Bash,
    Auto,
}

impl Shell {
    /// Resolves `Auto` from `$SHELL`, defaulting to zsh.
    #[must_use]
    pub fn detect(self, shell_env: Option<&str>) -> Self {
        match self {
            Self::Auto => match shell_env.and_then(|s| s.rsplit('/').next()) {
                Some("bash") => Self::Bash,
                _ => Self::Zsh,
            },
            other => other,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Zsh | Self::Auto => "zsh",
        }
    }

    #[must_use]
    pub fn rc_file(self, home: &Path) -> PathBuf {
        match self {
            Self::Bash => home.join(".bashrc"),
            Self::Zsh | Self::Auto => home.join(".zshrc"),
        }
    }
}

const TEMPLATE: &str = r#"# workflow-tools integration for @SHELL@
export WT_CD_FILE="${TMPDIR:-/tmp}/.wt_cd_$$"
export RP_CD_FILE="${TMPDIR:-/tmp}/.rp_cd_$$"
export WT_ENV_FILE="${TMPDIR:-/tmp}/.wt_env_$$"

__workflow_tools() {
    rm -f "$WT_CD_FILE" "$RP_CD_FILE" "$WT_ENV_FILE"
    command @BIN@ "$@"
    local rc=$?
    local f
    for f in "$WT_CD_FILE" "$RP_CD_FILE"; do
        if [ -f "$f" ]; then
            cd "$(cat "$f")"
            rm -f "$f"
        fi
    done
    if [ -f "$WT_ENV_FILE" ]; then
        . "$WT_ENV_FILE"
        rm -f "$WT_ENV_FILE"
    fi
    return $rc
}

wt() { __workflow_tools wt "$@"; }
rp() { __workflow_tools rp "$@"; }
pr() { __workflow_tools pr "$@"; }
tm() { __workflow_tools tm "$@"; }
"#;

#[must_use]
pub fn render(shell: Shell, bin: &str) -> String {
    TEMPLATE
        .replace("@SHELL@", shell.name())
        .replace("@BIN@", &shell_word(bin))
}

fn shell_word(s: &str) -> String {
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
    {
        s.to_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[must_use]
pub fn eval_line(shell: Shell) -> String {
    format!(r#"eval "$({BIN_NAME} install --print --shell {})""#, shell.name())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Added(PathBuf),
    AlreadyPresent(PathBuf),
}

/// Appends the eval line to the shell rc file unless it is already there.
pub fn install(shell: Shell, home: &Path) -> Result<InstallOutcome, WtError> {
    let rc = shell.rc_file(home);
    let line = eval_line(shell);
    let existing = match std::fs::read_to_string(&rc) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(WtError::io(&rc, e)),
    };
    if existing.lines().any(|l| l.trim() == line) {
        return Ok(InstallOutcome::AlreadyPresent(rc));
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str("\n# workflow-tools\n");
    updated.push_str(&line);
    updated.push('\n');
    std::fs::write(&rc, updated).map_err(|e| WtError::io(&rc, e))?;
    info!(rc = %rc.display(), "installed shell integration");
    Ok(InstallOutcome::Added(rc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_shell_from_env() {
        assert_eq!(Shell::Auto.detect(Some("/bin/bash")), Shell::Bash);
        assert_eq!(Shell::Auto.detect(Some("/usr/bin/zsh")), Shell::Zsh);
        assert_eq!(Shell::Auto.detect(None), Shell::Zsh);
        assert_eq!(Shell::Bash.detect(Some("/bin/zsh")), Shell::Bash);
    }

    #[test]
    fn wrapper_defines_all_dispatchers() {
        let script = render(Shell::Bash, "workflow-tools");
        for f in ["wt()", "rp()", "pr()", "tm()"] {
            assert!(script.contains(f), "{f}");
        }
        assert!(script.contains("command workflow-tools \"$@\""));
        assert!(script.contains(".wt_env_$$"));
        assert!(render(Shell::Zsh, "/opt/my bin/wt").contains("command '/opt/my bin/wt'"));
    }

    #[test]
    fn install_is_idempotent() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join(".zshrc"), "alias ll='ls -l'").unwrap();

        let first = install(Shell::Zsh, home.path()).unwrap();
        assert!(matches!(first, InstallOutcome::Added(_)));
        let second = install(Shell::Zsh, home.path()).unwrap();
        assert!(matches!(second, InstallOutcome::AlreadyPresent(_)));

        let rc = std::fs::read_to_string(home.path().join(".zshrc")).unwrap();
        assert!(rc.starts_with("alias ll='ls -l'\n"));
        assert_eq!(rc.matches(&eval_line(Shell::Zsh)).count(), 1);
    }
}
