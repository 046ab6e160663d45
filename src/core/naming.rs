#![forbid(unsafe_code)]

use regex::Regex;
use sha2::{Digest as _, Sha256};

use crate::core::validate;
use crate::error::WtError;

const MAX_SESSION_INPUT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    #[must_use]
    pub fn is_github(&self) -> bool {
        self.host.eq_ignore_ascii_case("github.com")
    }
}

#[must_use]
pub fn parse_origin_url(url: &str) -> Option<RepoId> {
    // Accept:
    // - https://host/owner/repo(.git)
    // - ssh://git@host/owner/repo(.git)
    // - git@host:owner/repo(.git)
    let url = url.trim();

    if let Some(rest) = url.strip_prefix("git@") {
        let (host, path) = rest.split_once(':')?;
        return parse_host_path(host, path);
    }

    let re = Regex::new(r"^(?:(?:https?)|ssh)://(?:git@)?([^/]+)/(.+)$").ok()?;
    let caps = re.captures(url)?;
    let host = caps.get(1)?.as_str();
    let path = caps.get(2)?.as_str();
    parse_host_path(host, path)
}

fn parse_host_path(host: &str, path: &str) -> Option<RepoId> {
    let mut parts = path.trim_matches('/').split('/');
    let owner = parts.next()?.to_owned();
    let repo_raw = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let repo = repo_raw.strip_suffix(".git").unwrap_or(repo_raw).to_owned();
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(RepoId {
        host: host.to_owned(),
        owner,
        repo,
    })
}

/// Parses a github.com remote into a validated `(owner, repo)` pair.
#[must_use]
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let id = parse_origin_url(url)?;
    if !id.is_github() {
        return None;
    }
    validate::github_owner(&id.owner).ok()?;
    validate::repo_name(&id.repo).ok()?;
    Some((id.owner, id.repo))
}

/// Turns arbitrary text (usually a branch) into a tmux-safe session name.
pub fn sanitize_session_name(input: &str) -> Result<String, WtError> {
    if input.chars().count() > MAX_SESSION_INPUT {
        return Err(WtError::Validation(format!(
            "session name is longer than {MAX_SESSION_INPUT} characters"
        )));
    }
    let mut out: String = input
        .chars()
        .map(|c| match c {
            ':' | '.' | '/' | '\\' | '\t' | '\n' | '\r' | '\0' => '-',
            c => c,
        })
        .collect();
    while out.contains("--") {
        out = out.replace("--", "-");
    }
    let out = out.trim_matches('-').to_owned();
    if out.is_empty() {
        return Err(WtError::Validation(format!(
            "'{input}' does not yield a usable session name"
        )));
    }
    Ok(out)
}

/// Default worktree directory name for a branch.
#[must_use]
pub fn suggest_worktree_name(branch: &str) -> String {
    branch
        .strip_prefix("origin/")
        .unwrap_or(branch)
        .replace('/', "-")
}

#[must_use]
pub fn strip_control_chars(input: &str) -> String {
    input.chars().filter(|c| !c.is_control()).collect()
}

#[must_use]
pub fn short_hostname(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}

/// Stable index in `0..len` derived from `seed`.
#[must_use]
pub fn stable_index(seed: &str, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let digest = Sha256::digest(seed.as_bytes());
    let mut word = [0_u8; 8];
    word.copy_from_slice(&digest[..8]);
    let n = u64::from_be_bytes(word);
    // len is a small list length; the remainder always fits.
    usize::try_from(n % len as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_origin_urls() {
        let id = parse_origin_url("https://github.com/octo/hello-world.git").unwrap();
        assert_eq!(
            id,
            RepoId {
                host: "github.com".to_owned(),
                owner: "octo".to_owned(),
                repo: "hello-world".to_owned()
            }
        );

        let id = parse_origin_url("ssh://git@github.com/octo/hello-world.git").unwrap();
        assert_eq!(id.owner, "octo");

        let id = parse_origin_url("git@gitlab.com:octo/hello-world.git").unwrap();
        assert_eq!(id.repo, "hello-world");
        assert!(!id.is_github());

        assert!(parse_origin_url("not a url").is_none());
    }

    #[test]
    fn github_urls_only() {
        assert_eq!(
            parse_github_url("git@github.com:octo/cli.git"),
            Some(("octo".to_owned(), "cli".to_owned()))
        );
        assert_eq!(
            parse_github_url("https://github.com/octo/cli"),
            Some(("octo".to_owned(), "cli".to_owned()))
        );
        assert_eq!(parse_github_url("https://gitlab.com/octo/cli"), None);
        assert_eq!(parse_github_url("https://github.com/-bad/cli"), None);
    }

    #[test]
    fn session_names_are_sanitized() {
        assert_eq!(sanitize_session_name("feature/login.v2").unwrap(), "feature-login-v2");
        assert_eq!(sanitize_session_name("::a::b//").unwrap(), "a-b");
        assert!(sanitize_session_name("/./").is_err());
        assert!(sanitize_session_name(&"x".repeat(1025)).is_err());
    }

    #[test]
    fn worktree_name_suggestions() {
        assert_eq!(suggest_worktree_name("origin/feature/x"), "feature-x");
        assert_eq!(suggest_worktree_name("fix/bug"), "fix-bug");
        assert_eq!(suggest_worktree_name("main"), "main");
    }

    #[test]
    fn text_helpers() {
        assert_eq!(strip_control_chars("a\x1b]0;x\x07b"), "a]0;xb");
        assert_eq!(short_hostname("box.local.lan"), "box");
        assert_eq!(stable_index("feature-x", 8), stable_index("feature-x", 8));
        assert!(stable_index("anything", 8) < 8);
        assert_eq!(stable_index("x", 0), 0);
    }
}
