#![forbid(unsafe_code)]

//! Input checks applied before any name reaches a subprocess or a path.

use regex::Regex;

use crate::error::WtError;

fn invalid(msg: impl Into<String>) -> WtError {
    WtError::Validation(msg.into())
}

fn matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).is_ok_and(|re| re.is_match(value))
}

pub fn worktree_name(name: &str) -> Result<(), WtError> {
    if name.is_empty() {
        return Err(invalid("worktree name cannot be empty"));
    }
    if name.contains("..") {
        return Err(invalid(format!("worktree name '{name}' cannot contain '..'")));
    }
    if name.starts_with('/') || name.starts_with('~') {
        return Err(invalid(format!(
            "worktree name '{name}' cannot start with '/' or '~'"
        )));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid(format!(
            "worktree name '{name}' cannot contain path separators"
        )));
    }
    if !matches(r"^[A-Za-z0-9][A-Za-z0-9._-]*$", name) {
        return Err(invalid(format!(
            "worktree name '{name}' may only contain letters, digits, '.', '_' and '-', and must start with a letter or digit"
        )));
    }
    Ok(())
}

pub fn branch_name(name: &str) -> Result<(), WtError> {
    if name.is_empty() {
        return Err(invalid("branch name cannot be empty"));
    }
    const FORBIDDEN: [&str; 12] = [
        "..", "~", "^", ":", "\\", " ", "\t", "\n", "?", "*", "[", "//",
    ];
    if let Some(bad) = FORBIDDEN.iter().find(|p| name.contains(*p)) {
        return Err(invalid(format!(
            "branch name '{name}' cannot contain {:?}",
            bad
        )));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(invalid(format!(
            "branch name '{name}' cannot start or end with '/'"
        )));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(invalid(format!(
            "branch name '{name}' cannot start or end with '.'"
        )));
    }
    if name.ends_with(".lock") {
        return Err(invalid(format!("branch name '{name}' cannot end with '.lock'")));
    }
    Ok(())
}

pub fn pr_number(n: u64) -> Result<u64, WtError> {
    if n == 0 {
        return Err(invalid("PR number must be positive"));
    }
    Ok(n)
}

pub fn github_owner(owner: &str) -> Result<(), WtError> {
    if owner.is_empty() || owner.len() > 39 {
        return Err(invalid(format!(
            "GitHub owner '{owner}' must be 1 to 39 characters"
        )));
    }
    if !matches(r"^[A-Za-z0-9][A-Za-z0-9-]*$", owner)
        || owner.contains("--")
        || owner.ends_with('-')
    {
        return Err(invalid(format!("invalid GitHub owner '{owner}'")));
    }
    Ok(())
}

pub fn repo_name(name: &str) -> Result<(), WtError> {
    if name.is_empty() || name.len() > 100 {
        return Err(invalid(format!(
            "repository name '{name}' must be 1 to 100 characters"
        )));
    }
    if name == "." || name == ".." || !matches(r"^[A-Za-z0-9._-]+$", name) {
        return Err(invalid(format!("invalid repository name '{name}'")));
    }
    Ok(())
}

/// Checks an `owner/repo` pair and splits it.
pub fn full_repo_name(full: &str) -> Result<(String, String), WtError> {
    let Some((owner, repo)) = full.split_once('/') else {
        return Err(invalid(format!("expected OWNER/REPO, got '{full}'")));
    };
    github_owner(owner)?;
    repo_name(repo)?;
    Ok((owner.to_owned(), repo.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worktree_names() {
        for ok in ["feature-x", "v1.2", "a_b", "9lives"] {
            assert!(worktree_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "..", "../x", "/abs", "~home", "a/b", "a\\b", "-lead", ".hidden", "sp ace"] {
            assert!(worktree_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn branch_names() {
        for ok in ["main", "feature/login", "fix-1.2", "user/x_y"] {
            assert!(branch_name(ok).is_ok(), "{ok}");
        }
        for bad in [
            "", "a..b", "a~1", "a^", "a:b", "a b", "a?", "a*", "a[", "/a", "a/", ".a", "a.",
            "a.lock", "a//b", "a\\b",
        ] {
            assert!(branch_name(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn github_names() {
        assert!(github_owner("octo-cat").is_ok());
        assert!(github_owner("-octo").is_err());
        assert!(github_owner("octo--cat").is_err());
        assert!(github_owner("octo-").is_err());
        assert!(github_owner(&"a".repeat(40)).is_err());

        assert!(repo_name("my.repo_1-x").is_ok());
        assert!(repo_name(".").is_err());
        assert!(repo_name("..").is_err());
        assert!(repo_name("a b").is_err());
        assert!(repo_name(&"r".repeat(101)).is_err());

        assert_eq!(
            full_repo_name("octo/hello").unwrap(),
            ("octo".to_owned(), "hello".to_owned())
        );
        assert!(full_repo_name("octo").is_err());
        assert!(pr_number(0).is_err());
        assert_eq!(pr_number(7).unwrap(), 7);
    }
}
