#![forbid(unsafe_code)]

//! Filesystem scan for local repositories. No subprocesses.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRepo {
    pub path: PathBuf,
    pub origin_url: Option<String>,
}

/// Directories holding a `.git` directory whose `.git` sits at most
/// `depth` levels below one of `bases`. Results are deduplicated by path.
#[must_use]
pub fn discover_repos(bases: &[PathBuf], depth: usize) -> Vec<DiscoveredRepo> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for base in bases {
        if !base.is_dir() {
            continue;
        }
        walk_dirs(base, depth.saturating_sub(1), &mut visited, &mut |dir| {
            if dir.join(".git").is_dir() {
                out.push(DiscoveredRepo {
                    path: dir.to_path_buf(),
                    origin_url: read_origin_url(dir),
                });
            }
        });
    }
    out
}

/// `url` of `[remote "origin"]` in `.git/config`.
#[must_use]
pub fn read_origin_url(repo: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(repo.join(".git").join("config")).ok()?;
    parse_origin_from_git_config(&raw)
}

fn parse_origin_from_git_config(raw: &str) -> Option<String> {
    let mut in_origin = false;
    for line in raw.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line == r#"[remote "origin"]"#;
            continue;
        }
        if !in_origin {
            continue;
        }
        if let Some((key, value)) = line.split_once('=')
            && key.trim() == "url"
        {
            return Some(value.trim().to_owned());
        }
    }
    None
}

fn walk_dirs(
    base: &Path,
    max_depth: usize,
    visited: &mut BTreeSet<PathBuf>,
    on_dir: &mut dyn FnMut(&Path),
) {
    let mut stack: Vec<(PathBuf, usize)> = vec![(base.to_path_buf(), 0)];
    while let Some((dir, depth)) = stack.pop() {
        if depth > max_depth {
            continue;
        }
        if !visited.insert(dir.clone()) {
            continue;
        }

        on_dir(&dir);

        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if should_skip_dir(&path) {
                    continue;
                }
                stack.push((path, depth + 1));
            }
        }
    }
}

fn should_skip_dir(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
        return false;
    };
    if name == "node_modules" || name == "target" {
        return true;
    }
    // Hidden dirs (including .git) are never walked; the base always is.
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkrepo(path: &Path, origin: Option<&str>) {
        std::fs::create_dir_all(path.join(".git")).unwrap();
        if let Some(url) = origin {
            std::fs::write(
                path.join(".git").join("config"),
                format!("[core]\n\tbare = false\n[remote \"origin\"]\n\turl = {url}\n\tfetch = +refs/heads/*:refs/remotes/origin/*\n"),
            )
            .unwrap();
        }
    }

    #[test]
    fn finds_repos_within_depth() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path();
        mkrepo(&base.join("alpha"), Some("git@github.com:octo/alpha.git"));
        mkrepo(&base.join("group").join("beta"), None);
        mkrepo(&base.join("a").join("b").join("too-deep"), None);
        mkrepo(&base.join(".hidden").join("gamma"), None);
        mkrepo(&base.join("node_modules").join("dep"), None);

        let mut found = discover_repos(&[base.to_path_buf(), base.to_path_buf()], 3);
        found.sort_by(|a, b| a.path.cmp(&b.path));
        let names: Vec<_> = found
            .iter()
            .map(|r| r.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(
            found[0].origin_url.as_deref(),
            Some("git@github.com:octo/alpha.git")
        );
        assert_eq!(found[1].origin_url, None);
    }

    #[test]
    fn origin_only_from_origin_section() {
        let cfg = "[remote \"upstream\"]\n\turl = https://x/y/z\n[remote \"origin\"]\n\turl = https://github.com/o/r.git\n";
        assert_eq!(
            parse_origin_from_git_config(cfg).as_deref(),
            Some("https://github.com/o/r.git")
        );
        assert_eq!(parse_origin_from_git_config("[core]\n"), None);
    }
}
