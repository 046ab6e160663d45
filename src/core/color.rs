#![forbid(unsafe_code)]

//! Per-worktree editor title-bar colors and terminal tab colors.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::naming;
use crate::error::WtError;

pub const SIDECAR_SUFFIX: &str = ".local.code-workspace";
pub const GITIGNORE_PATTERN: &str = "*.local.code-workspace";

pub const PRESETS: [(&str, &str); 8] = [
    ("red", "CC3333"),
    ("green", "2D8B4E"),
    ("blue", "2B6CB0"),
    ("yellow", "D4A017"),
    ("orange", "CC6633"),
    ("purple", "7B3FA0"),
    ("pink", "CC5599"),
    ("cyan", "2A9D8F"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorInput {
    Preset { name: String, hex: String },
    /// Six uppercase hex digits, no `#`.
    Hex(String),
    Invalid(String),
}

impl ColorInput {
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let lower = trimmed.to_lowercase();
        if let Some((name, hex)) = PRESETS.iter().find(|(name, _)| *name == lower) {
            return Self::Preset {
                name: (*name).to_owned(),
                hex: (*hex).to_owned(),
            };
        }
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Self::Hex(digits.to_uppercase());
        }
        Self::Invalid(input.to_owned())
    }

    pub fn hex(&self) -> Result<&str, WtError> {
        match self {
            Self::Preset { hex, .. } | Self::Hex(hex) => Ok(hex),
            Self::Invalid(raw) => Err(WtError::Validation(format!(
                "invalid color '{raw}': use a preset ({}) or a 6-digit hex code",
                PRESETS.map(|(n, _)| n).join(", ")
            ))),
        }
    }
}

fn channels(hex: &str) -> (u8, u8, u8) {
    let ch = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    };
    (ch(0), ch(2), ch(4))
}

/// Each channel halved.
#[must_use]
pub fn darken(hex: &str) -> String {
    let (r, g, b) = channels(hex);
    format!("{:02X}{:02X}{:02X}", r / 2, g / 2, b / 2)
}

#[must_use]
pub fn foreground_for(hex: &str) -> &'static str {
    let (r, g, b) = channels(hex);
    let luminance = (0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)) / 255.0;
    if luminance > 0.5 { "#000000" } else { "#FFFFFF" }
}

/// Preset picked from the branch name, stable across runs.
#[must_use]
pub fn default_preset_for(branch: &str) -> (&'static str, &'static str) {
    PRESETS[naming::stable_index(branch, PRESETS.len())]
}

#[must_use]
pub fn sidecar_file_name(branch: &str) -> String {
    format!("{}{SIDECAR_SUFFIX}", branch.replace('/', "-"))
}

#[derive(Debug, Serialize, Deserialize)]
struct Workspace {
    folders: Vec<Folder>,
    settings: Settings,
}

#[derive(Debug, Serialize, Deserialize)]
struct Folder {
    path: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Settings {
    #[serde(rename = "workbench.colorCustomizations", default)]
    colors: TitleBarColors,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TitleBarColors {
    #[serde(rename = "titleBar.activeBackground", default)]
    active_background: Option<String>,
    #[serde(rename = "titleBar.activeForeground", default)]
    active_foreground: Option<String>,
    #[serde(rename = "titleBar.inactiveBackground", default)]
    inactive_background: Option<String>,
    #[serde(rename = "titleBar.inactiveForeground", default)]
    inactive_foreground: Option<String>,
}

fn workspace_for(hex: &str) -> Workspace {
    let fg = foreground_for(hex).to_owned();
    Workspace {
        folders: vec![Folder {
            path: ".".to_owned(),
        }],
        settings: Settings {
            colors: TitleBarColors {
                active_background: Some(format!("#{hex}")),
                active_foreground: Some(fg.clone()),
                inactive_background: Some(format!("#{}", darken(hex))),
                inactive_foreground: Some(fg),
            },
        },
    }
}

pub fn find_sidecar(dir: &Path) -> Result<Option<PathBuf>, WtError> {
    let entries = std::fs::read_dir(dir).map_err(|e| WtError::io(dir, e))?;
    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(SIDECAR_SUFFIX))
        })
        .collect();
    found.sort();
    Ok(found.into_iter().next())
}

/// Writes the sidecar for `branch`, replacing any previous one. Returns its path.
pub fn write_color(dir: &Path, branch: &str, hex: &str) -> Result<PathBuf, WtError> {
    reset_color(dir)?;
    let path = dir.join(sidecar_file_name(branch));
    let mut body = serde_json::to_string_pretty(&workspace_for(hex))
        .map_err(|e| WtError::Other(format!("failed to encode workspace: {e}")))?;
    body.push('\n');
    std::fs::write(&path, body).map_err(|e| WtError::io(&path, e))?;
    info!(path = %path.display(), hex, "wrote color sidecar");
    Ok(path)
}

/// Current title-bar color as six hex digits, or `None` without a readable sidecar.
pub fn read_color(dir: &Path) -> Result<Option<String>, WtError> {
    let Some(path) = find_sidecar(dir)? else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(&path).map_err(|e| WtError::io(&path, e))?;
    match serde_json::from_str::<Workspace>(&raw) {
        Ok(ws) => Ok(ws
            .settings
            .colors
            .active_background
            .map(|bg| bg.trim_start_matches('#').to_uppercase())),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable color sidecar");
            Ok(None)
        }
    }
}

/// Returns whether a sidecar was deleted.
pub fn reset_color(dir: &Path) -> Result<bool, WtError> {
    let Some(path) = find_sidecar(dir)? else {
        return Ok(false);
    };
    std::fs::remove_file(&path).map_err(|e| WtError::io(&path, e))?;
    Ok(true)
}

pub fn gitignore_has_pattern(repo_root: &Path) -> bool {
    std::fs::read_to_string(repo_root.join(".gitignore"))
        .is_ok_and(|s| s.lines().any(|l| l.trim() == GITIGNORE_PATTERN))
}

/// Appends the sidecar pattern unless present. Returns whether it was added.
pub fn ensure_gitignore_pattern(repo_root: &Path) -> Result<bool, WtError> {
    if gitignore_has_pattern(repo_root) {
        return Ok(false);
    }
    let path = repo_root.join(".gitignore");
    let mut content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(WtError::io(&path, e)),
    };
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(GITIGNORE_PATTERN);
    content.push('\n');
    std::fs::write(&path, content).map_err(|e| WtError::io(&path, e))?;
    info!(path = %path.display(), "added sidecar pattern to .gitignore");
    Ok(true)
}

#[must_use]
pub fn tab_color_escape(hex: Option<&str>) -> String {
    match hex {
        None => "\x1b]6;1;bg;*;default\x07".to_owned(),
        Some(hex) => {
            let (r, g, b) = channels(hex);
            format!(
                "\x1b]6;1;bg;red;brightness;{r}\x07\x1b]6;1;bg;green;brightness;{g}\x07\x1b]6;1;bg;blue;brightness;{b}\x07"
            )
        }
    }
}

/// Sets the iTerm2 tab color; other terminals are left alone.
pub fn apply_tab_color(hex: Option<&str>) {
    if std::env::var("TERM_PROGRAM").as_deref() != Ok("iTerm.app") {
        return;
    }
    let mut out = std::io::stdout();
    if let Err(e) = out
        .write_all(tab_color_escape(hex).as_bytes())
        .and_then(|()| out.flush())
    {
        debug!(error = %e, "tab color escape not written");
    }
}
