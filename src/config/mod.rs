#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::WtError;

pub const APP_NAME: &str = "workflow-tools";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub repos: ReposConfig,
    pub process: ProcessConfig,
    pub worktree: WorktreeConfig,
    pub color: ColorConfig,
    pub tmux: TmuxConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReposConfig {
    pub scan_paths: Vec<String>,
    pub scan_depth: usize,
    pub cache_ttl_seconds: u64,
    /// Empty means the platform cache directory.
    pub cache_file: String,
}

impl Default for ReposConfig {
    fn default() -> Self {
        Self {
            scan_paths: vec!["~/Documents".to_owned()],
            scan_depth: 3,
            cache_ttl_seconds: 3600,
            cache_file: String::new(),
        }
    }
}

impl ReposConfig {
    pub fn scan_dirs(&self) -> anyhow::Result<Vec<PathBuf>> {
        self.scan_paths.iter().map(|p| expand_path(p)).collect()
    }

    pub fn cache_path(&self) -> anyhow::Result<PathBuf> {
        if !self.cache_file.trim().is_empty() {
            return expand_path(&self.cache_file);
        }
        let proj = project_dirs()?;
        Ok(proj.cache_dir().join("repos.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessConfig {
    pub timeout_seconds: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
        }
    }
}

impl ProcessConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorktreeConfig {
    pub dir_suffix: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            dir_suffix: ".worktrees".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColorConfig {
    pub auto_assign: bool,
    pub tab_color: bool,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            auto_assign: true,
            tab_color: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TmuxConfig {
    pub command: String,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            command: "tmux".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("com", APP_NAME, APP_NAME)
        .context("failed to determine platform directories")
}

pub fn default_paths() -> anyhow::Result<ConfigPaths> {
    let unix = home_config_path_unix();
    if !cfg!(windows) {
        return Ok(ConfigPaths { config_file: unix });
    }

    // Windows: prefer the Unix-style path if present for portability.
    if unix.exists() {
        return Ok(ConfigPaths { config_file: unix });
    }

    let proj = project_dirs()?;
    Ok(ConfigPaths {
        config_file: proj.config_dir().join("config.toml"),
    })
}

/// Directory for the log file: the platform state dir, else local data dir.
pub fn state_dir() -> anyhow::Result<PathBuf> {
    let proj = project_dirs()?;
    Ok(proj
        .state_dir()
        .unwrap_or_else(|| proj.data_local_dir())
        .to_path_buf())
}

fn home_config_path_unix() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join(APP_NAME).join("config.toml")
}

#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        return Some(PathBuf::from(v));
    }
    if let Some(v) = std::env::var_os("USERPROFILE") {
        return Some(PathBuf::from(v));
    }
    let drive = std::env::var_os("HOMEDRIVE");
    let path = std::env::var_os("HOMEPATH");
    match (drive, path) {
        (Some(d), Some(p)) => Some(PathBuf::from(d).join(PathBuf::from(p))),
        _ => None,
    }
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if input == "~"
        && let Some(home) = home_dir()
    {
        return home.to_string_lossy().to_string();
    }
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    input.to_owned()
}

/// Shortens a path under `$HOME` for display.
#[must_use]
pub fn tilde_path(input: &str) -> String {
    let Some(home) = home_dir() else {
        return input.to_owned();
    };
    let home_str = home.to_string_lossy();
    if let Some(rest) = input.strip_prefix(home_str.as_ref()) {
        if rest.is_empty() {
            return "~".to_owned();
        }
        if rest.starts_with(std::path::MAIN_SEPARATOR) {
            return format!("~{rest}");
        }
    }
    input.to_owned()
}

pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

fn expand_env_vars(input: &str) -> String {
    // Expand $VAR and ${VAR}. Leave unknown vars untouched.
    let Ok(re) = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") else {
        return input.to_owned();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        std::env::var(key).unwrap_or_else(|_| caps[0].to_owned())
    })
    .to_string()
}

pub fn load() -> anyhow::Result<(Config, toml_edit::DocumentMut, ConfigPaths)> {
    let paths = default_paths()?;
    let (doc, cfg) = load_from_file(&paths.config_file)?;
    cfg.validate()?;
    Ok((cfg, doc, paths))
}

pub fn list_resolved_toml() -> anyhow::Result<String> {
    let (cfg, _doc, _paths) = load()?;
    Ok(toml::to_string_pretty(&cfg)?)
}

pub fn get_value_string(key: &str) -> anyhow::Result<Option<String>> {
    let paths = default_paths()?;
    get_value_string_at_path(&paths.config_file, key)
}

pub fn set_value_string(key: &str, value: &str) -> anyhow::Result<()> {
    let paths = default_paths()?;
    set_value_string_at_path(&paths.config_file, key, value)
}

fn load_from_file(path: &Path) -> anyhow::Result<(toml_edit::DocumentMut, Config)> {
    if !path.exists() {
        return Ok((toml_edit::DocumentMut::new(), Config::default()));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let doc = raw
        .parse::<toml_edit::DocumentMut>()
        .with_context(|| format!("failed to parse TOML in {}", path.display()))?;

    let cfg: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
    Ok((doc, cfg))
}

pub fn get_value_string_at_path(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let (_doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    if key_type(key).is_none() {
        return Err(WtError::InvalidConfigKey(key.to_owned()).into());
    }
    let value = lookup_value(&cfg, key);
    Ok(value.map(format_value_for_stdout))
}

pub fn set_value_string_at_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let (mut doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    let item = parse_value(key, value)?;
    apply_set(&mut doc, key, item)?;

    // Validate by re-parsing the updated doc into a Config.
    let new_raw = doc.to_string();
    let new_cfg: Config = toml::from_str(&new_raw)
        .with_context(|| format!("config update produced invalid TOML for {}", path.display()))?;
    new_cfg.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, new_raw.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<(), WtError> {
        if self.worktree.dir_suffix.trim().is_empty() {
            return Err(WtError::Config(
                "worktree.dir_suffix must not be empty".to_owned(),
            ));
        }
        if self.worktree.dir_suffix.contains('/') {
            return Err(WtError::Config(
                "worktree.dir_suffix must not contain '/'".to_owned(),
            ));
        }
        if self.repos.scan_depth == 0 {
            return Err(WtError::Config("repos.scan_depth must be >= 1".to_owned()));
        }
        if self.process.timeout_seconds == 0 {
            return Err(WtError::Config(
                "process.timeout_seconds must be >= 1".to_owned(),
            ));
        }
        if self.tmux.command.trim().is_empty() {
            return Err(WtError::Config("tmux.command must not be empty".to_owned()));
        }
        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(WtError::Config(format!(
                "log.level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Bool,
    Int,
    String,
    /// Comma-separated on the command line, a TOML array in the file.
    StringList,
    Enum(&'static [&'static str]),
}

fn key_type(key: &str) -> Option<KeyType> {
    Some(match key {
        "repos.cache_file" | "worktree.dir_suffix" | "tmux.command" => KeyType::String,
        "repos.scan_paths" => KeyType::StringList,
        "color.auto_assign" | "color.tab_color" => KeyType::Bool,
        "repos.scan_depth" | "repos.cache_ttl_seconds" | "process.timeout_seconds" => {
            KeyType::Int
        }
        "log.level" => KeyType::Enum(LOG_LEVELS),
        _ => return None,
    })
}

fn parse_value(key: &str, value: &str) -> anyhow::Result<toml_edit::Item> {
    let invalid = |msg: String| WtError::InvalidConfigValue {
        key: key.to_owned(),
        msg,
    };
    let key_type = key_type(key).ok_or_else(|| WtError::InvalidConfigKey(key.to_owned()))?;
    let item = match key_type {
        KeyType::Bool => toml_edit::value(parse_bool(value).map_err(invalid)?),
        KeyType::Int => toml_edit::value(parse_int(value).map_err(invalid)?),
        KeyType::String => toml_edit::value(value),
        KeyType::StringList => {
            let arr: toml_edit::Array = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            toml_edit::value(arr)
        }
        KeyType::Enum(allowed) => {
            let v = value.trim();
            if !allowed.contains(&v) {
                return Err(invalid(format!("must be one of: {}", allowed.join(", "))).into());
            }
            toml_edit::value(v)
        }
    };
    Ok(item)
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true|false, got '{other}'")),
    }
}

fn parse_int(s: &str) -> Result<i64, String> {
    s.trim()
        .parse::<i64>()
        .map_err(|e| format!("expected integer, got '{s}': {e}"))
}

fn apply_set(
    doc: &mut toml_edit::DocumentMut,
    key: &str,
    value: toml_edit::Item,
) -> anyhow::Result<()> {
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Err(WtError::InvalidConfigKey(key.to_owned()).into());
    }

    let mut cur = doc.as_table_mut();
    for seg in &parts[..parts.len().saturating_sub(1)] {
        if !cur.contains_key(seg) {
            let mut t = toml_edit::Table::new();
            t.set_implicit(true);
            cur.insert(seg, toml_edit::Item::Table(t));
        }
        cur = cur[seg].as_table_mut().ok_or_else(|| {
            WtError::Config(format!("cannot set {key}: '{seg}' is not a table"))
        })?;
    }

    let leaf = parts[parts.len() - 1];
    cur.insert(leaf, value);
    Ok(())
}

fn lookup_value(cfg: &Config, key: &str) -> Option<serde_json::Value> {
    let mut v = serde_json::to_value(cfg).ok()?;
    for seg in key.split('.').filter(|s| !s.is_empty()) {
        match v {
            serde_json::Value::Object(mut map) => {
                v = map.remove(seg)?;
            }
            _ => return None,
        }
    }
    Some(v)
}

fn format_value_for_stdout(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_owned(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(format_value_for_stdout)
            .collect::<Vec<_>>()
            .join(","),
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn config_validation_catches_invalid_values() {
        let mut cfg = Config::default();
        cfg.worktree.dir_suffix = String::new();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.repos.scan_depth = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.process.timeout_seconds = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.log.level = "loud".to_owned();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_set_and_get_dot_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# my settings\n[color]\nauto_assign = true\n").unwrap();

        set_value_string_at_path(&path, "color.auto_assign", "false").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "color.auto_assign")
                .unwrap()
                .as_deref(),
            Some("false")
        );

        set_value_string_at_path(&path, "repos.scan_paths", "~/src, ~/work").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "repos.scan_paths")
                .unwrap()
                .as_deref(),
            Some("~/src,~/work")
        );

        set_value_string_at_path(&path, "process.timeout_seconds", "30").unwrap();
        set_value_string_at_path(&path, "log.level", "debug").unwrap();
        assert!(set_value_string_at_path(&path, "log.level", "chatty").is_err());
        assert!(set_value_string_at_path(&path, "process.timeout_seconds", "0").is_err());
        assert!(set_value_string_at_path(&path, "nope.key", "1").is_err());
        assert!(get_value_string_at_path(&path, "nope.key").is_err());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("# my settings"));

        let (_doc, cfg) = load_from_file(&path).unwrap();
        cfg.validate().unwrap();
        assert!(!cfg.color.auto_assign);
        assert_eq!(cfg.repos.scan_paths, vec!["~/src", "~/work"]);
        assert_eq!(cfg.process.timeout_seconds, 30);
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn expands_home_and_env_vars() {
        let Some(home) = home_dir() else {
            return;
        };
        assert_eq!(PathBuf::from(expand_tilde("~/x")), home.join("x"));
        assert_eq!(expand_env_vars("$WT_SURELY_UNSET_VAR/x"), "$WT_SURELY_UNSET_VAR/x");
        let shown = tilde_path(&home.join("code").to_string_lossy());
        assert!(shown.starts_with('~'));
    }
}
