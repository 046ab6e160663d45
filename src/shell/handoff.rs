#![forbid(unsafe_code)]

//! Requests for the calling shell, passed through files the wrapper reads
//! after the process exits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::WtError;

pub const WT_CD_FILE: &str = "WT_CD_FILE";
pub const RP_CD_FILE: &str = "RP_CD_FILE";
pub const WT_ENV_FILE: &str = "WT_ENV_FILE";

#[derive(Debug)]
pub struct Handoff {
    cd_file: Option<PathBuf>,
    env_file: Option<PathBuf>,
    temp_dir: PathBuf,
    exports: BTreeMap<String, String>,
}

impl Handoff {
    #[must_use]
    pub fn new(cd_file: Option<PathBuf>, env_file: Option<PathBuf>, temp_dir: PathBuf) -> Self {
        Self {
            cd_file,
            env_file,
            temp_dir,
            exports: BTreeMap::new(),
        }
    }

    /// Reads the handoff paths from the environment. `cd_var` is
    /// [`WT_CD_FILE`] or [`RP_CD_FILE`] depending on the dispatcher.
    #[must_use]
    pub fn from_env(cd_var: &str) -> Self {
        let var = |name: &str| {
            std::env::var_os(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self::new(var(cd_var), var(WT_ENV_FILE), std::env::temp_dir())
    }

    pub fn request_directory_change(&self, path: &Path) -> Result<(), WtError> {
        println!("Switching to {}", path.display());
        let Some(file) = self.writable(self.cd_file.as_deref()) else {
            return Ok(());
        };
        std::fs::write(&file, path.to_string_lossy().as_bytes())
            .map_err(|e| WtError::io(&file, e))?;
        info!(target = %path.display(), "requested directory change");
        Ok(())
    }

    pub fn request_environment_export(&mut self, name: &str, value: &str) -> Result<(), WtError> {
        if !valid_env_name(name) {
            return Err(WtError::Validation(format!(
                "invalid environment variable name '{name}'"
            )));
        }
        self.exports.insert(name.to_owned(), value.to_owned());
        let Some(file) = self.writable(self.env_file.as_deref()) else {
            return Ok(());
        };
        std::fs::write(&file, render_exports(&self.exports)).map_err(|e| WtError::io(&file, e))?;
        info!(name, "requested environment export");
        Ok(())
    }

    fn writable(&self, file: Option<&Path>) -> Option<PathBuf> {
        let Some(file) = file else {
            debug!("no handoff file configured; shell wrapper not active");
            return None;
        };
        if inside_dir(file, &self.temp_dir) {
            Some(file.to_path_buf())
        } else {
            warn!(file = %file.display(), "handoff file outside the temp directory; ignored");
            None
        }
    }
}

fn valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn render_exports(exports: &BTreeMap<String, String>) -> String {
    exports
        .iter()
        .map(|(k, v)| format!("export {k}={}\n", shell_quote(v)))
        .collect()
}

/// The file need not exist yet, so its parent is resolved instead.
fn inside_dir(file: &Path, dir: &Path) -> bool {
    let Some(name) = file.file_name() else {
        return false;
    };
    let parent = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return false,
    };
    let (Ok(parent), Ok(dir)) = (parent.canonicalize(), dir.canonicalize()) else {
        return false;
    };
    parent.join(name).starts_with(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_values_for_the_shell() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        let mut m = BTreeMap::new();
        m.insert("B".to_owned(), "2".to_owned());
        m.insert("A".to_owned(), "x y".to_owned());
        assert_eq!(render_exports(&m), "export A='x y'\nexport B='2'\n");
    }

    #[test]
    fn env_names() {
        assert!(valid_env_name("WT_GITIGNORE_DECLINED"));
        assert!(valid_env_name("_x1"));
        assert!(!valid_env_name("1X"));
        assert!(!valid_env_name("A-B"));
        assert!(!valid_env_name(""));
        assert!(!valid_env_name("ÉTÉ"));
        assert!(!valid_env_name("A B"));
    }

    #[test]
    fn writes_cd_target_and_accumulated_exports() {
        let tmp = tempfile::tempdir().unwrap();
        let cd = tmp.path().join(".wt_cd_1");
        let env = tmp.path().join(".wt_env_1");
        let mut h = Handoff::new(Some(cd.clone()), Some(env.clone()), tmp.path().to_path_buf());

        h.request_directory_change(Path::new("/some/where")).unwrap();
        assert_eq!(std::fs::read_to_string(&cd).unwrap(), "/some/where");
        h.request_directory_change(Path::new("/else")).unwrap();
        assert_eq!(std::fs::read_to_string(&cd).unwrap(), "/else");

        h.request_environment_export("A", "1").unwrap();
        h.request_environment_export("B", "o'k").unwrap();
        assert_eq!(
            std::fs::read_to_string(&env).unwrap(),
            "export A='1'\nexport B='o'\\''k'\n"
        );
        assert!(h.request_environment_export("bad-name", "x").is_err());
    }

    #[test]
    fn missing_or_foreign_files_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let h = Handoff::new(None, None, tmp.path().to_path_buf());
        h.request_directory_change(Path::new("/x")).unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);

        let outside = tempfile::tempdir().unwrap();
        let foreign = outside.path().join("cd");
        let h = Handoff::new(Some(foreign.clone()), None, tmp.path().to_path_buf());
        h.request_directory_change(Path::new("/x")).unwrap();
        assert!(!foreign.exists());
    }
}
