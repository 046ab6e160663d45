#![forbid(unsafe_code)]

pub mod tmux;

use crate::core::resolve::Candidate;
use crate::error::WtError;

const MAX_GROUPED_COUNTER: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub name: String,
    pub attached: bool,
    pub windows: u32,
}

impl SessionInfo {
    #[must_use]
    pub fn status(&self) -> &'static str {
        if self.attached { "attached" } else { "detached" }
    }
}

impl Candidate for SessionInfo {
    fn keys(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn label(&self) -> String {
        format!("{} [{}] ({} windows)", self.name, self.status(), self.windows)
    }
}

pub trait Mux {
    /// Sessions in the multiplexer's own order; empty when no server runs.
    fn list_sessions(&self) -> Result<Vec<SessionInfo>, WtError>;
    fn has_session(&self, name: &str) -> Result<bool, WtError>;
    /// Name of the session this process runs in, if any.
    fn current_session(&self) -> Result<Option<String>, WtError>;
    fn create(&self, name: &str) -> Result<(), WtError>;
    fn attach(&self, name: &str, detach_others: bool) -> Result<(), WtError>;
    /// New session sharing the windows of `target`.
    fn create_grouped(&self, name: &str, target: &str) -> Result<(), WtError>;
    fn kill(&self, name: &str) -> Result<(), WtError>;

    /// First free `base.N` for N in 2..=100, else a timestamp suffix.
    fn next_grouped_name(&self, base: &str) -> Result<String, WtError> {
        for n in 2..=MAX_GROUPED_COUNTER {
            let candidate = format!("{base}.{n}");
            if !self.has_session(&candidate)? {
                return Ok(candidate);
            }
        }
        let stamp = time::OffsetDateTime::now_utc().unix_timestamp();
        Ok(format!("{base}.{stamp}"))
    }
}
