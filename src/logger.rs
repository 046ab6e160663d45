#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

use crate::config;

pub const LOG_ENV_VAR: &str = "WORKFLOW_TOOLS_LOG";
pub const LOG_FILE: &str = "workflow-tools.log";

/// Sends tracing output to `<state dir>/workflow-tools.log` so the terminal
/// only ever shows command output. `WORKFLOW_TOOLS_LOG` overrides `level`.
pub fn init(level: &str) -> anyhow::Result<()> {
    let dir = config::state_dir()?;
    init_in(&dir, level)
}

pub fn init_in(dir: &Path, level: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::never(dir, LOG_FILE);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_ansi(false)
        .with_writer(appender)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))?;
    Ok(())
}
