#![forbid(unsafe_code)]

//! Terminal ownership for the picker. Everything is drawn on stderr so that
//! stdout carries only command output, even under `$(...)`.

pub mod picker;
pub mod prompt;

use std::io::{self, IsTerminal as _};

use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::debug;

use crate::error::WtError;

pub type UiTerminal = Terminal<CrosstermBackend<io::Stderr>>;

/// Someone can answer: keys arrive on stdin and the UI is visible on stderr.
#[must_use]
pub fn is_tty() -> bool {
    io::stdin().is_terminal() && io::stderr().is_terminal()
}

fn ui_error(what: &str, e: &io::Error) -> WtError {
    WtError::Other(format!("failed to {what}: {e}"))
}

/// Raw mode plus the alternate screen, undone on drop so an early return
/// or a panic in the picker still leaves a usable shell.
pub struct TerminalSession {
    terminal: UiTerminal,
}

impl TerminalSession {
    pub fn start() -> Result<Self, WtError> {
        enable_raw_mode().map_err(|e| ui_error("enable raw mode", &e))?;
        let mut stderr = io::stderr();
        if let Err(e) = crossterm::execute!(stderr, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(ui_error("enter alt screen", &e));
        }
        match Terminal::new(CrosstermBackend::new(stderr)) {
            Ok(terminal) => Ok(Self { terminal }),
            Err(e) => {
                let _ = crossterm::execute!(io::stderr(), LeaveAlternateScreen);
                let _ = disable_raw_mode();
                Err(ui_error("create terminal", &e))
            }
        }
    }

    pub fn terminal(&mut self) -> &mut UiTerminal {
        &mut self.terminal
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let restored = disable_raw_mode()
            .and_then(|()| crossterm::execute!(self.terminal.backend_mut(), LeaveAlternateScreen))
            .and_then(|()| self.terminal.show_cursor());
        if let Err(e) = restored {
            debug!(error = %e, "terminal restore failed");
        }
    }
}
