#![forbid(unsafe_code)]

//! Best-effort copy to the user's clipboard.
//!
//! Over SSH only the terminal can reach the local clipboard, so the OSC 52
//! escape is used directly. Locally the platform tools are tried in order and
//! OSC 52 is the last resort.

use std::io::Write;
use std::time::Duration;

use tracing::debug;

use crate::core::process::{Invocation, Runner};

const COPY_TIMEOUT: Duration = Duration::from_secs(3);

const COPY_COMMANDS: [&[&str]; 4] = [
    &["pbcopy"],
    &["xclip", "-selection", "clipboard"],
    &["xsel", "--clipboard", "--input"],
    &["clip"],
];

/// Copies `text`, writing any escape sequence to stderr. Returns whether a
/// copy was attempted through some channel.
pub fn copy(runner: &dyn Runner, text: &str) -> bool {
    let remote = std::env::var_os("SSH_CONNECTION").is_some() || std::env::var_os("SSH_TTY").is_some();
    copy_with(runner, &mut std::io::stderr(), text, remote)
}

fn copy_with(runner: &dyn Runner, term: &mut impl Write, text: &str, remote: bool) -> bool {
    if !remote {
        for command in COPY_COMMANDS {
            let Some((program, args)) = command.split_first() else {
                continue;
            };
            let inv = Invocation::new(program)
                .args(args.iter().copied())
                .input(text)
                .timeout(COPY_TIMEOUT);
            match runner.capture(&inv) {
                Ok(_) => {
                    debug!(program, "copied to clipboard");
                    return true;
                }
                Err(e) => debug!(program, error = %e, "clipboard tool unavailable"),
            }
        }
    }
    match term
        .write_all(osc52(text).as_bytes())
        .and_then(|()| term.flush())
    {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "osc 52 escape not written");
            false
        }
    }
}

/// `ESC ] 52 ; c ; <base64> BEL` targets the system clipboard.
fn osc52(text: &str) -> String {
    format!("\x1b]52;c;{}\x07", base64_encode(text.as_bytes()))
}

fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b1 = chunk.get(1).copied().unwrap_or(0);
        let b2 = chunk.get(2).copied().unwrap_or(0);
        let n = (u32::from(chunk[0]) << 16) | (u32::from(b1) << 8) | u32::from(b2);
        let sextet = |shift: u32| char::from(ALPHABET[((n >> shift) & 0x3F) as usize]);
        out.push(sextet(18));
        out.push(sextet(12));
        out.push(if chunk.len() > 1 { sextet(6) } else { '=' });
        out.push(if chunk.len() > 2 { sextet(0) } else { '=' });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::Captured;
    use crate::core::process::fake::FakeRunner;

    #[test]
    fn base64_padding() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(
            osc52("https://github.com/o/r/pull/7"),
            "\x1b]52;c;aHR0cHM6Ly9naXRodWIuY29tL28vci9wdWxsLzc=\x07"
        );
    }

    #[test]
    fn local_copy_uses_first_working_tool() {
        let runner = FakeRunner::default();
        runner
            .on(&["pbcopy"], Captured::failed(127, "not found"))
            .on(&["xclip"], Captured::ok(""));
        let mut term = Vec::new();

        assert!(copy_with(&runner, &mut term, "hello", false));
        assert!(term.is_empty());
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].program, "xclip");
        assert_eq!(calls[1].input.as_deref(), Some("hello"));
    }

    #[test]
    fn remote_session_goes_straight_to_the_terminal() {
        let runner = FakeRunner::default();
        let mut term = Vec::new();

        assert!(copy_with(&runner, &mut term, "foo", true));
        assert!(runner.call_lines().is_empty());
        assert_eq!(term, b"\x1b]52;c;Zm9v\x07");
    }

    #[test]
    fn no_local_tool_falls_back_to_escape() {
        let runner = FakeRunner::default();
        let mut term = Vec::new();

        assert!(copy_with(&runner, &mut term, "foo", false));
        assert_eq!(runner.call_lines().len(), 4);
        assert!(term.starts_with(b"\x1b]52;c;"));
    }
}
