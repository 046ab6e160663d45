#![forbid(unsafe_code)]

//! Line-oriented confirmations and text input. Questions go to stderr,
//! answers come from stdin.

use std::io::{BufRead, Write};

use crate::error::WtError;

/// Reads one line; end of input means nobody is there to answer.
fn read_answer(input: &mut impl BufRead) -> Result<String, WtError> {
    let mut line = String::new();
    let n = input
        .read_line(&mut line)
        .map_err(|e| WtError::Other(format!("failed to read input: {e}")))?;
    if n == 0 {
        return Err(WtError::Cancelled);
    }
    Ok(line.trim().to_owned())
}

fn ask_on(out: &mut impl Write, input: &mut impl BufRead, question: &str) -> Result<String, WtError> {
    out.write_all(question.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| WtError::Other(format!("failed to write prompt: {e}")))?;
    read_answer(input)
}

fn ask(question: &str) -> Result<String, WtError> {
    ask_on(&mut std::io::stderr(), &mut std::io::stdin().lock(), question)
}

fn parse_yes_no(answer: &str, default: bool) -> bool {
    match answer.to_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    }
}

pub fn confirm(question: &str, default: bool) -> Result<bool, WtError> {
    let hint = if default { "(Y/n)" } else { "(y/N)" };
    let answer = ask(&format!("{question} {hint}: "))?;
    Ok(parse_yes_no(&answer, default))
}

/// Free-text input; an empty answer takes `default` when there is one.
pub fn prompt_line(label: &str, default: Option<&str>) -> Result<String, WtError> {
    let question = match default {
        Some(d) if !d.is_empty() => format!("{label} [{d}]: "),
        _ => format!("{label}: "),
    };
    let answer = ask(&question)?;
    if answer.is_empty() {
        return Ok(default.unwrap_or_default().to_owned());
    }
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_answers() {
        assert!(parse_yes_no("Y", false));
        assert!(parse_yes_no("yes", false));
        assert!(!parse_yes_no("n", true));
        assert!(parse_yes_no("", true));
        assert!(!parse_yes_no("whatever", false));
    }

    #[test]
    fn eof_is_cancelled() {
        let mut empty: &[u8] = b"";
        assert!(matches!(read_answer(&mut empty), Err(WtError::Cancelled)));

        let mut line: &[u8] = b"  feature-x \n";
        assert_eq!(read_answer(&mut line).unwrap(), "feature-x");
    }

    #[test]
    fn question_goes_to_the_ui_stream() {
        let mut ui = Vec::new();
        let mut input: &[u8] = b"y\n";
        let answer = ask_on(&mut ui, &mut input, "Remove? (y/N): ").unwrap();
        assert_eq!(answer, "y");
        assert_eq!(ui, b"Remove? (y/N): ");
    }
}
