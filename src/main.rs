#![forbid(unsafe_code)]

use std::process::ExitCode;

fn main() -> ExitCode {
    workflow_tools::cli::main()
}
