#![forbid(unsafe_code)]

pub mod color;
pub mod discovery;
pub mod git;
pub mod github;
pub mod naming;
pub mod process;
pub mod repos;
pub mod resolve;
pub mod validate;
pub mod worktree;
