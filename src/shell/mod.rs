#![forbid(unsafe_code)]

pub mod clipboard;
pub mod handoff;
pub mod init;
