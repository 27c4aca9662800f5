//! Command terminal shared between firmware and emulator targets.
//!
//! Lines are parsed by [`grammar`], applied to the live settings by
//! [`commands::CommandExecutor`], and `gs` replies are rendered by [`status`].

pub mod commands;
pub mod grammar;
pub mod status;

/// Version reported by the `ve` command.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest line the terminal accepts, terminator excluded.
pub const MAX_LINE_LEN: usize = 64;
