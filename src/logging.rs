//! Thin wrapper establishing the crate's logging setup.
//!
//! SamCore logs through `dusa_collection_utils`'s own `LogLevel`/`log!`
//! machinery rather than the crate-local duplicate the teacher's older
//! modules still carry in `logger.rs` — same macro call sites, one fewer
//! redundant module.

use dusa_collection_utils::core::logger::{set_log_level, LogLevel};

/// Sets the initial log level for the process. Called once by the
/// `samcore` binary's `main` and by test setup; safe to call more than
/// once.
pub fn init(debug_mode: bool) {
    set_log_level(if debug_mode { LogLevel::Debug } else { LogLevel::Info });
}
