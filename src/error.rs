//! Error taxonomy (spec §7): invariant violations are fatal, callback
//! exceptions are unraisable (reported, then execution continues), and
//! argument errors at the user surface fail synchronously. Grounded on
//! `util/panic.rs`'s custom-hook pattern, adapted from a process-wide panic
//! hook to a per-callback-site reporting function since this crate's
//! callbacks are caught individually with `catch_unwind` rather than left
//! to unwind to a hook.

use log::error;

/// Report that a callback (a GC callback, a weakref callback, `tp_clear`,
/// or `tp_finalize`) raised while the collector was driving it. Mirrors
/// `PyErr_WriteUnraisable`'s contract: print with context, then continue
/// the collection as if the callback had returned normally.
pub fn report_unraisable(context: &str) {
    error!("exception ignored in {context}");
}

/// A user-facing argument error (spec §7: "Argument errors ... synchronous
/// failure to the caller with a clear message; no collection runs").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    GenerationOutOfRange(isize),
}

impl std::fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgumentError::GenerationOutOfRange(g) => {
                write!(f, "generation out of range: {g}")
            }
        }
    }
}

impl std::error::Error for ArgumentError {}
