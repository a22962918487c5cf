//! Extension combinators for results whose failure is worth a log line but
//! not worth aborting for.

use std::fmt::Display;

/// Safe combinators that log instead of unwrapping.
pub trait ResultExt<T, E> {
    /// Convert to an `Option`, logging the error at `warn` with `context`.
    fn into_option_logged(self, context: &str) -> Option<T>;

    /// Get the value or `default`, logging the error at `warn` with `context`.
    fn or_default_logged(self, default: T, context: &str) -> T;

    /// Inspect the error without consuming the result.
    fn inspect_error<F: FnOnce(&E)>(self, f: F) -> Self;
}

impl<T, E: Display> ResultExt<T, E> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }

    fn or_default_logged(self, default: T, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "{context}, using default");
                default
            }
        }
    }

    fn inspect_error<F: FnOnce(&E)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
