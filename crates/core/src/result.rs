//! Result type definition and extension traits for Railway-Oriented Programming.
//!
//! Provides combinators that keep cleanup failures visible next to the
//! primary outcome instead of dropping one of them.

use crate::error::Error;

/// The standard Result type for migrator operations.
///
/// # Examples
///
/// ```ignore
/// let outcome = run_migrations(&ctx).await;
/// let released = release_lock(&ctx).await;
/// outcome.join_with(released)?;
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Merge a secondary outcome (usually cleanup) into this one.
    ///
    /// If both failed the errors are aggregated; the success value is only
    /// kept when both succeeded.
    ///
    /// # Errors
    ///
    /// Returns whichever side failed, or both joined together.
    fn join_with(self, other: Result<()>) -> Result<T>;

    /// Log the error at `error` level, passing the Result through.
    #[must_use]
    fn log_error(self, operation: &str) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn join_with(self, other: Result<()>) -> Result<T> {
        match (self, other) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) | (Err(e), Ok(())) => Err(e),
            (Err(primary), Err(secondary)) => Err(primary.join(secondary)),
        }
    }

    fn log_error(self, operation: &str) -> Self {
        if let Err(ref e) = self {
            tracing::error!(operation, error = %e, "Operation failed");
        }
        self
    }
}
