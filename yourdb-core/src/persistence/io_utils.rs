//! Retry helper for transient I/O errors during persistence operations.
//!
//! Grounded directly on the teacher's `persistence/io_utils.rs`
//! (`in-mem-db-core`): bounded retries with a sleep between attempts,
//! only for errors classified as transient; everything else propagates
//! immediately.

use crate::error::{is_transient, Result, YourDbError};

/// Retries `operation` up to `max_retries` times, sleeping `retry_delay_ms`
/// between attempts, but only when the failure is a transient I/O error
/// (spec §4.6: a non-transient I/O failure is fatal to the operation on
/// first occurrence).
pub fn retry_io_operation<F, T>(mut operation: F, max_retries: u32, retry_delay_ms: u64, context: &'static str) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(YourDbError::IoError { context: ctx, source }) if is_transient(&source) => {
                attempt += 1;
                if attempt > max_retries {
                    return Err(YourDbError::TransientIoExhausted {
                        context: ctx,
                        attempts: attempt,
                        source,
                    });
                }
                tracing::warn!(
                    context,
                    attempt,
                    max_retries,
                    error = %source,
                    "transient I/O error, retrying"
                );
                if retry_delay_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(retry_delay_ms));
                }
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn succeeds_without_retry_on_non_io_error() {
        let result: Result<()> = retry_io_operation(
            || Err(YourDbError::EntityNotFound("x".into())),
            3,
            0,
            "test",
        );
        assert!(matches!(result, Err(YourDbError::EntityNotFound(_))));
    }

    #[test]
    fn retries_transient_errors_up_to_the_limit() {
        let attempts = Cell::new(0);
        let result: Result<()> = retry_io_operation(
            || {
                attempts.set(attempts.get() + 1);
                Err(YourDbError::IoError {
                    context: "test",
                    source: std::io::Error::from(std::io::ErrorKind::TimedOut),
                })
            },
            2,
            0,
            "test",
        );
        assert!(matches!(result, Err(YourDbError::TransientIoExhausted { attempts: 3, .. })));
        assert_eq!(attempts.get(), 3);
    }
}
