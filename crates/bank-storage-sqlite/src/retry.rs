//! Retry on `SQLITE_BUSY`

use crate::{Error, Result};
use rusqlite::ErrorCode;
use std::thread;
use std::time::Duration;

/// Base backoff in milliseconds
const BASE_BACKOFF_MS: u64 = 50;

/// Backoff ceiling in milliseconds
const MAX_BACKOFF_MS: u64 = 1000;

/// Run `f`, retrying up to `max_retries` times while the database is busy
pub fn with_busy_retry<F, T>(max_retries: u32, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempts = 0;

    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(Error::Database(ref e)) if is_busy_error(e) && attempts < max_retries => {
                attempts += 1;
                let backoff = calculate_backoff(attempts);
                tracing::debug!(
                    "SQLITE_BUSY (attempt {}/{}), retrying in {}ms",
                    attempts,
                    max_retries,
                    backoff
                );
                thread::sleep(Duration::from_millis(backoff));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if error is SQLITE_BUSY or SQLITE_LOCKED
pub fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked,
                ..
            },
            _
        )
    )
}

/// Exponential backoff with jitter, capped
fn calculate_backoff(attempt: u32) -> u64 {
    let base = BASE_BACKOFF_MS * (1 << attempt.min(6));
    let jitter = rand::random::<u64>() % (base / 4 + 1);
    (base + jitter).min(MAX_BACKOFF_MS)
}
