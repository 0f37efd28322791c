//! Retry loop: run a closure until success, exhaustion, or cancellation.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::classify;
use super::error::FetchError;
use super::policy::{RetryDecision, RetryPolicy};

const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Sleeps for `d` on the current thread, waking early if `cancel` fires.
/// Returns false when cancelled.
pub fn sleep_unless_cancelled(d: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + d;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

/// Runs a closure until it succeeds or the retry policy says to stop.
/// `on_retry(attempt, &err)` is called before each retry sleep so the caller
/// can emit a warning. No attempt starts once `cancel` has fired.
pub fn run_with_retry<F, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_retry: R,
    mut f: F,
) -> Result<(), FetchError>
where
    F: FnMut() -> Result<(), FetchError>,
    R: FnMut(u32, &FetchError),
{
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Aborted);
        }
        match f() {
            Ok(()) => return Ok(()),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        on_retry(attempt, &e);
                        if !sleep_unless_cancelled(d, cancel) {
                            return Err(FetchError::Aborted);
                        }
                        attempt += 1;
                    }
                }
            }
        }
    }
}
