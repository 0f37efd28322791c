//! Retry policy for fetches.
//!
//! Every failed fetch is retried a fixed number of times with a fixed delay,
//! except when the failure is an operator abort. Error classification is kept
//! so callers can count throttling and timeouts in their batch summaries.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::FetchError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::{run_with_retry, sleep_unless_cancelled};
