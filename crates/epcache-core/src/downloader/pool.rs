//! Bounded concurrency pool for fetch batches.
//!
//! A fixed number of OS threads pull jobs from a shared queue, so at most
//! `concurrency` transfers are ever in flight. Each job is retried per the
//! policy; a failed job never aborts the rest of the batch.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::report::Reporter;
use crate::retry::{classify, run_with_retry, ErrorKind, FetchError, RetryPolicy};

/// One resource to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub url: String,
    pub dest: PathBuf,
}

/// Outcome counts for a batch. Partial success is reported here, not raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Destination already existed; no network call was made.
    pub skipped: usize,
    pub failed: usize,
    /// Never attempted, or aborted mid-transfer, because the batch was cancelled.
    pub cancelled: usize,
    pub throttle_events: u32,
    pub error_events: u32,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// Jobs whose file is now on disk.
    pub fn available(&self) -> usize {
        self.succeeded + self.skipped
    }
}

enum JobOutcome {
    Done,
    Skipped,
    Failed(FetchError),
    Cancelled,
}

/// Runs `jobs` with at most `concurrency` in flight, calling `fetch` for each
/// job whose destination does not exist yet.
pub fn run_pool<F>(
    jobs: Vec<FetchJob>,
    concurrency: usize,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    reporter: &Reporter,
    fetch: F,
) -> BatchSummary
where
    F: Fn(&FetchJob, &CancellationToken) -> Result<(), FetchError> + Send + Sync + 'static,
{
    let count = jobs.len();
    let mut summary = BatchSummary {
        total: count,
        ..BatchSummary::default()
    };
    if count == 0 {
        return summary;
    }

    let work: Arc<Mutex<VecDeque<FetchJob>>> = Arc::new(Mutex::new(jobs.into_iter().collect()));
    let fetch = Arc::new(fetch);
    let (tx, rx) = mpsc::channel();
    let num_workers = concurrency.max(1).min(count);
    let mut handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let work = Arc::clone(&work);
        let tx = tx.clone();
        let fetch = Arc::clone(&fetch);
        let policy = *policy;
        let cancel = cancel.clone();
        let reporter = reporter.clone();
        handles.push(std::thread::spawn(move || loop {
            let job = match work.lock().unwrap().pop_front() {
                Some(j) => j,
                None => break,
            };
            let outcome = run_one(&job, &policy, &cancel, &reporter, fetch.as_ref());
            if tx.send((job, outcome)).is_err() {
                break;
            }
        }));
    }
    drop(tx);

    for (job, outcome) in rx.iter() {
        match outcome {
            JobOutcome::Done => summary.succeeded += 1,
            JobOutcome::Skipped => summary.skipped += 1,
            JobOutcome::Cancelled => summary.cancelled += 1,
            JobOutcome::Failed(e) => {
                match classify(&e) {
                    ErrorKind::Throttled => summary.throttle_events += 1,
                    ErrorKind::Other => {}
                    _ => summary.error_events += 1,
                }
                summary.failed += 1;
                reporter.warn(format!("giving up on {}: {}", job.url, e));
            }
        }
    }
    for h in handles {
        if h.join().is_err() {
            tracing::error!("fetch worker thread panicked");
        }
    }
    // A panicked worker drops its job without reporting; count it as failed.
    let reported = summary.succeeded + summary.skipped + summary.failed + summary.cancelled;
    summary.failed += count - reported;
    summary
}

fn run_one<F>(
    job: &FetchJob,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    reporter: &Reporter,
    fetch: &F,
) -> JobOutcome
where
    F: Fn(&FetchJob, &CancellationToken) -> Result<(), FetchError>,
{
    if job.dest.exists() {
        return JobOutcome::Skipped;
    }
    if cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }
    let res = run_with_retry(
        policy,
        cancel,
        |attempt, e| {
            reporter.warn(format!(
                "retry {}/{} for {}: {}",
                attempt, policy.retries, job.url, e
            ))
        },
        || fetch(job, cancel),
    );
    match res {
        Ok(()) => JobOutcome::Done,
        Err(FetchError::Aborted) => JobOutcome::Cancelled,
        Err(e) => JobOutcome::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn jobs_in(dir: &std::path::Path, n: usize) -> Vec<FetchJob> {
        (0..n)
            .map(|i| FetchJob {
                url: format!("http://example.invalid/seg-{}.ts", i),
                dest: dir.join(format!("seg-{}.ts", i)),
            })
            .collect()
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    #[test]
    fn peak_in_flight_never_exceeds_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let summary = run_pool(
            jobs_in(dir.path(), 20),
            3,
            &quick_policy(),
            &CancellationToken::new(),
            &Reporter::silent(),
            move |job, _| {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                std::fs::write(&job.dest, b"x").map_err(FetchError::Storage)?;
                f.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            },
        );
        assert_eq!(summary.succeeded, 20);
        assert!(summary.all_succeeded());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn existing_destination_is_skipped_without_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = jobs_in(dir.path(), 3);
        for j in &jobs {
            std::fs::write(&j.dest, b"done").unwrap();
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let summary = run_pool(
            jobs,
            2,
            &quick_policy(),
            &CancellationToken::new(),
            &Reporter::silent(),
            move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary.skipped, 3);
        assert!(summary.all_succeeded());
    }

    #[test]
    fn failing_job_is_retried_then_counted_without_stopping_batch() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&attempts);
        let (reporter, mut rx) = Reporter::channel();
        let summary = run_pool(
            jobs_in(dir.path(), 4),
            2,
            &quick_policy(),
            &CancellationToken::new(),
            &reporter,
            move |job, _| {
                if job.url.ends_with("seg-1.ts") {
                    a.fetch_add(1, Ordering::SeqCst);
                    return Err(FetchError::Http(500));
                }
                Ok(())
            },
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.error_events, 1);
        assert!(!summary.all_succeeded());

        let mut warnings = 0;
        while let Ok(msg) = rx.try_recv() {
            if matches!(msg, crate::protocol::WorkerMessage::Warn(_)) {
                warnings += 1;
            }
        }
        // three retries plus the final give-up notice
        assert_eq!(warnings, 4);
    }

    #[test]
    fn cancellation_stops_new_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (c, token) = (Arc::clone(&calls), cancel.clone());
        let summary = run_pool(
            jobs_in(dir.path(), 10),
            1,
            &quick_policy(),
            &cancel,
            &Reporter::silent(),
            move |_, _| {
                if c.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                    token.cancel();
                    return Err(FetchError::Aborted);
                }
                Ok(())
            },
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.cancelled, 9);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn empty_batch() {
        let summary = run_pool(
            Vec::new(),
            5,
            &quick_policy(),
            &CancellationToken::new(),
            &Reporter::silent(),
            |_, _| Ok(()),
        );
        assert_eq!(summary, BatchSummary::default());
        assert!(summary.all_succeeded());
    }
}
