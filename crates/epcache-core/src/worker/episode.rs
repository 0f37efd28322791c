//! One episode: manifest → segments → merge, or a single whole-file fetch.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use super::WorkerState;
use crate::downloader::{fetch_to_file, run_pool, FetchJob, FetchOptions, ProgressThrottle};
use crate::error::EpisodeError;
use crate::manifest::{self, is_manifest_url};
use crate::merge::{merge, MergeOutcome, MergeRequest};
use crate::paths::{episode_output_path, merged_output_path, segment_dir_for};
use crate::protocol::{EpisodeSource, WorkerJob};
use crate::report::Reporter;

fn fetch_options(job: &WorkerJob) -> FetchOptions {
    FetchOptions {
        user_agent: job.settings.user_agent.clone(),
        timeout: job.settings.segment_timeout(),
        progress_interval: job.settings.progress_interval(),
        ..FetchOptions::default()
    }
}

/// Cancels a child token when the episode budget runs out, so a timeout
/// can be told apart from operator termination.
struct Deadline {
    token: CancellationToken,
    expired: Arc<AtomicBool>,
    timer: tokio::task::JoinHandle<()>,
}

impl Deadline {
    fn start(parent: &CancellationToken, budget: std::time::Duration) -> Self {
        let token = parent.child_token();
        let expired = Arc::new(AtomicBool::new(false));
        let (t, e) = (token.clone(), Arc::clone(&expired));
        let timer = tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            e.store(true, Ordering::SeqCst);
            t.cancel();
        });
        Self {
            token,
            expired,
            timer,
        }
    }

    fn error(&self, budget: std::time::Duration) -> EpisodeError {
        if self.expired.load(Ordering::SeqCst) {
            EpisodeError::Timeout(budget)
        } else {
            EpisodeError::Aborted
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

async fn blocking<T, F>(f: F) -> Result<T, EpisodeError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EpisodeError::Io(std::io::Error::other(e.to_string())))
}

/// Downloads one episode into the job's directory and returns the file to record.
pub(crate) async fn download_episode(
    job: &WorkerJob,
    episode: &EpisodeSource,
    cancel: &CancellationToken,
    reporter: &Reporter,
    state: &mut WorkerState,
) -> Result<PathBuf, EpisodeError> {
    std::fs::create_dir_all(&job.download_dir)?;
    if is_manifest_url(&episode.url) {
        download_manifest(job, episode, cancel, reporter, state).await
    } else {
        download_file(job, episode, cancel, reporter, state).await
    }
}

async fn download_file(
    job: &WorkerJob,
    episode: &EpisodeSource,
    cancel: &CancellationToken,
    reporter: &Reporter,
    state: &mut WorkerState,
) -> Result<PathBuf, EpisodeError> {
    state.enter(WorkerState::Downloading(episode.episode_number));
    let output = episode_output_path(&job.download_dir, &job.task_title, episode.episode_number, &episode.url);
    reporter.info(format!("downloading {} from {}", output.display(), episode.url));

    let opts = fetch_options(job).with_timeout(job.timeout()).verbose(true);
    let policy = job.settings.retry_policy();
    let jobs = vec![FetchJob {
        url: episode.url.clone(),
        dest: output.clone(),
    }];
    let concurrency = job.settings.file_concurrency;
    let (c, r) = (cancel.clone(), reporter.clone());
    let summary = blocking(move || {
        let fetch_reporter = r.clone();
        run_pool(jobs, concurrency, &policy, &c, &r, move |job, cancel| {
            fetch_to_file(&job.url, &job.dest, &opts, cancel, &fetch_reporter).map(|_| ())
        })
    })
    .await?;

    if summary.cancelled > 0 {
        return Err(EpisodeError::Aborted);
    }
    if summary.skipped > 0 {
        reporter.info(format!("{} already present", output.display()));
    }
    if !summary.all_succeeded() {
        return Err(EpisodeError::SegmentFetch {
            failed: summary.failed,
            total: summary.total,
        });
    }
    Ok(output)
}

async fn download_manifest(
    job: &WorkerJob,
    episode: &EpisodeSource,
    cancel: &CancellationToken,
    reporter: &Reporter,
    state: &mut WorkerState,
) -> Result<PathBuf, EpisodeError> {
    let output = merged_output_path(&job.download_dir, &job.task_title, episode.episode_number);
    if output.exists() {
        reporter.info(format!("{} already present", output.display()));
        return Ok(output);
    }
    let segment_dir = segment_dir_for(&output);
    let budget = job.timeout();
    let deadline = Deadline::start(cancel, budget);
    let opts = fetch_options(job);
    let policy = job.settings.retry_policy();

    state.enter(WorkerState::ResolvingManifest(episode.episode_number));
    reporter.info(format!("resolving manifest {}", episode.url));
    let resolved = {
        let (url, dir, o, c, r) = (
            episode.url.clone(),
            segment_dir.clone(),
            opts.clone(),
            deadline.token.clone(),
            reporter.clone(),
        );
        blocking(move || manifest::resolve(&url, &dir, &o, &policy, &c, &r)).await?
    };
    let resolved = match resolved {
        Ok(r) => r,
        Err(e) if e.is_aborted() => return Err(deadline.error(budget)),
        Err(e) => return Err(e),
    };

    state.enter(WorkerState::Downloading(episode.episode_number));
    let jobs = resolved.jobs(&segment_dir);
    let total = jobs.len();
    let concurrency = job.settings.segment_concurrency;
    reporter.info(format!("downloading {} segments, concurrency {}", total, concurrency));
    let summary = {
        let (c, r) = (deadline.token.clone(), reporter.clone());
        let done = Arc::new(AtomicUsize::new(0));
        let throttle = Arc::new(Mutex::new(ProgressThrottle::new(job.settings.progress_interval())));
        blocking(move || {
            let fetch_reporter = r.clone();
            run_pool(jobs, concurrency, &policy, &c, &r, move |job, cancel| {
                let res = fetch_to_file(&job.url, &job.dest, &opts, cancel, &fetch_reporter).map(|_| ());
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if n == total || throttle.lock().unwrap().ready() {
                    fetch_reporter.debug(format!("segment {}/{}", n, total));
                }
                res
            })
        })
        .await?
    };

    if deadline.token.is_cancelled() {
        return Err(deadline.error(budget));
    }
    drop(deadline);

    if summary.all_succeeded() {
        reporter.info(format!("all {} segments downloaded", total));
    } else {
        reporter.warn(format!(
            "{}/{} segments downloaded, {} failed",
            summary.available(),
            total,
            summary.failed
        ));
        if !job.settings.allow_partial_merge || summary.available() == 0 {
            return Err(EpisodeError::SegmentFetch {
                failed: summary.failed,
                total,
            });
        }
    }

    state.enter(WorkerState::Merging(episode.episode_number));
    let req = MergeRequest {
        manifest_path: resolved.manifest_path.clone(),
        segment_dir,
        output,
        source_url: episode.url.clone(),
        ffmpeg_path: job.settings.ffmpeg_path.clone(),
        timeout: job.timeout(),
    };
    match merge(&req, &fetch_options(job), cancel, reporter).await? {
        MergeOutcome::Merged(path) => Ok(path),
        MergeOutcome::Unmerged { manifest_path } => {
            reporter.warn(format!("keeping unmerged playlist {}", manifest_path.display()));
            Ok(manifest_path)
        }
    }
}
