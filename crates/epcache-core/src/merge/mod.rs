//! Merge pipeline: segments → one playable file.
//!
//! Attempts, in order: transcode, stream copy, then a raw whole-file download
//! of the source URL. When all of them fail the segments and the localized
//! playlist stay on disk and the caller gets [`MergeOutcome::Unmerged`].

mod ffmpeg;

pub use ffmpeg::{merge_args, run_ffmpeg, FfmpegOutcome};

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::absolute_path;
use crate::downloader::{fetch_to_file, FetchOptions};
use crate::error::EpisodeError;
use crate::report::Reporter;
use crate::retry::FetchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged(PathBuf),
    Unmerged { manifest_path: PathBuf },
}

/// Inputs of one merge.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub manifest_path: PathBuf,
    pub segment_dir: PathBuf,
    pub output: PathBuf,
    /// Manifest URL, used by the raw fallback.
    pub source_url: String,
    pub ffmpeg_path: String,
    /// Budget for each ffmpeg attempt and for the raw download.
    pub timeout: Duration,
}

/// Runs the fallback chain. Only cancellation is an error; every other
/// failure ends in `Unmerged`.
pub async fn merge(
    req: &MergeRequest,
    fetch_opts: &FetchOptions,
    cancel: &CancellationToken,
    reporter: &Reporter,
) -> Result<MergeOutcome, EpisodeError> {
    let mut ffmpeg_available = true;
    for (label, transcode) in [("transcode", true), ("stream copy", false)] {
        if !ffmpeg_available {
            break;
        }
        reporter.info(format!("merging {} ({})", req.output.display(), label));
        // ffmpeg runs inside the segment dir; relative paths would resolve there.
        let args = merge_args(&absolute_path(&req.manifest_path), &absolute_path(&req.output), transcode);
        match run_ffmpeg(&req.ffmpeg_path, &args, &req.segment_dir, req.timeout, cancel).await {
            FfmpegOutcome::Success => {
                finish(req, reporter);
                return Ok(MergeOutcome::Merged(req.output.clone()));
            }
            FfmpegOutcome::Cancelled => {
                remove_quietly(&req.output);
                return Err(EpisodeError::Aborted);
            }
            FfmpegOutcome::TimedOut => {
                reporter.warn(format!("{} timed out after {:?}", label, req.timeout));
            }
            FfmpegOutcome::Failed { code, stderr_tail } => {
                reporter.warn(format!("{} failed (exit {:?})", label, code));
                if !stderr_tail.is_empty() {
                    reporter.debug(stderr_tail);
                }
            }
            FfmpegOutcome::Unavailable(e) => {
                reporter.warn(format!("ffmpeg unavailable: {}", e));
                ffmpeg_available = false;
            }
        }
        remove_quietly(&req.output);
    }

    reporter.info(format!("falling back to raw download of {}", req.source_url));
    match raw_download(req, fetch_opts, cancel, reporter).await {
        Ok(()) => {
            finish(req, reporter);
            Ok(MergeOutcome::Merged(req.output.clone()))
        }
        Err(FetchError::Aborted) => Err(EpisodeError::Aborted),
        Err(e) => {
            reporter.error(format!(
                "merge failed, keeping segments and {}: {}",
                req.manifest_path.display(),
                e
            ));
            Ok(MergeOutcome::Unmerged {
                manifest_path: req.manifest_path.clone(),
            })
        }
    }
}

async fn raw_download(
    req: &MergeRequest,
    fetch_opts: &FetchOptions,
    cancel: &CancellationToken,
    reporter: &Reporter,
) -> Result<(), FetchError> {
    let url = req.source_url.clone();
    let output = req.output.clone();
    let opts = fetch_opts.clone().with_timeout(req.timeout).verbose(true);
    let cancel = cancel.clone();
    let reporter = reporter.clone();
    let res = tokio::task::spawn_blocking(move || {
        fetch_to_file(&url, &output, &opts, &cancel, &reporter)?;
        // A playlist saved under a media name is not a merge.
        if looks_like_playlist(&output) {
            remove_quietly(&output);
            return Err(FetchError::Http(415));
        }
        Ok(())
    })
    .await;
    match res {
        Ok(r) => r,
        Err(e) => Err(FetchError::Storage(std::io::Error::other(e.to_string()))),
    }
}

fn looks_like_playlist(path: &Path) -> bool {
    let mut head = [0u8; 7];
    match fs::File::open(path).and_then(|mut f| f.read_exact(&mut head)) {
        Ok(()) => &head == b"#EXTM3U",
        Err(_) => false,
    }
}

fn finish(req: &MergeRequest, reporter: &Reporter) {
    reporter.info(format!("merged {}", req.output.display()));
    if let Err(e) = fs::remove_dir_all(&req.segment_dir) {
        reporter.warn(format!(
            "failed to remove segment dir {}: {}",
            req.segment_dir.display(),
            e
        ));
    }
}

fn remove_quietly(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path) -> MergeRequest {
        let segment_dir = dir.join("Show_E01_m3u8");
        fs::create_dir_all(&segment_dir).unwrap();
        let manifest_path = segment_dir.join("index.m3u8");
        fs::write(&manifest_path, "#EXTM3U\nseg-1.ts\n").unwrap();
        fs::write(segment_dir.join("seg-1.ts"), b"data").unwrap();
        MergeRequest {
            manifest_path,
            segment_dir,
            output: dir.join("Show_E01.mp4"),
            // Closed port: the raw fallback fails fast.
            source_url: "http://127.0.0.1:9/index.m3u8".into(),
            ffmpeg_path: "/nonexistent/ffmpeg-binary".into(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn total_failure_keeps_segments() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path());
        let out = merge(&req, &FetchOptions::default(), &CancellationToken::new(), &Reporter::silent())
            .await
            .unwrap();
        assert_eq!(
            out,
            MergeOutcome::Unmerged {
                manifest_path: req.manifest_path.clone()
            }
        );
        assert!(req.segment_dir.join("seg-1.ts").exists());
        assert!(!req.output.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_tool_removes_segment_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path());
        // `true` exits 0 regardless of arguments.
        req.ffmpeg_path = "true".into();
        let out = merge(&req, &FetchOptions::default(), &CancellationToken::new(), &Reporter::silent())
            .await
            .unwrap();
        assert_eq!(out, MergeOutcome::Merged(req.output.clone()));
        assert!(!req.segment_dir.exists());
    }

    #[tokio::test]
    async fn cancelled_merge_is_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = merge(&req, &FetchOptions::default(), &cancel, &Reporter::silent()).await;
        assert!(matches!(res, Err(EpisodeError::Aborted)));
        assert!(req.segment_dir.exists());
    }

    #[test]
    fn playlist_detection() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.mp4");
        fs::write(&p, "#EXTM3U\n#EXTINF:4,\nseg.ts\n").unwrap();
        assert!(looks_like_playlist(&p));
        fs::write(&p, b"\x00\x00\x00\x18ftypmp42").unwrap();
        assert!(!looks_like_playlist(&p));
    }
}
