//! ffmpeg subprocess with timeout and cancellation.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const STDERR_TAIL: usize = 8;

/// How one ffmpeg invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfmpegOutcome {
    Success,
    /// Non-zero exit; carries the code and the last stderr lines.
    Failed { code: Option<i32>, stderr_tail: String },
    TimedOut,
    Cancelled,
    /// The binary could not be started at all.
    Unavailable(String),
}

/// Arguments for muxing `manifest` into `output`.
pub fn merge_args(manifest: &Path, output: &Path, transcode: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-y".into(),
        "-allowed_extensions".into(),
        "ALL".into(),
        "-i".into(),
        manifest.as_os_str().to_os_string(),
    ];
    if transcode {
        args.extend(["-c:v", "libx264", "-c:a", "aac"].map(OsString::from));
    } else {
        args.extend(["-c", "copy"].map(OsString::from));
    }
    args.push(output.as_os_str().to_os_string());
    args
}

/// Runs `program args` in `cwd`; the child is killed on timeout or cancel.
pub async fn run_ffmpeg(
    program: &str,
    args: &[OsString],
    cwd: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> FfmpegOutcome {
    let mut child = match Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => return FfmpegOutcome::Unavailable(format!("{}: {}", program, e)),
    };

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(target: "epcache::ffmpeg", "{}", line);
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail).join("\n")
        })
    });

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            FfmpegOutcome::Cancelled
        }
        _ = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            FfmpegOutcome::TimedOut
        }
        status = child.wait() => match status {
            Ok(s) if s.success() => FfmpegOutcome::Success,
            Ok(s) => FfmpegOutcome::Failed { code: s.code(), stderr_tail: String::new() },
            Err(e) => FfmpegOutcome::Failed { code: None, stderr_tail: e.to_string() },
        },
    };

    let tail = match stderr_task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };
    match outcome {
        FfmpegOutcome::Failed { code, stderr_tail } if stderr_tail.is_empty() => {
            FfmpegOutcome::Failed { code, stderr_tail: tail }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_args() {
        let args = merge_args(Path::new("index.m3u8"), Path::new("/out/Show_E01.mp4"), false);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["-y", "-allowed_extensions", "ALL", "-i", "index.m3u8", "-c", "copy", "/out/Show_E01.mp4"]
        );
    }

    #[test]
    fn transcode_args() {
        let args = merge_args(Path::new("index.m3u8"), Path::new("o.mp4"), true);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(&args[5..9], &["-c:v", "libx264", "-c:a", "aac"]);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_ffmpeg(
            "/nonexistent/ffmpeg-binary",
            &[],
            dir.path(),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(out, FfmpegOutcome::Unavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let out = run_ffmpeg(
            "sleep",
            &["30".into()],
            dir.path(),
            Duration::from_millis(200),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(out, FfmpegOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let out = run_ffmpeg("sleep", &["30".into()], dir.path(), Duration::from_secs(60), &cancel).await;
        assert_eq!(out, FfmpegOutcome::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_ffmpeg("false", &[], dir.path(), Duration::from_secs(5), &CancellationToken::new()).await;
        assert!(matches!(out, FfmpegOutcome::Failed { code: Some(1), .. }));
    }
}
