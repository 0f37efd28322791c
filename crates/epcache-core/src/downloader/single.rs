//! Single GET streamed into a destination file.
//!
//! The body goes to `<dest>.part` and is renamed into place only after it is
//! flushed, so an existing destination always means a finished download.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::progress::ProgressThrottle;
use super::{configure, is_success, FetchOptions};
use crate::report::Reporter;
use crate::retry::FetchError;

/// Temporary path used while a download is in flight.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Downloads `url` into `dest`. Returns the number of bytes written.
///
/// On any failure (transport, non-2xx, write error, cancellation) the partial
/// file is removed and nothing exists at `dest`.
pub fn fetch_to_file(
    url: &str,
    dest: &Path,
    opts: &FetchOptions,
    cancel: &CancellationToken,
    reporter: &Reporter,
) -> Result<u64, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Aborted);
    }
    let part = part_path(dest);
    let result = transfer(url, &part, opts, cancel, reporter)
        .and_then(|written| fs::rename(&part, dest).map(|_| written).map_err(FetchError::Storage));
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn transfer(
    url: &str,
    part: &Path,
    opts: &FetchOptions,
    cancel: &CancellationToken,
    reporter: &Reporter,
) -> Result<u64, FetchError> {
    let file = File::create(part).map_err(FetchError::Storage)?;
    let mut out = BufWriter::new(file);
    let mut written: u64 = 0;
    let mut storage_error: Option<std::io::Error> = None;

    let mut easy = curl::easy::Easy::new();
    configure(&mut easy, url, opts).map_err(FetchError::Curl)?;

    let label = url.rsplit('/').next().unwrap_or(url).to_string();
    let mut throttle = ProgressThrottle::new(opts.progress_interval);
    let verbose = opts.verbose;
    let cancel_cb = cancel.clone();
    let reporter_cb = reporter.clone();

    let perform_result = {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| match out.write_all(data) {
                Ok(()) => {
                    written += data.len() as u64;
                    Ok(data.len())
                }
                Err(e) => {
                    storage_error = Some(e);
                    Ok(0)
                }
            })
            .map_err(FetchError::Curl)?;
        transfer
            .progress_function(move |dltotal, dlnow, _, _| {
                if cancel_cb.is_cancelled() {
                    return false;
                }
                if verbose && dltotal > 0.0 && throttle.ready() {
                    reporter_cb.debug(format!(
                        "{}: {:.1}% ({:.1} / {:.1} MiB)",
                        label,
                        dlnow / dltotal * 100.0,
                        dlnow / 1_048_576.0,
                        dltotal / 1_048_576.0
                    ));
                }
                true
            })
            .map_err(FetchError::Curl)?;
        transfer.perform()
    };

    if let Err(e) = perform_result {
        if e.is_aborted_by_callback() || cancel.is_cancelled() {
            return Err(FetchError::Aborted);
        }
        if e.is_write_error() {
            if let Some(io_err) = storage_error.take() {
                return Err(FetchError::Storage(io_err));
            }
        }
        return Err(FetchError::Curl(e));
    }

    let code = easy.response_code().map_err(FetchError::Curl)?;
    if !is_success(code) {
        return Err(FetchError::Http(code));
    }

    out.flush().map_err(FetchError::Storage)?;
    out.get_ref().sync_all().map_err(FetchError::Storage)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/show/seg-001.ts")),
            PathBuf::from("/tmp/show/seg-001.ts.part")
        );
    }

    #[test]
    fn cancelled_before_start_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.ts");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = fetch_to_file(
            "http://127.0.0.1:9/a.ts",
            &dest,
            &FetchOptions::default(),
            &cancel,
            &Reporter::silent(),
        );
        assert!(matches!(res, Err(FetchError::Aborted)));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn connection_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("b.ts");
        let opts = FetchOptions::default().with_timeout(std::time::Duration::from_secs(5));
        // Port 9 (discard) is closed on test hosts.
        let res = fetch_to_file(
            "http://127.0.0.1:9/b.ts",
            &dest,
            &opts,
            &CancellationToken::new(),
            &Reporter::silent(),
        );
        assert!(matches!(res, Err(FetchError::Curl(_))));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }
}
