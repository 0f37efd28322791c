//! Small in-memory GETs (manifests, content detail).

use tokio_util::sync::CancellationToken;

use super::{configure, is_success, FetchOptions};
use crate::retry::FetchError;

/// Fetches `url` and returns the body as text (lossy UTF-8).
pub fn fetch_text(
    url: &str,
    opts: &FetchOptions,
    cancel: &CancellationToken,
) -> Result<String, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Aborted);
    }
    let mut body: Vec<u8> = Vec::new();
    let mut easy = curl::easy::Easy::new();
    configure(&mut easy, url, opts).map_err(FetchError::Curl)?;
    let cancel_cb = cancel.clone();
    let perform_result = {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(FetchError::Curl)?;
        transfer
            .progress_function(move |_, _, _, _| !cancel_cb.is_cancelled())
            .map_err(FetchError::Curl)?;
        transfer.perform()
    };
    if let Err(e) = perform_result {
        if e.is_aborted_by_callback() {
            return Err(FetchError::Aborted);
        }
        return Err(FetchError::Curl(e));
    }
    let code = easy.response_code().map_err(FetchError::Curl)?;
    if !is_success(code) {
        return Err(FetchError::Http(code));
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}
