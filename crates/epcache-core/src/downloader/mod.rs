//! HTTP fetching on blocking libcurl handles.
//!
//! One parameterized fetcher serves segments, keys, whole-file episodes,
//! manifests and the content-detail endpoint; the differences are carried in
//! [`FetchOptions`]. Batches run through the bounded thread pool in [`pool`].

mod pool;
mod progress;
mod single;
mod text;

pub use pool::{run_pool, BatchSummary, FetchJob};
pub use progress::ProgressThrottle;
pub use single::{fetch_to_file, part_path};
pub use text::fetch_text;

use std::time::Duration;

use crate::config::DEFAULT_USER_AGENT;

/// Per-request settings.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub user_agent: String,
    /// Hard wall-clock limit for the whole transfer.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Minimum spacing between progress notifications.
    pub progress_interval: Duration,
    /// Emit progress notifications (whole-file downloads only; segments stay quiet).
    pub verbose: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_secs(60),
            verbose: false,
        }
    }
}

impl FetchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// `Referer` value for a URL: its origin with a trailing slash.
pub fn referer_for(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(format!("{}/", origin.ascii_serialization()))
}

/// Applies the shared request setup: URL, redirects, timeouts and browser-like headers.
fn configure(easy: &mut curl::easy::Easy, url: &str, opts: &FetchOptions) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(opts.connect_timeout)?;
    easy.timeout(opts.timeout)?;
    easy.useragent(&opts.user_agent)?;

    let mut list = curl::easy::List::new();
    list.append("Accept: */*")?;
    if let Some(referer) = referer_for(url) {
        list.append(&format!("Referer: {}", referer))?;
    }
    easy.http_headers(list)?;
    // Progress callback doubles as the cancellation check.
    easy.progress(true)?;
    Ok(())
}

fn is_success(code: u32) -> bool {
    (200..300).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referer_is_origin_with_slash() {
        assert_eq!(
            referer_for("https://cdn.example.com:8443/a/b/index.m3u8?x=1").as_deref(),
            Some("https://cdn.example.com:8443/")
        );
        assert_eq!(
            referer_for("http://example.com/video.mp4").as_deref(),
            Some("http://example.com/")
        );
    }

    #[test]
    fn referer_none_for_garbage() {
        assert_eq!(referer_for("not a url"), None);
    }

    #[test]
    fn success_range() {
        assert!(is_success(200));
        assert!(is_success(206));
        assert!(!is_success(304));
        assert!(!is_success(404));
    }
}
