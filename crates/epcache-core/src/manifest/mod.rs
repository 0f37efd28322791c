//! Manifest resolver: turns an HLS playlist URL into an ordered list of
//! downloadable resources plus a localized `index.m3u8`.

mod parse;
mod uri;

pub use parse::{is_master_playlist, localize, parse_variants, select_best, Localized, Resource, VariantStream};
pub use uri::{is_manifest_url, resolve_uri};

use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::downloader::{fetch_text, FetchJob, FetchOptions};
use crate::error::EpisodeError;
use crate::report::Reporter;
use crate::retry::{run_with_retry, FetchError, RetryPolicy};

/// Name of the localized playlist inside the segment directory.
pub const LOCAL_MANIFEST: &str = "index.m3u8";

/// Result of resolving a manifest.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    /// Playlist the resources came from (the chosen variant, if any).
    pub media_url: String,
    pub resources: Vec<Resource>,
    /// Localized copy written into the segment directory.
    pub manifest_path: PathBuf,
}

impl ResolvedManifest {
    /// Fetch jobs targeting `dir`, in playlist order.
    pub fn jobs(&self, dir: &Path) -> Vec<FetchJob> {
        self.resources
            .iter()
            .map(|r| FetchJob {
                url: r.url.clone(),
                dest: dir.join(&r.file_name),
            })
            .collect()
    }
}

fn fetch_with_retry(
    url: &str,
    opts: &FetchOptions,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    reporter: &Reporter,
) -> Result<String, FetchError> {
    let mut body = None;
    run_with_retry(
        policy,
        cancel,
        |attempt, e| reporter.warn(format!("retry {}/{} for manifest {}: {}", attempt, policy.retries, url, e)),
        || {
            body = Some(fetch_text(url, opts, cancel)?);
            Ok(())
        },
    )?;
    Ok(body.unwrap_or_default())
}

/// Fetches `url`, follows the best variant, and writes `index.m3u8` into `dir`.
/// Blocking; call from a worker thread.
pub fn resolve(
    url: &str,
    dir: &Path,
    opts: &FetchOptions,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    reporter: &Reporter,
) -> Result<ResolvedManifest, EpisodeError> {
    let manifest_err = |source: FetchError| EpisodeError::ManifestFetch {
        url: url.to_string(),
        source,
    };
    let mut base = Url::parse(url).map_err(|e| EpisodeError::InvalidUrl(format!("{}: {}", url, e)))?;
    let mut body = fetch_with_retry(url, opts, policy, cancel, reporter).map_err(manifest_err)?;

    if is_master_playlist(&body) {
        let variants = parse_variants(&body, &base);
        reporter.debug(format!("{} variant streams in {}", variants.len(), url));
        if let Some(best) = select_best(&variants) {
            reporter.info(format!(
                "selected variant {} bps{}",
                best.bandwidth,
                best.resolution
                    .as_deref()
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default()
            ));
            match fetch_with_retry(&best.url, opts, policy, cancel, reporter) {
                Ok(variant_body) => match Url::parse(&best.url) {
                    Ok(variant_base) => {
                        body = variant_body;
                        base = variant_base;
                    }
                    Err(e) => reporter.debug(format!("variant url {} unusable: {}", best.url, e)),
                },
                Err(FetchError::Aborted) => return Err(EpisodeError::Aborted),
                Err(e) => reporter.debug(format!(
                    "failed to fetch variant {}: {}; continuing with original manifest",
                    best.url, e
                )),
            }
        }
    }

    let localized = localize(&body, &base);
    fs::create_dir_all(dir)?;
    let manifest_path = dir.join(LOCAL_MANIFEST);
    fs::write(&manifest_path, &localized.text)?;
    reporter.debug(format!("saved localized manifest to {}", manifest_path.display()));

    if localized.resources.is_empty() {
        return Err(EpisodeError::EmptyManifest {
            url: url.to_string(),
        });
    }
    Ok(ResolvedManifest {
        media_url: base.into(),
        resources: localized.resources,
        manifest_path,
    })
}
