//! Local path derivation: task destinations, episode filenames, URL basenames.

mod destination;
mod sanitize;
mod url_name;

pub use destination::{relative_to_base, resolve_destination};
pub use sanitize::sanitize_title;
pub use url_name::{extension_from_url, url_basename};

use std::path::{Path, PathBuf};

/// Extension used when the URL path carries none.
pub const DEFAULT_EXTENSION: &str = "mp4";

/// File stem for an episode: `{title}_E{nn}` (at least two digits).
pub fn episode_stem(title: &str, episode_number: u32) -> String {
    format!("{}_E{:02}", sanitize_title(title), episode_number)
}

/// Final output file for an episode downloaded from `url`.
pub fn episode_output_path(dir: &Path, title: &str, episode_number: u32, url: &str) -> PathBuf {
    let ext = extension_from_url(url).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    dir.join(format!("{}.{}", episode_stem(title, episode_number), ext))
}

/// Output file of a merged manifest download (always mp4).
pub fn merged_output_path(dir: &Path, title: &str, episode_number: u32) -> PathBuf {
    dir.join(format!("{}.{}", episode_stem(title, episode_number), DEFAULT_EXTENSION))
}

/// Segment directory for a manifest download: `{stem}_m3u8` beside the output.
pub fn segment_dir_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "episode".to_string());
    output.with_file_name(format!("{}_m3u8", stem))
}
