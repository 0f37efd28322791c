//! Pure playlist parsing: variant selection and line localization.

use std::sync::LazyLock;

use regex::{NoExpand, Regex};
use url::Url;

use super::uri::resolve_uri;
use crate::paths::url_basename;

static BANDWIDTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"BANDWIDTH=(\d+)").unwrap());
static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"RESOLUTION=(\d+x\d+)").unwrap());
static URI_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"URI="([^"]+)""#).unwrap());

const SEGMENT_SUFFIXES: &[&str] = &[".ts", ".m4s", ".mp4", ".m4a", ".m4v", ".aac", ".mp3", ".vtt"];

/// One rendition listed in a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStream {
    pub bandwidth: u64,
    pub resolution: Option<String>,
    pub url: String,
}

/// A downloadable resource referenced by a media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub url: String,
    /// Local filename inside the segment directory.
    pub file_name: String,
}

/// A media playlist rewritten to reference local files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Localized {
    /// Segments and keys in file order.
    pub resources: Vec<Resource>,
    pub text: String,
}

/// True when the playlist points at other playlists.
pub fn is_master_playlist(body: &str) -> bool {
    body.lines().map(str::trim).any(|l| {
        l.starts_with("#EXT-X-STREAM-INF") || (!l.starts_with('#') && l.contains(".m3u8"))
    })
}

/// Collects variant streams. A URI line is paired with the most recent
/// `#EXT-X-STREAM-INF` attributes; a bare `.m3u8` line gets bandwidth 0.
pub fn parse_variants(body: &str, base: &Url) -> Vec<VariantStream> {
    let mut variants = Vec::new();
    let mut pending: Option<(u64, Option<String>)> = None;
    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("#EXT-X-STREAM-INF") {
            let bandwidth = BANDWIDTH_RE
                .captures(line)
                .and_then(|c| c[1].parse::<u64>().ok())
                .unwrap_or(0);
            let resolution = RESOLUTION_RE.captures(line).map(|c| c[1].to_string());
            pending = Some((bandwidth, resolution));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let attrs = pending.take();
        if attrs.is_none() && !line.contains(".m3u8") {
            continue;
        }
        let (bandwidth, resolution) = attrs.unwrap_or((0, None));
        if let Some(url) = resolve_uri(base, line) {
            variants.push(VariantStream {
                bandwidth,
                resolution,
                url,
            });
        }
    }
    variants
}

/// Highest bandwidth wins; on a tie the first listed is kept.
pub fn select_best(variants: &[VariantStream]) -> Option<&VariantStream> {
    let mut best: Option<&VariantStream> = None;
    for v in variants {
        match best {
            Some(b) if v.bandwidth <= b.bandwidth => {}
            _ => best = Some(v),
        }
    }
    best
}

/// Registers `url` once and returns its local filename.
fn register(resources: &mut Vec<Resource>, url: String, fallback: String) -> String {
    if let Some(existing) = resources.iter().find(|r| r.url == url) {
        return existing.file_name.clone();
    }
    let file_name = url_basename(&url).unwrap_or(fallback);
    resources.push(Resource {
        url,
        file_name: file_name.clone(),
    });
    file_name
}

fn is_segment_line(line: &str) -> bool {
    let path = line.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
    SEGMENT_SUFFIXES.iter().any(|s| path.ends_with(s))
}

/// Rewrites a media playlist to local filenames and lists what to fetch.
pub fn localize(body: &str, base: &Url) -> Localized {
    let mut resources: Vec<Resource> = Vec::new();
    let mut out = String::with_capacity(body.len());
    for raw in body.lines() {
        let line = raw.trim();
        let localized = if line.starts_with("#EXT-X-KEY") || line.starts_with("#EXT-X-MAP") {
            match URI_ATTR_RE.captures(line) {
                Some(caps) => match resolve_uri(base, &caps[1]) {
                    Some(url) => {
                        let fallback = format!("resource-{}.bin", resources.len());
                        let name = register(&mut resources, url, fallback);
                        URI_ATTR_RE
                            .replace(line, NoExpand(&format!("URI=\"{}\"", name)))
                            .into_owned()
                    }
                    None => raw.to_string(),
                },
                None => raw.to_string(),
            }
        } else if !line.is_empty() && !line.starts_with('#') && is_segment_line(line) {
            match resolve_uri(base, line) {
                Some(url) => {
                    let fallback = format!("segment-{}.ts", resources.len());
                    register(&mut resources, url, fallback)
                }
                None => raw.to_string(),
            }
        } else {
            raw.to_string()
        };
        out.push_str(&localized);
        out.push('\n');
    }

    Localized {
        resources,
        text: out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/vod/show/master.m3u8").unwrap()
    }

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
360p/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720\n\
720p/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=1400000,RESOLUTION=854x480\n\
/abs/480p/index.m3u8\n";

    #[test]
    fn master_detection() {
        assert!(is_master_playlist(MASTER));
        assert!(!is_master_playlist("#EXTM3U\n#EXTINF:4,\nseg-1.ts\n"));
    }

    #[test]
    fn variants_parsed_with_attributes() {
        let v = parse_variants(MASTER, &base());
        assert_eq!(v.len(), 3);
        assert_eq!(v[0].bandwidth, 800_000);
        assert_eq!(v[0].resolution.as_deref(), Some("640x360"));
        assert_eq!(v[0].url, "https://cdn.example.com/vod/show/360p/index.m3u8");
        assert_eq!(v[2].url, "https://cdn.example.com/abs/480p/index.m3u8");
    }

    #[test]
    fn best_is_max_bandwidth() {
        let v = parse_variants(MASTER, &base());
        let best = select_best(&v).unwrap();
        assert_eq!(best.bandwidth, 2_500_000);
        assert_eq!(best.url, "https://cdn.example.com/vod/show/720p/index.m3u8");
    }

    #[test]
    fn tie_keeps_first() {
        let body = "#EXT-X-STREAM-INF:BANDWIDTH=1000\na.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nb.m3u8\n";
        let v = parse_variants(body, &base());
        assert_eq!(select_best(&v).unwrap().url, "https://cdn.example.com/vod/show/a.m3u8");
    }

    #[test]
    fn bare_nested_manifest_line() {
        let body = "#EXTM3U\nhttps://edge.example.org/real/index.m3u8\n";
        let v = parse_variants(body, &base());
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].bandwidth, 0);
        assert_eq!(v[0].url, "https://edge.example.org/real/index.m3u8");
    }

    #[test]
    fn empty_variant_list_has_no_best() {
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn localize_segments_and_key() {
        let body = "#EXTM3U\n\
#EXT-X-TARGETDURATION:4\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"/keys/k1.key?t=9\",IV=0x01\n\
#EXTINF:4.0,\n\
seg-000.ts?token=a\n\
#EXTINF:4.0,\n\
https://other.example.net/x/seg-001.ts\n\
#EXT-X-ENDLIST\n";
        let loc = localize(body, &base());
        let urls: Vec<&str> = loc.resources.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example.com/keys/k1.key?t=9",
                "https://cdn.example.com/vod/show/seg-000.ts?token=a",
                "https://other.example.net/x/seg-001.ts",
            ]
        );
        let names: Vec<&str> = loc.resources.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["k1.key", "seg-000.ts", "seg-001.ts"]);
        assert!(loc.text.contains("#EXT-X-KEY:METHOD=AES-128,URI=\"k1.key\",IV=0x01\n"));
        assert!(loc.text.contains("\nseg-000.ts\n"));
        assert!(loc.text.contains("\nseg-001.ts\n"));
        assert!(loc.text.contains("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn localize_fmp4_init_section() {
        let body = "#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:4,\nchunk-1.m4s\n";
        let loc = localize(body, &base());
        assert_eq!(loc.resources.len(), 2);
        assert_eq!(loc.resources[0].file_name, "init.mp4");
        assert_eq!(loc.resources[1].file_name, "chunk-1.m4s");
        assert!(loc.text.contains("#EXT-X-MAP:URI=\"init.mp4\""));
    }

    #[test]
    fn repeated_key_listed_once() {
        let body = "#EXT-X-KEY:METHOD=AES-128,URI=\"k.key\"\nseg1.ts\n#EXT-X-KEY:METHOD=AES-128,URI=\"k.key\"\nseg2.ts\n";
        let loc = localize(body, &base());
        assert_eq!(loc.resources.len(), 3);
    }

    #[test]
    fn unknown_lines_pass_through() {
        let body = "#EXTM3U\n#EXT-X-KEY:METHOD=NONE\nnotes.txt\n";
        let loc = localize(body, &base());
        assert!(loc.resources.is_empty());
        assert_eq!(loc.text, body);
    }
}
