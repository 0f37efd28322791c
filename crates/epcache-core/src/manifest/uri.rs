//! URI resolution against a manifest's location.

use url::Url;

/// Resolves a manifest URI line against the manifest URL.
///
/// - has a scheme → used as is
/// - starts with `/` → joined onto the manifest's origin
/// - otherwise → relative to the manifest's directory
pub fn resolve_uri(base: &Url, uri: &str) -> Option<String> {
    base.join(uri.trim()).ok().map(String::from)
}

/// True when the URL points at a playlist rather than a media file.
pub fn is_manifest_url(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url.to_ascii_lowercase(),
    };
    path.contains(".m3u8")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/hls/show/ep1/index.m3u8?token=t").unwrap()
    }

    #[test]
    fn absolute_uri_unchanged() {
        assert_eq!(
            resolve_uri(&base(), "https://other.example.net/x/seg-1.ts").as_deref(),
            Some("https://other.example.net/x/seg-1.ts")
        );
    }

    #[test]
    fn root_relative_uses_origin() {
        assert_eq!(
            resolve_uri(&base(), "/media/seg-1.ts").as_deref(),
            Some("https://cdn.example.com/media/seg-1.ts")
        );
    }

    #[test]
    fn relative_uses_manifest_directory() {
        assert_eq!(
            resolve_uri(&base(), "seg-1.ts").as_deref(),
            Some("https://cdn.example.com/hls/show/ep1/seg-1.ts")
        );
        assert_eq!(
            resolve_uri(&base(), "720p/index.m3u8").as_deref(),
            Some("https://cdn.example.com/hls/show/ep1/720p/index.m3u8")
        );
    }

    #[test]
    fn manifest_detection_by_path() {
        assert!(is_manifest_url("https://x.io/a/index.m3u8"));
        assert!(is_manifest_url("https://x.io/a/INDEX.M3U8?sig=1"));
        assert!(!is_manifest_url("https://x.io/a/ep1.mp4"));
        assert!(!is_manifest_url("https://x.io/a/ep1.mp4?next=index.m3u8"));
    }
}
