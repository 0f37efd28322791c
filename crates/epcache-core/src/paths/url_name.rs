//! Names derived from URL paths.

/// Last path segment of a URL with query and fragment stripped.
///
/// Falls back to plain string splitting when `url` does not parse, so
/// manifest lines like `seg-1.ts?token=x` still yield `seg-1.ts`.
pub fn url_basename(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let segment = path.split('/').filter(|s| !s.is_empty()).last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}

/// Lower-cased extension of the URL path's last segment, if it has one.
pub fn extension_from_url(url: &str) -> Option<String> {
    let name = url_basename(url)?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
