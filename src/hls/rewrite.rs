//! Line-level HLS playlist rewriting.
//!
//! The playlist is never parsed into a tree and re-serialized: tag lines and
//! comments must come out byte-for-byte identical, so the rewriter walks the
//! raw bytes line by line and only replaces bare URI lines. Line terminators
//! (`\n`, `\r\n`, or none on the final line) are carried over untouched.
//!
//! Only URI lines have to be UTF-8. Tag lines in another encoding (Latin-1
//! titles are common) are copied as they came.

use tracing::debug;
use url::Url;

/// MIME type served for every rewritten playlist.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Path of the media proxy endpoint that rewritten references point back at.
pub const PROXY_PATH: &str = "/proxy/m3u8";

/// File extensions that mark a URI line as a proxied reference.
///
/// `.ts` is the classic MPEG-TS segment; the rest cover fMP4/CMAF segments,
/// audio renditions, subtitles, keys and nested playlists.
const REFERENCE_EXTENSIONS: &[&str] = &[
    "ts", "m3u8", "m4s", "mp4", "m4a", "m4v", "aac", "mp3", "vtt", "webvtt", "key", "cmfv",
    "cmfa",
];

/// Whether a playlist lists variant streams or media segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Master,
    Media,
}

impl PlaylistKind {
    pub fn detect(body: &[u8]) -> Self {
        if m3u8_rs::is_master_playlist(body) {
            PlaylistKind::Master
        } else {
            PlaylistKind::Media
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaylistKind::Master => "master",
            PlaylistKind::Media => "media",
        }
    }
}

/// Result of rewriting one playlist document.
#[derive(Debug, Clone)]
pub struct RewrittenPlaylist {
    pub body: Vec<u8>,
    pub kind: PlaylistKind,
    /// Number of URI lines replaced with proxy references
    pub rewritten: usize,
}

/// Decide whether an upstream response is an HLS playlist.
///
/// Matches any `*mpegurl` MIME type (Apple, `audio/`, `x-` variants) or a
/// target path ending in `.m3u8`.
pub fn is_playlist(content_type: Option<&str>, target: &Url) -> bool {
    let by_mime = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("mpegurl"))
        .unwrap_or(false);

    by_mime || target.path().to_ascii_lowercase().ends_with(".m3u8")
}

/// Build the self-referencing proxy URL for an absolute target.
pub fn proxy_url(base_url: &str, target: &str) -> String {
    format!(
        "{}{}?url={}",
        base_url.trim_end_matches('/'),
        PROXY_PATH,
        urlencoding::encode(target)
    )
}

/// Rewrite every reference line of `body` so it routes back through the proxy.
///
/// References are resolved against `manifest_url` (the playlist's own
/// location), never against the proxy's URL.
pub fn rewrite_playlist(body: &[u8], manifest_url: &Url, base_url: &str) -> RewrittenPlaylist {
    let kind = PlaylistKind::detect(body);
    let mut out = Vec::with_capacity(body.len() + body.len() / 2);
    let mut rewritten = 0;

    for raw in body.split_inclusive(|b| *b == b'\n') {
        let (line, terminator) = split_terminator(raw);

        let target = std::str::from_utf8(line)
            .ok()
            .and_then(|text| reference_target(text, manifest_url).map(|t| (text, t)));
        match target {
            Some((text, target)) => {
                debug!("Rewriting playlist reference {} -> {}", text.trim(), target);
                out.extend_from_slice(proxy_url(base_url, target.as_str()).as_bytes());
                rewritten += 1;
            }
            None => out.extend_from_slice(line),
        }
        out.extend_from_slice(terminator);
    }

    RewrittenPlaylist {
        body: out,
        kind,
        rewritten,
    }
}

fn split_terminator(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(line) = raw.strip_suffix(b"\r\n") {
        (line, b"\r\n")
    } else if let Some(line) = raw.strip_suffix(b"\n") {
        (line, b"\n")
    } else {
        (raw, b"")
    }
}

/// Resolve a playlist line to the absolute URL it references, if it is a
/// proxied reference at all.
fn reference_target(line: &str, manifest_url: &Url) -> Option<Url> {
    let candidate = line.trim();
    if candidate.is_empty() || candidate.starts_with('#') {
        return None;
    }

    let resolved = manifest_url.join(candidate).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }

    // Already routed through a proxy endpoint
    if resolved.path().ends_with(PROXY_PATH) && resolved.query_pairs().any(|(k, _)| k == "url") {
        return None;
    }

    has_reference_extension(resolved.path()).then_some(resolved)
}

fn has_reference_extension(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            REFERENCE_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}
