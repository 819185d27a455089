//! Pure relay helpers: upstream client construction, manifest
//! classification and absolute-URL rewriting.

use std::time::Duration;

use regex::Regex;

/// Impersonate a common media player; several IPTV portals refuse or
/// throttle unknown user agents.
pub const MEDIA_PLAYER_USER_AGENT: &str = "VLC/3.0.18 LibVLC/3.0.18";

/// Bounded timeout for playlist/manifest fetches. Live stream connections
/// get no overall timeout; they stay open for the lifetime of the stream.
pub const PLAYLIST_TIMEOUT: Duration = Duration::from_secs(15);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Whether an upstream response is a nested HLS manifest that needs URL
/// rewriting, as opposed to opaque media bytes to stream through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    Manifest,
    Media,
}

pub fn classify(content_type: Option<&str>, target_url: &str) -> UpstreamKind {
    if content_type
        .map(str::to_ascii_lowercase)
        .is_some_and(|ct| ct.contains("mpegurl"))
    {
        return UpstreamKind::Manifest;
    }
    let path = target_url
        .split(['?', '#'])
        .next()
        .unwrap_or(target_url)
        .to_ascii_lowercase();
    if path.ends_with(".m3u8") {
        UpstreamKind::Manifest
    } else {
        UpstreamKind::Media
    }
}

/// Rewrite every bare absolute `http(s)://` URL in a manifest body to route
/// back through the relay endpoint at `relay_path`.
///
/// The match is intentionally lenient (any absolute URL up to the next
/// whitespace) rather than a strict manifest grammar; manifest dialects
/// vary and unknown tags must still get their URLs relayed.
pub fn rewrite_manifest(body: &str, relay_path: &str) -> String {
    let re = Regex::new(r"https?://\S+").unwrap();
    re.replace_all(body, |caps: &regex::Captures| {
        format!("{}?url={}", relay_path, urlencoding::encode(&caps[0]))
    })
    .into_owned()
}

/// Client for playlist-mode fetches: bounded timeout, lenient TLS (IPTV
/// portals frequently run on self-signed or expired certificates).
pub fn playlist_client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(PLAYLIST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Client for stream-mode fetches: timeout only on connection establishment,
/// none once bytes are flowing (live streams have natural gaps).
pub fn stream_client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_content_type() {
        assert_eq!(
            classify(Some("application/vnd.apple.mpegurl"), "http://h/x"),
            UpstreamKind::Manifest
        );
        assert_eq!(
            classify(Some("audio/MPEGURL"), "http://h/x"),
            UpstreamKind::Manifest
        );
        assert_eq!(
            classify(Some("video/mp2t"), "http://h/seg1.ts"),
            UpstreamKind::Media
        );
    }

    #[test]
    fn test_classify_by_url_suffix() {
        assert_eq!(
            classify(None, "http://h/live/chan/index.m3u8?token=abc"),
            UpstreamKind::Manifest
        );
        assert_eq!(classify(None, "http://h/live/chan/seg1.ts"), UpstreamKind::Media);
    }

    #[test]
    fn test_rewrite_manifest() {
        let manifest = "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:10,\nhttp://cdn/seg1.ts\n";
        let rewritten = rewrite_manifest(manifest, "/api/stream");
        assert_eq!(
            rewritten,
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:10,\n/api/stream?url=http%3A%2F%2Fcdn%2Fseg1.ts\n"
        );
    }

    #[test]
    fn test_rewrite_leaves_relative_lines_alone() {
        let manifest = "#EXTM3U\nseg_00001.ts\nhttps://cdn/v/low.m3u8\n";
        let rewritten = rewrite_manifest(manifest, "/api/playlist");
        assert!(rewritten.contains("seg_00001.ts\n"));
        assert!(rewritten.contains("/api/playlist?url=https%3A%2F%2Fcdn%2Fv%2Flow.m3u8"));
    }
}
