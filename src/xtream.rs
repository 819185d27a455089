//! URL builders for Xtream-Codes style portals (`get.php` playlists,
//! `xmltv.php` EPG, `live/<user>/<pass>/<id>.ts` streams).

/// Well-known Xtream default streaming port and the alternate service port
/// that actually serves `get.php` on most deployments.
const STREAMING_PORT: &str = ":8000";
const SERVICE_PORT: &str = ":8080";

/// Build the `get.php` M3U playlist URL, substituting the alternate service
/// port for the default streaming port when present.
pub fn playlist_url(portal: &str, username: &str, password: &str) -> String {
    let base = portal.trim().trim_end_matches('/');
    let base = base.replace(STREAMING_PORT, SERVICE_PORT);
    format!(
        "{}/get.php?username={}&password={}&type=m3u_plus",
        base,
        urlencoding::encode(username),
        urlencoding::encode(password)
    )
}

/// Build a live stream URL the way XCIPTV-style clients do:
/// `portal/live/username/password/stream_id.ts`.
pub fn stream_url(portal: &str, username: &str, password: &str, stream_id: &str) -> String {
    let base = portal.trim().trim_end_matches('/');
    format!(
        "{}/live/{}/{}/{}.ts",
        base,
        urlencoding::encode(username),
        urlencoding::encode(password),
        stream_id
    )
}

/// Build the `xmltv.php` EPG URL.
pub fn epg_url(portal: &str, username: &str, password: &str) -> String {
    let base = portal.trim().trim_end_matches('/');
    format!(
        "{}/xmltv.php?username={}&password={}",
        base,
        urlencoding::encode(username),
        urlencoding::encode(password)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_url_substitutes_service_port() {
        let url = playlist_url("http://portal.example:8000/", "user", "p&ss");
        assert_eq!(
            url,
            "http://portal.example:8080/get.php?username=user&password=p%26ss&type=m3u_plus"
        );
    }

    #[test]
    fn test_playlist_url_keeps_other_ports() {
        let url = playlist_url("http://portal.example:25461", "u", "p");
        assert!(url.starts_with("http://portal.example:25461/get.php?"));
    }

    #[test]
    fn test_stream_url() {
        assert_eq!(
            stream_url("http://portal.example:8000", "u", "p", "277964"),
            "http://portal.example:8000/live/u/p/277964.ts"
        );
    }

    #[test]
    fn test_epg_url() {
        assert_eq!(
            epg_url("http://portal.example:8000///", "u", "p"),
            "http://portal.example:8000/xmltv.php?username=u&password=p"
        );
    }
}
