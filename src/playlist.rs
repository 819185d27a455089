use std::collections::HashSet;

use regex::Regex;
use url::Url;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub logo: String,
    pub stream_url: String,
    pub category: String,
    pub country: String,
    pub is_live: bool,
}

/// Lower-case, collapse whitespace runs to a single hyphen, and replace
/// anything outside `[a-z0-9-]` with a hyphen.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_hyphen = false;
    for c in value.to_lowercase().chars() {
        if c.is_whitespace() {
            pending_hyphen = true;
            continue;
        }
        if pending_hyphen {
            out.push('-');
            pending_hyphen = false;
        }
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            out.push(c);
        } else {
            out.push('-');
        }
    }
    // A trailing whitespace run still becomes a hyphen.
    if pending_hyphen {
        out.push('-');
    }
    out
}

struct ExtinfMatchers {
    logo: Regex,
    group: Regex,
    tvg_id: Regex,
    country: Regex,
    qatar: Regex,
    arabic: Regex,
    tunisia: Regex,
}

impl ExtinfMatchers {
    fn new() -> Self {
        // The country hints mirror what upstream playlists actually contain,
        // including Arabic-script channel names.
        Self {
            logo: Regex::new(r#"tvg-logo="([^"]+)""#).unwrap(),
            group: Regex::new(r#"group-title="([^"]+)""#).unwrap(),
            tvg_id: Regex::new(r#"tvg-id="([^"]+)""#).unwrap(),
            country: Regex::new(r#"tvg-country="([^"]+)""#).unwrap(),
            qatar: Regex::new(r"(?i)qatar|al\s*jazeera|الجزيرة|^qa\b").unwrap(),
            arabic: Regex::new(r"(?i)arabic|arab|عربي|العربية|beoutq|bein\s*sports").unwrap(),
            tunisia: Regex::new(
                r"(?i)tunisia|tunisie|tunisian|^tn\b|الوطني|التونسية|تونس|nat\s*1|el\s*watania",
            )
            .unwrap(),
        }
    }

    fn capture<'a>(&self, re: &Regex, line: &'a str) -> Option<&'a str> {
        re.captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

struct PendingChannel {
    name: Option<String>,
    id: String,
    logo: Option<String>,
    category: Option<String>,
    country: String,
}

fn parse_extinf(line: &str, matchers: &ExtinfMatchers) -> PendingChannel {
    let name = line
        .rfind(',')
        .map(|pos| line[pos + 1..].trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let logo = matchers.capture(&matchers.logo, line).map(str::to_string);
    let group = matchers.capture(&matchers.group, line);

    let id = match matchers.capture(&matchers.tvg_id, line) {
        Some(tvg_id) => slugify(tvg_id),
        None => slugify(name.as_deref().unwrap_or("")),
    };

    let country = match matchers.capture(&matchers.country, line) {
        Some(c) => c.to_uppercase().chars().take(2).collect(),
        None => {
            // Heuristic tagging over category+name; check order matters.
            let combined = format!(
                "{} {}",
                group.unwrap_or("").to_lowercase(),
                name.as_deref().unwrap_or("").to_lowercase()
            );
            if matchers.qatar.is_match(&combined) {
                "QA".to_string()
            } else if matchers.arabic.is_match(&combined) {
                "AR".to_string()
            } else if matchers.tunisia.is_match(&combined) {
                "TN".to_string()
            } else {
                "UN".to_string()
            }
        }
    };

    PendingChannel {
        name,
        id,
        logo,
        category: group.map(str::to_string),
        country,
    }
}

fn resolve_stream_url(line: &str, base_url: Option<&str>) -> String {
    if line.starts_with("http://") || line.starts_with("https://") {
        return line.to_string();
    }
    if let Some(base) = base_url {
        if let Ok(resolved) = Url::parse(base).and_then(|b| b.join(line)) {
            return resolved.to_string();
        }
    }
    // Keep the literal text when resolution fails; one bad line must not
    // fail the whole parse.
    line.to_string()
}

/// Parse an extended-M3U playlist into channel records.
///
/// Malformed lines are skipped, never fatal: upstream playlists are
/// frequently non-conformant. An `#EXTINF` entry without a following URL
/// line is dropped. Relative stream URLs are resolved against `base_url`
/// when one is supplied.
pub fn parse_playlist(content: &str, base_url: Option<&str>) -> Vec<Channel> {
    let matchers = ExtinfMatchers::new();
    let mut channels = Vec::new();
    let mut pending: Option<PendingChannel> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.starts_with("#EXTINF:") {
            // A new metadata line discards any unfinished previous entry.
            pending = Some(parse_extinf(line, &matchers));
        } else if !line.is_empty() && !line.starts_with('#') {
            if let Some(p) = pending.take() {
                let Some(name) = p.name else { continue };
                let stream_url = resolve_stream_url(line, base_url);
                let logo = p.logo.unwrap_or_else(|| {
                    format!(
                        "https://api.dicebear.com/7.x/identicon/svg?seed={}",
                        urlencoding::encode(&p.id)
                    )
                });
                channels.push(Channel {
                    id: p.id,
                    name,
                    logo,
                    stream_url,
                    category: p.category.unwrap_or_else(|| "General".to_string()),
                    country: p.country,
                    is_live: true,
                });
            }
        }
    }

    channels
}

/// Append a batch of channels to a merged directory, suffixing colliding ids
/// with `-1`, `-2`, ... until unique. First-seen ordering is preserved.
pub fn merge_channels(merged: &mut Vec<Channel>, seen: &mut HashSet<String>, batch: Vec<Channel>) {
    for mut channel in batch {
        let base = channel.id.clone();
        let mut n = 0;
        while seen.contains(&channel.id) {
            n += 1;
            channel.id = format!("{base}-{n}");
        }
        seen.insert(channel.id.clone());
        merged.push(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_playlist() {
        let data = r#"#EXTM3U
#EXTINF:-1 tvg-id="alkass.one" tvg-logo="https://i.imgur.com/10mmlha.png" group-title="Sports",Alkass One
https://liveeu-gcp.alkassdigital.net/alkass1-p/main.m3u8
#EXTINF:-1 group-title="Tunisia",Tunisia Nat 1
http://portal.example:8080/live/u/p/277964.ts"#;

        let channels = parse_playlist(data, None);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "alkass-one");
        assert_eq!(channels[0].name, "Alkass One");
        assert_eq!(channels[0].logo, "https://i.imgur.com/10mmlha.png");
        assert_eq!(channels[0].category, "Sports");
        assert!(channels[0].is_live);
        assert_eq!(channels[1].id, "tunisia-nat-1");
        assert_eq!(channels[1].category, "Tunisia");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Sports  1"), "sports-1");
        assert_eq!(slugify("ATTESSIA TV (2)"), "attessia-tv--2-");
        // Leading/trailing whitespace runs map to hyphens, not nothing.
        assert_eq!(slugify(" X "), "-x-");
    }

    #[test]
    fn test_entry_without_url_is_dropped() {
        let data = r#"#EXTM3U
#EXTINF:-1,Orphan Channel
#EXTINF:-1,Real Channel
http://host/stream.ts"#;

        let channels = parse_playlist(data, None);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "Real Channel");
    }

    #[test]
    fn test_comment_lines_do_not_complete_an_entry() {
        let data = "#EXTINF:-1,Chan\n#EXTVLCOPT:network-caching=1000\nhttp://host/a.ts\n";
        let channels = parse_playlist(data, None);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].stream_url, "http://host/a.ts");
    }

    #[test]
    fn test_relative_url_resolution() {
        let data = "#EXTINF:-1,Chan\nchan1/index.m3u8\n";
        let channels = parse_playlist(data, Some("http://host/path/"));
        assert_eq!(channels[0].stream_url, "http://host/path/chan1/index.m3u8");

        // Unresolvable relative URL keeps its literal text.
        let channels = parse_playlist(data, Some("not a url"));
        assert_eq!(channels[0].stream_url, "chan1/index.m3u8");
    }

    #[test]
    fn test_country_heuristics() {
        let data = r#"#EXTINF:-1 group-title="Sports",Al Jazeera Sports
http://host/1.ts
#EXTINF:-1,Tunisia Nat 1
http://host/2.ts
#EXTINF:-1,Weather 24
http://host/3.ts
#EXTINF:-1 tvg-country="fra",France Info
http://host/4.ts"#;

        let channels = parse_playlist(data, None);
        assert_eq!(channels[0].country, "QA");
        assert_eq!(channels[1].country, "TN");
        assert_eq!(channels[2].country, "UN");
        assert_eq!(channels[3].country, "FR");
    }

    #[test]
    fn test_defaults_for_missing_logo_and_category() {
        let channels = parse_playlist("#EXTINF:-1,Bare\nhttp://host/x.ts\n", None);
        assert_eq!(channels[0].category, "General");
        assert!(channels[0].logo.contains("seed=bare"));
    }

    #[test]
    fn test_merge_suffixes_colliding_ids() {
        let first = parse_playlist("#EXTINF:-1,Sports 1\nhttp://a/1.ts\n", None);
        let second = parse_playlist("#EXTINF:-1,Sports 1\nhttp://b/1.ts\n", None);

        let mut merged = Vec::new();
        let mut seen = HashSet::new();
        merge_channels(&mut merged, &mut seen, first);
        merge_channels(&mut merged, &mut seen, second);

        assert_eq!(merged[0].id, "sports-1");
        assert_eq!(merged[1].id, "sports-1-1");
        assert_eq!(merged[1].stream_url, "http://b/1.ts");
    }
}
