use std::collections::HashMap;

use chrono::NaiveDateTime;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Programme {
    pub title: String,
    /// Raw XMLTV timestamp, e.g. `20250220120000 +0000`. Kept as text so the
    /// per-channel ordering can use lexical comparison (the format is
    /// fixed-width zero-padded).
    pub start: String,
    pub stop: String,
}

/// Programmes keyed by the EPG source's opaque channel key (often the
/// Xtream stream id, not necessarily a playable channel id).
pub type EpgByChannel = HashMap<String, Vec<Programme>>;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct NowNext {
    pub now: Option<Programme>,
    pub next: Option<Programme>,
}

fn get_attribute(e: &quick_xml::events::BytesStart, name: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == name {
            return attr
                .unescape_value()
                .ok()
                .map(|v| v.trim().to_string());
        }
    }
    None
}

/// Parse an XMLTV document into per-channel programme lists, sorted
/// ascending by raw start time. Malformed XML yields an empty mapping;
/// programmes missing a channel key or start time are dropped.
pub fn parse_xmltv(xml: &str) -> EpgByChannel {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut by_channel: EpgByChannel = HashMap::new();
    let mut current: Option<(String, String, String)> = None;
    let mut title = String::new();
    let mut in_title = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"programme" => {
                current = Some((
                    get_attribute(e, b"channel").unwrap_or_default(),
                    get_attribute(e, b"start").unwrap_or_default(),
                    get_attribute(e, b"stop").unwrap_or_default(),
                ));
                title.clear();
                in_title = false;
            }
            // Self-closing programme: no children, so no title, but still a
            // valid record when it carries a channel key and start time.
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"programme" => {
                let channel = get_attribute(e, b"channel").unwrap_or_default();
                let start = get_attribute(e, b"start").unwrap_or_default();
                if !channel.is_empty() && !start.is_empty() {
                    by_channel.entry(channel).or_default().push(Programme {
                        title: String::new(),
                        start,
                        stop: get_attribute(e, b"stop").unwrap_or_default(),
                    });
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"title" && current.is_some() => {
                in_title = true;
            }
            Ok(Event::Text(e)) if in_title => {
                if let Ok(text) = e.unescape() {
                    title.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"title" => {
                in_title = false;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"programme" => {
                if let Some((channel, start, stop)) = current.take() {
                    if !channel.is_empty() && !start.is_empty() {
                        by_channel.entry(channel).or_default().push(Programme {
                            title: title.trim().to_string(),
                            start,
                            stop,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("XMLTV parse error, returning empty guide: {}", e);
                return EpgByChannel::new();
            }
        }
    }

    for programmes in by_channel.values_mut() {
        programmes.sort_by(|a, b| a.start.cmp(&b.start));
    }
    by_channel
}

/// Interpret the first 14 digits of an XMLTV timestamp as `YYYYMMDDHHMMSS`
/// and return epoch millis. Anything shorter parses to 0 ("unknown").
pub fn parse_xmltv_time(raw: &str) -> i64 {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).take(14).collect();
    if digits.len() < 14 {
        return 0;
    }
    match NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M%S") {
        Ok(dt) => dt.and_utc().timestamp_millis(),
        Err(_) => 0,
    }
}

/// Convert a wall-clock instant to the same naive-millis convention
/// `parse_xmltv_time` uses, so `[start, stop)` comparisons line up.
pub fn now_millis() -> i64 {
    chrono::Local::now().naive_local().and_utc().timestamp_millis()
}

/// Find the programme airing at `now_ms` and the first one after it.
///
/// A programme with no stop time is assumed to run for one hour. The single
/// forward pass stops as soon as "next" is found; if it never is, a fallback
/// scan picks the first programme starting strictly after `now_ms`.
pub fn get_now_and_next(programmes: &[Programme], now_ms: i64) -> NowNext {
    let mut result = NowNext::default();
    for p in programmes {
        let start = parse_xmltv_time(&p.start);
        let stop = if p.stop.is_empty() {
            start + 3_600_000
        } else {
            parse_xmltv_time(&p.stop)
        };
        if now_ms >= start && now_ms < stop {
            result.now = Some(p.clone());
        }
        if now_ms < start && result.next.is_none() {
            result.next = Some(p.clone());
            break;
        }
    }
    if result.next.is_none() {
        result.next = programmes
            .iter()
            .find(|p| parse_xmltv_time(&p.start) > now_ms)
            .cloned();
    }
    result
}

/// Fetch and parse the Xtream portal's XMLTV guide. Absent credentials or
/// any fetch/parse failure yields an empty guide; EPG is best-effort.
pub async fn fetch_epg(
    client: &reqwest::Client,
    portal: &str,
    username: &str,
    password: &str,
) -> EpgByChannel {
    if portal.trim().is_empty() || username.is_empty() || password.is_empty() {
        return EpgByChannel::new();
    }
    let url = crate::xtream::epg_url(portal, username, password);
    let resp = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("EPG fetch failed: url={} err={}", url, e);
            return EpgByChannel::new();
        }
    };
    if !resp.status().is_success() {
        warn!("EPG fetch failed: url={} status={}", url, resp.status());
        return EpgByChannel::new();
    }
    match resp.text().await {
        Ok(text) => parse_xmltv(&text),
        Err(e) => {
            warn!("EPG body read failed: url={} err={}", url, e);
            EpgByChannel::new()
        }
    }
}
