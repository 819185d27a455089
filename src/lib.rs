pub mod epg;
pub mod fetcher;
pub mod playlist;
pub mod relay;
pub mod xtream;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures::TryStreamExt;
use playlist::Channel;
use relay::UpstreamKind;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Xtream portal credentials, loaded once at startup and passed in by the
/// caller. The relay itself stays stateless across requests.
#[derive(Debug, Clone, Deserialize)]
pub struct XtreamAccount {
    pub portal: String,
    pub username: String,
    pub password: String,
}

struct AppState {
    channels: Vec<Channel>,
    xtream: Option<XtreamAccount>,
    playlist_client: reqwest::Client,
    stream_client: reqwest::Client,
}

pub fn create_app(channels: Vec<Channel>, xtream: Option<XtreamAccount>) -> Router {
    let state = Arc::new(AppState {
        channels,
        xtream,
        playlist_client: relay::playlist_client(),
        stream_client: relay::stream_client(),
    });

    Router::new()
        .route("/api/channels", get(channels_api_handler))
        .route("/api/epg", get(epg_handler))
        .route(
            "/api/playlist",
            get(playlist_relay_handler)
                .options(preflight_handler)
                .fallback(method_not_allowed_handler),
        )
        .route(
            "/api/stream",
            get(stream_relay_handler)
                .options(preflight_handler)
                .fallback(method_not_allowed_handler),
        )
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler(method: Method, uri: Uri, headers: HeaderMap) -> impl IntoResponse {
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>");
    info!("HTTP 404: method={} uri={} UA=\"{}\"", method, uri, user_agent);
    Response::builder()
        .status(404)
        .body(Body::from("Not found"))
        .unwrap()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "error": message }).to_string();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Body::from(body))
        .unwrap()
}

/// Only GET (and the OPTIONS preflight) are relayed; everything else gets
/// the same CORS-carrying JSON error shape as the other failures.
async fn method_not_allowed_handler() -> impl IntoResponse {
    json_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

async fn preflight_handler() -> impl IntoResponse {
    Response::builder()
        .status(200)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .header("Access-Control-Allow-Headers", "*")
        .body(Body::empty())
        .unwrap()
}

#[derive(Deserialize)]
struct RelayQuery {
    url: Option<String>,
}

/// The relay only accepts explicit absolute http(s) targets.
fn validate_target(query: &RelayQuery) -> Result<String, Response> {
    match query.url.as_deref().map(str::trim) {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
            Ok(url.to_string())
        }
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "Missing or invalid url parameter",
        )),
    }
}

/// Playlist-mode relay: fetch the target with a bounded timeout while
/// impersonating a media player, rewrite embedded absolute URLs when the
/// body is a manifest, and hand the text back with permissive CORS.
async fn playlist_relay_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelayQuery>,
) -> Response {
    let target = match validate_target(&query) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    info!("Playlist relay request: url={}", target);

    let resp = match state
        .playlist_client
        .get(&target)
        .header("User-Agent", relay::MEDIA_PLAYER_USER_AGENT)
        .header("Accept", "*/*")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!("Playlist relay upstream error: url={} err={}", target, e);
            return json_error(StatusCode::BAD_GATEWAY, &format!("Upstream error: {e}"));
        }
    };

    if !resp.status().is_success() {
        warn!(
            "Playlist relay upstream status: url={} status={}",
            target,
            resp.status()
        );
        return json_error(
            StatusCode::BAD_GATEWAY,
            &format!("Upstream error: {}", resp.status().as_u16()),
        );
    }

    let content_type = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let text = match resp.text().await {
        Ok(t) => t,
        Err(e) => {
            warn!("Playlist relay body read failed: url={} err={}", target, e);
            return json_error(StatusCode::BAD_GATEWAY, &format!("Upstream error: {e}"));
        }
    };

    let body = match relay::classify(content_type.as_deref(), &target) {
        UpstreamKind::Manifest => relay::rewrite_manifest(&text, "/api/playlist"),
        UpstreamKind::Media => text,
    };

    Response::builder()
        .status(200)
        .header("Content-Type", "audio/mpegurl")
        .header("Access-Control-Allow-Origin", "*")
        .header("Cache-Control", "no-store")
        .body(Body::from(body))
        .unwrap()
}

/// Stream-mode relay: manifests are buffered and rewritten so nested
/// segment and variant URLs route back through this endpoint; anything
/// else is forwarded chunk by chunk without buffering, so a slow caller
/// throttles the upstream read rate.
async fn stream_relay_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelayQuery>,
) -> Response {
    let target = match validate_target(&query) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    info!("Stream relay request: url={}", target);

    let resp = match state
        .stream_client
        .get(&target)
        .header("User-Agent", relay::MEDIA_PLAYER_USER_AGENT)
        .header("Accept", "*/*")
        // Discourage upstream compression and chunking surprises that
        // complicate byte-exact relaying.
        .header("Accept-Encoding", "identity")
        .header("Connection", "keep-alive")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!("Stream relay upstream error: url={} err={}", target, e);
            return json_error(StatusCode::BAD_GATEWAY, &format!("Upstream error: {e}"));
        }
    };

    if !resp.status().is_success() {
        warn!(
            "Stream relay upstream status: url={} status={}",
            target,
            resp.status()
        );
        return json_error(
            StatusCode::BAD_GATEWAY,
            &format!("Upstream error: {}", resp.status().as_u16()),
        );
    }

    let content_type = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match relay::classify(content_type.as_deref(), &target) {
        UpstreamKind::Manifest => {
            // Manifests are small; buffer, rewrite, respond.
            let text = match resp.text().await {
                Ok(t) => t,
                Err(e) => {
                    warn!(
                        "Stream relay manifest read failed: url={} err={}",
                        target, e
                    );
                    return json_error(StatusCode::BAD_GATEWAY, &format!("Upstream error: {e}"));
                }
            };
            let rewritten = relay::rewrite_manifest(&text, "/api/stream");
            Response::builder()
                .status(200)
                .header("Content-Type", "application/vnd.apple.mpegurl")
                .header("Access-Control-Allow-Origin", "*")
                .header("Access-Control-Allow-Methods", "GET, OPTIONS")
                .header("Access-Control-Expose-Headers", "*")
                .header("Cache-Control", "no-cache, no-store, must-revalidate")
                .body(Body::from(rewritten))
                .unwrap()
        }
        UpstreamKind::Media => {
            let content_length = resp.content_length();
            // Forward each chunk as it arrives; dropping the body (caller
            // disconnect) drops the upstream connection with it.
            let stream = resp
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

            let mut builder = Response::builder()
                .status(200)
                .header(
                    "Content-Type",
                    content_type.as_deref().unwrap_or("application/octet-stream"),
                )
                .header("Access-Control-Allow-Origin", "*")
                .header("Access-Control-Allow-Methods", "GET, OPTIONS")
                .header("Access-Control-Expose-Headers", "*")
                .header("Cache-Control", "no-cache, no-store, must-revalidate");
            if let Some(len) = content_length {
                builder = builder.header("Content-Length", len.to_string());
            }
            builder.body(Body::from_stream(stream)).unwrap()
        }
    }
}

async fn channels_api_handler(State(state): State<Arc<AppState>>) -> Response {
    let mut resp = Json(state.channels.clone()).into_response();
    resp.headers_mut().insert(
        axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        axum::http::HeaderValue::from_static("*"),
    );
    resp
}

#[derive(Deserialize)]
struct EpgQuery {
    channel: Option<String>,
}

/// Fetch and parse the configured portal's XMLTV guide. With a `channel`
/// key, answer the now/next pair for that key at the current wall clock;
/// without one, answer the full per-channel mapping. No configured portal
/// means no fetch and an empty result.
async fn epg_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EpgQuery>,
) -> Response {
    let guide = match &state.xtream {
        Some(account) => {
            epg::fetch_epg(
                &state.playlist_client,
                &account.portal,
                &account.username,
                &account.password,
            )
            .await
        }
        None => epg::EpgByChannel::new(),
    };

    let mut resp = match query.channel {
        Some(key) => {
            let programmes = guide.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            Json(epg::get_now_and_next(programmes, epg::now_millis())).into_response()
        }
        None => Json(guide).into_response(),
    };
    resp.headers_mut().insert(
        axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        axum::http::HeaderValue::from_static("*"),
    );
    resp
}
