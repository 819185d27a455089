use clap::Parser;
use config::Config;
use serde::de::Deserializer;
use serde::Deserialize;
use tracing::{error, info, warn};
use tvrelay::{create_app, fetcher, relay, xtream, XtreamAccount};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

#[derive(Debug, Deserialize)]
struct Settings {
    server: ServerConfig,
    #[serde(default)]
    sources: SourcesConfig,
    xtream: Option<XtreamAccount>,
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    host: String,
    port: u16,
}

#[derive(Debug, Default, Deserialize)]
struct SourcesConfig {
    #[serde(
        default,
        alias = "playlist_url",
        deserialize_with = "deserialize_one_or_many"
    )]
    playlist_urls: Vec<String>,
}

fn deserialize_one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let settings = Config::builder()
        .add_source(config::File::with_name(&args.config))
        .build()?;
    let settings: Settings = settings.try_deserialize()?;

    info!("Configuration loaded from {}", args.config);

    let mut source_urls = settings.sources.playlist_urls.clone();
    if let Some(account) = &settings.xtream {
        source_urls.push(xtream::playlist_url(
            &account.portal,
            &account.username,
            &account.password,
        ));
    }

    let client = relay::playlist_client();
    let outcome =
        fetcher::fetch_and_merge_playlists(&client, &source_urls, relay::PLAYLIST_TIMEOUT).await;
    if outcome.failed_count > 0 {
        warn!(
            "{} of {} playlist sources failed",
            outcome.failed_count,
            source_urls.len()
        );
    }
    if outcome.channels.is_empty() {
        error!("No channels loaded from any playlist source");
    }
    info!("Total loaded channels: {}", outcome.channels.len());

    let app = create_app(outcome.channels, settings.xtream);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
