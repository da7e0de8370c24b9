use anyhow::Context;
use clap::Parser;
use marketreplay::api::{BybitKlineClient, HistoricalSource, SyntheticSource};
use marketreplay::config::{AppConfig, FeedSource};
use marketreplay::ledger::{JsonLinesSink, LedgerSink, TracingSink};
use marketreplay::session::{SessionFactory, SessionManager};
use marketreplay::transport::codec::BybitCodec;
use marketreplay::transport::{router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "marketreplay")]
#[command(about = "Replay historical candles over a simulated exchange API")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override server.port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override feed.source
    #[arg(long, value_parser = ["bybit", "synthetic"])]
    source: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    match args.source.as_deref() {
        Some("synthetic") => config.feed.source = FeedSource::Synthetic,
        Some("bybit") => config.feed.source = FeedSource::Bybit,
        _ => {}
    }

    setup_logging(&config.logging.level);

    tracing::info!(
        symbol = %config.feed.symbol,
        interval = %config.feed.interval,
        start = config.feed.start_time_ms,
        end = config.feed.end_time_ms,
        source = ?config.feed.source,
        "Market replay starting"
    );

    let interval = config
        .feed
        .kline_interval()
        .map_err(anyhow::Error::msg)?;
    let source = build_source(&config, interval)?;
    let sink = build_sink(&config)?;

    let factory = SessionFactory::new(source, sink, config.feed.window(), config.replay.fee_rate);
    let shutdown = CancellationToken::new();

    let state = AppState {
        sessions: Arc::new(SessionManager::new(factory)),
        codec: Arc::new(BybitCodec::new(
            config.feed.category.clone(),
            config.feed.symbol.clone(),
            interval,
        )),
        replay: config.replay.settings(),
        shutdown: shutdown.clone(),
        exit_on_exhaustion: config.replay.exit_on_exhaustion,
    };
    let app = router(state, &config.paths);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    tracing::info!(
        address = %config.bind_address(),
        kline = %config.paths.kline_ws,
        private = %config.paths.private_ws,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    tracing::info!("Market replay stopped");
    Ok(())
}

fn build_source(
    config: &AppConfig,
    interval: marketreplay::KlineInterval,
) -> anyhow::Result<Arc<dyn HistoricalSource>> {
    let feed = &config.feed;
    let source: Arc<dyn HistoricalSource> = match feed.source {
        FeedSource::Bybit => Arc::new(
            BybitKlineClient::new(&feed.base_url, &feed.category, &feed.symbol, interval)?
                .with_page_limit(feed.page_limit)
                .with_requests_per_second(feed.requests_per_second),
        ),
        FeedSource::Synthetic => Arc::new(SyntheticSource::new(
            feed.seed,
            feed.scenario,
            feed.window(),
            interval.duration_ms(),
            feed.page_limit as usize,
        )),
    };
    Ok(source)
}

fn build_sink(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerSink>> {
    match &config.ledger.path {
        Some(path) if !path.as_os_str().is_empty() => {
            let sink = JsonLinesSink::open(path)
                .with_context(|| format!("Failed to open ledger {}", path.display()))?;
            Ok(Arc::new(sink))
        }
        _ => {
            tracing::warn!("No ledger path configured, orders are only logged");
            Ok(Arc::new(TracingSink))
        }
    }
}

fn setup_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                shutdown.cancelled().await;
            } else {
                tracing::warn!("Received Ctrl+C, shutting down");
            }
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested");
        }
    }
}
