use anyhow::{Context, Result};
use capture_guard::clob::ClobExchange;
use capture_guard::config::Config;
use capture_guard::engine::{self, Engine, TickReport};
use capture_guard::exchange::{Exchange, PaperExchange};
use capture_guard::market;
use capture_guard::telemetry::{JsonlTelemetry, SharedTelemetry, TracingTelemetry};
use capture_guard::types::{ResolvedMarket, Side, WindowId};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const MARKET_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("capture_guard=info")),
        )
        .init();

    let config = Config::from_env().context("load configuration")?;
    let asset = std::env::var("ASSET").unwrap_or_else(|_| "btc".to_string());
    info!(?config, %asset, "loaded configuration");

    let http = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("build HTTP client")?;

    let session_log = if config.session_log_enabled {
        let sink = JsonlTelemetry::new(now_ms(), &config.session_log_dir)?;
        info!(path = %sink.path().display(), "session log enabled");
        Some(Arc::new(sink))
    } else {
        None
    };
    let telemetry: SharedTelemetry = match &session_log {
        Some(sink) => sink.clone(),
        None => Arc::new(TracingTelemetry),
    };

    let paper = config.dry_run.then(|| {
        Arc::new(PaperExchange::with_public_feed(
            http.clone(),
            &config.clob_host,
            &config.gamma_base_url,
        ))
    });
    let exchange: Arc<dyn Exchange> = match &paper {
        Some(p) => p.clone(),
        None => Arc::new(
            ClobExchange::from_env(&config.clob_host, &config.data_api_url, &config.gamma_base_url)
                .context("live CLOB client")?,
        ),
    };
    info!(dry_run = config.dry_run, "capture guard started");

    let mut engine = Engine::new(config.clone(), exchange.clone(), telemetry);
    let mut captured: Option<WindowId> = None;

    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            _ = interval.tick() => {}
        }

        let now = now_ms();
        let slug = market::active_window_slug(&asset, now / 1000);
        if engine.window_id().map(WindowId::as_str) != Some(slug.as_str()) {
            match lookup_market(&http, &config.gamma_base_url, &slug).await {
                Ok(m) => engine.start_window(m),
                Err(e) => {
                    warn!(%slug, error = %e, "market lookup failed");
                    if engine.market().map_or(false, |m| now / 1000 >= m.close_time_unix) {
                        engine.end_window();
                    }
                    continue;
                }
            }
        }

        let report = engine.tick(now).await;
        let Some(window_id) = report.window.clone() else {
            continue;
        };
        if captured.as_ref() == Some(&window_id) {
            continue;
        }
        let opened = match &paper {
            Some(paper) => paper_capture(&mut engine, paper, &report, &window_id, now),
            None => adopt_live_position(&mut engine, exchange.as_ref(), &window_id, now).await,
        };
        if opened {
            captured = Some(window_id);
        }
    }

    let drained = engine.shutdown(SHUTDOWN_DRAIN).await;
    drop(engine);
    if let Some(sink) = session_log {
        match Arc::try_unwrap(sink) {
            Ok(sink) => sink.close().await,
            Err(_) => warn!(drained, "session log still shared; summary skipped"),
        }
    }
    Ok(())
}

async fn lookup_market(http: &Client, gamma_base_url: &str, slug: &str) -> Result<ResolvedMarket> {
    tokio::time::timeout(
        MARKET_LOOKUP_TIMEOUT,
        market::fetch_market_by_slug(http, gamma_base_url, slug),
    )
    .await
    .context("market lookup timed out")?
}

/// Dry run: simulate the capture fill when a side's ask is inside the configured band.
fn paper_capture(
    engine: &mut Engine,
    paper: &PaperExchange,
    report: &TickReport,
    window_id: &WindowId,
    now: u64,
) -> bool {
    let cfg = engine.config();
    if report.remaining_secs <= cfg.ladder.safety_final_secs {
        return false;
    }
    let Some(book) = report.book.as_ref() else {
        return false;
    };
    let Some((side, ask)) =
        engine::capture_candidate(book, cfg.paper_capture_min, cfg.paper_capture_max)
    else {
        return false;
    };
    let shares = cfg.paper_capture_shares;
    paper.credit(side, shares);
    match engine.on_fill(window_id, side, shares, shares, ask, now) {
        Ok(trusted) => {
            info!(window = %window_id, side = side.as_str(), %ask, %trusted, "paper capture filled");
            true
        }
        Err(e) => {
            warn!(window = %window_id, error = %e, "paper capture rejected");
            false
        }
    }
}

/// Live: the entry component is external, so adopt whatever position the account holds
/// in the live window as the fill confirmation.
async fn adopt_live_position(
    engine: &mut Engine,
    exchange: &dyn Exchange,
    window_id: &WindowId,
    now: u64,
) -> bool {
    let Some(market) = engine.market().cloned() else {
        return false;
    };
    let min = engine.config().venue.min_sell_size;
    let timeout = engine.config().read_timeout;
    let report = match tokio::time::timeout(timeout, exchange.positions(&market)).await {
        Ok(Ok(report)) => report,
        _ => return false,
    };
    let held = [Side::Up, Side::Down]
        .into_iter()
        .map(|side| (side, report.side(side)))
        .find(|(_, p)| p.size >= min && p.avg_price.is_some());
    let Some((side, position)) = held else {
        return false;
    };
    let entry = position.avg_price.unwrap_or_default();
    match engine.on_fill(window_id, side, position.size, position.size, entry, now) {
        Ok(trusted) => {
            info!(window = %window_id, side = side.as_str(), %entry, %trusted, "adopted live position");
            true
        }
        Err(e) => {
            warn!(window = %window_id, error = %e, "could not adopt live position");
            false
        }
    }
}
