//! `vitalwatch-monitor` -- headless patient telemetry monitor.
//!
//! Loads an organization's patients from the telemetry backend, keeps
//! simulated patients ticking and live patients polled, and logs a risk
//! summary periodically. Exits on Ctrl-C or when the backend rejects the
//! session.
//!
//! # Environment variables
//!
//! | Variable          | Required | Default | Description                          |
//! |-------------------|----------|---------|--------------------------------------|
//! | `FEED_BASE_URL`   | yes      | --      | Backend base URL, e.g. `http://host:8080` |
//! | `ORG_ID`          | yes      | --      | Organization to monitor              |
//! | `AUTH_TOKEN`      | yes      | --      | Bearer token                         |
//! | `SUMMARY_INTERVAL_SECS` | no | `30`    | Seconds between risk summaries       |
//!
//! Timing and backoff knobs are documented in [`config`](vitalwatch_monitor::config).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitalwatch_core::risk::RiskLevel;
use vitalwatch_monitor::config::{FeedSettings, MonitorConfig};
use vitalwatch_monitor::feed::{SessionListener, TelemetryFeed};
use vitalwatch_monitor::http_feed::HttpTelemetryFeed;
use vitalwatch_monitor::Monitor;

/// Default interval between risk summary log lines.
const DEFAULT_SUMMARY_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vitalwatch_monitor=info,vitalwatch_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = FeedSettings::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid feed settings");
        std::process::exit(1);
    });
    let config = MonitorConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid monitor configuration");
        std::process::exit(1);
    });
    let summary_interval = match std::env::var("SUMMARY_INTERVAL_SECS") {
        Err(_) => Duration::from_secs(DEFAULT_SUMMARY_INTERVAL_SECS),
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                tracing::error!(value = %raw, "SUMMARY_INTERVAL_SECS must be a positive integer");
                std::process::exit(1);
            }
        },
    };

    tracing::info!(
        base_url = %settings.base_url,
        org_id = settings.org_id,
        sim_interval_ms = config.sim_interval.as_millis() as u64,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        poll_concurrency = config.poll_concurrency,
        "Starting vitalwatch-monitor",
    );

    let stop = CancellationToken::new();
    let session_stop = stop.clone();
    let session: Arc<dyn SessionListener> = Arc::new(move || {
        tracing::error!("Session invalidated -- re-authentication required");
        session_stop.cancel();
    });
    let feed: Arc<dyn TelemetryFeed> = Arc::new(HttpTelemetryFeed::new(settings.base_url));

    let monitor = match Monitor::start(config, settings.org_id, settings.auth_token, feed, session)
        .await
    {
        Ok(monitor) => monitor,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start monitor");
            std::process::exit(1);
        }
    };

    let mut summary = tokio::time::interval(summary_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received");
                break;
            }
            _ = stop.cancelled() => break,
            _ = summary.tick() => log_summary(&monitor).await,
        }
    }

    monitor.shutdown().await;
}

/// Log how many patients sit at each risk level, plus the top entry.
async fn log_summary(monitor: &Monitor) {
    let view = monitor.projected_view().await;
    let count = |level: RiskLevel| view.iter().filter(|r| r.risk == level).count();

    tracing::info!(
        total = view.len(),
        high = count(RiskLevel::High),
        medium = count(RiskLevel::Medium),
        low = count(RiskLevel::Low),
        top = view.first().map(|r| r.name.as_str()).unwrap_or("-"),
        "Risk summary",
    );
}
