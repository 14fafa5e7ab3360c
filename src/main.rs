// =============================================================================
// Options Pipeline — Main Entry Point
// =============================================================================
//
// Advisory only: signals are published, nothing is ever routed to a broker.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analyst;
mod api;
mod app_state;
mod decision_envelope;
mod errors;
mod in_flight;
mod market_data;
mod orchestrator;
mod pricing;
mod publish;
mod research;
mod risk;
mod runtime_config;
mod trader;
mod types;
mod watchdog;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analyst::AnalystStage;
use crate::app_state::AppState;
use crate::market_data::{HttpMarketDataClient, MarketDataProvider, SimulatedMarketData};
use crate::orchestrator::{Heartbeat, Orchestrator, OrchestratorSupervisor};
use crate::publish::{LogPublisher, Publisher, WebhookPublisher};
use crate::risk::RiskStage;
use crate::runtime_config::RuntimeConfig;
use crate::trader::TraderStage;
use crate::watchdog::{
    AlertSink, DataFeedProbe, DiskProbe, HeartbeatProbe, LogAlertSink, MemoryProbe, Watchdog, WebhookAlertSink,
};

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Options pipeline starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();
    info!(watchlist = ?config.watchlist, "configured watchlist");

    // ── 2. Risk book ─────────────────────────────────────────────────────
    // A missing file is an empty book; an unreadable one stops startup.
    let positions = risk::load_positions(&config.positions_path)
        .with_context(|| format!("loading positions from {}", config.positions_path))?;
    let risk = Arc::new(RiskStage::new(
        config.risk.clone(),
        config.trader.account_value,
        config.trader.contract_multiplier,
        config.pipeline.risk_free_rate,
        positions,
    ));

    // ── 3. Market data ───────────────────────────────────────────────────
    let provider: Arc<dyn MarketDataProvider> = match &config.data_url {
        Some(url) => {
            info!(%url, "using HTTP market data aggregator");
            let timeout = Duration::from_millis(config.pipeline.candidate_timeout_ms.max(1_000));
            Arc::new(HttpMarketDataClient::new(url.clone(), timeout)?.with_risk_free_rate(config.pipeline.risk_free_rate))
        }
        None => {
            warn!("no data_url configured, serving simulated market data");
            Arc::new(SimulatedMarketData::new())
        }
    };

    // ── 4. Publishers ────────────────────────────────────────────────────
    let mut publishers: Vec<Arc<dyn Publisher>> = vec![Arc::new(LogPublisher)];
    if let Some(url) = &config.publish_webhook {
        match WebhookPublisher::new(url.clone()) {
            Ok(p) => publishers.push(Arc::new(p)),
            Err(e) => error!(error = %e, "webhook publisher disabled"),
        }
    }

    // ── 5. Shared state & orchestrator ───────────────────────────────────
    let heartbeat = Arc::new(Heartbeat::new());
    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&risk), Arc::clone(&heartbeat)));
    let shutdown = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&provider),
        AnalystStage::standard(),
        TraderStage::new(config.trader.clone(), config.risk.max_position_pct, config.pipeline.risk_free_rate),
        Arc::clone(&risk),
        publishers,
        config.pipeline.clone(),
        Arc::clone(&heartbeat),
    ));
    let supervisor = Arc::new(OrchestratorSupervisor::new(orchestrator, Arc::clone(&state), shutdown.clone()));
    supervisor.start();

    // ── 6. Watchdog ──────────────────────────────────────────────────────
    let wd = &config.watchdog;
    let mut alert_sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogAlertSink)];
    if let Some(url) = &wd.alert_webhook {
        match WebhookAlertSink::new(url.clone()) {
            Ok(s) => alert_sinks.push(Arc::new(s)),
            Err(e) => error!(error = %e, "alert webhook disabled"),
        }
    }
    let mut watchdog = Watchdog::new(wd.clone(), Arc::clone(&state.watchdog))
        .with_probe(Arc::new(HeartbeatProbe::new(Arc::clone(&heartbeat), wd.heartbeat_stale_secs)))
        .with_probe(Arc::new(DataFeedProbe::new(Arc::clone(&provider))))
        .with_probe(Arc::new(DiskProbe::new(".", wd.min_disk_free_gb)))
        .with_probe(Arc::new(MemoryProbe::new(wd.max_rss_mb)))
        .with_remediator("orchestrator", supervisor.clone());
    for sink in alert_sinks {
        watchdog = watchdog.with_alert_sink(sink);
    }
    let watchdog_task = tokio::spawn(watchdog.run(shutdown.child_token()));

    // ── 7. REST API ──────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    info!(bind = %config.api_bind, "REST API listening");
    let app = api::rest::router(Arc::clone(&state));
    let api_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move { api_shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!(error = %e, "REST API server failed");
        }
    });

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, cancelling in-flight cycle");

    shutdown.cancel();
    supervisor.stop().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), watchdog_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), server).await;

    let final_config = state.runtime_config.read().clone();
    if let Err(e) = final_config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("options pipeline shut down complete");
    Ok(())
}
