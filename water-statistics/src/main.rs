use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use water_statistics::{
    api::{self, ApiState},
    config::AppConfig,
    observability,
    orchestrator::{spawn_worker, Orchestrator, OrchestratorSettings},
    scheduler,
    sinks::{PgStatisticsStore, StatisticsPublisher},
    sources::{RemoteApiSource, StaticCookieSession},
    state::{MeterStateManager, PgEntityStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;
    let timezone = cfg.schedule.timezone()?;

    let metrics = match &cfg.metrics {
        Some(m) if m.enabled => Some(observability::install_metrics_recorder()?),
        _ => None,
    };

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let meter_state = MeterStateManager::new(
        Arc::new(PgEntityStore::new(pool.clone())),
        cfg.meter.meter_id.clone(),
        cfg.meter.default_price_per_unit,
    );

    let store = PgStatisticsStore::new(
        pool,
        cfg.sink.max_retries,
        Duration::from_millis(cfg.sink.retry_backoff_ms),
    );

    let source = RemoteApiSource::new(
        cfg.remote_api.base_url.clone(),
        cfg.meter.meter_id.clone(),
        Arc::new(StaticCookieSession::new(cfg.remote_api.session_cookie.clone())),
        Duration::from_secs(cfg.remote_api.request_timeout_secs),
    )?;

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(source),
        meter_state.clone(),
        StatisticsPublisher::new(Arc::new(store)),
        OrchestratorSettings::from_config(&cfg),
    ));

    let (handle, worker) = spawn_worker(orchestrator, timezone, 16);
    let triggers = scheduler::spawn_daily_triggers(handle.clone(), cfg.schedule.trigger_hours.clone(), timezone);

    let addr: SocketAddr = cfg
        .api
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid api.bind_addr: {e}"))?;

    let app = api::router(ApiState {
        handle,
        meter_state,
        timezone,
        auth_bearer_token: cfg.api.auth_bearer_token.clone(),
        metrics,
    });

    tracing::info!(
        %addr,
        meter_id = %cfg.meter.meter_id,
        trigger_hours = ?cfg.schedule.trigger_hours,
        timezone = timezone.name(),
        "water statistics service started"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    triggers.abort();
    worker.abort();

    Ok(())
}
