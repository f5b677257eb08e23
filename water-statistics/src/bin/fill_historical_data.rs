use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use std::{env, path::Path, sync::Arc, time::Duration};
use chrono::Utc;
use time::{macros::format_description, Date};
use water_statistics::{
    config::AppConfig,
    observability,
    orchestrator::{Orchestrator, OrchestratorSettings},
    pipeline::DeltaSource,
    scheduler::local_date,
    sinks::{PgStatisticsStore, StatisticsPublisher},
    sources::{DeltaCsvFileSource, DeltaNdjsonFileSource, RemoteApiSource, StaticCookieSession},
    state::{MeterStateManager, PgEntityStore},
};

fn parse_date(s: &str) -> Result<Date> {
    Date::parse(s, format_description!("[year]-[month]-[day]"))
        .map_err(|e| anyhow::anyhow!("invalid date '{s}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: fill_historical_data <start_date> [end_date] [deltas.csv|deltas.ndjson]");
    }
    let start = parse_date(&args[1])?;
    let end = args.get(2).map(|s| parse_date(s)).transpose()?;
    let file = args.get(3);

    // Load configuration (WATER_STATISTICS_CONFIG may point at a backfill-specific file).
    let cfg = AppConfig::load()?;
    let timezone = cfg.schedule.timezone()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let source: Arc<dyn DeltaSource> = match file {
        Some(path) if path.ends_with(".csv") => Arc::new(DeltaCsvFileSource::new(path)),
        Some(path) if path.ends_with(".ndjson") || path.ends_with(".jsonl") => Arc::new(DeltaNdjsonFileSource::new(path)),
        Some(path) => bail!(
            "unsupported delta file '{}', expected .csv or .ndjson",
            Path::new(path).display()
        ),
        None => Arc::new(RemoteApiSource::new(
            cfg.remote_api.base_url.clone(),
            cfg.meter.meter_id.clone(),
            Arc::new(StaticCookieSession::new(cfg.remote_api.session_cookie.clone())),
            Duration::from_secs(cfg.remote_api.request_timeout_secs),
        )?),
    };

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

    let orchestrator = Orchestrator::new(
        source,
        meter_state,
        StatisticsPublisher::new(Arc::new(store)),
        OrchestratorSettings::from_config(&cfg),
    );

    let today = local_date(Utc::now(), timezone)?;
    let outcome = orchestrator.run_backfill(today, start, end).await?;
    tracing::info!(?outcome, "fill_historical_data finished");
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
