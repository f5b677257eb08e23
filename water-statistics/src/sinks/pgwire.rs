use std::time::Duration;

use meter_client::{
    db::statistics_queries,
    domain::{CumulativePoint, LastPublishedMarker, StatisticRow},
};
use sqlx::postgres::PgPool;
use time::Date;

use super::{consumption_statistic_id, cost_statistic_id, StatisticsStore};
use crate::pipeline::PipelineError;

/// Statistics kept in the `long_term_statistics` table over pgwire.
pub struct PgStatisticsStore {
    pool: PgPool,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgStatisticsStore {
    pub fn new(pool: PgPool, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            max_retries,
            retry_backoff,
        }
    }

    /// Pair a consumption row with the cost row written alongside it.
    async fn with_cost(
        &self,
        meter_id: &str,
        consumption: Option<StatisticRow>,
    ) -> Result<Option<LastPublishedMarker>, PipelineError> {
        let Some(consumption) = consumption else {
            return Ok(None);
        };
        let cost = statistics_queries::statistic_at(&self.pool, &cost_statistic_id(meter_id), consumption.ts)
            .await
            .map_err(|e| PipelineError::Transport(format!("failed to read cost statistic: {e}")))?
            .ok_or_else(|| {
                PipelineError::InvalidState(format!("cost statistic missing for {}", consumption.ts))
            })?;
        Ok(Some(consumption.marker(&cost)))
    }
}

/// Two rows per point: consumption and cost.
pub(crate) fn rows_for(meter_id: &str, points: &[CumulativePoint]) -> Vec<StatisticRow> {
    let consumption_id = consumption_statistic_id(meter_id);
    let cost_id = cost_statistic_id(meter_id);

    let mut rows = Vec::with_capacity(points.len() * 2);
    for p in points {
        rows.push(StatisticRow {
            statistic_id: consumption_id.clone(),
            ts: p.timestamp,
            state: p.volume,
            sum: p.cumulative_volume,
        });
        rows.push(StatisticRow {
            statistic_id: cost_id.clone(),
            ts: p.timestamp,
            state: p.cost,
            sum: p.cumulative_cost,
        });
    }
    rows
}

#[async_trait::async_trait]
impl StatisticsStore for PgStatisticsStore {
    async fn last_statistic(&self, meter_id: &str) -> Result<Option<LastPublishedMarker>, PipelineError> {
        let row = statistics_queries::last_statistic(&self.pool, &consumption_statistic_id(meter_id))
            .await
            .map_err(|e| PipelineError::Transport(format!("failed to read statistics tail: {e}")))?;
        self.with_cost(meter_id, row).await
    }

    async fn statistic_before(&self, meter_id: &str, date: Date) -> Result<Option<LastPublishedMarker>, PipelineError> {
        let row = statistics_queries::statistic_before(&self.pool, &consumption_statistic_id(meter_id), date)
            .await
            .map_err(|e| PipelineError::Transport(format!("failed to read statistic before {date}: {e}")))?;
        self.with_cost(meter_id, row).await
    }

    async fn statistic_after(&self, meter_id: &str, date: Date) -> Result<Option<LastPublishedMarker>, PipelineError> {
        let row = statistics_queries::statistic_after(&self.pool, &consumption_statistic_id(meter_id), date)
            .await
            .map_err(|e| PipelineError::Transport(format!("failed to read statistic after {date}: {e}")))?;
        self.with_cost(meter_id, row).await
    }

    async fn write_statistics(
        &self,
        meter_id: &str,
        points: &[CumulativePoint],
        overwrite: bool,
    ) -> Result<(), PipelineError> {
        let rows = rows_for(meter_id, points);
        if rows.is_empty() {
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            let started = std::time::Instant::now();
            match statistics_queries::write_statistics(&self.pool, &rows, overwrite).await {
                Ok(()) => {
                    metrics::counter!("statistics_rows_written_total").increment(rows.len() as u64);
                    metrics::histogram!("statistics_write_seconds").record(started.elapsed().as_secs_f64());
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "statistics write failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "statistics write failed, giving up");
                    metrics::counter!("statistics_write_errors_total").increment(1);
                    return Err(PipelineError::Publish(e.to_string()));
                }
            }
        }
    }
}
