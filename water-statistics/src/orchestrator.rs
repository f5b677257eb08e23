//! Runs fetch → reconcile → publish cycles, one at a time.
//!
//! Routine ticks and backfill requests go through a single queue consumed by
//! one worker task; the cycle guard additionally serializes direct callers.

use std::sync::Arc;

use meter_client::domain::{DeltaReading, LastPublishedMarker, MeterState, ReadingOrigin};
use rust_decimal::Decimal;
use chrono::Utc;
use chrono_tz::Tz;
use time::{Date, Duration};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};

use crate::{
    config::AppConfig,
    pipeline::{DeltaSource, PipelineError},
    reconcile::reconcile,
    scheduler::local_date,
    sinks::{PublishMode, PublishResult, StatisticsPublisher},
    state::MeterStateManager,
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Days the upstream data trails today.
    pub lag_days: i64,
    /// Extra days re-fetched before the lagged end date on routine cycles.
    pub window_days: i64,
    pub backfill_chunk_days: i64,
    pub baseline_offset: Decimal,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            lag_days: 3,
            window_days: 3,
            backfill_chunk_days: 7,
            baseline_offset: Decimal::ZERO,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            lag_days: cfg.schedule.lag_days,
            window_days: cfg.schedule.window_days,
            backfill_chunk_days: cfg.schedule.backfill_chunk_days,
            baseline_offset: cfg.meter.baseline_offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Published(PublishResult),
    NoData,
    Skipped { reason: String },
}

pub struct Orchestrator {
    source: Arc<dyn DeltaSource>,
    meter_state: MeterStateManager,
    publisher: StatisticsPublisher,
    settings: OrchestratorSettings,
    cycle_guard: Mutex<()>,
}

fn days_before(date: Date, days: i64) -> Result<Date, PipelineError> {
    date.checked_sub(Duration::days(days))
        .ok_or_else(|| PipelineError::InvalidRequest(format!("{days} days before {date} is out of range")))
}

/// Inclusive, non-overlapping windows of at most `chunk_days` days covering
/// `[start, end]`.
pub fn backfill_windows(start: Date, end: Date, chunk_days: i64) -> Vec<(Date, Date)> {
    let chunk = Duration::days(chunk_days.max(1));
    let mut windows = Vec::new();
    let mut chunk_start = start;
    while chunk_start <= end {
        let chunk_end = chunk_start
            .checked_add(chunk - Duration::DAY)
            .map_or(end, |d| d.min(end));
        windows.push((chunk_start, chunk_end));
        match chunk_end.next_day() {
            Some(next) => chunk_start = next,
            None => break,
        }
    }
    windows
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn DeltaSource>,
        meter_state: MeterStateManager,
        publisher: StatisticsPublisher,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            source,
            meter_state,
            publisher,
            settings,
            cycle_guard: Mutex::new(()),
        }
    }

    pub fn meter_state(&self) -> &MeterStateManager {
        &self.meter_state
    }

    fn meter_id(&self) -> &str {
        self.meter_state.meter_id()
    }

    /// Fetch the recent rolling window and append anything new.
    pub async fn run_routine_cycle(&self, today: Date) -> Result<CycleOutcome, PipelineError> {
        let _guard = self.cycle_guard.lock().await;

        let state = self.meter_state.get().await?;
        if !state.is_anchored() {
            tracing::warn!(meter_id = self.meter_id(), "initial meter reading not set, skipping statistics update");
            return Ok(CycleOutcome::Skipped {
                reason: "initial meter reading not set".to_string(),
            });
        }

        let end = days_before(today, self.settings.lag_days)?;
        let start = days_before(end, self.settings.window_days)?;

        let deltas = self.source.fetch_deltas(start, end).await?;
        tracing::info!(meter_id = self.meter_id(), %start, %end, fetched = deltas.len(), "routine fetch complete");
        if deltas.is_empty() {
            return Ok(CycleOutcome::NoData);
        }

        let tail = self.publisher.last_marker(self.meter_id()).await?;
        let (seed, mode) = match tail {
            Some(tail) if tail.timestamp < state.initial_reading_timestamp => {
                tracing::info!(
                    meter_id = self.meter_id(),
                    tail = %tail.timestamp,
                    anchor = %state.initial_reading_timestamp,
                    "anchor is newer than the published tail, restarting the series from the anchor"
                );
                (None, PublishMode::Backfill)
            }
            tail => (tail, PublishMode::Append),
        };

        let points = reconcile(&deltas, &state, seed.as_ref())?;
        let result = self.publisher.publish(self.meter_id(), &points, mode).await?;

        Ok(CycleOutcome::Published(result))
    }

    /// Import `[start, end]` (end defaults to the lagged date) and overwrite
    /// the stored range.
    ///
    /// The series continues from the stored point before the range when there
    /// is one; otherwise it starts from the anchor, auto-anchoring the meter
    /// unless the user set it.
    pub async fn run_backfill(&self, today: Date, start: Date, end: Option<Date>) -> Result<CycleOutcome, PipelineError> {
        let _guard = self.cycle_guard.lock().await;

        let end = match end {
            Some(end) => end,
            None => days_before(today, self.settings.lag_days)?,
        };
        if start >= end {
            return Err(PipelineError::InvalidRequest(format!(
                "start_date {start} must be before end_date {end}"
            )));
        }

        let deltas = self.fetch_range(start, end).await?;
        let earliest = deltas.iter().fold(None::<&DeltaReading>, |acc, d| match acc {
            Some(a) if a.timestamp <= d.timestamp => Some(a),
            _ => Some(d),
        });
        let Some(earliest) = earliest else {
            tracing::warn!(meter_id = self.meter_id(), %start, %end, "no historical data found in the given date range");
            return Ok(CycleOutcome::NoData);
        };

        let current = self.meter_state.get().await?;
        let seed = self.backfill_seed(&current, earliest.timestamp).await?;

        // Without a stored point to continue from, an automatic anchor moves
        // to the start of this import. Nothing is persisted until the
        // statistics are written.
        let state = if current.origin == ReadingOrigin::UserSet || seed.is_some() {
            current.clone()
        } else {
            MeterState {
                initial_reading: earliest.baseline().unwrap_or(self.settings.baseline_offset),
                initial_reading_timestamp: earliest.timestamp,
                price_per_unit: current.price_per_unit,
                origin: ReadingOrigin::AutoSet,
            }
        };

        let points = reconcile(&deltas, &state, seed.as_ref())?;
        let result = self
            .publisher
            .publish(self.meter_id(), &points, PublishMode::Backfill)
            .await?;

        if state != current {
            self.meter_state
                .auto_initialize(state.initial_reading, state.initial_reading_timestamp)
                .await?;
        }

        tracing::info!(
            meter_id = self.meter_id(),
            days = result.points_written,
            "backfilled historical statistics"
        );
        Ok(CycleOutcome::Published(result))
    }

    /// Stored point before the first imported day, if it lies on or after
    /// the anchor.
    async fn backfill_seed(
        &self,
        current: &MeterState,
        first_day: Date,
    ) -> Result<Option<LastPublishedMarker>, PipelineError> {
        if !current.is_anchored() {
            return Ok(None);
        }
        let anchor = current.initial_reading_timestamp;
        let seed = self
            .publisher
            .marker_before(self.meter_id(), first_day.max(anchor))
            .await?
            .filter(|m| m.timestamp >= anchor);
        if let Some(m) = &seed {
            tracing::debug!(meter_id = self.meter_id(), seed = %m.timestamp, "continuing backfill from stored point");
        }
        Ok(seed)
    }

    async fn fetch_range(&self, start: Date, end: Date) -> Result<Vec<DeltaReading>, PipelineError> {
        let mut all = Vec::new();
        for (chunk_start, chunk_end) in backfill_windows(start, end, self.settings.backfill_chunk_days) {
            tracing::info!(from = %chunk_start, to = %chunk_end, "fetching historical data");
            let chunk = self.source.fetch_deltas(chunk_start, chunk_end).await.inspect_err(|e| {
                tracing::error!(error = %e, from = %chunk_start, to = %chunk_end, "historical fetch failed, aborting backfill");
            })?;
            all.extend(chunk);
            tokio::task::yield_now().await;
        }
        Ok(all)
    }
}

pub enum CycleRequest {
    Routine,
    Backfill {
        start: Date,
        end: Option<Date>,
        reply: oneshot::Sender<Result<CycleOutcome, PipelineError>>,
    },
}

/// Producer side of the cycle queue.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<CycleRequest>,
}

impl OrchestratorHandle {
    pub async fn request_routine(&self) -> Result<(), PipelineError> {
        self.tx
            .send(CycleRequest::Routine)
            .await
            .map_err(|_| PipelineError::InvalidRequest("cycle worker has stopped".to_string()))
    }

    pub async fn fill_historical_data(&self, start: Date, end: Option<Date>) -> Result<CycleOutcome, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CycleRequest::Backfill { start, end, reply })
            .await
            .map_err(|_| PipelineError::InvalidRequest("cycle worker has stopped".to_string()))?;
        rx.await
            .map_err(|_| PipelineError::InvalidRequest("cycle worker dropped the request".to_string()))?
    }
}

fn record_outcome(cycle: &'static str, res: &Result<CycleOutcome, PipelineError>) {
    match res {
        Ok(outcome) => {
            metrics::counter!("cycles_completed_total", "cycle" => cycle).increment(1);
            tracing::debug!(cycle, ?outcome, "cycle finished");
        }
        Err(e @ PipelineError::Regression { .. }) => {
            metrics::counter!("cycle_failures_total", "cycle" => cycle, "kind" => e.kind()).increment(1);
            tracing::error!(
                cycle,
                error = %e,
                "statistics regression detected, nothing written; check upstream data or the stored series"
            );
        }
        Err(e) => {
            metrics::counter!("cycle_failures_total", "cycle" => cycle, "kind" => e.kind()).increment(1);
            tracing::error!(cycle, kind = e.kind(), error = %e, "cycle failed, nothing written");
        }
    }
}

/// Start the single consumer of the cycle queue.
pub fn spawn_worker(
    orchestrator: Arc<Orchestrator>,
    tz: Tz,
    capacity: usize,
) -> (OrchestratorHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<CycleRequest>(capacity.max(1));

    let join = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let today = local_date(Utc::now(), tz);
            match request {
                CycleRequest::Routine => {
                    let res = match today {
                        Ok(today) => orchestrator.run_routine_cycle(today).await,
                        Err(e) => Err(e),
                    };
                    record_outcome("routine", &res);
                }
                CycleRequest::Backfill { start, end, reply } => {
                    let res = match today {
                        Ok(today) => orchestrator.run_backfill(today, start, end).await,
                        Err(e) => Err(e),
                    };
                    record_outcome("backfill", &res);
                    let _ = reply.send(res);
                }
            }
        }
        tracing::info!("cycle queue closed, worker exiting");
    });

    (OrchestratorHandle { tx }, join)
}
