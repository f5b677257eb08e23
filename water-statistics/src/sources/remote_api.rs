//! Client for the utility's smart-meter consumption endpoint.
//!
//! Login is not handled here. A [`SessionProvider`] hands out a cookie; when
//! the remote rejects it the cached session is dropped and the fetch fails
//! with [`PipelineError::Auth`], leaving re-acquisition to the next cycle.

use std::{collections::HashSet, sync::Arc, time::Duration};

use meter_client::domain::DeltaReading;
use rust_decimal::Decimal;
use time::Date;
use tokio::sync::Mutex;

use crate::pipeline::{DeltaSource, PipelineError};

const CONSUMPTIONS_PATH: &str = "/ajax/waterMeter/getSmartWaterMeterConsumptions";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) water-statistics/0.1";
const LITRES_PER_CUBIC_METRE: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub cookie_header: String,
}

#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(&self) -> Result<Session, PipelineError>;
}

/// Session cookie pasted into the configuration.
pub struct StaticCookieSession {
    cookie_header: String,
}

impl StaticCookieSession {
    pub fn new(cookie_header: impl Into<String>) -> Self {
        Self {
            cookie_header: cookie_header.into(),
        }
    }
}

#[async_trait::async_trait]
impl SessionProvider for StaticCookieSession {
    async fn acquire(&self) -> Result<Session, PipelineError> {
        if self.cookie_header.trim().is_empty() {
            return Err(PipelineError::Auth("no session cookie configured".to_string()));
        }
        Ok(Session {
            cookie_header: self.cookie_header.clone(),
        })
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiLine {
    #[serde(rename = "Label")]
    pub label: String,
    /// Litres used in the hour.
    #[serde(rename = "Usage")]
    pub usage: Decimal,
    /// Register value in litres at the end of the hour.
    #[serde(rename = "Read")]
    pub read: Decimal,
    #[serde(rename = "IsEstimated", default)]
    pub is_estimated: bool,
}

#[derive(Debug, serde::Deserialize)]
struct ApiMeterUsage {
    #[serde(rename = "IsError", default)]
    is_error: bool,
    #[serde(rename = "Lines", default)]
    lines: Option<Vec<ApiLine>>,
}

pub struct RemoteApiSource {
    client: reqwest::Client,
    base_url: String,
    meter_id: String,
    sessions: Arc<dyn SessionProvider>,
    session: Mutex<Option<Session>>,
}

impl RemoteApiSource {
    pub fn new(
        base_url: impl Into<String>,
        meter_id: impl Into<String>,
        sessions: Arc<dyn SessionProvider>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::Transport(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            meter_id: meter_id.into(),
            sessions,
            session: Mutex::new(None),
        })
    }

    async fn session(&self) -> Result<Session, PipelineError> {
        let mut cached = self.session.lock().await;
        if let Some(s) = cached.as_ref() {
            return Ok(s.clone());
        }
        let fresh = self.sessions.acquire().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    async fn invalidate_session(&self) {
        *self.session.lock().await = None;
    }
}

#[async_trait::async_trait]
impl DeltaSource for RemoteApiSource {
    async fn fetch_deltas(&self, start: Date, end: Date) -> Result<Vec<DeltaReading>, PipelineError> {
        let session = self.session().await?;

        let params: [(&str, String); 10] = [
            ("meter", self.meter_id.clone()),
            ("startDate", start.day().to_string()),
            ("startMonth", u8::from(start.month()).to_string()),
            ("startYear", start.year().to_string()),
            ("endDate", end.day().to_string()),
            ("endMonth", u8::from(end.month()).to_string()),
            ("endYear", end.year().to_string()),
            ("granularity", "H".to_string()),
            ("premiseId", String::new()),
            ("isForC4C", "false".to_string()),
        ];

        metrics::counter!("remote_api_requests_total").increment(1);
        let response = self
            .client
            .get(format!("{}{}", self.base_url, CONSUMPTIONS_PATH))
            .query(&params)
            .header(reqwest::header::COOKIE, &session.cookie_header)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .map_err(|e| PipelineError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            self.invalidate_session().await;
            metrics::counter!("remote_api_auth_failures_total").increment(1);
            return Err(PipelineError::Auth(format!("remote rejected session with {status}")));
        }
        if !status.is_success() {
            return Err(PipelineError::Transport(format!("remote returned {status}")));
        }

        let body: ApiMeterUsage = response
            .json()
            .await
            .map_err(|e| PipelineError::Transport(format!("failed to decode consumption response: {e}")))?;
        if body.is_error {
            return Err(PipelineError::Transport("remote reported an error for the request".to_string()));
        }

        let lines = body.lines.unwrap_or_default();
        let estimated = lines.iter().filter(|l| l.is_estimated).count();
        let deltas = lines_to_daily_deltas(start, &lines)?;
        tracing::info!(
            %start,
            %end,
            lines = lines.len(),
            estimated,
            days = deltas.len(),
            "fetched consumption lines"
        );
        Ok(deltas)
    }
}

fn label_hour(label: &str) -> Result<u8, PipelineError> {
    label
        .split(':')
        .next()
        .and_then(|h| h.trim().parse::<u8>().ok())
        .filter(|h| *h < 24)
        .ok_or_else(|| PipelineError::InvalidDelta(format!("unrecognised hour label '{label}'")))
}

/// Fold hourly lines into one delta per calendar day.
///
/// Lines only carry an hour label, so dates are derived from `start`: the
/// date advances whenever the hour goes backwards, except when a non-midnight
/// hour repeats on the same date (the autumn DST fallback hour).
pub fn lines_to_daily_deltas(start: Date, lines: &[ApiLine]) -> Result<Vec<DeltaReading>, PipelineError> {
    let per_m3 = Decimal::from(LITRES_PER_CUBIC_METRE);

    let mut current = start;
    let mut prev_hour: Option<u8> = None;
    let mut seen: HashSet<(Date, u8)> = HashSet::new();
    let mut days: Vec<DeltaReading> = Vec::new();

    for line in lines {
        let hour = label_hour(&line.label)?;

        if let Some(prev) = prev_hour {
            let dst_repeat = hour != 0 && seen.contains(&(current, hour));
            if hour <= prev && !dst_repeat {
                current = current
                    .next_day()
                    .ok_or_else(|| PipelineError::InvalidDelta("date overflow while rolling over".to_string()))?;
            }
        }
        seen.insert((current, hour));
        prev_hour = Some(hour);

        let usage = line.usage / per_m3;
        let read = line.read / per_m3;
        match days.last_mut() {
            Some(day) if day.timestamp == current => {
                day.volume += usage;
                day.reading = Some(read);
            }
            _ => days.push(DeltaReading::new(current, usage).with_reading(read)),
        }
    }

    Ok(days)
}
