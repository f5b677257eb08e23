use std::{
    fs::File,
    path::{Path, PathBuf},
    str::FromStr,
};

use csv::StringRecord;
use meter_client::domain::DeltaReading;
use rust_decimal::Decimal;
use time::{macros::format_description, Date};

use crate::pipeline::{DeltaSource, PipelineError};

/// CSV export of delta readings.
///
/// Expected header columns (by name):
/// - timestamp (YYYY-MM-DD)
/// - volume (cubic metres)
/// - reading (optional register value)
pub struct DeltaCsvFileSource {
    path: PathBuf,
}

impl DeltaCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_optional_decimal(s: &str) -> Result<Option<Decimal>, PipelineError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(trimmed)
        .map(Some)
        .map_err(|e| PipelineError::InvalidDelta(format!("invalid reading '{trimmed}': {e}")))
}

fn record_to_delta(record: &StringRecord, headers: &StringRecord) -> Result<DeltaReading, PipelineError> {
    let get = |name: &str| -> Result<&str, PipelineError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
            .ok_or_else(|| PipelineError::InvalidDelta(format!("missing column '{name}' in CSV record")))
    };

    let ts_str = get("timestamp")?.trim();
    let timestamp = Date::parse(ts_str, format_description!("[year]-[month]-[day]"))
        .map_err(|e| PipelineError::InvalidDelta(format!("invalid timestamp '{ts_str}': {e}")))?;

    let volume_str = get("volume")?.trim();
    let volume = Decimal::from_str(volume_str)
        .map_err(|e| PipelineError::InvalidDelta(format!("invalid volume '{volume_str}': {e}")))?;

    let reading = match get("reading") {
        Ok(s) => parse_optional_decimal(s)?,
        Err(_) => None,
    };

    Ok(DeltaReading {
        timestamp,
        volume,
        reading,
    })
}

fn read_csv(path: &Path, start: Date, end: Date) -> Result<Vec<DeltaReading>, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::Transport(format!("failed to open CSV file: {e}")))?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr
        .headers()
        .map_err(|e| PipelineError::Transport(format!("failed to read CSV headers: {e}")))?
        .clone();

    let mut out = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| PipelineError::Transport(format!("failed to read CSV record: {e}")))?;
        let delta = record_to_delta(&record, &headers).inspect_err(|_| {
            metrics::counter!("delta_file_parse_errors_total").increment(1);
        })?;
        if delta.timestamp >= start && delta.timestamp <= end {
            out.push(delta);
        }
    }
    Ok(out)
}

#[async_trait::async_trait]
impl DeltaSource for DeltaCsvFileSource {
    async fn fetch_deltas(&self, start: Date, end: Date) -> Result<Vec<DeltaReading>, PipelineError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_csv(&path, start, end))
            .await
            .map_err(|e| PipelineError::Transport(format!("CSV reader task failed: {e}")))?
    }
}
