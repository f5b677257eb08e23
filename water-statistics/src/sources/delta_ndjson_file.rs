use std::path::PathBuf;

use meter_client::domain::DeltaReading;
use time::Date;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use crate::pipeline::{DeltaSource, PipelineError};

/// An NDJSON export of delta readings, used for offline backfills.
///
/// Each line is a JSON object: `{"timestamp":"2024-01-02","volume":"1.5"}`
/// with an optional `reading` register value.
pub struct DeltaNdjsonFileSource {
    path: PathBuf,
}

impl DeltaNdjsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl DeltaSource for DeltaNdjsonFileSource {
    async fn fetch_deltas(&self, start: Date, end: Date) -> Result<Vec<DeltaReading>, PipelineError> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| PipelineError::Transport(format!("failed to open delta file: {e}")))?;
        let mut lines = BufReader::new(file).lines();

        let mut out = Vec::new();
        let mut line_no = 0usize;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| PipelineError::Transport(format!("failed to read delta line: {e}")))?
        {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let delta: DeltaReading = serde_json::from_str(&line).map_err(|e| {
                metrics::counter!("delta_file_parse_errors_total").increment(1);
                PipelineError::InvalidDelta(format!("line {line_no}: {e}"))
            })?;
            if delta.timestamp >= start && delta.timestamp <= end {
                out.push(delta);
            }
        }

        Ok(out)
    }
}
