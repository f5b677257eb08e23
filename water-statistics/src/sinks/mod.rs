pub mod memory;
pub mod pgwire;
pub mod publisher;

pub use memory::InMemoryStatisticsStore;
pub use pgwire::PgStatisticsStore;
pub use publisher::{PublishMode, PublishResult, StatisticsPublisher};

use meter_client::domain::{CumulativePoint, LastPublishedMarker};
use time::Date;

use crate::pipeline::PipelineError;

/// Namespace prefix of every published statistic id.
pub const STATISTICS_SOURCE: &str = "water_meter";

pub fn consumption_statistic_id(meter_id: &str) -> String {
    format!("{STATISTICS_SOURCE}:{meter_id}_consumption")
}

pub fn cost_statistic_id(meter_id: &str) -> String {
    format!("{STATISTICS_SOURCE}:{meter_id}_cost")
}

/// Long-term statistics storage for one meter's consumption and cost series.
#[async_trait::async_trait]
pub trait StatisticsStore: Send + Sync {
    /// Tail of the consumption series.
    async fn last_statistic(&self, meter_id: &str) -> Result<Option<LastPublishedMarker>, PipelineError>;

    /// Latest stored point strictly before `date`.
    async fn statistic_before(&self, meter_id: &str, date: Date) -> Result<Option<LastPublishedMarker>, PipelineError>;

    /// Earliest stored point strictly after `date`.
    async fn statistic_after(&self, meter_id: &str, date: Date) -> Result<Option<LastPublishedMarker>, PipelineError>;

    /// Persist both series for `points` in one write.
    async fn write_statistics(
        &self,
        meter_id: &str,
        points: &[CumulativePoint],
        overwrite: bool,
    ) -> Result<(), PipelineError>;
}
