use std::sync::Arc;

use meter_client::domain::{CumulativePoint, LastPublishedMarker};
use time::Date;

use super::StatisticsStore;
use crate::pipeline::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Extend the stored series past its current tail.
    Append,
    /// Overwrite whatever is stored for the batch's date range.
    Backfill,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PublishResult {
    pub mode: PublishMode,
    pub points_written: usize,
    pub first: Option<Date>,
    pub last: Option<Date>,
}

/// Guards the store against anything that would make the series decrease.
#[derive(Clone)]
pub struct StatisticsPublisher {
    store: Arc<dyn StatisticsStore>,
}

impl StatisticsPublisher {
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self { store }
    }

    pub async fn last_marker(&self, meter_id: &str) -> Result<Option<LastPublishedMarker>, PipelineError> {
        self.store.last_statistic(meter_id).await
    }

    /// Stored point a backfill starting on `date` continues from.
    pub async fn marker_before(&self, meter_id: &str, date: Date) -> Result<Option<LastPublishedMarker>, PipelineError> {
        self.store.statistic_before(meter_id, date).await
    }

    pub async fn publish(
        &self,
        meter_id: &str,
        points: &[CumulativePoint],
        mode: PublishMode,
    ) -> Result<PublishResult, PipelineError> {
        let (first, last) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                tracing::debug!(meter_id, ?mode, "nothing to publish");
                return Ok(PublishResult {
                    mode,
                    points_written: 0,
                    first: None,
                    last: None,
                });
            }
        };

        check_batch_monotonic(points)?;

        match mode {
            PublishMode::Append => {
                if let Some(tail) = self.store.last_statistic(meter_id).await? {
                    ensure_continues(&tail, &first.marker()).inspect_err(|e| {
                        tracing::error!(meter_id, error = %e, "refusing to append: batch does not continue the stored series");
                    })?;
                }
            }
            PublishMode::Backfill => {
                // Rows after the batch are kept, so they must not fall below its end.
                if let Some(next) = self.store.statistic_after(meter_id, last.timestamp).await? {
                    ensure_continues(&last.marker(), &next).inspect_err(|e| {
                        tracing::error!(
                            meter_id,
                            error = %e,
                            "refusing to backfill: statistics stored after the range would decrease"
                        );
                    })?;
                }
            }
        }

        let overwrite = mode == PublishMode::Backfill;
        self.store.write_statistics(meter_id, points, overwrite).await?;

        metrics::counter!("statistics_points_written_total").increment(points.len() as u64);
        tracing::info!(
            meter_id,
            ?mode,
            points = points.len(),
            first = %first.timestamp,
            last = %last.timestamp,
            cumulative_volume = %last.cumulative_volume,
            "statistics published"
        );

        Ok(PublishResult {
            mode,
            points_written: points.len(),
            first: Some(first.timestamp),
            last: Some(last.timestamp),
        })
    }
}

/// `next` must come strictly after `prev` and not below it in either series.
fn ensure_continues(prev: &LastPublishedMarker, next: &LastPublishedMarker) -> Result<(), PipelineError> {
    let regression = if next.timestamp <= prev.timestamp {
        Some(("date", next.cumulative_volume, prev.cumulative_volume))
    } else if next.cumulative_volume < prev.cumulative_volume {
        Some(("volume", next.cumulative_volume, prev.cumulative_volume))
    } else if next.cumulative_cost < prev.cumulative_cost {
        Some(("cost", next.cumulative_cost, prev.cumulative_cost))
    } else {
        None
    };

    match regression {
        Some((series, value, stored)) => {
            metrics::counter!("publish_regressions_total", "series" => series).increment(1);
            Err(PipelineError::Regression {
                series,
                timestamp: next.timestamp,
                value,
                stored,
            })
        }
        None => Ok(()),
    }
}

fn check_batch_monotonic(points: &[CumulativePoint]) -> Result<(), PipelineError> {
    points
        .windows(2)
        .try_for_each(|pair| ensure_continues(&pair[0].marker(), &pair[1].marker()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::InMemoryStatisticsStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use time::macros::date;

    fn point(date: Date, cumulative: Decimal) -> CumulativePoint {
        CumulativePoint {
            timestamp: date,
            volume: dec!(1),
            cost: dec!(2),
            cumulative_volume: cumulative,
            cumulative_cost: cumulative * dec!(2),
        }
    }

    fn publisher() -> (Arc<InMemoryStatisticsStore>, StatisticsPublisher) {
        let store = Arc::new(InMemoryStatisticsStore::default());
        (store.clone(), StatisticsPublisher::new(store))
    }

    #[tokio::test]
    async fn append_writes_once_per_batch() {
        let (store, p) = publisher();
        let points = vec![point(date!(2024 - 01 - 02), dec!(101)), point(date!(2024 - 01 - 03), dec!(102))];

        let res = p.publish("m-1", &points, PublishMode::Append).await.unwrap();
        assert_eq!(res.points_written, 2);
        assert_eq!(res.last, Some(date!(2024 - 01 - 03)));
        assert_eq!(store.write_count(), 1);
        assert_eq!(
            p.last_marker("m-1").await.unwrap(),
            Some(LastPublishedMarker {
                timestamp: date!(2024 - 01 - 03),
                cumulative_volume: dec!(102),
                cumulative_cost: dec!(204),
            })
        );
    }

    #[tokio::test]
    async fn append_below_stored_tail_is_regression_without_write() {
        let (store, p) = publisher();
        p.publish("m-1", &[point(date!(2024 - 01 - 02), dec!(110))], PublishMode::Append)
            .await
            .unwrap();

        let res = p
            .publish("m-1", &[point(date!(2024 - 01 - 03), dec!(109.9))], PublishMode::Append)
            .await;
        assert!(matches!(res, Err(PipelineError::Regression { .. })));
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.points("m-1").len(), 1);
    }

    #[tokio::test]
    async fn append_overlapping_stored_tail_is_rejected() {
        let (store, p) = publisher();
        p.publish("m-1", &[point(date!(2024 - 01 - 05), dec!(10))], PublishMode::Append)
            .await
            .unwrap();

        let res = p
            .publish("m-1", &[point(date!(2024 - 01 - 05), dec!(12))], PublishMode::Append)
            .await;
        assert!(matches!(res, Err(PipelineError::Regression { .. })));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn backfill_twice_is_idempotent() {
        let (store, p) = publisher();
        let points = vec![
            point(date!(2024 - 01 - 02), dec!(1)),
            point(date!(2024 - 01 - 04), dec!(3)),
            point(date!(2024 - 01 - 05), dec!(3)),
        ];

        p.publish("m-1", &points, PublishMode::Backfill).await.unwrap();
        let after_first = store.points("m-1");
        p.publish("m-1", &points, PublishMode::Backfill).await.unwrap();

        assert_eq!(store.points("m-1"), after_first);
        assert_eq!(after_first.len(), 3);
    }

    #[tokio::test]
    async fn backfill_replaces_stale_rows_in_range() {
        let (store, p) = publisher();
        p.publish(
            "m-1",
            &[point(date!(2024 - 01 - 02), dec!(50)), point(date!(2024 - 01 - 03), dec!(51))],
            PublishMode::Append,
        )
        .await
        .unwrap();

        p.publish(
            "m-1",
            &[point(date!(2024 - 01 - 01), dec!(1)), point(date!(2024 - 01 - 04), dec!(2))],
            PublishMode::Backfill,
        )
        .await
        .unwrap();

        let stored: Vec<Date> = store.points("m-1").iter().map(|p| p.timestamp).collect();
        assert_eq!(stored, vec![date!(2024 - 01 - 01), date!(2024 - 01 - 04)]);
    }

    #[tokio::test]
    async fn decreasing_batch_is_rejected_in_either_mode() {
        let (store, p) = publisher();
        let points = vec![point(date!(2024 - 01 - 02), dec!(5)), point(date!(2024 - 01 - 03), dec!(4))];

        for mode in [PublishMode::Append, PublishMode::Backfill] {
            let res = p.publish("m-1", &points, mode).await;
            assert!(matches!(res, Err(PipelineError::Regression { .. })));
        }
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let (store, p) = publisher();
        let res = p.publish("m-1", &[], PublishMode::Append).await.unwrap();
        assert_eq!(res.points_written, 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_publish_error() {
        let (store, p) = publisher();
        store.fail_writes(true);
        let res = p
            .publish("m-1", &[point(date!(2024 - 01 - 02), dec!(1))], PublishMode::Backfill)
            .await;
        assert!(matches!(res, Err(PipelineError::Publish(_))));
    }

    #[tokio::test]
    async fn append_with_lower_cumulative_cost_is_regression() {
        let (store, p) = publisher();
        p.publish("m-1", &[point(date!(2024 - 01 - 02), dec!(110))], PublishMode::Append)
            .await
            .unwrap();

        let mut cheaper = point(date!(2024 - 01 - 03), dec!(111));
        cheaper.cumulative_cost = dec!(219);
        let res = p.publish("m-1", &[cheaper], PublishMode::Append).await;

        assert!(matches!(res, Err(PipelineError::Regression { series: "cost", .. })));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn backfill_above_following_stored_point_is_regression_without_write() {
        let (store, p) = publisher();
        let stored = vec![
            point(date!(2024 - 01 - 02), dec!(101)),
            point(date!(2024 - 01 - 03), dec!(102)),
            point(date!(2024 - 01 - 04), dec!(103)),
        ];
        p.publish("m-1", &stored, PublishMode::Append).await.unwrap();

        let res = p
            .publish("m-1", &[point(date!(2024 - 01 - 03), dec!(150))], PublishMode::Backfill)
            .await;

        assert!(matches!(res, Err(PipelineError::Regression { series: "volume", .. })));
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.points("m-1"), stored);
    }

    #[tokio::test]
    async fn backfill_inside_stored_range_is_accepted_when_it_still_fits() {
        let (store, p) = publisher();
        p.publish(
            "m-1",
            &[point(date!(2024 - 01 - 02), dec!(101)), point(date!(2024 - 01 - 04), dec!(103))],
            PublishMode::Append,
        )
        .await
        .unwrap();

        p.publish("m-1", &[point(date!(2024 - 01 - 03), dec!(102))], PublishMode::Backfill)
            .await
            .unwrap();

        assert_eq!(
            p.marker_before("m-1", date!(2024 - 01 - 04)).await.unwrap().map(|m| m.timestamp),
            Some(date!(2024 - 01 - 03))
        );
        assert_eq!(store.points("m-1").len(), 3);
    }
}
