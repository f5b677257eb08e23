use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use meter_client::domain::{CumulativePoint, LastPublishedMarker};
use time::Date;

use super::StatisticsStore;
use crate::pipeline::PipelineError;

/// Process-local statistics store that records how often it was written.
#[derive(Default)]
pub struct InMemoryStatisticsStore {
    series: Mutex<HashMap<String, BTreeMap<Date, CumulativePoint>>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemoryStatisticsStore {
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every following write fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn find<F>(&self, meter_id: &str, pick: F) -> Result<Option<LastPublishedMarker>, PipelineError>
    where
        F: FnOnce(&BTreeMap<Date, CumulativePoint>) -> Option<&CumulativePoint>,
    {
        let series = self
            .series
            .lock()
            .map_err(|_| PipelineError::Publish("statistics store lock poisoned".to_string()))?;
        Ok(series.get(meter_id).and_then(pick).map(CumulativePoint::marker))
    }

    pub fn points(&self, meter_id: &str) -> Vec<CumulativePoint> {
        self.series
            .lock()
            .map(|s| s.get(meter_id).map(|m| m.values().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl StatisticsStore for InMemoryStatisticsStore {
    async fn last_statistic(&self, meter_id: &str) -> Result<Option<LastPublishedMarker>, PipelineError> {
        self.find(meter_id, |m| m.values().next_back())
    }

    async fn statistic_before(&self, meter_id: &str, date: Date) -> Result<Option<LastPublishedMarker>, PipelineError> {
        self.find(meter_id, |m| m.range(..date).next_back().map(|(_, p)| p))
    }

    async fn statistic_after(&self, meter_id: &str, date: Date) -> Result<Option<LastPublishedMarker>, PipelineError> {
        self.find(meter_id, |m| {
            m.range((Bound::Excluded(date), Bound::Unbounded))
                .next()
                .map(|(_, p)| p)
        })
    }

    async fn write_statistics(
        &self,
        meter_id: &str,
        points: &[CumulativePoint],
        overwrite: bool,
    ) -> Result<(), PipelineError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::Publish("injected write failure".to_string()));
        }

        let mut series = self
            .series
            .lock()
            .map_err(|_| PipelineError::Publish("statistics store lock poisoned".to_string()))?;
        let entry = series.entry(meter_id.to_string()).or_default();

        if overwrite {
            if let (Some(first), Some(last)) = (points.first(), points.last()) {
                entry.retain(|ts, _| *ts < first.timestamp || *ts > last.timestamp);
            }
        }
        for p in points {
            entry.insert(p.timestamp, p.clone());
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
