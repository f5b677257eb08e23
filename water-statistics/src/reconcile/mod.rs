//! Turns raw consumption deltas into the cumulative series that gets published.

use std::collections::HashMap;

use meter_client::domain::{CumulativePoint, DeltaReading, LastPublishedMarker, MeterState};
use rust_decimal::Decimal;

use crate::pipeline::PipelineError;

pub fn validate_reading(initial_reading: Decimal) -> Result<(), PipelineError> {
    if initial_reading < Decimal::ZERO {
        return Err(PipelineError::InvalidState(format!(
            "initial reading must be non-negative, got {initial_reading}"
        )));
    }
    Ok(())
}

pub fn validate_price(price_per_unit: Decimal) -> Result<(), PipelineError> {
    if price_per_unit <= Decimal::ZERO {
        return Err(PipelineError::InvalidState(format!(
            "price per unit must be positive, got {price_per_unit}"
        )));
    }
    Ok(())
}

pub fn validate_anchor(initial_reading: Decimal, price_per_unit: Decimal) -> Result<(), PipelineError> {
    validate_reading(initial_reading)?;
    validate_price(price_per_unit)
}

/// Build the cumulative series for `deltas` on top of the anchor or the last
/// published point.
///
/// Rules:
/// - any negative delta fails the whole batch, before any filtering;
/// - timestamps are deduplicated, first occurrence wins;
/// - deltas before the anchor date or at/before the marker are skipped;
/// - cost accumulates on top of the marker's cumulative cost;
/// - missing days are not filled in.
pub fn reconcile(
    deltas: &[DeltaReading],
    state: &MeterState,
    last_marker: Option<&LastPublishedMarker>,
) -> Result<Vec<CumulativePoint>, PipelineError> {
    if let Some(bad) = deltas.iter().find(|d| d.volume < Decimal::ZERO) {
        metrics::counter!("reconcile_invalid_delta_total").increment(1);
        return Err(PipelineError::InvalidDelta(format!(
            "negative volume {} on {}",
            bad.volume, bad.timestamp
        )));
    }

    if !state.is_anchored() {
        return Err(PipelineError::InvalidState("initial meter reading is not set".to_string()));
    }
    validate_anchor(state.initial_reading, state.price_per_unit)?;

    if let Some(marker) = last_marker {
        if marker.timestamp < state.initial_reading_timestamp {
            return Err(PipelineError::InvalidState(format!(
                "seed point {} predates the anchor date {}",
                marker.timestamp, state.initial_reading_timestamp
            )));
        }
    }

    let mut seen: HashMap<time::Date, Decimal> = HashMap::with_capacity(deltas.len());
    let mut unique: Vec<&DeltaReading> = Vec::with_capacity(deltas.len());
    for delta in deltas {
        match seen.get(&delta.timestamp) {
            Some(first) => {
                metrics::counter!("reconcile_duplicates_total").increment(1);
                if *first != delta.volume {
                    metrics::counter!("reconcile_conflicting_duplicates_total").increment(1);
                    tracing::warn!(
                        timestamp = %delta.timestamp,
                        kept = %first,
                        dropped = %delta.volume,
                        "conflicting volumes for the same day, keeping the first"
                    );
                }
            }
            None => {
                seen.insert(delta.timestamp, delta.volume);
                unique.push(delta);
            }
        }
    }

    unique.sort_by_key(|d| d.timestamp);

    let before = unique.len();
    unique.retain(|d| {
        d.timestamp >= state.initial_reading_timestamp
            && last_marker.map_or(true, |m| d.timestamp > m.timestamp)
    });
    if unique.len() < before {
        tracing::debug!(skipped = before - unique.len(), "skipped already covered deltas");
    }

    // Cost accumulates at the price in force for each day, so a tariff
    // change never lowers the stored cost series.
    let (mut running, mut running_cost) = match last_marker {
        Some(m) => (m.cumulative_volume, m.cumulative_cost),
        None => (state.initial_reading, state.initial_reading * state.price_per_unit),
    };
    let points: Vec<CumulativePoint> = unique
        .into_iter()
        .map(|d| {
            let cost = d.volume * state.price_per_unit;
            running += d.volume;
            running_cost += cost;
            CumulativePoint {
                timestamp: d.timestamp,
                volume: d.volume,
                cost,
                cumulative_volume: running,
                cumulative_cost: running_cost,
            }
        })
        .collect();

    metrics::counter!("reconcile_points_emitted_total").increment(points.len() as u64);
    Ok(points)
}
