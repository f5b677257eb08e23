use rust_decimal::Decimal;
use time::Date;

/// One point of the published consumption/cost series.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CumulativePoint {
    pub timestamp: Date,
    /// Volume consumed in the period ending at `timestamp`.
    pub volume: Decimal,
    /// Cost of `volume` at the tariff used for this point.
    pub cost: Decimal,
    pub cumulative_volume: Decimal,
    pub cumulative_cost: Decimal,
}

impl CumulativePoint {
    pub fn marker(&self) -> LastPublishedMarker {
        LastPublishedMarker {
            timestamp: self.timestamp,
            cumulative_volume: self.cumulative_volume,
            cumulative_cost: self.cumulative_cost,
        }
    }
}

/// A stored point of the series, usually its tail.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LastPublishedMarker {
    pub timestamp: Date,
    pub cumulative_volume: Decimal,
    pub cumulative_cost: Decimal,
}

/// A row of the `long_term_statistics` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StatisticRow {
    pub statistic_id: String,
    pub ts: Date,
    pub state: Decimal,
    pub sum: Decimal,
}

impl StatisticRow {
    /// Marker from a consumption row and the cost row of the same day.
    pub fn marker(&self, cost: &StatisticRow) -> LastPublishedMarker {
        LastPublishedMarker {
            timestamp: self.ts,
            cumulative_volume: self.sum,
            cumulative_cost: cost.sum,
        }
    }
}
