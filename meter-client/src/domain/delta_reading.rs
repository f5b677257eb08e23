use rust_decimal::Decimal;
use time::Date;

/// Consumption for one reporting period, in cubic metres.
///
/// `timestamp` is the day the period ends on. `reading` is the absolute
/// register value at the end of the period when the upstream API reports it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeltaReading {
    pub timestamp: Date,
    pub volume: Decimal,
    #[serde(default)]
    pub reading: Option<Decimal>,
}

impl DeltaReading {
    pub fn new(timestamp: Date, volume: Decimal) -> Self {
        Self {
            timestamp,
            volume,
            reading: None,
        }
    }

    pub fn with_reading(mut self, reading: Decimal) -> Self {
        self.reading = Some(reading);
        self
    }

    /// Register value immediately before this period, if the source told us.
    pub fn baseline(&self) -> Option<Decimal> {
        self.reading.map(|r| r - self.volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::date;

    #[test]
    fn baseline_subtracts_period_volume_from_register() {
        let d = DeltaReading::new(date!(2024 - 01 - 02), dec!(1.5)).with_reading(dec!(101.5));
        assert_eq!(d.baseline(), Some(dec!(100.0)));
    }

    #[test]
    fn baseline_is_none_without_register_value() {
        let d = DeltaReading::new(date!(2024 - 01 - 02), dec!(1.5));
        assert_eq!(d.baseline(), None);
    }

    #[test]
    fn missing_reading_deserializes_as_none() {
        let d: DeltaReading =
            serde_json::from_str(r#"{"timestamp":"2024-01-02","volume":"1.5"}"#).unwrap();
        assert_eq!(d.timestamp, date!(2024 - 01 - 02));
        assert_eq!(d.volume, dec!(1.5));
        assert!(d.reading.is_none());
    }
}
