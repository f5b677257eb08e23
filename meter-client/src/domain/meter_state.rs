use rust_decimal::Decimal;
use time::Date;

/// Who last wrote the initial meter reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingOrigin {
    #[default]
    Unset,
    AutoSet,
    UserSet,
}

#[derive(thiserror::Error, Debug)]
#[error("unknown reading origin code {0}")]
pub struct UnknownReadingOrigin(pub i64);

impl ReadingOrigin {
    pub fn code(self) -> i64 {
        match self {
            Self::Unset => 0,
            Self::AutoSet => 1,
            Self::UserSet => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, UnknownReadingOrigin> {
        match code {
            0 => Ok(Self::Unset),
            1 => Ok(Self::AutoSet),
            2 => Ok(Self::UserSet),
            other => Err(UnknownReadingOrigin(other)),
        }
    }
}

/// The anchor every cumulative value is computed from, plus the tariff.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MeterState {
    pub initial_reading: Decimal,
    pub initial_reading_timestamp: Date,
    pub price_per_unit: Decimal,
    pub origin: ReadingOrigin,
}

impl MeterState {
    pub fn is_anchored(&self) -> bool {
        self.origin != ReadingOrigin::Unset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_codes_round_trip_and_reject_unknown() {
        for origin in [ReadingOrigin::Unset, ReadingOrigin::AutoSet, ReadingOrigin::UserSet] {
            assert_eq!(ReadingOrigin::from_code(origin.code()).unwrap(), origin);
        }
        assert!(ReadingOrigin::from_code(7).is_err());
    }
}
