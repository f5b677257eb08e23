mod delta_reading;
mod meter_state;
mod statistics;

pub use delta_reading::DeltaReading;
pub use meter_state::{MeterState, ReadingOrigin, UnknownReadingOrigin};
pub use statistics::{CumulativePoint, LastPublishedMarker, StatisticRow};
