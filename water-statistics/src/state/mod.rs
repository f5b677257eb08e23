//! User-editable meter anchor and tariff.

pub mod memory;
pub mod pgwire;

use meter_client::domain::{MeterState, ReadingOrigin};
use rust_decimal::Decimal;
use std::sync::Arc;
use time::Date;

use crate::{
    pipeline::PipelineError,
    reconcile::{validate_price, validate_reading},
};

pub use memory::InMemoryEntityStore;
pub use pgwire::PgEntityStore;

/// Durable key/value storage for numeric settings.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_number(&self, entity_id: &str) -> Result<Option<Decimal>, PipelineError>;
    async fn set_number(&self, entity_id: &str, value: Decimal) -> Result<(), PipelineError>;
}

/// Reads and writes the [`MeterState`] of one meter through an [`EntityStore`].
#[derive(Clone)]
pub struct MeterStateManager {
    store: Arc<dyn EntityStore>,
    meter_id: String,
    default_price_per_unit: Decimal,
}

impl MeterStateManager {
    pub fn new(store: Arc<dyn EntityStore>, meter_id: impl Into<String>, default_price_per_unit: Decimal) -> Self {
        Self {
            store,
            meter_id: meter_id.into(),
            default_price_per_unit,
        }
    }

    pub fn meter_id(&self) -> &str {
        &self.meter_id
    }

    fn reading_id(&self) -> String {
        format!("initial_reading_{}", self.meter_id)
    }

    fn reading_date_id(&self) -> String {
        format!("initial_reading_date_{}", self.meter_id)
    }

    fn origin_id(&self) -> String {
        format!("initial_reading_origin_{}", self.meter_id)
    }

    fn price_id(&self) -> String {
        format!("cost_per_cubic_metre_{}", self.meter_id)
    }

    pub async fn get(&self) -> Result<MeterState, PipelineError> {
        let price_per_unit = self
            .store
            .get_number(&self.price_id())
            .await?
            .unwrap_or(self.default_price_per_unit);

        let reading = self.store.get_number(&self.reading_id()).await?;
        let julian = self.store.get_number(&self.reading_date_id()).await?;
        let origin_code = self.store.get_number(&self.origin_id()).await?;

        let (initial_reading, initial_reading_timestamp, origin) = match (reading, julian) {
            (Some(reading), Some(julian)) => {
                let date = decimal_to_date(julian)?;
                let origin = match origin_code {
                    Some(code) => decimal_to_origin(code)?,
                    // A reading without an origin was entered by hand.
                    None => ReadingOrigin::UserSet,
                };
                (reading, date, origin)
            }
            _ => (Decimal::ZERO, Date::MIN, ReadingOrigin::Unset),
        };

        Ok(MeterState {
            initial_reading,
            initial_reading_timestamp,
            price_per_unit,
            origin,
        })
    }

    /// Manual edit of the anchor. Backfill never overrides it afterwards.
    pub async fn set(&self, initial_reading: Decimal, initial_reading_timestamp: Date) -> Result<(), PipelineError> {
        validate_reading(initial_reading)?;
        self.write_anchor(initial_reading, initial_reading_timestamp, ReadingOrigin::UserSet)
            .await?;
        tracing::info!(
            meter_id = %self.meter_id,
            %initial_reading,
            date = %initial_reading_timestamp,
            "initial reading set by user"
        );
        Ok(())
    }

    pub async fn set_price(&self, price_per_unit: Decimal) -> Result<(), PipelineError> {
        validate_price(price_per_unit)?;
        self.store.set_number(&self.price_id(), price_per_unit).await?;
        tracing::info!(meter_id = %self.meter_id, %price_per_unit, "price per unit updated");
        Ok(())
    }

    /// Anchor written by a backfill. Returns `false` when a user edit is in place.
    pub async fn auto_initialize(
        &self,
        initial_reading: Decimal,
        initial_reading_timestamp: Date,
    ) -> Result<bool, PipelineError> {
        let current = self.get().await?;
        if current.origin == ReadingOrigin::UserSet {
            tracing::info!(
                meter_id = %self.meter_id,
                kept = %current.initial_reading,
                "initial reading was set by user, not auto-initializing"
            );
            return Ok(false);
        }

        validate_reading(initial_reading)?;
        self.write_anchor(initial_reading, initial_reading_timestamp, ReadingOrigin::AutoSet)
            .await?;
        tracing::info!(
            meter_id = %self.meter_id,
            %initial_reading,
            date = %initial_reading_timestamp,
            "auto-set initial reading"
        );
        Ok(true)
    }

    async fn write_anchor(&self, reading: Decimal, date: Date, origin: ReadingOrigin) -> Result<(), PipelineError> {
        self.store.set_number(&self.reading_id(), reading).await?;
        self.store
            .set_number(&self.reading_date_id(), Decimal::from(date.to_julian_day()))
            .await?;
        self.store
            .set_number(&self.origin_id(), Decimal::from(origin.code()))
            .await
    }
}

fn decimal_to_date(value: Decimal) -> Result<Date, PipelineError> {
    use rust_decimal::prelude::ToPrimitive;

    let julian = value
        .to_i32()
        .ok_or_else(|| PipelineError::InvalidState(format!("stored anchor date {value} is not a day number")))?;
    Date::from_julian_day(julian)
        .map_err(|e| PipelineError::InvalidState(format!("stored anchor date {value} out of range: {e}")))
}

fn decimal_to_origin(value: Decimal) -> Result<ReadingOrigin, PipelineError> {
    use rust_decimal::prelude::ToPrimitive;

    let code = value
        .to_i64()
        .ok_or_else(|| PipelineError::InvalidState(format!("stored reading origin {value} is not an integer")))?;
    ReadingOrigin::from_code(code).map_err(|e| PipelineError::InvalidState(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::date;

    fn manager() -> (Arc<InMemoryEntityStore>, MeterStateManager) {
        let store = Arc::new(InMemoryEntityStore::default());
        let mgr = MeterStateManager::new(store.clone(), "m-1", dec!(2.7346));
        (store, mgr)
    }

    #[tokio::test]
    async fn fresh_state_is_unset_with_default_price() {
        let (_, mgr) = manager();
        let s = mgr.get().await.unwrap();
        assert_eq!(s.origin, ReadingOrigin::Unset);
        assert_eq!(s.price_per_unit, dec!(2.7346));
    }

    #[tokio::test]
    async fn user_set_persists_under_meter_scoped_ids() {
        let (store, mgr) = manager();
        mgr.set(dec!(100.0), date!(2024 - 01 - 01)).await.unwrap();

        let s = mgr.get().await.unwrap();
        assert_eq!(s.initial_reading, dec!(100.0));
        assert_eq!(s.initial_reading_timestamp, date!(2024 - 01 - 01));
        assert_eq!(s.origin, ReadingOrigin::UserSet);
        assert_eq!(store.get_number("initial_reading_m-1").await.unwrap(), Some(dec!(100.0)));
    }

    #[tokio::test]
    async fn invalid_values_are_rejected_without_writing() {
        let (store, mgr) = manager();
        assert!(matches!(
            mgr.set(dec!(-1), date!(2024 - 01 - 01)).await,
            Err(PipelineError::InvalidState(_))
        ));
        assert!(matches!(mgr.set_price(dec!(0)).await, Err(PipelineError::InvalidState(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn auto_initialize_never_clobbers_user_edit() {
        let (_, mgr) = manager();
        assert!(mgr.auto_initialize(dec!(5), date!(2024 - 01 - 01)).await.unwrap());
        assert_eq!(mgr.get().await.unwrap().origin, ReadingOrigin::AutoSet);

        // A second automatic run may refresh its own value.
        assert!(mgr.auto_initialize(dec!(6), date!(2024 - 01 - 02)).await.unwrap());
        assert_eq!(mgr.get().await.unwrap().initial_reading, dec!(6));

        mgr.set(dec!(42), date!(2024 - 01 - 03)).await.unwrap();
        assert!(!mgr.auto_initialize(dec!(0), date!(2024 - 01 - 01)).await.unwrap());

        let s = mgr.get().await.unwrap();
        assert_eq!(s.initial_reading, dec!(42));
        assert_eq!(s.origin, ReadingOrigin::UserSet);
    }

    #[tokio::test]
    async fn price_update_is_read_back() {
        let (_, mgr) = manager();
        mgr.set_price(dec!(3.1)).await.unwrap();
        assert_eq!(mgr.get().await.unwrap().price_per_unit, dec!(3.1));
    }
}
