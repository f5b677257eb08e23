use std::{collections::HashMap, sync::Mutex};

use rust_decimal::Decimal;

use super::EntityStore;
use crate::pipeline::PipelineError;

/// Process-local entity store, for tests and dry runs.
#[derive(Default)]
pub struct InMemoryEntityStore {
    values: Mutex<HashMap<String, Decimal>>,
}

impl InMemoryEntityStore {
    pub fn is_empty(&self) -> bool {
        self.values.lock().map(|v| v.is_empty()).unwrap_or(true)
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_number(&self, entity_id: &str) -> Result<Option<Decimal>, PipelineError> {
        let values = self
            .values
            .lock()
            .map_err(|_| PipelineError::InvalidState("entity store lock poisoned".to_string()))?;
        Ok(values.get(entity_id).copied())
    }

    async fn set_number(&self, entity_id: &str, value: Decimal) -> Result<(), PipelineError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| PipelineError::InvalidState("entity store lock poisoned".to_string()))?;
        values.insert(entity_id.to_string(), value);
        Ok(())
    }
}
