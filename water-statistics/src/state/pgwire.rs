use meter_client::db::entity_queries;
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::EntityStore;
use crate::pipeline::PipelineError;

/// Entity numbers kept in the `entity_numbers` table.
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EntityStore for PgEntityStore {
    async fn get_number(&self, entity_id: &str) -> Result<Option<Decimal>, PipelineError> {
        entity_queries::get_number(&self.pool, entity_id).await.map_err(|e| {
            tracing::error!(error = %e, entity_id, "entity store read failed");
            PipelineError::Transport(format!("failed to read {entity_id}: {e}"))
        })
    }

    async fn set_number(&self, entity_id: &str, value: Decimal) -> Result<(), PipelineError> {
        entity_queries::set_number(&self.pool, entity_id, value).await.map_err(|e| {
            tracing::error!(error = %e, entity_id, "entity store write failed");
            PipelineError::Publish(format!("failed to write {entity_id}: {e}"))
        })
    }
}
