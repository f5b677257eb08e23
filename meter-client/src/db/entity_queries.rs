use anyhow::Result;
use rust_decimal::Decimal;
use sqlx::PgPool;

/// Read a user-editable number by entity id.
pub async fn get_number(pool: &PgPool, entity_id: &str) -> Result<Option<Decimal>> {
    let value: Option<Decimal> =
        sqlx::query_scalar("SELECT value FROM entity_numbers WHERE entity_id = $1")
            .bind(entity_id)
            .fetch_optional(pool)
            .await?;

    Ok(value)
}

/// Insert or replace a user-editable number.
pub async fn set_number(pool: &PgPool, entity_id: &str, value: Decimal) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO entity_numbers (entity_id, value, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (entity_id)
        DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(entity_id)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}
