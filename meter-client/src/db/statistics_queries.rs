use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::Date;

use crate::domain::StatisticRow;

/// Latest stored row for one statistic series.
pub async fn last_statistic(pool: &PgPool, statistic_id: &str) -> Result<Option<StatisticRow>> {
    let row = sqlx::query_as::<_, StatisticRow>(
        r#"
        SELECT
            statistic_id,
            ts,
            state,
            sum
        FROM long_term_statistics
        WHERE statistic_id = $1
        ORDER BY ts DESC
        LIMIT 1
        "#,
    )
    .bind(statistic_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Row of one series on exactly `ts`.
pub async fn statistic_at(pool: &PgPool, statistic_id: &str, ts: Date) -> Result<Option<StatisticRow>> {
    let row = sqlx::query_as::<_, StatisticRow>(
        r#"
        SELECT
            statistic_id,
            ts,
            state,
            sum
        FROM long_term_statistics
        WHERE statistic_id = $1
          AND ts = $2
        "#,
    )
    .bind(statistic_id)
    .bind(ts)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Latest row of one series strictly before `ts`.
pub async fn statistic_before(pool: &PgPool, statistic_id: &str, ts: Date) -> Result<Option<StatisticRow>> {
    let row = sqlx::query_as::<_, StatisticRow>(
        r#"
        SELECT
            statistic_id,
            ts,
            state,
            sum
        FROM long_term_statistics
        WHERE statistic_id = $1
          AND ts < $2
        ORDER BY ts DESC
        LIMIT 1
        "#,
    )
    .bind(statistic_id)
    .bind(ts)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Earliest row of one series strictly after `ts`.
pub async fn statistic_after(pool: &PgPool, statistic_id: &str, ts: Date) -> Result<Option<StatisticRow>> {
    let row = sqlx::query_as::<_, StatisticRow>(
        r#"
        SELECT
            statistic_id,
            ts,
            state,
            sum
        FROM long_term_statistics
        WHERE statistic_id = $1
          AND ts > $2
        ORDER BY ts
        LIMIT 1
        "#,
    )
    .bind(statistic_id)
    .bind(ts)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Write a batch of rows in a single transaction.
///
/// With `overwrite`, every existing row of the touched series inside the
/// batch's date range is deleted first, so repeating the same batch leaves
/// the table unchanged.
pub async fn write_statistics(pool: &PgPool, rows: &[StatisticRow], overwrite: bool) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    if overwrite {
        let mut ids: Vec<String> = rows.iter().map(|r| r.statistic_id.clone()).collect();
        ids.sort_unstable();
        ids.dedup();

        // Both bounds exist because rows is non-empty.
        let start = rows.iter().map(|r| r.ts).min().unwrap_or(Date::MIN);
        let end = rows.iter().map(|r| r.ts).max().unwrap_or(Date::MAX);

        sqlx::query(
            r#"
            DELETE FROM long_term_statistics
            WHERE statistic_id = ANY($1)
              AND ts >= $2
              AND ts <= $3
            "#,
        )
        .bind(&ids)
        .bind(start)
        .bind(end)
        .execute(&mut *tx)
        .await?;
    }

    let mut builder =
        QueryBuilder::<Postgres>::new("INSERT INTO long_term_statistics (statistic_id, ts, state, sum) ");
    builder.push_values(rows, |mut b, row| {
        b.push_bind(&row.statistic_id)
            .push_bind(row.ts)
            .push_bind(row.state)
            .push_bind(row.sum);
    });
    builder.build().execute(&mut *tx).await?;

    tx.commit().await?;
    Ok(())
}
