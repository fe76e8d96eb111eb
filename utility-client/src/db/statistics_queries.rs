use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::domain::{SeriesMetadata, StatPoint};

/// Create the statistics tables if they do not exist yet. Points are keyed
/// by `(series_id, start)` so rewrites of an hour update in place.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statistics_meta (
            series_id TEXT PRIMARY KEY,
            name      TEXT NOT NULL,
            unit      TEXT NOT NULL,
            has_sum   BOOLEAN NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statistics (
            series_id TEXT NOT NULL,
            start     TIMESTAMPTZ NOT NULL,
            sum       DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (series_id, start)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Last stored cumulative sum strictly before `before`, if any. The cutoff
/// is what keeps overlapping rewrites reproducible: a batch always continues
/// from the sum preceding its own earliest hour.
pub async fn last_cumulative_before(
    pool: &PgPool,
    series_id: &str,
    before: OffsetDateTime,
) -> Result<Option<f64>> {
    let row: Option<(f64,)> = sqlx::query_as(
        r#"
        SELECT sum
        FROM statistics
        WHERE series_id = $1
          AND start < $2
        ORDER BY start DESC
        LIMIT 1
        "#,
    )
    .bind(series_id)
    .bind(before)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.0))
}

pub async fn upsert_metadata(pool: &PgPool, meta: &SeriesMetadata) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO statistics_meta (series_id, name, unit, has_sum)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (series_id) DO UPDATE
        SET name = EXCLUDED.name,
            unit = EXCLUDED.unit,
            has_sum = EXCLUDED.has_sum
        "#,
    )
    .bind(&meta.id)
    .bind(&meta.name)
    .bind(&meta.unit)
    .bind(meta.has_sum)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn upsert_points(
    pool: &PgPool,
    series_id: &str,
    points: &[StatPoint],
) -> Result<()> {
    if points.is_empty() {
        return Ok(());
    }

    let mut builder =
        QueryBuilder::<Postgres>::new("INSERT INTO statistics (series_id, start, sum) ");
    builder.push_values(points, |mut b, p| {
        b.push_bind(series_id).push_bind(p.start).push_bind(p.sum);
    });
    builder.push(" ON CONFLICT (series_id, start) DO UPDATE SET sum = EXCLUDED.sum");

    builder.build().execute(pool).await?;
    Ok(())
}
