//! Daily identity store statistics

use crate::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Counters recomputed by `update_stats`, as (stat name, query)
const STAT_QUERIES: &[(&str, &str)] = &[
    ("track.count", "SELECT COUNT(*) FROM track"),
    ("fingerprint.count", "SELECT COUNT(*) FROM fingerprint"),
    ("track_mbid.count", "SELECT COUNT(*) FROM track_mbid"),
    ("mbid.count", "SELECT COUNT(DISTINCT mbid) FROM track_mbid"),
    ("track_puid.count", "SELECT COUNT(*) FROM track_puid"),
    ("puid.count", "SELECT COUNT(DISTINCT puid) FROM track_puid"),
    ("foreignid.count", "SELECT COUNT(*) FROM foreignid"),
];

/// Recompute the counters and store them under `date`
pub async fn update_stats(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<(String, i64)>> {
    let date_str = date.format("%Y-%m-%d").to_string();
    let mut results = Vec::with_capacity(STAT_QUERIES.len());

    for &(name, sql) in STAT_QUERIES {
        let value: i64 = sqlx::query_scalar(sql).fetch_one(pool).await?;

        sqlx::query(
            r#"
            INSERT INTO stats (name, date, value) VALUES (?, ?, ?)
            ON CONFLICT (name, date) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(name)
        .bind(&date_str)
        .bind(value)
        .execute(pool)
        .await?;

        debug!(stat = name, value, "Updated stat");
        results.push((name.to_string(), value));
    }

    info!("Updated {} stats for {}", results.len(), date_str);
    Ok(results)
}

/// Stored counters for `date`, ordered by name
pub async fn load_stats(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<(String, i64)>> {
    Ok(
        sqlx::query_as::<_, (String, i64)>("SELECT name, value FROM stats WHERE date = ? ORDER BY name")
            .bind(date.format("%Y-%m-%d").to_string())
            .fetch_all(pool)
            .await?,
    )
}
