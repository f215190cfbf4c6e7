//! Vendor-namespaced foreign identifiers (`vendor:name`)

use super::models::ForeignIdId;
use crate::{Error, Result};
use sqlx::SqlitePool;
use tracing::info;

/// Split `vendor:name` on the first colon
pub fn parse_foreignid(full_name: &str) -> Result<(&str, &str)> {
    match full_name.split_once(':') {
        Some((vendor, name)) if !vendor.is_empty() && !name.is_empty() => Ok((vendor, name)),
        _ => Err(Error::InvalidInput(format!(
            "foreign ID must look like vendor:name, got {:?}",
            full_name
        ))),
    }
}

/// Format a foreign identifier by id as `vendor:name`
pub async fn get_foreignid(pool: &SqlitePool, id: ForeignIdId) -> Result<String> {
    let row: Option<(String, String)> = sqlx::query_as(
        r#"
        SELECT v.name, f.name
        FROM foreignid f
        JOIN foreignid_vendor v ON v.id = f.vendor_id
        WHERE f.id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((vendor, name)) => Ok(format!("{}:{}", vendor, name)),
        None => Err(Error::NotFound(format!("foreign ID {}", id))),
    }
}

pub async fn find_or_insert_foreignid_vendor(pool: &SqlitePool, name: &str) -> Result<i64> {
    if let Some(id) = find_vendor(pool, name).await? {
        return Ok(id);
    }

    // A concurrent caller may win the insert; DO NOTHING plus re-select
    // returns whichever row ended up stored.
    let inserted = sqlx::query("INSERT INTO foreignid_vendor (name) VALUES (?) ON CONFLICT (name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;

    let id = find_vendor(pool, name)
        .await?
        .ok_or_else(|| Error::Internal(format!("vendor {} vanished after insert", name)))?;

    if inserted.rows_affected() == 1 {
        info!("Inserted foreign ID vendor {} with name {}", id, name);
    }
    Ok(id)
}

pub async fn find_or_insert_foreignid(pool: &SqlitePool, full_name: &str) -> Result<ForeignIdId> {
    let (vendor, name) = parse_foreignid(full_name)?;
    let vendor_id = find_or_insert_foreignid_vendor(pool, vendor).await?;

    if let Some(id) = find_foreignid(pool, vendor_id, name).await? {
        return Ok(id);
    }

    let inserted = sqlx::query(
        "INSERT INTO foreignid (vendor_id, name) VALUES (?, ?) ON CONFLICT (vendor_id, name) DO NOTHING",
    )
    .bind(vendor_id)
    .bind(name)
    .execute(pool)
    .await?;

    let id = find_foreignid(pool, vendor_id, name)
        .await?
        .ok_or_else(|| Error::Internal(format!("foreign ID {} vanished after insert", full_name)))?;

    if inserted.rows_affected() == 1 {
        info!("Inserted foreign ID {} with name {}", id, full_name);
    }
    Ok(id)
}

async fn find_vendor(pool: &SqlitePool, name: &str) -> Result<Option<i64>> {
    Ok(sqlx::query_scalar::<_, i64>("SELECT id FROM foreignid_vendor WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?)
}

async fn find_foreignid(pool: &SqlitePool, vendor_id: i64, name: &str) -> Result<Option<ForeignIdId>> {
    Ok(sqlx::query_scalar::<_, i64>("SELECT id FROM foreignid WHERE vendor_id = ? AND name = ?")
        .bind(vendor_id)
        .bind(name)
        .fetch_optional(pool)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::test_support::test_pool;

    #[test]
    fn test_parse_splits_on_first_colon() {
        assert_eq!(parse_foreignid("isrc:GB:AAA:01").unwrap(), ("isrc", "GB:AAA:01"));
        assert!(parse_foreignid("no-colon").is_err());
        assert!(parse_foreignid(":name").is_err());
        assert!(parse_foreignid("vendor:").is_err());
    }

    #[tokio::test]
    async fn test_find_or_insert_is_stable() {
        let (_dir, pool) = test_pool().await;

        let a = find_or_insert_foreignid(&pool, "spotify:abc").await.unwrap();
        let b = find_or_insert_foreignid(&pool, "spotify:abc").await.unwrap();
        let c = find_or_insert_foreignid(&pool, "spotify:def").await.unwrap();
        let d = find_or_insert_foreignid(&pool, "deezer:abc").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let vendors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM foreignid_vendor")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(vendors, 2);

        assert_eq!(get_foreignid(&pool, c).await.unwrap(), "spotify:def");
        assert_eq!(get_foreignid(&pool, d).await.unwrap(), "deezer:abc");
    }

    #[tokio::test]
    async fn test_get_missing_foreignid() {
        let (_dir, pool) = test_pool().await;
        assert!(matches!(get_foreignid(&pool, 7).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_find_or_insert() {
        let (_dir, pool) = test_pool().await;

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                find_or_insert_foreignid(&pool, "musicbrainz:shared").await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }
}
