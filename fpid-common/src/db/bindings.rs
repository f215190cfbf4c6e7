//! Idempotent track bindings
//!
//! A binding ties a track to an external identifier. Re-submitting an
//! existing binding bumps its `submission_count` instead of adding a row.
//! The lookup and the increment are a single `INSERT ... ON CONFLICT`
//! statement, so two concurrent submissions of the same pair can never both
//! insert.

use super::foreignid::find_or_insert_foreignid;
use super::models::{AttachOutcome, BindingValue, TrackId};
use crate::{Error, Result};
use sqlx::error::ErrorKind;
use sqlx::SqlitePool;
use tracing::debug;

/// Attach `value` to `track_id`, or bump the count if already attached
pub async fn attach_binding(
    pool: &SqlitePool,
    track_id: TrackId,
    value: &BindingValue,
) -> Result<AttachOutcome> {
    let namespace = value.namespace();
    let sql = format!(
        "INSERT INTO {table} (track_id, {column}, submission_count) VALUES (?, ?, 1) \
         ON CONFLICT (track_id, {column}) DO UPDATE SET submission_count = submission_count + 1 \
         RETURNING submission_count",
        table = namespace.table(),
        column = namespace.column(),
    );

    let query = sqlx::query_scalar::<_, i64>(&sql).bind(track_id);
    let query = match value {
        BindingValue::Mbid(v) | BindingValue::Puid(v) => query.bind(v.as_str()),
        BindingValue::ForeignId(id) => query.bind(*id),
    };

    let submission_count = query
        .fetch_one(pool)
        .await
        .map_err(|e| upsert_error(e, track_id, value))?;

    // Counts start at 1 and only ever grow, so 1 means we just inserted
    let already_existed = submission_count > 1;
    if !already_existed {
        debug!("Added {} {} to track {}", namespace, value, track_id);
    }

    Ok(AttachOutcome {
        already_existed,
        submission_count,
    })
}

/// Returns true when the MBID binding was newly created
pub async fn insert_mbid(pool: &SqlitePool, track_id: TrackId, mbid: &str) -> Result<bool> {
    let outcome = attach_binding(pool, track_id, &BindingValue::mbid(mbid)?).await?;
    Ok(!outcome.already_existed)
}

/// Returns true when the PUID binding was newly created
pub async fn insert_puid(pool: &SqlitePool, track_id: TrackId, puid: &str) -> Result<bool> {
    let outcome = attach_binding(pool, track_id, &BindingValue::puid(puid)?).await?;
    Ok(!outcome.already_existed)
}

/// Resolve `vendor:name` and bind it to the track.
///
/// Returns true when the binding was newly created.
pub async fn insert_foreignid(pool: &SqlitePool, track_id: TrackId, full_name: &str) -> Result<bool> {
    let foreignid_id = find_or_insert_foreignid(pool, full_name).await?;
    let outcome = attach_binding(pool, track_id, &BindingValue::ForeignId(foreignid_id)).await?;
    Ok(!outcome.already_existed)
}

/// Current submission count of a binding, if it exists
pub async fn submission_count(
    pool: &SqlitePool,
    track_id: TrackId,
    value: &BindingValue,
) -> Result<Option<i64>> {
    let namespace = value.namespace();
    let sql = format!(
        "SELECT submission_count FROM {} WHERE track_id = ? AND {} = ?",
        namespace.table(),
        namespace.column(),
    );

    let query = sqlx::query_scalar::<_, i64>(&sql).bind(track_id);
    let query = match value {
        BindingValue::Mbid(v) | BindingValue::Puid(v) => query.bind(v.as_str()),
        BindingValue::ForeignId(id) => query.bind(*id),
    };

    Ok(query.fetch_optional(pool).await?)
}

fn upsert_error(err: sqlx::Error, track_id: TrackId, value: &BindingValue) -> Error {
    let rejected = err
        .as_database_error()
        .map(|db| matches!(db.kind(), ErrorKind::ForeignKeyViolation | ErrorKind::CheckViolation))
        .unwrap_or(false);

    if rejected {
        Error::BindingConflict(format!(
            "cannot bind {} {} to track {}: {}",
            value.namespace(),
            value,
            track_id,
            err
        ))
    } else {
        Error::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::test_support::test_pool;
    use crate::db::tracks::insert_track;

    const MBID: &str = "b81f83ee-4da4-11e0-9ed8-0025225356f3";
    const PUID: &str = "3ba40a3d-9a2b-4e2c-a1b4-6f4ee1e2a0c7";

    #[tokio::test]
    async fn test_first_attach_creates_then_increments() {
        let (_dir, pool) = test_pool().await;
        let track = insert_track(&pool).await.unwrap();
        let value = BindingValue::mbid(MBID).unwrap();

        let first = attach_binding(&pool, track, &value).await.unwrap();
        assert!(!first.already_existed);
        assert_eq!(first.submission_count, 1);

        let second = attach_binding(&pool, track, &value).await.unwrap();
        assert!(second.already_existed);
        assert_eq!(second.submission_count, 2);

        assert_eq!(submission_count(&pool, track, &value).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_mbid_and_puid_namespaces_are_independent() {
        let (_dir, pool) = test_pool().await;
        let track = insert_track(&pool).await.unwrap();

        assert!(insert_mbid(&pool, track, MBID).await.unwrap());
        assert!(insert_puid(&pool, track, MBID).await.unwrap());
        assert!(insert_puid(&pool, track, PUID).await.unwrap());
        assert!(!insert_puid(&pool, track, PUID).await.unwrap());

        let puid = BindingValue::puid(PUID).unwrap();
        assert_eq!(submission_count(&pool, track, &puid).await.unwrap(), Some(2));
        let mbid = BindingValue::mbid(MBID).unwrap();
        assert_eq!(submission_count(&pool, track, &mbid).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_uppercase_mbid_hits_same_binding() {
        let (_dir, pool) = test_pool().await;
        let track = insert_track(&pool).await.unwrap();

        assert!(insert_mbid(&pool, track, MBID).await.unwrap());
        assert!(!insert_mbid(&pool, track, &MBID.to_uppercase()).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_track_is_binding_conflict() {
        let (_dir, pool) = test_pool().await;
        let value = BindingValue::mbid(MBID).unwrap();

        let result = attach_binding(&pool, 12345, &value).await;
        assert!(matches!(result, Err(Error::BindingConflict(_))), "got {:?}", result);
    }

    #[tokio::test]
    async fn test_foreignid_binding() {
        let (_dir, pool) = test_pool().await;
        let track = insert_track(&pool).await.unwrap();

        assert!(insert_foreignid(&pool, track, "spotify:4uLU6hMCjMI75M1A2tKUQC").await.unwrap());
        assert!(!insert_foreignid(&pool, track, "spotify:4uLU6hMCjMI75M1A2tKUQC").await.unwrap());
        assert!(insert_foreignid(&pool, track, "deezer:3135556").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_attach_never_duplicates() {
        let (_dir, pool) = test_pool().await;
        let track = insert_track(&pool).await.unwrap();
        let value = BindingValue::mbid(MBID).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let value = value.clone();
            handles.push(tokio::spawn(async move {
                attach_binding(&pool, track, &value).await
            }));
        }

        let mut created = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            if !outcome.already_existed {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM track_mbid WHERE track_id = ?")
            .bind(track)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(submission_count(&pool, track, &value).await.unwrap(), Some(8));
    }
}
