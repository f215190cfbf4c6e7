//! Track and fingerprint persistence

use super::models::{Fingerprint, FingerprintId, TrackId};
use crate::Result;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use tracing::debug;

/// Insert a new track into the database
pub async fn insert_track(pool: &SqlitePool) -> Result<TrackId> {
    let id = sqlx::query("INSERT INTO track DEFAULT VALUES")
        .execute(pool)
        .await?
        .last_insert_rowid();

    debug!("Inserted track {}", id);
    Ok(id)
}

pub async fn track_exists(pool: &SqlitePool, track_id: TrackId) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM track WHERE id = ?")
        .bind(track_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Attach a fingerprint payload to a track
pub async fn insert_fingerprint(
    pool: &SqlitePool,
    track_id: TrackId,
    payload: &[u8],
) -> Result<FingerprintId> {
    let id = sqlx::query("INSERT INTO fingerprint (track_id, fingerprint) VALUES (?, ?)")
        .bind(track_id)
        .bind(payload)
        .execute(pool)
        .await?
        .last_insert_rowid();

    debug!("Inserted fingerprint {} for track {}", id, track_id);
    Ok(id)
}

/// All fingerprints owned by a track, ordered by id
pub async fn load_fingerprints(pool: &SqlitePool, track_id: TrackId) -> Result<Vec<Fingerprint>> {
    let rows: Vec<(i64, i64, Vec<u8>)> = sqlx::query_as(
        "SELECT id, track_id, fingerprint FROM fingerprint WHERE track_id = ? ORDER BY id",
    )
    .bind(track_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, track_id, payload)| Fingerprint {
            id,
            track_id,
            payload,
        })
        .collect())
}

/// Lookup MBIDs for the given track ids
pub async fn lookup_mbids(
    pool: &SqlitePool,
    track_ids: &[TrackId],
) -> Result<HashMap<TrackId, Vec<String>>> {
    if track_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new("SELECT track_id, mbid FROM track_mbid WHERE track_id IN ");
    push_in_list(&mut query, track_ids.iter().copied());
    query.push(" ORDER BY mbid");

    let rows: Vec<(i64, String)> = query.build_query_as().fetch_all(pool).await?;

    let mut results: HashMap<TrackId, Vec<String>> = HashMap::new();
    for (track_id, mbid) in rows {
        results.entry(track_id).or_default().push(mbid);
    }
    Ok(results)
}

/// Lookup tracks bound to the given MBIDs
pub async fn lookup_tracks(
    pool: &SqlitePool,
    mbids: &[String],
) -> Result<HashMap<String, Vec<TrackId>>> {
    if mbids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new("SELECT track_id, mbid FROM track_mbid WHERE mbid IN ");
    push_in_list(&mut query, mbids.iter().cloned());
    query.push(" ORDER BY track_id");

    let rows: Vec<(i64, String)> = query.build_query_as().fetch_all(pool).await?;

    let mut results: HashMap<String, Vec<TrackId>> = HashMap::new();
    for (track_id, mbid) in rows {
        results.entry(mbid).or_default().push(track_id);
    }
    Ok(results)
}

/// Append `(?, ?, ...)` with one bind per value
pub(crate) fn push_in_list<'args, T, I>(query: &mut QueryBuilder<'args, Sqlite>, values: I)
where
    I: IntoIterator<Item = T>,
    T: 'args + sqlx::Encode<'args, Sqlite> + sqlx::Type<Sqlite> + Send,
{
    query.push("(");
    let mut separated = query.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::bindings::insert_mbid;
    use crate::db::init::test_support::test_pool;

    const MBID_A: &str = "11111111-1111-1111-1111-111111111111";
    const MBID_B: &str = "22222222-2222-2222-2222-222222222222";

    #[tokio::test]
    async fn test_insert_track_and_fingerprints() {
        let (_dir, pool) = test_pool().await;

        let track = insert_track(&pool).await.unwrap();
        assert!(track_exists(&pool, track).await.unwrap());
        assert!(!track_exists(&pool, track + 100).await.unwrap());

        let fp1 = insert_fingerprint(&pool, track, &[1, 2, 3, 4]).await.unwrap();
        let fp2 = insert_fingerprint(&pool, track, &[5, 6, 7, 8]).await.unwrap();

        let fingerprints = load_fingerprints(&pool, track).await.unwrap();
        assert_eq!(fingerprints.len(), 2);
        assert_eq!(fingerprints[0].id, fp1);
        assert_eq!(fingerprints[1].id, fp2);
        assert_eq!(fingerprints[1].payload, vec![5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_fingerprint_requires_existing_track() {
        let (_dir, pool) = test_pool().await;
        assert!(insert_fingerprint(&pool, 42, &[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_lookup_mbids_and_tracks() {
        let (_dir, pool) = test_pool().await;
        let t1 = insert_track(&pool).await.unwrap();
        let t2 = insert_track(&pool).await.unwrap();

        insert_mbid(&pool, t1, MBID_B).await.unwrap();
        insert_mbid(&pool, t1, MBID_A).await.unwrap();
        insert_mbid(&pool, t2, MBID_A).await.unwrap();

        let mbids = lookup_mbids(&pool, &[t1, t2]).await.unwrap();
        assert_eq!(mbids[&t1], vec![MBID_A.to_string(), MBID_B.to_string()]);
        assert_eq!(mbids[&t2], vec![MBID_A.to_string()]);

        let tracks = lookup_tracks(&pool, &[MBID_A.to_string()]).await.unwrap();
        assert_eq!(tracks[MBID_A], vec![t1, t2]);

        assert!(lookup_mbids(&pool, &[]).await.unwrap().is_empty());
        assert!(lookup_tracks(&pool, &[]).await.unwrap().is_empty());
    }
}
