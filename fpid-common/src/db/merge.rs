//! Track and MBID merges
//!
//! Both merges fold one or more source identities into a target while
//! keeping the union of their bindings. Each call is one `BEGIN IMMEDIATE`
//! transaction: either every step lands or none does.
//!
//! Known gap: merging tracks only re-points fingerprints to the target.
//! Fingerprints with identical payloads are not collapsed.

use super::models::{canonical_uuid, BindingValue, Namespace, TrackId};
use super::tracks::push_in_list;
use super::transaction::ImmediateTransaction;
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// What a merge changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Bindings the target gained
    pub bindings_moved: u64,
    /// Source binding rows deleted
    pub bindings_removed: u64,
    pub fingerprints_moved: u64,
    pub tracks_deleted: u64,
}

impl MergeSummary {
    pub fn is_empty(&self) -> bool {
        *self == MergeSummary::default()
    }
}

/// Merge the source MBIDs into `target_mbid`.
///
/// Every track bound to a source MBID ends up bound to the target MBID
/// (carrying the source submission counts), and the source bindings are
/// deleted.
pub async fn merge_mbids(
    pool: &SqlitePool,
    target_mbid: &str,
    source_mbids: &[String],
) -> Result<MergeSummary> {
    let target = canonical_uuid(target_mbid, Namespace::Mbid)?;
    let mut sources = source_mbids
        .iter()
        .map(|mbid| canonical_uuid(mbid, Namespace::Mbid))
        .collect::<Result<Vec<_>>>()?;
    sources.sort();
    sources.dedup();
    sources.retain(|mbid| *mbid != target);

    if sources.is_empty() {
        debug!("Nothing to merge into MBID {}", target);
        return Ok(MergeSummary::default());
    }

    info!("Merging MBIDs {} into {}", sources.join(", "), target);

    let mut tx = ImmediateTransaction::begin(pool).await?;
    let result = merge_mbids_in(tx.conn()?, &target, &sources).await;
    let summary = tx.finish(result).await?;

    info!(
        bindings_moved = summary.bindings_moved,
        bindings_removed = summary.bindings_removed,
        "Merged MBIDs into {}",
        target
    );
    Ok(summary)
}

async fn merge_mbids_in(
    conn: &mut SqliteConnection,
    target: &str,
    sources: &[String],
) -> Result<MergeSummary> {
    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT track_id, mbid, submission_count FROM track_mbid WHERE mbid IN ",
    );
    push_in_list(
        &mut query,
        sources.iter().map(String::as_str).chain(std::iter::once(target)),
    );
    let rows: Vec<(TrackId, String, i64)> = query.build_query_as().fetch_all(&mut *conn).await?;

    let mut target_track_ids = BTreeSet::new();
    let mut source_counts: BTreeMap<TrackId, i64> = BTreeMap::new();
    for (track_id, mbid, count) in rows {
        if mbid == target {
            target_track_ids.insert(track_id);
        } else {
            *source_counts.entry(track_id).or_insert(0) += count;
        }
    }

    let mut summary = MergeSummary::default();
    let target_value = BindingValue::Mbid(target.to_string());
    for (track_id, count) in source_counts {
        fold_binding(conn, track_id, &target_value, count).await?;
        if !target_track_ids.contains(&track_id) {
            summary.bindings_moved += 1;
        }
    }

    let mut delete = QueryBuilder::<Sqlite>::new("DELETE FROM track_mbid WHERE mbid IN ");
    push_in_list(&mut delete, sources.iter().map(String::as_str));
    summary.bindings_removed = delete.build().execute(&mut *conn).await?.rows_affected();

    Ok(summary)
}

/// Merge the source tracks into `target_id`.
///
/// The target gains every MBID, PUID and foreign ID binding of the sources,
/// all source fingerprints are re-pointed to the target, and the source
/// tracks are deleted. Merging a track into itself, merging an empty list,
/// or re-running a completed merge changes nothing.
pub async fn merge_tracks(
    pool: &SqlitePool,
    target_id: TrackId,
    source_ids: &[TrackId],
) -> Result<MergeSummary> {
    let mut sources: Vec<TrackId> = source_ids.to_vec();
    sources.sort_unstable();
    sources.dedup();
    sources.retain(|id| *id != target_id);

    if sources.is_empty() {
        debug!("Nothing to merge into track {}", target_id);
        return Ok(MergeSummary::default());
    }

    info!(
        "Merging tracks {} into {}",
        sources.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", "),
        target_id
    );

    let mut tx = ImmediateTransaction::begin(pool).await?;
    let result = merge_tracks_in(tx.conn()?, target_id, &sources).await;
    let summary = tx.finish(result).await?;

    info!(
        bindings_moved = summary.bindings_moved,
        fingerprints_moved = summary.fingerprints_moved,
        tracks_deleted = summary.tracks_deleted,
        "Merged tracks into {}",
        target_id
    );
    Ok(summary)
}

async fn merge_tracks_in(
    conn: &mut SqliteConnection,
    target_id: TrackId,
    sources: &[TrackId],
) -> Result<MergeSummary> {
    let target_exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM track WHERE id = ?")
        .bind(target_id)
        .fetch_optional(&mut *conn)
        .await?;
    if target_exists.is_none() {
        return Err(Error::NotFound(format!("track {}", target_id)));
    }

    let mut summary = MergeSummary::default();

    for namespace in Namespace::ALL {
        let rows = load_track_bindings(conn, namespace, target_id, sources).await?;

        let mut target_values = HashSet::new();
        let mut source_counts: HashMap<BindingValue, i64> = HashMap::new();
        for (track_id, value, count) in rows {
            if track_id == target_id {
                target_values.insert(value);
            } else {
                *source_counts.entry(value).or_insert(0) += count;
            }
        }

        for (value, count) in &source_counts {
            fold_binding(conn, target_id, value, *count).await?;
            if !target_values.contains(value) {
                summary.bindings_moved += 1;
            }
        }
    }

    // TODO: collapse fingerprints whose payload already exists on the target
    let mut repoint = QueryBuilder::<Sqlite>::new("UPDATE fingerprint SET track_id = ");
    repoint.push_bind(target_id);
    repoint.push(" WHERE track_id IN ");
    push_in_list(&mut repoint, sources.iter().copied());
    summary.fingerprints_moved = repoint.build().execute(&mut *conn).await?.rows_affected();

    for namespace in Namespace::ALL {
        let mut delete = QueryBuilder::<Sqlite>::new(format!(
            "DELETE FROM {} WHERE track_id IN ",
            namespace.table()
        ));
        push_in_list(&mut delete, sources.iter().copied());
        summary.bindings_removed += delete.build().execute(&mut *conn).await?.rows_affected();
    }

    let mut delete_tracks = QueryBuilder::<Sqlite>::new("DELETE FROM track WHERE id IN ");
    push_in_list(&mut delete_tracks, sources.iter().copied());
    summary.tracks_deleted = delete_tracks.build().execute(&mut *conn).await?.rows_affected();

    Ok(summary)
}

/// Binding rows of the target and source tracks in one namespace
async fn load_track_bindings(
    conn: &mut SqliteConnection,
    namespace: Namespace,
    target_id: TrackId,
    sources: &[TrackId],
) -> Result<Vec<(TrackId, BindingValue, i64)>> {
    let mut query = QueryBuilder::<Sqlite>::new(format!(
        "SELECT track_id, {}, submission_count FROM {} WHERE track_id IN ",
        namespace.column(),
        namespace.table()
    ));
    push_in_list(
        &mut query,
        sources.iter().copied().chain(std::iter::once(target_id)),
    );

    let rows: Vec<(TrackId, BindingValue, i64)> = match namespace {
        Namespace::Mbid | Namespace::Puid => {
            let rows: Vec<(TrackId, String, i64)> =
                query.build_query_as().fetch_all(&mut *conn).await?;
            rows.into_iter()
                .map(|(track_id, value, count)| {
                    let value = if namespace == Namespace::Mbid {
                        BindingValue::Mbid(value)
                    } else {
                        BindingValue::Puid(value)
                    };
                    (track_id, value, count)
                })
                .collect()
        }
        Namespace::ForeignId => {
            let rows: Vec<(TrackId, i64, i64)> =
                query.build_query_as().fetch_all(&mut *conn).await?;
            rows.into_iter()
                .map(|(track_id, id, count)| (track_id, BindingValue::ForeignId(id), count))
                .collect()
        }
    };
    Ok(rows)
}

/// Insert the binding with `count`, or add `count` to the existing row
async fn fold_binding(
    conn: &mut SqliteConnection,
    track_id: TrackId,
    value: &BindingValue,
    count: i64,
) -> Result<()> {
    let namespace = value.namespace();
    let sql = format!(
        "INSERT INTO {table} (track_id, {column}, submission_count) VALUES (?, ?, ?) \
         ON CONFLICT (track_id, {column}) DO UPDATE SET submission_count = submission_count + excluded.submission_count",
        table = namespace.table(),
        column = namespace.column(),
    );

    let query = sqlx::query(&sql).bind(track_id);
    let query = match value {
        BindingValue::Mbid(v) | BindingValue::Puid(v) => query.bind(v.as_str()),
        BindingValue::ForeignId(id) => query.bind(*id),
    };
    query.bind(count.max(1)).execute(&mut *conn).await?;

    Ok(())
}

/// Record that MusicBrainz redirected `old_mbid` to `new_mbid`
pub async fn record_mbid_redirect(pool: &SqlitePool, old_mbid: &str, new_mbid: &str) -> Result<()> {
    let old = canonical_uuid(old_mbid, Namespace::Mbid)?;
    let new = canonical_uuid(new_mbid, Namespace::Mbid)?;
    if old == new {
        return Err(Error::InvalidInput(format!("MBID {} redirects to itself", old)));
    }

    sqlx::query(
        r#"
        INSERT INTO mbid_redirect (old_mbid, new_mbid) VALUES (?, ?)
        ON CONFLICT (old_mbid) DO UPDATE SET new_mbid = excluded.new_mbid
        "#,
    )
    .bind(&old)
    .bind(&new)
    .execute(pool)
    .await?;

    Ok(())
}

/// Merge bound MBIDs that have been redirected upstream.
///
/// With `only_mbid`, only redirect groups where that MBID is the old or the
/// new side are merged. Returns the number of groups merged.
pub async fn merge_missing_mbids(pool: &SqlitePool, only_mbid: Option<&str>) -> Result<usize> {
    debug!("Merging missing MBIDs");

    let only = only_mbid
        .map(|mbid| canonical_uuid(mbid, Namespace::Mbid))
        .transpose()?;

    let rows: Vec<(String, String)> = match &only {
        Some(mbid) => {
            sqlx::query_as(
                r#"
                SELECT DISTINCT tm.mbid, r.new_mbid
                FROM track_mbid tm
                JOIN mbid_redirect r ON r.old_mbid = tm.mbid
                WHERE tm.mbid = ? OR r.new_mbid = ?
                "#,
            )
            .bind(mbid)
            .bind(mbid)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                r#"
                SELECT DISTINCT tm.mbid, r.new_mbid
                FROM track_mbid tm
                JOIN mbid_redirect r ON r.old_mbid = tm.mbid
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    let mut merges: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (old_mbid, new_mbid) in rows {
        merges.entry(new_mbid).or_default().push(old_mbid);
    }

    for (new_mbid, old_mbids) in &merges {
        merge_mbids(pool, new_mbid, old_mbids).await?;
    }

    Ok(merges.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::bindings::{insert_mbid, submission_count};
    use crate::db::init::test_support::test_pool;
    use crate::db::tracks::insert_track;

    const M1: &str = "11111111-1111-1111-1111-111111111111";
    const M2: &str = "22222222-2222-2222-2222-222222222222";
    const M3: &str = "33333333-3333-3333-3333-333333333333";

    async fn count(pool: &SqlitePool, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_merge_mbids_moves_tracks_to_target() {
        let (_dir, pool) = test_pool().await;
        let t1 = insert_track(&pool).await.unwrap();
        let t2 = insert_track(&pool).await.unwrap();

        insert_mbid(&pool, t1, M1).await.unwrap();
        insert_mbid(&pool, t1, M1).await.unwrap();
        insert_mbid(&pool, t2, M2).await.unwrap();
        insert_mbid(&pool, t2, M3).await.unwrap();

        let summary = merge_mbids(&pool, M3, &[M1.to_string(), M2.to_string()])
            .await
            .unwrap();
        assert_eq!(summary.bindings_moved, 1);
        assert_eq!(summary.bindings_removed, 2);

        let m3 = BindingValue::mbid(M3).unwrap();
        assert_eq!(submission_count(&pool, t1, &m3).await.unwrap(), Some(2));
        assert_eq!(submission_count(&pool, t2, &m3).await.unwrap(), Some(2));
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM track_mbid").await, 2);
    }

    #[tokio::test]
    async fn test_merge_mbid_into_itself_is_noop() {
        let (_dir, pool) = test_pool().await;
        let t1 = insert_track(&pool).await.unwrap();
        insert_mbid(&pool, t1, M1).await.unwrap();

        let summary = merge_mbids(&pool, M1, &[M1.to_string()]).await.unwrap();
        assert!(summary.is_empty());
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM track_mbid").await, 1);
    }

    #[tokio::test]
    async fn test_merge_tracks_into_missing_target_rolls_back() {
        let (_dir, pool) = test_pool().await;
        let t1 = insert_track(&pool).await.unwrap();
        insert_mbid(&pool, t1, M1).await.unwrap();

        let result = merge_tracks(&pool, 9999, &[t1]).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        assert_eq!(count(&pool, "SELECT COUNT(*) FROM track").await, 1);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM track_mbid").await, 1);

        // The connection went back to the pool usable
        let t2 = insert_track(&pool).await.unwrap();
        merge_tracks(&pool, t2, &[t1]).await.unwrap();
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM track").await, 1);
    }

    #[tokio::test]
    async fn test_merge_missing_mbids_follows_redirects() {
        let (_dir, pool) = test_pool().await;
        let t1 = insert_track(&pool).await.unwrap();
        let t2 = insert_track(&pool).await.unwrap();
        insert_mbid(&pool, t1, M1).await.unwrap();
        insert_mbid(&pool, t2, M2).await.unwrap();

        record_mbid_redirect(&pool, M1, M3).await.unwrap();
        record_mbid_redirect(&pool, M2, M3).await.unwrap();

        let merged = merge_missing_mbids(&pool, None).await.unwrap();
        assert_eq!(merged, 1);

        let mbids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT mbid FROM track_mbid")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(mbids, vec![M3.to_string()]);

        // Nothing left to do
        assert_eq!(merge_missing_mbids(&pool, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_merge_missing_mbids_restricted_to_one_mbid() {
        let (_dir, pool) = test_pool().await;
        let t1 = insert_track(&pool).await.unwrap();
        insert_mbid(&pool, t1, M1).await.unwrap();
        insert_mbid(&pool, t1, M2).await.unwrap();

        record_mbid_redirect(&pool, M1, M3).await.unwrap();
        let other = "44444444-4444-4444-4444-444444444444";
        record_mbid_redirect(&pool, M2, other).await.unwrap();

        assert_eq!(merge_missing_mbids(&pool, Some(M3)).await.unwrap(), 1);

        let mut mbids: Vec<String> = sqlx::query_scalar("SELECT mbid FROM track_mbid")
            .fetch_all(&pool)
            .await
            .unwrap();
        mbids.sort();
        assert_eq!(mbids, vec![M2.to_string(), M3.to_string()]);
    }

    #[tokio::test]
    async fn test_redirect_to_itself_rejected() {
        let (_dir, pool) = test_pool().await;
        let result = record_mbid_redirect(&pool, M1, M1).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
