//! Fingerprint similarity
//!
//! The acoustic comparison itself is pluggable through
//! [`FingerprintComparator`]; the matrix builder only orchestrates which
//! pairs get compared.

use crate::db::models::{FingerprintId, TrackId};
use crate::db::tracks::load_fingerprints;
use crate::Result;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::debug;

/// Pairwise fingerprint scores, `matrix[a][b] == matrix[b][a]`
pub type SimilarityMatrix = BTreeMap<FingerprintId, BTreeMap<FingerprintId, f64>>;

/// Compares two fingerprint payloads.
///
/// Implementations must be symmetric, deterministic and side-effect free,
/// and return a score in `[0.0, 1.0]`.
pub trait FingerprintComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> f64;
}

/// Bit-error comparator over little-endian `u32` sub-fingerprints.
///
/// Aligns both fingerprints at offset zero and scores the common prefix as
/// `1 - differing_bits / total_bits`. Trailing bytes that do not form a
/// full `u32` are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitErrorComparator;

impl FingerprintComparator for BitErrorComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> f64 {
        let a = a.chunks_exact(4);
        let b = b.chunks_exact(4);
        let len = a.len().min(b.len());
        if len == 0 {
            return 0.0;
        }

        let errors: u32 = a
            .zip(b)
            .map(|(x, y)| {
                let x = u32::from_le_bytes([x[0], x[1], x[2], x[3]]);
                let y = u32::from_le_bytes([y[0], y[1], y[2], y[3]]);
                (x ^ y).count_ones()
            })
            .sum();

        1.0 - f64::from(errors) / (32.0 * len as f64)
    }
}

/// Score every pair of the given fingerprints.
///
/// Each unordered pair is compared once (`a.id <= b.id`) and written to
/// both cells; the diagonal is always `1.0`.
pub fn similarity_matrix(
    fingerprints: &[(FingerprintId, &[u8])],
    comparator: &dyn FingerprintComparator,
) -> SimilarityMatrix {
    let mut sorted: Vec<&(FingerprintId, &[u8])> = fingerprints.iter().collect();
    sorted.sort_by_key(|(id, _)| *id);

    let mut result = SimilarityMatrix::new();
    for (i, (id1, payload1)) in sorted.iter().enumerate() {
        for (id2, payload2) in &sorted[i..] {
            let score = if id1 == id2 {
                1.0
            } else {
                comparator.compare(payload1, payload2).clamp(0.0, 1.0)
            };
            result.entry(*id1).or_default().insert(*id2, score);
            result.entry(*id2).or_default().insert(*id1, score);
        }
    }
    result
}

/// Similarity matrix over all fingerprints of a track
pub async fn build_similarity_matrix(
    pool: &SqlitePool,
    comparator: &dyn FingerprintComparator,
    track_id: TrackId,
) -> Result<SimilarityMatrix> {
    let fingerprints = load_fingerprints(pool, track_id).await?;
    debug!(
        "Building similarity matrix for track {} over {} fingerprints",
        track_id,
        fingerprints.len()
    );

    let pairs: Vec<(FingerprintId, &[u8])> = fingerprints
        .iter()
        .map(|fp| (fp.id, fp.payload.as_slice()))
        .collect();
    Ok(similarity_matrix(&pairs, comparator))
}
