//! Built-in task handlers
//!
//! | task                  | arguments                                   |
//! |-----------------------|---------------------------------------------|
//! | `update_stats`        | `date?: "YYYY-MM-DD"` (default: today, UTC) |
//! | `merge_missing_mbids` | `mbid?: string`                             |
//! | `merge_mbids`         | `target: string, sources: [string]`         |
//! | `merge_tracks`        | `target: int, sources: [int]`               |
//! | `fingerprint_matrix`  | `track: int`                                |
//!
//! Merge tasks only run on the master; slaves log and skip them.

use crate::context::WorkerContext;
use crate::registry::{TaskHandler, TaskRegistry};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use fpid_common::db::{merge_mbids, merge_missing_mbids, merge_tracks, update_stats};
use fpid_common::similarity::{build_similarity_matrix, SimilarityMatrix};
use fpid_common::tasks::TaskArgs;
use fpid_common::{Error, Result};
use serde_json::Value;
use std::ops::Bound::{Excluded, Unbounded};
use tracing::info;

/// Registry with every built-in task
pub fn default_registry() -> Result<TaskRegistry> {
    TaskRegistry::builder()
        .register("update_stats", UpdateStats)
        .register("merge_missing_mbids", MergeMissingMbids)
        .register("merge_mbids", MergeMbids)
        .register("merge_tracks", MergeTracks)
        .register("fingerprint_matrix", FingerprintMatrix)
        .build()
}

pub struct UpdateStats;

#[async_trait]
impl TaskHandler for UpdateStats {
    async fn run(&self, ctx: &WorkerContext, args: &TaskArgs) -> Result<()> {
        let date = match optional_str(args, "date")? {
            Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
                Error::InvalidInput(format!("argument \"date\" {:?}: {}", value, e))
            })?,
            None => Utc::now().date_naive(),
        };

        update_stats(&ctx.db, date).await?;
        Ok(())
    }
}

pub struct MergeMissingMbids;

#[async_trait]
impl TaskHandler for MergeMissingMbids {
    async fn run(&self, ctx: &WorkerContext, args: &TaskArgs) -> Result<()> {
        if !ctx.is_master() {
            info!("Not running merge_missing_mbids in slave mode");
            return Ok(());
        }

        let only_mbid = optional_str(args, "mbid")?;
        let merged = merge_missing_mbids(&ctx.db, only_mbid).await?;
        info!("Merged {} redirected MBID groups", merged);
        Ok(())
    }
}

pub struct MergeMbids;

#[async_trait]
impl TaskHandler for MergeMbids {
    async fn run(&self, ctx: &WorkerContext, args: &TaskArgs) -> Result<()> {
        if !ctx.is_master() {
            info!("Not running merge_mbids in slave mode");
            return Ok(());
        }

        let target = required_str(args, "target")?;
        let sources = required_list(args, "sources", |v| v.as_str().map(str::to_string))?;
        merge_mbids(&ctx.db, target, &sources).await?;
        Ok(())
    }
}

pub struct MergeTracks;

#[async_trait]
impl TaskHandler for MergeTracks {
    async fn run(&self, ctx: &WorkerContext, args: &TaskArgs) -> Result<()> {
        if !ctx.is_master() {
            info!("Not running merge_tracks in slave mode");
            return Ok(());
        }

        let target = args
            .get("target")
            .and_then(Value::as_i64)
            .ok_or_else(|| missing("target", "an integer"))?;
        let sources = required_list(args, "sources", Value::as_i64)?;
        merge_tracks(&ctx.db, target, &sources).await?;
        Ok(())
    }
}

/// Scores a track's fingerprints against each other and logs the weakest pair
pub struct FingerprintMatrix;

#[async_trait]
impl TaskHandler for FingerprintMatrix {
    async fn run(&self, ctx: &WorkerContext, args: &TaskArgs) -> Result<()> {
        let track_id = args
            .get("track")
            .and_then(Value::as_i64)
            .ok_or_else(|| missing("track", "an integer"))?;

        let matrix = build_similarity_matrix(&ctx.db, ctx.comparator.as_ref(), track_id).await?;
        match weakest_pair(&matrix) {
            Some((a, b, score)) => info!(
                fingerprints = matrix.len(),
                "Track {} weakest fingerprint pair {}/{} scores {:.3}",
                track_id,
                a,
                b,
                score
            ),
            None => info!(
                fingerprints = matrix.len(),
                "Track {} has no fingerprint pairs to compare",
                track_id
            ),
        }
        Ok(())
    }
}

/// Lowest off-diagonal score, ties going to the smallest ids
pub fn weakest_pair(matrix: &SimilarityMatrix) -> Option<(i64, i64, f64)> {
    let mut weakest: Option<(i64, i64, f64)> = None;
    for (&a, row) in matrix {
        for (&b, &score) in row.range((Excluded(a), Unbounded)) {
            if weakest.map_or(true, |(_, _, lowest)| score < lowest) {
                weakest = Some((a, b, score));
            }
        }
    }
    weakest
}

fn missing(key: &str, expected: &str) -> Error {
    Error::InvalidInput(format!("argument {:?} must be {}", key, expected))
}

fn optional_str<'a>(args: &'a TaskArgs, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(missing(key, "a string")),
    }
}

fn required_str<'a>(args: &'a TaskArgs, key: &str) -> Result<&'a str> {
    optional_str(args, key)?.ok_or_else(|| missing(key, "a string"))
}

fn required_list<T>(args: &TaskArgs, key: &str, item: impl Fn(&Value) -> Option<T>) -> Result<Vec<T>> {
    args.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| missing(key, "a list"))?
        .iter()
        .map(|v| item(v).ok_or_else(|| missing(key, "a list of the right type")))
        .collect()
}
