//! # fpid Common Library
//!
//! Shared code for the fingerprint identity services:
//! - Identity store schema and connection setup
//! - Idempotent binding inserts (MBID, PUID, foreign identifiers)
//! - Track and MBID merge engine
//! - Fingerprint similarity matrix
//! - Task queue protocol used by the background worker
//! - Configuration loading

pub mod config;
pub mod db;
pub mod error;
pub mod similarity;
pub mod tasks;

pub use error::{Error, Result};
pub use similarity::{BitErrorComparator, FingerprintComparator};
