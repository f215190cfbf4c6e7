//! Identity store models

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TrackId = i64;
pub type FingerprintId = i64;
pub type ForeignIdId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub id: FingerprintId,
    pub track_id: TrackId,
    pub payload: Vec<u8>,
}

/// External identifier namespace a track can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Mbid,
    Puid,
    ForeignId,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Mbid, Namespace::Puid, Namespace::ForeignId];

    /// Binding table for this namespace
    pub(crate) fn table(self) -> &'static str {
        match self {
            Namespace::Mbid => "track_mbid",
            Namespace::Puid => "track_puid",
            Namespace::ForeignId => "track_foreignid",
        }
    }

    /// Value column of the binding table
    pub(crate) fn column(self) -> &'static str {
        match self {
            Namespace::Mbid => "mbid",
            Namespace::Puid => "puid",
            Namespace::ForeignId => "foreignid_id",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Namespace::Mbid => "MBID",
            Namespace::Puid => "PUID",
            Namespace::ForeignId => "foreign ID",
        })
    }
}

/// Value bound to a track, already validated for its namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingValue {
    Mbid(String),
    Puid(String),
    ForeignId(ForeignIdId),
}

impl BindingValue {
    pub fn mbid(value: &str) -> Result<Self> {
        Ok(BindingValue::Mbid(canonical_uuid(value, Namespace::Mbid)?))
    }

    pub fn puid(value: &str) -> Result<Self> {
        Ok(BindingValue::Puid(canonical_uuid(value, Namespace::Puid)?))
    }

    pub fn namespace(&self) -> Namespace {
        match self {
            BindingValue::Mbid(_) => Namespace::Mbid,
            BindingValue::Puid(_) => Namespace::Puid,
            BindingValue::ForeignId(_) => Namespace::ForeignId,
        }
    }
}

impl std::fmt::Display for BindingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingValue::Mbid(v) | BindingValue::Puid(v) => f.write_str(v),
            BindingValue::ForeignId(id) => write!(f, "{}", id),
        }
    }
}

/// Result of an idempotent binding insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOutcome {
    pub already_existed: bool,
    pub submission_count: i64,
}

/// Parse an MBID/PUID and return its lowercase hyphenated form
pub fn canonical_uuid(value: &str, namespace: Namespace) -> Result<String> {
    Uuid::parse_str(value.trim())
        .map(|u| u.hyphenated().to_string())
        .map_err(|e| Error::InvalidInput(format!("invalid {} {:?}: {}", namespace, value, e)))
}
