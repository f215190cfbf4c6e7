//! Execution context handed to every task handler

use fpid_common::config::ClusterRole;
use fpid_common::FingerprintComparator;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct WorkerContext {
    pub db: SqlitePool,
    pub comparator: Arc<dyn FingerprintComparator>,
    pub role: ClusterRole,
}

impl WorkerContext {
    pub fn new(db: SqlitePool, comparator: Arc<dyn FingerprintComparator>, role: ClusterRole) -> Self {
        Self {
            db,
            comparator,
            role,
        }
    }

    pub fn is_master(&self) -> bool {
        self.role == ClusterRole::Master
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("db", &self.db)
            .field("comparator", &"FingerprintComparator")
            .field("role", &self.role)
            .finish()
    }
}
