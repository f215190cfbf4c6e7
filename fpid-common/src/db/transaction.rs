//! Write transaction holding SQLite's writer lock from the first statement

use crate::{Error, Result};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::warn;

/// `BEGIN IMMEDIATE` transaction on a single pooled connection.
///
/// Other writers block (up to the busy timeout) until this one commits or
/// rolls back, which makes multi-step merges serializable. If the guard is
/// dropped while still open, its connection is detached from the pool and
/// closed, and SQLite rolls the transaction back.
pub(crate) struct ImmediateTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTransaction {
    pub(crate) async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    pub(crate) fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| Error::Internal("transaction already finished".to_string()))
    }

    pub(crate) async fn commit(mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Err(Error::Internal("transaction already finished".to_string()));
        };

        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            discard(conn);
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) async fn rollback(mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                warn!("Rollback failed, closing connection: {}", e);
                discard(conn);
            }
        }
    }

    /// Commit on `Ok`, roll back on `Err`
    pub(crate) async fn finish<T>(self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                self.rollback().await;
                Err(e)
            }
        }
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Transaction dropped while open, closing its connection");
            discard(conn);
        }
    }
}

/// Close the connection instead of returning it to the pool
fn discard(conn: PoolConnection<Sqlite>) {
    drop(conn.detach());
}
