//! Registry Store: the persistent record of what every nonce is doing.
//!
//! One row per nonce in `live_updates_clients`. A non-NULL `expires_at` marks
//! a provisional (or disconnected) client that must open its channel before
//! that time; NULL marks a client held open by this process.

use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::info;

use crate::nonce::Nonce;
use crate::scope::ScopeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub nonce: Nonce,
    pub url: String,
    pub scope: Option<ScopeId>,
    /// Unix seconds; `None` while connected
    pub expires_at: Option<i64>,
    /// Unix seconds of the first dispatch missed while disconnected
    pub should_catch_up_at: Option<i64>,
    pub created_at: i64,
}

impl ClientRecord {
    pub fn is_connected(&self) -> bool {
        self.expires_at.is_none()
    }

    fn from_row(row: &SqliteRow) -> Self {
        Self {
            nonce: Nonce::from_stored(row.get("nonce")),
            url: row.get("url"),
            scope: row.get::<Option<i64>, _>("scope").map(ScopeId),
            expires_at: row.get("expires_at"),
            should_catch_up_at: row.get("should_catch_up_at"),
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    pub provisional: u64,
    pub connected: u64,
}

#[derive(Clone)]
pub struct RegistryStore {
    pool: SqlitePool,
}

impl RegistryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the registry table. Idempotent.
    pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS live_updates_clients (
                nonce TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                scope INTEGER,
                expires_at INTEGER,
                should_catch_up_at INTEGER,
                created_at INTEGER NOT NULL DEFAULT (unixepoch())
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_live_updates_scope ON live_updates_clients(scope)",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_live_updates_expires ON live_updates_clients(expires_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn insert_provisional(
        &self,
        nonce: &Nonce,
        url: &str,
        scope: Option<ScopeId>,
        now: i64,
        expires_at: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO live_updates_clients (nonce, url, scope, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(nonce.as_str())
        .bind(url)
        .bind(scope.map(|s| s.0))
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, nonce: &Nonce) -> Result<Option<ClientRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT nonce, url, scope, expires_at, should_catch_up_at, created_at FROM live_updates_clients WHERE nonce = ?",
        )
        .bind(nonce.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(ClientRecord::from_row))
    }

    /// Move a provisional row to connected, clearing any pending catch-up.
    pub async fn mark_connected(&self, nonce: &Nonce) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE live_updates_clients SET expires_at = NULL, should_catch_up_at = NULL WHERE nonce = ?",
        )
        .bind(nonce.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write a connected row, replacing whatever the nonce had before.
    pub async fn upsert_connected(
        &self,
        nonce: &Nonce,
        url: &str,
        scope: Option<ScopeId>,
        now: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO live_updates_clients (nonce, url, scope, expires_at, should_catch_up_at, created_at)
            VALUES (?, ?, ?, NULL, NULL, ?)
            ON CONFLICT(nonce) DO UPDATE SET
                url = excluded.url,
                scope = excluded.scope,
                expires_at = NULL,
                should_catch_up_at = NULL,
                created_at = excluded.created_at
            "#,
        )
        .bind(nonce.as_str())
        .bind(url)
        .bind(scope.map(|s| s.0))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, nonce: &Nonce) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM live_updates_clients WHERE nonce = ?")
            .bind(nonce.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flag every disconnected client of `scope` as needing a catch-up push.
    pub async fn flag_catch_up(&self, scope: ScopeId, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE live_updates_clients SET should_catch_up_at = ? WHERE scope = ? AND expires_at IS NOT NULL",
        )
        .bind(now)
        .bind(scope.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Connected clients of `scope`, in registration order.
    pub async fn connected_in_scope(&self, scope: ScopeId) -> Result<Vec<Nonce>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT nonce FROM live_updates_clients WHERE scope = ? AND expires_at IS NULL ORDER BY rowid",
        )
        .bind(scope.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| Nonce::from_stored(r.get("nonce")))
            .collect())
    }

    /// Delete provisional rows whose window lapsed before `now`.
    pub async fn delete_expired(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM live_updates_clients WHERE expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete every connected row. Only correct while no connection is live.
    pub async fn delete_connected(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM live_updates_clients WHERE expires_at IS NULL")
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            info!(
                "Removed {} connected live-updates rows left by a previous process",
                result.rows_affected()
            );
        }
        Ok(result.rows_affected())
    }

    pub async fn counts(&self) -> Result<RegistryCounts, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN expires_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS provisional,
                COALESCE(SUM(CASE WHEN expires_at IS NULL THEN 1 ELSE 0 END), 0) AS connected
            FROM live_updates_clients
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(RegistryCounts {
            provisional: row.get::<i64, _>("provisional") as u64,
            connected: row.get::<i64, _>("connected") as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers;

    const NOW: i64 = 1_700_000_000;

    async fn store() -> RegistryStore {
        RegistryStore::new(test_helpers::test_pool().await)
    }

    #[tokio::test]
    async fn insert_and_get_provisional() {
        let store = store().await;
        let nonce = Nonce::generate();
        store
            .insert_provisional(&nonce, "/courses/1", Some(ScopeId(1)), NOW, NOW + 60)
            .await
            .unwrap();

        let record = store.get(&nonce).await.unwrap().unwrap();
        assert_eq!(record.nonce, nonce);
        assert_eq!(record.url, "/courses/1");
        assert_eq!(record.scope, Some(ScopeId(1)));
        assert_eq!(record.expires_at, Some(NOW + 60));
        assert_eq!(record.should_catch_up_at, None);
        assert_eq!(record.created_at, NOW);
        assert!(!record.is_connected());
    }

    #[tokio::test]
    async fn get_unknown_nonce() {
        let store = store().await;
        assert!(store.get(&Nonce::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = store().await;
        let nonce = Nonce::generate();
        store
            .insert_provisional(&nonce, "/", None, NOW, NOW + 60)
            .await
            .unwrap();
        assert!(
            store
                .insert_provisional(&nonce, "/", None, NOW, NOW + 60)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn mark_connected_clears_expiry_and_catch_up() {
        let store = store().await;
        let nonce = Nonce::generate();
        store
            .insert_provisional(&nonce, "/x", Some(ScopeId(1)), NOW, NOW + 60)
            .await
            .unwrap();
        store.flag_catch_up(ScopeId(1), NOW + 5).await.unwrap();

        assert!(store.mark_connected(&nonce).await.unwrap());
        let record = store.get(&nonce).await.unwrap().unwrap();
        assert!(record.is_connected());
        assert_eq!(record.should_catch_up_at, None);

        assert!(!store.mark_connected(&Nonce::generate()).await.unwrap());
    }

    #[tokio::test]
    async fn upsert_connected_inserts_and_overwrites() {
        let store = store().await;
        let nonce = Nonce::generate();

        store
            .upsert_connected(&nonce, "/a", Some(ScopeId(1)), NOW)
            .await
            .unwrap();
        let record = store.get(&nonce).await.unwrap().unwrap();
        assert!(record.is_connected());
        assert_eq!(record.url, "/a");

        store
            .upsert_connected(&nonce, "/b", Some(ScopeId(2)), NOW + 1)
            .await
            .unwrap();
        let record = store.get(&nonce).await.unwrap().unwrap();
        assert_eq!(record.url, "/b");
        assert_eq!(record.scope, Some(ScopeId(2)));
        assert_eq!(record.created_at, NOW + 1);
    }

    #[tokio::test]
    async fn flag_catch_up_only_touches_disconnected_clients_of_scope() {
        let store = store().await;
        let waiting = Nonce::generate();
        let connected = Nonce::generate();
        let elsewhere = Nonce::generate();
        store
            .insert_provisional(&waiting, "/x", Some(ScopeId(1)), NOW, NOW + 60)
            .await
            .unwrap();
        store
            .upsert_connected(&connected, "/x", Some(ScopeId(1)), NOW)
            .await
            .unwrap();
        store
            .insert_provisional(&elsewhere, "/y", Some(ScopeId(2)), NOW, NOW + 60)
            .await
            .unwrap();

        assert_eq!(store.flag_catch_up(ScopeId(1), NOW + 3).await.unwrap(), 1);

        let get = |n: &Nonce| {
            let store = store.clone();
            let n = n.clone();
            async move { store.get(&n).await.unwrap().unwrap() }
        };
        assert_eq!(get(&waiting).await.should_catch_up_at, Some(NOW + 3));
        assert_eq!(get(&connected).await.should_catch_up_at, None);
        assert_eq!(get(&elsewhere).await.should_catch_up_at, None);
    }

    #[tokio::test]
    async fn connected_in_scope_keeps_registration_order() {
        let store = store().await;
        let nonces: Vec<Nonce> = (0..4).map(|_| Nonce::generate()).collect();
        for nonce in &nonces {
            store
                .upsert_connected(nonce, "/x", Some(ScopeId(9)), NOW)
                .await
                .unwrap();
        }
        store
            .upsert_connected(&Nonce::generate(), "/y", Some(ScopeId(8)), NOW)
            .await
            .unwrap();
        store
            .insert_provisional(&Nonce::generate(), "/x", Some(ScopeId(9)), NOW, NOW + 60)
            .await
            .unwrap();

        assert_eq!(store.connected_in_scope(ScopeId(9)).await.unwrap(), nonces);
    }

    #[tokio::test]
    async fn null_scope_is_never_enumerated() {
        let store = store().await;
        store
            .upsert_connected(&Nonce::generate(), "/", None, NOW)
            .await
            .unwrap();
        assert!(store.connected_in_scope(ScopeId(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_expired_respects_window_and_connected_rows() {
        let store = store().await;
        let provisional = Nonce::generate();
        let connected = Nonce::generate();
        store
            .insert_provisional(&provisional, "/x", Some(ScopeId(1)), NOW, NOW + 60)
            .await
            .unwrap();
        store
            .upsert_connected(&connected, "/x", Some(ScopeId(1)), NOW)
            .await
            .unwrap();

        assert_eq!(store.delete_expired(NOW + 60).await.unwrap(), 0);
        assert!(store.get(&provisional).await.unwrap().is_some());

        assert_eq!(store.delete_expired(NOW + 61).await.unwrap(), 1);
        assert!(store.get(&provisional).await.unwrap().is_none());
        assert!(store.get(&connected).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_connected_leaves_provisional_rows() {
        let store = store().await;
        store
            .insert_provisional(&Nonce::generate(), "/x", None, NOW, NOW + 60)
            .await
            .unwrap();
        store
            .upsert_connected(&Nonce::generate(), "/x", None, NOW)
            .await
            .unwrap();

        assert_eq!(store.delete_connected().await.unwrap(), 1);
        assert_eq!(
            store.counts().await.unwrap(),
            RegistryCounts {
                provisional: 1,
                connected: 0
            }
        );
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_existed() {
        let store = store().await;
        let nonce = Nonce::generate();
        store
            .upsert_connected(&nonce, "/x", None, NOW)
            .await
            .unwrap();
        assert!(store.delete(&nonce).await.unwrap());
        assert!(!store.delete(&nonce).await.unwrap());
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = test_helpers::test_pool().await;
        RegistryStore::migrate(&pool).await.unwrap();
        RegistryStore::migrate(&pool).await.unwrap();
    }
}
