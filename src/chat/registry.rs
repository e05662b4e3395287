//! `SQLite`-backed thread registry: durable display names per thread.
//!
//! The registry owns one small table mapping `thread_id` to a display name
//! plus a creation timestamp. It shares the database file with the
//! checkpoint store but knows nothing about message history; the two row
//! sets are correlated only by thread id and are allowed to drift apart.
//!
//! Failure policy: storage errors never escape this layer. Writes report a
//! boolean outcome, reads report an absent value, and the underlying error
//! is logged here.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::chat::errors::ChatResult;
use crate::chat::ids::ThreadId;

/// Boxed future type for registry operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable `thread_id -> display name` mapping.
pub trait ThreadRegistry: Send + Sync {
    /// Insert or replace the display name for a thread.
    ///
    /// Commits durably before returning `true`; any storage failure is
    /// logged and reported as `false`. An empty name is rejected.
    fn upsert(&self, thread_id: ThreadId, name: &str) -> StoreFuture<'_, bool>;

    /// Replace the display name for a thread.
    ///
    /// Same contract as [`ThreadRegistry::upsert`]; kept as a distinct
    /// operation because the coordinator uses it for explicit user-initiated
    /// renames rather than implicit first-message naming.
    fn rename(&self, thread_id: ThreadId, new_name: &str) -> StoreFuture<'_, bool>;

    /// Look up the display name for a thread; `None` when no row exists.
    fn get(&self, thread_id: ThreadId) -> StoreFuture<'_, Option<String>>;

    /// Full scan of all stored names, order unspecified.
    ///
    /// A storage failure is logged and yields an empty map.
    fn list_all(&self) -> StoreFuture<'_, HashMap<ThreadId, String>>;

    /// Remove the row for a thread if present.
    ///
    /// Idempotent: deleting an absent row succeeds.
    fn delete(&self, thread_id: ThreadId) -> StoreFuture<'_, bool>;
}

/// `SQLite` implementation of the thread registry.
pub struct SqliteThreadRegistry {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteThreadRegistry {
    /// Initialize the registry and create the table if it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn new(conn: Arc<Connection>, table: &str) -> ChatResult<Self> {
        let table = table.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    thread_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }

    /// Write a name row, preserving `created_at` on conflict.
    ///
    /// `created_at` is set once, on first name assignment; a later rename
    /// must not reset it, so this is an `ON CONFLICT DO UPDATE` rather than
    /// `INSERT OR REPLACE`.
    async fn write_name(&self, thread_id: ThreadId, name: String) -> ChatResult<()> {
        let table = self.table.clone();
        let id_str = thread_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (thread_id, name) VALUES (?1, ?2)
                         ON CONFLICT(thread_id) DO UPDATE SET name = excluded.name"
                    ),
                    rusqlite::params![id_str, name],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl ThreadRegistry for SqliteThreadRegistry {
    fn upsert(&self, thread_id: ThreadId, name: &str) -> StoreFuture<'_, bool> {
        let name = name.to_string();
        Box::pin(async move {
            if name.is_empty() {
                tracing::warn!(%thread_id, "rejecting empty thread name");
                return false;
            }
            match self.write_name(thread_id, name).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(%thread_id, error = %err, "failed to save thread name");
                    false
                }
            }
        })
    }

    fn rename(&self, thread_id: ThreadId, new_name: &str) -> StoreFuture<'_, bool> {
        self.upsert(thread_id, new_name)
    }

    fn get(&self, thread_id: ThreadId) -> StoreFuture<'_, Option<String>> {
        Box::pin(async move {
            let table = self.table.clone();
            let id_str = thread_id.to_string();
            let result: ChatResult<Option<String>> = async {
                let row = self
                    .conn
                    .call(move |conn| {
                        let row = conn
                            .query_row(
                                &format!("SELECT name FROM {table} WHERE thread_id = ?1"),
                                rusqlite::params![id_str],
                                |row| row.get::<_, String>(0),
                            )
                            .optional()?;
                        Ok(row)
                    })
                    .await?;
                Ok(row)
            }
            .await;

            match result {
                Ok(name) => name,
                Err(err) => {
                    tracing::warn!(%thread_id, error = %err, "failed to read thread name");
                    None
                }
            }
        })
    }

    fn list_all(&self) -> StoreFuture<'_, HashMap<ThreadId, String>> {
        Box::pin(async move {
            let table = self.table.clone();
            let result: ChatResult<Vec<(String, String)>> = async {
                let rows = self
                    .conn
                    .call(move |conn| {
                        let mut stmt =
                            conn.prepare(&format!("SELECT thread_id, name FROM {table}"))?;
                        let rows = stmt
                            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(rows)
                    })
                    .await?;
                Ok(rows)
            }
            .await;

            match result {
                Ok(rows) => rows
                    .into_iter()
                    .filter_map(|(id, name)| match ThreadId::from_str(&id) {
                        Ok(thread_id) => Some((thread_id, name)),
                        Err(err) => {
                            tracing::warn!(thread_id = %id, error = %err, "skipping malformed thread id row");
                            None
                        }
                    })
                    .collect(),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to list thread names");
                    HashMap::new()
                }
            }
        })
    }

    fn delete(&self, thread_id: ThreadId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let table = self.table.clone();
            let id_str = thread_id.to_string();
            let result = self
                .conn
                .call(move |conn| {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE thread_id = ?1"),
                        rusqlite::params![id_str],
                    )?;
                    Ok(())
                })
                .await;

            match result {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(%thread_id, error = %err, "failed to delete thread name");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn open_registry() -> SqliteThreadRegistry {
        let conn = Arc::new(Connection::open_in_memory().await.unwrap());
        SqliteThreadRegistry::new(conn, "thread_names")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_get_round_trip() {
        let registry = open_registry().await;
        let id = ThreadId::new();

        assert!(registry.upsert(id, "first question").await);
        assert_eq!(registry.get(id).await.as_deref(), Some("first question"));
    }

    #[tokio::test]
    async fn test_rename_last_write_wins() {
        let registry = open_registry().await;
        let id = ThreadId::new();

        assert!(registry.upsert(id, "old name").await);
        assert!(registry.rename(id, "new name").await);
        assert_eq!(registry.get(id).await.as_deref(), Some("new name"));
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let registry = open_registry().await;
        assert_eq!(registry.get(ThreadId::new()).await, None);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let registry = open_registry().await;
        let id = ThreadId::new();

        // No row yet: still success.
        assert!(registry.delete(id).await);

        assert!(registry.upsert(id, "doomed").await);
        assert!(registry.delete(id).await);
        assert_eq!(registry.get(id).await, None);
        assert!(registry.delete(id).await);
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let registry = open_registry().await;
        let id = ThreadId::new();

        assert!(!registry.upsert(id, "").await);
        assert_eq!(registry.get(id).await, None);
    }

    #[tokio::test]
    async fn test_list_all_tracks_upserts_and_deletes() {
        let registry = open_registry().await;
        let kept = ThreadId::new();
        let dropped = ThreadId::new();

        assert!(registry.upsert(kept, "kept").await);
        assert!(registry.upsert(dropped, "dropped").await);
        assert!(registry.delete(dropped).await);

        let all = registry.list_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all.get(&kept).map(String::as_str), Some("kept"));
    }

    #[tokio::test]
    async fn test_rename_preserves_created_at() {
        let registry = open_registry().await;
        let id = ThreadId::new();
        assert!(registry.upsert(id, "before").await);

        let created_before = read_created_at(&registry, id).await;
        assert!(registry.rename(id, "after").await);
        let created_after = read_created_at(&registry, id).await;

        assert_eq!(created_before, created_after);
        assert_eq!(registry.get(id).await.as_deref(), Some("after"));
    }

    async fn read_created_at(registry: &SqliteThreadRegistry, id: ThreadId) -> String {
        let id_str = id.to_string();
        registry
            .conn
            .call(move |conn| {
                let value: String = conn.query_row(
                    "SELECT created_at FROM thread_names WHERE thread_id = ?1",
                    rusqlite::params![id_str],
                    |row| row.get(0),
                )?;
                Ok(value)
            })
            .await
            .unwrap()
    }
}
