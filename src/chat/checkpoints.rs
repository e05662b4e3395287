//! Checkpoint store: persisted message history per thread.
//!
//! The [`CheckpointStore`] trait is the contract the coordinator and the
//! conversation engine consume; [`SqliteCheckpointStore`] is a local adapter
//! that keeps one row per message in the same database file as the thread
//! registry. Unlike the registry, this layer surfaces storage errors to its
//! callers; the coordinator decides how to degrade.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio_rusqlite::Connection;

use crate::chat::errors::{ChatError, ChatResult};
use crate::chat::ids::ThreadId;
use crate::chat::message::{ChatMessage, ChatRole};

/// Boxed future type for checkpoint operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-thread durable message history.
pub trait CheckpointStore: Send + Sync {
    /// Enumerate all thread ids with at least one persisted message, in the
    /// store's own order (first-persisted first).
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_threads(&self) -> StoreFuture<'_, ChatResult<Vec<ThreadId>>>;

    /// Load the accumulated messages for a thread, oldest first.
    ///
    /// A thread with no history yields an empty vector, not an error.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn load_messages(&self, thread_id: ThreadId) -> StoreFuture<'_, ChatResult<Vec<ChatMessage>>>;

    /// Durably append a full exchange in one transaction.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn append_exchange(
        &self,
        thread_id: ThreadId,
        messages: Vec<ChatMessage>,
    ) -> StoreFuture<'_, ChatResult<()>>;

    /// Delete every stored record for a thread. Idempotent.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_thread(&self, thread_id: ThreadId) -> StoreFuture<'_, ChatResult<()>>;
}

/// `SQLite` implementation of checkpoint storage.
pub struct SqliteCheckpointStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteCheckpointStore {
    /// Initialize the store and create the table if it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn new(conn: Arc<Connection>, table: &str) -> ChatResult<Self> {
        let table = table.to_string();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    thread_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    ts INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table_name}_thread
                    ON {table_name} (thread_id, id);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn list_threads(&self) -> StoreFuture<'_, ChatResult<Vec<ThreadId>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let ids = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT thread_id FROM {table}
                         GROUP BY thread_id
                         ORDER BY MIN(id)"
                    ))?;
                    let ids = stmt
                        .query_map([], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(ids)
                })
                .await?;

            let mut threads = Vec::with_capacity(ids.len());
            for id in ids {
                threads.push(
                    ThreadId::from_str(&id)
                        .map_err(|err| ChatError::InvalidRecord(format!("thread id: {err}")))?,
                );
            }
            Ok(threads)
        })
    }

    fn load_messages(&self, thread_id: ThreadId) -> StoreFuture<'_, ChatResult<Vec<ChatMessage>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let id_str = thread_id.to_string();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT role, content, ts FROM {table}
                         WHERE thread_id = ?1
                         ORDER BY id"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![id_str], |row| {
                            let role: String = row.get(0)?;
                            let content: String = row.get(1)?;
                            let ts: i64 = row.get(2)?;
                            Ok((role, content, ts))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            let mut messages = Vec::with_capacity(rows.len());
            for (role, content, ts) in rows {
                let role = ChatRole::from_str(&role)
                    .map_err(|value| ChatError::InvalidRecord(format!("role: {value}")))?;
                let timestamp = Utc
                    .timestamp_millis_opt(ts)
                    .single()
                    .ok_or_else(|| ChatError::InvalidRecord("timestamp".to_string()))?;
                messages.push(ChatMessage {
                    role,
                    content,
                    timestamp,
                });
            }
            Ok(messages)
        })
    }

    fn append_exchange(
        &self,
        thread_id: ThreadId,
        messages: Vec<ChatMessage>,
    ) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            if messages.is_empty() {
                return Ok(());
            }

            let table = self.table.clone();
            let id_str = thread_id.to_string();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    {
                        let mut stmt = tx.prepare(&format!(
                            "INSERT INTO {table} (thread_id, role, content, ts)
                             VALUES (?1, ?2, ?3, ?4)"
                        ))?;
                        for message in messages {
                            stmt.execute(rusqlite::params![
                                id_str,
                                message.role.to_string(),
                                message.content,
                                message.timestamp.timestamp_millis()
                            ])?;
                        }
                    }
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn delete_thread(&self, thread_id: ThreadId) -> StoreFuture<'_, ChatResult<()>> {
        Box::pin(async move {
            let table = self.table.clone();
            let id_str = thread_id.to_string();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE thread_id = ?1"),
                        rusqlite::params![id_str],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn open_store() -> SqliteCheckpointStore {
        let conn = Arc::new(Connection::open_in_memory().await.unwrap());
        SqliteCheckpointStore::new(conn, "checkpoints")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_and_load_ordered() {
        let store = open_store().await;
        let id = ThreadId::new();

        store
            .append_exchange(
                id,
                vec![
                    ChatMessage::user("hello"),
                    ChatMessage::assistant("hi, how can I help?"),
                ],
            )
            .await
            .unwrap();

        let messages = store.load_messages(id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn test_load_unknown_thread_is_empty() {
        let store = open_store().await;
        assert!(store.load_messages(ThreadId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_threads_first_persisted_first() {
        let store = open_store().await;
        let first = ThreadId::new();
        let second = ThreadId::new();

        store
            .append_exchange(first, vec![ChatMessage::user("a")])
            .await
            .unwrap();
        store
            .append_exchange(second, vec![ChatMessage::user("b")])
            .await
            .unwrap();
        // A later exchange must not move `first` in the enumeration.
        store
            .append_exchange(first, vec![ChatMessage::user("c")])
            .await
            .unwrap();

        assert_eq!(store.list_threads().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_delete_thread_is_idempotent() {
        let store = open_store().await;
        let id = ThreadId::new();

        store
            .append_exchange(id, vec![ChatMessage::user("bye")])
            .await
            .unwrap();
        store.delete_thread(id).await.unwrap();
        assert!(store.load_messages(id).await.unwrap().is_empty());
        assert!(store.list_threads().await.unwrap().is_empty());

        // Second delete on the same id is a no-op.
        store.delete_thread(id).await.unwrap();
    }
}
