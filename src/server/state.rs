//! Application state shared across all request handlers.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_rusqlite::Connection;

use crate::chat::checkpoints::{CheckpointStore, SqliteCheckpointStore};
use crate::chat::config::ChatConfig;
use crate::chat::engine::{ConversationEngine, RigConversationEngine};
use crate::chat::errors::ChatResult;
use crate::chat::registry::SqliteThreadRegistry;
use crate::chat::session::ThreadCoordinator;

/// Shared application state.
///
/// One logical session: the coordinator is behind a single mutex, and both
/// stores share one `SQLite` connection serialized by its worker thread.
pub struct AppState {
    /// Thread lifecycle coordinator.
    pub coordinator: Mutex<ThreadCoordinator>,
    /// Conversation engine for LLM exchanges.
    pub engine: Arc<dyn ConversationEngine>,
}

impl AppState {
    /// Open storage, wire the stores and engine, and hydrate the session.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the database cannot
    /// be opened, or the LLM client cannot be built.
    pub async fn new(config: &ChatConfig) -> ChatResult<Arc<Self>> {
        config.validate()?;

        let conn = Arc::new(Connection::open(&config.storage.sqlite_path).await?);
        let registry = Arc::new(
            SqliteThreadRegistry::new(Arc::clone(&conn), &config.storage.thread_table).await?,
        );
        let checkpoints =
            Arc::new(SqliteCheckpointStore::new(conn, &config.storage.checkpoint_table).await?);

        let engine = Arc::new(RigConversationEngine::new(
            &config.llm,
            Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
        )?);

        let coordinator = ThreadCoordinator::start(registry, checkpoints).await;

        Ok(Arc::new(Self {
            coordinator: Mutex::new(coordinator),
            engine,
        }))
    }
}
