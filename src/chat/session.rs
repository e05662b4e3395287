//! Session state and the thread lifecycle coordinator.
//!
//! The coordinator sits between the UI layer and the two storage
//! collaborators. It owns the policies that are not simple passthroughs:
//! which thread is active, lazy naming from the first user message, and
//! best-effort cascade deletion across both stores.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chat::checkpoints::CheckpointStore;
use crate::chat::ids::ThreadId;
use crate::chat::message::ChatMessage;
use crate::chat::registry::ThreadRegistry;

/// Display names are previews of the first message, cut at this many
/// characters (Unicode scalar values, not bytes).
pub const NAME_PREVIEW_CHARS: usize = 30;

/// Marker appended when a preview was truncated.
pub const NAME_ELLIPSIS: &str = "...";

/// Fallback label for threads that have no name yet.
pub const UNTITLED: &str = "Untitled";

/// Derive a display name from a first message.
///
/// Messages of at most [`NAME_PREVIEW_CHARS`] characters are kept verbatim;
/// longer ones are cut to exactly that many characters plus the marker.
#[must_use]
pub fn preview_name(message: &str) -> String {
    if message.chars().count() <= NAME_PREVIEW_CHARS {
        message.to_string()
    } else {
        let mut name: String = message.chars().take(NAME_PREVIEW_CHARS).collect();
        name.push_str(NAME_ELLIPSIS);
        name
    }
}

/// Mutable per-session state, loaded once at start and updated explicitly at
/// each mutation. Nothing here is ambient or global.
#[derive(Debug)]
pub struct SessionContext {
    /// The thread new messages go to.
    pub active_thread: ThreadId,
    /// Cached display names, keyed by thread id.
    pub names: HashMap<ThreadId, String>,
    /// Known thread ids in creation order, oldest first.
    pub threads: Vec<ThreadId>,
}

impl SessionContext {
    /// Record a thread id if it is not already known.
    fn add_thread(&mut self, thread_id: ThreadId) {
        if !self.threads.contains(&thread_id) {
            self.threads.push(thread_id);
        }
    }

    /// Forget everything cached about a thread.
    fn evict(&mut self, thread_id: ThreadId) {
        self.threads.retain(|id| *id != thread_id);
        self.names.remove(&thread_id);
    }
}

/// Orchestrates thread lifecycle across the registry and checkpoint store.
pub struct ThreadCoordinator {
    registry: Arc<dyn ThreadRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    session: SessionContext,
}

impl ThreadCoordinator {
    /// Hydrate a coordinator: load all stored names, enumerate persisted
    /// threads, and open a fresh active thread.
    ///
    /// The fresh (still empty) thread is part of the listing immediately; a
    /// registry row for it only appears on its first user message.
    pub async fn start(
        registry: Arc<dyn ThreadRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let names = registry.list_all().await;
        let threads = match checkpoints.list_threads().await {
            Ok(threads) => threads,
            Err(err) => {
                tracing::warn!(error = %err, "failed to enumerate persisted threads");
                Vec::new()
            }
        };

        let mut session = SessionContext {
            active_thread: ThreadId::new(),
            names,
            threads,
        };
        session.add_thread(session.active_thread);

        Self {
            registry,
            checkpoints,
            session,
        }
    }

    /// The currently active thread.
    #[must_use]
    pub const fn active_thread(&self) -> ThreadId {
        self.session.active_thread
    }

    /// Open a fresh thread and make it active.
    ///
    /// Purely in-memory: no registry row (no name yet) and no checkpoint row
    /// (no messages yet); both are created lazily on first use.
    pub fn new_thread(&mut self) -> ThreadId {
        let thread_id = ThreadId::new();
        self.session.add_thread(thread_id);
        self.session.active_thread = thread_id;
        thread_id
    }

    /// Name a thread from its first user message.
    ///
    /// A thread that already has a name is left untouched; returns whether a
    /// name was assigned by this call.
    pub async fn record_first_message(&mut self, thread_id: ThreadId, message: &str) -> bool {
        self.session.add_thread(thread_id);

        if self.session.names.contains_key(&thread_id) {
            return false;
        }
        if let Some(existing) = self.registry.get(thread_id).await {
            // Named by an earlier session; refresh the cache.
            self.session.names.insert(thread_id, existing);
            return false;
        }

        let name = preview_name(message);
        if self.registry.upsert(thread_id, &name).await {
            self.session.names.insert(thread_id, name);
            true
        } else {
            false
        }
    }

    /// Explicit user-initiated rename.
    pub async fn rename_thread(&mut self, thread_id: ThreadId, new_name: &str) -> bool {
        if self.registry.rename(thread_id, new_name).await {
            self.session
                .names
                .insert(thread_id, new_name.to_string());
            true
        } else {
            false
        }
    }

    /// Display name for a thread, or the untitled fallback.
    #[must_use]
    pub fn display_name(&self, thread_id: ThreadId) -> String {
        self.session
            .names
            .get(&thread_id)
            .cloned()
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    /// All known threads, most recently created first.
    ///
    /// The set is the checkpoint store's enumeration (hydrated at start)
    /// merged with threads opened in this session, deduplicated; the active
    /// thread is listed even before its first message.
    #[must_use]
    pub fn list_threads(&self) -> Vec<ThreadId> {
        self.session.threads.iter().rev().copied().collect()
    }

    /// Make a thread active and return its persisted conversation.
    pub async fn switch_thread(&mut self, thread_id: ThreadId) -> Vec<ChatMessage> {
        self.session.add_thread(thread_id);
        self.session.active_thread = thread_id;
        self.load_conversation(thread_id).await
    }

    /// Persisted conversation for a thread; storage failure degrades to an
    /// empty history.
    pub async fn load_conversation(&self, thread_id: ThreadId) -> Vec<ChatMessage> {
        match self.checkpoints.load_messages(thread_id).await {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(%thread_id, error = %err, "failed to load conversation");
                Vec::new()
            }
        }
    }

    /// Best-effort cascade delete across both stores.
    ///
    /// Checkpoint rows and the name row are removed independently; there is
    /// no transaction spanning the two stores. A partial failure reports
    /// `false` and may leave an orphaned half behind, but both deletes are
    /// idempotent, so retrying the same id cleans up whatever remains. If
    /// the deleted thread was active, a fresh active thread is opened.
    pub async fn delete_thread(&mut self, thread_id: ThreadId) -> bool {
        let checkpoints_ok = match self.checkpoints.delete_thread(thread_id).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%thread_id, error = %err, "failed to delete checkpoints");
                false
            }
        };
        let registry_ok = self.registry.delete(thread_id).await;

        self.session.evict(thread_id);
        if self.session.active_thread == thread_id {
            self.new_thread();
        }

        checkpoints_ok && registry_ok
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::chat::checkpoints::SqliteCheckpointStore;
    use crate::chat::registry::SqliteThreadRegistry;
    use tokio_rusqlite::Connection;

    async fn open_coordinator() -> (ThreadCoordinator, Arc<SqliteCheckpointStore>) {
        let conn = Arc::new(Connection::open_in_memory().await.unwrap());
        let registry = Arc::new(
            SqliteThreadRegistry::new(Arc::clone(&conn), "thread_names")
                .await
                .unwrap(),
        );
        let checkpoints = Arc::new(
            SqliteCheckpointStore::new(conn, "checkpoints")
                .await
                .unwrap(),
        );
        let coordinator =
            ThreadCoordinator::start(registry, Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>)
                .await;
        (coordinator, checkpoints)
    }

    #[test]
    fn test_preview_short_message_verbatim() {
        assert_eq!(preview_name("short message"), "short message");

        let exactly_thirty = "a".repeat(30);
        assert_eq!(preview_name(&exactly_thirty), exactly_thirty);
    }

    #[test]
    fn test_preview_long_message_truncated() {
        let message = "Hello there, how are you today?"; // 31 chars
        let name = preview_name(message);
        assert_eq!(name, "Hello there, how are you today...");
        assert_eq!(name.chars().count(), 33);
    }

    #[test]
    fn test_preview_counts_chars_not_bytes() {
        let message = "é".repeat(31);
        let name = preview_name(&message);
        assert_eq!(name.chars().count(), 33);
        assert!(name.ends_with(NAME_ELLIPSIS));
    }

    #[tokio::test]
    async fn test_new_thread_is_listed_before_first_message() {
        let (mut coordinator, _) = open_coordinator().await;

        let first_active = coordinator.active_thread();
        assert_eq!(coordinator.list_threads(), vec![first_active]);

        let second = coordinator.new_thread();
        assert_eq!(coordinator.active_thread(), second);
        // Most recently created first.
        assert_eq!(coordinator.list_threads(), vec![second, first_active]);
    }

    #[tokio::test]
    async fn test_first_message_names_thread_once() {
        let (mut coordinator, _) = open_coordinator().await;
        let id = coordinator.active_thread();

        assert!(coordinator.record_first_message(id, "What is Rust?").await);
        assert_eq!(coordinator.display_name(id), "What is Rust?");

        // A later message must not rename the thread.
        assert!(!coordinator.record_first_message(id, "second message").await);
        assert_eq!(coordinator.display_name(id), "What is Rust?");
    }

    #[tokio::test]
    async fn test_unnamed_thread_displays_untitled() {
        let (coordinator, _) = open_coordinator().await;
        assert_eq!(
            coordinator.display_name(coordinator.active_thread()),
            UNTITLED
        );
    }

    #[tokio::test]
    async fn test_rename_updates_name() {
        let (mut coordinator, _) = open_coordinator().await;
        let id = coordinator.active_thread();

        assert!(coordinator.record_first_message(id, "original").await);
        assert!(coordinator.rename_thread(id, "renamed").await);
        assert_eq!(coordinator.display_name(id), "renamed");
    }

    #[tokio::test]
    async fn test_delete_active_thread_full_cascade() {
        let (mut coordinator, checkpoints) = open_coordinator().await;
        let t1 = coordinator.active_thread();

        // 31-char first message: stored truncated with the marker.
        assert!(
            coordinator
                .record_first_message(t1, "Hello there, how are you today?")
                .await
        );
        assert_eq!(
            coordinator.display_name(t1),
            "Hello there, how are you today..."
        );
        assert!(!coordinator.record_first_message(t1, "second message").await);

        checkpoints
            .append_exchange(
                t1,
                vec![
                    ChatMessage::user("Hello there, how are you today?"),
                    ChatMessage::assistant("Doing well, thanks."),
                ],
            )
            .await
            .unwrap();

        assert!(coordinator.delete_thread(t1).await);

        let active = coordinator.active_thread();
        assert_ne!(active, t1);
        assert!(!coordinator.list_threads().contains(&t1));
        assert_eq!(coordinator.display_name(t1), UNTITLED);
        assert!(checkpoints.load_messages(t1).await.unwrap().is_empty());
        assert!(checkpoints.list_threads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_thread_succeeds() {
        let (mut coordinator, _) = open_coordinator().await;
        assert!(coordinator.delete_thread(ThreadId::new()).await);
    }

    #[tokio::test]
    async fn test_persisted_threads_survive_restart() {
        let conn = Arc::new(Connection::open_in_memory().await.unwrap());
        let registry = Arc::new(
            SqliteThreadRegistry::new(Arc::clone(&conn), "thread_names")
                .await
                .unwrap(),
        );
        let checkpoints = Arc::new(
            SqliteCheckpointStore::new(Arc::clone(&conn), "checkpoints")
                .await
                .unwrap(),
        );

        let old = ThreadId::new();
        assert!(registry.upsert(old, "from last session").await);
        checkpoints
            .append_exchange(old, vec![ChatMessage::user("hi")])
            .await
            .unwrap();

        let coordinator = ThreadCoordinator::start(
            Arc::clone(&registry) as Arc<dyn ThreadRegistry>,
            checkpoints,
        )
        .await;

        assert!(coordinator.list_threads().contains(&old));
        assert_eq!(coordinator.display_name(old), "from last session");
    }
}
