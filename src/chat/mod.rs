//! Conversation-thread management.
//!
//! The pieces with real design content live here:
//! - [`registry`]: the durable `thread_id -> display name` table.
//! - [`session`]: the lifecycle coordinator (lazy naming, listing, cascade
//!   delete) and its explicit session state.
//!
//! The rest is glue to external collaborators: [`checkpoints`] holds the
//! checkpoint-store contract plus a local `SQLite` adapter, and [`engine`]
//! holds the conversation-engine contract plus a Rig/Ollama implementation.

/// Checkpoint store contract and the `SQLite` adapter.
pub mod checkpoints;
/// Configuration for storage and the LLM.
pub mod config;
/// Conversation engine contract and the Rig implementation.
pub mod engine;
/// Error types for the chat subsystem.
pub mod errors;
/// Thread identifier newtype.
pub mod ids;
/// Role-tagged messages and stream fragments.
pub mod message;
/// Thread registry: durable display names.
pub mod registry;
/// Session context and thread lifecycle coordinator.
pub mod session;
