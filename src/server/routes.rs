//! HTTP route handlers for the Chatloom API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::chat::ids::ThreadId;
use crate::chat::message::{ChatFragment, ChatMessage};

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/threads", get(list_threads).post(create_thread))
        .route(
            "/api/threads/{thread_id}",
            axum::routing::patch(rename_thread).delete(delete_thread),
        )
        .route(
            "/api/threads/{thread_id}/messages",
            get(get_messages).post(send_message),
        )
        .nest_service("/", ServeDir::new("static"))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chatloom",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// One thread in the sidebar listing.
#[derive(Debug, Serialize)]
pub struct ThreadSummary {
    /// Thread identifier.
    pub thread_id: ThreadId,
    /// Display name ("Untitled" until the first message).
    pub name: String,
}

/// Thread listing response.
#[derive(Debug, Serialize)]
pub struct ThreadsResponse {
    /// Known threads, most recently created first.
    pub threads: Vec<ThreadSummary>,
    /// The currently active thread.
    pub active: ThreadId,
}

/// List all known threads with display names.
async fn list_threads(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let coordinator = state.coordinator.lock().await;
    let threads = coordinator
        .list_threads()
        .into_iter()
        .map(|thread_id| ThreadSummary {
            thread_id,
            name: coordinator.display_name(thread_id),
        })
        .collect();

    Json(ThreadsResponse {
        threads,
        active: coordinator.active_thread(),
    })
}

/// New-thread response.
#[derive(Debug, Serialize)]
pub struct NewThreadResponse {
    /// The freshly allocated active thread.
    pub thread_id: ThreadId,
}

/// Open a fresh thread and make it active.
async fn create_thread(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut coordinator = state.coordinator.lock().await;
    let thread_id = coordinator.new_thread();
    Json(NewThreadResponse { thread_id })
}

/// Rename request body.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    /// New display name.
    pub name: String,
}

/// Rename a thread.
async fn rename_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Json(request): Json<RenameRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut coordinator = state.coordinator.lock().await;
    if coordinator.rename_thread(thread_id, &request.name).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to rename thread".to_string(),
        ))
    }
}

/// Cascade-delete response.
#[derive(Debug, Serialize)]
pub struct DeleteThreadResponse {
    /// The active thread after deletion (fresh if the deleted one was active).
    pub active: ThreadId,
}

/// Cascade-delete a thread across both stores.
async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
) -> Result<Json<DeleteThreadResponse>, (StatusCode, String)> {
    let mut coordinator = state.coordinator.lock().await;
    if coordinator.delete_thread(thread_id).await {
        Ok(Json(DeleteThreadResponse {
            active: coordinator.active_thread(),
        }))
    } else {
        Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to delete thread".to_string(),
        ))
    }
}

/// Load the persisted conversation for a thread.
async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
) -> Json<Vec<ChatMessage>> {
    let coordinator = state.coordinator.lock().await;
    Json(coordinator.load_conversation(thread_id).await)
}

/// Send-message request body.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// The user's message.
    pub message: String,
}

/// Send a user message on a thread and stream the reply.
///
/// The response is an SSE stream: `token` events carry assistant text,
/// `status` events carry tool notices, and a final `done` event closes the
/// exchange. The thread becomes active and, on its first message, gets its
/// display name here.
async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    Json(request): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    {
        let mut coordinator = state.coordinator.lock().await;
        if coordinator.active_thread() != thread_id {
            let _previous = coordinator.switch_thread(thread_id).await;
        }
        // Naming failures degrade to "Untitled"; the exchange still runs.
        let _named = coordinator
            .record_first_message(thread_id, &request.message)
            .await;
    }

    let fragments = state
        .engine
        .send_message(thread_id, &request.message)
        .await
        .map_err(|err| {
            tracing::error!(%thread_id, error = %err, "conversation engine failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "conversation engine failed".to_string(),
            )
        })?;

    let events = fragments
        .map(|fragment| {
            Ok::<Event, Infallible>(match fragment {
                ChatFragment::Assistant(text) => Event::default().event("token").data(text),
                ChatFragment::ToolStatus(text) => Event::default().event("status").data(text),
            })
        })
        .chain(stream::once(async {
            Ok(Event::default().event("done").data("end"))
        }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
