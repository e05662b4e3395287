//! Conversation engine: one LLM invocation per user message.
//!
//! The engine is the single "graph node" of the application: given a thread
//! id and a new user message it produces a live sequence of tagged output
//! fragments and durably appends the full exchange to the checkpoint store.
//! Role tags are decided here, once; downstream consumers only match on
//! [`ChatFragment`] variants.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use futures::stream;
use reqwest::Client as ReqwestClient;
use rig::client::CompletionClient;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;
use rig::providers::ollama;
use tracing::debug;

use crate::chat::checkpoints::CheckpointStore;
use crate::chat::config::LlmConfig;
use crate::chat::errors::{ChatError, ChatResult};
use crate::chat::ids::ThreadId;
use crate::chat::message::{ChatFragment, ChatMessage, ChatRole};

/// Boxed future type for engine operations.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Live sequence of conversation output fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = ChatFragment> + Send>>;

/// System prompt for the chat model.
const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer the user's latest message, using the \
     preceding conversation for context. Be concise and factual.";

/// Keep the prompt bounded; oldest history is dropped first.
const MAX_HISTORY_CHARS: usize = 8000;

/// External collaborator contract: run one conversational exchange.
pub trait ConversationEngine: Send + Sync {
    /// Send a user message on a thread.
    ///
    /// On success the exchange has already been durably appended to the
    /// checkpoint store; the returned stream replays the model's output as
    /// tagged fragments.
    ///
    /// # Errors
    /// Returns an error if history cannot be loaded, the completion fails,
    /// or the exchange cannot be persisted.
    fn send_message(
        &self,
        thread_id: ThreadId,
        user_message: &str,
    ) -> EngineFuture<'_, ChatResult<FragmentStream>>;
}

/// Rig/Ollama implementation of the conversation engine.
pub struct RigConversationEngine {
    model: ollama::CompletionModel,
    checkpoints: Arc<dyn CheckpointStore>,
    temperature: f64,
    max_tokens: Option<u64>,
}

impl RigConversationEngine {
    /// Create a new engine over the configured Ollama model.
    ///
    /// # Errors
    /// Returns an error if the Ollama client cannot be built.
    pub fn new(config: &LlmConfig, checkpoints: Arc<dyn CheckpointStore>) -> ChatResult<Self> {
        let builder = ollama::Client::<ReqwestClient>::builder().api_key(rig::client::Nothing);
        let builder = if let Some(base_url) = &config.base_url {
            builder.base_url(base_url)
        } else {
            builder
        };
        let client = builder.build().map_err(ChatError::from)?;
        let model = client.completion_model(config.model.clone());

        Ok(Self {
            model,
            checkpoints,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

impl ConversationEngine for RigConversationEngine {
    fn send_message(
        &self,
        thread_id: ThreadId,
        user_message: &str,
    ) -> EngineFuture<'_, ChatResult<FragmentStream>> {
        let user_message = user_message.to_string();
        Box::pin(async move {
            let history = self.checkpoints.load_messages(thread_id).await?;
            let prompt = build_prompt(&history, &user_message);

            debug!(%thread_id, history_len = history.len(), "running completion");

            let request = self
                .model
                .completion_request(prompt)
                .preamble(CHAT_SYSTEM_PROMPT.to_string())
                .temperature(self.temperature)
                .max_tokens_opt(self.max_tokens)
                .build();

            let response = self.model.completion(request).await?;
            let fragments = collect_fragments(&response.choice);
            let assistant_text = assistant_text(&fragments);

            self.checkpoints
                .append_exchange(
                    thread_id,
                    vec![
                        ChatMessage::user(user_message),
                        ChatMessage::assistant(assistant_text),
                    ],
                )
                .await?;

            Ok(Box::pin(stream::iter(fragments)) as FragmentStream)
        })
    }
}

/// Build a role-tagged prompt block from history plus the new user message.
///
/// Tool-status rows never re-enter the prompt. History is tail-biased: when
/// the budget is exceeded, the oldest lines are dropped.
fn build_prompt(history: &[ChatMessage], user_message: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut char_count = 0;

    for message in history.iter().rev() {
        let prefix = match message.role {
            ChatRole::User => "User: ",
            ChatRole::Assistant => "Assistant: ",
            ChatRole::ToolStatus => continue,
        };
        let line = format!("{prefix}{}\n", message.content);
        let line_len = line.chars().count();
        if char_count + line_len > MAX_HISTORY_CHARS {
            break;
        }
        char_count += line_len;
        lines.push(line);
    }
    lines.reverse();

    let mut prompt = String::new();
    for line in &lines {
        prompt.push_str(line);
    }
    prompt.push_str("User: ");
    prompt.push_str(user_message);
    prompt.push_str("\nAssistant:");
    prompt
}

/// Map the model's response content to tagged fragments.
fn collect_fragments(choice: &rig::OneOrMany<AssistantContent>) -> Vec<ChatFragment> {
    let mut fragments = Vec::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            fragments.push(ChatFragment::Assistant(text.text.clone()));
        } else {
            fragments.push(ChatFragment::ToolStatus(describe_tool_content(content)));
        }
    }
    fragments
}

/// Render non-text content as a short status notice.
fn describe_tool_content(content: &AssistantContent) -> String {
    serde_json::to_string(content).unwrap_or_else(|_| "tool invocation".to_string())
}

/// Concatenate the assistant-tagged fragment text.
fn assistant_text(fragments: &[ChatFragment]) -> String {
    let mut out = String::new();
    for fragment in fragments {
        if let ChatFragment::Assistant(text) = fragment {
            out.push_str(text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig::OneOrMany;
    use rig::message::Text;

    #[test]
    fn test_build_prompt_tags_roles() {
        let history = vec![
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Hi there!"),
        ];

        let prompt = build_prompt(&history, "What next?");
        assert!(prompt.contains("User: Hello\n"));
        assert!(prompt.contains("Assistant: Hi there!\n"));
        assert!(prompt.ends_with("User: What next?\nAssistant:"));
    }

    #[test]
    fn test_build_prompt_drops_oldest_when_over_budget() {
        let old = "x".repeat(MAX_HISTORY_CHARS);
        let history = vec![ChatMessage::user(old), ChatMessage::assistant("recent")];

        let prompt = build_prompt(&history, "hi");
        assert!(!prompt.contains("xxx"));
        assert!(prompt.contains("Assistant: recent\n"));
    }

    #[test]
    fn test_collect_fragments_text_is_assistant() {
        let choice = OneOrMany::one(AssistantContent::Text(Text {
            text: "answer".to_string(),
        }));

        let fragments = collect_fragments(&choice);
        assert_eq!(fragments, vec![ChatFragment::Assistant("answer".to_string())]);
        assert_eq!(assistant_text(&fragments), "answer");
    }

    #[test]
    fn test_assistant_text_skips_tool_status() {
        let fragments = vec![
            ChatFragment::ToolStatus("searching".to_string()),
            ChatFragment::Assistant("done".to_string()),
        ];
        assert_eq!(assistant_text(&fragments), "done");
    }
}
