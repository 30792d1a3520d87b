use serde::{Deserialize, Serialize};

use crate::retrieve_chunks::SearchResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Numbers the hits from 1 in the order given.
pub fn format_context(hits: &[SearchResult]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[Fragment {}] {}", i + 1, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System instruction carrying the context, then the prior turns, then `question`.
pub fn build_messages(
    system_prompt: &str,
    context: &str,
    history: &[ChatMessage],
    question: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(format!(
        "{system_prompt}\n\nCONTEXT:\n{context}"
    )));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(question));
    messages
}
