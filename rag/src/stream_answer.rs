use futures::future;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::json;
use tracing::warn;

use crate::generate::TokenStream;

pub const DONE_MARKER: &str = "[DONE]";

pub const UNAVAILABLE_MESSAGE: &str =
    "The assistant is unavailable right now. Please try again in a moment.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    /// Model output, forwarded as soon as it arrives.
    Token(String),
    /// A complete message produced by the pipeline itself.
    Notice(String),
    Done,
}

impl ChatEvent {
    /// Server-sent-event frame for this event.
    pub fn to_sse(&self) -> String {
        match self {
            ChatEvent::Token(text) => format!("data: {}\n\n", json!({ "text": text })),
            ChatEvent::Notice(text) => {
                // one `data:` field per line keeps multi-line notices in a single event
                let mut frame: String = text
                    .split('\n')
                    .map(|line| format!("data: {}\n", line.trim_end_matches('\r')))
                    .collect();
                frame.push('\n');
                frame
            }
            ChatEvent::Done => format!("data: {DONE_MARKER}\n\n"),
        }
    }
}

pub type ChatStream = BoxStream<'static, ChatEvent>;

/// A single notice followed by the end marker.
pub fn notice_stream(message: impl Into<String>) -> ChatStream {
    stream::iter([ChatEvent::Notice(message.into()), ChatEvent::Done]).boxed()
}

/// Forwards model tokens, replacing a mid-stream failure with a notice, and always ends with `Done`.
pub fn answer_stream(tokens: TokenStream) -> ChatStream {
    stream::unfold(Some(tokens), |state| async move {
        let mut tokens = state?;
        match tokens.next().await {
            Some(Ok(text)) => Some((ChatEvent::Token(text), Some(tokens))),
            Some(Err(err)) => {
                warn!("Answer stream interrupted: {err}");
                Some((ChatEvent::Notice(UNAVAILABLE_MESSAGE.to_string()), None))
            }
            None => None,
        }
    })
    .chain(stream::once(future::ready(ChatEvent::Done)))
    .boxed()
}
