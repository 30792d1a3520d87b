use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::build_prompt::ChatMessage;
use crate::config::Config;
use crate::error::{RagError, Result};
use crate::http::{ByteStream, HttpClient};

const SERVICE: &str = "ollama";

/// Incremental answer text; an `Err` item ends the answer.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    content: Option<String>,
}

pub struct OllamaChat {
    http: HttpClient,
    base_url: String,
    model: String,
}

impl OllamaChat {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            http: HttpClient::streaming(SERVICE, Duration::from_secs(cfg.http_timeout_secs))?,
            base_url: cfg.ollama_url.clone(),
            model: cfg.chat_model.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let url = format!("{}/api/chat", self.base_url);
        let req = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        let body = self.http.post_stream(&url, &req).await?;
        Ok(decode_chat_stream(body))
    }
}

/// Splits a byte stream into lines, tolerating lines cut across chunks.
#[derive(Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

enum Line {
    Text(String),
    Skip,
    End,
    Failed(RagError),
}

fn parse_line(line: &str) -> Line {
    let chunk: ChatChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping unparsable stream line: {e}");
            return Line::Skip;
        }
    };
    if let Some(error) = chunk.error {
        return Line::Failed(RagError::upstream(SERVICE, error));
    }
    let text = chunk.message.and_then(|m| m.content).unwrap_or_default();
    match (text.is_empty(), chunk.done) {
        (false, _) => Line::Text(text),
        (true, true) => Line::End,
        (true, false) => Line::Skip,
    }
}

struct DecodeState {
    body: Option<ByteStream>,
    decoder: LineDecoder,
    pending: VecDeque<String>,
}

/// Turns Ollama's newline-delimited JSON chat body into answer increments.
pub fn decode_chat_stream(body: ByteStream) -> TokenStream {
    let state = DecodeState {
        body: Some(body),
        decoder: LineDecoder::default(),
        pending: VecDeque::new(),
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                match parse_line(&line) {
                    Line::Text(text) => return Some((Ok(text), state)),
                    Line::Skip => continue,
                    Line::End => return None,
                    Line::Failed(err) => {
                        state.body = None;
                        state.pending.clear();
                        return Some((Err(err), state));
                    }
                }
            }
            let body = state.body.as_mut()?;
            match body.next().await {
                Some(Ok(bytes)) => {
                    let lines = state.decoder.push(&bytes);
                    state.pending.extend(lines);
                }
                Some(Err(err)) => {
                    state.body = None;
                    return Some((Err(err), state));
                }
                None => {
                    state.body = None;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> ByteStream {
        let owned: Vec<Result<Vec<u8>>> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned).boxed()
    }

    async fn collect(stream: TokenStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn line_decoder_joins_split_lines() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"{\"a\":").is_empty());
        assert_eq!(decoder.push(b"1}\n{\"b\""), vec!["{\"a\":1}".to_string()]);
        assert_eq!(decoder.push(b":2}\n\n"), vec!["{\"b\":2}".to_string()]);
        assert_eq!(decoder.finish(), None);
        decoder.push(b"tail");
        assert_eq!(decoder.finish(), Some("tail".to_string()));
    }

    #[tokio::test]
    async fn yields_increments_across_chunk_boundaries() {
        let stream = decode_chat_stream(body(&[
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n{\"mess",
            "age\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ]));
        let items: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn skips_garbage_lines() {
        let stream = decode_chat_stream(body(&[
            "{\"message\":{\"content\":\"a\"}}\nnot json at all\n",
            "{\"message\":{\"content\":\"b\"}}",
        ]));
        let items: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn error_line_ends_the_stream() {
        let stream = decode_chat_stream(body(&[
            "{\"message\":{\"content\":\"a\"}}\n{\"error\":\"model not found\"}\n{\"message\":{\"content\":\"b\"}}\n",
        ]));
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("a"));
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn stalled_response_body_fails_instead_of_hanging() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 8192];
            let _ = socket.read(&mut request).await;
            let line = "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ncontent-length: 4096\r\n\r\n{line}"
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            // never sends the rest of the promised body
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let cfg = Config {
            ollama_url: format!("http://{addr}"),
            http_timeout_secs: 1,
            ..Config::default()
        };
        let chat = OllamaChat::new(&cfg).unwrap();
        let mut tokens = chat.chat_stream(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(tokens.next().await.unwrap().unwrap(), "Hel");

        let next = tokio::time::timeout(Duration::from_secs(10), tokens.next())
            .await
            .expect("stalled body must time out");
        assert!(matches!(next, Some(Err(RagError::Upstream { .. }))));
        server.abort();
    }
}
