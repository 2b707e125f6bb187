use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{CompletionClient, CompletionRequest, FragmentStream};
use crate::credential::ApiKey;
use crate::error::{ChatError, Result};
use crate::model::Model;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    /// The provider reported a failure inside an otherwise successful response.
    Error(String),
    Done,
}

/// Prefer `error.message`, fall back to the raw payload.
fn error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|message| message.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

/// Incremental decoder for the `text/event-stream` body of a completion.
///
/// Bytes are held until a full line is available, so a multi-byte character
/// split across network chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Name from the last `event:` line of the block being read.
    event: Option<String>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if let Some(event) = self.decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line)
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        if self.done {
            return None;
        }

        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            self.event = None;
            return None;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
            return None;
        }
        let data = line.strip_prefix("data:")?.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return Some(SseEvent::Done);
        }

        if self.event.as_deref() == Some("error") {
            self.done = true;
            let message = serde_json::from_str::<serde_json::Value>(data)
                .ok()
                .map(|value| error_message(value.get("error").unwrap_or(&value)))
                .unwrap_or_else(|| data.to_string());
            return Some(SseEvent::Error(message));
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(StreamChunk {
                error: Some(error), ..
            }) => {
                self.done = true;
                Some(SseEvent::Error(error_message(&error)))
            }
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|text| !text.is_empty())
                .map(SseEvent::Fragment),
            Err(e) => {
                debug!("Failed to parse stream chunk: {} - Data: {}", e, data);
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    base_url: String,
}

impl OpenAIClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn list_models() -> Vec<String> {
        Model::all()
            .into_iter()
            .map(|model| model.as_str().to_string())
            .collect()
    }
}

impl Default for OpenAIClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for OpenAIClient {
    async fn stream_chat(
        &self,
        api_key: &ApiKey,
        request: CompletionRequest,
    ) -> Result<FragmentStream> {
        let url = format!("{}/chat/completions", self.base_url);
        info!(
            model = %request.model,
            messages = request.messages.len(),
            temperature = request.temperature,
            "opening chat completion stream"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat completion request rejected");
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let mut bytes = response.bytes_stream();
        let fragments = async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(ChatError::from)?;
                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Fragment(text) => {
                            yield text;
                        }
                        SseEvent::Error(message) => {
                            warn!(error = %message, "chat completion stream reported an error");
                            Err::<(), _>(ChatError::Stream(message))?;
                        }
                        SseEvent::Done => break 'read,
                    }
                }
            }
            match decoder.finish() {
                Some(SseEvent::Fragment(text)) => {
                    yield text;
                }
                Some(SseEvent::Error(message)) => {
                    warn!(error = %message, "chat completion stream reported an error");
                    Err::<(), _>(ChatError::Stream(message))?;
                }
                _ => {}
            }
            debug!(done_marker = decoder.is_done(), "chat completion stream closed");
        };

        Ok(Box::pin(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
            })
        )
    }

    #[test]
    fn test_decodes_fragments_and_done() {
        let mut decoder = SseDecoder::new();
        let body = format!("{}{}data: [DONE]\n\n", chunk("Hel"), chunk("lo"));
        let events = decoder.push(body.as_bytes());
        assert_eq!(
            events,
            vec![
                SseEvent::Fragment("Hel".into()),
                SseEvent::Fragment("lo".into()),
                SseEvent::Done,
            ]
        );
        assert!(decoder.is_done());
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let body = chunk("héllo");
        let bytes = body.as_bytes();
        // split inside the two-byte 'é'
        let split = body.find('é').unwrap() + 1;

        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(
            decoder.push(&bytes[split..]),
            vec![SseEvent::Fragment("héllo".into())]
        );
    }

    #[test]
    fn test_role_only_delta_is_skipped() {
        let mut decoder = SseDecoder::new();
        let line = "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n";
        assert!(decoder.push(line.as_bytes()).is_empty());
    }

    #[test]
    fn test_garbage_and_comments_ignored() {
        let mut decoder = SseDecoder::new();
        let body = ": keep-alive\n\ndata: {not json}\nevent: ping\n";
        assert!(decoder.push(body.as_bytes()).is_empty());
        assert!(!decoder.is_done());
    }

    #[test]
    fn test_nothing_after_done() {
        let mut decoder = SseDecoder::new();
        let body = format!("data: [DONE]\n{}", chunk("late"));
        assert_eq!(decoder.push(body.as_bytes()), vec![SseEvent::Done]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        let body = chunk("tail");
        let unterminated = body.trim_end();
        assert!(decoder.push(unterminated.as_bytes()).is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Fragment("tail".into())));
    }

    #[test]
    fn test_error_payload_ends_stream() {
        let mut decoder = SseDecoder::new();
        let body = format!(
            "{}data: {{\"error\":{{\"message\":\"The server had an error\",\"type\":\"server_error\"}}}}\n\n{}",
            chunk("Par"),
            chunk("late")
        );
        assert_eq!(
            decoder.push(body.as_bytes()),
            vec![
                SseEvent::Fragment("Par".into()),
                SseEvent::Error("The server had an error".into()),
            ]
        );
    }

    #[test]
    fn test_named_error_event() {
        let mut decoder = SseDecoder::new();
        let body = "event: error\ndata: {\"message\":\"overloaded\"}\n\n";
        assert_eq!(
            decoder.push(body.as_bytes()),
            vec![SseEvent::Error("overloaded".into())]
        );
    }

    #[test]
    fn test_event_name_resets_between_blocks() {
        let mut decoder = SseDecoder::new();
        let body = format!("event: ping\ndata: {{}}\n\n{}", chunk("ok"));
        assert_eq!(
            decoder.push(body.as_bytes()),
            vec![SseEvent::Fragment("ok".into())]
        );
    }

    /// Serve one canned `text/event-stream` response on a local port.
    async fn serve_once(body: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // read headers plus the JSON body before answering
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    #[tokio::test]
    async fn test_error_payload_records_no_reply() {
        use crate::config::GenerationConfig;
        use crate::relay::Relay;
        use crate::state::{Conversation, Message, Role};
        use std::sync::Arc;

        let body = format!(
            "{}data: {{\"error\":{{\"message\":\"The server had an error\",\"type\":\"server_error\"}}}}\n\n",
            chunk("Par")
        );
        let base_url = serve_once(body).await;
        let relay = Relay::new(Arc::new(OpenAIClient::with_base_url(&base_url)));
        let api_key = ApiKey::parse("sk-test").unwrap();

        let mut conversation = Conversation::new();
        conversation.append(Message::user_text("hi"));
        let mut seen = String::new();
        let result = relay
            .complete(&api_key, &mut conversation, &GenerationConfig::new(), |f| {
                seen.push_str(f)
            })
            .await;

        assert!(matches!(result, Err(ChatError::Stream(ref m)) if m == "The server had an error"));
        assert_eq!(seen, "Par");
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.last().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_full_reply_over_http() {
        use crate::config::GenerationConfig;
        use crate::relay::Relay;
        use crate::state::{Conversation, Message};
        use std::sync::Arc;

        let body = format!("{}{}data: [DONE]\n\n", chunk("Hel"), chunk("lo"));
        let base_url = serve_once(body).await;
        let relay = Relay::new(Arc::new(OpenAIClient::with_base_url(&base_url)));
        let api_key = ApiKey::parse("sk-test").unwrap();

        let mut conversation = Conversation::new();
        conversation.append(Message::user_text("hi"));
        let reply = relay
            .complete(&api_key, &mut conversation, &GenerationConfig::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(reply, "Hello");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last().unwrap().text(), "Hello");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = OpenAIClient::with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_list_models() {
        assert_eq!(
            OpenAIClient::list_models(),
            vec!["gpt-4o-2024-05-13".to_string(), "gpt-4-turbo".to_string()]
        );
    }
}
