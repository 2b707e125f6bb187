//! Streaming relay between a conversation and a completion endpoint.
//!
//! [`Relay::stream`] opens one request carrying the whole conversation and
//! hands back a [`ReplyStream`]. The caller drains it (forwarding fragments
//! wherever they need to go) and then calls [`ReplyStream::finish`] to get
//! the assistant message to append. Only a stream that ran to its natural
//! end produces a message; a failed one leaves the conversation untouched
//! apart from the user's own message.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::ai::{CompletionClient, CompletionRequest, FragmentStream};
use crate::config::{GenerationConfig, MAX_TOKENS};
use crate::credential::ApiKey;
use crate::error::{ChatError, Result};
use crate::state::{Conversation, Message, Role};

#[derive(Clone)]
pub struct Relay {
    client: Arc<dyn CompletionClient>,
}

impl Relay {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    pub fn build_request(conversation: &Conversation, config: &GenerationConfig) -> CompletionRequest {
        CompletionRequest {
            model: config.resolved_model().as_str().to_string(),
            messages: conversation.all().to_vec(),
            temperature: config.resolved_temperature(),
            max_tokens: MAX_TOKENS,
            stream: true,
        }
    }

    pub async fn stream(
        &self,
        api_key: &ApiKey,
        conversation: &Conversation,
        config: &GenerationConfig,
    ) -> Result<ReplyStream> {
        let request = Self::build_request(conversation, config);
        let user_msgs = conversation.all().iter().filter(|m| m.role == Role::User).count();
        debug!(
            model = %request.model,
            msgs = conversation.len(),
            user = user_msgs,
            assistant = conversation.len() - user_msgs,
            "relay: opening stream"
        );

        let inner = self.client.stream_chat(api_key, request).await?;
        Ok(ReplyStream::new(inner))
    }

    /// Drain a reply into `on_fragment` and append it on normal completion.
    /// Returns the full reply text.
    pub async fn complete<F>(
        &self,
        api_key: &ApiKey,
        conversation: &mut Conversation,
        config: &GenerationConfig,
        mut on_fragment: F,
    ) -> Result<String>
    where
        F: FnMut(&str),
    {
        let mut reply = self.stream(api_key, conversation, config).await?;
        while let Some(fragment) = reply.next().await {
            on_fragment(&fragment?);
        }

        let message = reply.finish()?;
        let text = message.text();
        conversation.append(message);
        Ok(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    Streaming,
    Finished,
    Failed,
}

/// Fragments of one assistant reply. Finite and not restartable: once it
/// has ended or failed it yields nothing more.
pub struct ReplyStream {
    inner: FragmentStream,
    buffer: String,
    fragments: usize,
    state: ReplyState,
}

impl ReplyStream {
    pub fn new(inner: FragmentStream) -> Self {
        Self {
            inner,
            buffer: String::new(),
            fragments: 0,
            state: ReplyState::Streaming,
        }
    }

    /// Text accumulated so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_finished(&self) -> bool {
        self.state == ReplyState::Finished
    }

    /// The assistant message, available only after the stream ended
    /// normally. A failed or abandoned stream yields `StreamIncomplete`.
    pub fn finish(self) -> Result<Message> {
        match self.state {
            ReplyState::Finished => {
                info!(fragments = self.fragments, final_len = self.buffer.len(), "reply completed");
                Ok(Message::assistant_text(self.buffer))
            }
            ReplyState::Failed | ReplyState::Streaming => {
                warn!(
                    fragments = self.fragments,
                    partial_len = self.buffer.len(),
                    "reply dropped before completion"
                );
                Err(ChatError::StreamIncomplete)
            }
        }
    }
}

impl Stream for ReplyStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != ReplyState::Streaming {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(fragment))) => {
                this.buffer.push_str(&fragment);
                this.fragments += 1;
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.state = ReplyState::Failed;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.state = ReplyState::Finished;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
