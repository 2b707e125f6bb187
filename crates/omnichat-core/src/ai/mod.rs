pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;

use crate::credential::ApiKey;
use crate::error::Result;
use crate::state::Message;

pub use openai::OpenAIClient;

/// Text fragments of one reply, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Body of a streaming chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// A hosted chat-completion endpoint that can stream a reply.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Open one streaming request. Errors here mean nothing was received.
    async fn stream_chat(
        &self,
        api_key: &ApiKey,
        request: CompletionRequest,
    ) -> Result<FragmentStream>;
}
