use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use braid_types::StreamEvent;

use crate::types::ChatMessage;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
        }
    }

    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// The provider seam: everything past this point is someone else's service.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Start a streaming completion. The stream ends with a `Done` event
    /// carrying usage when the provider reports it.
    async fn chat_stream(&self, request: ChatRequest) -> Result<TokenStream>;
}
