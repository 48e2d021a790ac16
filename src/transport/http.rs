// src/transport/http.rs — One-shot chat and history over JSON

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChatRequest, ChatResponse, ChatTransport, HistoryMessage, HistoryTransport};
use crate::infra::errors::AssistantError;

/// Non-streaming chat transport: one POST, one fully-formed response.
pub struct HttpChatTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChatTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/assistant/chat", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(&self, request: ChatRequest) -> Result<ChatResponse, AssistantError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    success: bool,
    #[serde(default)]
    messages: Option<Vec<HistoryMessage>>,
}

/// Conversation history transport.
pub struct HttpHistoryTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpHistoryTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/api/assistant/conversations",
                base_url.trim_end_matches('/')
            ),
        })
    }
}

#[async_trait]
impl HistoryTransport for HttpHistoryTransport {
    async fn fetch(&self, conversation_id: &str) -> Result<Vec<HistoryMessage>, AssistantError> {
        let response: HistoryResponse = self
            .client
            .get(format!("{}/{conversation_id}", self.endpoint))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            return Err(AssistantError::History(format!(
                "server rejected conversation '{conversation_id}'"
            )));
        }

        Ok(response.messages.unwrap_or_default())
    }
}
