// src/transport/mod.rs — Transport seams between the session and the backend

pub mod http;
pub mod sse;

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::Role;
use crate::infra::errors::AssistantError;

/// One decoded event from the server-pushed channel, discriminated by the
/// `type` tag of the raw frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Start,
    Text {
        #[serde(default)]
        content: String,
    },
    Thinking {
        #[serde(default)]
        content: String,
    },
    /// Complete replacement set, not a delta.
    Deals {
        #[serde(default)]
        deals: Vec<Value>,
    },
    Coupons {
        #[serde(default)]
        coupons: Vec<Value>,
    },
    Done,
    Error {
        #[serde(default)]
        error: String,
    },
}

impl StreamEvent {
    /// Terminal events end the channel; nothing may be delivered after one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// Ordered event stream for one request. An `Err` item is a transport-level
/// disconnect (not a server-emitted `error` event) and is always the last
/// item delivered.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AssistantError>> + Send>>;

/// Handle to one open server-pushed channel.
pub struct StreamHandle {
    events: EventStream,
    closed: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn new(events: EventStream, closed: Arc<AtomicBool>) -> Self {
        Self { events, closed }
    }

    /// Split into the event stream (consumed by the driver) and a close
    /// handle the session keeps for cancellation.
    pub fn split(self) -> (EventStream, CloseHandle) {
        (
            self.events,
            CloseHandle {
                closed: self.closed,
            },
        )
    }
}

/// Idempotent closer for an open channel. After `close()` no further event
/// is delivered on the matching stream.
#[derive(Clone)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatResponse {
    pub success: bool,
    pub content: Option<String>,
    pub deals: Option<Vec<Value>>,
    pub coupons: Option<Vec<Value>>,
    pub cached: Option<bool>,
    pub request_id: Option<String>,
    /// Set when the server assigns (or confirms) the conversation handle.
    pub conversation_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Opens one server-pushed event channel per request.
#[async_trait]
pub trait StreamingTransport: Send + Sync {
    async fn open(&self, request: StreamRequest) -> Result<StreamHandle, AssistantError>;
}

/// One-shot request/response transport.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: ChatRequest) -> Result<ChatResponse, AssistantError>;
}

/// Fetches a previously stored conversation.
#[async_trait]
pub trait HistoryTransport: Send + Sync {
    async fn fetch(&self, conversation_id: &str) -> Result<Vec<HistoryMessage>, AssistantError>;
}
