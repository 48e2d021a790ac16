// src/conversation/mod.rs — Message model and conversation store
//
// The store is append-only except for the in-progress assistant tail, which
// is mutated in place as stream deltas arrive. At most one message has
// `is_streaming = true` at any time, and it is always the last element.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::transport::{HistoryMessage, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    pub deals: Option<Vec<Value>>,
    pub coupons: Option<Vec<Value>>,
    pub is_streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            thinking: None,
            deals: None,
            coupons: None,
            is_streaming: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Empty in-progress assistant message, filled by stream deltas.
    pub fn placeholder() -> Self {
        let mut message = Self::new(Role::Assistant, String::new());
        message.is_streaming = true;
        message
    }
}

impl From<HistoryMessage> for Message {
    fn from(h: HistoryMessage) -> Self {
        Self {
            id: h.id,
            role: h.role,
            content: h.content,
            thinking: None,
            deals: None,
            coupons: None,
            is_streaming: false,
            created_at: h.created_at,
        }
    }
}

/// Ordered message sequence plus the session-scope derived collections.
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    deals: Vec<Value>,
    coupons: Vec<Value>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Latest deal collection published at session scope.
    pub fn deals(&self) -> &[Value] {
        &self.deals
    }

    pub fn coupons(&self) -> &[Value] {
        &self.coupons
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append a fully-formed assistant response (non-streaming path) and
    /// publish its collections at session scope.
    pub fn push_response(
        &mut self,
        content: String,
        deals: Option<Vec<Value>>,
        coupons: Option<Vec<Value>>,
    ) {
        let mut message = Message::assistant(content);
        if let Some(deals) = deals {
            self.deals = deals.clone();
            message.deals = Some(deals);
        }
        if let Some(coupons) = coupons {
            self.coupons = coupons.clone();
            message.coupons = Some(coupons);
        }
        self.messages.push(message);
    }

    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.deals.clear();
        self.coupons.clear();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.deals.clear();
        self.coupons.clear();
    }

    /// Drop the derived collections only (done at the start of each send).
    pub fn clear_derived(&mut self) {
        self.deals.clear();
        self.coupons.clear();
    }

    /// The in-progress assistant tail, if one exists.
    fn streaming_tail(&mut self) -> Option<&mut Message> {
        match self.messages.last_mut() {
            Some(m) if m.is_streaming && m.role == Role::Assistant => Some(m),
            _ => None,
        }
    }

    /// Apply one decoded stream event. Events that do not match an open
    /// streaming tail indicate producer/consumer desynchronization and are
    /// dropped without touching unrelated messages.
    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Start => {}
            StreamEvent::Text { content } => match self.streaming_tail() {
                Some(m) => m.content.push_str(&content),
                None => tracing::warn!("Dropping text delta with no streaming message"),
            },
            StreamEvent::Thinking { content } => match self.streaming_tail() {
                Some(m) => m.thinking.get_or_insert_with(String::new).push_str(&content),
                None => tracing::warn!("Dropping thinking delta with no streaming message"),
            },
            StreamEvent::Deals { deals } => {
                if let Some(m) = self.streaming_tail() {
                    m.deals = Some(deals.clone());
                    self.deals = deals;
                } else {
                    tracing::warn!("Dropping deals event with no streaming message");
                }
            }
            StreamEvent::Coupons { coupons } => {
                if let Some(m) = self.streaming_tail() {
                    m.coupons = Some(coupons.clone());
                    self.coupons = coupons;
                } else {
                    tracing::warn!("Dropping coupons event with no streaming message");
                }
            }
            // Terminal events only finalize; content is left as-is.
            StreamEvent::Done | StreamEvent::Error { .. } => self.finish_stream(),
        }
    }

    /// Mark the streaming tail finalized. Idempotent.
    pub fn finish_stream(&mut self) {
        if let Some(m) = self.streaming_tail() {
            m.is_streaming = false;
        }
    }

    /// Remove the trailing assistant message, if the last message is one.
    /// Used by retry to discard a failed or incomplete response.
    pub fn pop_trailing_assistant(&mut self) -> Option<Message> {
        match self.messages.last() {
            Some(m) if m.role == Role::Assistant => self.messages.pop(),
            _ => None,
        }
    }

    /// Content of the most recent user message.
    pub fn last_user_content(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> StreamEvent {
        StreamEvent::Text {
            content: content.into(),
        }
    }

    #[test]
    fn test_deltas_concatenate_in_order() {
        let mut store = ConversationStore::new();
        store.push(Message::user("hi"));
        store.push(Message::placeholder());

        for delta in ["Here ", "are ", "deals"] {
            store.apply(text(delta));
        }

        assert_eq!(store.messages().last().unwrap().content, "Here are deals");
        assert!(store.messages().last().unwrap().is_streaming);
    }

    #[test]
    fn test_thinking_accumulates_separately() {
        let mut store = ConversationStore::new();
        store.push(Message::placeholder());

        store.apply(StreamEvent::Thinking {
            content: "checking ".into(),
        });
        store.apply(StreamEvent::Thinking {
            content: "catalog".into(),
        });
        store.apply(text("answer"));

        let tail = store.messages().last().unwrap();
        assert_eq!(tail.thinking.as_deref(), Some("checking catalog"));
        assert_eq!(tail.content, "answer");
    }

    #[test]
    fn test_delta_without_streaming_tail_is_dropped() {
        let mut store = ConversationStore::new();
        store.push(Message::user("hi"));
        store.push(Message::assistant("final answer"));

        store.apply(text("stray"));

        assert_eq!(store.messages().last().unwrap().content, "final answer");
    }

    #[test]
    fn test_deals_replace_and_publish_at_session_scope() {
        let mut store = ConversationStore::new();
        store.push(Message::placeholder());

        store.apply(StreamEvent::Deals {
            deals: vec![serde_json::json!({"id": 1})],
        });
        store.apply(StreamEvent::Deals {
            deals: vec![serde_json::json!({"id": 2}), serde_json::json!({"id": 3})],
        });

        let tail = store.messages().last().unwrap();
        assert_eq!(tail.deals.as_ref().unwrap().len(), 2);
        assert_eq!(store.deals().len(), 2);
        assert_eq!(store.deals()[0]["id"], 2);
    }

    #[test]
    fn test_done_finalizes_without_content_change() {
        let mut store = ConversationStore::new();
        store.push(Message::placeholder());
        store.apply(text("partial"));
        store.apply(StreamEvent::Done);

        let tail = store.messages().last().unwrap();
        assert!(!tail.is_streaming);
        assert_eq!(tail.content, "partial");

        // Further deltas are protocol violations and must not mutate.
        store.apply(text(" more"));
        assert_eq!(store.messages().last().unwrap().content, "partial");
    }

    #[test]
    fn test_error_preserves_partial_content() {
        let mut store = ConversationStore::new();
        store.push(Message::placeholder());
        store.apply(text("half an ans"));
        store.apply(StreamEvent::Error {
            error: "overloaded".into(),
        });

        let tail = store.messages().last().unwrap();
        assert!(!tail.is_streaming);
        assert_eq!(tail.content, "half an ans");
    }

    #[test]
    fn test_at_most_one_streaming_message() {
        let mut store = ConversationStore::new();
        store.push(Message::user("a"));
        store.push(Message::placeholder());
        store.finish_stream();
        store.push(Message::user("b"));
        store.push(Message::placeholder());

        let streaming: Vec<_> = store.messages().iter().filter(|m| m.is_streaming).collect();
        assert_eq!(streaming.len(), 1);
        assert!(store.messages().last().unwrap().is_streaming);
    }

    #[test]
    fn test_pop_trailing_assistant_only_pops_assistant() {
        let mut store = ConversationStore::new();
        store.push(Message::user("a"));
        assert!(store.pop_trailing_assistant().is_none());

        store.push(Message::assistant("failed"));
        let popped = store.pop_trailing_assistant().unwrap();
        assert_eq!(popped.content, "failed");
        assert_eq!(store.last_user_content().as_deref(), Some("a"));
    }

    #[test]
    fn test_push_response_is_atomic() {
        let mut store = ConversationStore::new();
        store.push(Message::user("hi"));
        store.push_response(
            "two coupons for you".into(),
            None,
            Some(vec![serde_json::json!({"code": "SAVE10"})]),
        );

        let tail = store.messages().last().unwrap();
        assert!(!tail.is_streaming);
        assert!(tail.deals.is_none());
        assert_eq!(tail.coupons.as_ref().unwrap().len(), 1);
        assert_eq!(store.coupons().len(), 1);
    }
}
