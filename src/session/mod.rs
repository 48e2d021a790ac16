// src/session/mod.rs — Session state machine for the assistant surface
//
// One ChatSession per mounted assistant surface. The session owns the
// conversation store, the open stream handle, and the driver task that
// applies events to the store. Single-flight is structural: `send` refuses
// to start while a request is outstanding, so no two operations ever
// mutate the store concurrently.
//
// Every in-flight operation is stamped with the session epoch at the time
// it started. `cancel` bumps the epoch, which makes the synchronous
// transition to Idle final: a stale driver that races with teardown finds
// the epoch changed and drops its event instead of mutating the store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::conversation::{ConversationStore, Message};
use crate::infra::config::Config;
use crate::infra::errors::AssistantError;
use crate::quota::{FileQuotaStore, QuotaGuard};
use crate::transport::http::{HttpChatTransport, HttpHistoryTransport};
use crate::transport::sse::SseStreamingTransport;
use crate::transport::{
    ChatRequest, ChatTransport, CloseHandle, HistoryTransport, StreamEvent, StreamRequest,
    StreamingTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Streaming,
    Error,
}

/// Fixed at construction; never a per-call decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Streaming,
    NonStreaming,
}

/// What happened to a `send` call. `Ignored` covers blank input and the
/// single-flight refusal; `QuotaExceeded` is a precondition failure, not a
/// session error, and causes no state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    Ignored,
    QuotaExceeded,
}

pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct SessionOptions {
    pub mode: Option<TransportMode>,
    /// Present for anonymous callers only; authenticated callers bypass
    /// the guard entirely.
    pub quota: Option<QuotaGuard>,
    pub on_error: Option<ErrorCallback>,
    /// Opaque context forwarded to the non-streaming transport.
    pub context: Option<Value>,
}

struct SessionInner {
    store: ConversationStore,
    state: SessionState,
    conversation_id: Option<String>,
    error: Option<String>,
    epoch: u64,
    close: Option<CloseHandle>,
    task: Option<JoinHandle<()>>,
}

impl SessionInner {
    fn in_flight(&self) -> bool {
        matches!(self.state, SessionState::Loading | SessionState::Streaming)
    }

    fn release_transport(&mut self) {
        if let Some(close) = self.close.take() {
            close.close();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // Surface teardown: release the channel and driver unconditionally.
        self.release_transport();
    }
}

#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Mutex<SessionInner>>,
    streaming: Arc<dyn StreamingTransport>,
    chat: Arc<dyn ChatTransport>,
    history: Arc<dyn HistoryTransport>,
    quota: Option<Arc<QuotaGuard>>,
    mode: TransportMode,
    on_error: Option<ErrorCallback>,
    context: Option<Value>,
}

impl ChatSession {
    pub fn new(
        streaming: Arc<dyn StreamingTransport>,
        chat: Arc<dyn ChatTransport>,
        history: Arc<dyn HistoryTransport>,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                store: ConversationStore::new(),
                state: SessionState::Idle,
                conversation_id: None,
                error: None,
                epoch: 0,
                close: None,
                task: None,
            })),
            streaming,
            chat,
            history,
            quota: options.quota.map(Arc::new),
            mode: options.mode.unwrap_or(TransportMode::Streaming),
            on_error: options.on_error,
            context: options.context,
        }
    }

    /// Wire up HTTP transports and the file-backed quota store from config.
    /// `authenticated` callers get no quota guard.
    pub fn from_config(config: &Config, authenticated: bool) -> Result<Self, AssistantError> {
        let timeout = Duration::from_secs(config.api.timeout_seconds);
        let streaming = Arc::new(SseStreamingTransport::new(&config.api.base_url, timeout)?);
        let chat = Arc::new(HttpChatTransport::new(&config.api.base_url, timeout)?);
        let history = Arc::new(HttpHistoryTransport::new(&config.api.base_url, timeout)?);

        let quota = if authenticated {
            None
        } else {
            let store = match &config.quota.store_path {
                Some(path) => FileQuotaStore::new(path),
                None => FileQuotaStore::default_path(),
            };
            Some(QuotaGuard::with_limit(
                Box::new(store),
                config.quota.guest_daily_limit,
            ))
        };

        let mode = if config.session.streaming {
            TransportMode::Streaming
        } else {
            TransportMode::NonStreaming
        };

        Ok(Self::new(
            streaming,
            chat,
            history,
            SessionOptions {
                mode: Some(mode),
                quota,
                ..Default::default()
            },
        ))
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().unwrap().store.messages().to_vec()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.inner.lock().unwrap().conversation_id.clone()
    }

    /// Latest extracted deal collection, published at session scope.
    pub fn deals(&self) -> Vec<Value> {
        self.inner.lock().unwrap().store.deals().to_vec()
    }

    pub fn coupons(&self) -> Vec<Value> {
        self.inner.lock().unwrap().store.coupons().to_vec()
    }

    // ── Operations ─────────────────────────────────────────────────────

    /// Submit user input. Must run inside a tokio runtime; the response is
    /// applied to the store by a background driver task, so the new state
    /// is observable as soon as this returns.
    pub fn send(&self, content: &str) -> SendOutcome {
        let content = content.trim();
        if content.is_empty() {
            return SendOutcome::Ignored;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.in_flight() {
            tracing::debug!("Send refused: request already outstanding");
            return SendOutcome::Ignored;
        }

        if let Some(quota) = &self.quota {
            if !quota.check() {
                tracing::debug!("Send blocked: guest quota exhausted");
                return SendOutcome::QuotaExceeded;
            }
            quota.consume();
        }

        inner.error = None;
        inner.store.clear_derived();
        inner.store.push(Message::user(content));
        inner.epoch += 1;
        let epoch = inner.epoch;

        match self.mode {
            TransportMode::Streaming => {
                inner.store.push(Message::placeholder());
                inner.state = SessionState::Streaming;
                let request = StreamRequest {
                    message: content.to_string(),
                    conversation_id: inner.conversation_id.clone(),
                };
                inner.task = Some(self.spawn_stream_driver(request, epoch));
            }
            TransportMode::NonStreaming => {
                inner.state = SessionState::Loading;
                let request = ChatRequest {
                    message: content.to_string(),
                    conversation_id: inner.conversation_id.clone(),
                    context: self.context.clone(),
                };
                inner.task = Some(self.spawn_request_driver(request, epoch));
            }
        }

        SendOutcome::Accepted
    }

    /// Tear down any outstanding request and return to Idle. Synchronous:
    /// transport teardown may finish later, but the epoch bump guarantees
    /// nothing it delivers can reach the store.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch += 1;
        inner.release_transport();
        inner.store.finish_stream();
        inner.error = None;
        inner.state = SessionState::Idle;
    }

    /// Discard the conversation. Deliberately leaves an in-flight request
    /// running (callers cancel first if they want teardown); its deltas
    /// will no longer find a streaming tail and are dropped by the store.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.store.clear();
        inner.error = None;
        inner.conversation_id = None;
        inner.state = SessionState::Idle;
    }

    /// Re-send the most recent user message, discarding the trailing
    /// assistant message (the failed or incomplete response) first.
    pub fn retry(&self) -> SendOutcome {
        let content = {
            let mut inner = self.inner.lock().unwrap();
            if inner.store.is_empty() || inner.in_flight() {
                return SendOutcome::Ignored;
            }
            inner.store.pop_trailing_assistant();
            match inner.store.last_user_content() {
                Some(content) => content,
                None => return SendOutcome::Ignored,
            }
        };
        self.send(&content)
    }

    /// Replace the conversation with one fetched from history. Failure
    /// moves to Error and leaves the existing messages untouched.
    pub async fn load_conversation(&self, conversation_id: &str) -> Result<(), AssistantError> {
        let epoch = {
            let mut inner = self.inner.lock().unwrap();
            if inner.in_flight() {
                tracing::debug!("Load refused: request already outstanding");
                return Ok(());
            }
            inner.error = None;
            inner.epoch += 1;
            inner.state = SessionState::Loading;
            inner.epoch
        };

        match self.history.fetch(conversation_id).await {
            Ok(history) => {
                let mut inner = self.inner.lock().unwrap();
                if inner.epoch != epoch {
                    return Ok(());
                }
                inner
                    .store
                    .replace(history.into_iter().map(Message::from).collect());
                inner.conversation_id = Some(conversation_id.to_string());
                inner.state = SessionState::Idle;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                fail(&self.inner, epoch, &message, self.on_error.as_ref());
                Err(e)
            }
        }
    }

    // ── Drivers ────────────────────────────────────────────────────────

    fn spawn_stream_driver(&self, request: StreamRequest, epoch: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let transport = Arc::clone(&self.streaming);
        let on_error = self.on_error.clone();

        tokio::spawn(async move {
            let handle = match transport.open(request).await {
                Ok(handle) => handle,
                Err(e) => {
                    fail(&inner, epoch, &e.to_string(), on_error.as_ref());
                    return;
                }
            };

            let (mut events, close) = handle.split();
            {
                let mut guard = inner.lock().unwrap();
                if guard.epoch != epoch {
                    // Canceled while the channel was opening.
                    close.close();
                    return;
                }
                guard.close = Some(close);
            }

            while let Some(item) = events.next().await {
                match item {
                    Ok(StreamEvent::Done) => {
                        complete(&inner, epoch);
                        return;
                    }
                    Ok(StreamEvent::Error { error }) => {
                        fail(&inner, epoch, &error, on_error.as_ref());
                        return;
                    }
                    Ok(event) => {
                        let mut guard = inner.lock().unwrap();
                        if guard.epoch != epoch {
                            return;
                        }
                        guard.store.apply(event);
                    }
                    Err(e) => {
                        fail(&inner, epoch, &e.to_string(), on_error.as_ref());
                        return;
                    }
                }
            }

            // Channel ended without a terminal event.
            fail(
                &inner,
                epoch,
                &AssistantError::ConnectionLost.to_string(),
                on_error.as_ref(),
            );
        })
    }

    fn spawn_request_driver(&self, request: ChatRequest, epoch: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let transport = Arc::clone(&self.chat);
        let on_error = self.on_error.clone();

        tokio::spawn(async move {
            match transport.send(request).await {
                Ok(response) if response.success => {
                    let mut guard = inner.lock().unwrap();
                    if guard.epoch != epoch {
                        return;
                    }
                    guard.store.push_response(
                        response.content.unwrap_or_default(),
                        response.deals,
                        response.coupons,
                    );
                    if let Some(id) = response.conversation_id {
                        guard.conversation_id = Some(id);
                    }
                    guard.state = SessionState::Idle;
                    guard.task = None;
                }
                Ok(response) => {
                    let message = response
                        .error
                        .unwrap_or_else(|| "assistant request failed".to_string());
                    fail(&inner, epoch, &message, on_error.as_ref());
                }
                Err(e) => fail(&inner, epoch, &e.to_string(), on_error.as_ref()),
            }
        })
    }
}

/// Finalize a streamed response: Idle, tail no longer streaming.
fn complete(inner: &Arc<Mutex<SessionInner>>, epoch: u64) {
    let mut guard = inner.lock().unwrap();
    if guard.epoch != epoch {
        return;
    }
    guard.store.finish_stream();
    guard.state = SessionState::Idle;
    guard.close = None;
    guard.task = None;
}

/// Record a failure: Error state, description kept, partial tail preserved.
fn fail(
    inner: &Arc<Mutex<SessionInner>>,
    epoch: u64,
    message: &str,
    on_error: Option<&ErrorCallback>,
) {
    {
        let mut guard = inner.lock().unwrap();
        if guard.epoch != epoch {
            return;
        }
        guard.store.finish_stream();
        guard.state = SessionState::Error;
        guard.error = Some(message.to_string());
        guard.close = None;
        guard.task = None;
    }
    tracing::warn!("Assistant request failed: {message}");
    if let Some(callback) = on_error {
        callback(message);
    }
}
