// src/transport/sse.rs — Server-pushed event channel over SSE

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};

use super::{StreamEvent, StreamHandle, StreamRequest, StreamingTransport};
use crate::infra::errors::AssistantError;

/// SSE-backed streaming transport against the assistant backend.
pub struct SseStreamingTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl SseStreamingTransport {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/api/assistant/stream",
                base_url.trim_end_matches('/')
            ),
        })
    }
}

#[async_trait]
impl StreamingTransport for SseStreamingTransport {
    async fn open(&self, request: StreamRequest) -> Result<StreamHandle, AssistantError> {
        let builder = self.client.post(&self.endpoint).json(&request);

        let mut es = builder
            .eventsource()
            .map_err(|e| AssistantError::Transport(format!("cannot open event channel: {e}")))?;

        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();

        let stream = async_stream::stream! {
            while let Some(event) = es.next().await {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => {
                        match serde_json::from_str::<StreamEvent>(&msg.data) {
                            Ok(ev) => {
                                let terminal = ev.is_terminal();
                                yield Ok(ev);
                                if terminal {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Unknown or malformed frames are dropped, not fatal.
                                tracing::warn!("Dropping undecodable stream frame: {e}");
                            }
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => {
                        // Channel closed without a terminal event.
                        yield Err(AssistantError::ConnectionLost);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Event channel failed: {e}");
                        yield Err(AssistantError::ConnectionLost);
                        break;
                    }
                }
            }
            es.close();
        };

        Ok(StreamHandle::new(Box::pin(stream), closed))
    }
}
