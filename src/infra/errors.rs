// src/infra/errors.rs — Error types for the session engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transport-level disconnect with no structured error payload.
    /// Server-emitted `error` events are not errors at this level; they
    /// arrive as ordinary stream events and land in the session's error
    /// field verbatim.
    #[error("connection lost")]
    ConnectionLost,

    #[error("History fetch failed: {0}")]
    History(String),

    // Infra
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
