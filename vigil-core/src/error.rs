//! Domain-specific error types for the streaming core.
//!
//! All fallible operations return `Result<T, VigilError>`.
//! Only [`VigilError::Device`] and [`VigilError::PermanentDisconnect`] are
//! meant to reach the operator; every other variant is absorbed and logged
//! by the component that produced it.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the streaming core.
#[derive(Debug, Error)]
pub enum VigilError {
    // ── Surfaced to the user ─────────────────────────────────────
    /// Capture permission or hardware failure. Fatal to session start.
    #[error("capture device error: {0}")]
    Device(String),

    /// The reconnect budget was exhausted.
    #[error("connection lost after {attempts} reconnect attempts")]
    PermanentDisconnect { attempts: u32 },

    // ── Contained within a component ─────────────────────────────
    /// Connect, send or receive failure on the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single frame could not be drawn or encoded.
    #[error("frame encode error: {0}")]
    Encode(String),

    /// An inbound message could not be parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The overlay could not be painted.
    #[error("render error: {0}")]
    Render(String),

    /// The analysis-mode control endpoint rejected or failed a request.
    #[error("control API error: {0}")]
    Control(String),

    // ── Plumbing ─────────────────────────────────────────────────
    /// A state-machine transition was requested from the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// A session is already streaming.
    #[error("a streaming session is already active")]
    SessionActive,

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl VigilError {
    /// Whether this error must be shown to the operator rather than just
    /// logged.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::Device(_) | Self::PermanentDisconnect { .. })
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for VigilError {
    fn from(s: String) -> Self {
        VigilError::Other(s)
    }
}

impl From<&str> for VigilError {
    fn from(s: &str) -> Self {
        VigilError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for VigilError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        VigilError::ChannelClosed
    }
}

impl From<image::ImageError> for VigilError {
    fn from(e: image::ImageError) -> Self {
        VigilError::Encode(e.to_string())
    }
}
