//! # vigil-core
//!
//! Core library for streaming live camera frames to a remote analysis
//! service and painting its results back over the video.
//!
//! This crate contains:
//! - **Stream pipeline**: `FrameScheduler`, `ConnectionManager`,
//!   `ResultChannel`, `OverlayRenderer`, coordinated by `StreamSession`
//! - **Transport**: `Link` / `Connector` seam and the WebSocket connector
//! - **Capture**: `CaptureDevice` / `DeviceProvider` seams with synthetic
//!   and image-sequence sources
//! - **State**: the reconnecting connection state machine and backoff policy
//! - **Control**: the analysis-mode selection API
//! - **Error**: `VigilError`, a typed, `thiserror`-based error hierarchy

pub mod control;
pub mod error;
pub mod state;
pub mod stream;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use control::{AnalysisControl, AnalysisMode};
pub use error::VigilError;
pub use state::{BackoffPolicy, ConnectionPhase, ConnectionState, RetryDecision};
pub use stream::{
    CaptureHint, ConnectionEvent, ConnectionManager, DeviceProvider, ImageDirectoryProvider,
    MergePolicy, OverlayRenderer, OverlayStyle, Resolution, ResultChannel, ResultSnapshot,
    SessionConfig, SessionNotice, StreamSession, SyntheticProvider, WebSocketConnector,
};
