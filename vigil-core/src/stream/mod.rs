//! # stream: live frame streaming with overlay feedback
//!
//! ## Architecture
//!
//! ```text
//! CLIENT                                          ANALYSIS SERVICE
//! ┌──────────────────────────┐
//! │ CaptureDevice            │
//! │   ↓                      │
//! │ FrameScheduler (≤5 fps)  │
//! │   ↓  FrameEncoder        │   data:image/jpeg   ┌──────────────┐
//! │ ConnectionManager::send  │ ──────────────────► │  /ws/video   │
//! │                          │                     │              │
//! │ ConnectionManager event  │ ◄────────────────── │              │
//! │   ↓                      │   JSON results      └──────────────┘
//! │ ResultChannel (merge)    │
//! │   ↓                      │
//! │ OverlayRenderer (2 bufs) │ ──► overlay surface
//! └──────────────────────────┘
//! ```
//!
//! ## Sub-modules
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `types`      | Frames, detections, auxiliary values, snapshots      |
//! | `capture`    | Device seams plus synthetic and image-sequence sources |
//! | `encoder`    | Off-screen draw, JPEG, data-URL payload              |
//! | `link`       | Transport-agnostic duplex text link, `Connector`     |
//! | `websocket`  | WebSocket `Connector`                                |
//! | `connection` | Reconnecting connection manager                      |
//! | `scheduler`  | Throttled capture tick                               |
//! | `results`    | Wire decoding and merge policies                     |
//! | `render`     | Double-buffered overlay painter                      |
//! | `session`    | Start/stop coordinator                               |

pub mod capture;
pub mod connection;
pub mod encoder;
pub mod link;
pub mod render;
pub mod results;
pub mod scheduler;
pub mod session;
pub mod types;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

// ── Re-exports ───────────────────────────────────────────────────

pub use capture::{
    CaptureDevice, CaptureHint, DeviceProvider, ImageDirectoryProvider, ImageSequenceCamera,
    SyntheticCamera, SyntheticProvider,
};
pub use connection::{ConnectionEvent, ConnectionManager, FrameSink};
pub use encoder::{DATA_URL_PREFIX, FrameEncoder, decode_payload};
pub use link::{Connector, Link, LinkAck, LinkDriver};
pub use render::{OverlayRenderer, OverlayStyle, RenderOutcome, RenderSurface};
pub use results::{MergePolicy, ResultChannel};
pub use scheduler::{FrameScheduler, TickOutcome};
pub use session::{SessionConfig, SessionNotice, StreamSession};
pub use types::{Authorization, Auxiliary, BoundingBox, Detection, Frame, Resolution, ResultSnapshot};
pub use websocket::{VIDEO_PATH, WebSocketConnector, attach};
