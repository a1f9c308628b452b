//! # vigil-mock: stand-in analysis service
//!
//! Serves the two endpoints a vigil client talks to:
//!
//! - `GET /ws/video`: WebSocket. Each text frame is a JPEG data URL; each
//!   decodable frame is answered with one JSON result message.
//! - `POST /set-analysis`: selects the auxiliary analysis
//!   (`{"type": "emotion" | "mask" | "people" | "none"}`).
//!
//! Detections are synthetic (one face centered in the frame). The
//! auxiliary analyzer deliberately runs at a slower cadence than the
//! primary one, so clients see both arrival rates.

pub mod analysis;
pub mod config;
pub mod server;
