//! # vigil-viewer: operator client
//!
//! Acquires a capture source, streams it to the analysis service through
//! a `vigil-core` [`StreamSession`](vigil_core::StreamSession), and
//! writes the rendered overlay to disk as it changes.

pub mod config;
pub mod display;
