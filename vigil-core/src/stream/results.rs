//! Inbound result decoding and merge.
//!
//! The analysis service answers frames with JSON carrying a fast-cadence
//! primary detection list and, optionally, a slower frame-level auxiliary
//! value:
//!
//! ```text
//! {
//!   "face_results":   [{"location":[t,r,b,l], "name":"..", "status":"AUTHORIZED", "confidence":93.1}],
//!   "vision_results": {"emotion":{"emotion":"happy","confidence":0.87}}
//!                   | {"mask":{"wearing_mask":true,"confidence":0.91}}
//!                   | {"people":{"count":3}}
//! }
//! ```
//!
//! [`ResultChannel`] turns each message into at most one
//! [`ResultSnapshot`] according to its [`MergePolicy`].

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::VigilError;
use crate::stream::types::{Authorization, Auxiliary, Detection, Resolution, ResultSnapshot};

// ── Wire format ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
    #[serde(default)]
    face_results: Option<Vec<WireFace>>,
    #[serde(default)]
    vision_results: Option<WireVision>,
}

#[derive(Debug, Deserialize)]
struct WireFace {
    #[serde(default)]
    location: Vec<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireVision {
    #[serde(default)]
    emotion: Option<WireEmotion>,
    #[serde(default)]
    mask: Option<WireMask>,
    #[serde(default)]
    people: Option<WirePeople>,
}

#[derive(Debug, Deserialize)]
struct WireEmotion {
    emotion: String,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct WireMask {
    wearing_mask: bool,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct WirePeople {
    count: u32,
}

impl WireFace {
    fn into_detection(self) -> Detection {
        // Non-numeric coordinates shorten the quad, so the renderer skips it.
        let location = self.location.iter().filter_map(|v| v.as_f64()).collect();
        let status = self.status.unwrap_or_default();
        Detection {
            location,
            label: self.name.unwrap_or_else(|| "Unknown".to_string()),
            authorization: Authorization::from_status(&status),
            status,
            confidence: self.confidence,
        }
    }
}

impl WireVision {
    /// Emotion wins over mask, mask over people.
    fn into_auxiliary(self) -> Option<Auxiliary> {
        if let Some(e) = self.emotion {
            return Some(Auxiliary::Emotion {
                label: e.emotion,
                confidence: e.confidence,
            });
        }
        if let Some(m) = self.mask {
            return Some(Auxiliary::Mask {
                wearing: m.wearing_mask,
                confidence: m.confidence,
            });
        }
        self.people.map(|p| Auxiliary::Occupancy { count: p.count })
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// `None` when the message carried no `face_results` key.
    pub detections: Option<Vec<Detection>>,
    pub auxiliary: Option<Auxiliary>,
}

/// Parse one inbound text message.
pub fn decode(text: &str) -> Result<Decoded, VigilError> {
    let msg: WireMessage = serde_json::from_str(text)
        .map_err(|e| VigilError::MalformedMessage(e.to_string()))?;
    Ok(Decoded {
        detections: msg
            .face_results
            .map(|faces| faces.into_iter().map(WireFace::into_detection).collect()),
        auxiliary: msg.vision_results.and_then(WireVision::into_auxiliary),
    })
}

// ── MergePolicy ──────────────────────────────────────────────────

/// How inbound messages combine into snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Every message replaces the displayed result set and redraws.
    LastWrite,
    /// Auxiliary values are cached across messages; only messages with a
    /// detection list redraw. A message without auxiliary data clears the
    /// cache.
    #[default]
    StickyAuxiliary,
}

// ── ResultChannel ────────────────────────────────────────────────

pub struct ResultChannel {
    policy: MergePolicy,
    /// Cached auxiliary value tagged with the video geometry it arrived
    /// under.
    auxiliary: Option<(Auxiliary, Resolution)>,
    last: Option<ResultSnapshot>,
    malformed: u64,
}

impl ResultChannel {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            auxiliary: None,
            last: None,
            malformed: 0,
        }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// The snapshot most recently handed to the renderer.
    pub fn last_snapshot(&self) -> Option<&ResultSnapshot> {
        self.last.as_ref()
    }

    pub fn cached_auxiliary(&self) -> Option<&Auxiliary> {
        self.auxiliary.as_ref().map(|(aux, _)| aux)
    }

    /// Messages rejected as malformed since the last reset.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    /// Ingest one inbound message against the current video `geometry`.
    ///
    /// Returns the snapshot to render, or `None` when this message does
    /// not trigger a redraw. Malformed input is logged and leaves all state
    /// untouched.
    pub fn ingest(&mut self, text: &str, geometry: Resolution) -> Option<ResultSnapshot> {
        let decoded = match decode(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.malformed += 1;
                warn!(error = %e, bytes = text.len(), "ignoring malformed result message");
                return None;
            }
        };

        let snapshot = match self.policy {
            MergePolicy::LastWrite => ResultSnapshot {
                detections: decoded.detections.unwrap_or_default(),
                auxiliary: decoded.auxiliary,
                geometry,
            },
            MergePolicy::StickyAuxiliary => {
                self.auxiliary = decoded.auxiliary.map(|aux| (aux, geometry));
                let detections = decoded.detections?;
                let auxiliary = self
                    .auxiliary
                    .as_ref()
                    .filter(|(_, tagged)| *tagged == geometry)
                    .map(|(aux, _)| aux.clone());
                ResultSnapshot {
                    detections,
                    auxiliary,
                    geometry,
                }
            }
        };

        debug!(
            detections = snapshot.detections.len(),
            auxiliary = snapshot.auxiliary.is_some(),
            "result snapshot"
        );
        self.last = Some(snapshot.clone());
        Some(snapshot)
    }

    /// Drop the auxiliary cache and the last snapshot.
    pub fn reset(&mut self) {
        self.auxiliary = None;
        self.last = None;
        self.malformed = 0;
    }
}

impl Default for ResultChannel {
    fn default() -> Self {
        Self::new(MergePolicy::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────
