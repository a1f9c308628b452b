//! Shared types for the capture → transport → overlay pipeline.
//!
//! [`Frame`] is the outbound payload. [`Detection`], [`Auxiliary`] and
//! [`ResultSnapshot`] are the decoded, renderable form of what the
//! analysis service sends back; the wire shapes live in
//! [`crate::stream::results`].

use std::fmt;

use tokio::time::Instant;

// ── Resolution ───────────────────────────────────────────────────

/// Pixel dimensions of a video source or a render viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions are non-zero.
    pub fn is_usable(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One encoded capture, ready for transmission.
///
/// Constructed, sent or dropped, never retained past a scheduler tick.
#[derive(Debug, Clone)]
pub struct Frame {
    /// `data:image/jpeg;base64,...` text payload.
    pub payload: String,
    pub captured_at: Instant,
}

// ── Detections ───────────────────────────────────────────────────

/// Authorization verdict attached to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Authorization {
    Authorized,
    Denied,
}

impl Authorization {
    /// `"AUTHORIZED"` maps to [`Authorized`](Self::Authorized); any other
    /// status string is treated as a denial.
    pub fn from_status(status: &str) -> Self {
        if status == "AUTHORIZED" {
            Self::Authorized
        } else {
            Self::Denied
        }
    }
}

/// Face bounding box in video-native pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// Map from video-native to display coordinates.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            top: self.top * sy,
            right: self.right * sx,
            bottom: self.bottom * sy,
            left: self.left * sx,
        }
    }
}

/// One primary detection as received.
///
/// `location` is kept as sent so that malformed quads can be skipped at
/// render time instead of poisoning the whole message.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub location: Vec<f64>,
    pub label: String,
    /// Raw status text, painted verbatim in the status block.
    pub status: String,
    pub authorization: Authorization,
    /// Match confidence in percent.
    pub confidence: Option<f64>,
}

impl Detection {
    /// The `(top, right, bottom, left)` quad, if exactly four coordinates
    /// were supplied.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        match self.location.as_slice() {
            &[top, right, bottom, left] => Some(BoundingBox {
                top,
                right,
                bottom,
                left,
            }),
            _ => None,
        }
    }

    /// Text for the label block above the box.
    pub fn label_text(&self) -> String {
        match self.confidence {
            Some(c) => format!("{} ({:.1}%)", self.label, c),
            None => self.label.clone(),
        }
    }
}

// ── Auxiliary ────────────────────────────────────────────────────

/// Slower-cadence frame-level annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum Auxiliary {
    /// Dominant emotion; `confidence` in `0.0..=1.0`.
    Emotion { label: String, confidence: f64 },
    /// Mask-wearing verdict; `confidence` in `0.0..=1.0`.
    Mask { wearing: bool, confidence: f64 },
    /// Number of people in view.
    Occupancy { count: u32 },
}

impl fmt::Display for Auxiliary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emotion { label, confidence } => {
                write!(f, "Emotion: {label} ({:.1}%)", confidence * 100.0)
            }
            Self::Mask {
                wearing,
                confidence,
            } => {
                let verdict = if *wearing { "Wearing Mask" } else { "No Mask" };
                write!(f, "Mask: {verdict} ({:.1}%)", confidence * 100.0)
            }
            Self::Occupancy { count } => write!(f, "People Count: {count}"),
        }
    }
}

// ── ResultSnapshot ───────────────────────────────────────────────

/// Immutable merged result state valid for one render call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSnapshot {
    pub detections: Vec<Detection>,
    pub auxiliary: Option<Auxiliary>,
    /// Video-native resolution the snapshot was built against.
    pub geometry: Resolution,
}

impl ResultSnapshot {
    pub fn empty(geometry: Resolution) -> Self {
        Self {
            detections: Vec::new(),
            auxiliary: None,
            geometry,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(location: Vec<f64>, confidence: Option<f64>) -> Detection {
        Detection {
            location,
            label: "ada".into(),
            status: "AUTHORIZED".into(),
            authorization: Authorization::Authorized,
            confidence,
        }
    }

    #[test]
    fn bounding_box_requires_four_coordinates() {
        assert!(detection(vec![1.0, 2.0, 3.0], None).bounding_box().is_none());
        assert!(detection(vec![1.0, 2.0, 3.0, 4.0, 5.0], None).bounding_box().is_none());

        let bb = detection(vec![10.0, 60.0, 50.0, 20.0], None)
            .bounding_box()
            .unwrap();
        assert_eq!(bb.width(), 40.0);
        assert_eq!(bb.height(), 40.0);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(Authorization::from_status("AUTHORIZED"), Authorization::Authorized);
        assert_eq!(Authorization::from_status("DENIED"), Authorization::Denied);
        assert_eq!(Authorization::from_status("authorized"), Authorization::Denied);
    }

    #[test]
    fn label_text_includes_optional_confidence() {
        assert_eq!(detection(vec![], Some(93.0)).label_text(), "ada (93.0%)");
        assert_eq!(detection(vec![], None).label_text(), "ada");
    }

    #[test]
    fn auxiliary_display() {
        let e = Auxiliary::Emotion {
            label: "happy".into(),
            confidence: 0.875,
        };
        assert_eq!(e.to_string(), "Emotion: happy (87.5%)");
        let m = Auxiliary::Mask {
            wearing: false,
            confidence: 0.9,
        };
        assert_eq!(m.to_string(), "Mask: No Mask (90.0%)");
        assert_eq!(Auxiliary::Occupancy { count: 3 }.to_string(), "People Count: 3");
    }
}
