//! Synthetic per-connection analyzer.
//!
//! Produces the same JSON shape as the real service:
//!
//! ```text
//! {"face_results": [{"location": [t, r, b, l], "name", "status", "confidence"}],
//!  "vision_results": {} | {"emotion": {..}} | {"mask": {..}} | {"people": {..}}}
//! ```
//!
//! The auxiliary value is recomputed only every `aux_every` frames and
//! repeated from cache in between, like a slow model sharing the stream
//! with a fast one.

use image::RgbImage;
use serde_json::{Value, json};

use vigil_core::AnalysisMode;

const EMOTIONS: [&str; 4] = ["happy", "neutral", "surprised", "sad"];

pub struct FakeAnalyzer {
    frames: u64,
    aux_every: u64,
    alternate_every: u64,
    /// Auxiliary value and the mode it was computed for.
    cached: Option<(AnalysisMode, Value)>,
}

impl FakeAnalyzer {
    pub fn new(aux_every: u32, alternate_every: u32) -> Self {
        Self {
            frames: 0,
            aux_every: aux_every.max(1) as u64,
            alternate_every: alternate_every.max(1) as u64,
            cached: None,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Analyze one decoded frame under `mode`.
    pub fn analyze(&mut self, image: &RgbImage, mode: AnalysisMode) -> Value {
        let n = self.frames;
        self.frames += 1;
        json!({
            "face_results": [self.detection(image, n)],
            "vision_results": self.auxiliary(image, mode, n),
        })
    }

    fn detection(&self, image: &RgbImage, n: u64) -> Value {
        let (w, h) = image.dimensions();
        let side = w.min(h) / 3;
        let (left, top) = ((w - side) / 2, (h - side) / 2);
        let authorized = (n / self.alternate_every) % 2 == 0;
        let (name, status) = if authorized {
            ("ada", "AUTHORIZED")
        } else {
            ("Unknown", "DENIED")
        };
        json!({
            "location": [top, left + side, top + side, left],
            "name": name,
            "status": status,
            "confidence": 90.0 + (n % 10) as f64 / 2.0,
        })
    }

    fn auxiliary(&mut self, image: &RgbImage, mode: AnalysisMode, n: u64) -> Value {
        if mode == AnalysisMode::None {
            self.cached = None;
            return json!({});
        }
        let stale = match &self.cached {
            Some((cached_mode, _)) => *cached_mode != mode || n % self.aux_every == 0,
            None => true,
        };
        if stale {
            let value = compute_auxiliary(image, mode, n / self.aux_every);
            self.cached = Some((mode, value));
        }
        match &self.cached {
            Some((_, value)) => value.clone(),
            None => json!({}),
        }
    }
}

fn mean_brightness(image: &RgbImage) -> f64 {
    let count = (image.width() as u64 * image.height() as u64).max(1);
    let sum: u64 = image
        .pixels()
        .map(|p| (p.0[0] as u64 + p.0[1] as u64 + p.0[2] as u64) / 3)
        .sum();
    sum as f64 / count as f64 / 255.0
}

fn compute_auxiliary(image: &RgbImage, mode: AnalysisMode, round: u64) -> Value {
    let brightness = mean_brightness(image);
    match mode {
        AnalysisMode::Emotion => json!({
            "emotion": {
                "emotion": EMOTIONS[(round % EMOTIONS.len() as u64) as usize],
                "confidence": 0.5 + brightness / 2.0,
            }
        }),
        AnalysisMode::Mask => json!({
            "mask": {
                "wearing_mask": round % 2 == 0,
                "confidence": 0.6 + brightness / 4.0,
            }
        }),
        AnalysisMode::People => json!({ "people": { "count": 1 + round % 3 } }),
        AnalysisMode::None => json!({}),
    }
}

// ── Tests ────────────────────────────────────────────────────────
