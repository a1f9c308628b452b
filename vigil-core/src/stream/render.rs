//! Double-buffered overlay painter.
//!
//! ```text
//!   render(snapshot, viewport, video)
//!        │
//!        ▼
//!   ┌─────────┐  clear, scale, stroke boxes, label blocks  ┌─────────┐
//!   │  back   │ ─────────────── swap ─────────────────────► │  front  │ (visible)
//!   └─────────┘                                             └─────────┘
//! ```
//!
//! The front buffer is only ever replaced by a fully painted back buffer.
//! A failed render leaves the front buffer as it was.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{Rgba, RgbaImage};
use tracing::{debug, trace};

use crate::error::VigilError;
use crate::stream::types::{Authorization, Resolution, ResultSnapshot};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const GLYPH: u32 = 8;

// ── OverlayStyle ─────────────────────────────────────────────────

/// Colors and metrics for annotations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub authorized: Rgba<u8>,
    pub alert: Rgba<u8>,
    pub block_background: Rgba<u8>,
    pub text: Rgba<u8>,
    pub stroke_width: u32,
    /// Integer scale applied to the 8x8 glyphs.
    pub text_scale: u32,
    /// Padding around the label text above the box.
    pub label_padding: u32,
    /// Padding around the status text below the box.
    pub status_padding: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            authorized: Rgba([0x22, 0xc5, 0x5e, 0xff]),
            alert: Rgba([0xef, 0x44, 0x44, 0xff]),
            block_background: Rgba([0, 0, 0, 204]),
            text: Rgba([0xff, 0xff, 0xff, 0xff]),
            stroke_width: 2,
            text_scale: 2,
            label_padding: 8,
            status_padding: 10,
        }
    }
}

impl OverlayStyle {
    fn color_for(&self, authorization: Authorization) -> Rgba<u8> {
        match authorization {
            Authorization::Authorized => self.authorized,
            Authorization::Denied => self.alert,
        }
    }

    fn line_height(&self) -> u32 {
        GLYPH * self.text_scale
    }

    fn line_gap(&self) -> u32 {
        2 * self.text_scale
    }

    /// Pixel size of `lines` of text, without padding.
    pub fn measure(&self, lines: &[&str]) -> (u32, u32) {
        let widest = lines.iter().map(|l| l.chars().count() as u32).max().unwrap_or(0);
        let n = lines.len() as u32;
        let height = n * self.line_height() + n.saturating_sub(1) * self.line_gap();
        (widest * GLYPH * self.text_scale, height)
    }
}

// ── RenderSurface ────────────────────────────────────────────────

/// Visible and off-screen buffer pair.
#[derive(Debug, Clone)]
pub struct RenderSurface {
    front: RgbaImage,
    back: RgbaImage,
}

impl RenderSurface {
    pub fn new(size: Resolution) -> Self {
        Self {
            front: RgbaImage::new(size.width, size.height),
            back: RgbaImage::new(size.width, size.height),
        }
    }

    pub fn front(&self) -> &RgbaImage {
        &self.front
    }

    /// Size the back buffer to `size` and clear it to transparent.
    fn prepare_back(&mut self, size: Resolution) -> &mut RgbaImage {
        if self.back.dimensions() != (size.width, size.height) {
            self.back = RgbaImage::new(size.width, size.height);
        } else {
            self.back.pixels_mut().for_each(|p| *p = TRANSPARENT);
        }
        &mut self.back
    }

    fn present(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }
}

// ── OverlayRenderer ──────────────────────────────────────────────

/// Result of a successful render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// No detections: the visible surface was cleared.
    Cleared,
    /// `boxes` annotations painted, `skipped` malformed quads ignored.
    Painted { boxes: usize, skipped: usize },
}

pub struct OverlayRenderer {
    surface: RenderSurface,
    style: OverlayStyle,
    renders: u64,
}

impl OverlayRenderer {
    pub fn new(viewport: Resolution, style: OverlayStyle) -> Self {
        Self {
            surface: RenderSurface::new(viewport),
            style,
            renders: 0,
        }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// The visible buffer.
    pub fn front(&self) -> &RgbaImage {
        self.surface.front()
    }

    /// Successful render calls so far.
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// Paint `snapshot` for a `viewport`-sized display of a `video`-sized
    /// source and present it.
    ///
    /// Detection coordinates are in `video` pixels and are rescaled on
    /// every call. The auxiliary annotation is painted only when the
    /// snapshot was built against `video`.
    pub fn render(
        &mut self,
        snapshot: &ResultSnapshot,
        viewport: Resolution,
        video: Resolution,
    ) -> Result<RenderOutcome, VigilError> {
        if !viewport.is_usable() {
            return Err(VigilError::Render(format!("unusable viewport {viewport}")));
        }
        if snapshot.is_empty() {
            self.surface.prepare_back(viewport);
            self.surface.present();
            self.renders += 1;
            trace!("overlay cleared");
            return Ok(RenderOutcome::Cleared);
        }
        if !video.is_usable() {
            return Err(VigilError::Render(format!("unusable video geometry {video}")));
        }

        let sx = viewport.width as f64 / video.width as f64;
        let sy = viewport.height as f64 / video.height as f64;
        let auxiliary = snapshot
            .auxiliary
            .as_ref()
            .filter(|_| snapshot.geometry == video)
            .map(|aux| aux.to_string());

        let style = self.style;
        let back = self.surface.prepare_back(viewport);
        let mut boxes = 0;
        let mut skipped = 0;

        for detection in &snapshot.detections {
            let Some(bbox) = detection.bounding_box() else {
                skipped += 1;
                continue;
            };
            let b = bbox.scaled(sx, sy);
            let color = style.color_for(detection.authorization);
            let (left, right) = (to_pixel(b.left, viewport.width), to_pixel(b.right, viewport.width));
            let (top, bottom) = (to_pixel(b.top, viewport.height), to_pixel(b.bottom, viewport.height));

            stroke_rect(back, left, top, right - left, bottom - top, style.stroke_width, color);

            let label = detection.label_text();
            let (_, label_h) = style.measure(&[&label]);
            let label_block_h = label_h + 2 * style.label_padding;
            draw_block(
                back,
                &style,
                left,
                top - label_block_h as i64,
                &[(&label, style.text)],
                style.label_padding,
            );

            let mut status_lines = vec![(detection.status.as_str(), color)];
            if let Some(aux) = auxiliary.as_deref() {
                status_lines.push((aux, style.text));
            }
            draw_block(
                back,
                &style,
                left,
                bottom + style.stroke_width as i64,
                &status_lines,
                style.status_padding,
            );
            boxes += 1;
        }

        self.surface.present();
        self.renders += 1;
        debug!(boxes, skipped, %viewport, "overlay painted");
        Ok(RenderOutcome::Painted { boxes, skipped })
    }

    /// Clear the visible surface and resize both buffers to `viewport`.
    pub fn clear(&mut self, viewport: Resolution) {
        self.surface = RenderSurface::new(viewport);
    }
}

// ── Painting primitives ──────────────────────────────────────────

/// Fill a rectangle, clipped to the image.
fn fill_rect(img: &mut RgbaImage, x: i64, y: i64, w: i64, h: i64, color: Rgba<u8>) {
    let (iw, ih) = (img.width() as i64, img.height() as i64);
    let (x0, y0) = (x.max(0), y.max(0));
    let (x1, y1) = ((x + w).min(iw), (y + h).min(ih));
    for py in y0..y1 {
        for px in x0..x1 {
            img.put_pixel(px as u32, py as u32, color);
        }
    }
}

fn stroke_rect(img: &mut RgbaImage, x: i64, y: i64, w: i64, h: i64, width: u32, color: Rgba<u8>) {
    let t = width as i64;
    fill_rect(img, x, y, w, t, color);
    fill_rect(img, x, y + h - t, w, t, color);
    fill_rect(img, x, y, t, h, color);
    fill_rect(img, x + w - t, y, t, h, color);
}

/// Round a scaled coordinate to a pixel, bounded to one extent either side
/// of a `limit`-wide axis so box arithmetic cannot overflow.
fn to_pixel(v: f64, limit: u32) -> i64 {
    let limit = limit as f64;
    v.round().clamp(-limit, 2.0 * limit) as i64
}

/// Opaque text block at `(x, y)`, clamped into the image vertically. Each
/// line carries its own text color.
fn draw_block(
    img: &mut RgbaImage,
    style: &OverlayStyle,
    x: i64,
    y: i64,
    lines: &[(&str, Rgba<u8>)],
    pad: u32,
) {
    let texts: Vec<&str> = lines.iter().map(|(text, _)| *text).collect();
    let (tw, th) = style.measure(&texts);
    let (bw, bh) = ((tw + 2 * pad) as i64, (th + 2 * pad) as i64);
    let y = y.clamp(0, (img.height() as i64 - bh).max(0));
    fill_rect(img, x, y, bw, bh, style.block_background);

    let mut ty = y + pad as i64;
    for (line, color) in lines {
        draw_text(img, x + pad as i64, ty, line, style.text_scale, *color);
        ty += (style.line_height() + style.line_gap()) as i64;
    }
}

fn draw_text(img: &mut RgbaImage, x: i64, y: i64, text: &str, scale: u32, color: Rgba<u8>) {
    let s = scale as i64;
    for (i, ch) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            continue;
        };
        let gx = x + i as i64 * GLYPH as i64 * s;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH {
                if bits & (1 << col) != 0 {
                    fill_rect(img, gx + col as i64 * s, y + row as i64 * s, s, s, color);
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::{Auxiliary, Detection};

    const VIDEO: Resolution = Resolution::new(320, 240);

    fn detection(location: Vec<f64>, status: &str) -> Detection {
        Detection {
            location,
            label: "ada".into(),
            status: status.into(),
            authorization: Authorization::from_status(status),
            confidence: Some(91.0),
        }
    }

    fn snapshot(detections: Vec<Detection>) -> ResultSnapshot {
        ResultSnapshot {
            detections,
            auxiliary: None,
            geometry: VIDEO,
        }
    }

    fn painted_pixels(img: &RgbaImage) -> usize {
        img.pixels().filter(|p| p.0[3] != 0).count()
    }

    #[test]
    fn render_is_idempotent() {
        let mut r = OverlayRenderer::new(VIDEO, OverlayStyle::default());
        let snap = snapshot(vec![detection(vec![60.0, 200.0, 180.0, 100.0], "AUTHORIZED")]);

        r.render(&snap, VIDEO, VIDEO).unwrap();
        let first = r.front().clone();
        r.render(&snap, VIDEO, VIDEO).unwrap();
        assert_eq!(r.front(), &first);
        assert!(painted_pixels(&first) > 0);
    }

    #[test]
    fn empty_snapshot_clears_previous_annotations() {
        let mut r = OverlayRenderer::new(VIDEO, OverlayStyle::default());
        let snap = snapshot(vec![detection(vec![60.0, 200.0, 180.0, 100.0], "AUTHORIZED")]);
        r.render(&snap, VIDEO, VIDEO).unwrap();

        let outcome = r.render(&snapshot(Vec::new()), VIDEO, VIDEO).unwrap();
        assert_eq!(outcome, RenderOutcome::Cleared);
        assert_eq!(painted_pixels(r.front()), 0);
    }

    #[test]
    fn box_color_follows_authorization() {
        let style = OverlayStyle::default();
        let mut r = OverlayRenderer::new(VIDEO, style);

        let snap = snapshot(vec![detection(vec![60.0, 200.0, 180.0, 100.0], "AUTHORIZED")]);
        r.render(&snap, VIDEO, VIDEO).unwrap();
        // Left edge of the box, halfway down.
        assert_eq!(*r.front().get_pixel(100, 120), style.authorized);

        let snap = snapshot(vec![detection(vec![60.0, 200.0, 180.0, 100.0], "UNKNOWN")]);
        r.render(&snap, VIDEO, VIDEO).unwrap();
        assert_eq!(*r.front().get_pixel(100, 120), style.alert);
    }

    #[test]
    fn coordinates_scale_to_viewport() {
        let style = OverlayStyle::default();
        let mut r = OverlayRenderer::new(VIDEO, style);
        let viewport = Resolution::new(640, 480);
        let snap = snapshot(vec![detection(vec![60.0, 200.0, 180.0, 100.0], "AUTHORIZED")]);

        r.render(&snap, viewport, VIDEO).unwrap();
        assert_eq!(r.front().dimensions(), (640, 480));
        assert_eq!(*r.front().get_pixel(200, 240), style.authorized);
        assert_eq!(*r.front().get_pixel(100, 240), TRANSPARENT);
    }

    #[test]
    fn malformed_quads_are_skipped() {
        let mut r = OverlayRenderer::new(VIDEO, OverlayStyle::default());
        let snap = snapshot(vec![
            detection(vec![1.0, 2.0, 3.0], "AUTHORIZED"),
            detection(vec![60.0, 200.0, 180.0, 100.0], "AUTHORIZED"),
            detection(Vec::new(), "AUTHORIZED"),
        ]);
        let outcome = r.render(&snap, VIDEO, VIDEO).unwrap();
        assert_eq!(outcome, RenderOutcome::Painted { boxes: 1, skipped: 2 });
    }

    #[test]
    fn failed_render_keeps_visible_frame() {
        let mut r = OverlayRenderer::new(VIDEO, OverlayStyle::default());
        let snap = snapshot(vec![detection(vec![60.0, 200.0, 180.0, 100.0], "AUTHORIZED")]);
        r.render(&snap, VIDEO, VIDEO).unwrap();
        let before = r.front().clone();

        assert!(r.render(&snap, VIDEO, Resolution::new(0, 0)).is_err());
        assert!(r.render(&snap, Resolution::new(0, 10), VIDEO).is_err());
        assert_eq!(r.front(), &before);
        assert_eq!(r.render_count(), 1);
    }

    #[test]
    fn auxiliary_extends_status_block_only_for_matching_geometry() {
        let mut r = OverlayRenderer::new(VIDEO, OverlayStyle::default());
        let mut snap = snapshot(vec![detection(vec![60.0, 200.0, 120.0, 100.0], "AUTHORIZED")]);
        r.render(&snap, VIDEO, VIDEO).unwrap();
        let plain = painted_pixels(r.front());

        snap.auxiliary = Some(Auxiliary::Occupancy { count: 2 });
        r.render(&snap, VIDEO, VIDEO).unwrap();
        let with_aux = painted_pixels(r.front());
        assert!(with_aux > plain);

        snap.geometry = Resolution::new(640, 480);
        r.render(&snap, VIDEO, VIDEO).unwrap();
        assert_eq!(painted_pixels(r.front()), plain);
    }

    fn painted_in(img: &RgbaImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x, y).0[3] != 0)
            .count()
    }

    #[test]
    fn auxiliary_line_follows_every_detection() {
        let mut r = OverlayRenderer::new(VIDEO, OverlayStyle::default());
        let mut snap = snapshot(vec![
            detection(vec![40.0, 60.0, 80.0, 20.0], "AUTHORIZED"),
            detection(vec![40.0, 300.0, 80.0, 260.0], "AUTHORIZED"),
        ]);
        r.render(&snap, VIDEO, VIDEO).unwrap();
        // Below the second face's single-line status block.
        assert_eq!(painted_in(r.front(), 285..320, 120..138), 0);

        snap.auxiliary = Some(Auxiliary::Occupancy { count: 2 });
        r.render(&snap, VIDEO, VIDEO).unwrap();
        assert!(painted_in(r.front(), 285..320, 120..138) > 0);
    }

    #[test]
    fn status_text_uses_authorization_color() {
        let style = OverlayStyle::default();
        let mut r = OverlayRenderer::new(VIDEO, style);
        let snap = snapshot(vec![detection(vec![60.0, 200.0, 180.0, 100.0], "DENIED")]);
        r.render(&snap, VIDEO, VIDEO).unwrap();

        let status_block: Vec<Rgba<u8>> = (182..218)
            .flat_map(|y| (100..280).map(move |x| (x, y)))
            .map(|(x, y)| *r.front().get_pixel(x, y))
            .collect();
        assert!(status_block.contains(&style.alert));
        assert!(!status_block.contains(&style.text));
    }

    #[test]
    fn out_of_range_coordinates_do_not_overflow() {
        let mut channel = crate::stream::results::ResultChannel::new(Default::default());
        let snap = channel
            .ingest(
                r#"{"face_results":[
                    {"location":[-1e300,10,10,0],"name":"far","status":"AUTHORIZED"},
                    {"location":[0,1e300,1e300,-1e300],"name":"wide","status":"DENIED"}
                ]}"#,
                VIDEO,
            )
            .unwrap();

        let mut r = OverlayRenderer::new(VIDEO, OverlayStyle::default());
        let outcome = r.render(&snap, VIDEO, VIDEO).unwrap();
        assert_eq!(outcome, RenderOutcome::Painted { boxes: 2, skipped: 0 });

        // Upscaled to a larger viewport.
        let outcome = r.render(&snap, Resolution::new(640, 480), VIDEO).unwrap();
        assert_eq!(outcome, RenderOutcome::Painted { boxes: 2, skipped: 0 });
    }

    #[test]
    fn measure_accounts_for_lines_and_scale() {
        let style = OverlayStyle::default();
        assert_eq!(style.measure(&["abc"]), (48, 16));
        assert_eq!(style.measure(&["abc", "defgh"]), (80, 36));
        assert_eq!(style.measure(&[]), (0, 0));
    }

    #[test]
    fn clear_resizes_and_blanks() {
        let mut r = OverlayRenderer::new(VIDEO, OverlayStyle::default());
        let snap = snapshot(vec![detection(vec![60.0, 200.0, 180.0, 100.0], "AUTHORIZED")]);
        r.render(&snap, VIDEO, VIDEO).unwrap();

        r.clear(Resolution::new(10, 10));
        assert_eq!(r.front().dimensions(), (10, 10));
        assert_eq!(painted_pixels(r.front()), 0);
    }
}
