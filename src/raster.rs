/// Software compositing of overlays with the `image` crate
///
/// `RasterSurface` plays the role of an image element: it owns decoded pixels (its
/// natural size) and gets a displayed size once laid out. `RasterSink` scales those
/// pixels to the displayed size and strokes every box on top.
use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::path::Path;
use ab_glyph::{FontArc, InvalidFont, PxScale};
use base64::Engine;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use log::debug;

use crate::geometry::{OverlayRect, SurfaceSize};
use crate::overlay::{Overlay, OverlaySink};
use crate::style::ClassStyle;
use crate::surface::ImageSurface;

pub struct RasterSurface {
    pixels: RgbaImage,
    rendered: Cell<Option<SurfaceSize>>,
}

impl RasterSurface {
    pub fn from_image(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            rendered: Cell::new(None),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::from_image(decoded.to_rgba8()))
    }

    pub fn open(path: &Path) -> Result<Self, image::ImageError> {
        let decoded = image::open(path)?;
        Ok(Self::from_image(decoded.to_rgba8()))
    }

    /// Decode a server-annotated image sent as base64
    pub fn from_base64(encoded: &str) -> Result<Self, Box<dyn Error>> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self::from_bytes(&bytes)?)
    }

    /// Lay the surface out inside a `max` box, like an image with `max-width` and
    /// `max-height`. Returns the resulting displayed size.
    pub fn layout(&self, max: SurfaceSize) -> SurfaceSize {
        let size = self.natural().fit_within(max);
        debug!(
            "Laid out {}x{} surface at {:.1}x{:.1}",
            self.pixels.width(),
            self.pixels.height(),
            size.width,
            size.height
        );
        self.rendered.set(Some(size));
        size
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    fn natural(&self) -> SurfaceSize {
        SurfaceSize::new(self.pixels.width() as f32, self.pixels.height() as f32)
    }
}

impl ImageSurface for RasterSurface {
    fn rendered_size(&self) -> Option<SurfaceSize> {
        self.rendered.get()
    }

    fn natural_size(&self) -> Option<SurfaceSize> {
        let natural = self.natural();
        (!natural.is_degenerate()).then_some(natural)
    }

    fn content(&self) -> Option<&RgbaImage> {
        Some(&self.pixels)
    }
}

/// Font used to burn tooltip labels into composited frames
#[derive(Clone)]
pub struct LabelFont {
    font: FontArc,
    scale: PxScale,
}

impl LabelFont {
    pub fn from_bytes(bytes: Vec<u8>, size: f32) -> Result<Self, InvalidFont> {
        Ok(Self {
            font: FontArc::try_from_vec(bytes)?,
            scale: PxScale::from(size),
        })
    }

    pub fn open(path: &Path, size: f32) -> Result<Self, Box<dyn Error>> {
        let bytes = std::fs::read(path)?;
        Ok(Self::from_bytes(bytes, size)?)
    }
}

impl fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelFont").field("size", &self.scale.y).finish()
    }
}

/// Composite the overlay on top of `content` scaled to the overlay's displayed size.
/// With a label font, boxes that carry a tooltip also get a label chip.
pub fn compose(content: &RgbaImage, overlay: &Overlay, labels: Option<&LabelFont>) -> RgbaImage {
    let (width, height) = match overlay.displayed {
        Some(size) if !size.is_degenerate() => (
            (size.width.round() as u32).max(1),
            (size.height.round() as u32).max(1),
        ),
        _ => content.dimensions(),
    };

    let mut canvas = if (width, height) == content.dimensions() {
        content.clone()
    } else {
        imageops::resize(content, width, height, FilterType::Triangle)
    };

    for b in overlay.boxes.iter().filter(|b| b.has_border()) {
        stroke_rect(&mut canvas, &b.rect, b.stroke_width, b.style.color());
    }
    if let Some(font) = labels {
        for b in overlay.boxes.iter().filter(|b| b.has_border()) {
            if let Some(text) = b.tooltip.as_deref() {
                draw_label(&mut canvas, &b.rect, text, b.style, font);
            }
        }
    }
    canvas
}

/// Integer bounds `(left, top, right, bottom)` of `rect`, right/bottom exclusive, clamped
/// to the canvas grown by `margin` on every side. `None` when the rect misses the canvas.
fn clamped_bounds(rect: &OverlayRect, canvas_w: u32, canvas_h: u32, margin: f32) -> Option<(i32, i32, i32, i32)> {
    let (w, h) = (canvas_w as f32, canvas_h as f32);
    if !rect.is_finite() || rect.right() < 0.0 || rect.bottom() < 0.0 || rect.x > w || rect.y > h {
        return None;
    }
    let left = rect.x.clamp(-margin, w + margin).round() as i32;
    let top = rect.y.clamp(-margin, h + margin).round() as i32;
    let right = rect.right().clamp(-margin, w + margin).round() as i32;
    let bottom = rect.bottom().clamp(-margin, h + margin).round() as i32;
    Some((left, top, right.max(left + 1), bottom.max(top + 1)))
}

/// Draw a rectangle outline growing inwards from `rect`, one hollow ring per pixel of stroke
fn stroke_rect(canvas: &mut RgbaImage, rect: &OverlayRect, stroke_width: f32, color: Rgba<u8>) {
    let (canvas_w, canvas_h) = canvas.dimensions();
    if canvas_w == 0 || canvas_h == 0 {
        return;
    }
    let thickness = (stroke_width.round() as i64).clamp(1, canvas_w.max(canvas_h) as i64) as i32;
    let Some((left, top, right, bottom)) = clamped_bounds(rect, canvas_w, canvas_h, thickness as f32 + 1.0) else {
        return;
    };

    for t in 0..thickness {
        let (ring_w, ring_h) = (right - left - 2 * t, bottom - top - 2 * t);
        if ring_w < 1 || ring_h < 1 {
            break;
        }
        let ring = Rect::at(left + t, top + t).of_size(ring_w as u32, ring_h as u32);
        draw_hollow_rect_mut(canvas, ring, color);
    }
}

/// Filled chip with the label text, above the box when there is room, else just inside it
fn draw_label(canvas: &mut RgbaImage, rect: &OverlayRect, text: &str, style: ClassStyle, font: &LabelFont) {
    const PADDING: i32 = 2;
    let (canvas_w, canvas_h) = canvas.dimensions();
    let Some((left, top, _, _)) = clamped_bounds(rect, canvas_w, canvas_h, 0.0) else {
        return;
    };

    let (text_w, text_h) = text_size(font.scale, &font.font, text);
    let chip_w = (text_w as i32 + 2 * PADDING).max(1);
    let chip_h = (text_h as i32 + 2 * PADDING).max(1);
    let chip_left = left.max(0);
    let chip_top = if top - chip_h >= 0 { top - chip_h } else { top.max(0) };

    let chip = Rect::at(chip_left, chip_top).of_size(chip_w as u32, chip_h as u32);
    draw_filled_rect_mut(canvas, chip, style.color());
    draw_text_mut(
        canvas,
        style.text_color(),
        chip_left + PADDING,
        chip_top + PADDING,
        font.scale,
        &font.font,
        text,
    );
}

/// Sink that keeps the latest composited frame
#[derive(Debug, Default)]
pub struct RasterSink {
    frame: Option<RgbaImage>,
    frames_drawn: u64,
    labels: Option<LabelFont>,
}

impl RasterSink {
    pub fn with_labels(labels: Option<LabelFont>) -> Self {
        Self {
            labels,
            ..Self::default()
        }
    }

    pub fn frame(&self) -> Option<&RgbaImage> {
        self.frame.as_ref()
    }

    pub fn take_frame(&mut self) -> Option<RgbaImage> {
        self.frame.take()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }
}

impl OverlaySink for RasterSink {
    fn draw(&mut self, surface: Option<&dyn ImageSurface>, overlay: &Overlay) {
        self.frame = surface
            .and_then(|surface| surface.content())
            .map(|content| compose(content, overlay, self.labels.as_ref()));
        self.frames_drawn += 1;
    }
}
