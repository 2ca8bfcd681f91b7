/// Mapping between original image pixels and the displayed surface
use crate::detection::{BoundingBox, ImageMeta};

/// On-screen size of an image surface
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfaceSize {
    pub width: f32,
    pub height: f32,
}

impl SurfaceSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Zero, negative or non-finite in either axis
    pub fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0)
    }

    /// Largest size with the same aspect ratio that fits inside `max` without upscaling,
    /// the way `max-width`/`max-height` constrain an image element.
    pub fn fit_within(&self, max: SurfaceSize) -> SurfaceSize {
        if self.is_degenerate() || max.is_degenerate() {
            return *self;
        }
        let ratio = (max.width / self.width).min(max.height / self.height).min(1.0);
        SurfaceSize::new(self.width * ratio, self.height * ratio)
    }
}

impl From<ImageMeta> for SurfaceSize {
    fn from(meta: ImageMeta) -> Self {
        Self::new(meta.width as f32, meta.height as f32)
    }
}

/// Per-axis ratio from original coordinates to displayed coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactor {
    pub x: f32,
    pub y: f32,
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ScaleFactor {
    pub const IDENTITY: ScaleFactor = ScaleFactor { x: 1.0, y: 1.0 };

    /// Scale from the original image to the displayed surface. Falls back to identity
    /// whenever either side is missing or degenerate.
    pub fn between(original: Option<ImageMeta>, displayed: Option<SurfaceSize>) -> Self {
        let (Some(original), Some(displayed)) = (original, displayed) else {
            return Self::IDENTITY;
        };
        let original = SurfaceSize::from(original);
        if original.is_degenerate() || displayed.is_degenerate() {
            return Self::IDENTITY;
        }

        let x = displayed.width / original.width;
        let y = displayed.height / original.height;
        if x.is_finite() && y.is_finite() && x > 0.0 && y > 0.0 {
            Self { x, y }
        } else {
            Self::IDENTITY
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Map a box in original pixels onto the displayed surface
    pub fn apply(&self, bbox: &BoundingBox) -> OverlayRect {
        OverlayRect {
            x: bbox.x1 * self.x,
            y: bbox.y1 * self.y,
            width: (bbox.x2 - bbox.x1) * self.x,
            height: (bbox.y2 - bbox.y1) * self.y,
        }
    }
}

/// Rectangle in displayed-surface coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OverlayRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl OverlayRect {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.width, self.height].iter().all(|v| v.is_finite())
    }

    /// Hit test, edges inclusive
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.bottom()
    }
}
