/// Bounding box overlay for detection results
///
/// Maps boxes from original-image pixels onto whatever size the image surface is
/// currently displayed at, and recomputes whenever the surface, its content, the
/// viewport or the detections change.
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use log::{debug, trace, warn};

use crate::detection::{Detection, DetectionResult, ImageMeta, ResultSet};
use crate::events::{EventBus, LayoutEvent, Subscription};
use crate::geometry::{OverlayRect, ScaleFactor, SurfaceSize};
use crate::style::ClassStyle;
use crate::surface::{displayed_size, ImageSurface, SurfaceHandle};

pub const DEFAULT_STROKE_WIDTH: f32 = 2.0;

/// Who draws the boxes: the server burned them into the image, or we draw them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    ServerAnnotated,
    ClientOverlay,
}

impl RenderMode {
    pub fn for_result(result: &DetectionResult) -> Self {
        match result.image_b64.as_deref() {
            Some(encoded) if !encoded.trim().is_empty() => RenderMode::ServerAnnotated,
            _ => RenderMode::ClientOverlay,
        }
    }

    /// Borders are suppressed on server-annotated images; hover regions are always kept.
    pub fn options(self, show_tooltip: bool, stroke_width: f32) -> OverlayOptions {
        OverlayOptions {
            show_borders: self == RenderMode::ClientOverlay,
            show_tooltip,
            stroke_width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayOptions {
    pub show_borders: bool,
    pub show_tooltip: bool,
    pub stroke_width: f32,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            show_borders: true,
            show_tooltip: true,
            stroke_width: DEFAULT_STROKE_WIDTH,
        }
    }
}

/// One positioned, styled box
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBox {
    /// Index into the detection list
    pub index: usize,
    pub rect: OverlayRect,
    pub style: ClassStyle,
    /// Zero when borders are suppressed; the box is still hit-testable
    pub stroke_width: f32,
    pub tooltip: Option<String>,
}

impl OverlayBox {
    pub fn has_border(&self) -> bool {
        self.stroke_width > 0.0
    }
}

/// Everything drawn over a surface for one refresh
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Overlay {
    pub displayed: Option<SurfaceSize>,
    pub scale: ScaleFactor,
    pub boxes: Vec<OverlayBox>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Topmost box under the point, in displayed coordinates
    pub fn hit_test(&self, x: f32, y: f32) -> Option<&OverlayBox> {
        self.boxes.iter().rev().find(|b| b.rect.contains(x, y))
    }

    pub fn tooltip_at(&self, x: f32, y: f32) -> Option<&str> {
        self.hit_test(x, y).and_then(|b| b.tooltip.as_deref())
    }
}

/// `"<class> <pct>%"` with one decimal, or the bare class when confidence is not finite
pub fn tooltip_text(detection: &Detection) -> String {
    let label = detection.class_key();
    if detection.confidence.is_finite() {
        // Halves round away from zero: 0.0625 is "6.3%"
        let pct = (f64::from(detection.confidence) * 1000.0).round() / 10.0;
        format!("{} {:.1}%", label, pct)
    } else {
        label.into_owned()
    }
}

/// Compute the overlay for a surface. Without a surface or original metadata there is
/// nothing to align to, and the overlay is empty.
pub fn compute_overlay(
    surface: Option<&dyn ImageSurface>,
    original: Option<ImageMeta>,
    detections: &[Detection],
    options: OverlayOptions,
) -> Overlay {
    let (Some(surface), Some(original)) = (surface, original) else {
        return Overlay::default();
    };

    let displayed = displayed_size(surface);
    let scale = ScaleFactor::between(Some(original), displayed);
    let stroke_width = if options.show_borders && options.stroke_width.is_finite() {
        options.stroke_width.max(0.0)
    } else {
        0.0
    };

    let mut boxes = Vec::with_capacity(detections.len());
    for (index, detection) in detections.iter().enumerate() {
        let rect = scale.apply(&detection.bbox);
        if !rect.is_finite() {
            trace!("Dropping detection {} with non-finite geometry", index);
            continue;
        }
        boxes.push(OverlayBox {
            index,
            rect,
            style: ClassStyle::for_class(&detection.class_key()),
            stroke_width,
            tooltip: options.show_tooltip.then(|| tooltip_text(detection)),
        });
    }

    Overlay { displayed, scale, boxes }
}

/// Receives every freshly computed overlay
pub trait OverlaySink {
    fn draw(&mut self, surface: Option<&dyn ImageSurface>, overlay: &Overlay);
}

/// Sink that draws nothing
#[derive(Debug, Default)]
pub struct NullSink;

impl OverlaySink for NullSink {
    fn draw(&mut self, _surface: Option<&dyn ImageSurface>, _overlay: &Overlay) {}
}

/// Keeps the overlay of one image surface in sync with its layout.
pub struct OverlayRenderer<S: OverlaySink = NullSink> {
    surface: Option<SurfaceHandle>,
    result: ResultSet,
    options: OverlayOptions,
    readiness: u64,
    current: Overlay,
    refreshes: u64,
    sink: S,
}

impl OverlayRenderer<NullSink> {
    pub fn new(options: OverlayOptions) -> Self {
        Self::with_sink(options, NullSink)
    }
}

impl<S: OverlaySink> OverlayRenderer<S> {
    pub fn with_sink(options: OverlayOptions, sink: S) -> Self {
        Self {
            surface: None,
            result: ResultSet::default(),
            options,
            readiness: 0,
            current: Overlay::default(),
            refreshes: 0,
            sink,
        }
    }

    pub fn overlay(&self) -> &Overlay {
        &self.current
    }

    pub fn readiness(&self) -> u64 {
        self.readiness
    }

    /// Number of recomputations so far
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    pub fn options(&self) -> OverlayOptions {
        self.options
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn set_surface(&mut self, surface: Option<SurfaceHandle>) {
        let unchanged = match (&self.surface, &surface) {
            (Some(current), Some(new)) => current.same_surface(new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        self.surface = surface;
        self.refresh("surface changed");
    }

    /// The surface finished loading. Ticks older than the last one seen belong to a
    /// previous image and are ignored.
    pub fn content_loaded(&mut self, tick: u64) {
        if tick < self.readiness {
            debug!("Ignoring stale load tick {} (current {})", tick, self.readiness);
            return;
        }
        self.readiness = tick;
        self.refresh("content loaded");
    }

    pub fn viewport_resized(&mut self) {
        self.refresh("viewport resized");
    }

    pub fn set_result(&mut self, result: ResultSet) {
        if self.result.same_as(&result) {
            return;
        }
        self.result = result;
        self.refresh("detections changed");
    }

    pub fn set_options(&mut self, options: OverlayOptions) {
        if self.options == options {
            return;
        }
        self.options = options;
        self.refresh("options changed");
    }

    pub fn handle(&mut self, event: &LayoutEvent) {
        match event {
            LayoutEvent::SurfaceMounted(surface) => self.set_surface(surface.clone()),
            LayoutEvent::ContentLoaded(tick) => self.content_loaded(*tick),
            LayoutEvent::ViewportResized(_) => self.viewport_resized(),
        }
    }

    fn refresh(&mut self, reason: &str) {
        let surface = self.surface.as_ref().map(|handle| handle.surface());
        self.current = compute_overlay(
            surface,
            self.result.original(),
            self.result.detections(),
            self.options,
        );
        self.refreshes += 1;
        debug!(
            "Overlay refresh ({}): {} boxes, displayed {:?}, scale {:.4}x{:.4}",
            reason,
            self.current.boxes.len(),
            self.current.displayed,
            self.current.scale.x,
            self.current.scale.y
        );
        self.sink.draw(surface, &self.current);
    }
}

impl<S: OverlaySink + 'static> OverlayRenderer<S> {
    /// Subscribe a shared renderer to layout events. The renderer is held weakly;
    /// dropping the subscription detaches it.
    pub fn attach(renderer: &Rc<RefCell<Self>>, bus: &EventBus<LayoutEvent>) -> Subscription {
        let weak: Weak<RefCell<Self>> = Rc::downgrade(renderer);
        bus.subscribe(move |event: &LayoutEvent| {
            let Some(renderer) = weak.upgrade() else {
                return;
            };
            match renderer.try_borrow_mut() {
                Ok(mut renderer) => renderer.handle(event),
                Err(_) => warn!("Overlay renderer busy, dropping {:?}", event),
            };
        })
    }
}
