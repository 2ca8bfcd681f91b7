//! Draw object-detection boxes over an image at whatever size it is displayed.
//!
//! Box coordinates arrive in original-image pixels. [`overlay::OverlayRenderer`]
//! rescales them onto the displayed surface and recomputes whenever the surface is
//! mounted, finishes loading, is resized, or gets new detections.

pub mod archive;
pub mod batch;
pub mod build_info;
pub mod config;
pub mod detection;
pub mod events;
pub mod geometry;
pub mod logging;
pub mod overlay;
pub mod raster;
pub mod settings;
pub mod style;
pub mod surface;

pub use detection::{BoundingBox, Detection, DetectionResult, ImageMeta, Payload, ResultSet};
pub use events::{EventBus, LayoutEvent, Subscription};
pub use geometry::{OverlayRect, ScaleFactor, SurfaceSize};
pub use overlay::{compute_overlay, Overlay, OverlayBox, OverlayOptions, OverlayRenderer, OverlaySink, RenderMode};
pub use style::ClassStyle;
pub use surface::{ImageSurface, SurfaceHandle};
