/// Image surfaces the overlay is composed over
use std::fmt;
use std::rc::Rc;
use image::RgbaImage;

use crate::geometry::SurfaceSize;

/// A visual element displaying an image.
///
/// The overlay only ever reads from a surface. Implementors that change size after
/// layout use interior mutability, the renderer re-reads the size on every refresh.
pub trait ImageSurface {
    /// Size the element occupies in the current layout, `None` before layout
    fn rendered_size(&self) -> Option<SurfaceSize>;

    /// Intrinsic pixel size of the loaded content, `None` before load
    fn natural_size(&self) -> Option<SurfaceSize>;

    /// Decoded pixels, for backends that composite in software
    fn content(&self) -> Option<&RgbaImage> {
        None
    }
}

/// Shared reference to a mounted surface; identity is pointer identity.
#[derive(Clone)]
pub struct SurfaceHandle(Rc<dyn ImageSurface>);

impl SurfaceHandle {
    pub fn new(surface: Rc<dyn ImageSurface>) -> Self {
        Self(surface)
    }

    pub fn same_surface(&self, other: &SurfaceHandle) -> bool {
        // Compare data pointers only; vtables of one type may be duplicated
        std::ptr::eq(Rc::as_ptr(&self.0) as *const (), Rc::as_ptr(&other.0) as *const ())
    }

    pub fn surface(&self) -> &dyn ImageSurface {
        self.0.as_ref()
    }
}

impl<S: ImageSurface + 'static> From<Rc<S>> for SurfaceHandle {
    fn from(surface: Rc<S>) -> Self {
        Self(surface)
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("rendered", &self.0.rendered_size())
            .field("natural", &self.0.natural_size())
            .finish()
    }
}

/// Displayed size of a surface: the rendered box when layout has produced one,
/// otherwise the intrinsic size of the content.
pub fn displayed_size(surface: &dyn ImageSurface) -> Option<SurfaceSize> {
    surface
        .rendered_size()
        .filter(|size| !size.is_degenerate())
        .or_else(|| surface.natural_size().filter(|size| !size.is_degenerate()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        rendered: Option<SurfaceSize>,
        natural: Option<SurfaceSize>,
    }

    impl ImageSurface for Fixed {
        fn rendered_size(&self) -> Option<SurfaceSize> {
            self.rendered
        }

        fn natural_size(&self) -> Option<SurfaceSize> {
            self.natural
        }
    }

    #[test]
    fn test_rendered_size_preferred() {
        let surface = Fixed {
            rendered: Some(SurfaceSize::new(300.0, 200.0)),
            natural: Some(SurfaceSize::new(600.0, 400.0)),
        };
        assert_eq!(displayed_size(&surface), Some(SurfaceSize::new(300.0, 200.0)));
    }

    #[test]
    fn test_falls_back_to_natural_size() {
        let unlaid = Fixed { rendered: None, natural: Some(SurfaceSize::new(600.0, 400.0)) };
        assert_eq!(displayed_size(&unlaid), Some(SurfaceSize::new(600.0, 400.0)));

        let collapsed = Fixed {
            rendered: Some(SurfaceSize::new(0.0, 0.0)),
            natural: Some(SurfaceSize::new(600.0, 400.0)),
        };
        assert_eq!(displayed_size(&collapsed), Some(SurfaceSize::new(600.0, 400.0)));

        let empty = Fixed { rendered: Some(SurfaceSize::default()), natural: None };
        assert_eq!(displayed_size(&empty), None);
    }

    #[test]
    fn test_handle_identity() {
        let a: SurfaceHandle = Rc::new(Fixed { rendered: None, natural: None }).into();
        let b: SurfaceHandle = Rc::new(Fixed { rendered: None, natural: None }).into();
        assert!(a.same_surface(&a.clone()));
        assert!(!a.same_surface(&b));
    }
}
