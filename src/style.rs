/// Per-class box colors
use image::Rgba;

/// Visual style of a detection box, keyed by class identity.
///
/// The mapping is total: any class without its own entry gets `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassStyle {
    Yellow,
    Orange,
    Black,
    Default,
}

impl ClassStyle {
    pub fn for_class(class_key: &str) -> Self {
        match class_key.trim() {
            "0" => ClassStyle::Yellow,
            "1" => ClassStyle::Orange,
            "2" => ClassStyle::Black,
            _ => ClassStyle::Default,
        }
    }

    /// Stroke color of the box border
    pub fn color(self) -> Rgba<u8> {
        match self {
            ClassStyle::Yellow => Rgba([255, 255, 0, 255]),
            ClassStyle::Orange => Rgba([255, 165, 0, 255]),
            ClassStyle::Black => Rgba([0, 0, 0, 255]),
            // Emerald
            ClassStyle::Default => Rgba([34, 197, 94, 255]),
        }
    }

    /// Label text color that stays readable on `color()`
    pub fn text_color(self) -> Rgba<u8> {
        match self {
            ClassStyle::Black => Rgba([255, 255, 255, 255]),
            _ => Rgba([0, 0, 0, 255]),
        }
    }

    /// Hex color for text output and logs
    pub fn hex(self) -> String {
        let [r, g, b, _] = self.color().0;
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}
