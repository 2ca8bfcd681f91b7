use once_cell::sync::Lazy;
use crate::geometry::SurfaceSize;
use crate::overlay::DEFAULT_STROKE_WIDTH;
use crate::settings::UserSettings;

// Fallback values, also what a fresh settings file is written with
pub const DEFAULT_PAGE_SIZE: usize = 12;
pub const DEFAULT_MAX_DISPLAY_WIDTH: u32 = 1024;
pub const DEFAULT_MAX_DISPLAY_HEIGHT: u32 = 768;
pub const DEFAULT_SHOW_TOOLTIPS: bool = true;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub page_size: usize,           // Batch items per page
    pub max_display: SurfaceSize,   // Layout box images are fitted into
    pub stroke_width: f32,          // Box outline thickness in display pixels
    pub show_tooltips: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_display: SurfaceSize::new(DEFAULT_MAX_DISPLAY_WIDTH as f32, DEFAULT_MAX_DISPLAY_HEIGHT as f32),
            stroke_width: DEFAULT_STROKE_WIDTH,
            show_tooltips: DEFAULT_SHOW_TOOLTIPS,
        }
    }
}

impl From<&UserSettings> for Config {
    fn from(settings: &UserSettings) -> Self {
        Self {
            page_size: settings.page_size,
            max_display: SurfaceSize::new(settings.max_display_width as f32, settings.max_display_height as f32),
            stroke_width: settings.stroke_width,
            show_tooltips: settings.show_tooltips,
        }
    }
}

/// Configuration from the default settings file. The CLI builds its own `Config`
/// when `--settings` points elsewhere.
pub static CONFIG: Lazy<Config> = Lazy::new(|| Config::from(&UserSettings::load(None)));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_agree_with_settings() {
        assert_eq!(Config::from(&UserSettings::default()), Config::default());
    }

    #[test]
    fn test_from_settings() {
        let settings = UserSettings {
            page_size: 3,
            max_display_width: 640,
            max_display_height: 480,
            stroke_width: 1.0,
            show_tooltips: false,
        };
        let config = Config::from(&settings);
        assert_eq!(config.page_size, 3);
        assert_eq!(config.max_display, SurfaceSize::new(640.0, 480.0));
        assert!(!config.show_tooltips);
    }
}
