use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use log::{debug, info, warn, error};

use crate::config::{DEFAULT_MAX_DISPLAY_HEIGHT, DEFAULT_MAX_DISPLAY_WIDTH, DEFAULT_PAGE_SIZE, DEFAULT_SHOW_TOOLTIPS};
use crate::overlay::DEFAULT_STROKE_WIDTH;

/// User settings for rendering and batch review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Batch items per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Layout box an image is fitted into, like CSS max-width/max-height
    #[serde(default = "default_max_display_width")]
    pub max_display_width: u32,

    #[serde(default = "default_max_display_height")]
    pub max_display_height: u32,

    /// Box outline thickness in display pixels
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f32,

    /// Attach "<class> <confidence>%" tooltips to boxes
    #[serde(default = "default_show_tooltips")]
    pub show_tooltips: bool,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_display_width() -> u32 {
    DEFAULT_MAX_DISPLAY_WIDTH
}

fn default_max_display_height() -> u32 {
    DEFAULT_MAX_DISPLAY_HEIGHT
}

fn default_stroke_width() -> f32 {
    DEFAULT_STROKE_WIDTH
}

fn default_show_tooltips() -> bool {
    DEFAULT_SHOW_TOOLTIPS
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_display_width: default_max_display_width(),
            max_display_height: default_max_display_height(),
            stroke_width: default_stroke_width(),
            show_tooltips: default_show_tooltips(),
        }
    }
}

impl UserSettings {
    /// Get the path to the settings file
    /// On Linux: ~/.config/detlens/settings.yaml
    /// On macOS: ~/Library/Application Support/detlens/settings.yaml
    pub fn settings_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."));

        config_dir.join("detlens").join("settings.yaml")
    }

    fn resolve_path(custom_path: Option<&str>) -> PathBuf {
        match custom_path {
            Some(p) => PathBuf::from(p),
            None => Self::settings_path(),
        }
    }

    /// Load settings from the YAML file, falling back to defaults on any problem
    pub fn load(custom_path: Option<&str>) -> Self {
        if let Some(p) = custom_path {
            info!("Using custom settings path: {}", p);
        }
        let path = Self::resolve_path(custom_path);

        if !path.exists() {
            info!("Settings file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(contents) => match serde_yaml::from_str::<UserSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded settings from {:?}", path);
                    debug!("Settings: page_size={}, max_display={}x{}, stroke_width={}",
                        settings.page_size, settings.max_display_width, settings.max_display_height, settings.stroke_width);
                    settings.sanitized()
                }
                Err(e) => {
                    error!("Failed to parse settings file at {:?}: {}", path, e);
                    warn!("Using default settings");
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }
        }
    }

    /// Replace values the renderer can't use with their defaults
    pub fn sanitized(mut self) -> Self {
        if self.page_size == 0 {
            warn!("page_size must be at least 1, using {}", default_page_size());
            self.page_size = default_page_size();
        }
        if self.max_display_width == 0 || self.max_display_height == 0 {
            warn!("max display size {}x{} is degenerate, using defaults",
                self.max_display_width, self.max_display_height);
            self.max_display_width = default_max_display_width();
            self.max_display_height = default_max_display_height();
        }
        if !self.stroke_width.is_finite() || self.stroke_width <= 0.0 {
            warn!("stroke_width {} is invalid, using {}", self.stroke_width, DEFAULT_STROKE_WIDTH);
            self.stroke_width = DEFAULT_STROKE_WIDTH;
        }
        self
    }

    /// Save settings to the YAML file while preserving comments
    pub fn save(&self, custom_path: Option<&str>) -> Result<(), String> {
        let path = Self::resolve_path(custom_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create settings directory: {}", e))?;
            }
        }

        // Existing files get in-place value updates so user comments survive
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(contents) => {
                    let updated = self.update_yaml_values(&contents);
                    fs::write(&path, updated)
                        .map_err(|e| format!("Failed to write settings file: {}", e))?;
                    info!("Saved settings to {:?} (comments preserved)", path);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to read existing settings file for comment preservation: {}", e);
                }
            }
        }

        let yaml = self.to_yaml_with_comments();
        fs::write(&path, yaml)
            .map_err(|e| format!("Failed to write settings file: {}", e))?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }

    fn update_yaml_values(&self, yaml_content: &str) -> String {
        let mut result = yaml_content.to_string();

        result = Self::replace_yaml_value(&result, "page_size", &self.page_size.to_string());
        result = Self::replace_yaml_value(&result, "max_display_width", &self.max_display_width.to_string());
        result = Self::replace_yaml_value(&result, "max_display_height", &self.max_display_height.to_string());
        result = Self::replace_yaml_value(&result, "stroke_width", &format!("{:?}", self.stroke_width));
        result = Self::replace_yaml_value(&result, "show_tooltips", &self.show_tooltips.to_string());

        result
    }

    /// Replace a YAML key's value while preserving the rest of the line
    fn replace_yaml_value(yaml: &str, key: &str, new_value: &str) -> String {
        let pattern = format!(r"(?m)^([ \t]*{}[ \t]*:[ \t]*)[^#\n]*?([ \t]*(?:#.*)?)$", regex::escape(key));
        let replacement = format!("${{1}}{}${{2}}", new_value);

        match regex::Regex::new(&pattern) {
            Ok(re) => re.replace_all(yaml, replacement.as_str()).to_string(),
            Err(e) => {
                warn!("Failed to create regex for key '{}': {}", key, e);
                yaml.to_string()
            }
        }
    }

    fn to_yaml_with_comments(&self) -> String {
        format!(
            r#"# detlens settings
# Values here override the built-in defaults.

# Number of batch items shown per page
page_size: {}

# Images are scaled down (never up) to fit inside this box, in pixels
max_display_width: {}
max_display_height: {}

# Outline thickness of detection boxes, in display pixels
stroke_width: {:?}

# Show "<class> <confidence>%" when hovering a box
show_tooltips: {}
"#,
            self.page_size,
            self.max_display_width,
            self.max_display_height,
            self.stroke_width,
            self.show_tooltips
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let settings = UserSettings::load(path.to_str());
        assert_eq!(settings, UserSettings::default());
        assert_eq!(settings.page_size, 12);
        assert_eq!(settings.stroke_width, 2.0);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "page_size: 4\nshow_tooltips: false\n").unwrap();

        let settings = UserSettings::load(path.to_str());
        assert_eq!(settings.page_size, 4);
        assert!(!settings.show_tooltips);
        assert_eq!(settings.max_display_width, 1024);
    }

    #[test]
    fn test_invalid_values_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "page_size: 0\nstroke_width: -1.0\nmax_display_width: 0\n").unwrap();

        let settings = UserSettings::load(path.to_str());
        assert_eq!(settings, UserSettings::default());
    }

    #[test]
    fn test_unparseable_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "page_size: [not, a, number]\n").unwrap();
        assert_eq!(UserSettings::load(path.to_str()), UserSettings::default());
    }

    #[test]
    fn test_save_new_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.yaml");
        let settings = UserSettings {
            page_size: 20,
            stroke_width: 3.5,
            ..UserSettings::default()
        };
        settings.save(path.to_str()).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# detlens settings"));
        assert_eq!(UserSettings::load(path.to_str()), settings);
    }

    #[test]
    fn test_save_preserves_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "# my notes\npage_size: 12  # a dozen\nshow_tooltips: true\n").unwrap();

        let settings = UserSettings {
            page_size: 6,
            show_tooltips: false,
            ..UserSettings::default()
        };
        settings.save(path.to_str()).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "# my notes\npage_size: 6  # a dozen\nshow_tooltips: false\n");
    }
}
