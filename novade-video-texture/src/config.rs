//! Configuration for the video texture player.
//!
//! The configuration is a TOML document with four tables: `[source]`,
//! `[window]`, `[renderer]` and `[logging]`. Every field has a default, so a
//! missing file or an empty table yields a working capture setup for
//! `/dev/video0`. Unknown fields are rejected.
//!
//! ```toml
//! [source]
//! kind = "image"
//! path = "textures/lee.jpg"
//!
//! [logging]
//! level = "debug"
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::source::PixelFormat;

/// Default config file looked up by the binary when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "video-texture.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

mod defaults {
    use super::*;

    pub fn device() -> PathBuf {
        PathBuf::from("/dev/video0")
    }
    pub fn capture_width() -> u32 {
        640
    }
    pub fn capture_height() -> u32 {
        480
    }
    pub fn pixel_format() -> PixelFormat {
        PixelFormat::Rgb24
    }
    pub fn frame_rate() -> u32 {
        30
    }
    pub fn buffer_count() -> u32 {
        4
    }
    pub fn window_title() -> String {
        "Video Player".to_string()
    }
    pub fn vertex_shader() -> PathBuf {
        PathBuf::from("shaders/vert.spv")
    }
    pub fn fragment_shader() -> PathBuf {
        PathBuf::from("shaders/frag.spv")
    }
    pub fn entry_point() -> String {
        "main".to_string()
    }
    pub fn log_level() -> String {
        "info".to_string()
    }
    pub fn log_format() -> String {
        "text".to_string()
    }
}

/// Settings for a V4L2 capture device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    #[serde(default = "defaults::device")]
    pub device: PathBuf,
    #[serde(default = "defaults::capture_width")]
    pub width: u32,
    #[serde(default = "defaults::capture_height")]
    pub height: u32,
    #[serde(default = "defaults::pixel_format")]
    pub pixel_format: PixelFormat,
    #[serde(default = "defaults::frame_rate")]
    pub frame_rate: u32,
    /// Number of kernel buffers in the capture ring.
    #[serde(default = "defaults::buffer_count")]
    pub buffer_count: u32,
    /// When set, every captured frame is appended verbatim to this file.
    #[serde(default)]
    pub record_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: defaults::device(),
            width: defaults::capture_width(),
            height: defaults::capture_height(),
            pixel_format: defaults::pixel_format(),
            frame_rate: defaults::frame_rate(),
            buffer_count: defaults::buffer_count(),
            record_path: None,
        }
    }
}

/// A single image file decoded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    pub path: PathBuf,
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Capture(CaptureConfig),
    Image(ImageConfig),
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Capture(CaptureConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    #[serde(default = "defaults::window_title")]
    pub title: String,
    #[serde(default = "defaults::capture_width")]
    pub width: u32,
    #[serde(default = "defaults::capture_height")]
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: defaults::window_title(),
            width: defaults::capture_width(),
            height: defaults::capture_height(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RendererConfig {
    /// Enables `VK_LAYER_KHRONOS_validation` and the debug messenger.
    #[serde(default)]
    pub enable_validation: bool,
    #[serde(default = "defaults::vertex_shader")]
    pub vertex_shader: PathBuf,
    #[serde(default = "defaults::fragment_shader")]
    pub fragment_shader: PathBuf,
    #[serde(default = "defaults::entry_point")]
    pub entry_point: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable_validation: false,
            vertex_shader: defaults::vertex_shader(),
            fragment_shader: defaults::fragment_shader(),
            entry_point: defaults::entry_point(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Valid values (case-insensitive): "trace", "debug", "info", "warn", "error".
    #[serde(default = "defaults::log_level")]
    pub level: String,
    /// Valid values (case-insensitive): "text", "json".
    #[serde(default = "defaults::log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            format: defaults::log_format(),
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PlayerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PlayerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Configuration file {:?} not found, using defaults.", path);
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(source) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let SourceConfig::Capture(capture) = &self.source {
            if capture.width == 0 || capture.height == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "capture size must be non-zero, got {}x{}",
                    capture.width, capture.height
                )));
            }
            if !(2..=4).contains(&capture.buffer_count) {
                return Err(ConfigError::ValidationError(format!(
                    "buffer_count must be between 2 and 4, got {}",
                    capture.buffer_count
                )));
            }
            if capture.frame_rate == 0 {
                return Err(ConfigError::ValidationError("frame_rate must be positive".to_string()));
            }
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::ValidationError(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.renderer.entry_point.is_empty() {
            return Err(ConfigError::ValidationError("shader entry point must not be empty".to_string()));
        }
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!("invalid log level: {}", other)));
            }
        }
        match self.logging.format.to_lowercase().as_str() {
            "text" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!("invalid log format: {}", other)));
            }
        }
        Ok(())
    }
}
