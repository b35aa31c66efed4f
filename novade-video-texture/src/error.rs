//! Defines the error type and `Result` alias for the video texture pipeline.
//!
//! Setup failures (missing capabilities, no compatible memory type, failed
//! resource creation) and runtime failures (swapchain out of date, capture
//! dequeue errors) are both surfaced as [`RendererError`]. Protocol
//! violations are not represented here: they panic at the call site.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum RendererError {
    /// An error originating directly from a Vulkan API call.
    #[error("Vulkan API error: {0}")]
    VkResult(vk::Result),

    /// The Vulkan loader library could not be found or loaded.
    #[error("Failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Failed to create resource '{resource_type}': {message}")]
    ResourceCreationError {
        resource_type: String,
        message: String,
    },

    #[error("No suitable physical device found")]
    NoSuitablePhysicalDevice,

    #[error("Required queue family not found: {0}")]
    QueueFamilyNotFound(String),

    /// No memory type satisfies both the resource's type filter and the requested properties.
    #[error("No compatible memory type (type filter {type_filter:#b}, properties {properties:?})")]
    NoCompatibleMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("Vulkan surface lost")]
    SurfaceLost,

    /// Swapchain recreation is not supported, so this is fatal for the presentation loop.
    #[error("Vulkan swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("Failed to load shader {path:?}: {source}")]
    ShaderLoadingError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {path:?}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Capture device {device:?}: {operation} failed: {source}")]
    Capture {
        operation: &'static str,
        device: PathBuf,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Capture device {device:?} does not support {missing}")]
    CaptureCapability { device: PathBuf, missing: String },

    /// A frame's byte length does not match what its format requires.
    #[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    /// The driver filled a buffer with the wrong byte count. The buffer is
    /// already back in the driver's queue.
    #[error("Short capture frame {sequence}: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize, sequence: u64 },

    /// A single-shot frame source was asked for a second frame.
    #[error("Frame source has no more frames")]
    SourceExhausted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Window error: {0}")]
    Window(String),

    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

impl From<vk::Result> for RendererError {
    fn from(err: vk::Result) -> Self {
        match err {
            vk::Result::ERROR_OUT_OF_DATE_KHR => RendererError::SwapchainOutOfDate,
            vk::Result::ERROR_SURFACE_LOST_KHR => RendererError::SurfaceLost,
            _ => RendererError::VkResult(err),
        }
    }
}

impl RendererError {
    pub(crate) fn creation(resource_type: &str, err: impl std::fmt::Display) -> Self {
        RendererError::ResourceCreationError {
            resource_type: resource_type.to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = RendererError> = std::result::Result<T, E>;
