//! Streams frames from a V4L2 capture device, or a single decoded image, into
//! a sampled Vulkan texture and presents it on a full-screen quad.
//!
//! The core is the upload path ([`staging`], [`layout`], [`upload`]) and the
//! frame protocol in [`presentation`]. Everything GPU-side hangs off one
//! [`GraphicsContext`] that is passed by reference.

pub mod config;
pub mod context;
pub mod convert;
pub mod descriptor;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod logging;
pub mod memory;
pub mod pipeline;
pub mod presentation;
pub mod recorder;
pub mod render_pass;
pub mod renderer;
pub mod shader;
pub mod source;
pub mod staging;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod upload;

pub use config::PlayerConfig;
pub use context::{ContextOptions, GraphicsContext};
pub use error::{RendererError, Result};
pub use layout::ImageLayoutState;
pub use presentation::{PresentBackend, PresentationLoop, StopSignal};
pub use renderer::VulkanPresenter;
pub use source::{FrameFormat, FrameSource, PixelFormat};
pub use staging::{stage, StagingBuffer};
pub use surface::PresentationSurface;
pub use texture::GpuImage;
