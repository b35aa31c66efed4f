//! The presentation surface collaborator.
//!
//! [`PresentationSurface`] is what [`GraphicsContext`](crate::context::GraphicsContext)
//! needs from a window. With the `window` feature, [`WinitSurface`] provides
//! it on top of winit and also serves as the loop's stop signal.

use ash::vk;
use std::os::raw::c_char;

use crate::error::Result;

pub trait PresentationSurface {
    /// Instance extensions needed to create a surface for this window.
    fn required_extensions(&self) -> Result<Vec<*const c_char>>;

    /// Creates a `VkSurfaceKHR` for the window. The caller destroys it.
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR>;

    /// Current drawable size in pixels.
    fn extent(&self) -> vk::Extent2D;
}

#[cfg(feature = "window")]
pub use window::WinitSurface;

#[cfg(feature = "window")]
mod window {
    use super::*;
    use crate::config::WindowConfig;
    use crate::error::RendererError;
    use crate::presentation::StopSignal;
    use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
    use tracing::info;
    use winit::dpi::LogicalSize;
    use winit::event::{Event, WindowEvent};
    use winit::event_loop::{ControlFlow, EventLoop};
    use winit::platform::run_return::EventLoopExtRunReturn;
    use winit::window::{Window, WindowBuilder};

    pub struct WinitSurface {
        event_loop: EventLoop<()>,
        window: Window,
        close_requested: bool,
    }

    impl WinitSurface {
        pub fn new(config: &WindowConfig) -> Result<Self> {
            let event_loop = EventLoop::new();
            let window = WindowBuilder::new()
                .with_title(config.title.as_str())
                .with_inner_size(LogicalSize::new(config.width as f64, config.height as f64))
                .with_resizable(false)
                .build(&event_loop)
                .map_err(|e| RendererError::Window(e.to_string()))?;
            info!("Window '{}' created ({}x{})", config.title, config.width, config.height);
            Ok(Self {
                event_loop,
                window,
                close_requested: false,
            })
        }

        /// Dispatches pending window events without blocking.
        fn pump_events(&mut self) {
            let close_requested = &mut self.close_requested;
            self.event_loop.run_return(|event, _, control_flow| {
                *control_flow = ControlFlow::Poll;
                match event {
                    Event::WindowEvent {
                        event: WindowEvent::CloseRequested,
                        ..
                    } => {
                        info!("Window close requested");
                        *close_requested = true;
                        *control_flow = ControlFlow::Exit;
                    }
                    Event::MainEventsCleared => *control_flow = ControlFlow::Exit,
                    _ => {}
                }
            });
        }
    }

    impl PresentationSurface for WinitSurface {
        fn required_extensions(&self) -> Result<Vec<*const c_char>> {
            let extensions = ash_window::enumerate_required_extensions(self.window.raw_display_handle())?;
            Ok(extensions.to_vec())
        }

        fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
            let surface = unsafe {
                ash_window::create_surface(
                    entry,
                    instance,
                    self.window.raw_display_handle(),
                    self.window.raw_window_handle(),
                    None,
                )?
            };
            Ok(surface)
        }

        fn extent(&self) -> vk::Extent2D {
            let size = self.window.inner_size();
            vk::Extent2D {
                width: size.width,
                height: size.height,
            }
        }
    }

    impl StopSignal for WinitSurface {
        fn stop_requested(&mut self) -> bool {
            if !self.close_requested {
                self.pump_events();
            }
            self.close_requested
        }
    }
}
