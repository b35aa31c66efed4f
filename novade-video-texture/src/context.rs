//! The graphics context: every device-level Vulkan handle the pipeline needs.
//!
//! One [`GraphicsContext`] is created at startup and handed by reference to
//! every operation that touches the GPU. It can be created with or without a
//! presentation surface; the headless form has no present queue and is what
//! the GPU tests use.

use ash::extensions::{ext::DebugUtils, khr::Surface};
use ash::{vk, Device, Entry, Instance};
use std::borrow::Cow;
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

use crate::error::{RendererError, Result};
use crate::surface::PresentationSurface;

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Maps a validation-layer severity onto the tracing level it is logged at.
fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => Level::ERROR,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => Level::WARN,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => Level::INFO,
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => Level::DEBUG,
        _ => Level::TRACE,
    }
}

unsafe fn lossy<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let data = &*p_callback_data;
    let line = format!(
        "{:?} {} ({}): {}",
        message_type,
        lossy(data.p_message_id_name),
        data.message_id_number,
        lossy(data.p_message)
    );

    match severity_level(message_severity) {
        Level::ERROR => tracing::error!(target: "vulkan", "{}", line),
        Level::WARN => tracing::warn!(target: "vulkan", "{}", line),
        Level::INFO => tracing::info!(target: "vulkan", "{}", line),
        Level::DEBUG => tracing::debug!(target: "vulkan", "{}", line),
        _ => tracing::trace!(target: "vulkan", "{:?} {}", message_severity, line),
    }
    vk::FALSE
}

fn graphics_family_of(indices: &QueueFamilyIndices) -> Result<u32> {
    indices
        .graphics_family
        .ok_or_else(|| RendererError::QueueFamilyNotFound("graphics".to_string()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    fn is_complete(&self, needs_present: bool) -> bool {
        self.graphics_family.is_some() && (!needs_present || self.present_family.is_some())
    }
}

/// Options for [`GraphicsContext::new`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub application_name: String,
    pub enable_validation: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            application_name: "novade-video-texture".to_string(),
            enable_validation: false,
        }
    }
}

struct SurfaceBinding {
    loader: Surface,
    surface: vk::SurfaceKHR,
}

/// Instance-level handles. Dropping destroys the surface, the debug
/// messenger and the instance, in that order, so a constructor that fails
/// after `create_instance` leaks nothing.
struct InstanceLevel {
    surface: Option<SurfaceBinding>,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    instance: Arc<Instance>,
    entry: Entry,
}

impl Drop for InstanceLevel {
    fn drop(&mut self) {
        unsafe {
            if let Some(binding) = self.surface.take() {
                binding.loader.destroy_surface(binding.surface, None);
                info!("Vulkan surface destroyed.");
            }
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            info!("Destroying Vulkan instance...");
            self.instance.destroy_instance(None);
        }
    }
}

pub struct GraphicsContext {
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_family_indices: QueueFamilyIndices,
    device: Arc<Device>,
    graphics_queue: vk::Queue,
    present_queue: Option<vk::Queue>,
    command_pool: vk::CommandPool,
    // Dropped after `GraphicsContext::drop` has destroyed the device.
    instance_level: InstanceLevel,
}

impl GraphicsContext {
    /// Creates an instance, an optional surface, and a logical device able to
    /// render (and, with a surface, present).
    pub fn new(options: &ContextOptions, presentation: Option<&dyn PresentationSurface>) -> Result<Self> {
        let entry = unsafe { Entry::load()? };

        let app_name = CString::new(options.application_name.as_str())
            .map_err(|e| RendererError::creation("Instance", e))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&app_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut instance_extensions: Vec<*const c_char> = match presentation {
            Some(surface) => surface.required_extensions()?,
            None => Vec::new(),
        };

        let enable_validation = options.enable_validation && Self::validation_layer_available(&entry);
        if options.enable_validation && !enable_validation {
            warn!("Validation requested but {:?} is not installed; continuing without it.", VALIDATION_LAYER);
        }
        if enable_validation {
            instance_extensions.push(DebugUtils::name().as_ptr());
        }
        let enabled_layer_names: Vec<*const c_char> = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let mut debug_messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));

        let mut instance_create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&instance_extensions)
            .enabled_layer_names(&enabled_layer_names);
        if enable_validation {
            instance_create_info = instance_create_info.push_next(&mut debug_messenger_info);
        }

        let instance = Arc::new(
            unsafe { entry.create_instance(&instance_create_info, None) }
                .map_err(|e| RendererError::creation("Instance", e))?,
        );
        info!("Vulkan instance created successfully.");
        let mut instance_level = InstanceLevel {
            surface: None,
            debug_utils: None,
            instance,
            entry,
        };

        if enable_validation {
            let loader = DebugUtils::new(&instance_level.entry, &instance_level.instance);
            let messenger = unsafe { loader.create_debug_utils_messenger(&debug_messenger_info, None)? };
            info!("Vulkan debug messenger created successfully.");
            instance_level.debug_utils = Some((loader, messenger));
        }

        if let Some(presentation) = presentation {
            let loader = Surface::new(&instance_level.entry, &instance_level.instance);
            let surface = presentation.create_surface(&instance_level.entry, &instance_level.instance)?;
            info!("Vulkan surface created successfully.");
            instance_level.surface = Some(SurfaceBinding { loader, surface });
        }

        let instance = &instance_level.instance;
        let (physical_device, queue_family_indices) =
            Self::select_physical_device(instance, instance_level.surface.as_ref())?;
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let (device, graphics_queue, present_queue) = Self::create_logical_device(
            instance,
            physical_device,
            &queue_family_indices,
            instance_level.surface.is_some(),
        )?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(graphics_family_of(&queue_family_indices)?);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(RendererError::creation("CommandPool", e));
            }
        };
        debug!("Command pool created for queue family {}.", pool_info.queue_family_index);

        Ok(Self {
            instance_level,
            physical_device,
            memory_properties,
            queue_family_indices,
            device: Arc::new(device),
            graphics_queue,
            present_queue,
            command_pool,
        })
    }

    /// Creates a context without a surface. Only the graphics queue is available.
    pub fn new_headless(options: &ContextOptions) -> Result<Self> {
        Self::new(options, None)
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers
                .iter()
                .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER),
            Err(e) => {
                warn!("Failed to query instance layers: {}", e);
                false
            }
        }
    }

    fn select_physical_device(
        instance: &Instance,
        surface: Option<&SurfaceBinding>,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let physical_devices = unsafe { instance.enumerate_physical_devices()? };
        info!("Found {} physical devices.", physical_devices.len());

        let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilyIndices)> = None;

        for pdevice in physical_devices {
            let properties = unsafe { instance.get_physical_device_properties(pdevice) };
            let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
            debug!("Evaluating device: {}", device_name);

            let queue_families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
            let mut indices = QueueFamilyIndices::default();

            for (i, queue_family) in queue_families.iter().enumerate() {
                let i = i as u32;
                if indices.graphics_family.is_none() && queue_family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                    indices.graphics_family = Some(i);
                }
                if let Some(binding) = surface {
                    let supported = unsafe {
                        binding
                            .loader
                            .get_physical_device_surface_support(pdevice, i, binding.surface)?
                    };
                    if supported && indices.present_family.is_none() {
                        indices.present_family = Some(i);
                    }
                }
                if indices.is_complete(surface.is_some()) {
                    break;
                }
            }

            if !indices.is_complete(surface.is_some()) {
                info!(
                    "Device {} does not have all required queue families. Graphics: {:?}, Present: {:?}",
                    device_name, indices.graphics_family, indices.present_family
                );
                continue;
            }

            if surface.is_some() && !Self::supports_swapchain(instance, pdevice)? {
                info!("Device {} does not support {:?}", device_name, ash::extensions::khr::Swapchain::name());
                continue;
            }

            let score = match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
                _ => 1,
            };
            if best.as_ref().map_or(true, |(best_score, _, _)| score > *best_score) {
                best = Some((score, pdevice, indices));
            }
        }

        let (_, pdevice, indices) = best.ok_or(RendererError::NoSuitablePhysicalDevice)?;
        let selected = unsafe { instance.get_physical_device_properties(pdevice) };
        info!(
            "Selected physical device: {} (Graphics: {:?}, Present: {:?})",
            unsafe { CStr::from_ptr(selected.device_name.as_ptr()) }.to_string_lossy(),
            indices.graphics_family,
            indices.present_family
        );
        Ok((pdevice, indices))
    }

    fn supports_swapchain(instance: &Instance, pdevice: vk::PhysicalDevice) -> Result<bool> {
        let available = unsafe { instance.enumerate_device_extension_properties(pdevice)? };
        let required = ash::extensions::khr::Swapchain::name();
        Ok(available
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == required))
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        indices: &QueueFamilyIndices,
        with_swapchain: bool,
    ) -> Result<(Device, vk::Queue, Option<vk::Queue>)> {
        let graphics_family = graphics_family_of(indices)?;

        let mut unique_queue_families = HashSet::new();
        unique_queue_families.insert(graphics_family);
        if let Some(present_family) = indices.present_family {
            unique_queue_families.insert(present_family);
        }

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_queue_families
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let device_extensions: Vec<*const c_char> = if with_swapchain {
            vec![ash::extensions::khr::Swapchain::name().as_ptr()]
        } else {
            Vec::new()
        };
        let features = vk::PhysicalDeviceFeatures::default();

        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_features(&features)
            .enabled_extension_names(&device_extensions);

        let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
            .map_err(|e| RendererError::creation("Device", e))?;
        info!("Logical device created successfully.");

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = indices
            .present_family
            .map(|family| unsafe { device.get_device_queue(family, 0) });
        Ok((device, graphics_queue, present_queue))
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance_level.instance
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn queue_family_indices(&self) -> &QueueFamilyIndices {
        &self.queue_family_indices
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> Option<vk::Queue> {
        self.present_queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// The surface loader and handle, when the context was created with a surface.
    pub fn surface(&self) -> Option<(&Surface, vk::SurfaceKHR)> {
        self.instance_level
            .surface
            .as_ref()
            .map(|binding| (&binding.loader, binding.surface))
    }

    /// Blocks until the device has finished all submitted work.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device_wait_idle failed during teardown: {}", e);
            }
            self.device.destroy_command_pool(self.command_pool, None);

            info!("Destroying Vulkan logical device...");
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_family_completeness_depends_on_presentation() {
        let graphics_only = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(graphics_only.is_complete(false));
        assert!(!graphics_only.is_complete(true));
        assert!(!QueueFamilyIndices::default().is_complete(false));
    }

    #[test]
    fn validation_severities_map_to_log_levels() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;
        assert_eq!(severity_level(Severity::ERROR), Level::ERROR);
        assert_eq!(severity_level(Severity::WARNING), Level::WARN);
        assert_eq!(severity_level(Severity::INFO), Level::INFO);
        assert_eq!(severity_level(Severity::VERBOSE), Level::DEBUG);
        assert_eq!(severity_level(Severity::ERROR | Severity::WARNING), Level::TRACE);
    }

    #[test]
    fn failed_creation_can_be_retried() {
        crate::logging::init_minimal_logging();
        let first = GraphicsContext::new_headless(&ContextOptions::default()).map(drop);
        for _ in 0..3 {
            let again = GraphicsContext::new_headless(&ContextOptions::default()).map(drop);
            assert_eq!(again.is_ok(), first.is_ok());
            if let (Err(a), Err(b)) = (&again, &first) {
                assert_eq!(std::mem::discriminant(a), std::mem::discriminant(b));
            }
        }
    }

    #[test]
    fn headless_context_creation_and_drop() {
        crate::logging::init_minimal_logging();
        match GraphicsContext::new_headless(&ContextOptions::default()) {
            Ok(context) => {
                assert!(context.present_queue().is_none());
                assert!(context.surface().is_none());
                info!("Headless GraphicsContext created successfully for test.");
            }
            Err(e) => {
                warn!("Failed to create GraphicsContext in test (expected without a Vulkan device): {:?}", e);
            }
        }
    }
}
