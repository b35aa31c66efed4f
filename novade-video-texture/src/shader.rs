//! SPIR-V shader modules loaded from disk.

use ash::{util::read_spv, vk, Device};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{RendererError, Result};

/// Reads a SPIR-V binary into 32-bit words.
///
/// Fails if the file is missing or its length is not a multiple of four.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let shader_error = |source| RendererError::ShaderLoadingError {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(shader_error)?;
    read_spv(&mut file).map_err(shader_error)
}

/// A shader module destroyed on drop. Modules are only needed until the
/// pipeline using them has been created.
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    pub fn from_file(device: &Arc<Device>, path: &Path) -> Result<Self> {
        let code = read_spirv(path)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.create_shader_module(&create_info, None) }
            .map_err(|e| RendererError::creation("ShaderModule", e))?;
        debug!("Loaded shader module from {:?} ({} words)", path, code.len());
        Ok(Self {
            device: Arc::clone(device),
            module,
        })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}
