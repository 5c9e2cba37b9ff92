// SPDX-License-Identifier: CEPL-1.0
use ash::util::read_spv;
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::device::LogicalDevice;
use crate::error::{Result, VkContext, VkError};

pub struct ShaderLoader;

impl ShaderLoader {
    /// Read a SPIR-V file into words. Contents are not interpreted beyond the
    /// size and magic-number checks done by `read_spv`.
    pub fn load_bytecode(path: impl AsRef<Path>) -> Result<Vec<u32>> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| VkError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let words = read_spv(&mut Cursor::new(&bytes[..])).map_err(|source| {
            VkError::InvalidSpirv {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!("loaded {} ({} words)", path.display(), words.len());
        Ok(words)
    }
}

/// Only needed until the pipeline that uses it has been created.
pub struct ShaderModule {
    raw: vk::ShaderModule,
    device: Arc<LogicalDevice>,
}

impl ShaderModule {
    pub fn new(device: &Arc<LogicalDevice>, code: &[u32]) -> Result<Self> {
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: code.as_ptr(),
            code_size: std::mem::size_of_val(code),
            ..Default::default()
        };
        let raw = unsafe { device.create_shader_module(&info, None) }
            .vk_context("vkCreateShaderModule")?;
        Ok(Self {
            raw,
            device: Arc::clone(device),
        })
    }

    pub fn raw(&self) -> vk::ShaderModule {
        self.raw
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.raw, None) };
    }
}
