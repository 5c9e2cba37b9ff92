// SPDX-License-Identifier: CEPL-1.0
use ash::ext::debug_utils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::capability::ApiVersion;
use crate::error::{Result, VkContext, VkError};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub app_name: String,
    pub api_version: ApiVersion,
    pub validation: bool,
    /// Added on top of the window-system extensions.
    pub extra_extensions: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: "lumen".to_owned(),
            api_version: ApiVersion::V1_3,
            validation: cfg!(debug_assertions),
            extra_extensions: Vec::new(),
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the loader hands us a valid callback-data pointer for the
    // duration of the call.
    let p_message = match unsafe { data.as_ref() } {
        Some(d) if !d.p_message.is_null() => d.p_message,
        _ => return vk::FALSE,
    };
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        error!("[vulkan {types:?}] {msg}");
    } else if severity.contains(S::WARNING) {
        warn!("[vulkan {types:?}] {msg}");
    } else if severity.contains(S::INFO) {
        debug!("[vulkan {types:?}] {msg}");
    } else {
        trace!("[vulkan {types:?}] {msg}");
    }
    vk::FALSE
}

/// Names in `required` that `available` does not list.
pub(crate) fn missing_names<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|r| !available.contains(r))
        .collect()
}

/// Loader entry, instance and optional validation messenger.
///
/// The only process-wide GPU context; it is passed down explicitly and every
/// child object keeps an `Arc` to it so it is destroyed last.
pub struct GpuInstance {
    entry: Entry,
    instance: ash::Instance,
    api_version: ApiVersion,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl GpuInstance {
    pub fn new(cfg: &InstanceConfig, display: RawDisplayHandle) -> Result<Arc<Self>> {
        // SAFETY: the loaded library outlives every handle derived from it
        // because `entry` is stored alongside the instance.
        let entry = unsafe { Entry::load()? };

        let mut ext_ptrs: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display)
                .vk_context("vkEnumerateInstanceExtensionProperties(window system)")?
                .to_vec();
        let extra: Vec<CString> = cfg
            .extra_extensions
            .iter()
            .map(|n| CString::new(n.as_str()).map_err(|_| VkError::InvalidName(n.clone())))
            .collect::<Result<_>>()?;
        ext_ptrs.extend(extra.iter().map(|c| c.as_ptr()));
        if cfg.validation {
            ext_ptrs.push(debug_utils::NAME.as_ptr());
        }

        let available_exts = unsafe { entry.enumerate_instance_extension_properties(None) }
            .vk_context("vkEnumerateInstanceExtensionProperties")?;
        let available_ext_names: Vec<&CStr> = available_exts
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok())
            .collect();
        // SAFETY: every pointer in `ext_ptrs` refers to a NUL-terminated
        // string that is alive for this whole function.
        let wanted_exts: Vec<&CStr> = ext_ptrs
            .iter()
            .map(|&p| unsafe { CStr::from_ptr(p) })
            .collect();
        if let Some(name) = missing_names(&wanted_exts, &available_ext_names).first() {
            return Err(VkError::MissingInstanceSupport {
                kind: "extension",
                name: name.to_string_lossy().into_owned(),
            });
        }

        let layers: Vec<*const c_char> = if cfg.validation {
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .vk_context("vkEnumerateInstanceLayerProperties")?;
            let names: Vec<&CStr> = available
                .iter()
                .filter_map(|l| l.layer_name_as_c_str().ok())
                .collect();
            if !missing_names(&[VALIDATION_LAYER], &names).is_empty() {
                return Err(VkError::MissingInstanceSupport {
                    kind: "layer",
                    name: VALIDATION_LAYER.to_string_lossy().into_owned(),
                });
            }
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let app = CString::new(cfg.app_name.as_str())
            .map_err(|_| VkError::InvalidName(cfg.app_name.clone()))?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app.as_ptr(),
            application_version: 0,
            p_engine_name: c"lumen".as_ptr(),
            engine_version: 0,
            api_version: cfg.api_version.to_raw(),
            ..Default::default()
        };
        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            ..Default::default()
        };
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .vk_context("vkCreateInstance")?;

        let mut this = Self {
            entry,
            instance,
            api_version: cfg.api_version,
            debug: None,
        };
        if cfg.validation {
            this.debug = Some(this.create_debug_messenger()?);
        }

        info!(
            "vulkan instance: api {} validation={} extensions={}",
            cfg.api_version,
            cfg.validation,
            ext_ptrs.len()
        );
        Ok(Arc::new(this))
    }

    fn create_debug_messenger(
        &self,
    ) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let loader = debug_utils::Instance::new(&self.entry, &self.instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .vk_context("vkCreateDebugUtilsMessengerEXT")?;
        Ok((loader, messenger))
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }
}

impl Drop for GpuInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_reports_only_absent_entries() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xcb_surface"];
        let required = [c"VK_KHR_surface", c"VK_EXT_debug_utils"];
        assert_eq!(
            missing_names(&required, &available),
            vec![c"VK_EXT_debug_utils"]
        );
        assert!(missing_names(&[], &available).is_empty());
    }
}
