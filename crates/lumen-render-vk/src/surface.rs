// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use crate::error::{Result, VkContext};
use crate::instance::GpuInstance;

/// A `VkSurfaceKHR` bound to one window. Outlives every swapchain built on it.
pub struct Surface {
    loader: surface::Instance,
    raw: vk::SurfaceKHR,
    _instance: Arc<GpuInstance>,
}

impl Surface {
    pub fn new(
        instance: &Arc<GpuInstance>,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let loader = surface::Instance::new(instance.entry(), instance.raw());
        // SAFETY: the window outlives the engine that owns this surface.
        let raw = unsafe {
            ash_window::create_surface(instance.entry(), instance.raw(), dh, wh, None)
        }
        .vk_context("vkCreateSurfaceKHR")?;

        Ok(Self {
            loader,
            raw,
            _instance: Arc::clone(instance),
        })
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub fn supports_present(&self, phys: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(phys, family, self.raw)
        }
        .vk_context("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    pub fn capabilities(&self, phys: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(phys, self.raw)
        }
        .vk_context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    pub fn formats(&self, phys: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.loader.get_physical_device_surface_formats(phys, self.raw) }
            .vk_context("vkGetPhysicalDeviceSurfaceFormatsKHR")
    }

    pub fn present_modes(&self, phys: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(phys, self.raw)
        }
        .vk_context("vkGetPhysicalDeviceSurfacePresentModesKHR")
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.raw, None) };
    }
}
