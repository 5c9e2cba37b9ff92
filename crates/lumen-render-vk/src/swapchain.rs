// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use lumen_render::RenderSize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::device::{LogicalDevice, QueueSharing};
use crate::error::{Result, VkContext, VkError};
use crate::surface::Surface;

/// Desired chain parameters. Format, colour space, image count and present
/// mode must be supported exactly; nothing is substituted.
#[derive(Clone, Debug)]
pub struct SwapchainConfig {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub usage: vk::ImageUsageFlags,
    pub sharing: QueueSharing,
    /// `None` keeps the surface's current transform.
    pub pre_transform: Option<vk::SurfaceTransformFlagsKHR>,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub clipped: bool,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            image_count: 3,
            present_mode: vk::PresentModeKHR::FIFO,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            sharing: QueueSharing::Exclusive,
            pre_transform: None,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            clipped: true,
        }
    }
}

/// Values actually used to build a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Negotiated {
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Surface extent, or the framebuffer size clamped to the surface limits
/// when the surface leaves it to the swapchain (`u32::MAX` sentinel).
pub(crate) fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub(crate) fn negotiate(
    cfg: &SwapchainConfig,
    caps: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    modes: &[vk::PresentModeKHR],
    framebuffer: RenderSize,
) -> Result<Negotiated> {
    if !formats
        .iter()
        .any(|f| f.format == cfg.format && f.color_space == cfg.color_space)
    {
        return Err(VkError::UnsupportedSwapchainConfig {
            what: "format",
            wanted: format!("{:?} / {:?}", cfg.format, cfg.color_space),
        });
    }

    // A max of 0 means "no upper bound".
    let max = if caps.max_image_count == 0 {
        u32::MAX
    } else {
        caps.max_image_count
    };
    if cfg.image_count < caps.min_image_count || cfg.image_count > max {
        return Err(VkError::UnsupportedSwapchainConfig {
            what: "image count",
            wanted: format!(
                "{} (surface allows {}..={})",
                cfg.image_count, caps.min_image_count, caps.max_image_count
            ),
        });
    }

    if !modes.contains(&cfg.present_mode) {
        return Err(VkError::UnsupportedSwapchainConfig {
            what: "present mode",
            wanted: format!("{:?}", cfg.present_mode),
        });
    }

    let pre_transform = match cfg.pre_transform {
        Some(t) if caps.supported_transforms.contains(t) => t,
        Some(t) => {
            return Err(VkError::UnsupportedSwapchainConfig {
                what: "pre-transform",
                wanted: format!("{t:?}"),
            })
        }
        None => caps.current_transform,
    };

    Ok(Negotiated {
        extent: resolve_extent(caps, framebuffer),
        image_count: cfg.image_count,
        pre_transform,
    })
}

/// One 2-D colour view per image. On failure, views created so far are
/// handed to `destroy` before the error is returned.
pub(crate) fn create_views<C, D>(
    images: &[vk::Image],
    mut create: C,
    mut destroy: D,
) -> Result<Vec<vk::ImageView>>
where
    C: FnMut(vk::Image) -> Result<vk::ImageView>,
    D: FnMut(vk::ImageView),
{
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        match create(image) {
            Ok(v) => views.push(v),
            Err(e) => {
                views.drain(..).for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(views)
}

/// Replace `slot` with a freshly built value, tearing the old one down
/// first. The slot is empty while `create` runs.
pub(crate) fn rebuild_in_place<S, D, C>(slot: &mut Option<S>, destroy: D, create: C) -> Result<&S>
where
    D: FnOnce(S),
    C: FnOnce() -> Result<S>,
{
    if let Some(old) = slot.take() {
        destroy(old);
    }
    Ok(slot.insert(create()?))
}

pub struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub config: SwapchainConfig,
}

/// Owns the presentation chain and rebuilds it in place on demand.
pub struct SwapchainManager {
    loader: swapchain::Device,
    state: Option<SwapchainState>,
    surface: Arc<Surface>,
    device: Arc<LogicalDevice>,
}

impl SwapchainManager {
    pub fn new(device: &Arc<LogicalDevice>, surface: &Arc<Surface>) -> Self {
        let loader = swapchain::Device::new(device.instance().raw(), device.raw());
        Self {
            loader,
            state: None,
            surface: Arc::clone(surface),
            device: Arc::clone(device),
        }
    }

    pub fn loader(&self) -> &swapchain::Device {
        &self.loader
    }

    pub fn state(&self) -> Option<&SwapchainState> {
        self.state.as_ref()
    }

    pub fn current_extent(&self) -> Option<vk::Extent2D> {
        self.state.as_ref().map(|s| s.extent)
    }

    pub fn create(&mut self, config: &SwapchainConfig, framebuffer: RenderSize) -> Result<&SwapchainState> {
        self.rebuild(config, framebuffer)
    }

    /// Destroys the current chain and its views, then builds a new one. The
    /// caller must make sure the device no longer uses the old images.
    pub fn recreate(
        &mut self,
        config: &SwapchainConfig,
        framebuffer: RenderSize,
    ) -> Result<&SwapchainState> {
        info!(
            "recreating swapchain for {}x{}",
            framebuffer.width, framebuffer.height
        );
        self.rebuild(config, framebuffer)
    }

    fn rebuild(&mut self, config: &SwapchainConfig, framebuffer: RenderSize) -> Result<&SwapchainState> {
        let device = &self.device;
        let loader = &self.loader;
        let surface = &self.surface;
        rebuild_in_place(
            &mut self.state,
            |old| destroy_state(device, loader, old),
            || build_state(device, loader, surface, config, framebuffer),
        )
    }
}

fn destroy_state(device: &LogicalDevice, loader: &swapchain::Device, state: SwapchainState) {
    unsafe {
        for &v in &state.views {
            device.destroy_image_view(v, None);
        }
        loader.destroy_swapchain(state.handle, None);
    }
    debug!("destroyed swapchain with {} views", state.views.len());
}

fn build_state(
    device: &LogicalDevice,
    loader: &swapchain::Device,
    surface: &Surface,
    config: &SwapchainConfig,
    framebuffer: RenderSize,
) -> Result<SwapchainState> {
    let phys = device.physical();
    let caps = surface.capabilities(phys)?;
    let formats = surface.formats(phys)?;
    let modes = surface.present_modes(phys)?;
    let n = negotiate(config, &caps, &formats, &modes, framebuffer)?;

    let families = config.sharing.families();
    let info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface: surface.raw(),
        min_image_count: n.image_count,
        image_format: config.format,
        image_color_space: config.color_space,
        image_extent: n.extent,
        image_array_layers: 1,
        image_usage: config.usage,
        image_sharing_mode: config.sharing.mode(),
        queue_family_index_count: families.len() as u32,
        p_queue_family_indices: families.as_ptr(),
        pre_transform: n.pre_transform,
        composite_alpha: config.composite_alpha,
        present_mode: config.present_mode,
        clipped: if config.clipped { vk::TRUE } else { vk::FALSE },
        old_swapchain: vk::SwapchainKHR::null(),
        ..Default::default()
    };
    let handle =
        unsafe { loader.create_swapchain(&info, None) }.vk_context("vkCreateSwapchainKHR")?;

    let images = match unsafe { loader.get_swapchain_images(handle) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { loader.destroy_swapchain(handle, None) };
            return Err(VkError::Vulkan {
                call: "vkGetSwapchainImagesKHR",
                result: e,
            });
        }
    };

    let views = create_views(
        &images,
        |image| {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: config.format,
                subresource_range: color_range(),
                ..Default::default()
            };
            unsafe { device.create_image_view(&iv_info, None) }.vk_context("vkCreateImageView")
        },
        |view| unsafe { device.destroy_image_view(view, None) },
    );
    let views = match views {
        Ok(v) => v,
        Err(e) => {
            unsafe { loader.destroy_swapchain(handle, None) };
            return Err(e);
        }
    };

    info!(
        "swapchain: {:?} / {:?}, {:?}, extent {}x{}, {} images",
        config.format,
        config.color_space,
        config.present_mode,
        n.extent.width,
        n.extent.height,
        images.len()
    );

    Ok(SwapchainState {
        handle,
        images,
        views,
        format: config.format,
        extent: n.extent,
        config: config.clone(),
    })
}

pub(crate) fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            destroy_state(&self.device, &self.loader, state);
        }
    }
}
