// SPDX-License-Identifier: CEPL-1.0
//! Wires instance, device, swapchain, pipeline and the frame loop together.

use ash::vk;
use lumen_render::PresentationWindow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::backend::{BackendParts, Geometry, VkFrameBackend};
use crate::buffer::ResourceUploader;
use crate::capability::{
    ApiVersion, CapabilityRequirement, FeatureBundle, QueueCapability, QueueRequirement,
};
use crate::device::{LogicalDevice, LogicalDeviceBuilder, QueueSharing};
use crate::error::Result;
use crate::features::VULKAN_13;
use crate::instance::{GpuInstance, InstanceConfig};
use crate::pipeline::{GraphicsPipeline, PipelineDesc, RasterState, VertexLayout};
use crate::scheduler::FrameScheduler;
use crate::selector::DeviceSelector;
use crate::shader::ShaderLoader;
use crate::surface::Surface;
use crate::swapchain::{SwapchainConfig, SwapchainManager};
use crate::sync::{slot_count, FrameSlots};
use crate::uniforms::{UniformRing, UniformSource};

pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub instance: InstanceConfig,
    /// Caller requirements; the engine adds what it needs on top.
    pub requirement: CapabilityRequirement,
    pub swapchain: SwapchainConfig,
    pub frames_in_flight: usize,
    pub fence_timeout: Duration,
    pub clear_color: [f32; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance: InstanceConfig::default(),
            requirement: CapabilityRequirement::default(),
            swapchain: SwapchainConfig::default(),
            frames_in_flight: 2,
            fence_timeout: Duration::from_secs(10),
            clear_color: [0.02, 0.02, 0.04, 1.0],
        }
    }
}

/// What gets drawn: one pipeline, one vertex buffer, optional indices and a
/// per-frame uniform block.
pub struct Scene<'a> {
    pub vertex_shader: &'a Path,
    pub fragment_shader: &'a Path,
    pub vertex_layout: VertexLayout,
    pub raster: RasterState,
    pub vertices: &'a [u8],
    /// Empty means a non-indexed draw.
    pub indices: &'a [u32],
    pub uniform_size: vk::DeviceSize,
    pub uniform_stages: vk::ShaderStageFlags,
}

impl Scene<'_> {
    pub fn vertex_count(&self) -> u32 {
        match self.vertex_layout.stride {
            0 => 0,
            stride => (self.vertices.len() / stride as usize) as u32,
        }
    }
}

/// Requirement indices of the queues the engine itself uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueRoles {
    pub graphics: usize,
    pub transfer: usize,
}

/// Caller requirements plus swapchain support, Vulkan 1.3 with dynamic
/// rendering and sync2, a presentable graphics queue and a transfer queue.
pub fn engine_requirement(base: &CapabilityRequirement) -> (CapabilityRequirement, QueueRoles) {
    let mut features = base.features.clone();
    features.merge(
        &FeatureBundle::new()
            .with(VULKAN_13, "dynamicRendering", true)
            .with(VULKAN_13, "synchronization2", true),
    );

    let roles = QueueRoles {
        graphics: base.queues.len(),
        transfer: base.queues.len() + 1,
    };
    let req = base
        .clone()
        .with_min_version(base.min_version.max(ApiVersion::V1_3))
        .with_extension(SWAPCHAIN_EXTENSION)
        .with_features(features)
        .with_queue(QueueRequirement::new(QueueCapability::graphics().with_present(), 1))
        .with_queue(QueueRequirement::new(QueueCapability::transfer(), 1));
    (req, roles)
}

pub struct Engine {
    scheduler: FrameScheduler<VkFrameBackend>,
    roles: QueueRoles,
    device: Arc<LogicalDevice>,
}

impl Engine {
    pub fn new<W: PresentationWindow>(
        window: &mut W,
        config: &EngineConfig,
        scene: &Scene<'_>,
        source: Box<dyn UniformSource>,
    ) -> Result<Self> {
        let mut instance_cfg = config.instance.clone();
        instance_cfg.api_version = instance_cfg.api_version.max(ApiVersion::V1_3);
        let instance = GpuInstance::new(&instance_cfg, window.display_handle()?.as_raw())?;
        let surface = Arc::new(Surface::new(&instance, &*window, &*window)?);

        let (requirement, roles) = engine_requirement(&config.requirement);
        let candidates = DeviceSelector::enumerate_candidates(&instance, &surface)?;
        let chosen = DeviceSelector::select(&requirement, &candidates)?;
        let device = LogicalDeviceBuilder::build(&instance, &chosen, &requirement)?;

        let graphics_family = device.family(roles.graphics)?;
        let queue = device.queue(roles.graphics)?;
        let uploader = ResourceUploader::new(&device, roles.transfer)?;

        let mut swapchain_config = config.swapchain.clone();
        // Presentation happens on the graphics queue.
        swapchain_config.sharing = QueueSharing::for_families(&[graphics_family]);
        let mut swapchain = SwapchainManager::new(&device, &surface);
        swapchain.create(&swapchain_config, window.framebuffer_size())?;

        let vertex_code = ShaderLoader::load_bytecode(scene.vertex_shader)?;
        let fragment_code = ShaderLoader::load_bytecode(scene.fragment_shader)?;
        let pipeline = GraphicsPipeline::new(
            &device,
            &PipelineDesc {
                vertex_code: &vertex_code,
                fragment_code: &fragment_code,
                vertex_layout: &scene.vertex_layout,
                raster: scene.raster,
                color_format: swapchain_config.format,
                uniform_stages: scene.uniform_stages,
            },
        )?;

        let static_sharing = QueueSharing::for_families(&[graphics_family, uploader.family()]);
        let vertices = uploader.upload_static(
            scene.vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &static_sharing,
        )?;
        let indices = if scene.indices.is_empty() {
            None
        } else {
            let buffer = uploader.upload_static(
                bytemuck::cast_slice(scene.indices),
                vk::BufferUsageFlags::INDEX_BUFFER,
                &static_sharing,
            )?;
            Some((buffer, scene.indices.len() as u32))
        };

        slot_count(config.frames_in_flight)?;
        let frames = config.frames_in_flight;
        let uniforms = UniformRing::new(
            &device,
            &uploader,
            pipeline.set_layout(),
            frames,
            scene.uniform_size,
        )?;
        let slots = FrameSlots::new(&device, graphics_family, frames)?;

        let backend = VkFrameBackend::new(
            &device,
            BackendParts {
                slots,
                uniforms,
                source,
                geometry: Geometry {
                    vertices,
                    vertex_count: scene.vertex_count(),
                    indices,
                },
                pipeline,
                swapchain,
                swapchain_config,
                queue,
                clear_color: config.clear_color,
            },
        );
        let scheduler = FrameScheduler::new(
            backend,
            lumen_core::ResizeSignal::new(),
            config.fence_timeout,
        )?;
        window.set_resize_signal(scheduler.resize_signal().clone());

        info!(
            "engine ready on {} with {frames} frame(s) in flight",
            device.name()
        );
        Ok(Self {
            scheduler,
            roles,
            device,
        })
    }

    /// Renders until the window closes. The device is idle on return.
    pub fn run(&mut self, window: &mut dyn lumen_render::WindowEvents) -> Result<()> {
        self.scheduler.run_loop(window)
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    pub fn queue_roles(&self) -> QueueRoles {
        self.roles
    }

    pub fn scheduler(&self) -> &FrameScheduler<VkFrameBackend> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::VertexAttribute;

    #[test]
    fn prerequisites_are_added_to_caller_requirements() {
        let base = CapabilityRequirement::default()
            .with_extension("VK_KHR_push_descriptor")
            .with_queue(QueueRequirement::new(
                QueueCapability::new(vk::QueueFlags::COMPUTE),
                2,
            ))
            .with_features(FeatureBundle::new().with("core", "samplerAnisotropy", true));

        let (req, roles) = engine_requirement(&base);
        assert_eq!(req.min_version, ApiVersion::V1_3);
        assert_eq!(
            req.extensions,
            vec!["VK_KHR_push_descriptor".to_owned(), SWAPCHAIN_EXTENSION.to_owned()]
        );
        assert_eq!(req.features.get("core", "samplerAnisotropy"), Some(true));
        assert_eq!(req.features.get(VULKAN_13, "dynamicRendering"), Some(true));
        assert_eq!(req.features.get(VULKAN_13, "synchronization2"), Some(true));

        assert_eq!(roles, QueueRoles { graphics: 1, transfer: 2 });
        assert_eq!(req.queues[0], base.queues[0]);
        assert!(req.queues[roles.graphics].capability.present);
        assert_eq!(
            req.queues[roles.transfer].capability.flags,
            vk::QueueFlags::TRANSFER
        );
    }

    #[test]
    fn newer_minimum_version_is_kept() {
        let base = CapabilityRequirement::default().with_min_version(ApiVersion::new(1, 4, 0));
        let (req, _) = engine_requirement(&base);
        assert_eq!(req.min_version, ApiVersion::new(1, 4, 0));
    }

    #[test]
    fn swapchain_extension_is_not_duplicated() {
        let base = CapabilityRequirement::default().with_extension(SWAPCHAIN_EXTENSION);
        let (req, _) = engine_requirement(&base);
        assert_eq!(req.extensions, vec![SWAPCHAIN_EXTENSION.to_owned()]);
    }

    #[test]
    fn vertex_count_follows_stride() {
        let bytes = [0u8; 60];
        let scene = Scene {
            vertex_shader: Path::new("a.spv"),
            fragment_shader: Path::new("b.spv"),
            vertex_layout: VertexLayout {
                stride: 20,
                attributes: vec![VertexAttribute {
                    location: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: 0,
                }],
            },
            raster: RasterState::default(),
            vertices: &bytes,
            indices: &[],
            uniform_size: 64,
            uniform_stages: vk::ShaderStageFlags::VERTEX,
        };
        assert_eq!(scene.vertex_count(), 3);
    }
}
