// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

//! Vulkan 1.3 renderer: device selection, staged uploads, swapchain
//! management and a frames-in-flight loop.

mod backend;
pub mod buffer;
pub mod capability;
pub mod device;
mod engine;
pub mod error;
pub mod features;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod scheduler;
pub mod selector;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod uniforms;

pub use ash::vk;

pub use backend::{Geometry, VkFrameBackend};
pub use buffer::{GpuBuffer, HostAddress, ResourceUploader};
pub use capability::{
    ApiVersion, CapabilityRequirement, FeatureBundle, PhysicalDeviceCandidate, QueueCapability,
    QueueFamilyInfo, QueueRequirement,
};
pub use device::{LogicalDevice, LogicalDeviceBuilder, QueueSharing};
pub use engine::{engine_requirement, Engine, EngineConfig, QueueRoles, Scene};
pub use error::{Result, VkError};
pub use instance::{GpuInstance, InstanceConfig};
pub use pipeline::{RasterState, VertexAttribute, VertexLayout};
pub use scheduler::{FrameBackend, FrameScheduler, LoopState, TickOutcome};
pub use selector::{DeviceSelector, SelectionReport};
pub use shader::ShaderLoader;
pub use swapchain::{SwapchainConfig, SwapchainManager};
pub use uniforms::UniformSource;
