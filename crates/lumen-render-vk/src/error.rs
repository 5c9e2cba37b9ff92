// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::selector::SelectionReport;

pub type Result<T, E = VkError> = std::result::Result<T, E>;

/// Everything that can stop the engine. None of these are retried; swapchain
/// staleness is handled inside the frame loop and never surfaces here.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("no suitable GPU found\n{0}")]
    NoSuitableDevice(SelectionReport),

    #[error("queue requirement #{index} ({capability}) matches no queue family on {device}")]
    QueueFamilyResolutionFailed {
        index: usize,
        capability: String,
        device: String,
    },

    #[error("desired swapchain {what} not supported: {wanted}")]
    UnsupportedSwapchainConfig { what: &'static str, wanted: String },

    #[error("no memory type in mask {type_bits:#b} provides {required:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("failure reading file at {}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid SPIR-V in {}", path.display())]
    InvalidSpirv {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("device hang: frame slot {slot} fence not signaled within {timeout:?}")]
    DeviceHang { slot: usize, timeout: Duration },

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("failed to load the Vulkan loader")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("instance {kind} {name} is not available")]
    MissingInstanceSupport { kind: &'static str, name: String },

    #[error("name {0:?} contains an interior NUL")]
    InvalidName(String),

    #[error("invalid API version {0:?}, expected MAJOR.MINOR[.PATCH]")]
    InvalidApiVersion(String),

    #[error("refusing to upload an empty buffer")]
    EmptyUpload,

    #[error("buffer is not host-mapped")]
    NotMapped,

    #[error("write of {len} bytes at offset {offset} overruns a {size}-byte mapping")]
    MappedWriteOutOfBounds { offset: usize, len: usize, size: usize },

    #[error("queue requirement #{0} is not configured on this device")]
    UnknownQueue(usize),

    #[error("swapchain has not been created")]
    NoSwapchain,

    #[error("frames in flight must be between 1 and {max}, got {count}")]
    InvalidFrameCount { count: usize, max: u32 },
}

/// Tags a raw `vk::Result` with the entry point that produced it.
pub(crate) trait VkContext<T> {
    fn vk_context(self, call: &'static str) -> Result<T>;
}

impl<T> VkContext<T> for std::result::Result<T, vk::Result> {
    fn vk_context(self, call: &'static str) -> Result<T> {
        self.map_err(|result| VkError::Vulkan { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_errors_name_the_failing_call() {
        let r: std::result::Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = r.vk_context("vkQueueSubmit").unwrap_err();
        assert!(matches!(
            err,
            VkError::Vulkan {
                call: "vkQueueSubmit",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
        assert!(err.to_string().starts_with("vkQueueSubmit failed"));
    }

    #[test]
    fn file_errors_carry_the_path() {
        let err = VkError::FileRead {
            path: PathBuf::from("shaders/missing.spv"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(
            err.to_string(),
            "failure reading file at shaders/missing.spv"
        );
    }
}
