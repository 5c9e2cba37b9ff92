// SPDX-License-Identifier: CEPL-1.0
use lumen_core::ResizeSignal;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports a zero-area framebuffer.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceStatus {
    Open,
    CloseRequested,
}

/// The window side of a presentation surface, as seen by the render loop.
pub trait WindowEvents {
    /// Current drawable size in pixels.
    fn framebuffer_size(&self) -> RenderSize;

    /// Drain pending OS events without blocking.
    fn poll_events(&mut self) -> SurfaceStatus;

    /// Block until at least one OS event arrives, then drain.
    fn wait_events(&mut self) -> SurfaceStatus;

    /// Register the flag raised whenever the framebuffer changes size.
    fn set_resize_signal(&mut self, signal: ResizeSignal);
}

/// Everything the Vulkan backend needs from a window: raw handles for surface
/// creation plus event pumping.
pub trait PresentationWindow: WindowEvents + HasWindowHandle + HasDisplayHandle {}

impl<T> PresentationWindow for T where T: WindowEvents + HasWindowHandle + HasDisplayHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_empty() {
        assert!(RenderSize::new(0, 600).is_empty());
        assert!(RenderSize::new(800, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }
}
