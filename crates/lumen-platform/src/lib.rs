// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{anyhow, bail, Result};
use lumen_core::ResizeSignal;
use lumen_render::{RenderSize, SurfaceStatus, WindowEvents};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use std::time::Duration;
use tracing::{debug, info};

pub use winit;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

// The first pump normally delivers `resumed`; a few platforms need more.
const CREATE_ATTEMPTS: u32 = 64;

#[derive(Clone, Debug)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "lumen".to_owned(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

impl WindowConfig {
    fn attributes(&self) -> WindowAttributes {
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(self.width, self.height))
            .with_resizable(self.resizable)
    }
}

struct Handler {
    attrs: WindowAttributes,
    window: Option<Window>,
    close_requested: bool,
    resize: Option<ResizeSignal>,
    create_error: Option<anyhow::Error>,
}

impl ApplicationHandler for Handler {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attrs.clone()) {
            Ok(window) => {
                let size = window.inner_size();
                info!("window created {}x{}", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => {
                self.create_error = Some(anyhow!("create_window: {e}"));
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::Resized(new_size) => {
                debug!("Resized → {}x{}", new_size.width, new_size.height);
                if let Some(signal) = &self.resize {
                    signal.raise();
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(signal) = &self.resize {
                    signal.raise();
                }
            }
            _ => {}
        }
    }
}

/// A winit window driven by explicit event pumping, so the render loop (not
/// the event loop) owns control flow.
pub struct PlatformWindow {
    // Window must drop before its event loop.
    handler: Handler,
    event_loop: EventLoop<()>,
}

impl PlatformWindow {
    pub fn new(cfg: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let mut this = Self {
            handler: Handler {
                attrs: cfg.attributes(),
                window: None,
                close_requested: false,
                resize: None,
                create_error: None,
            },
            event_loop,
        };

        for _ in 0..CREATE_ATTEMPTS {
            this.pump(Some(Duration::ZERO));
            if let Some(e) = this.handler.create_error.take() {
                return Err(e);
            }
            if this.handler.window.is_some() {
                return Ok(this);
            }
        }
        bail!("event loop never resumed; no window was created")
    }

    pub fn window(&self) -> Option<&Window> {
        self.handler.window.as_ref()
    }

    fn pump(&mut self, timeout: Option<Duration>) -> SurfaceStatus {
        let status = self.event_loop.pump_app_events(timeout, &mut self.handler);
        if let PumpStatus::Exit(code) = status {
            debug!("event loop exited with code {code}");
            self.handler.close_requested = true;
        }
        if self.handler.close_requested {
            SurfaceStatus::CloseRequested
        } else {
            SurfaceStatus::Open
        }
    }
}

impl WindowEvents for PlatformWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.handler
            .window
            .as_ref()
            .map(|w| {
                let s = w.inner_size();
                RenderSize::new(s.width, s.height)
            })
            .unwrap_or_default()
    }

    fn poll_events(&mut self) -> SurfaceStatus {
        self.pump(Some(Duration::ZERO))
    }

    fn wait_events(&mut self) -> SurfaceStatus {
        self.pump(None)
    }

    fn set_resize_signal(&mut self, signal: ResizeSignal) {
        self.handler.resize = Some(signal);
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.handler
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.event_loop.display_handle()
    }
}
