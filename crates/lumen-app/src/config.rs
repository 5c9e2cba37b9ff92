// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use lumen_platform::WindowConfig;
use lumen_render_vk::{
    vk, ApiVersion, CapabilityRequirement, EngineConfig, FeatureBundle, InstanceConfig,
    QueueCapability, QueueRequirement, SwapchainConfig,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub gpu: GpuCfg,
    pub swapchain: SwapchainCfg,
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "lumen".into(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GpuCfg {
    pub api_version: String,
    pub validation: Option<bool>,
    pub extensions: Vec<String>,
    /// `[gpu.features.core] samplerAnisotropy = true`
    pub features: BTreeMap<String, BTreeMap<String, bool>>,
    pub queues: Vec<QueueCfg>,
}

impl Default for GpuCfg {
    fn default() -> Self {
        Self {
            api_version: "1.3".into(),
            validation: None,
            extensions: Vec::new(),
            features: BTreeMap::new(),
            queues: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueCfg {
    pub flags: Vec<QueueFlagCfg>,
    #[serde(default = "one")]
    pub count: u32,
    #[serde(default)]
    pub priorities: Vec<f32>,
    #[serde(default)]
    pub present: bool,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueFlagCfg {
    Graphics,
    Compute,
    Transfer,
    SparseBinding,
}

impl From<QueueFlagCfg> for vk::QueueFlags {
    fn from(f: QueueFlagCfg) -> Self {
        match f {
            QueueFlagCfg::Graphics => vk::QueueFlags::GRAPHICS,
            QueueFlagCfg::Compute => vk::QueueFlags::COMPUTE,
            QueueFlagCfg::Transfer => vk::QueueFlags::TRANSFER,
            QueueFlagCfg::SparseBinding => vk::QueueFlags::SPARSE_BINDING,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SwapchainCfg {
    pub format: FormatCfg,
    pub color_space: ColorSpaceCfg,
    pub image_count: u32,
    pub present_mode: PresentModeCfg,
}

impl Default for SwapchainCfg {
    fn default() -> Self {
        Self {
            format: FormatCfg::default(),
            color_space: ColorSpaceCfg::default(),
            image_count: 3,
            present_mode: PresentModeCfg::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatCfg {
    #[default]
    Bgra8Srgb,
    Rgba8Srgb,
    Bgra8Unorm,
    Rgba8Unorm,
}

impl From<FormatCfg> for vk::Format {
    fn from(f: FormatCfg) -> Self {
        match f {
            FormatCfg::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            FormatCfg::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            FormatCfg::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            FormatCfg::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpaceCfg {
    #[default]
    SrgbNonlinear,
    ExtendedSrgbLinear,
}

impl From<ColorSpaceCfg> for vk::ColorSpaceKHR {
    fn from(c: ColorSpaceCfg) -> Self {
        match c {
            ColorSpaceCfg::SrgbNonlinear => vk::ColorSpaceKHR::SRGB_NONLINEAR,
            ColorSpaceCfg::ExtendedSrgbLinear => vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Fifo,
    FifoRelaxed,
    Mailbox,
    Immediate,
}

impl From<PresentModeCfg> for vk::PresentModeKHR {
    fn from(m: PresentModeCfg) -> Self {
        match m {
            PresentModeCfg::Fifo => vk::PresentModeKHR::FIFO,
            PresentModeCfg::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
            PresentModeCfg::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModeCfg::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RenderCfg {
    pub frames_in_flight: usize,
    pub fence_timeout_ms: u64,
    pub clear_color: [f32; 4],
    pub vertex_shader: Option<PathBuf>,
    pub fragment_shader: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ms: 10_000,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

/// A missing file means defaults; anything unreadable or malformed is an error.
pub fn load_cfg(path: &Path) -> Result<AppCfg> {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("{} not found, using defaults", path.display());
            return Ok(AppCfg::default());
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Command-line values that win over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub frames_in_flight: Option<usize>,
    pub present_mode: Option<PresentModeCfg>,
    pub validation: Option<bool>,
}

impl AppCfg {
    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
            resizable: self.window.resizable,
        }
    }

    pub fn engine_config(&self, ov: &Overrides) -> Result<EngineConfig> {
        let api_version: ApiVersion = self
            .gpu
            .api_version
            .parse()
            .context("gpu.api_version")?;

        let mut features = FeatureBundle::new();
        for (category, flags) in &self.gpu.features {
            for (flag, &on) in flags {
                features.set(category, flag, on);
            }
        }

        let mut requirement = CapabilityRequirement::default()
            .with_min_version(api_version)
            .with_features(features);
        for name in &self.gpu.extensions {
            requirement = requirement.with_extension(name.as_str());
        }
        for q in &self.gpu.queues {
            let flags = q
                .flags
                .iter()
                .fold(vk::QueueFlags::empty(), |acc, &f| acc | vk::QueueFlags::from(f));
            let mut cap = QueueCapability::new(flags);
            if q.present {
                cap = cap.with_present();
            }
            requirement = requirement
                .with_queue(QueueRequirement::new(cap, q.count).with_priorities(q.priorities.clone()));
        }

        let defaults = InstanceConfig::default();
        let instance = InstanceConfig {
            app_name: self.window.title.clone(),
            api_version,
            validation: ov
                .validation
                .or(self.gpu.validation)
                .unwrap_or(defaults.validation),
            extra_extensions: Vec::new(),
        };

        let swapchain = SwapchainConfig {
            format: self.swapchain.format.into(),
            color_space: self.swapchain.color_space.into(),
            image_count: self.swapchain.image_count,
            present_mode: ov.present_mode.unwrap_or(self.swapchain.present_mode).into(),
            ..Default::default()
        };

        Ok(EngineConfig {
            instance,
            requirement,
            swapchain,
            frames_in_flight: ov.frames_in_flight.unwrap_or(self.render.frames_in_flight),
            fence_timeout: Duration::from_millis(self.render.fence_timeout_ms),
            clear_color: self.render.clear_color,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[window]
title = "demo"
width = 1280

[gpu]
api_version = "1.3"
validation = false
extensions = ["VK_KHR_push_descriptor"]

[gpu.features.core]
samplerAnisotropy = true

[[gpu.queues]]
flags = ["compute"]
count = 2
priorities = [1.0, 0.5]

[swapchain]
format = "rgba8_unorm"
present_mode = "mailbox"
image_count = 2

[render]
frames_in_flight = 3
fence_timeout_ms = 2500
"#;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: AppCfg = toml::from_str("").unwrap();
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.swapchain.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.swapchain.image_count, 3);
    }

    #[test]
    fn sample_maps_onto_engine_config() {
        let cfg: AppCfg = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.window.title, "demo");
        assert_eq!(cfg.window.height, 600);

        let ec = cfg.engine_config(&Overrides::default()).unwrap();
        assert_eq!(ec.frames_in_flight, 3);
        assert_eq!(ec.fence_timeout, Duration::from_millis(2500));
        assert!(!ec.instance.validation);
        assert_eq!(ec.instance.api_version, ApiVersion::V1_3);
        assert_eq!(ec.swapchain.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(ec.swapchain.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(ec.swapchain.image_count, 2);

        let req = &ec.requirement;
        assert_eq!(req.min_version, ApiVersion::V1_3);
        assert_eq!(req.extensions, vec!["VK_KHR_push_descriptor".to_owned()]);
        assert_eq!(req.features.get("core", "samplerAnisotropy"), Some(true));
        assert_eq!(req.queues.len(), 1);
        assert_eq!(req.queues[0].capability.flags, vk::QueueFlags::COMPUTE);
        assert_eq!(req.queues[0].count(), 2);
        assert_eq!(req.queues[0].priorities, vec![1.0, 0.5]);
    }

    #[test]
    fn command_line_wins_over_file() {
        let cfg: AppCfg = toml::from_str(SAMPLE).unwrap();
        let ov = Overrides {
            frames_in_flight: Some(1),
            present_mode: Some(PresentModeCfg::Immediate),
            validation: Some(true),
        };
        let ec = cfg.engine_config(&ov).unwrap();
        assert_eq!(ec.frames_in_flight, 1);
        assert_eq!(ec.swapchain.present_mode, vk::PresentModeKHR::IMMEDIATE);
        assert!(ec.instance.validation);
    }

    #[test]
    fn bad_api_version_is_reported() {
        let cfg: AppCfg = toml::from_str("[gpu]\napi_version = \"one\"").unwrap();
        let err = cfg.engine_config(&Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("gpu.api_version"));
    }

    #[test]
    fn missing_file_is_default_but_malformed_is_not() {
        let missing = std::env::temp_dir().join("lumen-no-such-config.toml");
        assert_eq!(load_cfg(&missing).unwrap().window.width, 800);

        let bad = std::env::temp_dir().join(format!("lumen-bad-{}.toml", std::process::id()));
        fs::write(&bad, "[window\nwidth = ").unwrap();
        let err = load_cfg(&bad).unwrap_err();
        fs::remove_file(&bad).ok();
        assert!(format!("{err:#}").contains("parsing"));
    }
}
