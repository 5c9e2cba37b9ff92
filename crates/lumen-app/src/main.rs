// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use clap::Parser;
use glam::{Mat4, Vec3};
use lumen_core::init_tracing;
use lumen_platform::PlatformWindow;
use lumen_render::RenderSize;
use lumen_render_vk::{
    vk, Engine, HostAddress, RasterState, Scene, UniformSource, VertexAttribute, VertexLayout,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};

mod config;

use config::{load_cfg, Overrides, PresentModeCfg};

const DEFAULT_VERT: &str = concat!(env!("OUT_DIR"), "/quad.vert.spv");
const DEFAULT_FRAG: &str = concat!(env!("OUT_DIR"), "/quad.frag.spv");

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
    #[arg(long)]
    frames_in_flight: Option<usize>,
    #[arg(long, value_enum)]
    present_mode: Option<PresentModeCfg>,
    /// Force the validation layer on
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,
    /// Force the validation layer off
    #[arg(long)]
    no_validation: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            frames_in_flight: self.frames_in_flight,
            present_mode: self.present_mode,
            validation: match (self.validation, self.no_validation) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Vertex {
    pos: [f32; 2],
    color: [f32; 3],
}

const QUAD: [Vertex; 4] = [
    Vertex { pos: [-0.5, -0.5], color: [1.0, 0.2, 0.2] },
    Vertex { pos: [0.5, -0.5], color: [0.2, 1.0, 0.2] },
    Vertex { pos: [0.5, 0.5], color: [0.2, 0.2, 1.0] },
    Vertex { pos: [-0.5, 0.5], color: [1.0, 1.0, 0.2] },
];
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

fn vertex_layout() -> VertexLayout {
    VertexLayout {
        stride: std::mem::size_of::<Vertex>() as u32,
        attributes: vec![
            VertexAttribute {
                location: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, pos) as u32,
            },
            VertexAttribute {
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, color) as u32,
            },
        ],
    }
}

/// Spins the quad about Z, keeping it square at any aspect ratio.
struct Spin {
    start: Instant,
}

fn spin_mvp(seconds: f32, extent: RenderSize) -> Mat4 {
    let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
    let proj = Mat4::orthographic_rh(-aspect, aspect, -1.0, 1.0, 0.0, 2.0);
    let view = Mat4::look_at_rh(Vec3::Z, Vec3::ZERO, Vec3::Y);
    proj * view * Mat4::from_rotation_z(seconds)
}

impl UniformSource for Spin {
    fn fill(
        &mut self,
        _slot: usize,
        extent: RenderSize,
        dst: &mut HostAddress,
    ) -> lumen_render_vk::Result<()> {
        let mvp = spin_mvp(self.start.elapsed().as_secs_f32(), extent);
        dst.write_pod(&mvp.to_cols_array_2d())
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = load_cfg(&args.config)?;
    let engine_cfg = cfg.engine_config(&args.overrides())?;

    let vertex_shader = cfg
        .render
        .vertex_shader
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_VERT));
    let fragment_shader = cfg
        .render
        .fragment_shader
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAG));

    let mut window = PlatformWindow::new(&cfg.window_config()).context("opening window")?;
    let scene = Scene {
        vertex_shader: &vertex_shader,
        fragment_shader: &fragment_shader,
        vertex_layout: vertex_layout(),
        raster: RasterState::default(),
        vertices: bytemuck::cast_slice(&QUAD),
        indices: &QUAD_INDICES,
        uniform_size: std::mem::size_of::<[[f32; 4]; 4]>() as vk::DeviceSize,
        uniform_stages: vk::ShaderStageFlags::VERTEX,
    };
    let spin = Spin {
        start: Instant::now(),
    };

    let mut engine = Engine::new(&mut window, &engine_cfg, &scene, Box::new(spin))
        .context("starting renderer")?;
    engine.run(&mut window)?;
    info!("bye");
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn vertex_layout_matches_struct() {
        let layout = vertex_layout();
        assert_eq!(layout.stride, 20);
        assert_eq!(layout.attributes[1].offset, 8);
        assert_eq!(bytemuck::cast_slice::<_, u8>(&QUAD).len(), 80);
    }

    #[test]
    fn mvp_keeps_quad_square_on_wide_windows() {
        let m = spin_mvp(0.0, RenderSize::new(1600, 800));
        let corner = m * Vec4::new(0.5, 0.5, 0.0, 1.0);
        assert!((corner.x - 0.25).abs() < 1e-5);
        assert!((corner.y - 0.5).abs() < 1e-5);
    }

    #[test]
    fn zero_extent_does_not_divide_by_zero() {
        let m = spin_mvp(1.0, RenderSize::new(0, 0));
        assert!(m.is_finite());
    }

    #[test]
    fn validation_flags_become_overrides() {
        let args = Args::parse_from(["lumen", "--no-validation", "--present-mode", "mailbox"]);
        let ov = args.overrides();
        assert_eq!(ov.validation, Some(false));
        assert_eq!(ov.present_mode, Some(PresentModeCfg::Mailbox));
        assert_eq!(ov.frames_in_flight, None);

        let args = Args::parse_from(["lumen"]);
        assert_eq!(args.overrides().validation, None);
        assert_eq!(args.config, PathBuf::from("lumen.toml"));
    }
}
