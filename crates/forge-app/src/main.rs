// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use forge_core::{init_tracing, load_toml, DiskFiles, EngineConfig};
use forge_platform::{AppWindow, WindowDesc};
use forge_render::{
    DrawCommand, DrawList, DrawableSize, FrameOutcome, Material, MeshId, RenderSettings, RenderSize,
    ValidationMode, Vertex,
};
use forge_render_vk::VkRenderModule;
use glam::{Mat4, Vec3};
use tracing::{error, info, warn};

use forge_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::WindowId,
};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing keys fall back to defaults
    #[arg(long, default_value = "forge.toml")]
    config: PathBuf,
    /// Override the configured validation mode
    #[arg(long, value_enum)]
    validation: Option<ValidationArg>,
    /// Force debug mode (validation in `auto` mode)
    #[arg(long)]
    debug: bool,
    /// Override the number of frames in flight
    #[arg(long)]
    frames_in_flight: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ValidationArg {
    Auto,
    Required,
    Off,
}

impl From<ValidationArg> for ValidationMode {
    fn from(arg: ValidationArg) -> Self {
        match arg {
            ValidationArg::Auto => ValidationMode::Auto,
            ValidationArg::Required => ValidationMode::Required,
            ValidationArg::Off => ValidationMode::Off,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        let d = WindowDesc::default();
        Self {
            title: d.title,
            width: d.width,
            height: d.height,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AppCfg {
    engine: EngineConfig,
    render: RenderSettings,
    window: WindowCfg,
}

impl AppCfg {
    fn apply_args(&mut self, args: &Args) {
        if let Some(v) = args.validation {
            self.render.validation = v.into();
        }
        if args.debug {
            self.engine.debug_mode = true;
        }
        if let Some(n) = args.frames_in_flight {
            self.render.frames_in_flight = n;
        }
    }

    /// Falls back to shaders compiled into OUT_DIR when the configured
    /// paths don't exist.
    fn apply_builtin_shaders(&mut self) {
        let Some(dir) = option_env!("FORGE_BUILTIN_SHADER_DIR") else {
            return;
        };
        let dir = Path::new(dir);
        if !self.render.vertex_shader.exists() {
            self.render.vertex_shader = dir.join("mesh.vert.spv");
        }
        if !self.render.fragment_shader.exists() {
            self.render.fragment_shader = dir.join("mesh.frag.spv");
        }
    }
}

fn load_cfg(path: &Path) -> AppCfg {
    match load_toml::<AppCfg>(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(target: "forge::config", "{e}; using defaults");
            AppCfg::default()
        }
    }
}

// --- demo scene ---

const TRIANGLE: [Vertex; 3] = [
    Vertex {
        pos: [0.0, -0.6, 0.0],
        color: [1.0, 0.2, 0.2],
    },
    Vertex {
        pos: [0.6, 0.5, 0.0],
        color: [0.2, 1.0, 0.2],
    },
    Vertex {
        pos: [-0.6, 0.5, 0.0],
        color: [0.2, 0.2, 1.0],
    },
];

const QUAD: [Vertex; 4] = [
    Vertex {
        pos: [-0.5, -0.5, 0.0],
        color: [0.9, 0.9, 0.9],
    },
    Vertex {
        pos: [0.5, -0.5, 0.0],
        color: [0.9, 0.9, 0.9],
    },
    Vertex {
        pos: [0.5, 0.5, 0.0],
        color: [0.6, 0.6, 0.6],
    },
    Vertex {
        pos: [-0.5, 0.5, 0.0],
        color: [0.6, 0.6, 0.6],
    },
];

struct Scene {
    list: DrawList,
    triangle: MeshId,
    quad: MeshId,
    started: Instant,
}

impl Scene {
    fn upload(renderer: &mut VkRenderModule) -> Result<Self> {
        let triangle = renderer.upload_mesh(&TRIANGLE, &[0, 1, 2])?;
        let quad = renderer.upload_mesh(&QUAD, &[0, 1, 2, 2, 3, 0])?;
        Ok(Self {
            list: DrawList::default(),
            triangle,
            quad,
            started: Instant::now(),
        })
    }

    fn update(&mut self, size: RenderSize) {
        let t = self.started.elapsed().as_secs_f32();
        let aspect = size.width.max(1) as f32 / size.height.max(1) as f32;

        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
        // Vulkan clip space has +Y down
        proj.y_axis.y *= -1.0;
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y);

        self.list = DrawList::new(proj * view);
        let backdrop =
            Mat4::from_translation(Vec3::new(0.0, 0.0, -0.5)) * Mat4::from_scale(Vec3::splat(2.5));
        self.list.push(DrawCommand {
            material: Material {
                tint: [0.3, 0.3, 0.4, 1.0],
            },
            ..DrawCommand::new(self.quad, backdrop)
        });
        self.list
            .push(DrawCommand::new(self.triangle, Mat4::from_rotation_y(t)));
    }
}

struct App {
    cfg: AppCfg,
    window: Option<AppWindow>,
    renderer: Option<VkRenderModule>,
    scene: Option<Scene>,

    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let desc = WindowDesc {
            title: self.cfg.window.title.clone(),
            width: self.cfg.window.width,
            height: self.cfg.window.height,
        };
        let window = AppWindow::create(event_loop, &desc)?;

        let mut renderer =
            VkRenderModule::init(&self.cfg.engine, &self.cfg.render, &window, &DiskFiles)
                .context("render module init")?;
        info!(
            "adapter = {}, validation = {}",
            renderer.backend().context().adapter_name(),
            renderer.validation_enabled()
        );

        let scene = Scene::upload(&mut renderer).context("mesh upload")?;

        window.request_redraw();
        self.scene = Some(scene);
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    // STRICT ORDER: renderer (device, surface) before the window it draws to
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.scene = None;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(renderer), Some(window), Some(scene)) =
            (&mut self.renderer, &self.window, &mut self.scene)
        else {
            return;
        };

        scene.update(window.drawable_size());
        match renderer.render_frame(window, &scene.list) {
            Ok(outcome) => {
                if outcome.was_submitted() {
                    self.frames = self.frames.saturating_add(1);
                }
                if outcome == FrameOutcome::Skipped {
                    window.request_redraw();
                }
            }
            Err(e) if e.is_fatal() => {
                error!("render error: {e}");
                self.shutdown(event_loop);
            }
            Err(e) => warn!("frame dropped: {e}"),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.start(event_loop) {
                error!("startup failed: {e:#}");
                self.shutdown(event_loop);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
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
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                info!("Resized → {}x{}", size.width, size.height);
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.recreate_swapchain(size) {
                        error!("resize failed: {e}");
                        if e.is_fatal() {
                            self.shutdown(event_loop);
                            return;
                        }
                    }
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.exiting {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        // Minimized: sleep until a resize wakes us
        let suspended = self.renderer.as_ref().is_some_and(|r| r.is_suspended());
        if suspended {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    cfg.apply_args(&args);
    cfg.apply_builtin_shaders();
    info!(
        "config: frames_in_flight = {}, present = {:?}, validation = {:?}",
        cfg.render.slot_count(),
        cfg.render.present_mode,
        cfg.render.validation
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        window: None,
        renderer: None,
        scene: None,
        exiting: false,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_render::PresentPreference;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: AppCfg = toml::from_str(
            r#"
            [render]
            frames_in_flight = 3
            present_mode = "fifo"

            [window]
            title = "demo"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.present_mode, PresentPreference::Fifo);
        assert_eq!(cfg.render.validation, ValidationMode::Auto);
        assert_eq!(cfg.window.title, "demo");
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.engine, EngineConfig::default());
    }

    #[test]
    fn command_line_overrides_config() {
        let args = Args::parse_from([
            "forge-app",
            "--validation",
            "required",
            "--debug",
            "--frames-in-flight",
            "4",
        ]);
        let mut cfg = AppCfg::default();
        cfg.engine.debug_mode = false;
        cfg.apply_args(&args);

        assert_eq!(cfg.render.validation, ValidationMode::Required);
        assert!(cfg.engine.debug_mode);
        assert_eq!(cfg.render.frames_in_flight, 4);
    }

    #[test]
    fn sample_config_parses() {
        let text = include_str!("../forge.toml");
        let cfg: AppCfg = toml::from_str(text).unwrap();
        assert_eq!(cfg.render.present_mode, PresentPreference::LowLatency);
        assert!(cfg.engine.debug_mode);
        assert_eq!(
            cfg.render.pipeline_cache.as_deref(),
            Some(Path::new("target/forge-pipeline.cache"))
        );
    }
}
