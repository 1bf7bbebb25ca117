// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tessera_core::{init_tracing, report_fatal};
use tessera_math::{Camera, Movement, ObjectTransform, Vec3};
use tessera_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{DeviceEvent, DeviceId, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::KeyCode,
    window::{Fullscreen, Window, WindowId},
};
use tessera_platform::{from_device_event, from_window_event, HostEvent};
use tessera_render::{
    FrameLoop, LoopState, MeshData, RenderSettings, RenderSize, SceneDesc, SurfaceTarget,
    TextureData,
};
use tessera_render_vk::VkBackend;
use tracing::{debug, error, info, warn};

use crate::config::{load_cfg, AppCfg};

/// World units per movement key-down.
const MOVE_STEP: f32 = 0.1;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, default_value = "tessera.toml")]
    config: PathBuf,
    /// Swap chain images (overrides the config)
    #[arg(long, value_parser = clap::value_parser!(u32).range(2..=3))]
    buffers: Option<u32>,
    /// Wait for vertical blank (overrides the config)
    #[arg(long)]
    vsync: Option<bool>,
    /// Start in borderless fullscreen
    #[arg(long)]
    fullscreen: bool,
}

fn apply_args(cfg: &mut AppCfg, args: &Args) {
    if let Some(n) = args.buffers {
        cfg.render.buffer_count = n;
    }
    if let Some(v) = args.vsync {
        cfg.render.vsync = v;
    }
    if args.fullscreen {
        cfg.render.fullscreen = true;
    }
}

fn movement_for(code: KeyCode) -> Option<Movement> {
    match code {
        KeyCode::KeyW => Some(Movement::FORWARD),
        KeyCode::KeyS => Some(Movement::BACKWARD),
        KeyCode::KeyA => Some(Movement::LEFT),
        KeyCode::KeyD => Some(Movement::RIGHT),
        _ => None,
    }
}

fn demo_camera() -> Camera {
    Camera::new(Vec3::new(0.0, 0.0, -3.0), Vec3::Z, Vec3::Y)
}

fn load_texture(path: &std::path::Path, fallback: fn() -> TextureData) -> TextureData {
    match TextureData::load(path) {
        Ok(t) => {
            info!(path = %path.display(), w = t.width, h = t.height, format = ?t.format, "texture loaded");
            t
        }
        Err(e) => {
            warn!(path = %path.display(), "texture load failed: {e}; using fallback");
            fallback()
        }
    }
}

fn scene_from(cfg: &AppCfg) -> SceneDesc {
    SceneDesc {
        mesh: MeshData::cube(),
        textures: vec![
            load_texture(&cfg.assets.diffuse, || TextureData::checkerboard(64)),
            load_texture(&cfg.assets.normal, TextureData::flat_normal),
        ],
        object_count: cfg.scene.objects.len(),
    }
}

/// Idle windows block on events; otherwise vsync paces the loop or it spins.
fn control_flow(idle: bool, vsync: bool) -> ControlFlow {
    if idle || vsync {
        ControlFlow::Wait
    } else {
        ControlFlow::Poll
    }
}

struct App {
    cfg: AppCfg,
    // Dropped before the window it presents to.
    frame_loop: Option<FrameLoop<VkBackend>>,
    window: Option<Window>,
    camera: Camera,
    looking: bool,
    fullscreen: bool,
    occluded: bool,
    exiting: bool,
    failure: Option<anyhow::Error>,

    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            fullscreen: cfg.render.fullscreen,
            cfg,
            frame_loop: None,
            window: None,
            camera: demo_camera(),
            looking: false,
            occluded: false,
            exiting: false,
            failure: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let mut attrs = Window::default_attributes()
            .with_title("tessera")
            .with_inner_size(PhysicalSize::new(self.cfg.render.width, self.cfg.render.height));
        if self.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = event_loop.create_window(attrs).context("create window")?;
        let size = window.inner_size();

        let settings = RenderSettings {
            buffer_count: self.cfg.render.buffer_count,
            vsync: self.cfg.render.vsync,
            vsync_mode: self.cfg.render.vsync_mode.into(),
        };
        let scene = scene_from(&self.cfg);
        let target = SurfaceTarget {
            window: &window,
            display: &window,
            size: RenderSize {
                width: size.width.max(1),
                height: size.height.max(1),
            },
        };
        let parts = VkBackend::create(&target, settings, &scene).map_err(report_fatal)?;
        info!(textures = parts.backend.texture_count(), "scene uploaded");

        let objects = self
            .cfg
            .scene
            .objects
            .iter()
            .map(|&p| ObjectTransform::new(Vec3::from_array(p)))
            .collect();
        let frame_loop =
            FrameLoop::new(parts, objects, self.cfg.render.clear_color).map_err(report_fatal)?;

        info!(
            vsync = self.cfg.render.vsync,
            buffers = self.cfg.render.buffer_count,
            "frame loop running"
        );
        self.frame_loop = Some(frame_loop);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        self.close(event_loop);
    }

    // STRICT ORDER (close):
    // 1) leave fullscreen so the desktop mode is restored
    // 2) drain the frame loop, then drop it (GPU objects before the surface)
    // 3) drop the window
    fn close(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        self.exiting = true;
        if let Some(w) = &self.window {
            if w.fullscreen().is_some() {
                w.set_fullscreen(None);
            }
        }
        if let Some(mut fl) = self.frame_loop.take() {
            if let Err(e) = fl.shutdown() {
                error!(stage = %e.stage(), "shutdown: {e}");
            }
            info!(ticks = fl.ticks(), "frame loop stopped");
        }
        self.window = None;
        event_loop.exit();
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(w) = &self.window {
            self.fullscreen = !self.fullscreen;
            w.set_fullscreen(self.fullscreen.then_some(Fullscreen::Borderless(None)));
            info!(fullscreen = self.fullscreen, "toggled fullscreen");
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(fl) = self.frame_loop.as_mut() else {
            return;
        };
        match fl.tick(self.camera.view()) {
            Ok(LoopState::Running) if !fl.is_paused() => {
                self.frames = self.frames.saturating_add(1)
            }
            Ok(LoopState::Running) => {}
            Ok(LoopState::ShuttingDown) => self.close(event_loop),
            Err(e) => {
                let err = report_fatal(e);
                self.fail(event_loop, err);
            }
        }
    }

    fn on_host_event(&mut self, event_loop: &ActiveEventLoop, ev: HostEvent) {
        match ev {
            HostEvent::CloseRequested => {
                info!("close requested");
                if let Some(fl) = self.frame_loop.as_mut() {
                    fl.request_shutdown();
                }
                self.close(event_loop);
            }
            HostEvent::Resized { width, height } => {
                debug!(width, height, "resized");
                if let Some(fl) = self.frame_loop.as_mut() {
                    if let Err(e) = fl.resize(RenderSize { width, height }) {
                        let err = report_fatal(e);
                        self.fail(event_loop, err);
                    }
                }
            }
            HostEvent::Occluded { occluded } => {
                debug!(occluded, "visibility changed");
                self.occluded = occluded;
            }
            HostEvent::Key {
                code,
                pressed: true,
                repeat,
            } => match code {
                KeyCode::Escape => self.close(event_loop),
                KeyCode::F11 if !repeat => self.toggle_fullscreen(),
                code => {
                    if let Some(dir) = movement_for(code) {
                        self.camera.move_by(dir, MOVE_STEP);
                    }
                }
            },
            HostEvent::MouseButton {
                button: MouseButton::Left,
                pressed,
            } => self.looking = pressed,
            HostEvent::MouseMotion { dx, dy } if self.looking => {
                self.camera.look_by(dx as f32, dy as f32);
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(control_flow(false, self.cfg.render.vsync));
        if let Some(w) = &self.window {
            w.request_redraw();
        }
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
        if self.exiting {
            return;
        }
        if matches!(event, WindowEvent::RedrawRequested) {
            self.redraw(event_loop);
            return;
        }
        if let Some(ev) = from_window_event(&event) {
            self.on_host_event(event_loop, ev);
        }
    }

    fn device_event(&mut self, event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if self.exiting {
            return;
        }
        if let Some(ev) = from_device_event(&event) {
            self.on_host_event(event_loop, ev);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        let paused = self.occluded || self.frame_loop.as_ref().is_some_and(|fl| fl.is_paused());
        event_loop.set_control_flow(control_flow(paused, self.cfg.render.vsync));
        if paused {
            // Sleep until the next resize or visibility event.
            self.frames = 0;
            self.last_fps_instant = Instant::now();
            return;
        }
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
    apply_args(&mut cfg, &args);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
