// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use cubic_core::{init_tracing, DEFAULT_LOG_FILTER};
use cubic_platform::{drawable_size, window_attributes};
use cubic_render::{RenderSettings, RenderSize, RenderSystem, Renderer};
use cubic_render_vk::{PresentModePreference, VkConfig, VkRenderer};
use tracing::{error, info, warn};

use cubic_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; a missing file means defaults
    #[arg(long, default_value = "cubic.toml")]
    config: PathBuf,
    /// Exit after rendering this many frames
    #[arg(long)]
    frames: Option<u64>,
    /// Force the Vulkan validation layer on
    #[arg(long)]
    validation: bool,
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
        let (width, height) = cubic_platform::DEFAULT_WINDOW_SIZE;
        WindowCfg {
            title: "cubic".to_owned(),
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum PresentModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    present_mode: PresentModeCfg,
    /// Unset follows the build profile.
    validation: Option<bool>,
    fence_timeout_ms: Option<u64>,
    max_consecutive_failures: u32,
    shader_dir: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::Mailbox,
            validation: None,
            fence_timeout_ms: None,
            max_consecutive_failures: RenderSettings::default().max_consecutive_failures,
            shader_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct LogCfg {
    filter: String,
}

impl Default for LogCfg {
    fn default() -> Self {
        LogCfg {
            filter: DEFAULT_LOG_FILTER.to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RenderCfg,
    log: LogCfg,
}

impl AppCfg {
    fn vk_config(&self, force_validation: bool) -> VkConfig {
        let defaults = VkConfig::default();
        VkConfig {
            app_name: self.window.title.clone(),
            validation: force_validation || self.render.validation.unwrap_or(defaults.validation),
            present_mode: match self.render.present_mode {
                PresentModeCfg::Fifo => PresentModePreference::Fifo,
                PresentModeCfg::Mailbox => PresentModePreference::Mailbox,
            },
            clear_color: self.render.clear_color,
            fence_timeout: self.render.fence_timeout_ms.map(Duration::from_millis),
            shader_dir: self.render.shader_dir.clone(),
        }
    }

    fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            max_consecutive_failures: self.render.max_consecutive_failures,
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

/// Parses the config, falling back to defaults. The second value is a
/// problem to log once tracing is up.
fn load_cfg(path: &Path) -> (AppCfg, Option<String>) {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => (cfg, None),
            Err(e) => (
                AppCfg::default(),
                Some(format!("{}: {e}; using defaults", path.display())),
            ),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (AppCfg::default(), None),
        Err(e) => (
            AppCfg::default(),
            Some(format!("cannot read {}: {e}; using defaults", path.display())),
        ),
    }
}

/// Skipped frames do not count towards `--frames`.
fn frame_limit_reached<R: Renderer>(system: &RenderSystem<R>, limit: Option<u64>) -> bool {
    limit.is_some_and(|n| system.presented_frames() >= n)
}

struct App {
    cfg: AppCfg,
    force_validation: bool,
    frame_limit: Option<u64>,

    // Declared before `window`: the surface must go first.
    system: RenderSystem<VkRenderer>,
    window: Option<Window>,

    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg, args: &Args) -> Self {
        App {
            system: RenderSystem::new(cfg.render_settings()),
            force_validation: args.validation,
            frame_limit: args.frames,
            cfg,
            window: None,
            exiting: false,
            paused: false,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        self.exiting = true;
        self.system.shutdown();
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let w = &self.cfg.window;
            let attrs = window_attributes(&w.title, w.width, w.height);
            let window = match event_loop.create_window(attrs) {
                Ok(window) => window,
                Err(e) => {
                    error!(fatal = true, "create_window failed: {e}");
                    self.exit(event_loop);
                    return;
                }
            };

            let (width, height) = drawable_size(&window);
            let size = RenderSize::new(width, height);
            let vk_cfg = self.cfg.vk_config(self.force_validation);
            let ok = self
                .system
                .initialize(|| VkRenderer::new(&window, &window, size, vk_cfg));
            self.window = Some(window);
            if !ok {
                self.exit(event_loop);
                return;
            }
            self.paused = size.is_zero();
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        info!("resumed → paused={}", self.paused);
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
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

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exit(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let now_paused = new_size.width == 0 || new_size.height == 0;
                if self.paused != now_paused {
                    self.paused = now_paused;
                }
                info!(
                    "Resized → {}x{} (paused={})",
                    new_size.width, new_size.height, self.paused
                );
                self.system.notify_resize(new_size.width, new_size.height);
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                let (w, h) = self.window.as_ref().map(drawable_size).unwrap_or((0, 0));
                self.paused = occluded || w == 0 || h == 0;
                info!("Occluded={} → paused={}", occluded, self.paused);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                if self.system.render_frame() {
                    self.frames = self.frames.saturating_add(1);
                }
                if self.system.is_halted() {
                    error!("rendering halted after repeated failures");
                    self.exit(event_loop);
                } else if frame_limit_reached(&self.system, self.frame_limit) {
                    info!("presented {} frames, exiting", self.system.presented_frames());
                    self.exit(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        // Frame pacing comes from the fence wait and the present mode.
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
    let args = Args::parse();
    let (cfg, cfg_problem) = load_cfg(&args.config);
    init_tracing(&cfg.log.filter);
    if let Some(problem) = cfg_problem {
        warn!("{problem}");
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, &args);
    event_loop.run_app(&mut app)?;

    if app.system.is_halted() {
        anyhow::bail!("rendering halted after repeated frame failures");
    }
    Ok(())
}
