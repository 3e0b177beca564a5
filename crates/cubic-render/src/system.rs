// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use tracing::{error, info, warn};

use crate::{RenderSize, Renderer};

#[derive(Clone, Copy, Debug)]
pub struct RenderSettings {
    /// Consecutive failed frames before the system halts. `0` never halts.
    pub max_consecutive_failures: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 16,
        }
    }
}

/// Owns one backend and exposes the boolean lifecycle the application drives.
pub struct RenderSystem<R: Renderer> {
    renderer: Option<R>,
    settings: RenderSettings,
    failures: u32,
    presented: u64,
    halted: bool,
}

impl<R: Renderer> RenderSystem<R> {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            renderer: None,
            settings,
            failures: 0,
            presented: 0,
            halted: false,
        }
    }

    /// Builds the backend. On failure nothing is kept and the frame loop must not start.
    pub fn initialize(&mut self, create: impl FnOnce() -> Result<R>) -> bool {
        if self.renderer.is_some() {
            warn!("render system already initialized");
            return true;
        }
        match create() {
            Ok(r) => {
                self.renderer = Some(r);
                self.failures = 0;
                self.presented = 0;
                self.halted = false;
                info!("render system initialized");
                true
            }
            Err(e) => {
                error!(fatal = true, "render system initialization failed: {e:#}");
                false
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.renderer.is_some()
    }

    /// True once too many frames in a row have failed.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Frames that reached the presentation engine since `initialize`.
    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    /// True when a frame was presented. Skipped frames return false but do
    /// not count as failures.
    pub fn render_frame(&mut self) -> bool {
        if self.halted {
            return false;
        }
        let Some(r) = self.renderer.as_mut() else {
            return false;
        };
        match r.render() {
            Ok(presented) => {
                self.failures = 0;
                if presented {
                    self.presented += 1;
                }
                presented
            }
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                error!(consecutive = self.failures, "frame failed: {e:#}");
                let max = self.settings.max_consecutive_failures;
                if max > 0 && self.failures >= max {
                    error!("{} consecutive frame failures, halting rendering", self.failures);
                    self.halted = true;
                }
                false
            }
        }
    }

    pub fn notify_resize(&mut self, width: u32, height: u32) {
        if let Some(r) = self.renderer.as_mut() {
            if let Err(e) = r.resize(RenderSize::new(width, height)) {
                error!("resize to {width}x{height} failed: {e:#}");
            }
        }
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        if let Some(r) = self.renderer.as_mut() {
            r.set_clear_color(rgba);
        }
    }

    /// Tears the backend down. Returns false if it was never initialized or teardown failed.
    pub fn shutdown(&mut self) -> bool {
        let Some(mut r) = self.renderer.take() else {
            return false;
        };
        match r.shutdown() {
            Ok(()) => {
                info!("render system shut down");
                true
            }
            Err(e) => {
                error!("render system shutdown failed: {e:#}");
                false
            }
        }
    }
}

impl<R: Renderer> Drop for RenderSystem<R> {
    fn drop(&mut self) {
        if self.renderer.is_some() {
            self.shutdown();
        }
    }
}
