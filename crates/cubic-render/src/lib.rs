// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

mod system;

pub use system::{RenderSettings, RenderSystem};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A backend the render system can drive one frame at a time.
///
/// Construction is backend-specific; the owner passes a constructor to
/// [`RenderSystem::initialize`].
pub trait Renderer {
    /// Records the new drawable size. A zero dimension pauses rendering.
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    /// Renders one frame. `Ok(false)` means it was skipped without presenting,
    /// which is not an error.
    fn render(&mut self) -> Result<bool>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    /// Waits for the GPU and releases every session object. Idempotent.
    fn shutdown(&mut self) -> Result<()>;
}
