// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device selection, swapchain lifetime, per-frame sync and
//! the triangle pipeline.

use anyhow::{Context, Result};
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use cubic_render::{RenderSize, Renderer};

mod ash_gpu;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
#[cfg(test)]
mod fake_gpu;
pub mod frame;
pub mod gpu;
pub mod instance;
pub mod pipeline;
mod render_core;
pub mod swapchain;

pub use crate::ash_gpu::AshGpu;
pub use crate::config::{PresentModePreference, VkConfig};
pub use crate::error::{CommandError, FrameError, ShaderError, VkError};
pub use crate::frame::{FrameStatus, SkipReason, MAX_FRAMES_IN_FLIGHT};
pub use crate::gpu::Gpu;
pub use crate::render_core::RenderCore;

use crate::instance::DebugMessenger;
#[cfg(feature = "embed-shaders")]
use crate::pipeline::EmbeddedShaders;
use crate::pipeline::{ShaderDir, ShaderSource};

/// Directory searched for `.spv` files when nothing is embedded or configured.
pub const DEFAULT_SHADER_DIR: &str = "shaders";

fn shader_source(config: &VkConfig) -> Box<dyn ShaderSource> {
    if let Some(dir) = &config.shader_dir {
        info!("loading shaders from {}", dir.display());
        return Box::new(ShaderDir(dir.clone()));
    }
    #[cfg(feature = "embed-shaders")]
    {
        Box::new(EmbeddedShaders)
    }
    #[cfg(not(feature = "embed-shaders"))]
    {
        Box::new(ShaderDir(DEFAULT_SHADER_DIR.into()))
    }
}

/// Window-bound Vulkan renderer. Field order is not drop order; see `Drop`.
pub struct VkRenderer {
    core: Option<RenderCore<AshGpu>>,
    surface: vk::SurfaceKHR,
    surface_loader: surface::Instance,
    debug: Option<DebugMessenger>,
    instance: Instance,
    _entry: Entry,
}

impl VkRenderer {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: VkConfig,
    ) -> Result<Self> {
        let raw_display = display.display_handle().map_err(VkError::from)?.as_raw();
        let raw_window = window.window_handle().map_err(VkError::from)?.as_raw();

        unsafe {
            let entry = Entry::load().map_err(VkError::from).context("loading libvulkan")?;
            let instance = instance::create_instance(&entry, raw_display, &config)?;
            let surface_loader = surface::Instance::new(&entry, &instance);

            // From here on `Drop` cleans up whatever exists.
            let mut r = VkRenderer {
                core: None,
                surface: vk::SurfaceKHR::null(),
                surface_loader,
                debug: None,
                instance,
                _entry: entry,
            };

            if config.validation {
                match DebugMessenger::new(&r._entry, &r.instance) {
                    Ok(m) => r.debug = Some(m),
                    Err(e) => warn!("validation output unavailable: {e}"),
                }
            }

            r.surface =
                ash_window::create_surface(&r._entry, &r.instance, raw_display, raw_window, None)
                    .map_err(|e| VkError::call("vkCreateSurfaceKHR", e))?;

            let (gpu, device) =
                device::initialize(&r.instance, &r.surface_loader, r.surface, config.validation)?;
            let shaders = shader_source(&config);
            let core = r.core.insert(RenderCore::new(gpu, device, shaders, config, size));
            core.initialize().context("building swapchain and pipeline")?;
            Ok(r)
        }
    }
}

impl Renderer for VkRenderer {
    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if let Some(core) = self.core.as_mut() {
            core.notify_resize(size.width, size.height);
        }
        Ok(())
    }

    fn render(&mut self) -> Result<bool> {
        let core = self.core.as_mut().context("renderer has no device")?;
        Ok(core.render_frame()?.presented())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        if let Some(core) = self.core.as_mut() {
            core.set_clear_color(rgba);
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        match self.core.as_mut() {
            Some(core) => Ok(core.shutdown()?),
            None => Ok(()),
        }
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            if let Some(mut core) = self.core.take() {
                if let Err(e) = core.shutdown() {
                    warn!("shutdown before teardown failed: {e}");
                }
                core.into_gpu().destroy_device();
            }
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}
