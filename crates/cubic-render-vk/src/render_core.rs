// SPDX-License-Identifier: CEPL-1.0
use cubic_render::RenderSize;
use tracing::{info, warn};

use crate::command::{CommandBuffer, CommandBufferState};
use crate::config::VkConfig;
use crate::device::DeviceContext;
use crate::error::{VkError, VkResultExt};
use crate::frame::FrameSync;
use crate::gpu::Gpu;
use crate::pipeline::{RenderPipelineState, ShaderSource};
use crate::swapchain::SwapchainContext;

/// Owns every GPU object of one rendering session.
///
/// Components get `&G` and plain handles; only this type destroys anything,
/// and only from [`RenderCore::recreate`] and [`RenderCore::shutdown`], both
/// behind a device-idle wait. There is no `Drop`: the owner calls `shutdown`
/// and then destroys the device itself.
pub struct RenderCore<G: Gpu> {
    pub(crate) gpu: G,
    pub(crate) device: DeviceContext,
    pub(crate) swapchain: Option<SwapchainContext>,
    pub(crate) pipeline: Option<RenderPipelineState>,
    /// One per swapchain image.
    pub(crate) commands: Vec<CommandBuffer>,
    pub(crate) frames: FrameSync,
    /// Slot whose submission last used each swapchain image.
    pub(crate) images_in_flight: Vec<Option<usize>>,
    shaders: Box<dyn ShaderSource>,
    pub(crate) config: VkConfig,
    pub(crate) size: RenderSize,
    pub(crate) paused: bool,
    pub(crate) resize_pending: bool,
    pub(crate) recreate_requested: bool,
    recreations: u32,
    pub(crate) initialized: bool,
    pub(crate) shut_down: bool,
}

impl<G: Gpu> RenderCore<G> {
    pub fn new(
        gpu: G,
        device: DeviceContext,
        shaders: Box<dyn ShaderSource>,
        config: VkConfig,
        size: RenderSize,
    ) -> Self {
        Self {
            gpu,
            device,
            swapchain: None,
            pipeline: None,
            commands: Vec::new(),
            frames: FrameSync::default(),
            images_in_flight: Vec::new(),
            shaders,
            config,
            size,
            paused: size.is_zero(),
            resize_pending: false,
            recreate_requested: false,
            recreations: 0,
            initialized: false,
            shut_down: false,
        }
    }

    /// Swapchain, pipeline, framebuffers, command buffers, then frame sync.
    ///
    /// On error, whatever was built stays owned here and `shutdown` releases it.
    pub fn initialize(&mut self) -> Result<(), VkError> {
        if self.initialized {
            return Ok(());
        }
        unsafe {
            self.build_swapchain_group()?;
            self.frames = FrameSync::create(&self.gpu)?;
        }
        self.initialized = true;
        info!(
            "render core ready on {} ({} images, {} frames in flight)",
            self.device.name,
            self.commands.len(),
            self.frames.len()
        );
        Ok(())
    }

    unsafe fn build_swapchain_group(&mut self) -> Result<(), VkError> {
        let gpu = &self.gpu;
        let mut sc = SwapchainContext::create(
            gpu,
            &self.device.families,
            self.size,
            self.config.present_mode,
        )?;
        let mut pipeline = match RenderPipelineState::build(
            gpu,
            sc.surface_format.format,
            sc.extent,
            &sc.image_views,
            self.shaders.as_ref(),
        ) {
            Ok(p) => p,
            Err(e) => {
                sc.destroy(gpu);
                return Err(e);
            }
        };

        let pool = self.device.command_pool;
        let mut commands = Vec::with_capacity(sc.image_count());
        for _ in 0..sc.image_count() {
            match CommandBuffer::allocate(gpu, pool, true) {
                Ok(c) => commands.push(c),
                Err(e) => {
                    for c in &mut commands {
                        c.free(gpu, pool);
                    }
                    pipeline.destroy(gpu);
                    sc.destroy(gpu);
                    return Err(e);
                }
            }
        }

        self.images_in_flight = vec![None; sc.image_count()];
        self.commands = commands;
        self.pipeline = Some(pipeline);
        self.swapchain = Some(sc);
        Ok(())
    }

    /// Device must be idle.
    unsafe fn teardown_swapchain_group(&mut self) {
        let pool = self.device.command_pool;
        for c in &mut self.commands {
            c.free(&self.gpu, pool);
        }
        self.commands.clear();
        if let Some(mut p) = self.pipeline.take() {
            p.destroy(&self.gpu);
        }
        if let Some(mut sc) = self.swapchain.take() {
            sc.destroy(&self.gpu);
        }
        self.images_in_flight.clear();
        self.frames.forget_images();
    }

    /// Idles the device, destroys the swapchain group and builds a new one at `size`.
    ///
    /// The pending resize and recreate flags survive a failure, so the next
    /// frame retries.
    pub fn recreate(&mut self, size: RenderSize) -> Result<(), VkError> {
        self.size = size;
        unsafe {
            self.gpu.device_wait_idle().vk_call("vkDeviceWaitIdle")?;
            self.teardown_swapchain_group();
            self.build_swapchain_group()?;
        }
        self.resize_pending = false;
        self.recreate_requested = false;
        self.recreations += 1;
        if let Some(sc) = &self.swapchain {
            info!(
                "swapchain recreated: {}x{}, {} images",
                sc.extent.width,
                sc.extent.height,
                sc.image_count()
            );
        }
        Ok(())
    }

    /// Zero in either dimension pauses; anything else resumes and schedules a rebuild.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        let size = RenderSize::new(width, height);
        if size.is_zero() {
            if !self.paused {
                info!("drawable is {width}x{height}, pausing");
            }
            self.paused = true;
            return;
        }
        if self.paused {
            info!("drawable is {width}x{height}, resuming");
        }
        self.paused = false;
        if size != self.size {
            self.size = size;
            self.resize_pending = true;
        }
    }

    /// Used by frames recorded from now on.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.config.clear_color = rgba;
    }

    /// Waits for the device, then destroys frame sync, the swapchain group and
    /// the command pool. The device itself is left to the caller. Idempotent.
    pub fn shutdown(&mut self) -> Result<(), VkError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        unsafe {
            let idle = self.gpu.device_wait_idle().vk_call("vkDeviceWaitIdle");
            if idle.is_err() {
                warn!("device did not go idle, destroying anyway");
            }
            self.frames.destroy(&self.gpu);
            self.teardown_swapchain_group();
            self.device.destroy(&self.gpu);
            info!(
                "render core shut down after {} swapchain recreations",
                self.recreations
            );
            idle
        }
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    /// Gives the device back once the session is shut down.
    pub fn into_gpu(self) -> G {
        self.gpu
    }

    pub fn device(&self) -> &DeviceContext {
        &self.device
    }

    pub fn swapchain(&self) -> Option<&SwapchainContext> {
        self.swapchain.as_ref()
    }

    pub fn pipeline(&self) -> Option<&RenderPipelineState> {
        self.pipeline.as_ref()
    }

    pub fn frames(&self) -> &FrameSync {
        &self.frames
    }

    pub fn command_states(&self) -> Vec<CommandBufferState> {
        self.commands.iter().map(CommandBuffer::state).collect()
    }

    pub fn frame_index(&self) -> usize {
        self.frames.current()
    }

    pub fn recreations(&self) -> u32 {
        self.recreations
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }
}
