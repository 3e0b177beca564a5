// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, error, trace, warn};

use crate::command::{self, CommandBufferState, RecordTarget};
use crate::error::{CommandError, FrameError, VkError, VkResultExt};
use crate::gpu::Gpu;
use crate::render_core::RenderCore;

/// Frames the CPU may queue ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    WaitFence,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// Sync objects for one in-flight frame.
#[derive(Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait returns at once.
    pub in_flight: vk::Fence,
    /// Swapchain image the last submission from this slot rendered to.
    pub submitted_image: Option<usize>,
    pub state: SlotState,
    /// Set when a failed submit could not be followed by an idle wait; the
    /// objects are rebuilt before the slot is used again.
    pub stale: bool,
}

unsafe fn create_slot<G: Gpu>(gpu: &G) -> Result<FrameSlot, VkError> {
    let image_available = gpu.create_semaphore().vk_call("vkCreateSemaphore")?;
    let render_finished = match gpu.create_semaphore().vk_call("vkCreateSemaphore") {
        Ok(s) => s,
        Err(e) => {
            gpu.destroy_semaphore(image_available);
            return Err(e);
        }
    };
    let in_flight = match gpu.create_fence(true).vk_call("vkCreateFence") {
        Ok(f) => f,
        Err(e) => {
            gpu.destroy_semaphore(render_finished);
            gpu.destroy_semaphore(image_available);
            return Err(e);
        }
    };
    Ok(FrameSlot {
        image_available,
        render_finished,
        in_flight,
        submitted_image: None,
        state: SlotState::Idle,
        stale: false,
    })
}

unsafe fn destroy_slot<G: Gpu>(gpu: &G, slot: &FrameSlot) {
    gpu.destroy_fence(slot.in_flight);
    gpu.destroy_semaphore(slot.render_finished);
    gpu.destroy_semaphore(slot.image_available);
}

/// Fixed ring of [`FrameSlot`]s, independent of the swapchain image count.
#[derive(Debug, Default)]
pub struct FrameSync {
    slots: Vec<FrameSlot>,
    frame_index: usize,
}

impl FrameSync {
    /// All slots or none.
    pub unsafe fn create<G: Gpu>(gpu: &G) -> Result<Self, VkError> {
        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            match create_slot(gpu) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for s in &slots {
                        destroy_slot(gpu, s);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            slots,
            frame_index: 0,
        })
    }

    /// Replaces slot `i` with fresh objects. The device must be idle.
    ///
    /// The old objects are only destroyed once the new ones exist.
    pub unsafe fn rebuild_slot<G: Gpu>(&mut self, gpu: &G, i: usize) -> Result<(), VkError> {
        let fresh = create_slot(gpu)?;
        let old = std::mem::replace(&mut self.slots[i], fresh);
        destroy_slot(gpu, &old);
        Ok(())
    }

    /// Device must be idle.
    pub unsafe fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for s in self.slots.drain(..) {
            destroy_slot(gpu, &s);
        }
        self.frame_index = 0;
    }

    pub fn current(&self) -> usize {
        self.frame_index
    }

    pub fn advance(&mut self) {
        if !self.slots.is_empty() {
            self.frame_index = (self.frame_index + 1) % self.slots.len();
        }
    }

    pub fn slot(&self, i: usize) -> &FrameSlot {
        &self.slots[i]
    }

    pub fn slot_mut(&mut self, i: usize) -> &mut FrameSlot {
        &mut self.slots[i]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn set_state(&mut self, i: usize, state: SlotState) {
        trace!(slot = i, ?state);
        self.slots[i].state = state;
    }

    /// Image indices mean nothing once the swapchain is gone.
    pub fn forget_images(&mut self) {
        for s in &mut self.slots {
            s.submitted_image = None;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Drawable has no area.
    Paused,
    /// Acquire reported the swapchain outdated; it has been rebuilt.
    SwapchainRecreated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented {
        slot: usize,
        image: u32,
        /// The swapchain was rebuilt after presenting.
        recreated: bool,
    },
    Skipped(SkipReason),
}

impl FrameStatus {
    pub fn presented(&self) -> bool {
        matches!(self, FrameStatus::Presented { .. })
    }
}

fn idle_error(e: VkError) -> FrameError {
    match e.vk_result() {
        Some(vk::Result::ERROR_DEVICE_LOST) => FrameError::DeviceLost,
        _ => FrameError::Vk(e),
    }
}

fn wait_error(slot: usize, timeout_ns: u64, e: VkError) -> FrameError {
    match e.vk_result() {
        Some(vk::Result::TIMEOUT) => {
            warn!(slot, timeout_ns, "frame fence did not signal in time");
            FrameError::FenceTimeout { slot, timeout_ns }
        }
        Some(vk::Result::ERROR_DEVICE_LOST) => FrameError::DeviceLost,
        _ => FrameError::Vk(e),
    }
}

impl<G: Gpu> RenderCore<G> {
    /// Blocks until slot `i`'s last submission has finished, then releases
    /// the command buffer and image it used.
    unsafe fn wait_slot(&mut self, i: usize) -> Result<(), FrameError> {
        if self.frames.slot(i).stale {
            self.gpu
                .device_wait_idle()
                .vk_call("vkDeviceWaitIdle")
                .map_err(idle_error)?;
            self.frames.rebuild_slot(&self.gpu, i)?;
            debug!(slot = i, "stale frame slot rebuilt");
        }
        let timeout = self.config.fence_timeout_ns();
        self.frames.set_state(i, SlotState::WaitFence);
        let fence = self.frames.slot(i).in_flight;
        self.gpu
            .wait_for_fence(fence, timeout)
            .vk_call("vkWaitForFences")
            .map_err(|e| wait_error(i, timeout, e))?;
        self.retire_slot(i);
        Ok(())
    }

    fn retire_slot(&mut self, i: usize) {
        if let Some(image) = self.frames.slot_mut(i).submitted_image.take() {
            if let Some(cmd) = self.commands.get_mut(image) {
                cmd.mark_completed();
            }
            if let Some(owner) = self.images_in_flight.get_mut(image) {
                if *owner == Some(i) {
                    *owner = None;
                }
            }
        }
    }

    fn record_target(&self, image: usize) -> Option<RecordTarget> {
        let sc = self.swapchain.as_ref()?;
        let p = self.pipeline.as_ref()?;
        Some(RecordTarget {
            render_pass: p.render_pass,
            framebuffer: *p.framebuffers.get(image)?,
            pipeline: p.pipeline,
            extent: sc.extent,
            clear_color: self.config.clear_color,
        })
    }

    unsafe fn record_image(&mut self, image: usize) -> Result<(), CommandError> {
        let target = self
            .record_target(image)
            .ok_or(CommandError::MissingTarget { image })?;
        let cmd = self
            .commands
            .get_mut(image)
            .ok_or(CommandError::MissingTarget { image })?;
        cmd.reset(&self.gpu)?;
        command::record(&self.gpu, cmd, &target)
    }

    /// Returns a buffer that never reached the queue to `Ready`.
    unsafe fn reset_unsubmitted(&mut self, image: usize) {
        let Some(cmd) = self.commands.get_mut(image) else {
            return;
        };
        if matches!(
            cmd.state(),
            CommandBufferState::Recording
                | CommandBufferState::InRenderPass
                | CommandBufferState::RecordingEnd
        ) {
            if let Err(e) = cmd.reset(&self.gpu) {
                warn!("command buffer for image {image} not reset: {e}");
            }
        }
    }

    /// An acquired image whose frame cannot be submitted still owes a wait on
    /// its semaphore; an empty submit consumes it so the slot can be reused.
    unsafe fn abandon_acquired(&mut self, i: usize, image: usize) {
        self.reset_unsubmitted(image);
        let wait = [self.frames.slot(i).image_available];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            ..Default::default()
        };
        if let Err(e) = self
            .gpu
            .queue_submit(self.device.queues.graphics, &[submit], vk::Fence::null())
            .vk_call("vkQueueSubmit")
        {
            warn!("could not release acquired image: {e}");
        }
        // The image is never presented; rebuild before the next acquire.
        self.recreate_requested = true;
    }

    fn recreate_tolerating_zero(&mut self) -> Result<bool, VkError> {
        match self.recreate(self.size) {
            Ok(()) => Ok(true),
            Err(VkError::ZeroExtent { width, height }) => {
                debug!("surface is {width}x{height}, waiting for a usable size");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Everything between acquire and submit. On error the caller releases
    /// the acquired image; slot `i`'s fence is still signaled unless the
    /// reset itself was the last step.
    unsafe fn prepare_image(&mut self, i: usize, img: usize) -> Result<(), FrameError> {
        // Another slot may still be rendering to this image.
        if let Some(owner) = self.images_in_flight.get(img).copied().flatten() {
            if owner != i {
                trace!(image = img, owner, "image still in flight from another slot");
                self.wait_slot(owner)?;
                self.frames.set_state(owner, SlotState::Idle);
            }
        }

        self.frames.set_state(i, SlotState::Recording);
        self.record_image(img)?;

        // Only reset once a submit that signals it is certain to follow.
        let fence = self.frames.slot(i).in_flight;
        self.gpu.reset_fence(fence).vk_call("vkResetFences")?;
        Ok(())
    }

    /// After a failed submit the slot's fence is unsignaled and its acquire
    /// semaphore may still be pending, so the slot is rebuilt once the device
    /// is idle. Without an idle device the old objects are kept and the slot
    /// is marked stale.
    unsafe fn recover_failed_submit(&mut self, i: usize, img: usize) -> Result<(), FrameError> {
        self.reset_unsubmitted(img);
        self.recreate_requested = true;
        self.frames.set_state(i, SlotState::Idle);
        if let Err(e) = self.gpu.device_wait_idle().vk_call("vkDeviceWaitIdle") {
            error!(slot = i, "device not idle after failed submit, keeping slot objects: {e}");
            self.frames.slot_mut(i).stale = true;
            return Err(idle_error(e));
        }
        self.frames.rebuild_slot(&self.gpu, i)?;
        Ok(())
    }

    /// Runs one acquire, record, submit and present cycle on the current slot.
    ///
    /// Outdated swapchains are rebuilt here and reported as a skipped frame.
    /// Every other failure abandons the frame and leaves the core usable.
    pub fn render_frame(&mut self) -> Result<FrameStatus, FrameError> {
        if self.shut_down {
            return Err(FrameError::ShutDown);
        }
        if !self.initialized {
            return Err(FrameError::NotInitialized);
        }
        if self.paused {
            return Ok(FrameStatus::Skipped(SkipReason::Paused));
        }
        if (self.swapchain.is_none() || self.recreate_requested)
            && !self.recreate_tolerating_zero()?
        {
            return Ok(FrameStatus::Skipped(SkipReason::Paused));
        }

        unsafe { self.run_frame() }
    }

    unsafe fn run_frame(&mut self) -> Result<FrameStatus, FrameError> {
        let i = self.frames.current();
        self.wait_slot(i)?;

        self.frames.set_state(i, SlotState::Acquiring);
        let (swapchain, image_available) = match &self.swapchain {
            Some(sc) => (sc.handle, self.frames.slot(i).image_available),
            None => return Err(FrameError::NotInitialized),
        };
        let acquired = self
            .gpu
            .acquire_next_image(swapchain, u64::MAX, image_available);
        let (image, suboptimal) = match acquired {
            Ok(r) => r,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("swapchain out of date on acquire");
                self.frames.set_state(i, SlotState::Idle);
                self.recreate_tolerating_zero()?;
                return Ok(FrameStatus::Skipped(SkipReason::SwapchainRecreated));
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                error!("device lost during acquire");
                return Err(FrameError::DeviceLost);
            }
            Err(r) => {
                self.frames.set_state(i, SlotState::Idle);
                return Err(VkError::call("vkAcquireNextImageKHR", r).into());
            }
        };
        if suboptimal {
            debug!("swapchain suboptimal on acquire");
            self.recreate_requested = true;
        }
        if let Some(sc) = self.swapchain.as_mut() {
            sc.image_index = Some(image);
        }
        let img = image as usize;

        if let Err(e) = self.prepare_image(i, img) {
            error!("frame for image {image} abandoned: {e}");
            self.abandon_acquired(i, img);
            self.frames.set_state(i, SlotState::Idle);
            return Err(e);
        }

        let slot = self.frames.slot(i);
        let (in_flight, render_finished) = (slot.in_flight, slot.render_finished);
        let queue = self.device.queues.graphics;
        let submitted = self.commands[img].submit(
            &self.gpu,
            queue,
            &[image_available],
            &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            &[render_finished],
            in_flight,
        );
        if let Err(e) = submitted {
            error!("submit for image {image} failed: {e}");
            self.recover_failed_submit(i, img)?;
            return Err(e.into());
        }
        self.frames.set_state(i, SlotState::Submitted);
        self.images_in_flight[img] = Some(i);
        self.frames.slot_mut(i).submitted_image = Some(img);

        self.frames.set_state(i, SlotState::Presenting);
        let swapchains = [swapchain];
        let indices = [image];
        let waits = [render_finished];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: waits.len() as u32,
            p_wait_semaphores: waits.as_ptr(),
            swapchain_count: swapchains.len() as u32,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: indices.as_ptr(),
            ..Default::default()
        };
        let presented = self.gpu.queue_present(self.device.queues.present, &present);
        self.frames.set_state(i, SlotState::Idle);
        self.frames.advance();

        let stale = match presented {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                error!("device lost during present");
                return Err(FrameError::DeviceLost);
            }
            Err(r) => return Err(VkError::call("vkQueuePresentKHR", r).into()),
        };

        let mut recreated = false;
        if stale || self.resize_pending || self.recreate_requested {
            recreated = self.recreate_tolerating_zero()?;
        }
        Ok(FrameStatus::Presented {
            slot: i,
            image,
            recreated,
        })
    }
}
