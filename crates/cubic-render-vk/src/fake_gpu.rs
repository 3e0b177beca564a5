// SPDX-License-Identifier: CEPL-1.0
//! Scriptable [`Gpu`] used by the unit tests.

use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::gpu::Gpu;

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` under a scoped subscriber and returns everything it logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buf = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buf.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    let bytes = buf.0.lock().unwrap().clone();
    (out, String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted; signals on the next wait unless fences are stalled.
    Pending,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainRecord {
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub sharing_mode: vk::SharingMode,
    pub family_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

#[derive(Clone, Copy, Debug)]
pub struct SubmitRecord {
    pub command_buffers: u32,
    pub wait_semaphores: u32,
    pub signal_semaphores: u32,
    pub wait_stage: Option<vk::PipelineStageFlags>,
    pub fence: vk::Fence,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassRecord {
    pub attachments: u32,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub subpasses: u32,
    pub dependencies: u32,
    pub dependency_src_subpass: u32,
    pub dependency_dst_stage: vk::PipelineStageFlags,
}

#[derive(Clone, Debug)]
pub struct PipelineRecord {
    pub stages: u32,
    pub vertex_bindings: u32,
    pub vertex_attributes: u32,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub blend_enable: vk::Bool32,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub render_pass: vk::RenderPass,
}

#[derive(Clone, Copy, Debug)]
pub struct RenderPassBeginRecord {
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: u32,
    pub clear_color: [f32; 4],
}

pub struct FakeState {
    next_handle: u64,
    pub live: BTreeMap<&'static str, i64>,
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub fences: HashMap<u64, FenceState>,
    /// Submitted fences never signal while set.
    pub stall_fences: bool,
    pub blocked_waits: u32,
    pub acquire_script: VecDeque<vk::Result>,
    pub present_script: VecDeque<vk::Result>,
    /// Image indices handed out before falling back to round-robin.
    pub forced_images: VecDeque<u32>,
    swapchain_images: HashMap<u64, u32>,
    next_image: u32,
    pub swapchains_created: u32,
    pub last_swapchain: Option<SwapchainRecord>,
    pub last_render_pass: Option<RenderPassRecord>,
    pub last_pipeline: Option<PipelineRecord>,
    pub last_begin: Option<RenderPassBeginRecord>,
    /// Queue family and flags of the last command pool.
    pub last_command_pool: Option<(u32, vk::CommandPoolCreateFlags)>,
    pub submits: Vec<SubmitRecord>,
    pub presents: Vec<u32>,
    pub calls: Vec<&'static str>,
    /// Call name to (calls left before failing, result).
    pub fail_at: HashMap<&'static str, (u32, vk::Result)>,
    pub idle_waits: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            next_handle: 0x1000,
            live: BTreeMap::new(),
            caps: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            fences: HashMap::new(),
            stall_fences: false,
            blocked_waits: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            forced_images: VecDeque::new(),
            swapchain_images: HashMap::new(),
            next_image: 0,
            swapchains_created: 0,
            last_swapchain: None,
            last_render_pass: None,
            last_pipeline: None,
            last_begin: None,
            last_command_pool: None,
            submits: Vec::new(),
            presents: Vec::new(),
            calls: Vec::new(),
            fail_at: HashMap::new(),
            idle_waits: 0,
        }
    }
}

impl FakeState {
    fn check(&mut self, call: &'static str) -> VkResult<()> {
        match self.fail_at.get_mut(call) {
            Some((0, r)) => {
                let r = *r;
                self.fail_at.remove(call);
                Err(r)
            }
            Some((n, _)) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct FakeGpu {
    state: RefCell<FakeState>,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, FakeState> {
        self.state.borrow_mut()
    }

    pub fn live(&self, kind: &str) -> i64 {
        self.state.borrow().live.get(kind).copied().unwrap_or(0)
    }

    /// Kinds with a non-zero live count.
    pub fn leaked(&self) -> Vec<(&'static str, i64)> {
        self.state
            .borrow()
            .live
            .iter()
            .filter(|(_, n)| **n != 0)
            .map(|(k, n)| (*k, *n))
            .collect()
    }

    pub fn fail_next(&self, call: &'static str, result: vk::Result) {
        self.fail_nth(call, 0, result);
    }

    /// Lets `skip` calls to `call` succeed, then fails the next one.
    pub fn fail_nth(&self, call: &'static str, skip: u32, result: vk::Result) {
        self.state.borrow_mut().fail_at.insert(call, (skip, result));
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.borrow().fences.get(&fence.as_raw()).copied()
    }

    fn raw_handle<H: Handle>(&self) -> H {
        let mut s = self.state.borrow_mut();
        s.next_handle += 1;
        H::from_raw(s.next_handle)
    }

    fn mint<H: Handle>(&self, kind: &'static str) -> H {
        let h = self.raw_handle();
        *self.state.borrow_mut().live.entry(kind).or_insert(0) += 1;
        h
    }

    fn release<H: Handle>(&self, kind: &'static str, handle: H) {
        if handle.as_raw() != 0 {
            *self.state.borrow_mut().live.entry(kind).or_insert(0) -= 1;
        }
    }

    fn check(&self, call: &'static str) -> VkResult<()> {
        self.state.borrow_mut().check(call)
    }

    fn log(&self, call: &'static str) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Gpu for FakeGpu {
    fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(0x5)
    }

    unsafe fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        self.check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        Ok(self.state.borrow().caps)
    }

    unsafe fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.borrow().formats.clone())
    }

    unsafe fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.borrow().present_modes.clone())
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        self.check("vkCreateSwapchainKHR")?;
        let sc: vk::SwapchainKHR = self.mint("swapchain");
        let mut s = self.state.borrow_mut();
        s.swapchain_images.insert(sc.as_raw(), info.min_image_count);
        s.next_image = 0;
        s.swapchains_created += 1;
        s.last_swapchain = Some(SwapchainRecord {
            extent: info.image_extent,
            min_image_count: info.min_image_count,
            format: info.image_format,
            color_space: info.image_color_space,
            present_mode: info.present_mode,
            sharing_mode: info.image_sharing_mode,
            family_count: info.queue_family_index_count,
            pre_transform: info.pre_transform,
        });
        Ok(sc)
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.state
            .borrow_mut()
            .swapchain_images
            .remove(&swapchain.as_raw());
        self.release("swapchain", swapchain);
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let count = self
            .state
            .borrow()
            .swapchain_images
            .get(&swapchain.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        Ok((0..count).map(|_| self.raw_handle()).collect())
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        _semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.borrow_mut();
        s.calls.push("vkAcquireNextImageKHR");
        let count = s
            .swapchain_images
            .get(&swapchain.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let suboptimal = match s.acquire_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => false,
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(err) => return Err(err),
        };
        let index = match s.forced_images.pop_front() {
            Some(i) => i % count,
            None => {
                let i = s.next_image % count;
                s.next_image += 1;
                i
            }
        };
        Ok((index, suboptimal))
    }

    unsafe fn queue_present(
        &self,
        _queue: vk::Queue,
        info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        s.calls.push("vkQueuePresentKHR");
        if info.swapchain_count > 0 && !info.p_image_indices.is_null() {
            s.presents.push(*info.p_image_indices);
        }
        match s.present_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => Ok(false),
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(err) => Err(err),
        }
    }

    unsafe fn create_image_view(
        &self,
        _info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        self.check("vkCreateImageView")?;
        Ok(self.mint("image_view"))
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.release("image_view", view);
    }

    unsafe fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        self.check("vkCreateRenderPass")?;
        let att = &*info.p_attachments;
        let dep = (info.dependency_count > 0).then(|| *info.p_dependencies);
        self.state.borrow_mut().last_render_pass = Some(RenderPassRecord {
            attachments: info.attachment_count,
            load_op: att.load_op,
            store_op: att.store_op,
            initial_layout: att.initial_layout,
            final_layout: att.final_layout,
            subpasses: info.subpass_count,
            dependencies: info.dependency_count,
            dependency_src_subpass: dep.map_or(0, |d| d.src_subpass),
            dependency_dst_stage: dep.map_or(vk::PipelineStageFlags::empty(), |d| d.dst_stage_mask),
        });
        Ok(self.mint("render_pass"))
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release("render_pass", render_pass);
    }

    unsafe fn create_framebuffer(
        &self,
        _info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        self.check("vkCreateFramebuffer")?;
        Ok(self.mint("framebuffer"))
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release("framebuffer", framebuffer);
    }

    unsafe fn create_shader_module(&self, _code: &[u32]) -> VkResult<vk::ShaderModule> {
        self.check("vkCreateShaderModule")?;
        Ok(self.mint("shader_module"))
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.release("shader_module", module);
    }

    unsafe fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        self.check("vkCreatePipelineLayout")?;
        Ok(self.mint("pipeline_layout"))
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.release("pipeline_layout", layout);
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        self.check("vkCreateGraphicsPipelines")?;
        let vi = &*info.p_vertex_input_state;
        let ia = &*info.p_input_assembly_state;
        let rs = &*info.p_rasterization_state;
        let ms = &*info.p_multisample_state;
        let cb = &*info.p_color_blend_state;
        let ds = &*info.p_dynamic_state;
        let blend = (*cb.p_attachments).blend_enable;
        let dynamic_states =
            std::slice::from_raw_parts(ds.p_dynamic_states, ds.dynamic_state_count as usize)
                .to_vec();
        self.state.borrow_mut().last_pipeline = Some(PipelineRecord {
            stages: info.stage_count,
            vertex_bindings: vi.vertex_binding_description_count,
            vertex_attributes: vi.vertex_attribute_description_count,
            topology: ia.topology,
            polygon_mode: rs.polygon_mode,
            cull_mode: rs.cull_mode,
            front_face: rs.front_face,
            samples: ms.rasterization_samples,
            blend_enable: blend,
            dynamic_states,
            render_pass: info.render_pass,
        });
        Ok(self.mint("pipeline"))
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.release("pipeline", pipeline);
    }

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        self.check("vkCreateCommandPool")?;
        self.state.borrow_mut().last_command_pool = Some((info.queue_family_index, info.flags));
        Ok(self.mint("command_pool"))
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.release("command_pool", pool);
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        self.check("vkAllocateCommandBuffers")?;
        Ok((0..info.command_buffer_count)
            .map(|_| self.mint("command_buffer"))
            .collect())
    }

    unsafe fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for &b in buffers {
            self.release("command_buffer", b);
        }
    }

    unsafe fn reset_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        self.log("vkResetCommandBuffer");
        self.check("vkResetCommandBuffer")
    }

    unsafe fn begin_command_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        self.log("vkBeginCommandBuffer");
        self.check("vkBeginCommandBuffer")?;
        if !info.flags.contains(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT) {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        Ok(())
    }

    unsafe fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        self.log("vkEndCommandBuffer");
        self.check("vkEndCommandBuffer")
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        _cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
    ) {
        self.log("vkCmdBeginRenderPass");
        let clear_color = if info.clear_value_count > 0 {
            (*info.p_clear_values).color.float32
        } else {
            [0.0; 4]
        };
        self.state.borrow_mut().last_begin = Some(RenderPassBeginRecord {
            framebuffer: info.framebuffer,
            extent: info.render_area.extent,
            clear_values: info.clear_value_count,
            clear_color,
        });
    }

    unsafe fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.log("vkCmdEndRenderPass");
    }

    unsafe fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, _pipeline: vk::Pipeline) {
        self.log("vkCmdBindPipeline");
    }

    unsafe fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, _viewport: vk::Viewport) {
        self.log("vkCmdSetViewport");
    }

    unsafe fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, _scissor: vk::Rect2D) {
        self.log("vkCmdSetScissor");
    }

    unsafe fn cmd_draw(&self, _cmd: vk::CommandBuffer, _vertex_count: u32, _instance_count: u32) {
        self.log("vkCmdDraw");
    }

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        self.check("vkCreateSemaphore")?;
        Ok(self.mint("semaphore"))
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release("semaphore", semaphore);
    }

    unsafe fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        self.check("vkCreateFence")?;
        let fence: vk::Fence = self.mint("fence");
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.state.borrow_mut().fences.insert(fence.as_raw(), state);
        Ok(fence)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        self.state.borrow_mut().fences.remove(&fence.as_raw());
        self.release("fence", fence);
    }

    unsafe fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        self.check("vkWaitForFences")?;
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let stalled = s.stall_fences;
        let entry = s
            .fences
            .get_mut(&fence.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        match *entry {
            FenceState::Signaled => Ok(()),
            FenceState::Pending if !stalled => {
                *entry = FenceState::Signaled;
                Ok(())
            }
            // Unsignaled with nothing submitted would hang a real device.
            FenceState::Pending | FenceState::Unsignaled => {
                s.blocked_waits += 1;
                Err(vk::Result::TIMEOUT)
            }
        }
    }

    unsafe fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.check("vkResetFences")?;
        let mut s = self.state.borrow_mut();
        let entry = s
            .fences
            .get_mut(&fence.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        *entry = FenceState::Unsignaled;
        Ok(())
    }

    unsafe fn queue_submit(
        &self,
        _queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        self.log("vkQueueSubmit");
        self.check("vkQueueSubmit")?;
        let mut s = self.state.borrow_mut();
        for info in submits {
            let has_stage =
                info.wait_semaphore_count > 0 && !info.p_wait_dst_stage_mask.is_null();
            let wait_stage = has_stage.then(|| *info.p_wait_dst_stage_mask);
            s.submits.push(SubmitRecord {
                command_buffers: info.command_buffer_count,
                wait_semaphores: info.wait_semaphore_count,
                signal_semaphores: info.signal_semaphore_count,
                wait_stage,
                fence,
            });
        }
        if fence != vk::Fence::null() {
            s.fences.insert(fence.as_raw(), FenceState::Pending);
        }
        Ok(())
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.idle_waits += 1;
        s.check("vkDeviceWaitIdle")?;
        if !s.stall_fences {
            for f in s.fences.values_mut() {
                if *f == FenceState::Pending {
                    *f = FenceState::Signaled;
                }
            }
        }
        Ok(())
    }
}
