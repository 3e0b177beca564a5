// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{CommandError, VkError, VkResultExt};
use crate::gpu::Gpu;

/// Lifecycle of one command buffer.
///
/// `NotAllocated -> Ready -> Recording -> InRenderPass -> Recording ->
/// RecordingEnd -> Submitted -> Ready`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    NotAllocated,
    Ready,
    Recording,
    InRenderPass,
    RecordingEnd,
    Submitted,
}

#[derive(Debug)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    pub unsafe fn allocate<G: Gpu>(
        gpu: &G,
        pool: vk::CommandPool,
        primary: bool,
    ) -> Result<Self, VkError> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: if primary {
                vk::CommandBufferLevel::PRIMARY
            } else {
                vk::CommandBufferLevel::SECONDARY
            },
            command_buffer_count: 1,
            ..Default::default()
        };
        let handle = gpu
            .allocate_command_buffers(&info)
            .vk_call("vkAllocateCommandBuffers")?
            .into_iter()
            .next()
            .ok_or_else(|| VkError::call("vkAllocateCommandBuffers", vk::Result::ERROR_UNKNOWN))?;
        Ok(Self {
            handle,
            state: CommandBufferState::Ready,
        })
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    fn require(&self, expected: CommandBufferState) -> Result<(), CommandError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CommandError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// Back to `Ready` from anything except `Submitted` and `NotAllocated`.
    pub unsafe fn reset<G: Gpu>(&mut self, gpu: &G) -> Result<(), CommandError> {
        match self.state {
            CommandBufferState::Submitted | CommandBufferState::NotAllocated => {
                Err(CommandError::InvalidState {
                    expected: CommandBufferState::Ready,
                    actual: self.state,
                })
            }
            _ => {
                gpu.reset_command_buffer(self.handle)
                    .vk_call("vkResetCommandBuffer")?;
                self.state = CommandBufferState::Ready;
                Ok(())
            }
        }
    }

    pub unsafe fn begin<G: Gpu>(
        &mut self,
        gpu: &G,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<(), CommandError> {
        self.require(CommandBufferState::Ready)?;
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags,
            ..Default::default()
        };
        gpu.begin_command_buffer(self.handle, &info)
            .vk_call("vkBeginCommandBuffer")?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub unsafe fn begin_render_pass<G: Gpu>(
        &mut self,
        gpu: &G,
        info: &vk::RenderPassBeginInfo<'_>,
    ) -> Result<(), CommandError> {
        self.require(CommandBufferState::Recording)?;
        gpu.cmd_begin_render_pass(self.handle, info);
        self.state = CommandBufferState::InRenderPass;
        Ok(())
    }

    pub unsafe fn end_render_pass<G: Gpu>(&mut self, gpu: &G) -> Result<(), CommandError> {
        self.require(CommandBufferState::InRenderPass)?;
        gpu.cmd_end_render_pass(self.handle);
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub unsafe fn end<G: Gpu>(&mut self, gpu: &G) -> Result<(), CommandError> {
        self.require(CommandBufferState::Recording)?;
        gpu.end_command_buffer(self.handle)
            .vk_call("vkEndCommandBuffer")?;
        self.state = CommandBufferState::RecordingEnd;
        Ok(())
    }

    /// Submits this buffer alone. Only valid from `RecordingEnd`.
    pub unsafe fn submit<G: Gpu>(
        &mut self,
        gpu: &G,
        queue: vk::Queue,
        wait: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> Result<(), CommandError> {
        self.require(CommandBufferState::RecordingEnd)?;
        debug_assert_eq!(wait.len(), wait_stages.len());
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &self.handle,
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        gpu.queue_submit(queue, std::slice::from_ref(&submit), fence)
            .vk_call("vkQueueSubmit")?;
        self.state = CommandBufferState::Submitted;
        Ok(())
    }

    /// Call once the fence guarding the last submission has signaled.
    pub fn mark_completed(&mut self) {
        if self.state == CommandBufferState::Submitted {
            self.state = CommandBufferState::Ready;
        }
    }

    pub unsafe fn free<G: Gpu>(&mut self, gpu: &G, pool: vk::CommandPool) {
        if self.state != CommandBufferState::NotAllocated {
            gpu.free_command_buffers(pool, &[self.handle]);
            self.handle = vk::CommandBuffer::null();
            self.state = CommandBufferState::NotAllocated;
        }
    }
}

/// Everything one recording needs from the pipeline and swapchain.
#[derive(Clone, Copy, Debug)]
pub struct RecordTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

pub const TRIANGLE_VERTEX_COUNT: u32 = 3;

/// Records clear + triangle into `cmd`, which must be `Ready`.
///
/// On error the buffer is left mid-recording and must be reset, never submitted.
pub unsafe fn record<G: Gpu>(
    gpu: &G,
    cmd: &mut CommandBuffer,
    target: &RecordTarget,
) -> Result<(), CommandError> {
    cmd.begin(gpu, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

    let clears = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: target.clear_color,
        },
    }];
    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: target.extent,
    };
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: target.render_pass,
        framebuffer: target.framebuffer,
        render_area: area,
        clear_value_count: clears.len() as u32,
        p_clear_values: clears.as_ptr(),
        ..Default::default()
    };
    cmd.begin_render_pass(gpu, &rp_begin)?;

    let h = cmd.handle();
    gpu.cmd_bind_pipeline(h, target.pipeline);
    gpu.cmd_set_viewport(
        h,
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: target.extent.width as f32,
            height: target.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        },
    );
    gpu.cmd_set_scissor(h, area);
    gpu.cmd_draw(h, TRIANGLE_VERTEX_COUNT, 1);

    cmd.end_render_pass(gpu)?;
    cmd.end(gpu)
}
