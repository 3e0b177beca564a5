// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;
use tracing::error;

use crate::command::CommandBufferState;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("vulkan loader unavailable: {0}")]
    Loader(#[from] ash::LoadingError),
    #[error("window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),
    #[error("required instance extension {0} is not available")]
    MissingInstanceExtension(String),
    #[error("required layer {0} is not available")]
    MissingLayer(String),
    #[error("no physical device provides graphics, present and transfer queues")]
    NoSuitableDevice,
    #[error("surface reports no formats")]
    NoSurfaceFormat,
    #[error("swapchain extent would be {width}x{height}")]
    ZeroExtent { width: u32, height: u32 },
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("{call} failed: {result}")]
    Call {
        call: &'static str,
        result: vk::Result,
    },
}

impl VkError {
    pub fn call(call: &'static str, result: vk::Result) -> Self {
        error!(call, %result, "vulkan call failed");
        VkError::Call { call, result }
    }

    /// The raw result of a failed GPU call, if this error came from one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            VkError::Call { result, .. } => Some(*result),
            _ => None,
        }
    }
}

pub(crate) trait VkResultExt<T> {
    /// Converts a failed call into [`VkError::Call`], logging it on the way.
    fn vk_call(self, call: &'static str) -> Result<T, VkError>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn vk_call(self, call: &'static str) -> Result<T, VkError> {
        self.map_err(|result| VkError::call(call, result))
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command buffer is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: CommandBufferState,
        actual: CommandBufferState,
    },
    #[error("no framebuffer or pipeline for swapchain image {image}")]
    MissingTarget { image: usize },
    #[error(transparent)]
    Vk(#[from] VkError),
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader {name} not found")]
    NotFound { name: String },
    #[error("failed to read shader {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("shader {name} is not valid SPIR-V: {source}")]
    InvalidSpirv {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame slot {slot} fence did not signal within {timeout_ns} ns")]
    FenceTimeout { slot: usize, timeout_ns: u64 },
    #[error("device lost")]
    DeviceLost,
    #[error("renderer is not initialized")]
    NotInitialized,
    #[error("renderer has been shut down")]
    ShutDown,
    #[error("command recording failed: {0}")]
    Record(#[from] CommandError),
    #[error(transparent)]
    Vk(#[from] VkError),
}
