// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    /// MAILBOX when the surface offers it, FIFO otherwise.
    #[default]
    Mailbox,
    /// Always FIFO.
    Fifo,
}

/// Everything the Vulkan backend needs from the outside. No I/O happens here.
#[derive(Clone, Debug)]
pub struct VkConfig {
    pub app_name: String,
    /// Enables `VK_LAYER_KHRONOS_validation` and the debug messenger.
    /// A missing layer is fatal when this is on.
    pub validation: bool,
    pub present_mode: PresentModePreference,
    pub clear_color: [f32; 4],
    /// Bound on the per-slot fence wait. `None` waits forever.
    pub fence_timeout: Option<Duration>,
    /// Directory holding `<name>.spv` files. `None` uses the embedded shaders.
    pub shader_dir: Option<PathBuf>,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            app_name: "CubicEngine".to_owned(),
            validation: cfg!(debug_assertions),
            present_mode: PresentModePreference::Mailbox,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout: None,
            shader_dir: None,
        }
    }
}

impl VkConfig {
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout
            .map_or(u64::MAX, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}
