// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

/// Size the window opens with when the config does not say otherwise.
pub const DEFAULT_WINDOW_SIZE: (u32, u32) = (800, 600);

pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    let (dw, dh) = DEFAULT_WINDOW_SIZE;
    let size = PhysicalSize::new(
        if width == 0 { dw } else { width },
        if height == 0 { dh } else { height },
    );
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(size)
}

/// Current drawable size in physical pixels. Zero while minimized on some platforms.
pub fn drawable_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}
