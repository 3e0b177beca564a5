// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use cubic_render::RenderSize;
use tracing::{info, warn};

use crate::config::PresentModePreference;
use crate::device::QueueFamilies;
use crate::error::{VkError, VkResultExt};
use crate::gpu::Gpu;

/// Working size used when neither the surface nor the caller reports one.
pub const DEFAULT_EXTENT: vk::Extent2D = vk::Extent2D {
    width: 800,
    height: 600,
};

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Surface state queried fresh for every create.
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn query<G: Gpu>(gpu: &G) -> Result<Self, VkError> {
        Ok(Self {
            capabilities: gpu
                .surface_capabilities()
                .vk_call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
            formats: gpu
                .surface_formats()
                .vk_call("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
            present_modes: gpu
                .surface_present_modes()
                .vk_call("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
        })
    }
}

/// BGRA8 sRGB / sRGB-nonlinear if offered, otherwise the first entry.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
}

/// FIFO is always available, so it is the fallback for every preference.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentModePreference,
) -> vk::PresentModeKHR {
    match pref {
        PresentModePreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    let current = caps.current_extent;
    let base = if current.width == u32::MAX {
        // Surface lets the swapchain decide.
        if want.is_zero() {
            DEFAULT_EXTENT
        } else {
            vk::Extent2D {
                width: want.width,
                height: want.height,
            }
        }
    } else if current.width == 0 || current.height == 0 {
        DEFAULT_EXTENT
    } else {
        current
    };
    // max-then-min so an inverted range cannot panic like `clamp` would.
    vk::Extent2D {
        width: base
            .width
            .max(caps.min_image_extent.width)
            .min(caps.max_image_extent.width),
        height: base
            .height
            .max(caps.min_image_extent.height)
            .min(caps.max_image_extent.height),
    }
}

/// One image beyond the minimum, capped by the maximum when there is one.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count.saturating_add(1);
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub fn choose_sharing(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics != families.present {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

fn choose_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

// Info only
pub(crate) fn format_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}

pub(crate) fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// A swapchain and the views over its images. Rebuilt wholesale, never patched.
#[derive(Debug)]
pub struct SwapchainContext {
    pub handle: vk::SwapchainKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    /// Owned by the presentation engine.
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    /// Index returned by the last successful acquire.
    pub image_index: Option<u32>,
}

impl SwapchainContext {
    /// Creates the swapchain and one view per image. On error nothing is left behind.
    pub unsafe fn create<G: Gpu>(
        gpu: &G,
        families: &QueueFamilies,
        want: RenderSize,
        pref: PresentModePreference,
    ) -> Result<Self, VkError> {
        let support = SwapchainSupport::query(gpu)?;
        let caps = &support.capabilities;

        let Some(surface_format) = choose_surface_format(&support.formats) else {
            warn!("surface reports no formats");
            return Err(VkError::NoSurfaceFormat);
        };
        let present_mode = choose_present_mode(&support.present_modes, pref);
        let extent = choose_extent(caps, want);
        if extent.width == 0 || extent.height == 0 {
            return Err(VkError::ZeroExtent {
                width: extent.width,
                height: extent.height,
            });
        }
        let min_image_count = choose_image_count(caps);
        let (sharing_mode, family_indices) = choose_sharing(families);

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: gpu.surface(),
            min_image_count,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: choose_transform(caps),
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let handle = gpu.create_swapchain(&info).vk_call("vkCreateSwapchainKHR")?;
        let images = match gpu.swapchain_images(handle).vk_call("vkGetSwapchainImagesKHR") {
            Ok(images) => images,
            Err(e) => {
                gpu.destroy_swapchain(handle);
                return Err(e);
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_view(gpu, image, surface_format.format) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for &v in &image_views {
                        gpu.destroy_image_view(v);
                    }
                    gpu.destroy_swapchain(handle);
                    return Err(e);
                }
            }
        }

        info!(
            "swapchain ready: {}x{}, {} / {:?}, {}, {} images",
            extent.width,
            extent.height,
            format_name(surface_format.format),
            surface_format.color_space,
            present_mode_name(present_mode),
            images.len()
        );

        Ok(Self {
            handle,
            surface_format,
            present_mode,
            extent,
            images,
            image_views,
            image_index: None,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroys views then the swapchain. The device must be idle.
    pub unsafe fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for v in self.image_views.drain(..) {
            gpu.destroy_image_view(v);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
        self.image_index = None;
    }
}

unsafe fn create_view<G: Gpu>(
    gpu: &G,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView, VkError> {
    let info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        components: vk::ComponentMapping::default(),
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    gpu.create_image_view(&info).vk_call("vkCreateImageView")
}
