// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;

use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::{debug, error, info, warn};

use crate::ash_gpu::AshGpu;
use crate::error::{VkError, VkResultExt};
use crate::gpu::Gpu;
use crate::instance::VALIDATION_LAYER;

/// Per-role family indices while a device is being inspected. `None` = unset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.complete().is_some()
    }

    pub fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
            transfer: self.transfer?,
            compute: self.compute,
        })
    }
}

/// Families resolved at selection time and reused by every swapchain build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
    pub compute: Option<u32>,
}

impl QueueFamilies {
    /// Distinct families that need a queue, ascending.
    pub fn unique(&self) -> Vec<u32> {
        let mut v = vec![self.graphics, self.present, self.transfer];
        v.sort_unstable();
        v.dedup();
        v
    }
}

#[derive(Clone, Copy, Debug)]
pub struct QueueFamilyCaps {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    /// Can present to the session surface.
    pub present: bool,
}

/// What selection needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub families: Vec<QueueFamilyCaps>,
    pub has_swapchain: bool,
}

fn first_family(
    families: &[QueueFamilyCaps],
    pred: impl Fn(&QueueFamilyCaps) -> bool,
) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_count > 0 && pred(f))
        .map(|i| i as u32)
}

pub fn find_queue_families(families: &[QueueFamilyCaps]) -> QueueFamilyIndices {
    let graphics = first_family(families, |f| f.flags.contains(vk::QueueFlags::GRAPHICS));
    let present = graphics
        .filter(|&g| families[g as usize].present)
        .or_else(|| first_family(families, |f| f.present));
    let compute = first_family(families, |f| f.flags.contains(vk::QueueFlags::COMPUTE));
    // Graphics and compute families accept transfer work even when they don't say so.
    let transfer = first_family(families, |f| {
        f.flags.contains(vk::QueueFlags::TRANSFER) && !f.flags.contains(vk::QueueFlags::GRAPHICS)
    })
    .or_else(|| {
        first_family(families, |f| {
            f.flags.intersects(
                vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            )
        })
    });

    QueueFamilyIndices {
        graphics,
        present,
        compute,
        transfer,
    }
}

fn yes(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "-"
    }
}

fn log_capability_table(index: usize, c: &DeviceCandidate, q: &QueueFamilyIndices, suitable: bool) {
    info!(
        "GPU {index}: {} ({:?}), swapchain={}",
        c.name,
        c.device_type,
        yes(c.has_swapchain)
    );
    info!("  Family | Queues | Graphics | Present | Compute | Transfer");
    for (i, f) in c.families.iter().enumerate() {
        info!(
            "  {:>6} | {:>6} | {:>8} | {:>7} | {:>7} | {:>8}",
            i,
            f.queue_count,
            yes(f.flags.contains(vk::QueueFlags::GRAPHICS)),
            yes(f.present),
            yes(f.flags.contains(vk::QueueFlags::COMPUTE)),
            yes(f.flags.contains(vk::QueueFlags::TRANSFER)),
        );
    }
    info!(
        "  resolved graphics={:?} present={:?} compute={:?} transfer={:?} -> {}",
        q.graphics,
        q.present,
        q.compute,
        q.transfer,
        if suitable { "suitable" } else { "unsuitable" }
    );
}

/// First suitable device in enumeration order. No scoring beyond suitability.
pub fn select_device(candidates: &[DeviceCandidate]) -> Option<(usize, QueueFamilies)> {
    let mut chosen = None;
    for (i, c) in candidates.iter().enumerate() {
        let q = find_queue_families(&c.families);
        let resolved = q.complete().filter(|_| c.has_swapchain);
        log_capability_table(i, c, &q, resolved.is_some());
        if chosen.is_none() {
            chosen = resolved.map(|f| (i, f));
        }
    }
    chosen
}

#[derive(Clone, Copy, Debug)]
pub struct DeviceQueues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
}

/// Selected device, its queues and the graphics command pool.
pub struct DeviceContext {
    pub physical: vk::PhysicalDevice,
    pub name: String,
    pub families: QueueFamilies,
    pub queues: DeviceQueues,
    pub command_pool: vk::CommandPool,
    /// Filled from the physical device once it is selected; empty under test.
    pub memory: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    pub unsafe fn new<G: Gpu>(
        gpu: &G,
        physical: vk::PhysicalDevice,
        name: String,
        families: QueueFamilies,
        queues: DeviceQueues,
    ) -> Result<Self, VkError> {
        let command_pool = create_command_pool(gpu, families.graphics)?;
        Ok(Self {
            physical,
            name,
            families,
            queues,
            command_pool,
            memory: vk::PhysicalDeviceMemoryProperties::default(),
        })
    }

    /// See [`find_memory_type`].
    pub fn memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Option<u32> {
        find_memory_type(&self.memory, type_bits, required)
    }

    /// Destroys the command pool. Every buffer from it must already be freed.
    pub unsafe fn destroy<G: Gpu>(&mut self, gpu: &G) {
        if self.command_pool != vk::CommandPool::null() {
            gpu.destroy_command_pool(self.command_pool);
            self.command_pool = vk::CommandPool::null();
        }
    }
}

/// First memory type allowed by `type_bits` (a `VkMemoryRequirements` mask)
/// that has every `required` property flag. Logs a warning when there is none.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (memory.memory_type_count as usize).min(memory.memory_types.len());
    let found = memory.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, t)| type_bits & (1 << i) != 0 && t.property_flags.contains(required))
        .map(|(i, _)| i as u32);
    if found.is_none() {
        warn!(type_bits, ?required, "no compatible memory type");
    }
    found
}

pub unsafe fn create_command_pool<G: Gpu>(
    gpu: &G,
    family: u32,
) -> Result<vk::CommandPool, VkError> {
    let info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        queue_family_index: family,
        ..Default::default()
    };
    gpu.create_command_pool(&info).vk_call("vkCreateCommandPool")
}

unsafe fn describe(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> DeviceCandidate {
    let props = instance.get_physical_device_properties(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();

    let families = instance
        .get_physical_device_queue_family_properties(phys)
        .iter()
        .enumerate()
        .map(|(i, q)| QueueFamilyCaps {
            flags: q.queue_flags,
            queue_count: q.queue_count,
            present: surface_loader
                .get_physical_device_surface_support(phys, i as u32, surface)
                .unwrap_or(false),
        })
        .collect();

    let has_swapchain = match instance.enumerate_device_extension_properties(phys) {
        Ok(exts) => exts
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME),
        Err(e) => {
            debug!("{name}: enumerate_device_extension_properties failed: {e}");
            false
        }
    };

    DeviceCandidate {
        name,
        device_type: props.device_type,
        families,
        has_swapchain,
    }
}

/// Picks the device, creates it with one queue per unique family, and wraps it.
pub unsafe fn initialize(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    validation: bool,
) -> Result<(AshGpu, DeviceContext), VkError> {
    let physicals = instance
        .enumerate_physical_devices()
        .vk_call("vkEnumeratePhysicalDevices")?;
    let candidates: Vec<DeviceCandidate> = physicals
        .iter()
        .map(|&p| describe(instance, surface_loader, surface, p))
        .collect();

    let Some((index, families)) = select_device(&candidates) else {
        error!(
            fatal = true,
            devices = candidates.len(),
            "no GPU offers graphics, present and transfer queues with swapchain support"
        );
        return Err(VkError::NoSuitableDevice);
    };
    let phys = physicals[index];
    let name = candidates[index].name.clone();

    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts = [swapchain::NAME.as_ptr()];
    // Device layers are deprecated but older loaders still honour them.
    let layers = [VALIDATION_LAYER.as_ptr()];
    let (layer_count, layer_names) = if validation {
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0, std::ptr::null())
    };
    let features = vk::PhysicalDeviceFeatures::default();

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_layer_count: layer_count,
        pp_enabled_layer_names: layer_names,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    let device = instance
        .create_device(phys, &dinfo, None)
        .vk_call("vkCreateDevice")?;
    let queues = DeviceQueues {
        graphics: device.get_device_queue(families.graphics, 0),
        present: device.get_device_queue(families.present, 0),
        transfer: device.get_device_queue(families.transfer, 0),
    };
    let gpu = AshGpu::new(instance, device, surface_loader.clone(), phys, surface);

    match DeviceContext::new(&gpu, phys, name, families, queues) {
        Ok(mut ctx) => {
            ctx.memory = instance.get_physical_device_memory_properties(phys);
            info!(
                "Selected GPU: {} (graphics={}, present={}, transfer={})",
                ctx.name, families.graphics, families.present, families.transfer
            );
            Ok((gpu, ctx))
        }
        Err(e) => {
            gpu.destroy_device();
            Err(e)
        }
    }
}
