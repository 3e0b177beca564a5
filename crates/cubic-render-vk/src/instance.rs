// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::VkConfig;
use crate::error::{VkError, VkResultExt};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// First name in `required` that `available` lacks.
pub fn first_missing<'a>(required: &[&'a CStr], available: &[&CStr]) -> Option<&'a CStr> {
    required
        .iter()
        .copied()
        .find(|r| !available.contains(r))
}

/// Creates the instance with the window-system extensions, plus debug utils and
/// the validation layer when `config.validation` is set. Anything missing is fatal.
pub unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    config: &VkConfig,
) -> Result<Instance, VkError> {
    let app_name =
        CString::new(config.app_name.as_str()).unwrap_or_else(|_| c"CubicEngine".to_owned());

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: 0,
        p_engine_name: c"CubicEngine".as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .vk_call("enumerate_required_extensions")?
        .to_vec();
    if config.validation {
        extensions.push(debug_utils::NAME.as_ptr());
    }

    let props = entry
        .enumerate_instance_extension_properties(None)
        .vk_call("vkEnumerateInstanceExtensionProperties")?;
    let available: Vec<&CStr> = props
        .iter()
        .map(|p| CStr::from_ptr(p.extension_name.as_ptr()))
        .collect();
    let required: Vec<&CStr> = extensions.iter().map(|&p| CStr::from_ptr(p)).collect();
    if let Some(missing) = first_missing(&required, &available) {
        let name = missing.to_string_lossy().into_owned();
        error!(fatal = true, "instance extension {name} is not available");
        return Err(VkError::MissingInstanceExtension(name));
    }

    let layers: Vec<*const c_char> = if config.validation {
        let props = entry
            .enumerate_instance_layer_properties()
            .vk_call("vkEnumerateInstanceLayerProperties")?;
        let available: Vec<&CStr> = props
            .iter()
            .map(|p| CStr::from_ptr(p.layer_name.as_ptr()))
            .collect();
        if let Some(missing) = first_missing(&[VALIDATION_LAYER], &available) {
            let name = missing.to_string_lossy().into_owned();
            error!(fatal = true, "layer {name} is not available; install it or disable validation");
            return Err(VkError::MissingLayer(name));
        }
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .vk_call("vkCreateInstance")?;

    let version = entry
        .try_enumerate_instance_version()
        .ok()
        .flatten()
        .unwrap_or(vk::API_VERSION_1_0);
    info!(
        "Vulkan instance ready (loader {}.{}.{}, {} extensions, validation={})",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version),
        extensions.len(),
        config.validation
    );
    Ok(instance)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    type S = vk::DebugUtilsMessageSeverityFlagsEXT;
    if severity.contains(S::ERROR) {
        error!(?types, "[Vulkan] {msg}");
    } else if severity.contains(S::WARNING) {
        warn!(?types, "[Vulkan] {msg}");
    } else if severity.contains(S::INFO) {
        debug!(?types, "[Vulkan] {msg}");
    } else {
        trace!(?types, "[Vulkan] {msg}");
    }
    vk::FALSE
}

/// Routes validation output into tracing for the life of the instance.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self, VkError> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let handle = loader
            .create_debug_utils_messenger(&ci, None)
            .vk_call("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, handle })
    }

    pub unsafe fn destroy(self) {
        self.loader.destroy_debug_utils_messenger(self.handle, None);
    }
}
