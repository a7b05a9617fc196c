// SPDX-License-Identifier: CEPL-1.0
//! Instance creation and the bridge from `VK_EXT_debug_utils` into a
//! [`DiagnosticSink`].
use std::ffi::{c_void, CStr};
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use tracing::{info, warn};
use vkswap_core::{DiagnosticSink, Severity};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub(crate) fn severity_of(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Severity {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if flags.contains(S::ERROR) {
        Severity::Error
    } else if flags.contains(S::WARNING) {
        Severity::Warning
    } else if flags.contains(S::INFO) {
        Severity::Info
    } else {
        Severity::Verbose
    }
}

pub(crate) fn kind_of(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    use vk::DebugUtilsMessageTypeFlagsEXT as T;
    if types.contains(T::VALIDATION) {
        "validation"
    } else if types.contains(T::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || user.is_null() {
        return vk::FALSE;
    }
    // SAFETY: `user` is the boxed sink owned by the DebugBridge, which
    // outlives the messenger.
    let sink = unsafe { &*(user as *const Arc<dyn DiagnosticSink>) };
    let msg = unsafe { (*data).p_message };
    if msg.is_null() {
        return vk::FALSE;
    }
    let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy();
    sink.message(severity_of(severity), kind_of(types), &text);
    vk::FALSE
}

/// Debug messenger plus the sink its callback writes to.
pub(crate) struct DebugBridge {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    // boxed so the callback's pointer stays put when the bridge moves
    _sink: Box<Arc<dyn DiagnosticSink>>,
}

impl DebugBridge {
    pub(crate) unsafe fn new(
        entry: &Entry,
        instance: &Instance,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        let sink = Box::new(sink);
        let user = &*sink as *const Arc<dyn DiagnosticSink> as *mut c_void;
        let ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(user);
        let loader = debug_utils::Instance::new(entry, instance);
        let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .context("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self {
            loader,
            messenger,
            _sink: sink,
        })
    }

    /// Must run before the instance is destroyed.
    pub(crate) unsafe fn destroy(&self) {
        unsafe { self.loader.destroy_debug_utils_messenger(self.messenger, None) };
    }
}

fn has_layer(entry: &Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name))
}

/// Creates the instance with the backend's surface extensions. Returns
/// whether validation ended up enabled; a missing layer only warns.
pub(crate) unsafe fn create_instance(
    entry: &Entry,
    surface_extensions: &[&CStr],
    validation: bool,
) -> Result<(Instance, bool)> {
    let validation = validation && {
        let found = has_layer(entry, VALIDATION_LAYER);
        if !found {
            warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
        }
        found
    };

    let mut extensions: Vec<_> = surface_extensions.iter().map(|e| e.as_ptr()).collect();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
    }
    let layers = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"vkswap")
        .engine_name(c"vkswap")
        .api_version(vk::API_VERSION_1_1);
    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .context("vkCreateInstance")?;
    info!(
        "instance: {} extensions, validation {}",
        extensions.len(),
        if validation { "on" } else { "off" }
    );
    Ok((instance, validation))
}
