//! Instance creation and management.
//!
//! The [`Instance`] is the connection between the application and the Vulkan
//! loader. It is the first object created and the last one destroyed; every
//! [`PhysicalDevice`](crate::PhysicalDevice) and
//! [`Device`](crate::Device) retains a clone of it, so the raw instance
//! cannot outlive its users.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::borrow::Cow;
//! # use andesite::Instance;
//! let entry = Arc::new(unsafe { ash::Entry::load().unwrap() });
//! let mut builder = Instance::builder(entry);
//! builder.info.application_name = Cow::Borrowed(c"triangle viewer");
//! builder.enable_validation();
//! let instance = builder.build().unwrap();
//! ```

use crate::{Result, utils::Version};
use ash::vk;
use std::{
    borrow::Cow,
    ffi::{CStr, CString, c_char},
    ops::Deref,
    sync::Arc,
};

/// A Vulkan instance wrapper.
///
/// Reference-counted with [`Arc`] for cheap shared access; the raw instance
/// is destroyed when the last clone is dropped.
#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Instance {}

struct InstanceInner {
    entry: Arc<ash::Entry>,
    instance: ash::Instance,
    api_version: Version,
}

/// Configuration for instance creation.
pub struct InstanceCreateInfo {
    /// The application name (shown in debugging tools).
    pub application_name: Cow<'static, CStr>,
    /// The application version.
    pub application_version: Version,
    /// The engine name.
    pub engine_name: Cow<'static, CStr>,
    /// The engine version.
    pub engine_version: Version,
    /// The Vulkan API version to use.
    pub api_version: Version,
}

impl Default for InstanceCreateInfo {
    fn default() -> Self {
        Self {
            application_name: Cow::Borrowed(c"Unnamed Application"),
            application_version: Default::default(),
            engine_name: Cow::Borrowed(c"andesite"),
            engine_version: Default::default(),
            api_version: Version::V1_3,
        }
    }
}

impl Instance {
    /// Creates a new instance builder.
    pub fn builder(entry: Arc<ash::Entry>) -> InstanceBuilder {
        InstanceBuilder::new(entry)
    }

    /// Returns the Vulkan entry point.
    pub fn entry(&self) -> &Arc<ash::Entry> {
        &self.0.entry
    }

    /// Returns the version of the Vulkan API used when creating the instance.
    pub fn api_version(&self) -> Version {
        self.0.api_version
    }
}

impl Deref for Instance {
    type Target = ash::Instance;

    fn deref(&self) -> &Self::Target {
        &self.0.instance
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        tracing::info!(instance = ?self.instance.handle(), "drop instance");
        // Safety: Host synchronization rule for vkDestroyInstance:
        // - Host access to instance must be externally synchronized.
        // We have &mut self and therefore exclusive control on instance.
        // PhysicalDevice and Device retain an Arc to Instance, so none of
        // their handles exist at this point.
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

/// A builder for creating Vulkan instances.
pub struct InstanceBuilder {
    entry: Arc<ash::Entry>,
    enabled_layers: Vec<&'static CStr>,
    enabled_extensions: Vec<CString>,

    /// Instance creation configuration. Modify this to set application metadata.
    pub info: InstanceCreateInfo,
}

impl InstanceBuilder {
    /// Creates a new instance builder with the given entry point.
    pub fn new(entry: Arc<ash::Entry>) -> Self {
        Self {
            entry,
            enabled_layers: Vec::new(),
            enabled_extensions: Vec::new(),
            info: InstanceCreateInfo::default(),
        }
    }

    /// Enables a Vulkan layer by name if the loader reports it as available.
    ///
    /// Returns `true` if the layer was found and enabled.
    pub fn enable_layer(&mut self, layer: &'static CStr) -> bool {
        let available = unsafe { self.entry.enumerate_instance_layer_properties() }
            .unwrap_or_default()
            .into_iter()
            .any(|l| l.layer_name_as_c_str().is_ok_and(|name| name == layer));
        if available {
            self.enabled_layers.push(layer);
        } else {
            tracing::warn!(?layer, "requested layer not available");
        }
        available
    }

    /// Enables `VK_LAYER_KHRONOS_validation` when present.
    pub fn enable_validation(&mut self) -> bool {
        self.enable_layer(c"VK_LAYER_KHRONOS_validation")
    }

    /// Enables an instance extension by name.
    ///
    /// Extension names typically come from the windowing layer; no
    /// availability check is performed here, instance creation reports
    /// missing extensions.
    pub fn enable_extension(&mut self, name: &CStr) {
        self.enabled_extensions.push(name.to_owned());
    }

    /// Builds the Vulkan instance with the current configuration.
    pub fn build(self) -> Result<Instance> {
        let application_info = vk::ApplicationInfo {
            p_application_name: self.info.application_name.as_ptr(),
            application_version: self.info.application_version.0,
            p_engine_name: self.info.engine_name.as_ptr(),
            engine_version: self.info.engine_version.0,
            api_version: self.info.api_version.0,
            ..Default::default()
        };

        let layer_names = self
            .enabled_layers
            .iter()
            .map(|name| name.as_ptr())
            .collect::<Vec<_>>();
        let extension_names = self
            .enabled_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect::<Vec<*const c_char>>();
        let create_info = vk::InstanceCreateInfo {
            p_application_info: &application_info,
            enabled_layer_count: layer_names.len() as u32,
            pp_enabled_layer_names: layer_names.as_ptr(),
            enabled_extension_count: extension_names.len() as u32,
            pp_enabled_extension_names: extension_names.as_ptr(),
            ..Default::default()
        };
        // Safety: No Host synchronization rules for vkCreateInstance.
        let instance = unsafe { self.entry.create_instance(&create_info, None)? };
        tracing::info!(
            api_version = %self.info.api_version,
            layers = ?self.enabled_layers,
            "created instance"
        );
        Ok(Instance(Arc::new(InstanceInner {
            entry: self.entry,
            instance,
            api_version: self.info.api_version,
        })))
    }
}
