//! Physical device enumeration and capability selection.
//!
//! [`PhysicalDevice`] caches the plain-data properties a ray tracing front
//! end keeps coming back to: memory types, queue families, and the
//! shader-group properties of `VK_KHR_ray_tracing_pipeline`.
//!
//! Capability selection is an explicit, order-independent configuration:
//! [`DeviceCapabilities`] names each capability with a [`Requirement`], and
//! [`DeviceCapabilities::check`] resolves it against the hardware once,
//! before any logical device exists. A missing `Required` capability fails
//! with [`Error::UnsupportedDevice`](crate::Error::UnsupportedDevice);
//! a missing `Optional` one is silently disabled.

use crate::{Error, Instance, Result, utils::Version};
use ash::vk;
use std::{ffi::CStr, sync::Arc};

/// A physical device (GPU) visible through an [`Instance`].
///
/// Cheap to clone; all properties are queried once at enumeration time.
#[derive(Clone)]
pub struct PhysicalDevice(Arc<PhysicalDeviceInner>);
impl PartialEq for PhysicalDevice {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for PhysicalDevice {}

struct PhysicalDeviceInner {
    instance: Instance,
    handle: vk::PhysicalDevice,
    properties: PhysicalDeviceProperties,
}

/// Plain-data snapshot of the properties queried at enumeration time.
pub struct PhysicalDeviceProperties {
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: Version,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Zeroed when `VK_KHR_ray_tracing_pipeline` is not available.
    pub ray_tracing: RayTracingProperties,
}

/// Shader-group sizing properties from
/// `VkPhysicalDeviceRayTracingPipelinePropertiesKHR`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RayTracingProperties {
    pub shader_group_handle_size: u32,
    pub shader_group_base_alignment: u32,
    pub shader_group_handle_alignment: u32,
    pub max_ray_recursion_depth: u32,
}

impl Instance {
    /// Enumerates all physical devices, caching their properties.
    pub fn enumerate_physical_devices(&self) -> Result<Vec<PhysicalDevice>> {
        // Safety: no host synchronization rules for vkEnumeratePhysicalDevices.
        let handles = unsafe { ash::Instance::enumerate_physical_devices(self)? };
        Ok(handles
            .into_iter()
            .map(|handle| PhysicalDevice::new(self.clone(), handle))
            .collect())
    }
}

impl PhysicalDevice {
    fn new(instance: Instance, handle: vk::PhysicalDevice) -> Self {
        let extensions = supported_extension_names(&instance, handle);
        let has_rt_pipeline = extensions
            .iter()
            .any(|name| name.as_c_str() == ash::khr::ray_tracing_pipeline::NAME);

        let mut rt_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut properties2 = vk::PhysicalDeviceProperties2::default();
        if has_rt_pipeline {
            properties2 = properties2.push_next(&mut rt_props);
        }
        unsafe {
            instance.get_physical_device_properties2(handle, &mut properties2);
        }
        let memory = unsafe { instance.get_physical_device_memory_properties(handle) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };

        let device_name = properties2
            .properties
            .device_name_as_c_str()
            .unwrap_or(c"unknown device")
            .to_string_lossy()
            .into_owned();
        let device_type = properties2.properties.device_type;
        let api_version = Version(properties2.properties.api_version);
        let properties = PhysicalDeviceProperties {
            device_name,
            device_type,
            api_version,
            memory,
            queue_families,
            ray_tracing: RayTracingProperties {
                shader_group_handle_size: rt_props.shader_group_handle_size,
                shader_group_base_alignment: rt_props.shader_group_base_alignment,
                shader_group_handle_alignment: rt_props.shader_group_handle_alignment,
                max_ray_recursion_depth: rt_props.max_ray_recursion_depth,
            },
        };
        tracing::info!(
            name = %properties.device_name,
            ty = ?properties.device_type,
            api = %properties.api_version,
            "found physical device"
        );
        Self(Arc::new(PhysicalDeviceInner {
            instance,
            handle,
            properties,
        }))
    }

    pub fn instance(&self) -> &Instance {
        &self.0.instance
    }

    pub fn vk_handle(&self) -> vk::PhysicalDevice {
        self.0.handle
    }

    pub fn properties(&self) -> &PhysicalDeviceProperties {
        &self.0.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.0.properties.memory
    }

    pub fn ray_tracing_properties(&self) -> &RayTracingProperties {
        &self.0.properties.ray_tracing
    }

    /// Finds the first queue family supporting graphics, compute, and
    /// transfer simultaneously.
    ///
    /// All work in this crate runs on one queue from this family; there is
    /// no cross-queue ownership transfer anywhere.
    pub fn find_unified_queue_family(&self) -> Option<u32> {
        let wanted =
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        self.0
            .properties
            .queue_families
            .iter()
            .position(|family| family.queue_flags.contains(wanted))
            .map(|i| i as u32)
    }
}

/// Whether a capability must be present or is merely nice to have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Requirement {
    #[default]
    Required,
    Optional,
}

/// The capability configuration resolved at device-build time.
///
/// Each field names one capability the crate knows how to enable. The
/// default requires all of them, which is what a ray tracing front end
/// needs; turn individual fields to [`Requirement::Optional`] for probing.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceCapabilities {
    /// `bufferDeviceAddress` (Vulkan 1.2 core feature).
    pub buffer_device_address: Requirement,
    /// `VK_KHR_acceleration_structure` plus its
    /// `VK_KHR_deferred_host_operations` dependency.
    pub acceleration_structure: Requirement,
    /// `VK_KHR_ray_tracing_pipeline`.
    pub ray_tracing_pipeline: Requirement,
}

/// The outcome of a capability check: what will actually be enabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnabledCapabilities {
    pub buffer_device_address: bool,
    pub acceleration_structure: bool,
    pub ray_tracing_pipeline: bool,
}

impl DeviceCapabilities {
    /// Resolves the configuration against a physical device.
    ///
    /// Queries extension availability and feature support once. A
    /// `Required` capability the hardware lacks is an
    /// [`Error::UnsupportedDevice`]; an `Optional` one is reported as
    /// disabled in the returned [`EnabledCapabilities`].
    pub fn check(&self, pdevice: &PhysicalDevice) -> Result<EnabledCapabilities> {
        let extensions = supported_extension_names(pdevice.instance(), pdevice.vk_handle());
        let has_ext = |name: &CStr| extensions.iter().any(|ext| ext.as_c_str() == name);
        let has_accel_ext = has_ext(ash::khr::acceleration_structure::NAME)
            && has_ext(ash::khr::deferred_host_operations::NAME);
        let has_rtp_ext = has_ext(ash::khr::ray_tracing_pipeline::NAME);

        let mut bda_features = vk::PhysicalDeviceBufferDeviceAddressFeatures::default();
        let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut rtp_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut bda_features);
        if has_accel_ext {
            features2 = features2.push_next(&mut accel_features);
        }
        if has_rtp_ext {
            features2 = features2.push_next(&mut rtp_features);
        }
        unsafe {
            pdevice
                .instance()
                .get_physical_device_features2(pdevice.vk_handle(), &mut features2);
        }

        let supported = EnabledCapabilities {
            buffer_device_address: bda_features.buffer_device_address != 0,
            acceleration_structure: has_accel_ext
                && accel_features.acceleration_structure != 0,
            ray_tracing_pipeline: has_rtp_ext && rtp_features.ray_tracing_pipeline != 0,
        };

        let resolve = |requirement: Requirement,
                       available: bool,
                       name: &'static str|
         -> Result<bool> {
            match requirement {
                Requirement::Required if !available => Err(Error::UnsupportedDevice(name)),
                _ => Ok(available),
            }
        };
        Ok(EnabledCapabilities {
            buffer_device_address: resolve(
                self.buffer_device_address,
                supported.buffer_device_address,
                "bufferDeviceAddress",
            )?,
            acceleration_structure: resolve(
                self.acceleration_structure,
                supported.acceleration_structure,
                "VK_KHR_acceleration_structure",
            )?,
            ray_tracing_pipeline: resolve(
                self.ray_tracing_pipeline,
                supported.ray_tracing_pipeline,
                "VK_KHR_ray_tracing_pipeline",
            )?,
        })
    }
}

fn supported_extension_names(
    instance: &Instance,
    handle: vk::PhysicalDevice,
) -> Vec<std::ffi::CString> {
    unsafe { instance.enumerate_device_extension_properties(handle) }
        .unwrap_or_default()
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok())
        .map(|name| name.to_owned())
        .collect()
}
