//! Logical device creation and management.
//!
//! # Overview
//!
//! [`Device`] wraps the `ash::Device` together with the [`PhysicalDevice`]
//! it came from, the resolved [`EnabledCapabilities`], and the extension
//! loaders for `VK_KHR_acceleration_structure` and
//! `VK_KHR_ray_tracing_pipeline`. It is reference-counted: buffers,
//! pipelines, and acceleration structures each hold a clone, so the raw
//! device is destroyed strictly after everything created from it.
//!
//! [`Queue`] is the single unified queue all work goes through. Submission
//! is synchronous; [`Queue::submit_and_wait`] blocks on `vkQueueWaitIdle`
//! before returning.
//!
//! # Quick Start
//!
//! ```no_run
//! # use andesite::Device;
//! let (device, queue) = Device::create_system_default().unwrap();
//! ```
//!
//! # Custom Configuration
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use andesite::{Instance, Device, DeviceCapabilities, Requirement};
//! # let entry = Arc::new(unsafe { ash::Entry::load() }.unwrap());
//! # let instance = Instance::builder(entry).build().unwrap();
//! # let pdevice = instance.enumerate_physical_devices().unwrap().remove(0);
//! let mut builder = Device::builder(pdevice);
//! builder.capabilities.ray_tracing_pipeline = Requirement::Required;
//! let (device, queue) = builder.build().unwrap();
//! ```

use crate::{
    Error, Instance, Result,
    physical_device::{DeviceCapabilities, EnabledCapabilities, PhysicalDevice},
    utils::AsVkHandle,
};
use ash::vk;
use std::{ffi::c_char, fmt::Debug, ops::Deref, sync::Arc};

/// A trait for types created from a Vulkan device.
pub trait HasDevice {
    /// Returns a reference to the Vulkan device.
    fn device(&self) -> &Device;

    /// Returns a reference to the Vulkan [`PhysicalDevice`].
    fn physical_device(&self) -> &PhysicalDevice {
        self.device().physical_device()
    }

    /// Returns a reference to the Vulkan [`Instance`].
    fn instance(&self) -> &Instance {
        self.device().physical_device().instance()
    }
}

/// A Vulkan logical device wrapper.
///
/// Reference-counted using [`Arc`] for cheap shared access. Dereferences to
/// [`ash::Device`] for direct access to core device commands.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);
impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Device {}
impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Device")
            .field(&self.0.device.handle())
            .finish()
    }
}

struct DeviceInner {
    physical_device: PhysicalDevice,
    device: ash::Device,
    capabilities: EnabledCapabilities,
    accel_loader: Option<ash::khr::acceleration_structure::Device>,
    rt_pipeline_loader: Option<ash::khr::ray_tracing_pipeline::Device>,
}

impl Device {
    /// Returns a reference to the Vulkan [`Instance`].
    pub fn instance(&self) -> &Instance {
        self.0.physical_device.instance()
    }

    /// Returns a reference to the [`PhysicalDevice`].
    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.0.physical_device
    }

    /// Returns the capabilities that were actually enabled at build time.
    pub fn capabilities(&self) -> &EnabledCapabilities {
        &self.0.capabilities
    }

    /// Returns the `VK_KHR_acceleration_structure` function table.
    ///
    /// Fails with [`Error::UnsupportedDevice`] if the capability was not
    /// enabled when the device was built.
    pub fn acceleration_structure_loader(
        &self,
    ) -> Result<&ash::khr::acceleration_structure::Device> {
        self.0
            .accel_loader
            .as_ref()
            .ok_or(Error::UnsupportedDevice("VK_KHR_acceleration_structure"))
    }

    /// Returns the `VK_KHR_ray_tracing_pipeline` function table.
    pub fn ray_tracing_loader(&self) -> Result<&ash::khr::ray_tracing_pipeline::Device> {
        self.0
            .rt_pipeline_loader
            .as_ref()
            .ok_or(Error::UnsupportedDevice("VK_KHR_ray_tracing_pipeline"))
    }

    /// Creates a new device builder for the given physical device.
    pub fn builder(pdevice: PhysicalDevice) -> DeviceBuilder {
        DeviceBuilder::new(pdevice)
    }

    /// Creates an instance and a ray-tracing-capable device with defaults.
    ///
    /// Selects the first physical device that supports the full default
    /// capability set and exposes a unified queue family.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedDevice`] when no physical device qualifies;
    /// Vulkan errors from instance or device creation otherwise.
    pub fn create_system_default() -> Result<(Self, Queue)> {
        let entry = Arc::new(
            unsafe { ash::Entry::load() }
                .map_err(|_| Error::UnsupportedDevice("Vulkan loader not found"))?,
        );
        let instance = Instance::builder(entry).build()?;
        for pdevice in instance.enumerate_physical_devices()? {
            let caps = DeviceCapabilities::default();
            if caps.check(&pdevice).is_err() || pdevice.find_unified_queue_family().is_none() {
                continue;
            }
            let mut builder = Device::builder(pdevice);
            builder.capabilities = caps;
            return builder.build();
        }
        Err(Error::UnsupportedDevice(
            "no ray tracing capable physical device",
        ))
    }
}

impl Deref for Device {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.0.device
    }
}
impl AsVkHandle for Device {
    type Handle = vk::Device;

    fn vk_handle(&self) -> Self::Handle {
        self.0.device.handle()
    }
}
impl HasDevice for Device {
    fn device(&self) -> &Device {
        self
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        tracing::info!(device = ?self.device.handle(), "drop device");
        // Safety: Host synchronization rule for vkDestroyDevice:
        // - Host access to device must be externally synchronized.
        // We have &mut self and therefore exclusive control on device.
        // Every resource wrapper retains an Arc to Device, so none of their
        // handles exist at this point.
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

/// A builder for creating Vulkan logical devices.
///
/// Capability selection happens through the public [`capabilities`]
/// configuration; it is validated once in [`build`](Self::build) and the
/// matching extensions and feature structs are chained automatically.
///
/// [`capabilities`]: Self::capabilities
pub struct DeviceBuilder {
    pdevice: PhysicalDevice,
    /// Capability configuration resolved at build time.
    pub capabilities: DeviceCapabilities,
    queue_family_index: Option<u32>,
}

impl DeviceBuilder {
    pub fn new(pdevice: PhysicalDevice) -> Self {
        Self {
            pdevice,
            capabilities: DeviceCapabilities::default(),
            queue_family_index: None,
        }
    }

    /// Overrides the queue family. The default is
    /// [`PhysicalDevice::find_unified_queue_family`].
    pub fn queue_family(&mut self, index: u32) -> &mut Self {
        self.queue_family_index = Some(index);
        self
    }

    /// Builds the logical device and its unified queue.
    pub fn build(self) -> Result<(Device, Queue)> {
        let enabled = self.capabilities.check(&self.pdevice)?;
        let queue_family_index = self
            .queue_family_index
            .or_else(|| self.pdevice.find_unified_queue_family())
            .ok_or(Error::UnsupportedDevice(
                "no queue family with graphics, compute, and transfer",
            ))?;

        let mut extension_names: Vec<*const c_char> = Vec::new();
        if enabled.acceleration_structure {
            extension_names.push(ash::khr::acceleration_structure::NAME.as_ptr());
            extension_names.push(ash::khr::deferred_host_operations::NAME.as_ptr());
        }
        if enabled.ray_tracing_pipeline {
            extension_names.push(ash::khr::ray_tracing_pipeline::NAME.as_ptr());
        }

        let mut bda_features =
            vk::PhysicalDeviceBufferDeviceAddressFeatures::default().buffer_device_address(true);
        let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
            .acceleration_structure(true);
        let mut rtp_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
            .ray_tracing_pipeline(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default();
        if enabled.buffer_device_address {
            features2 = features2.push_next(&mut bda_features);
        }
        if enabled.acceleration_structure {
            features2 = features2.push_next(&mut accel_features);
        }
        if enabled.ray_tracing_pipeline {
            features2 = features2.push_next(&mut rtp_features);
        }

        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extension_names)
            .push_next(&mut features2);
        // Safety: no host synchronization rules for vkCreateDevice.
        let device = unsafe {
            self.pdevice
                .instance()
                .create_device(self.pdevice.vk_handle(), &create_info, None)?
        };

        let accel_loader = enabled.acceleration_structure.then(|| {
            ash::khr::acceleration_structure::Device::new(self.pdevice.instance(), &device)
        });
        let rt_pipeline_loader = enabled.ray_tracing_pipeline.then(|| {
            ash::khr::ray_tracing_pipeline::Device::new(self.pdevice.instance(), &device)
        });

        tracing::info!(
            device = %self.pdevice.properties().device_name,
            queue_family_index,
            ?enabled,
            "created device"
        );

        // Safety: this family/index pair was part of DeviceCreateInfo above.
        let raw_queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let device = Device(Arc::new(DeviceInner {
            physical_device: self.pdevice,
            device,
            capabilities: enabled,
            accel_loader,
            rt_pipeline_loader,
        }));
        let queue = Queue {
            device: device.clone(),
            queue: raw_queue,
            family_index: queue_family_index,
        };
        Ok((device, queue))
    }
}

/// The unified queue all GPU work is submitted on.
///
/// Submission takes `&mut self`: queue access requires external
/// synchronization and this crate's model is a single logical thread.
pub struct Queue {
    device: Device,
    queue: vk::Queue,
    family_index: u32,
}

impl Queue {
    /// Returns the queue family index this queue was created on.
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Submits one command buffer and blocks until the queue is idle.
    ///
    /// There is no fence or semaphore plumbing; when this returns `Ok`, the
    /// GPU has finished the work.
    pub fn submit_and_wait(&mut self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let command_buffers = [command_buffer];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        // Safety: Host access to queue must be externally synchronized.
        // We have &mut self.
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit], vk::Fence::null())
                .map_err(Error::SubmissionFailure)?;
            self.device
                .queue_wait_idle(self.queue)
                .map_err(Error::SubmissionFailure)?;
        }
        Ok(())
    }

    /// Blocks until all work on the queue has completed.
    pub fn wait_idle(&mut self) -> Result<()> {
        unsafe {
            self.device
                .queue_wait_idle(self.queue)
                .map_err(Error::SubmissionFailure)
        }
    }
}

impl HasDevice for Queue {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for Queue {
    type Handle = vk::Queue;

    fn vk_handle(&self) -> Self::Handle {
        self.queue
    }
}
