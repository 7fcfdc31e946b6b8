//! # Andesite
//!
//! A small Vulkan ray tracing front end: mesh upload, bottom-level
//! acceleration structure construction, and shader binding table assembly.
//!
//! Andesite wraps the handful of Vulkan objects a real-time ray tracer
//! needs in RAII owner types, keeps every GPU interaction synchronous, and
//! leaves the raw API reachable: owner types expose their handles and
//! [`Device`] dereferences to [`ash::Device`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use andesite::prelude::*;
//! use andesite::{AccelStruct, CommandPool, Mesh, StagedTransfer};
//!
//! // One instance, one ray-tracing-capable device, one unified queue.
//! let (device, mut queue) = Device::create_system_default().unwrap();
//! let pool = CommandPool::new(device.clone(), queue.family_index()).unwrap();
//!
//! // Upload a triangle and build an acceleration structure over it.
//! let mesh = Mesh {
//!     positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
//!     indices: vec![0, 1, 2],
//!     ..Default::default()
//! };
//! let mut transfer = StagedTransfer::new(device.clone());
//! let buffers = transfer.upload_mesh(&pool, &mut queue, &mesh).unwrap();
//! let blas = AccelStruct::build_bottom_level(
//!     &pool,
//!     &mut queue,
//!     &buffers.vertex,
//!     &buffers.index,
//!     buffers.vertex_count,
//!     buffers.triangle_count,
//! )
//! .unwrap();
//! assert_ne!(blas.device_address(), 0);
//! ```
//!
//! ## Overview
//!
//! - [`Instance`], [`PhysicalDevice`], [`Device`]: setup. Capabilities are
//!   an explicit [`DeviceCapabilities`] configuration validated once at
//!   device-build time.
//! - [`Buffer`]: buffer plus dedicated memory as one RAII unit, with
//!   explicit memory type selection and eager device addresses.
//! - [`CommandPool`] / [`OneShotCommand`]: scoped single-use command
//!   buffers; submission drains the queue before returning.
//! - [`StagedTransfer`], [`Mesh`]: staged uploads into device-local vertex
//!   and index buffers.
//! - [`RayTracingPipeline`], [`ShaderBindingTable`], [`AccelStruct`]: the
//!   ray tracing path itself.
//!
//! ## Concurrency
//!
//! Everything is designed for one logical thread. All GPU work is
//! submitted synchronously and waited on with `vkQueueWaitIdle`; there is
//! no fence, semaphore, or frame-overlap machinery.
//!
//! ## Requirements
//!
//! Vulkan 1.2+ with `VK_KHR_acceleration_structure`,
//! `VK_KHR_ray_tracing_pipeline`, and `bufferDeviceAddress`.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
mod error;
pub mod instance;
pub mod mesh;
pub mod physical_device;
pub mod pipeline;
pub mod rtx;
pub mod transfer;
pub mod utils;

pub use buffer::{Buffer, MemoryLocation, find_memory_type_index};
pub use command::{CommandPool, OneShotCommand};
pub use descriptor::{DescriptorPool, DescriptorSetLayout};
pub use device::{Device, DeviceBuilder, HasDevice, Queue};
pub use error::{Error, Result};
pub use instance::{Instance, InstanceBuilder};
pub use mesh::{Corner, Mesh};
pub use physical_device::{
    DeviceCapabilities, EnabledCapabilities, PhysicalDevice, Requirement,
};
pub use pipeline::{
    PipelineLayout, RayTracingPipeline, ShaderGroup, ShaderGroupKind, ShaderModule, ShaderStage,
};
pub use rtx::{AccelStruct, SbtLayout, ShaderBindingTable};
pub use transfer::{MeshBuffers, StagedTransfer};

pub use ash;

pub mod prelude {
    pub use crate::{
        Buffer, Device, HasDevice, Queue, ash,
        ash::vk,
        utils::AsVkHandle,
    };
}
