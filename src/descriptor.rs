//! Descriptor set layouts and pools.
//!
//! Thin RAII wrappers plus [`DescriptorSetLayout::ray_tracing`], the
//! canonical layout a minimal ray tracing dispatch binds: the acceleration
//! structure, the storage image written by the ray generation shader, and
//! a uniform buffer for camera data.

use crate::{Device, HasDevice, Result, utils::AsVkHandle};
use ash::vk;

/// A descriptor set layout.
pub struct DescriptorSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(device: Device, bindings: &[vk::DescriptorSetLayoutBinding]) -> Result<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&create_info, None)? };
        Ok(Self { device, layout })
    }

    /// The canonical ray tracing set layout:
    /// binding 0 = acceleration structure, 1 = storage image,
    /// 2 = uniform buffer, all visible to the ray generation stage.
    pub fn ray_tracing(device: Device) -> Result<Self> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR),
            vk::DescriptorSetLayoutBinding::default()
                .binding(2)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::RAYGEN_KHR),
        ];
        Self::new(device, &bindings)
    }
}

impl HasDevice for DescriptorSetLayout {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for DescriptorSetLayout {
    type Handle = vk::DescriptorSetLayout;

    fn vk_handle(&self) -> Self::Handle {
        self.layout
    }
}
impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// A descriptor pool. Sets allocated from it are freed when the pool drops.
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(
        device: Device,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&create_info, None)? };
        Ok(Self { device, pool })
    }

    /// A pool sized for one set of the [`DescriptorSetLayout::ray_tracing`]
    /// layout.
    pub fn for_ray_tracing(device: Device) -> Result<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
            },
        ];
        Self::new(device, 1, &pool_sizes)
    }

    /// Allocates one descriptor set with the given layout.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        let set_layouts = [layout.vk_handle()];
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&set_layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info)? };
        Ok(sets[0])
    }
}

impl HasDevice for DescriptorPool {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for DescriptorPool {
    type Handle = vk::DescriptorPool;

    fn vk_handle(&self) -> Self::Handle {
        self.pool
    }
}
impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}
