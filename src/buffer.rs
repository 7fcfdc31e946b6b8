//! Buffers with explicit memory allocation.
//!
//! [`Buffer`] pairs a `VkBuffer` with its backing `VkDeviceMemory` as one
//! RAII unit: they are created together, bound at offset 0, and destroyed
//! together. Memory type selection is explicit through
//! [`find_memory_type_index`], which intersects the resource's type bitmask
//! with the property flags implied by [`MemoryLocation`].
//!
//! Host-visible buffers are mapped persistently for their whole lifetime;
//! device addresses are resolved eagerly at creation when requested.

use crate::{Device, Error, HasDevice, Result, utils::AsVkHandle};
use ash::vk;

/// Where a buffer's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryLocation {
    /// `DEVICE_LOCAL`: fastest for GPU access, not mappable.
    DeviceLocal,
    /// `HOST_VISIBLE | HOST_COHERENT`: mappable, no explicit flushes needed.
    HostVisible,
}

impl MemoryLocation {
    fn property_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryLocation::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryLocation::HostVisible => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    fn is_host_visible(self) -> bool {
        matches!(self, MemoryLocation::HostVisible)
    }
}

/// Selects the lowest memory type index allowed by `type_bits` whose
/// property flags are a superset of `required_flags`.
pub fn find_memory_type_index(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required_flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory.memory_types[..memory.memory_type_count as usize]
        .iter()
        .enumerate()
        .position(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(required_flags)
        })
        .map(|i| i as u32)
}

/// A buffer and its dedicated memory allocation.
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    device_address: vk::DeviceAddress,
    /// Persistent mapping; null for device-local buffers.
    ptr: *mut u8,
}
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Creates a buffer with a dedicated memory allocation.
    ///
    /// When `wants_device_address` is set, `SHADER_DEVICE_ADDRESS` usage and
    /// `DEVICE_ADDRESS` allocation flags are added and the address is
    /// resolved immediately; [`Self::device_address`] is then valid for the
    /// buffer's whole lifetime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSize`] when `size == 0`
    /// - [`Error::UnsupportedMemoryType`] when no memory type satisfies both
    ///   the resource requirements and the requested location
    /// - [`Error::AllocationFailure`] when the allocation itself fails
    pub fn new(
        device: Device,
        size: vk::DeviceSize,
        mut usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        wants_device_address: bool,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidSize);
        }
        if wants_device_address {
            usage |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }
        let create_info = vk::BufferCreateInfo {
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = unsafe { device.create_buffer(&create_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let required_flags = location.property_flags();
        let Some(memory_type_index) = find_memory_type_index(
            device.physical_device().memory_properties(),
            requirements.memory_type_bits,
            required_flags,
        ) else {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(Error::UnsupportedMemoryType {
                type_bits: requirements.memory_type_bits,
                flags: required_flags,
            });
        };

        let mut flags_info = vk::MemoryAllocateFlagsInfo::default()
            .flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let mut allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        if wants_device_address {
            allocate_info = allocate_info.push_next(&mut flags_info);
        }
        let memory = match unsafe { device.allocate_memory(&allocate_info, None) } {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(Error::AllocationFailure(err));
            }
        };
        if let Err(err) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(err.into());
        }

        let ptr = if location.is_host_visible() {
            match unsafe {
                device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            } {
                Ok(ptr) => ptr as *mut u8,
                Err(err) => {
                    unsafe {
                        device.destroy_buffer(buffer, None);
                        device.free_memory(memory, None);
                    }
                    return Err(err.into());
                }
            }
        } else {
            std::ptr::null_mut()
        };
        let device_address = if wants_device_address {
            let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            unsafe { device.get_buffer_device_address(&info) }
        } else {
            0
        };
        Ok(Self {
            device,
            buffer,
            memory,
            size,
            device_address,
            ptr,
        })
    }

    /// Returns the buffer size in bytes as requested at creation.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the buffer's device address.
    ///
    /// Only meaningful when the buffer was created with
    /// `wants_device_address`; debug builds assert on misuse.
    pub fn device_address(&self) -> vk::DeviceAddress {
        debug_assert_ne!(
            self.device_address, 0,
            "buffer was created without a device address"
        );
        self.device_address
    }

    /// Returns the mapped contents of a host-visible buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not host visible.
    pub fn as_slice(&self) -> &[u8] {
        assert!(!self.ptr.is_null(), "buffer is not host visible");
        unsafe { std::slice::from_raw_parts(self.ptr, self.size as usize) }
    }

    /// Returns the mapped contents of a host-visible buffer, mutably.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not host visible.
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        assert!(!self.ptr.is_null(), "buffer is not host visible");
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size as usize) }
    }
}

impl HasDevice for Buffer {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for Buffer {
    type Handle = vk::Buffer;

    fn vk_handle(&self) -> Self::Handle {
        self.buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // Safety: we have exclusive ownership of buffer and memory; both
        // were created together and no other binding exists.
        unsafe {
            if !self.ptr.is_null() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            properties.memory_types[i].property_flags = flags;
        }
        properties
    }

    #[test]
    fn memory_type_requires_superset_of_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        // Type 1 is host visible but not coherent; only type 2 qualifies.
        assert_eq!(find_memory_type_index(&properties, 0b111, wanted), Some(2));
    }

    #[test]
    fn memory_type_respects_type_bits() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let wanted = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        assert_eq!(find_memory_type_index(&properties, 0b10, wanted), Some(1));
    }

    #[test]
    fn memory_type_empty_intersection_is_none() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(
            find_memory_type_index(&properties, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn memory_type_ignores_types_beyond_count() {
        let mut properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        properties.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        // Type 1 exists in the array but is past memory_type_count.
        assert_eq!(
            find_memory_type_index(&properties, !0, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }
}
