//! Acceleration structures and the shader binding table.
//!
//! # Acceleration structures
//!
//! [`AccelStruct`] owns the `VkAccelerationStructureKHR` handle together
//! with the buffer backing it; the handle is destroyed strictly before the
//! buffer. [`AccelStruct::build_bottom_level`] runs the whole BLAS flow
//! synchronously: size query, storage and scratch allocation, a one-shot
//! build command, and the queue drain. The scratch buffer lives exactly as
//! long as the build.
//!
//! # Shader binding table
//!
//! The SBT is laid out in sections, one per [`ShaderGroupKind`], in order
//! of each kind's first appearance in the pipeline's group list. The first
//! section starts at offset 0 and every later section is aligned up to the
//! device's shader group base alignment; within a section, handles are
//! packed at handle-size stride. [`compute_group_offsets`] is the pure
//! layout function; [`ShaderBindingTable::build`] materializes it into a
//! host-visible buffer and hands out one
//! [`vk::StridedDeviceAddressRegionKHR`] per kind.

use crate::{
    Buffer, CommandPool, Device, Error, HasDevice, MemoryLocation, Queue, Result,
    pipeline::{RayTracingPipeline, ShaderGroupKind},
    utils::AsVkHandle,
};
use ash::vk;
use glam::UVec3;

/// A built acceleration structure and its backing storage.
pub struct AccelStruct {
    device: Device,
    raw: vk::AccelerationStructureKHR,
    buffer: Buffer,
    device_address: vk::DeviceAddress,
    primitive_count: u32,
}

impl AccelStruct {
    /// Builds a bottom-level acceleration structure over one triangle mesh.
    ///
    /// `vertex_buffer` holds tightly packed `f32` positions (12-byte
    /// stride), `index_buffer` holds `u32` indices; both must carry device
    /// addresses. The geometry is opaque and the build prefers trace
    /// performance over build time.
    ///
    /// The call is synchronous: when it returns, the structure is fully
    /// built, the scratch buffer is already released, and
    /// [`device_address`](Self::device_address) is valid for the
    /// structure's whole lifetime.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyGeometry`] when `triangle_count` or `vertex_count` is
    /// zero, checked before any device interaction.
    pub fn build_bottom_level(
        pool: &CommandPool,
        queue: &mut Queue,
        vertex_buffer: &Buffer,
        index_buffer: &Buffer,
        vertex_count: u32,
        triangle_count: u32,
    ) -> Result<Self> {
        if triangle_count == 0 || vertex_count == 0 {
            return Err(Error::EmptyGeometry);
        }
        let device = pool.device().clone();
        let loader = device.acceleration_structure_loader()?;

        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
            .vertex_format(vk::Format::R32G32B32_SFLOAT)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: vertex_buffer.device_address(),
            })
            .vertex_stride(12)
            .max_vertex(vertex_count - 1)
            .index_type(vk::IndexType::UINT32)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: index_buffer.device_address(),
            });
        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(vk::GeometryFlagsKHR::OPAQUE);
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&geometry));

        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[triangle_count],
                &mut sizes,
            );
        }
        tracing::info!(
            triangles = triangle_count,
            structure_bytes = sizes.acceleration_structure_size,
            scratch_bytes = sizes.build_scratch_size,
            "building bottom level acceleration structure"
        );

        let buffer = Buffer::new(
            device.clone(),
            sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            MemoryLocation::DeviceLocal,
            true,
        )?;
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.vk_handle())
            .size(sizes.acceleration_structure_size)
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL);
        let raw = unsafe { loader.create_acceleration_structure(&create_info, None)? };
        // From here on the handle is owned by `this`; early returns destroy
        // it through Drop, before the backing buffer.
        let mut this = Self {
            device: device.clone(),
            raw,
            buffer,
            device_address: 0,
            primitive_count: triangle_count,
        };

        let scratch = Buffer::new(
            device.clone(),
            sizes.build_scratch_size,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryLocation::DeviceLocal,
            true,
        )?;
        build_info = build_info
            .dst_acceleration_structure(this.raw)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch.device_address(),
            });
        let build_range = vk::AccelerationStructureBuildRangeInfoKHR {
            primitive_count: triangle_count,
            primitive_offset: 0,
            first_vertex: 0,
            transform_offset: 0,
        };
        let command = pool.one_shot()?;
        unsafe {
            loader.cmd_build_acceleration_structures(
                command.buffer(),
                std::slice::from_ref(&build_info),
                &[std::slice::from_ref(&build_range)],
            );
        }
        command.submit(queue)?;
        // The queue is idle; the scratch buffer can go.
        drop(scratch);

        let address_info = vk::AccelerationStructureDeviceAddressInfoKHR::default()
            .acceleration_structure(this.raw);
        this.device_address =
            unsafe { loader.get_acceleration_structure_device_address(&address_info) };
        tracing::info!(
            device_address = format_args!("{:#x}", this.device_address),
            "acceleration structure built"
        );
        Ok(this)
    }

    /// The structure's device address, stable for its whole lifetime.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }
}

impl HasDevice for AccelStruct {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for AccelStruct {
    type Handle = vk::AccelerationStructureKHR;

    fn vk_handle(&self) -> Self::Handle {
        self.raw
    }
}
impl Drop for AccelStruct {
    fn drop(&mut self) {
        // The loader exists whenever an AccelStruct does; the structure
        // handle must go before its backing buffer, which drops after this.
        if let Ok(loader) = self.device.acceleration_structure_loader() {
            unsafe {
                loader.destroy_acceleration_structure(self.raw, None);
            }
        }
    }
}

/// Device shader-group sizing for shader binding table layout.
#[derive(Clone, Copy, Debug)]
pub struct SbtLayout {
    pub handle_size: u32,
    pub base_alignment: u32,
}

impl SbtLayout {
    /// Reads the handle size and base alignment from the device's cached
    /// ray tracing properties.
    pub fn new(device: &Device) -> Result<Self> {
        let properties = device.physical_device().ray_tracing_properties();
        if properties.shader_group_handle_size == 0
            || properties.shader_group_base_alignment == 0
        {
            return Err(Error::UnsupportedDevice(
                "shader group properties unavailable",
            ));
        }
        Ok(Self {
            handle_size: properties.shader_group_handle_size,
            base_alignment: properties.shader_group_base_alignment,
        })
    }
}

/// One contiguous kind section of the shader binding table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbtSection {
    pub kind: ShaderGroupKind,
    pub offset: vk::DeviceSize,
    pub count: u32,
    /// The dispatch region size for this kind. For the ray generation
    /// kind this is exactly one handle, whatever the group count; extra
    /// ray generation handles are laid out but a dispatch uses the first.
    pub size: vk::DeviceSize,
}

/// The computed shader binding table layout.
#[derive(Clone, Debug)]
pub struct SbtOffsets {
    /// Byte offset of each group's handle, indexed like the input kinds.
    pub group_offsets: Vec<vk::DeviceSize>,
    /// Sections in order of each kind's first appearance.
    pub sections: Vec<SbtSection>,
    pub total_size: vk::DeviceSize,
}

impl SbtOffsets {
    pub fn section(&self, kind: ShaderGroupKind) -> Option<&SbtSection> {
        self.sections.iter().find(|section| section.kind == kind)
    }
}

/// Lays out shader group handles into kind sections.
///
/// Sections appear in order of each kind's first appearance in `kinds`;
/// the first section starts at 0 and every later one is aligned up to the
/// base alignment. Within a section handles are packed at handle-size
/// stride, in declaration order.
///
/// # Panics
///
/// Panics in debug builds when the layout's handle size or base alignment
/// is zero; [`SbtLayout::new`] guarantees both are nonzero.
pub fn compute_group_offsets(kinds: &[ShaderGroupKind], layout: &SbtLayout) -> SbtOffsets {
    debug_assert!(
        layout.handle_size > 0 && layout.base_alignment > 0,
        "shader group handle size and base alignment must be nonzero"
    );
    let handle_size = layout.handle_size as vk::DeviceSize;
    let alignment = layout.base_alignment as vk::DeviceSize;

    let mut sections: Vec<SbtSection> = Vec::new();
    for &kind in kinds {
        if !sections.iter().any(|section| section.kind == kind) {
            sections.push(SbtSection {
                kind,
                offset: 0,
                count: 0,
                size: 0,
            });
        }
    }

    let mut group_offsets = vec![0; kinds.len()];
    let mut cursor: vk::DeviceSize = 0;
    for section in &mut sections {
        section.offset = cursor.next_multiple_of(alignment);
        for (group, &kind) in kinds.iter().enumerate() {
            if kind == section.kind {
                group_offsets[group] =
                    section.offset + section.count as vk::DeviceSize * handle_size;
                section.count += 1;
            }
        }
        section.size = if section.kind == ShaderGroupKind::RayGen {
            handle_size
        } else {
            section.count as vk::DeviceSize * handle_size
        };
        cursor = section.offset + section.count as vk::DeviceSize * handle_size;
    }
    SbtOffsets {
        group_offsets,
        sections,
        total_size: cursor,
    }
}

/// Bytes to skip from `base` to the first address aligned to `alignment`.
fn aligned_base_shift(base: vk::DeviceAddress, alignment: vk::DeviceSize) -> vk::DeviceSize {
    base.next_multiple_of(alignment) - base
}

/// A materialized shader binding table.
///
/// Owns the host-visible buffer the handles were written into and the four
/// per-kind dispatch regions. Regions for kinds the pipeline does not
/// declare are empty.
pub struct ShaderBindingTable {
    buffer: Buffer,
    raygen: vk::StridedDeviceAddressRegionKHR,
    miss: vk::StridedDeviceAddressRegionKHR,
    hit: vk::StridedDeviceAddressRegionKHR,
    callable: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    /// Fetches the pipeline's shader group handles and writes them into a
    /// fresh host-visible table.
    pub fn build(device: &Device, pipeline: &RayTracingPipeline) -> Result<Self> {
        let layout = SbtLayout::new(device)?;
        let kinds = pipeline.group_kinds();
        let offsets = compute_group_offsets(kinds, &layout);
        if offsets.total_size == 0 {
            return Err(Error::InvalidSize);
        }

        let loader = device.ray_tracing_loader()?;
        let handle_size = layout.handle_size as usize;
        let handles = unsafe {
            loader.get_ray_tracing_shader_group_handles(
                pipeline.vk_handle(),
                0,
                kinds.len() as u32,
                handle_size * kinds.len(),
            )?
        };

        // The implementation does not promise a base-aligned buffer device
        // address, but every dispatch region must be aligned to the shader
        // group base alignment. Over-allocate by one alignment span and
        // start the table at the first aligned address inside the buffer.
        let alignment = layout.base_alignment as vk::DeviceSize;
        let mut buffer = Buffer::new(
            device.clone(),
            offsets.total_size + alignment - 1,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::HostVisible,
            true,
        )?;
        let shift = aligned_base_shift(buffer.device_address(), alignment);
        {
            let table = buffer.as_slice_mut();
            for (group, &offset) in offsets.group_offsets.iter().enumerate() {
                table[(shift + offset) as usize..][..handle_size]
                    .copy_from_slice(&handles[group * handle_size..][..handle_size]);
            }
        }

        let base = buffer.device_address() + shift;
        debug_assert_eq!(base % alignment, 0);
        let region = |kind: ShaderGroupKind| -> vk::StridedDeviceAddressRegionKHR {
            let Some(section) = offsets.section(kind) else {
                return vk::StridedDeviceAddressRegionKHR::default();
            };
            vk::StridedDeviceAddressRegionKHR {
                device_address: base + section.offset,
                stride: handle_size as vk::DeviceSize,
                size: section.size,
            }
        };
        tracing::info!(
            groups = kinds.len(),
            table_bytes = offsets.total_size,
            "built shader binding table"
        );
        Ok(Self {
            raygen: region(ShaderGroupKind::RayGen),
            miss: region(ShaderGroupKind::Miss),
            hit: region(ShaderGroupKind::HitGroup),
            callable: region(ShaderGroupKind::Callable),
            buffer,
        })
    }

    /// The four dispatch regions, in `vkCmdTraceRaysKHR` argument order.
    pub fn trace_regions(
        &self,
    ) -> (
        &vk::StridedDeviceAddressRegionKHR,
        &vk::StridedDeviceAddressRegionKHR,
        &vk::StridedDeviceAddressRegionKHR,
        &vk::StridedDeviceAddressRegionKHR,
    ) {
        (&self.raygen, &self.miss, &self.hit, &self.callable)
    }

    /// Records a `vkCmdTraceRaysKHR` dispatch over `extent`.
    ///
    /// The pipeline must already be bound on `command_buffer`.
    pub fn cmd_trace_rays(&self, command_buffer: vk::CommandBuffer, extent: UVec3) -> Result<()> {
        let loader = self.buffer.device().ray_tracing_loader()?;
        // Safety: the command buffer is in the recording state and the
        // table's buffer outlives this ShaderBindingTable.
        unsafe {
            loader.cmd_trace_rays(
                command_buffer,
                &self.raygen,
                &self.miss,
                &self.hit,
                &self.callable,
                extent.x,
                extent.y,
                extent.z,
            );
        }
        Ok(())
    }
}

impl HasDevice for ShaderBindingTable {
    fn device(&self) -> &Device {
        self.buffer.device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ShaderGroupKind::*;

    const LAYOUT: SbtLayout = SbtLayout {
        handle_size: 32,
        base_alignment: 64,
    };

    #[test]
    fn sections_align_to_base_alignment() {
        let offsets = compute_group_offsets(&[RayGen, HitGroup, Miss], &LAYOUT);
        assert_eq!(offsets.group_offsets, vec![0, 64, 128]);
        for section in &offsets.sections {
            assert_eq!(section.offset % 64, 0);
        }
        assert_eq!(offsets.total_size, 160);
    }

    #[test]
    fn groups_of_one_kind_pack_at_handle_stride() {
        let offsets = compute_group_offsets(&[RayGen, Miss, Miss, HitGroup], &LAYOUT);
        assert_eq!(offsets.group_offsets, vec![0, 64, 96, 128]);
        assert_eq!(offsets.section(Miss).unwrap().count, 2);
        assert_eq!(offsets.total_size, 160);
    }

    #[test]
    fn sections_follow_first_appearance_order() {
        let offsets = compute_group_offsets(&[RayGen, Miss, HitGroup, Miss], &LAYOUT);
        let kinds: Vec<_> = offsets.sections.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![RayGen, Miss, HitGroup]);
        // Interleaved declaration: both miss handles land in one section.
        assert_eq!(offsets.group_offsets, vec![0, 64, 128, 96]);
    }

    #[test]
    fn alignment_equal_to_handle_size_packs_tightly() {
        let layout = SbtLayout {
            handle_size: 32,
            base_alignment: 32,
        };
        let offsets = compute_group_offsets(&[RayGen, HitGroup, Miss], &layout);
        assert_eq!(offsets.group_offsets, vec![0, 32, 64]);
        assert_eq!(offsets.total_size, 96);
    }

    #[test]
    fn empty_group_list_is_empty_table() {
        let offsets = compute_group_offsets(&[], &LAYOUT);
        assert!(offsets.group_offsets.is_empty());
        assert!(offsets.sections.is_empty());
        assert_eq!(offsets.total_size, 0);
    }

    #[test]
    fn raygen_region_spans_one_handle_regardless_of_count() {
        let offsets = compute_group_offsets(&[RayGen, RayGen, Miss], &LAYOUT);
        let raygen = offsets.section(RayGen).unwrap();
        // Both handles are laid out, but a dispatch only reads the first.
        assert_eq!(raygen.count, 2);
        assert_eq!(raygen.size, 32);
        assert_eq!(offsets.group_offsets, vec![0, 32, 64]);
        assert_eq!(offsets.section(Miss).unwrap().size, 32);
        assert_eq!(offsets.total_size, 96);
    }

    #[test]
    fn base_shift_lands_on_aligned_addresses() {
        assert_eq!(aligned_base_shift(0x1000, 64), 0);
        assert_eq!(aligned_base_shift(0x1020, 64), 0x20);
        assert_eq!(aligned_base_shift(0x103f, 64), 1);
        assert_eq!(aligned_base_shift(0, 64), 0);
    }

    #[test]
    #[should_panic(expected = "base alignment must be nonzero")]
    fn zero_base_alignment_is_rejected() {
        let layout = SbtLayout {
            handle_size: 32,
            base_alignment: 0,
        };
        compute_group_offsets(&[RayGen], &layout);
    }
}
