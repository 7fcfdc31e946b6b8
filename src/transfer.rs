//! Staged uploads into device-local buffers.
//!
//! Device-local memory is not mappable, so uploads go through a
//! host-visible staging buffer: bytes are copied into the mapping, then a
//! one-shot command buffer records a `vkCmdCopyBuffer` and the queue is
//! drained. [`StagedTransfer`] owns one staging buffer and reuses it across
//! uploads, growing it to the largest block seen so far.

use crate::{
    Buffer, CommandPool, Device, Error, HasDevice, MemoryLocation, Mesh, Queue, Result,
    utils::AsVkHandle,
};
use ash::vk;

/// Buffer usage for mesh vertex and index buffers: copy destination and
/// source (for readback), acceleration structure build input, and
/// shader-readable storage.
pub const MESH_BUFFER_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::TRANSFER_DST.as_raw()
        | vk::BufferUsageFlags::TRANSFER_SRC.as_raw()
        | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR.as_raw()
        | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw(),
);

/// A reusable staging path into device-local memory.
pub struct StagedTransfer {
    device: Device,
    staging: Option<Buffer>,
}

impl StagedTransfer {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            staging: None,
        }
    }

    /// Grows the staging buffer to at least `size` bytes up front.
    pub fn reserve(&mut self, size: vk::DeviceSize) -> Result<()> {
        if size == 0 {
            return Err(Error::InvalidSize);
        }
        self.ensure_staging(size)?;
        Ok(())
    }

    fn ensure_staging(&mut self, needed: vk::DeviceSize) -> Result<&mut Buffer> {
        let large_enough = matches!(&self.staging, Some(staging) if staging.size() >= needed);
        if !large_enough {
            tracing::debug!(bytes = needed, "growing staging buffer");
            self.staging = Some(Buffer::new(
                self.device.clone(),
                needed,
                vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::HostVisible,
                false,
            )?);
        }
        Ok(self.staging.as_mut().expect("staging buffer just ensured"))
    }

    /// Uploads `data` to the start of `dst` and blocks until the copy has
    /// completed on the GPU.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSize`] when `data` is empty or larger than `dst`.
    pub fn upload(
        &mut self,
        pool: &CommandPool,
        queue: &mut Queue,
        data: &[u8],
        dst: &Buffer,
    ) -> Result<()> {
        if data.is_empty() || data.len() as vk::DeviceSize > dst.size() {
            return Err(Error::InvalidSize);
        }
        let staging = self.ensure_staging(data.len() as vk::DeviceSize)?;
        staging.as_slice_mut()[..data.len()].copy_from_slice(data);

        let command = pool.one_shot()?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: data.len() as vk::DeviceSize,
        };
        // Safety: the command buffer is in the recording state and both
        // buffers outlive the synchronous submission below.
        unsafe {
            pool.device().cmd_copy_buffer(
                command.buffer(),
                staging.vk_handle(),
                dst.vk_handle(),
                &[region],
            );
        }
        command.submit(queue)
    }

    /// Creates device-local vertex and index buffers for `mesh` and uploads
    /// both through the staging buffer.
    ///
    /// The vertex buffer holds tightly packed positions (12-byte stride);
    /// the index buffer holds `u32` indices. Both carry
    /// [`MESH_BUFFER_USAGE`] and a device address, ready for acceleration
    /// structure builds and shading-time lookups.
    pub fn upload_mesh(
        &mut self,
        pool: &CommandPool,
        queue: &mut Queue,
        mesh: &Mesh,
    ) -> Result<MeshBuffers> {
        mesh.validate()?;
        let vertex_data: &[u8] = bytemuck::cast_slice(&mesh.positions);
        let index_data: &[u8] = bytemuck::cast_slice(&mesh.indices);

        // One staging allocation covers both uploads.
        self.reserve(vertex_data.len().max(index_data.len()) as vk::DeviceSize)?;

        let vertex = Buffer::new(
            self.device.clone(),
            vertex_data.len() as vk::DeviceSize,
            MESH_BUFFER_USAGE,
            MemoryLocation::DeviceLocal,
            true,
        )?;
        let index = Buffer::new(
            self.device.clone(),
            index_data.len() as vk::DeviceSize,
            MESH_BUFFER_USAGE,
            MemoryLocation::DeviceLocal,
            true,
        )?;
        self.upload(pool, queue, vertex_data, &vertex)?;
        self.upload(pool, queue, index_data, &index)?;

        tracing::info!(
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            vertex_bytes = vertex_data.len(),
            index_bytes = index_data.len(),
            "uploaded mesh"
        );
        Ok(MeshBuffers {
            vertex,
            index,
            vertex_count: mesh.vertex_count(),
            triangle_count: mesh.triangle_count(),
        })
    }
}

impl HasDevice for StagedTransfer {
    fn device(&self) -> &Device {
        &self.device
    }
}

/// GPU-resident mesh data produced by [`StagedTransfer::upload_mesh`].
pub struct MeshBuffers {
    pub vertex: Buffer,
    pub index: Buffer,
    pub vertex_count: u32,
    pub triangle_count: u32,
}
