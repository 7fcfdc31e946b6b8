//! Command pools and scoped one-shot command buffers.
//!
//! All GPU work in this crate is recorded into a [`OneShotCommand`]: a
//! single-use primary command buffer allocated from a transient
//! [`CommandPool`], begun with `ONE_TIME_SUBMIT`, and freed on every exit
//! path. [`OneShotCommand::submit`] ends the recording, submits it on the
//! queue, and blocks until the queue is idle; dropping the guard without
//! submitting just releases the command buffer.

use crate::{Device, Error, HasDevice, Queue, Result, utils::AsVkHandle};
use ash::vk;

/// A transient command pool on the unified queue family.
pub struct CommandPool {
    device: Device,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    pub fn new(device: Device, queue_family_index: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo {
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            queue_family_index,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&create_info, None)? };
        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates a single-use command buffer and begins recording.
    ///
    /// The returned guard frees the command buffer when dropped, whether or
    /// not it was submitted.
    pub fn one_shot(&self) -> Result<OneShotCommand<'_>> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // Safety: host access to the pool is externally synchronized. The
        // pool is not Sync and recording happens on one thread.
        let buffer = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(Error::SubmissionFailure)?[0];
        let command = OneShotCommand { pool: self, buffer };
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(buffer, &begin_info) }
            .map_err(Error::SubmissionFailure)?;
        Ok(command)
    }
}

impl HasDevice for CommandPool {
    fn device(&self) -> &Device {
        &self.device
    }
}
impl AsVkHandle for CommandPool {
    type Handle = vk::CommandPool;

    fn vk_handle(&self) -> Self::Handle {
        self.pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Safety: all OneShotCommand guards borrow the pool, so none are
        // alive here.
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// A scoped single-use command buffer.
///
/// Record through [`buffer`](Self::buffer), then call
/// [`submit`](Self::submit). The command buffer is freed when the guard
/// drops, including on early returns between recording and submission.
pub struct OneShotCommand<'a> {
    pool: &'a CommandPool,
    buffer: vk::CommandBuffer,
}

impl OneShotCommand<'_> {
    /// Returns the raw command buffer for recording.
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Ends recording, submits, and blocks until the queue is idle.
    pub fn submit(self, queue: &mut Queue) -> Result<()> {
        unsafe { self.pool.device.end_command_buffer(self.buffer) }
            .map_err(Error::SubmissionFailure)?;
        queue.submit_and_wait(self.buffer)
        // Dropped here; the command buffer is freed after the wait.
    }
}

impl Drop for OneShotCommand<'_> {
    fn drop(&mut self) {
        // Safety: the buffer was allocated from this pool and, because
        // submission waits for idle, is no longer in use by the GPU.
        unsafe {
            self.pool
                .device
                .free_command_buffers(self.pool.pool, &[self.buffer]);
        }
    }
}
