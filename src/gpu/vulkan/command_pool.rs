use ash::{vk, Device};
use std::{cell::UnsafeCell, marker::PhantomData};

use super::{CreationExt, InternalExt, Result};

/// Thin wrapper around a Vulkan command pool.
///
/// Allocates and frees the primary/secondary buffers used by command queues.
/// Vulkan requires external synchronization on the pool, so the wrapper is
/// `!Sync`.
pub struct CommandPool {
    device: Device,
    raw: vk::CommandPool,
    // make !Sync
    _not_sync: PhantomData<UnsafeCell<()>>,
}

impl CommandPool {
    /// Create a new command pool for the given queue family.
    pub(super) fn new(device: &Device, family: u32) -> Result<Self> {
        let ci = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .build();
        let raw = unsafe { device.create_command_pool(&ci, None) }.creating("command pool")?;
        Ok(Self {
            device: device.clone(),
            raw,
            _not_sync: PhantomData,
        })
    }

    pub(super) fn alloc(&self, is_secondary: bool) -> Result<vk::CommandBuffer> {
        let level = if is_secondary {
            vk::CommandBufferLevel::SECONDARY
        } else {
            vk::CommandBufferLevel::PRIMARY
        };
        let cmd = unsafe {
            self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(self.raw)
                    .level(level)
                    .command_buffer_count(1)
                    .build(),
            )
        }
        .creating("command buffer")?;
        Ok(cmd[0])
    }

    /// Reset a single buffer back to the initial state.
    pub(super) fn reset(&self, buf: vk::CommandBuffer, release: bool) -> Result<()> {
        let flags = if release {
            vk::CommandBufferResetFlags::RELEASE_RESOURCES
        } else {
            vk::CommandBufferResetFlags::empty()
        };
        unsafe { self.device.reset_command_buffer(buf, flags) }.internal("vkResetCommandBuffer")
    }

    /// Reset every buffer allocated from the pool and return its memory.
    pub(super) fn reset_all(&self) -> Result<()> {
        unsafe {
            self.device
                .reset_command_pool(self.raw, vk::CommandPoolResetFlags::RELEASE_RESOURCES)
        }
        .internal("vkResetCommandPool")
    }

    pub(super) fn free(&self, buf: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(self.raw, &[buf]) };
    }

    /// Destroy the underlying Vulkan command pool. Command buffers allocated
    /// from this pool become invalid after this call.
    pub(super) fn destroy(&mut self) {
        if self.raw != vk::CommandPool::null() {
            unsafe { self.device.destroy_command_pool(self.raw, None) };
            self.raw = vk::CommandPool::null();
        }
    }

    /// Raw Vulkan command pool handle.
    pub fn raw(&self) -> vk::CommandPool {
        self.raw
    }
}
