use ash::{vk, Device};
use std::ptr::NonNull;

use super::{BindingInfo, BufferUsage, ContextLimits, CreationExt, GPUError, InternalExt, Result};

/// A device buffer backed by its own host-visible allocation.
#[derive(Debug)]
pub struct Buffer {
    pub(crate) raw: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) size: u64,
    pub(crate) usage: BufferUsage,
    pub(crate) mapped: Option<NonNull<u8>>,
    /// Created with `keep_mapped`; only these hand out a raw pointer.
    pub(crate) keep_mapped: bool,
}

/// Reject a binding larger than the device allows for its descriptor type.
pub fn check_binding_range(info: &BindingInfo, limits: &ContextLimits) -> Result<()> {
    let (limit, msg) = match info.usage {
        BufferUsage::UNIFORM => (
            limits.max_uniform_buffer_range,
            "uniform binding exceeds max_uniform_buffer_range",
        ),
        BufferUsage::STORAGE => (
            limits.max_storage_buffer_range,
            "storage binding exceeds max_storage_buffer_range",
        ),
    };
    if info.byte_size() > limit as u64 {
        return Err(GPUError::InvalidArgument(msg));
    }
    Ok(())
}

/// First memory type allowed by `type_bits` that carries all of `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    props.memory_types[..props.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(idx, ty)| {
            type_bits & (1 << idx) != 0 && ty.property_flags.contains(required)
        })
        .map(|(idx, _)| idx as u32)
}

impl From<BufferUsage> for vk::BufferUsageFlags {
    fn from(value: BufferUsage) -> Self {
        match value {
            BufferUsage::UNIFORM => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::STORAGE => vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }
}

impl From<BufferUsage> for vk::DescriptorType {
    fn from(value: BufferUsage) -> Self {
        match value {
            BufferUsage::UNIFORM => vk::DescriptorType::UNIFORM_BUFFER,
            BufferUsage::STORAGE => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

impl Buffer {
    /// Create, allocate and bind one binding's buffer, then apply its initial
    /// data and mapping policy. Anything created before a failure is released.
    pub(crate) fn new(
        device: &Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        info: &BindingInfo,
    ) -> Result<Self> {
        let size = info.byte_size();
        if size == 0 {
            return Err(GPUError::InvalidArgument("binding has zero size"));
        }

        let raw = unsafe {
            device.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(size)
                    .usage(info.usage.into())
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                None,
            )
        }
        .creating("buffer")?;

        let mut buf = Buffer {
            raw,
            memory: vk::DeviceMemory::null(),
            size,
            usage: info.usage,
            mapped: None,
            keep_mapped: info.keep_mapped,
        };

        if let Err(err) = buf.back_with_memory(device, mem_props, info) {
            buf.destroy(device);
            return Err(err);
        }

        Ok(buf)
    }

    fn back_with_memory(
        &mut self,
        device: &Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        info: &BindingInfo,
    ) -> Result<()> {
        let reqs = unsafe { device.get_buffer_memory_requirements(self.raw) };
        let type_index = find_memory_type(
            mem_props,
            reqs.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .ok_or(GPUError::creation(
            "buffer memory",
            vk::Result::ERROR_FEATURE_NOT_PRESENT,
        ))?;

        self.memory = unsafe {
            device.allocate_memory(
                &vk::MemoryAllocateInfo::builder()
                    .allocation_size(reqs.size)
                    .memory_type_index(type_index)
                    .build(),
                None,
            )
        }
        .creating("buffer memory")?;

        unsafe { device.bind_buffer_memory(self.raw, self.memory, 0) }
            .creating("buffer memory binding")?;

        if !info.keep_mapped && info.initial_data.is_none() {
            return Ok(());
        }

        let ptr = self.map(device)?;
        if let Some(data) = info.initial_data {
            let len = data.len().min(self.size as usize);
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), len) };
        }
        if !info.keep_mapped {
            self.unmap(device);
        }

        Ok(())
    }

    /// Map the whole allocation, reusing an existing mapping.
    pub(crate) fn map(&mut self, device: &Device) -> Result<NonNull<u8>> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        let raw = unsafe {
            device.map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }
        .internal("vkMapMemory")?;
        let ptr = NonNull::new(raw as *mut u8)
            .ok_or(GPUError::vulkan("vkMapMemory", vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    pub(crate) fn unmap(&mut self, device: &Device) {
        if self.mapped.take().is_some() {
            unsafe { device.unmap_memory(self.memory) };
        }
    }

    /// Unmap, free memory, destroy the buffer. Safe to call on a partially
    /// built buffer.
    pub(crate) fn destroy(&mut self, device: &Device) {
        self.unmap(device);
        unsafe {
            if self.memory != vk::DeviceMemory::null() {
                device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
            if self.raw != vk::Buffer::null() {
                device.destroy_buffer(self.raw, None);
                self.raw = vk::Buffer::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties::default();
        p.memory_type_count = flags.len() as u32;
        for (i, f) in flags.iter().enumerate() {
            p.memory_types[i].property_flags = *f;
        }
        p
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn picks_first_host_coherent_type() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
            HOST,
        ]);
        assert_eq!(find_memory_type(&p, u32::MAX, HOST), Some(2));
    }

    #[test]
    fn honors_type_bits() {
        let p = props(&[HOST, HOST]);
        assert_eq!(find_memory_type(&p, 0b10, HOST), Some(1));
        assert_eq!(find_memory_type(&p, 0b00, HOST), None);
    }

    #[test]
    fn ignores_types_past_count() {
        let mut p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        p.memory_types[1].property_flags = HOST;
        assert_eq!(find_memory_type(&p, u32::MAX, HOST), None);
    }

    fn limits() -> ContextLimits {
        ContextLimits {
            max_uniform_buffer_range: 64,
            max_storage_buffer_range: 256,
            ..Default::default()
        }
    }

    fn binding(usage: BufferUsage, count: u32) -> BindingInfo<'static> {
        BindingInfo {
            element_size: 4,
            element_count: count,
            usage,
            ..Default::default()
        }
    }

    #[test]
    fn binding_range_limits_by_usage() {
        let limits = limits();
        assert!(check_binding_range(&binding(BufferUsage::UNIFORM, 16), &limits).is_ok());
        assert!(matches!(
            check_binding_range(&binding(BufferUsage::UNIFORM, 17), &limits),
            Err(GPUError::InvalidArgument(_))
        ));
        assert!(check_binding_range(&binding(BufferUsage::STORAGE, 64), &limits).is_ok());
        assert!(matches!(
            check_binding_range(&binding(BufferUsage::STORAGE, 65), &limits),
            Err(GPUError::InvalidArgument(_))
        ));
    }

    #[test]
    fn usage_conversions() {
        assert_eq!(
            vk::BufferUsageFlags::from(BufferUsage::UNIFORM),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
        assert_eq!(
            vk::DescriptorType::from(BufferUsage::STORAGE),
            vk::DescriptorType::STORAGE_BUFFER
        );
    }
}
