use ash::{vk, Device};

use super::{Buffer, BufferUsage, CreationExt, Result};

/// Pool, layout and the single set that exposes a pipeline's buffers.
#[derive(Debug, Default)]
pub(crate) struct DescriptorBindings {
    pub(crate) pool: vk::DescriptorPool,
    pub(crate) layout: vk::DescriptorSetLayout,
    pub(crate) set: vk::DescriptorSet,
}

/// Pool sizes: room for every binding as either kind. Vulkan rejects empty
/// pool sizes, so an empty pipeline still reserves one of each.
pub(crate) fn pool_sizes(binding_count: u32) -> [vk::DescriptorPoolSize; 2] {
    let count = binding_count.max(1);
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: count,
        },
    ]
}

/// One compute-stage binding per buffer, binding index == declaration index.
pub(crate) fn layout_bindings(usages: &[BufferUsage]) -> Vec<vk::DescriptorSetLayoutBinding> {
    usages
        .iter()
        .enumerate()
        .map(|(i, usage)| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(i as u32)
                .descriptor_type((*usage).into())
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build()
        })
        .collect()
}

impl DescriptorBindings {
    /// Build pool, layout and set, then point binding `i` at `buffers[i]`.
    pub(crate) fn new(device: &Device, buffers: &[Buffer]) -> Result<Self> {
        let mut bindings = DescriptorBindings::default();
        if let Err(err) = bindings.build(device, buffers) {
            bindings.destroy(device);
            return Err(err);
        }
        Ok(bindings)
    }

    fn build(&mut self, device: &Device, buffers: &[Buffer]) -> Result<()> {
        let sizes = pool_sizes(buffers.len() as u32);
        self.pool = unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(1)
                    .pool_sizes(&sizes)
                    .build(),
                None,
            )
        }
        .creating("descriptor pool")?;

        let usages: Vec<BufferUsage> = buffers.iter().map(|b| b.usage).collect();
        let layout_bindings = layout_bindings(&usages);
        self.layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder()
                    .bindings(&layout_bindings)
                    .build(),
                None,
            )
        }
        .creating("descriptor set layout")?;

        let layouts = [self.layout];
        let sets = unsafe {
            device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(self.pool)
                    .set_layouts(&layouts)
                    .build(),
            )
        }
        .creating("descriptor set")?;
        self.set = sets[0];

        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = buffers
            .iter()
            .map(|b| {
                [vk::DescriptorBufferInfo {
                    buffer: b.raw,
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                }]
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = buffers
            .iter()
            .zip(buffer_infos.iter())
            .enumerate()
            .map(|(i, (b, info))| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(i as u32)
                    .descriptor_type(b.usage.into())
                    .buffer_info(info)
                    .build()
            })
            .collect();

        if !writes.is_empty() {
            unsafe { device.update_descriptor_sets(&writes, &[]) };
        }

        Ok(())
    }

    /// Free the set, then destroy the layout and the pool.
    pub(crate) fn destroy(&mut self, device: &Device) {
        unsafe {
            if self.set != vk::DescriptorSet::null() {
                // Only fails for pools without FREE_DESCRIPTOR_SET.
                let _ = device.free_descriptor_sets(self.pool, &[self.set]);
                self.set = vk::DescriptorSet::null();
            }
            if self.layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.layout, None);
                self.layout = vk::DescriptorSetLayout::null();
            }
            if self.pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(self.pool, None);
                self.pool = vk::DescriptorPool::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_holds_every_binding_of_either_kind() {
        let sizes = pool_sizes(3);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3);
        assert_eq!(sizes[1].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(sizes[1].descriptor_count, 3);
    }

    #[test]
    fn empty_pool_still_has_nonzero_sizes() {
        assert!(pool_sizes(0).iter().all(|s| s.descriptor_count == 1));
    }

    #[test]
    fn layout_bindings_follow_declaration_order() {
        let bindings = layout_bindings(&[
            BufferUsage::STORAGE,
            BufferUsage::UNIFORM,
            BufferUsage::STORAGE,
        ]);
        assert_eq!(bindings.len(), 3);
        for (i, b) in bindings.iter().enumerate() {
            assert_eq!(b.binding, i as u32);
            assert_eq!(b.descriptor_count, 1);
            assert_eq!(b.stage_flags, vk::ShaderStageFlags::COMPUTE);
        }
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[2].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
    }
}
