use ash::vk;
use bytemuck::Pod;

use super::descriptor_sets::DescriptorBindings;
use super::{
    check_binding_range, BindingInfo, Buffer, ComputePipelineInfo, Context, CreationExt, GPUError,
    PushConstantLayout, Result,
};

/// Workgroup count along x: the explicit count when nonzero, otherwise the
/// largest element count among the bindings.
pub fn resolve_dispatch_count(explicit: u32, bindings: &[BindingInfo]) -> u32 {
    if explicit != 0 {
        return explicit;
    }
    bindings.iter().map(|b| b.element_count).max().unwrap_or(0)
}

/// Reinterpret a shader file as native-endian 32-bit words. Trailing bytes
/// that do not fill a word are dropped; the contents are not validated.
pub fn spirv_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

/// Buffers, descriptor set, push constants and compiled program for one
/// compute workload.
///
/// Binding `i` of the descriptor set always refers to buffer `i`. The only
/// mutation after creation is mapping/unmapping a buffer's host memory.
pub struct ComputePipeline<'a> {
    ctx: &'a Context,
    debug_name: String,
    buffers: Vec<Buffer>,
    shader: vk::ShaderModule,
    descriptors: DescriptorBindings,
    push_constants: PushConstantLayout<'a>,
    layout: vk::PipelineLayout,
    cache: vk::PipelineCache,
    raw: vk::Pipeline,
    dispatch_count: u32,
}

impl<'a> std::fmt::Debug for ComputePipeline<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipeline")
            .field("debug_name", &self.debug_name)
            .field("bindings", &self.buffers.len())
            .field("push_constants", &self.push_constants.len())
            .field("dispatch_count", &self.dispatch_count)
            .finish()
    }
}

impl<'a> ComputePipeline<'a> {
    /// Build every resource of the pipeline in one call.
    ///
    /// Order: buffers (+ memory, initial data, mapping), shader module,
    /// descriptor pool, set layout, set, push-constant layout, pipeline cache
    /// and layout, compute pipeline, dispatch count. If any step fails the
    /// resources created so far are released before the error is returned.
    ///
    /// Only borrowed push constants are held past this call.
    pub fn new(ctx: &'a Context, info: &ComputePipelineInfo<'_, 'a>) -> Result<Self> {
        Self::build(ctx, info).map_err(|err| ctx.report(err))
    }

    fn build(ctx: &'a Context, info: &ComputePipelineInfo<'_, 'a>) -> Result<Self> {
        let push_constants = PushConstantLayout::new(info.constants)?;
        let limits = ctx.limits();
        if push_constants.total_size() > limits.max_push_constant_size {
            return Err(GPUError::InvalidArgument(
                "push constants exceed the device limit",
            ));
        }
        for binding in info.bindings {
            check_binding_range(binding, &limits)?;
        }

        let mut pipeline = ComputePipeline {
            ctx,
            debug_name: info.debug_name.to_string(),
            buffers: Vec::with_capacity(info.bindings.len()),
            shader: vk::ShaderModule::null(),
            descriptors: DescriptorBindings::default(),
            push_constants,
            layout: vk::PipelineLayout::null(),
            cache: vk::PipelineCache::null(),
            raw: vk::Pipeline::null(),
            dispatch_count: 0,
        };
        let device = &ctx.device;

        for binding in info.bindings {
            let buffer = Buffer::new(device, &ctx.memory_properties, binding)?;
            ctx.set_name(buffer.raw, info.debug_name, vk::ObjectType::BUFFER);
            pipeline.buffers.push(buffer);
        }

        let bytes = std::fs::read(info.shader_path)?;
        let code = spirv_words(&bytes);
        pipeline.shader = unsafe {
            device.create_shader_module(
                &vk::ShaderModuleCreateInfo::builder().code(&code).build(),
                None,
            )
        }
        .creating("shader module")?;

        pipeline.descriptors = DescriptorBindings::new(device, &pipeline.buffers)?;

        pipeline.cache = unsafe {
            device.create_pipeline_cache(&vk::PipelineCacheCreateInfo::builder().build(), None)
        }
        .creating("pipeline cache")?;

        let set_layouts = [pipeline.descriptors.layout];
        let ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: pipeline.push_constants.total_size(),
        }];
        let ranges: &[vk::PushConstantRange] = if pipeline.push_constants.is_empty() {
            &[]
        } else {
            &ranges
        };
        pipeline.layout = unsafe {
            device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(&set_layouts)
                    .push_constant_ranges(ranges)
                    .build(),
                None,
            )
        }
        .creating("pipeline layout")?;

        // SAFETY: static null-terminated string.
        let entry_point = unsafe { std::ffi::CStr::from_bytes_with_nul_unchecked(b"main\0") };
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(pipeline.shader)
            .name(entry_point)
            .build();
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .layout(pipeline.layout)
            .stage(stage)
            .build();
        let pipelines = unsafe {
            device.create_compute_pipelines(pipeline.cache, &[pipeline_info], None)
        }
        .map_err(|(_, res)| res)
        .creating("compute pipeline")?;
        pipeline.raw = pipelines[0];
        ctx.set_name(pipeline.raw, info.debug_name, vk::ObjectType::PIPELINE);

        pipeline.dispatch_count = resolve_dispatch_count(info.dispatch_count, info.bindings);
        if pipeline.dispatch_count > limits.max_compute_work_group_count[0] {
            tracing::warn!(
                pipeline = info.debug_name,
                count = pipeline.dispatch_count,
                limit = limits.max_compute_work_group_count[0],
                "dispatch count exceeds the device work-group limit"
            );
        }

        tracing::info!(
            pipeline = info.debug_name,
            bindings = pipeline.buffers.len(),
            push_constants = pipeline.push_constants.len(),
            dispatch = pipeline.dispatch_count,
            "created compute pipeline"
        );

        Ok(pipeline)
    }

    fn buffer(&self, index: u32) -> Result<&Buffer> {
        self.buffers
            .get(index as usize)
            .ok_or_else(|| self.ctx.report(GPUError::InvalidArgument("binding index out of range")))
    }

    fn buffer_mut(&mut self, index: u32) -> Result<&mut Buffer> {
        let ctx = self.ctx;
        self.buffers
            .get_mut(index as usize)
            .ok_or_else(|| ctx.report(GPUError::InvalidArgument("binding index out of range")))
    }

    /// Map a binding's memory and return the host pointer.
    ///
    /// The pointer stays valid until [`Self::unmap_binding_memory`] or the
    /// pipeline is destroyed. The caller must not touch it while a submission
    /// using this pipeline is in flight.
    pub fn map_binding_memory(&mut self, index: u32) -> Result<*mut u8> {
        let ctx = self.ctx;
        let buffer = self.buffer_mut(index)?;
        buffer
            .map(&ctx.device)
            .map(|p| p.as_ptr())
            .map_err(|err| ctx.report(err))
    }

    /// Release a binding's mapping. Pointers previously handed out for it
    /// become invalid. Unmapping an unmapped binding does nothing.
    pub fn unmap_binding_memory(&mut self, index: u32) -> Result<()> {
        let ctx = self.ctx;
        let buffer = self.buffer_mut(index)?;
        buffer.unmap(&ctx.device);
        Ok(())
    }

    /// Host pointer of a binding created with `keep_mapped`.
    ///
    /// Fails with `BindingNotMapped` for every other binding, even one mapped
    /// through [`Self::map_binding_memory`], and for a kept binding that has
    /// since been unmapped.
    pub fn binding_memory(&self, index: u32) -> Result<*mut u8> {
        let buffer = self.buffer(index)?;
        match buffer.mapped {
            Some(ptr) if buffer.keep_mapped => Ok(ptr.as_ptr()),
            _ => Err(self.ctx.report(GPUError::BindingNotMapped(index))),
        }
    }

    /// Current mapping of a binding, however it was made.
    fn mapped_ptr(&self, index: u32) -> Result<*mut u8> {
        self.buffer(index)?
            .mapped
            .map(|p| p.as_ptr())
            .ok_or_else(|| self.ctx.report(GPUError::BindingNotMapped(index)))
    }

    /// Typed view over a mapped binding.
    pub fn binding_slice<T: Pod>(&self, index: u32) -> Result<&[T]> {
        let size = self.buffer(index)?.size as usize;
        let ptr = self.mapped_ptr(index)?;
        let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, size) };
        bytemuck::try_cast_slice(bytes).map_err(|_| {
            self.ctx.report(GPUError::InvalidArgument(
                "binding size is not a multiple of the element type",
            ))
        })
    }

    /// Mutable typed view over a mapped binding.
    pub fn binding_slice_mut<T: Pod>(&mut self, index: u32) -> Result<&mut [T]> {
        let size = self.buffer(index)?.size as usize;
        let ptr = self.mapped_ptr(index)?;
        let ctx = self.ctx;
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr, size) };
        bytemuck::try_cast_slice_mut(bytes).map_err(|_| {
            ctx.report(GPUError::InvalidArgument(
                "binding size is not a multiple of the element type",
            ))
        })
    }

    pub fn binding_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn binding_byte_size(&self, index: u32) -> Option<u64> {
        self.buffers.get(index as usize).map(|b| b.size)
    }

    pub fn is_binding_mapped(&self, index: u32) -> bool {
        self.buffers
            .get(index as usize)
            .map(|b| b.mapped.is_some())
            .unwrap_or(false)
    }

    pub fn dispatch_count(&self) -> u32 {
        self.dispatch_count
    }

    pub fn push_constants(&self) -> &PushConstantLayout<'a> {
        &self.push_constants
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub(crate) fn context(&self) -> &'a Context {
        self.ctx
    }

    pub(crate) fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub(crate) fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub(crate) fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptors.set
    }

    /// Release every resource of the pipeline.
    ///
    /// # Prerequisites
    /// - No submission using this pipeline may still be executing.
    pub fn destroy(self) {
        drop(self);
    }
}

impl<'a> Drop for ComputePipeline<'a> {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        for buffer in self.buffers.iter_mut() {
            buffer.destroy(device);
        }
        self.buffers.clear();

        self.descriptors.destroy(device);
        unsafe {
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
            }
            if self.cache != vk::PipelineCache::null() {
                device.destroy_pipeline_cache(self.cache, None);
            }
            if self.shader != vk::ShaderModule::null() {
                device.destroy_shader_module(self.shader, None);
            }
            if self.raw != vk::Pipeline::null() {
                device.destroy_pipeline(self.raw, None);
            }
        }
        tracing::info!(pipeline = self.debug_name.as_str(), "destroyed compute pipeline");
    }
}
