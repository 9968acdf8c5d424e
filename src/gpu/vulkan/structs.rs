use std::cell::Cell;
use std::path::Path;

#[cfg(feature = "dashi-serde")]
use serde::{Deserialize, Serialize};

use super::{CommandQueue, ComputePipeline};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct ContextInfo {
    pub application_name: String,
    pub application_version: u32,
    /// Force validation layers on or off. `None` defers to `DASHI_VALIDATION`.
    pub enable_validation: Option<bool>,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            application_name: "dashi-compute".to_string(),
            application_version: 0,
            enable_validation: None,
        }
    }
}

/// Instance-level Vulkan version.
#[repr(C)]
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub enum VulkanVersion {
    #[default]
    V1_0,
    V1_1,
    V1_2,
    V1_3,
}

impl VulkanVersion {
    pub fn from_minor(minor: u32) -> Self {
        match minor {
            1 => VulkanVersion::V1_1,
            2 => VulkanVersion::V1_2,
            3 => VulkanVersion::V1_3,
            _ => VulkanVersion::V1_0,
        }
    }
}

/// Hardware limits relevant to compute work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextLimits {
    pub queue_count: u32,
    pub max_push_constant_size: u32,
    pub max_compute_work_group_count: [u32; 3],
    pub max_uniform_buffer_range: u32,
    pub max_storage_buffer_range: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct CommandInfo<'a> {
    pub debug_name: &'a str,
    pub is_secondary: bool,
}

#[repr(C)]
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub enum BufferUsage {
    UNIFORM,
    #[default]
    STORAGE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingInfo<'a> {
    pub element_size: u32,
    pub element_count: u32,
    pub usage: BufferUsage,
    pub initial_data: Option<&'a [u8]>,
    pub keep_mapped: bool,
}

impl<'a> Default for BindingInfo<'a> {
    fn default() -> Self {
        Self {
            element_size: 4,
            element_count: 1,
            usage: BufferUsage::STORAGE,
            initial_data: None,
            keep_mapped: false,
        }
    }
}

impl<'a> BindingInfo<'a> {
    pub fn byte_size(&self) -> u64 {
        self.element_size as u64 * self.element_count as u64
    }
}

/// Push-constant payload.
///
/// `Owned` bytes are copied out of the caller's buffer up front, so the source
/// can be changed or freed right after. `Borrowed` data is read each time the
/// pipeline is recorded, so the caller may change it between dispatches; the
/// borrow keeps it alive for as long as the pipeline.
///
/// Sizes must be a multiple of 4 bytes.
#[derive(Debug, Clone)]
pub enum ConstantData<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a [Cell<u8>]),
}

impl<'a> ConstantData<'a> {
    pub fn len(&self) -> usize {
        match self {
            ConstantData::Owned(d) => d.len(),
            ConstantData::Borrowed(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct PushConstantInfo<'a> {
    pub data: ConstantData<'a>,
}

impl<'a> PushConstantInfo<'a> {
    pub fn owned(data: &[u8]) -> Self {
        Self {
            data: ConstantData::Owned(data.to_vec()),
        }
    }

    pub fn borrowed(data: &'a [Cell<u8>]) -> Self {
        Self {
            data: ConstantData::Borrowed(data),
        }
    }
}

/// Everything needed to build a [`ComputePipeline`].
///
/// `'i` only has to last for the [`ComputePipeline::new`] call. `'c` is the
/// lifetime of borrowed push constants, which the pipeline keeps reading.
#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineInfo<'i, 'c> {
    pub debug_name: &'i str,
    pub shader_path: &'i Path,
    pub bindings: &'i [BindingInfo<'i>],
    pub constants: &'i [PushConstantInfo<'c>],
    /// Workgroup count along x. Zero infers it from the largest binding.
    pub dispatch_count: u32,
}

impl<'i, 'c> Default for ComputePipelineInfo<'i, 'c> {
    fn default() -> Self {
        Self {
            debug_name: "",
            shader_path: Path::new(""),
            bindings: &[],
            constants: &[],
            dispatch_count: 0,
        }
    }
}

#[repr(C)]
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub enum RecordMode {
    Nested,
    #[default]
    Dispatch,
}

/// What to append to a command during [`CommandQueue::record`].
#[derive(Clone, Copy, Default)]
pub struct RecordInfo<'r> {
    pub mode: RecordMode,
    pub pipeline: Option<&'r ComputePipeline<'r>>,
    pub command: Option<&'r CommandQueue<'r>>,
}

impl<'r> RecordInfo<'r> {
    pub fn dispatch(pipeline: &'r ComputePipeline<'r>) -> Self {
        Self {
            mode: RecordMode::Dispatch,
            pipeline: Some(pipeline),
            command: None,
        }
    }

    pub fn nested(command: &'r CommandQueue<'r>) -> Self {
        Self {
            mode: RecordMode::Nested,
            pipeline: None,
            command: Some(command),
        }
    }
}
