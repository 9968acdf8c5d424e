use ash::vk;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanError {
    pub(crate) res: vk::Result,
    pub(crate) op: &'static str,
}

impl VulkanError {
    pub(crate) fn new(op: &'static str, res: vk::Result) -> Self {
        Self { res, op }
    }

    /// Raw Vulkan result code.
    pub fn result(&self) -> vk::Result {
        self.res
    }
}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op.is_empty() {
            write!(f, "Vulkan Error: {}", self.res)
        } else {
            write!(f, "Vulkan Error: {} failed with {}", self.op, self.res)
        }
    }
}

impl std::error::Error for VulkanError {}

/// Stable numeric codes handed to the error callback.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Generic = 1,
    NullArgument = 2,
    InvalidArgument = 3,
    Internal = 4,
    BindingNotMapped = 5,
    Io = 6,
    Creation = 7,
    DeviceLost = 8,
    ResourceExhausted = 9,
}

#[derive(Debug, thiserror::Error)]
pub enum GPUError {
    #[error("required argument missing: {0}")]
    NullArgument(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("unable to read shader: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Vulkan(VulkanError),

    #[error("failed to create {what}: {source}")]
    Creation {
        what: &'static str,
        source: VulkanError,
    },

    #[error("binding {0} is not mapped")]
    BindingNotMapped(u32),

    #[error("device lost")]
    DeviceLost,

    #[error("all {0} queues of the compute family are in use")]
    QueuesExhausted(u32),

    #[error("unable to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;

impl GPUError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GPUError::NullArgument(_) => ErrorCode::NullArgument,
            GPUError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            GPUError::Io(_) => ErrorCode::Io,
            GPUError::Vulkan(_) => ErrorCode::Internal,
            GPUError::Creation { .. } => ErrorCode::Creation,
            GPUError::BindingNotMapped(_) => ErrorCode::BindingNotMapped,
            GPUError::DeviceLost => ErrorCode::DeviceLost,
            GPUError::QueuesExhausted(_) => ErrorCode::ResourceExhausted,
            GPUError::Loading(_) => ErrorCode::Generic,
        }
    }

    pub(crate) fn vulkan(op: &'static str, res: vk::Result) -> Self {
        GPUError::Vulkan(VulkanError::new(op, res))
    }

    pub(crate) fn creation(what: &'static str, res: vk::Result) -> Self {
        GPUError::Creation {
            what,
            source: VulkanError::new("", res),
        }
    }
}

impl From<ash::vk::Result> for GPUError {
    fn from(res: ash::vk::Result) -> Self {
        if res == vk::Result::ERROR_DEVICE_LOST {
            return GPUError::DeviceLost;
        }
        GPUError::Vulkan(VulkanError::new("", res))
    }
}

/// Map a failed creation call into [`GPUError::Creation`].
pub(crate) trait CreationExt<T> {
    fn creating(self, what: &'static str) -> Result<T>;
}

impl<T> CreationExt<T> for std::result::Result<T, vk::Result> {
    fn creating(self, what: &'static str) -> Result<T> {
        self.map_err(|res| GPUError::creation(what, res))
    }
}

/// Map a failed call into [`GPUError::Vulkan`], tagging the operation.
pub(crate) trait InternalExt<T> {
    fn internal(self, op: &'static str) -> Result<T>;
}

impl<T> InternalExt<T> for std::result::Result<T, vk::Result> {
    fn internal(self, op: &'static str) -> Result<T> {
        self.map_err(|res| GPUError::vulkan(op, res))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_kinds() {
        assert_eq!(GPUError::NullArgument("x").code(), ErrorCode::NullArgument);
        assert_eq!(
            GPUError::InvalidArgument("x").code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(GPUError::BindingNotMapped(3).code(), ErrorCode::BindingNotMapped);
        assert_eq!(GPUError::DeviceLost.code(), ErrorCode::DeviceLost);
        assert_eq!(
            GPUError::QueuesExhausted(4).code(),
            ErrorCode::ResourceExhausted
        );
        assert_eq!(
            GPUError::vulkan("vkQueueSubmit", vk::Result::ERROR_OUT_OF_HOST_MEMORY).code(),
            ErrorCode::Internal
        );
        assert_eq!(
            GPUError::creation("fence", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).code(),
            ErrorCode::Creation
        );
    }

    #[test]
    fn device_lost_result_converts_to_device_lost() {
        let err: GPUError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, GPUError::DeviceLost));

        let err: GPUError = vk::Result::ERROR_OUT_OF_HOST_MEMORY.into();
        assert!(matches!(err, GPUError::Vulkan(_)));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.spv");
        let err: GPUError = io.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }

    #[test]
    fn messages_name_the_operation() {
        let err = GPUError::vulkan("vkEndCommandBuffer", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let msg = err.to_string();
        assert!(msg.contains("vkEndCommandBuffer"), "{msg}");

        let err = GPUError::creation("descriptor pool", vk::Result::ERROR_FRAGMENTATION);
        assert!(err.to_string().starts_with("failed to create descriptor pool"));
    }

    #[test]
    fn creation_ext_maps_errors() {
        let res: std::result::Result<u32, vk::Result> = Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        assert!(matches!(res.creating("device"), Err(GPUError::Creation { what: "device", .. })));

        let res: std::result::Result<u32, vk::Result> = Ok(7);
        assert_eq!(res.internal("anything").unwrap(), 7);
    }
}
