//! Compute backends.
//!
//! Only Vulkan is implemented. A backend exposes a [`Context`] that owns the
//! device, [`ComputePipeline`]s that bundle buffers with a shader, and
//! [`CommandQueue`]s that record and run dispatches.

#[cfg(feature = "dashi-vulkan")]
pub mod vulkan;

#[cfg(feature = "dashi-vulkan")]
pub use vulkan::*;
