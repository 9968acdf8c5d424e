pub mod utils;
pub mod gpu;

#[cfg(not(feature = "dashi-vulkan"))]
compile_error!("dashi-compute needs a backend; enable the `dashi-vulkan` feature");

pub use gpu::*;
