#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use dashi_compute::{Context, ContextInfo};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static VALIDATION_ERRORS: AtomicUsize = AtomicUsize::new(0);
static INIT: Once = Once::new();

/// Counts validation-layer errors forwarded to `tracing` under the `vulkan`
/// target.
struct ValidationErrorCounter;

impl<S: Subscriber> Layer<S> for ValidationErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let meta = event.metadata();
        if *meta.level() == tracing::Level::ERROR && meta.target() == "vulkan" {
            VALIDATION_ERRORS.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Install the test subscriber once. `DASHI_LOG` selects the filter.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("DASHI_LOG")
            .unwrap_or_else(|_| EnvFilter::new("warn,vulkan=error"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .with(ValidationErrorCounter)
            .try_init();
    });
}

pub fn validation_errors() -> usize {
    VALIDATION_ERRORS.load(Ordering::SeqCst)
}

/// Context with validation forced on. Dropping it asserts that the
/// validation layers reported no API usage error while it was alive.
pub struct ValidationContext {
    ctx: Option<Context>,
    errors_at_start: usize,
}

impl ValidationContext {
    /// `None` when no Vulkan implementation is available on this machine.
    pub fn headless() -> Option<Self> {
        Self::with_info(&ContextInfo {
            application_name: "dashi-compute-tests".to_string(),
            enable_validation: Some(true),
            ..Default::default()
        })
    }

    pub fn with_info(info: &ContextInfo) -> Option<Self> {
        init_logging();
        let created = Context::new(info).or_else(|err| {
            if info.enable_validation == Some(true) {
                eprintln!("validation unavailable ({err}), retrying without it");
                Context::new(&ContextInfo {
                    enable_validation: Some(false),
                    ..info.clone()
                })
            } else {
                Err(err)
            }
        });
        match created {
            Ok(ctx) => Some(Self {
                ctx: Some(ctx),
                errors_at_start: validation_errors(),
            }),
            Err(err) => {
                eprintln!("skipping: no usable Vulkan device ({err})");
                None
            }
        }
    }
}

impl std::ops::Deref for ValidationContext {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        self.ctx.as_ref().expect("context should be present")
    }
}

impl std::ops::DerefMut for ValidationContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx.as_mut().expect("context should be present")
    }
}

impl Drop for ValidationContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.destroy();
        }
        if !std::thread::panicking() {
            assert_eq!(
                validation_errors(),
                self.errors_at_start,
                "Vulkan validation layers reported an API usage error"
            );
        }
    }
}

/// Create the context or return from the test.
macro_rules! context_or_skip {
    () => {
        match common::ValidationContext::headless() {
            Some(ctx) => ctx,
            None => return,
        }
    };
}

/// SPIR-V written to a temporary file, removed on drop.
pub struct ShaderFile {
    path: PathBuf,
}

impl ShaderFile {
    pub fn new(name: &str, words: &[u32]) -> Self {
        let path = std::env::temp_dir().join(format!(
            "dashi-compute-{}-{}.spv",
            name,
            std::process::id()
        ));
        std::fs::write(&path, bytemuck::cast_slice::<u32, u8>(words))
            .expect("write shader to temp dir");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ShaderFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Doubles every element of binding 0.
pub fn double_shader() -> ShaderFile {
    ShaderFile::new(
        "double",
        inline_spirv::inline_spirv!(
            r#"
            #version 450
            layout(local_size_x = 1) in;
            layout(set = 0, binding = 0) buffer Data { uint values[]; } data;
            void main() {
                uint idx = gl_GlobalInvocationID.x;
                data.values[idx] = data.values[idx] * 2u;
            }
            "#,
            comp
        ),
    )
}

/// Adds the push-constant `offset` to every element of binding 0.
pub fn add_constant_shader() -> ShaderFile {
    ShaderFile::new(
        "add-constant",
        inline_spirv::inline_spirv!(
            r#"
            #version 450
            layout(local_size_x = 1) in;
            layout(set = 0, binding = 0) buffer Data { uint values[]; } data;
            layout(push_constant) uniform Params { uint offset; } params;
            void main() {
                uint idx = gl_GlobalInvocationID.x;
                data.values[idx] = data.values[idx] + params.offset;
            }
            "#,
            comp
        ),
    )
}
