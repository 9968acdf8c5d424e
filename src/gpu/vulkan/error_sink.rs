use std::cell::RefCell;
use std::fmt;

use super::{ErrorCode, GPUError};

/// Callback invoked with the code and message of every failed operation.
pub type ErrorCallback = Box<dyn Fn(ErrorCode, &str) + Send>;

/// Per-context failure hook.
///
/// Holds at most one callback; registering a new one replaces the previous
/// one. Every failure is also logged through `tracing` whether or not a
/// callback is present.
#[derive(Default)]
pub struct ErrorSink {
    callback: RefCell<Option<ErrorCallback>>,
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback<F>(&self, f: F)
    where
        F: Fn(ErrorCode, &str) + Send + 'static,
    {
        *self.callback.borrow_mut() = Some(Box::new(f));
    }

    pub fn clear_callback(&self) {
        self.callback.borrow_mut().take();
    }

    pub fn has_callback(&self) -> bool {
        self.callback.borrow().is_some()
    }

    /// Forward `err` to the callback and hand it back for propagation.
    pub fn report(&self, err: GPUError) -> GPUError {
        let code = err.code();
        let message = err.to_string();
        tracing::error!(code = code as i32, "{}", message);
        if let Some(cb) = self.callback.borrow().as_ref() {
            cb(code, &message);
        }
        err
    }
}
