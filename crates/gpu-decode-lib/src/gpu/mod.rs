//! GPU device selection and primary context management.
//!
//! The driver exposes one mutable "current device" per thread. Nothing here
//! assumes it stays put between calls: every GPU-touching operation runs
//! under a [`DeviceGuard`] which selects the session's device and puts the
//! previous selection back afterwards.

mod context;
#[cfg(feature = "cuda")]
pub mod cuda;
mod guard;

pub use context::PrimaryContext;
pub use guard::DeviceGuard;

use crate::error::SessionError;

/// Opaque handle to a device's primary execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextHandle(usize);

impl ContextHandle {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> usize {
        self.0
    }
}

/// Driver level operations the session needs.
pub trait GpuDriver {
    /// Whatever has to be saved to put the current selection back.
    type Selection;

    fn device_count(&self) -> Result<usize, SessionError>;

    fn current(&self) -> Result<Self::Selection, SessionError>;

    fn select(&self, device: usize) -> Result<(), SessionError>;

    fn restore(&self, selection: Self::Selection) -> Result<(), SessionError>;

    /// Adds one reference to the device's primary context.
    fn retain_primary_context(&self, device: usize) -> Result<ContextHandle, SessionError>;

    /// Drops one reference taken by `retain_primary_context`.
    fn release_primary_context(&self, device: usize) -> Result<(), SessionError>;
}
