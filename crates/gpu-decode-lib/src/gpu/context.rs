use super::{ContextHandle, DeviceGuard, GpuDriver};
use crate::error::SessionError;

/// One retain of a device's primary context.
///
/// `release` consumes the value, so a retain can be released at most once.
/// Dropping without releasing leaks the retain and is logged.
#[derive(Debug)]
pub struct PrimaryContext {
    device: usize,
    handle: ContextHandle,
    released: bool,
}

impl PrimaryContext {
    pub fn acquire<G: GpuDriver>(driver: &G, device: usize) -> Result<Self, SessionError> {
        let count = driver.device_count()?;
        if device >= count {
            return Err(SessionError::device(
                device,
                format!("invalid device index ({} devices available)", count),
            ));
        }

        let _guard = DeviceGuard::new(driver, device)?;
        let handle = driver.retain_primary_context(device)?;
        log::debug!("Retained primary context {:#x} on device {}", handle.as_raw(), device);

        Ok(Self {
            device,
            handle,
            released: false,
        })
    }

    /// Gives the retain back. The release is attempted even when the device
    /// cannot be selected; that selection error is still returned.
    pub fn release<G: GpuDriver>(mut self, driver: &G) -> Result<(), SessionError> {
        let guard = DeviceGuard::new(driver, self.device);
        let released = driver.release_primary_context(self.device);
        let selected = guard.map(drop);
        released?;
        self.released = true;
        log::debug!("Released primary context on device {}", self.device);
        selected
    }

    pub fn device(&self) -> usize {
        self.device
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }
}

impl Drop for PrimaryContext {
    fn drop(&mut self) {
        if !self.released {
            log::warn!(
                "Primary context on device {} dropped without release",
                self.device
            );
        }
    }
}
