use super::GpuDriver;
use crate::error::SessionError;

/// Selects a device for the guard's lifetime and restores the previous
/// selection when dropped, on every exit path.
pub struct DeviceGuard<'a, G: GpuDriver> {
    driver: &'a G,
    device: usize,
    previous: Option<G::Selection>,
}

impl<'a, G: GpuDriver> DeviceGuard<'a, G> {
    pub fn new(driver: &'a G, device: usize) -> Result<Self, SessionError> {
        let previous = driver.current()?;
        driver.select(device)?;
        Ok(Self {
            driver,
            device,
            previous: Some(previous),
        })
    }

    pub fn device(&self) -> usize {
        self.device
    }
}

impl<G: GpuDriver> Drop for DeviceGuard<'_, G> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(e) = self.driver.restore(previous) {
                log::warn!(
                    "Failed to restore device selection after using device {}: {}",
                    self.device,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeDriver};

    #[test]
    fn test_guard_restores_previous_device() {
        let driver = FakeDriver::new(2);
        driver.set_current(Some(1));
        {
            let guard = DeviceGuard::new(&driver, 0).unwrap();
            assert_eq!(guard.device(), 0);
            assert_eq!(driver.current_device(), Some(0));
        }
        assert_eq!(driver.current_device(), Some(1));
    }

    #[test]
    fn test_guard_restores_unset_selection() {
        let driver = FakeDriver::new(1);
        {
            let _guard = DeviceGuard::new(&driver, 0).unwrap();
            assert_eq!(driver.current_device(), Some(0));
        }
        assert_eq!(driver.current_device(), None);
    }

    #[test]
    fn test_guard_restores_on_error_path() {
        let driver = FakeDriver::new(2);
        driver.set_current(Some(1));
        let result: Result<(), SessionError> = (|| {
            let _guard = DeviceGuard::new(&driver, 0)?;
            Err(SessionError::Decode("corrupt slice".into()))
        })();
        assert!(result.is_err());
        assert_eq!(driver.current_device(), Some(1));
    }

    #[test]
    fn test_nested_guards_unwind_in_order() {
        let driver = FakeDriver::new(2);
        {
            let _outer = DeviceGuard::new(&driver, 0).unwrap();
            {
                let _inner = DeviceGuard::new(&driver, 1).unwrap();
                assert_eq!(driver.current_device(), Some(1));
            }
            assert_eq!(driver.current_device(), Some(0));
        }
        assert_eq!(driver.current_device(), None);
        assert_eq!(
            driver.calls(),
            vec![
                Call::Select(0),
                Call::Select(1),
                Call::Restore(Some(0)),
                Call::Restore(None)
            ]
        );
    }
}
