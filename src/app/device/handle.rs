use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::app::adb::device::RemoteDevice;

/// Holds the live device connection. Every operation resolves the connection
/// through [`DeviceHandle::get`], so a swap is seen by all later calls while
/// calls already holding the old `Arc` finish on it.
pub struct DeviceHandle {
    current: RwLock<Arc<dyn RemoteDevice>>,
    generation: AtomicU64,
}

impl DeviceHandle {
    pub fn new(device: Arc<dyn RemoteDevice>) -> Self {
        Self {
            current: RwLock::new(device),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> Arc<dyn RemoteDevice> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Returns `false` when `device` is already the current connection.
    pub fn replace(&self, device: Arc<dyn RemoteDevice>) -> bool {
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::ptr_eq(&guard, &device) {
            return false;
        }
        *guard = device;
        self.generation.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn serial(&self) -> String {
        self.get().serial().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::device::testing::FakeDevice;

    #[test]
    fn replace_is_visible_to_next_get_and_bumps_generation() {
        let first: Arc<dyn RemoteDevice> = Arc::new(FakeDevice::new("OLD"));
        let handle = DeviceHandle::new(Arc::clone(&first));
        let in_flight = handle.get();

        assert!(!handle.replace(Arc::clone(&first)));
        assert_eq!(handle.generation(), 0);

        assert!(handle.replace(Arc::new(FakeDevice::new("NEW"))));
        assert_eq!(handle.generation(), 1);
        assert_eq!(handle.serial(), "NEW");
        assert_eq!(in_flight.serial(), "OLD");
    }
}
