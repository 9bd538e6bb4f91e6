use std::sync::{Arc, Mutex};

use crate::app::device::fastboot_lock::FastbootLock;
use crate::app::models::DeviceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Unchanged,
    Applied { from: DeviceState, to: DeviceState },
    /// A bootloader command held the fastboot lock; the request was dropped.
    Dropped,
}

/// Current coarse state of the device. Transitions into or out of FASTBOOT
/// must win the fastboot lock.
pub struct DeviceStateTracker {
    state: Mutex<DeviceState>,
    fastboot_lock: Arc<FastbootLock>,
}

impl DeviceStateTracker {
    pub fn new(initial: DeviceState, fastboot_lock: Arc<FastbootLock>) -> Self {
        Self {
            state: Mutex::new(initial),
            fastboot_lock,
        }
    }

    pub fn current(&self) -> DeviceState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn request(&self, requested: DeviceState) -> StateChange {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let from = *state;
        if from == requested {
            return StateChange::Unchanged;
        }
        let gated = from == DeviceState::Fastboot || requested == DeviceState::Fastboot;
        let _permit = if gated {
            match self.fastboot_lock.try_acquire() {
                Some(permit) => Some(permit),
                None => return StateChange::Dropped,
            }
        } else {
            None
        };
        *state = requested;
        StateChange::Applied {
            from,
            to: requested,
        }
    }
}
