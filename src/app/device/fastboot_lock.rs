use std::sync::{Condvar, Mutex, MutexGuard};

/// Binary lock held for the duration of each bootloader command. State
/// changes involving FASTBOOT only try to take it and give up when busy.
#[derive(Debug, Default)]
pub struct FastbootLock {
    held: Mutex<bool>,
    cv: Condvar,
}

impl FastbootLock {
    pub fn new() -> Self {
        Self::default()
    }

    // The guarded value is a plain flag, so a poisoned lock is still coherent.
    fn flag(&self) -> MutexGuard<'_, bool> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn acquire(&self) -> FastbootPermit<'_> {
        let mut held = self.flag();
        while *held {
            held = self.cv.wait(held).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *held = true;
        FastbootPermit { lock: self }
    }

    pub fn try_acquire(&self) -> Option<FastbootPermit<'_>> {
        let mut held = self.flag();
        if *held {
            return None;
        }
        *held = true;
        Some(FastbootPermit { lock: self })
    }

    pub fn is_held(&self) -> bool {
        *self.flag()
    }

    fn release(&self) {
        let mut held = self.flag();
        *held = false;
        self.cv.notify_one();
    }
}

pub struct FastbootPermit<'a> {
    lock: &'a FastbootLock,
}

impl Drop for FastbootPermit<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
