//! Cross-thread IR handoff
//!
//! Single-slot mailbox between the loader (control) side and the audio
//! callback. The producer locks unconditionally; the audio thread only ever
//! calls `try_lock` and skips the block if the slot is busy.
//!
//! The slot also parks the IR displaced by an install, so the audio thread
//! never runs a destructor. The producer drops it on its next `queue`.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Result of one non-blocking drain attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Nothing pending
    Idle,
    /// A pending item was handed to the apply closure
    Applied,
    /// Producer held the lock; retry next block
    Contended,
}

pub(crate) struct Slot<T> {
    pending: Option<T>,
    retired: Option<T>,
}

pub struct IrHandoff<T> {
    slot: Mutex<Slot<T>>,
    contended: AtomicU64,
}

impl<T> IrHandoff<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                retired: None,
            }),
            contended: AtomicU64::new(0),
        }
    }

    /// Publish a ready-to-install item (producer side, never fails).
    ///
    /// Overwrites any item not yet consumed. Returns true if one was replaced.
    pub fn queue(&self, item: T) -> bool {
        let (replaced, retired) = {
            let mut slot = self.slot.lock();
            (slot.pending.replace(item), slot.retired.take())
        };
        // Freed outside the lock so the audio thread's try_lock window stays short
        drop(retired);
        replaced.is_some()
    }

    /// Try to take the pending item (audio side, never blocks).
    ///
    /// `apply` receives the item and returns whatever must be released (the
    /// displaced item, or the item itself if it was refused); that value is
    /// parked in the slot rather than dropped here.
    pub fn try_consume<F>(&self, apply: F) -> Drain
    where
        F: FnOnce(T) -> Option<T>,
    {
        let Some(mut slot) = self.slot.try_lock() else {
            self.contended.fetch_add(1, Ordering::Relaxed);
            return Drain::Contended;
        };
        let Some(item) = slot.pending.take() else {
            return Drain::Idle;
        };

        let release = apply(item);
        if release.is_some() {
            // Every apply follows a queue, and queue empties `retired`
            debug_assert!(slot.retired.is_none());
            slot.retired = release;
        }
        Drain::Applied
    }

    /// Drop both the pending and the parked item (control side)
    pub fn clear(&self) {
        let (pending, retired) = {
            let mut slot = self.slot.lock();
            (slot.pending.take(), slot.retired.take())
        };
        drop((pending, retired));
    }

    /// Drop the parked item only (control side)
    pub fn collect_garbage(&self) -> bool {
        let retired = self.slot.lock().retired.take();
        retired.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }

    /// Drains that found the producer holding the lock
    pub fn contended_count(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }

    /// Hold the producer lock, simulating a loader mid-`queue`
    #[cfg(test)]
    pub(crate) fn hold(&self) -> parking_lot::MutexGuard<'_, Slot<T>> {
        self.slot.lock()
    }
}

impl<T> Default for IrHandoff<T> {
    fn default() -> Self {
        Self::new()
    }
}
