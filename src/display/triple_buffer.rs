//! Triple buffer for handing the latest sample to the host
//!
//! Three slots are rotated between the writer (a stream sink's delivery
//! thread) and the reader (the host polling for the newest sample):
//! - **Write slot**: owned by the writer while it fills it
//! - **Back slot**: the most recent completed write, waiting to be picked up
//! - **Read slot**: owned by the reader while it inspects it
//!
//! The back slot index and the "fresh" flag live in one atomic byte, so a
//! publish and a pick-up can never interleave half way.
//!
//! # Safety
//!
//! Slots are `UnsafeCell`s. Each slot index is held by exactly one of the
//! write index, the back byte, or the read index at any time; the write and
//! read indices sit behind their own mutexes so at most one writer and one
//! reader touch their slot concurrently.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const INDEX_MASK: u8 = 0b011;
const FRESH: u8 = 0b100;

pub struct TripleBuffer<T> {
    slots: [UnsafeCell<T>; 3],

    /// Back slot index, ORed with `FRESH` when it holds an unread write
    back: AtomicU8,

    write_idx: Mutex<u8>,
    read_idx: Mutex<u8>,
}

// Safety: slot access is partitioned as described in the module docs
unsafe impl<T: Send> Send for TripleBuffer<T> {}
// Safety: see above; only one writer and one reader reach a slot at a time
unsafe impl<T: Send> Sync for TripleBuffer<T> {}

impl<T> TripleBuffer<T> {
    pub fn new<F>(mut init_fn: F) -> Self
    where
        F: FnMut() -> T,
    {
        Self {
            slots: [
                UnsafeCell::new(init_fn()),
                UnsafeCell::new(init_fn()),
                UnsafeCell::new(init_fn()),
            ],
            back: AtomicU8::new(1),
            write_idx: Mutex::new(0),
            read_idx: Mutex::new(2),
        }
    }

    /// Fill the write slot and publish it as the newest value.
    ///
    /// An unread value in the back slot is overwritten.
    pub fn publish<F>(&self, fill: F)
    where
        F: FnOnce(&mut T),
    {
        let mut write_idx = self.write_idx.lock().unwrap_or_else(PoisonError::into_inner);

        // Safety: the write slot is reachable only through `write_idx`, which we hold
        let slot = unsafe { &mut *self.slots[*write_idx as usize].get() };
        fill(slot);

        let previous = self.back.swap(*write_idx | FRESH, Ordering::AcqRel);
        *write_idx = previous & INDEX_MASK;
    }

    /// Borrow the newest published value, picking it up first if it is fresh
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut read_idx = self.read_idx.lock().unwrap_or_else(PoisonError::into_inner);

        if self.back.load(Ordering::Acquire) & FRESH != 0 {
            let previous = self.back.swap(*read_idx, Ordering::AcqRel);
            *read_idx = previous & INDEX_MASK;
        }

        ReadGuard {
            buffer: self,
            read_idx,
        }
    }

    /// Whether a value was published since the last `read`
    pub fn has_fresh(&self) -> bool {
        self.back.load(Ordering::Acquire) & FRESH != 0
    }
}

/// Shared access to the read slot; holds the reader lock while alive
pub struct ReadGuard<'a, T> {
    buffer: &'a TripleBuffer<T>,
    read_idx: MutexGuard<'a, u8>,
}

impl<T> std::ops::Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: the read slot is reachable only through `read_idx`, which we hold
        unsafe { &*self.buffer.slots[*self.read_idx as usize].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_read_sees_last_publish() {
        let buffer = TripleBuffer::new(Vec::<u8>::new);
        assert!(!buffer.has_fresh());

        for i in 0..10 {
            buffer.publish(|slot| {
                slot.clear();
                slot.push(i);
            });
        }

        assert!(buffer.has_fresh());
        assert_eq!(&**buffer.read(), &[9]);
        assert!(!buffer.has_fresh());

        // Reading again without a publish keeps the same value
        assert_eq!(&**buffer.read(), &[9]);
    }

    #[test]
    fn test_no_torn_reads() {
        let buffer = Arc::new(TripleBuffer::new(|| vec![0u8; 1024]));
        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    buffer.publish(|slot| slot.fill((i % 256) as u8));
                }
            })
        };

        for _ in 0..2_000 {
            let read = buffer.read();
            let first = read[0];
            assert!(read.iter().all(|&b| b == first), "torn read");
        }
        writer.join().unwrap();
    }
}
