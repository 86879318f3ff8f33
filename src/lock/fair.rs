// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::yield_now;

use crossbeam_utils::CachePadded;
use log::warn;

use super::LockFlavor;

const SPIN_ITERS: u32 = 100;
const WARN_ITERS: u32 = 10_000;

fn backoff(spins: &mut u32, what: &str) {
    *spins += 1;
    if *spins < SPIN_ITERS {
        spin_loop();
    } else {
        if *spins % WARN_ITERS == 0 {
            warn!(
                "FairReadLock {what} has spun {spins} times; a continuous reader \
                 stream may be starving it (this flavor never fixes that)"
            );
        }
        yield_now();
    }
}

/// Reader-preferred reader/writer lock. A new read acquisition only checks
/// whether a writer currently *holds* the lock, never whether one is
/// pending, so a steady stream of readers can starve a waiting writer
/// indefinitely. Offered for callers who know their workload is read-heavy
/// and would rather starve the rare writer than ever block a reader.
#[derive(Default)]
pub struct FairReadLock {
    writer: CachePadded<AtomicBool>,
    readers: CachePadded<AtomicUsize>,
}

impl FairReadLock {
    fn try_write(&self) -> bool {
        self.writer
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

impl LockFlavor for FairReadLock {
    const ALLOWS_REENTRY: bool = true;

    fn acquire_write(&self, block: bool) -> Option<usize> {
        let mut spins = 0u32;
        loop {
            if self.try_write() {
                break;
            }
            if !block {
                return None;
            }
            backoff(&mut spins, "write (acquiring)");
        }

        spins = 0;
        loop {
            if self.readers.load(Ordering::Acquire) == 0 {
                return Some(1);
            }
            if !block {
                self.writer.store(false, Ordering::Release);
                return None;
            }
            backoff(&mut spins, "write (draining readers)");
        }
    }

    fn acquire_read(&self, block: bool) -> Option<usize> {
        let mut spins = 0u32;
        loop {
            if !self.writer.load(Ordering::Acquire) {
                return Some(self.readers.fetch_add(1, Ordering::Acquire) + 1);
            }
            if !block {
                return None;
            }
            backoff(&mut spins, "read");
        }
    }

    fn force_write(&self) -> usize {
        1
    }

    fn force_read(&self) -> usize {
        self.readers.load(Ordering::Relaxed)
    }

    fn release_write(&self) {
        if !self.writer.swap(false, Ordering::Release) {
            log::error!("FairReadLock::release_write() called without a held lock");
            panic!("release_write() called without a held lock");
        }
    }

    fn release_read(&self) {
        let prev = self.readers.fetch_sub(1, Ordering::Release);
        if prev == 0 {
            log::error!("FairReadLock::release_read() called without a held lock");
            panic!("release_read() called without a held lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn readers_share() {
        let lock = FairReadLock::default();
        assert_eq!(lock.acquire_read(false), Some(1));
        assert_eq!(lock.acquire_read(false), Some(2));
        lock.release_read();
        lock.release_read();
    }

    #[test]
    fn writer_starves_under_continuous_readers() {
        let lock = Arc::new(FairReadLock::default());
        assert_eq!(lock.acquire_read(false), Some(1));

        let writer_lock = Arc::clone(&lock);
        let handle = thread::spawn(move || writer_lock.acquire_write(false));

        thread::sleep(std::time::Duration::from_millis(20));
        // A fresh reader is still allowed in even though a writer wants in,
        // unlike `RwLock`.
        assert_eq!(lock.acquire_read(false), Some(2));

        assert_eq!(handle.join().unwrap(), None);
        lock.release_read();
        lock.release_read();
    }
}
