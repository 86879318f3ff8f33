// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::yield_now;

use crossbeam_utils::CachePadded;
use log::warn;

use super::LockFlavor;

const SPIN_ITERS: u32 = 100;
/// How many post-spin yields to tolerate before warning that a blocking
/// acquisition looks stuck, mirroring `WARN_THRESHOLD` in node-replication's
/// `log.rs` (`"append(...) takes too many iterations..."`).
const WARN_ITERS: u32 = 10_000;

fn backoff(spins: &mut u32, what: &str) {
    *spins += 1;
    if *spins < SPIN_ITERS {
        spin_loop();
    } else {
        if *spins % WARN_ITERS == 0 {
            warn!("RwLock {what} acquisition has spun {spins} times, possible contention stall");
        }
        yield_now();
    }
}

/// Writer-preferred reader/writer lock: the default flavor for
/// [`crate::Protected`]. A pending or active writer blocks new readers, so a
/// steady stream of readers cannot starve a writer out (unlike
/// [`super::FairReadLock`]).
///
/// Reentrant acquisitions never touch `writer`/`readers` at all: only the
/// first, real acquisition of a given lock by a given
/// [`crate::AuthToken`] holds the primitive, and `force_write`/`force_read`
/// are no-ops consulted only for diagnostics. See `src/token.rs` for why.
#[derive(Default)]
pub struct RwLock {
    writer: CachePadded<AtomicBool>,
    pending_writers: CachePadded<AtomicUsize>,
    readers: CachePadded<AtomicUsize>,
}

impl RwLock {
    fn try_write(&self) -> bool {
        self.writer
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

impl LockFlavor for RwLock {
    const ALLOWS_REENTRY: bool = true;

    fn acquire_write(&self, block: bool) -> Option<usize> {
        self.pending_writers.fetch_add(1, Ordering::Relaxed);

        let mut spins = 0u32;
        loop {
            if self.try_write() {
                break;
            }
            if !block {
                self.pending_writers.fetch_sub(1, Ordering::Relaxed);
                return None;
            }
            backoff(&mut spins, "write (acquiring)");
        }

        // Holds `writer`; now drain any readers that got in first.
        spins = 0;
        loop {
            if self.readers.load(Ordering::Acquire) == 0 {
                self.pending_writers.fetch_sub(1, Ordering::Relaxed);
                return Some(1);
            }
            if !block {
                self.writer.store(false, Ordering::Release);
                self.pending_writers.fetch_sub(1, Ordering::Relaxed);
                return None;
            }
            backoff(&mut spins, "write (draining readers)");
        }
    }

    fn acquire_read(&self, block: bool) -> Option<usize> {
        let mut spins = 0u32;
        loop {
            if self.writer.load(Ordering::Acquire) || self.pending_writers.load(Ordering::Relaxed) > 0 {
                if !block {
                    return None;
                }
                backoff(&mut spins, "read (writer pending)");
                continue;
            }

            let count = self.readers.fetch_add(1, Ordering::Acquire) + 1;
            if self.writer.load(Ordering::Acquire) {
                self.readers.fetch_sub(1, Ordering::Release);
                if !block {
                    return None;
                }
                backoff(&mut spins, "read (writer snuck in)");
                continue;
            }
            return Some(count);
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
            log::error!("RwLock::release_write() called without a held lock");
            panic!("release_write() called without a held lock");
        }
    }

    fn release_read(&self) {
        let prev = self.readers.fetch_sub(1, Ordering::Release);
        if prev == 0 {
            log::error!("RwLock::release_read() called without a held lock");
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
        let lock = RwLock::default();
        assert_eq!(lock.acquire_read(false), Some(1));
        assert_eq!(lock.acquire_read(false), Some(2));
        lock.release_read();
        lock.release_read();
    }

    #[test]
    fn writer_excludes_readers() {
        let lock = RwLock::default();
        assert_eq!(lock.acquire_write(false), Some(1));
        assert_eq!(lock.acquire_read(false), None);
        lock.release_write();
        assert_eq!(lock.acquire_read(false), Some(1));
    }

    #[test]
    fn pending_writer_blocks_new_readers() {
        let lock = Arc::new(RwLock::default());
        assert_eq!(lock.acquire_read(false), Some(1));

        let writer_lock = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            writer_lock.acquire_write(true);
        });

        // Give the writer a chance to register as pending.
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(lock.acquire_read(false), None);

        lock.release_read();
        handle.join().unwrap();
        lock.release_write();
    }
}
