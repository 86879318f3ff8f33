// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::yield_now;

use crossbeam_utils::CachePadded;
use log::warn;

use super::LockFlavor;

/// At most one holder at a time, regardless of mode. Formerly `w_lock` in
/// the original C++ source. Never reenters: a token already holding this
/// lock in any mode must not try to acquire it again, since the CAS loop
/// below would spin against itself forever.
#[derive(Default)]
pub struct ExclusiveLock {
    locked: CachePadded<AtomicBool>,
}

/// Spin for a while, then yield to the scheduler, rather than burn the core
/// indefinitely under heavy contention.
const SPIN_ITERS: u32 = 100;
const WARN_ITERS: u32 = 10_000;

impl ExclusiveLock {
    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn acquire(&self, block: bool) -> Option<usize> {
        if self.try_acquire() {
            return Some(1);
        }
        if !block {
            return None;
        }
        let mut spins = 0u32;
        loop {
            if self.try_acquire() {
                return Some(1);
            }
            spins += 1;
            if spins < SPIN_ITERS {
                spin_loop();
            } else {
                if spins % WARN_ITERS == 0 {
                    warn!("ExclusiveLock acquisition has spun {spins} times, possible contention stall");
                }
                yield_now();
            }
        }
    }
}

impl LockFlavor for ExclusiveLock {
    const ALLOWS_REENTRY: bool = false;

    fn acquire_write(&self, block: bool) -> Option<usize> {
        self.acquire(block)
    }

    fn acquire_read(&self, block: bool) -> Option<usize> {
        // No distinct read mode: a "read" acquisition on an exclusive lock
        // is exclusive too.
        self.acquire(block)
    }

    fn force_write(&self) -> usize {
        panic!("ExclusiveLock does not allow reentry; force_write should be unreachable")
    }

    fn force_read(&self) -> usize {
        panic!("ExclusiveLock does not allow reentry; force_read should be unreachable")
    }

    fn release_write(&self) {
        if !self.locked.swap(false, Ordering::Release) {
            log::error!("ExclusiveLock::release_write() called without a held lock");
            panic!("release_write() called without a held lock");
        }
    }

    fn release_read(&self) {
        self.release_write();
    }
}
