// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::LockFlavor;

/// A lock flavor that always succeeds or always fails, fixed at compile
/// time by the `SUCCEED` const parameter. Used to exercise the failure
/// paths of callers that assert on a denied acquisition — it claims
/// success or failure without ever truly serializing access, so it is
/// only useful for driving a caller's failure path on demand, never for
/// real concurrency.
///
/// Gated behind the `test-support` feature: it has no legitimate use
/// outside a test suite and is excluded from the default build.
#[derive(Default)]
pub struct BrokenLock<const SUCCEED: bool>;

impl<const SUCCEED: bool> LockFlavor for BrokenLock<SUCCEED> {
    const ALLOWS_REENTRY: bool = true;

    fn acquire_write(&self, _block: bool) -> Option<usize> {
        if SUCCEED {
            Some(1)
        } else {
            None
        }
    }

    fn acquire_read(&self, _block: bool) -> Option<usize> {
        if SUCCEED {
            Some(1)
        } else {
            None
        }
    }

    fn force_write(&self) -> usize {
        1
    }

    fn force_read(&self) -> usize {
        1
    }

    fn release_write(&self) {}

    fn release_read(&self) {}
}
