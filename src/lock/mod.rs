// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lock flavors: the concrete state machines a [`crate::Protected`] container
//! may pick as its `F` type parameter.
//!
//! Every flavor hand-rolls its state from atomics and a CAS/spin loop rather
//! than wrapping an OS mutex. A flavor never blocks forever on an acquisition the
//! calling [`crate::AuthToken`] has already proven safe to reenter: those
//! acquisitions go through `force_read`/`force_write` instead, which bump the
//! flavor's counters without contending.

#[cfg(feature = "test-support")]
mod broken;
mod exclusive;
mod fair;
mod rw;

#[cfg(feature = "test-support")]
pub use broken::BrokenLock;
pub use exclusive::ExclusiveLock;
pub use fair::FairReadLock;
pub use rw::RwLock;

/// A lock flavor's capability set.
///
/// `acquire_*` is the real, possibly-blocking contention path. `force_*` is
/// the reentrant fast path, called only after an [`crate::AuthToken`] has
/// established that the calling thread already holds this exact lock in a
/// mode that makes the new acquisition safe to grant outright — going
/// through `acquire_*` in that case would have the thread contend against
/// itself.
pub trait LockFlavor: Default + Send + Sync {
    /// Whether this flavor permits a token to reenter a lock it already
    /// holds. `false` for [`ExclusiveLock`]; `true` for the two
    /// reader/writer flavors.
    const ALLOWS_REENTRY: bool;

    fn acquire_write(&self, block: bool) -> Option<usize>;
    fn acquire_read(&self, block: bool) -> Option<usize>;

    fn force_write(&self) -> usize;
    fn force_read(&self) -> usize;

    fn release_write(&self);
    fn release_read(&self);
}

/// Type-erased release target, used by [`crate::Proxy`]/[`crate::ConstProxy`]
/// so that a proxy need not carry the flavor type parameter `F`.
pub(crate) trait ReleaseTarget: Send + Sync {
    fn release_write(&self);
    fn release_read(&self);
}

impl<F: LockFlavor> ReleaseTarget for F {
    fn release_write(&self) {
        LockFlavor::release_write(self)
    }

    fn release_read(&self) {
        LockFlavor::release_read(self)
    }
}
