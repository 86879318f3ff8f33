// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use static_assertions::const_assert;

use crate::lock::{LockFlavor, RwLock};
use crate::multilock::MultiLock;
use crate::proxy::{ConstProxy, Proxy};
use crate::token::{AuthToken, Authorization};

const_assert!(std::mem::size_of::<u64>() == 8);

static NEXT_ORDER: AtomicU64 = AtomicU64::new(0);

/// A process-wide monotonically increasing tie-breaker, assigned once per
/// [`Protected`] at construction. Used to pick a stable acquisition order
/// for operations that need to take two locks at once without risking a
/// circular wait, e.g. [`crate::collab::graph::get_two_writes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Order(u64);

impl Order {
    fn next() -> Self {
        Order(NEXT_ORDER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The flavor-independent surface of a [`Protected`] container, usable as
/// `dyn Base<T>` so code can hold containers of different lock flavors
/// uniformly, mirroring `mutex_container<T, Lock>::base` in the original
/// implementation (a single non-templated-on-`Lock` base class shared by
/// every flavor instantiation protecting the same `T`).
///
/// Token-authorized acquisition (`get_auth`/`get_auth_const`) is deliberately
/// not part of this trait: it is generic over the token's own flavor
/// parameter, and generic methods cannot appear in an object-safe trait. Call
/// it on the concrete [`Protected<T, F>`] instead; the resulting proxy
/// converts to this trait's proxy types without trouble, since [`Proxy`]
/// and [`ConstProxy`] never carry `F`.
pub trait Base<T> {
    /// Acquire write access, without any token bookkeeping.
    fn get(&self, block: bool) -> Option<Proxy<'_, T>>;

    /// Acquire read access, without any token bookkeeping.
    fn get_const(&self, block: bool) -> Option<ConstProxy<'_, T>>;

    /// This container's tie-breaking order, for ascending-order multi-lock
    /// acquisition.
    fn order(&self) -> Order;
}

/// A value of type `T` that can only be reached through a scope-bound
/// [`Proxy`]/[`ConstProxy`], guarded by a lock of flavor `F` (default
/// [`RwLock`]).
///
/// Grounded on `mutex_container<T, LockType>` in the original
/// implementation: construction, `get`/`get_auth`/`get_auth_const`, and
/// assignment all mirror that type's operations (`clear()`, `operator=`)
/// one for one, generalized to Rust's ownership and the `LockFlavor`
/// abstraction built for this crate.
pub struct Protected<T, F: LockFlavor = RwLock> {
    lock: F,
    order: Order,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through `Proxy`/`ConstProxy`,
// which hold the lock for their lifetime; the lock itself enforces the
// exclusion `T: Send` (for cross-thread handoff) and `Sync` require.
unsafe impl<T: Send, F: LockFlavor> Sync for Protected<T, F> {}
unsafe impl<T: Send, F: LockFlavor> Send for Protected<T, F> {}

impl<T, F: LockFlavor> Protected<T, F> {
    pub fn new(value: T) -> Self {
        Protected {
            lock: F::default(),
            order: Order::next(),
            data: UnsafeCell::new(value),
        }
    }

    fn id(&self) -> usize {
        (&self.lock as *const F).cast::<()>() as usize
    }

    /// Construct a fresh, empty ledger for coordinating acquisitions across
    /// however many [`Protected`] containers a caller touches. One per
    /// thread; never share the result across threads (it is `!Send`).
    pub fn new_auth<G>() -> AuthToken<G> {
        AuthToken::new()
    }

    fn data_ptr(&self) -> NonNull<T> {
        // SAFETY: `UnsafeCell::get` never returns null.
        unsafe { NonNull::new_unchecked(self.data.get()) }
    }

    /// Acquire write access, with no deadlock prevention. Used when the
    /// caller already knows by construction that it cannot contend with
    /// itself.
    pub fn get(&self, block: bool) -> Option<Proxy<'_, T>> {
        let count = self.lock.acquire_write(block).or_else(|| {
            log::trace!("contention: non-blocking write on container {:#x} found it held", self.id());
            None
        })?;
        Some(Proxy::new(self.data_ptr(), &self.lock, count))
    }

    /// Acquire read access, with no deadlock prevention.
    pub fn get_const(&self, block: bool) -> Option<ConstProxy<'_, T>> {
        let count = self.lock.acquire_read(block).or_else(|| {
            log::trace!("contention: non-blocking read on container {:#x} found it held", self.id());
            None
        })?;
        Some(ConstProxy::new(self.data_ptr(), &self.lock, count))
    }

    /// Acquire write access, consulting and updating `token` first. Refused
    /// outright (without ever touching the underlying lock) if the token's
    /// ledger predicts the acquisition could deadlock.
    ///
    /// When the token already holds this exact lock (write reentry), the
    /// returned proxy shares the acquisition's bookkeeping with the
    /// still-live original proxy but does not hand out its own `&mut T`
    /// (see [`Proxy`]'s doc comment): two independently-owned `Proxy`
    /// values each offering `&mut T` into the same memory would alias, and
    /// nothing in the type system stops a caller holding both from
    /// dereferencing both at once.
    pub fn get_auth<'a, G>(&'a self, token: &'a AuthToken<G>, block: bool) -> Option<Proxy<'a, T>> {
        match token.authorize(self.id(), false, F::ALLOWS_REENTRY) {
            Authorization::Denied => None,
            Authorization::Allowed { reentrant } => {
                let count = if reentrant {
                    self.lock.force_write()
                } else {
                    self.lock.acquire_write(block).or_else(|| {
                        log::trace!(
                            "contention: authorized non-blocking write on container {:#x} found it held",
                            self.id()
                        );
                        None
                    })?
                };
                token.record(self.id(), false);
                if reentrant {
                    Some(Proxy::new_authorized_reentrant(
                        self.data_ptr(),
                        &self.lock,
                        count,
                        token,
                        self.id(),
                    ))
                } else {
                    Some(Proxy::new_authorized(
                        self.data_ptr(),
                        &self.lock,
                        count,
                        token,
                        self.id(),
                    ))
                }
            }
        }
    }

    /// Acquire read access, consulting and updating `token` first.
    pub fn get_auth_const<'a, G>(
        &'a self,
        token: &'a AuthToken<G>,
        block: bool,
    ) -> Option<ConstProxy<'a, T>> {
        match token.authorize(self.id(), true, F::ALLOWS_REENTRY) {
            Authorization::Denied => None,
            Authorization::Allowed { reentrant } => {
                let count = if reentrant {
                    self.lock.force_read()
                } else {
                    self.lock.acquire_read(block).or_else(|| {
                        log::trace!(
                            "contention: authorized non-blocking read on container {:#x} found it held",
                            self.id()
                        );
                        None
                    })?
                };
                token.record(self.id(), true);
                Some(ConstProxy::new_authorized(
                    self.data_ptr(),
                    &self.lock,
                    count,
                    token,
                    self.id(),
                ))
            }
        }
    }

    /// Acquire write access asserted under a [`MultiLock`] the caller has
    /// already write-acquired. Equivalent to [`Protected::get_auth`] while
    /// `token` holds `multi` write. `multi` is accepted by convention only
    /// (see `DESIGN.md` for why): registration between a container and a
    /// multi-lock is never checked here, so passing the wrong multi-lock
    /// silently relies on whatever `token.holds_multi()` happens to
    /// reflect.
    pub fn get_write_multi<'a, M: LockFlavor, G>(
        &'a self,
        multi: &MultiLock<M>,
        token: &'a AuthToken<G>,
        block: bool,
    ) -> Option<Proxy<'a, T>> {
        let _ = multi;
        self.get_auth(token, block)
    }

    /// Acquire read access asserted under a [`MultiLock`] the caller has
    /// already write-acquired. See [`Protected::get_write_multi`] for the
    /// convention this leans on.
    pub fn get_read_multi<'a, M: LockFlavor, G>(
        &'a self,
        multi: &MultiLock<M>,
        token: &'a AuthToken<G>,
        block: bool,
    ) -> Option<ConstProxy<'a, T>> {
        let _ = multi;
        self.get_auth_const(token, block)
    }

    /// Overwrite the protected value, blocking for write access. Panics if
    /// a write proxy cannot be obtained rather than silently dropping the
    /// write: assignment is meant for single-threaded setup where a locked
    /// container indicates a programmer error, not ordinary contention.
    pub fn assign(&self, value: T) {
        let mut proxy = self.get(false).unwrap_or_else(|| {
            log::error!("assign() on container {:#x} found it already locked", self.id());
            panic!("assign() requires the container to be currently unlocked");
        });
        *proxy = value;
    }
}

impl<T, F: LockFlavor> Base<T> for Protected<T, F> {
    fn get(&self, block: bool) -> Option<Proxy<'_, T>> {
        Protected::get(self, block)
    }

    fn get_const(&self, block: bool) -> Option<ConstProxy<'_, T>> {
        Protected::get_const(self, block)
    }

    fn order(&self) -> Order {
        self.order
    }
}
