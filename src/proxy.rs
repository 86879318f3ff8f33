// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::rc::Rc;

use crate::lock::ReleaseTarget;
use crate::token::{ReleaseOutcome, TokenLedger};

/// Shared release bookkeeping behind a proxy. A clone of [`ConstProxy`]
/// shares one `Guard`, so the underlying lock is released exactly once,
/// when the last clone drops — copying the proxy does not take a new lock
/// and dropping the copy alone does not release it.
struct Guard<'a> {
    lock: Cell<Option<&'a dyn ReleaseTarget>>,
    read: bool,
    ledger: Option<(&'a dyn TokenLedger, usize)>,
    multi: Option<&'a dyn TokenLedger>,
    count: usize,
    /// Whether a [`Proxy`] built on this guard may hand out `&mut T`. `false`
    /// for a write-reentry handle: the lock is genuinely already held by this
    /// token through another, still-live `Proxy`, and minting a second
    /// independent `&mut T` into the same memory would alias. The reentrant
    /// handle still tracks the acquisition for release/token bookkeeping and
    /// still derefs to `&T`; it simply never yields `&mut T` of its own.
    mutable: bool,
}

impl<'a> Guard<'a> {
    fn release_now(&self) {
        let Some(lock) = self.lock.take() else {
            return;
        };

        let real_mode = match self.ledger {
            Some((ledger, id)) => match ledger.release(id, self.read) {
                ReleaseOutcome::StillHeld => None,
                ReleaseOutcome::ReleaseReal { write } => Some(write),
            },
            None => Some(!self.read),
        };

        if let Some(write) = real_mode {
            if write {
                lock.release_write();
            } else {
                lock.release_read();
            }
        }

        if let Some(multi) = self.multi {
            multi.release_multi();
        }
    }

    fn is_live(&self) -> bool {
        self.lock.get().is_some()
    }
}

impl<'a> Drop for Guard<'a> {
    fn drop(&mut self) {
        self.release_now();
    }
}

/// Read-only, scope-bound access to a [`crate::Protected`]'s value.
///
/// Derefs to `&T`. Cloning shares the same underlying lock hold rather than
/// taking a new one; the lock is released when the last clone (or the
/// original) is dropped or [`ConstProxy::clear`] is called, whichever comes
/// first.
pub struct ConstProxy<'a, T> {
    ptr: NonNull<T>,
    guard: Rc<Guard<'a>>,
}

impl<'a, T> ConstProxy<'a, T> {
    pub(crate) fn new(ptr: NonNull<T>, lock: &'a dyn ReleaseTarget, count: usize) -> Self {
        ConstProxy {
            ptr,
            guard: Rc::new(Guard {
                lock: Cell::new(Some(lock)),
                read: true,
                ledger: None,
                multi: None,
                count,
                mutable: false,
            }),
        }
    }

    pub(crate) fn new_authorized(
        ptr: NonNull<T>,
        lock: &'a dyn ReleaseTarget,
        count: usize,
        ledger: &'a dyn TokenLedger,
        id: usize,
    ) -> Self {
        ConstProxy {
            ptr,
            guard: Rc::new(Guard {
                lock: Cell::new(Some(lock)),
                read: true,
                ledger: Some((ledger, id)),
                multi: None,
                count,
                mutable: false,
            }),
        }
    }

    /// Whether the proxy still holds its lock. `false` after [`Self::clear`]
    /// has been called on this proxy or on a clone sharing the same hold.
    pub fn is_live(&self) -> bool {
        self.guard.is_live()
    }

    /// Release the lock early, before the proxy goes out of scope. Affects
    /// every clone sharing this hold, since they share one lock.
    pub fn clear(&self) {
        self.guard.release_now();
    }

    /// The reader/writer count observed at acquisition time, for
    /// diagnostics (mirrors `last_lock_count()` in the original).
    pub fn last_lock_count(&self) -> usize {
        self.guard.count
    }
}

impl<'a, T> Clone for ConstProxy<'a, T> {
    fn clone(&self) -> Self {
        ConstProxy {
            ptr: self.ptr,
            guard: Rc::clone(&self.guard),
        }
    }
}

impl<'a, T> Deref for ConstProxy<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        assert!(self.is_live(), "dereferenced a ConstProxy after clear()");
        // SAFETY: the guard holds the lock for as long as it reports live.
        unsafe { self.ptr.as_ref() }
    }
}

/// Write, scope-bound access to a [`crate::Protected`]'s value.
///
/// Derefs to `&T`/`&mut T`. Unlike [`ConstProxy`], a write proxy is not
/// clonable: sharing mutable access defeats the point of the lock. A
/// write-reentry handle (the same token re-acquiring a write lock it
/// already holds) is a distinct `Proxy` value rather than a shared one, so
/// it derefs to `&T` only — it tracks the acquisition for release and token
/// bookkeeping, but only the original proxy may hand out `&mut T`.
pub struct Proxy<'a, T> {
    ptr: NonNull<T>,
    guard: Guard<'a>,
}

impl<'a, T> Proxy<'a, T> {
    pub(crate) fn new(ptr: NonNull<T>, lock: &'a dyn ReleaseTarget, count: usize) -> Self {
        Proxy {
            ptr,
            guard: Guard {
                lock: Cell::new(Some(lock)),
                read: false,
                ledger: None,
                multi: None,
                count,
                mutable: true,
            },
        }
    }

    pub(crate) fn new_authorized(
        ptr: NonNull<T>,
        lock: &'a dyn ReleaseTarget,
        count: usize,
        ledger: &'a dyn TokenLedger,
        id: usize,
    ) -> Self {
        Proxy {
            ptr,
            guard: Guard {
                lock: Cell::new(Some(lock)),
                read: false,
                ledger: Some((ledger, id)),
                multi: None,
                count,
                mutable: true,
            },
        }
    }

    /// Construct a write-reentry handle: the token already holds this exact
    /// lock through another, still-live `Proxy`, so this handle is not the
    /// sole path to the underlying `T` and must not hand out `&mut T` of its
    /// own (see [`DerefMut`] below). It still participates in release and
    /// token bookkeeping like any other proxy; only its mutability is
    /// disabled.
    pub(crate) fn new_authorized_reentrant(
        ptr: NonNull<T>,
        lock: &'a dyn ReleaseTarget,
        count: usize,
        ledger: &'a dyn TokenLedger,
        id: usize,
    ) -> Self {
        Proxy {
            ptr,
            guard: Guard {
                lock: Cell::new(Some(lock)),
                read: false,
                ledger: Some((ledger, id)),
                multi: None,
                count,
                mutable: false,
            },
        }
    }

    /// Construct a write proxy for a lock that, on release, should also
    /// clear the token's multi-lock-held flag. Used only by
    /// [`crate::MultiLock`].
    pub(crate) fn new_multi(
        ptr: NonNull<T>,
        lock: &'a dyn ReleaseTarget,
        count: usize,
        multi: &'a dyn TokenLedger,
    ) -> Self {
        Proxy {
            ptr,
            guard: Guard {
                lock: Cell::new(Some(lock)),
                read: false,
                ledger: None,
                multi: Some(multi),
                count,
                mutable: true,
            },
        }
    }

    pub fn is_live(&self) -> bool {
        self.guard.is_live()
    }

    pub fn clear(&self) {
        self.guard.release_now();
    }

    pub fn last_lock_count(&self) -> usize {
        self.guard.count
    }
}

impl<'a, T> Deref for Proxy<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        assert!(self.is_live(), "dereferenced a Proxy after clear()");
        unsafe { self.ptr.as_ref() }
    }
}

impl<'a, T> DerefMut for Proxy<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        assert!(self.is_live(), "dereferenced a Proxy after clear()");
        assert!(
            self.guard.mutable,
            "a write-reentry handle does not grant its own mutable access; \
             mutate through the original write proxy instead"
        );
        // SAFETY: a live, mutable write proxy is the sole path to this `T`.
        unsafe { self.ptr.as_mut() }
    }
}
