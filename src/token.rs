// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::cell::RefCell;
use std::cell::Cell;
use std::marker::PhantomData;

/// The caller's ledger entry for one specific lock instance, identified by
/// the lock's address cast to `usize` (never dereferenced through that
/// integer — it is used purely as an opaque identity tag).
///
/// `real_write` records whether the *first* acquisition of this lock by
/// this token was a write or a read. Every subsequent reentrant
/// acquisition on the same lock is served by [`crate::LockFlavor::force_write`]
/// / `force_write`/`force_read`, which never touch the lock's own atomics;
/// only the original acquisition actually holds the primitive, so release
/// must eventually undo *that* mode specifically, not whichever mode the
/// last surviving proxy happens to be.
struct HeldLock {
    id: usize,
    reads: u32,
    writes: u32,
    real_write: bool,
}

/// What a proxy's drop should do once the token has been told a lock was
/// released: either nothing (other reentrant holds remain), or actually
/// release the underlying primitive in the mode it was first acquired in.
pub(crate) enum ReleaseOutcome {
    StillHeld,
    ReleaseReal { write: bool },
}

/// Whether an authorization check permits an acquisition to proceed, and
/// whether it must go through the reentrant fast path to avoid contending
/// against a lock the token already holds.
pub(crate) enum Authorization {
    Allowed { reentrant: bool },
    Denied,
}

/// Type-erased release hook used by [`crate::Proxy`]/[`crate::ConstProxy`] so
/// that a proxy need not carry the token's flavor type parameter.
pub(crate) trait TokenLedger {
    fn release(&self, id: usize, read: bool) -> ReleaseOutcome;
    fn release_multi(&self);
}

/// A caller's ledger of currently held locks, used to predict and refuse
/// acquisitions that would risk a deadlock.
///
/// Constructed via [`crate::Protected::new_auth`]. The flavor parameter `F`
/// only documents the flavor the token was primarily constructed against —
/// `get_auth` accepts a token of any flavor, so a token built against one
/// container's flavor can still authorize acquisitions on a container of a
/// different flavor.
///
/// A token is single-owner and thread-pinned: it is deliberately `!Send`
/// and `!Sync` so that sharing one between threads is a compile error
/// rather than a runtime hazard.
pub struct AuthToken<F = crate::lock::RwLock> {
    held: RefCell<Vec<HeldLock>>,
    multi_held: Cell<bool>,
    _flavor: PhantomData<F>,
    _unsend: PhantomData<*const ()>,
}

impl<F> AuthToken<F> {
    pub(crate) fn new() -> Self {
        AuthToken {
            held: RefCell::new(Vec::new()),
            multi_held: Cell::new(false),
            _flavor: PhantomData,
            _unsend: PhantomData,
        }
    }

    /// Total read locks currently held across all lock instances.
    pub fn reads_held(&self) -> u32 {
        self.held.borrow().iter().map(|h| h.reads).sum()
    }

    /// Total write locks currently held across all lock instances.
    pub fn writes_held(&self) -> u32 {
        self.held.borrow().iter().map(|h| h.writes).sum()
    }

    /// Whether this token currently holds some multi-lock in write mode.
    pub fn holds_multi(&self) -> bool {
        self.multi_held.get()
    }

    pub(crate) fn set_multi_held(&self, held: bool) {
        self.multi_held.set(held);
    }

    /// Decide whether the token may take one more lock of mode `read` on
    /// the lock identified by `id`, given `allows_reentry` from the target
    /// lock's flavor. Denials are logged at `debug!` — rare enough to be
    /// actionable, unlike plain primitive contention, which the lock
    /// flavors themselves never log at this frequency.
    pub(crate) fn authorize(&self, id: usize, read: bool, allows_reentry: bool) -> Authorization {
        let decision = self.decide(id, read, allows_reentry);
        if matches!(decision, Authorization::Denied) {
            log::debug!(
                "policy refusal: token denied a {} on lock {id:#x} (reentry allowed: {allows_reentry})",
                if read { "read" } else { "write" },
            );
        }
        decision
    }

    fn decide(&self, id: usize, read: bool, allows_reentry: bool) -> Authorization {
        let held = self.held.borrow();
        let same = held.iter().find(|h| h.id == id);

        if same.is_some() && !allows_reentry {
            return Authorization::Denied;
        }

        if self.multi_held.get() {
            return Authorization::Allowed {
                reentrant: same.is_some(),
            };
        }

        let total_writes: u32 = held.iter().map(|h| h.writes).sum();
        if total_writes > 0 {
            return if read {
                match same {
                    Some(_) => Authorization::Allowed { reentrant: true },
                    None => Authorization::Denied,
                }
            } else {
                match same {
                    Some(h) if h.writes > 0 => Authorization::Allowed { reentrant: true },
                    _ => Authorization::Denied,
                }
            };
        }

        let total_reads: u32 = held.iter().map(|h| h.reads).sum();
        if total_reads > 0 {
            return if read {
                Authorization::Allowed {
                    reentrant: same.is_some(),
                }
            } else {
                let reads_elsewhere = held.iter().any(|h| h.id != id && h.reads > 0);
                if reads_elsewhere {
                    Authorization::Denied
                } else {
                    Authorization::Allowed {
                        reentrant: same.is_some(),
                    }
                }
            };
        }

        Authorization::Allowed { reentrant: false }
    }

    pub(crate) fn record(&self, id: usize, read: bool) {
        let mut held = self.held.borrow_mut();
        if let Some(h) = held.iter_mut().find(|h| h.id == id) {
            if read {
                h.reads += 1;
            } else {
                h.writes += 1;
            }
        } else {
            held.push(HeldLock {
                id,
                reads: if read { 1 } else { 0 },
                writes: if read { 0 } else { 1 },
                real_write: !read,
            });
        }
    }
}

impl<F> TokenLedger for AuthToken<F> {
    fn release(&self, id: usize, read: bool) -> ReleaseOutcome {
        let mut held = self.held.borrow_mut();
        let idx = held.iter().position(|h| h.id == id).unwrap_or_else(|| {
            log::error!("release of lock {id:#x} on a token that never recorded holding it");
            panic!("released a lock this token does not hold");
        });

        let (remaining, real_write) = {
            let h = &mut held[idx];
            if read {
                if h.reads == 0 {
                    log::error!("release of a read on lock {id:#x} with zero reads recorded");
                }
                assert!(h.reads > 0, "released a read this token does not hold");
                h.reads -= 1;
            } else {
                if h.writes == 0 {
                    log::error!("release of a write on lock {id:#x} with zero writes recorded");
                }
                assert!(h.writes > 0, "released a write this token does not hold");
                h.writes -= 1;
            }
            (h.reads + h.writes, h.real_write)
        };

        if remaining == 0 {
            held.remove(idx);
            ReleaseOutcome::ReleaseReal { write: real_write }
        } else {
            ReleaseOutcome::StillHeld
        }
    }

    fn release_multi(&self) {
        self.multi_held.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::RwLock;

    #[test]
    fn fresh_token_allows_anything() {
        let token = AuthToken::<RwLock>::new();
        assert!(matches!(
            token.authorize(1, false, true),
            Authorization::Allowed { reentrant: false }
        ));
    }

    #[test]
    fn write_elsewhere_blocks_new_container() {
        let token = AuthToken::<RwLock>::new();
        token.record(1, false);
        assert!(matches!(
            token.authorize(2, true, true),
            Authorization::Denied
        ));
        assert!(matches!(
            token.authorize(2, false, true),
            Authorization::Denied
        ));
    }

    #[test]
    fn write_reentry_on_same_lock_allowed() {
        let token = AuthToken::<RwLock>::new();
        token.record(1, false);
        assert!(matches!(
            token.authorize(1, false, true),
            Authorization::Allowed { reentrant: true }
        ));
        assert!(matches!(
            token.authorize(1, true, true),
            Authorization::Allowed { reentrant: true }
        ));
    }

    #[test]
    fn reads_anywhere_allowed() {
        let token = AuthToken::<RwLock>::new();
        token.record(1, true);
        assert!(matches!(
            token.authorize(2, true, true),
            Authorization::Allowed { reentrant: false }
        ));
    }

    #[test]
    fn write_refused_with_read_elsewhere() {
        let token = AuthToken::<RwLock>::new();
        token.record(1, true);
        assert!(matches!(
            token.authorize(2, false, true),
            Authorization::Denied
        ));
        // Same-container upgrade is permitted by the literal policy wording.
        assert!(matches!(
            token.authorize(1, false, true),
            Authorization::Allowed { reentrant: true }
        ));
    }

    #[test]
    fn exclusive_flavor_never_reenters() {
        let token = AuthToken::<crate::lock::ExclusiveLock>::new();
        token.record(1, false);
        assert!(matches!(
            token.authorize(1, false, false),
            Authorization::Denied
        ));
        assert!(matches!(
            token.authorize(1, true, false),
            Authorization::Denied
        ));
    }

    #[test]
    fn ledger_returns_to_zero() {
        let token = AuthToken::<RwLock>::new();
        token.record(1, false);
        token.record(1, true);
        assert_eq!(token.writes_held(), 1);
        assert_eq!(token.reads_held(), 1);
        assert!(matches!(
            TokenLedger::release(&token, 1, true),
            ReleaseOutcome::StillHeld
        ));
        assert!(matches!(
            TokenLedger::release(&token, 1, false),
            ReleaseOutcome::ReleaseReal { write: true }
        ));
        assert_eq!(token.writes_held(), 0);
        assert_eq!(token.reads_held(), 0);
    }
}
