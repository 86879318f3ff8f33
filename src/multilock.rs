// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::ptr::NonNull;

use crate::container::{Order, Protected};
use crate::lock::{LockFlavor, RwLock};
use crate::proxy::{ConstProxy, Proxy};
use crate::token::AuthToken;

/// A coordinator for whole-structure operations that must touch many
/// [`crate::Protected`] containers at once without paying the per-pair
/// ordering cost [`AuthToken`] would otherwise impose.
///
/// Held write, it authorizes its holder's [`AuthToken`] to acquire
/// arbitrarily many subordinate locks with no reentry or ordering checks
/// for the duration (see `authorize` in `src/token.rs`). Held read, it
/// merely confirms no bulk operation currently has the structure locked.
/// [`crate::collab::graph`] uses one to gate its structural edits
/// (connect/disconnect/insert/erase) and whole-graph walks.
pub struct MultiLock<F: LockFlavor = RwLock> {
    lock: F,
    order: Order,
}

impl<F: LockFlavor> Default for MultiLock<F> {
    fn default() -> Self {
        MultiLock::new()
    }
}

impl<F: LockFlavor> MultiLock<F> {
    pub fn new() -> Self {
        MultiLock {
            lock: F::default(),
            order: Order::next(),
        }
    }

    pub fn order(&self) -> Order {
        self.order
    }

    /// Enter bulk-operation mode: every subsequent `get_auth`/`get_auth_const`
    /// this `token` makes bypasses ordering checks until the returned proxy
    /// (or one of its clones) is dropped or cleared.
    pub fn get_write<'a, G>(&'a self, token: &'a AuthToken<G>, block: bool) -> Option<Proxy<'a, ()>> {
        let count = self.lock.acquire_write(block)?;
        token.set_multi_held(true);
        Some(Proxy::new_multi(
            NonNull::dangling(),
            &self.lock,
            count,
            token,
        ))
    }

    /// Confirm no holder currently has this structure in bulk-operation mode.
    pub fn get_read(&self, block: bool) -> Option<ConstProxy<'_, ()>> {
        let count = self.lock.acquire_read(block)?;
        Some(ConstProxy::new(NonNull::dangling(), &self.lock, count))
    }
}

/// Acquire write access to two containers in ascending [`Order`], so that
/// two threads racing to lock the same pair can never wait on each other in
/// opposite directions. The order is decided before either lock is touched.
///
/// `token` having already entered a [`MultiLock`]'s bulk mode (or not) is
/// transparent here: `Protected::get_auth` consults the token either way.
pub fn acquire_two_writes<'a, T, F, G>(
    left: &'a Protected<T, F>,
    right: &'a Protected<T, F>,
    token: &'a AuthToken<G>,
    block: bool,
) -> (Option<Proxy<'a, T>>, Option<Proxy<'a, T>>)
where
    F: LockFlavor,
{
    if left.order() <= right.order() {
        let w1 = left.get_auth(token, block);
        let w2 = right.get_auth(token, block);
        (w1, w2)
    } else {
        let w2 = right.get_auth(token, block);
        let w1 = left.get_auth(token, block);
        (w1, w2)
    }
}
