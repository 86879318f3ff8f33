// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Protected shared data with structured, deadlock-avoiding locking.
//!
//! A value of type `T` is wrapped in a [`Protected`] container that owns an
//! internal lock and only ever exposes `T` through short-lived, scope-bound
//! [`Proxy`]/[`ConstProxy`] handles. Callers may carry a per-thread
//! [`AuthToken`] that records the locks they currently hold; the container
//! consults the token before granting a new lock and refuses any
//! acquisition that the token's bookkeeping predicts could deadlock.
//!
//! [`MultiLock`] is the escape hatch for whole-graph operations: while held
//! write, it authorizes its holder to acquire arbitrarily many subordinate
//! locks without the ordering checks [`AuthToken`] would otherwise apply.
//!
//! See [`collab::graph`] for a non-normative illustration of the above
//! composing into a locked graph with a deadlock-free BFS walk.

mod container;
mod multilock;
mod proxy;
mod token;

pub mod collab;
pub mod lock;

pub use container::{Base, Order, Protected};
pub use multilock::{acquire_two_writes, MultiLock};
pub use proxy::{ConstProxy, Proxy};
pub use token::AuthToken;

pub use lock::{ExclusiveLock, FairReadLock, LockFlavor, RwLock};

#[cfg(feature = "test-support")]
pub use lock::BrokenLock;
