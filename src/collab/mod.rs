// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Non-normative example of [`crate::Protected`], [`crate::AuthToken`] and
//! [`crate::MultiLock`] composing into a larger structure: a directed graph
//! whose nodes are each independently lockable, coordinated by one
//! [`crate::MultiLock`] for whole-graph edits and walks.

pub mod graph;
