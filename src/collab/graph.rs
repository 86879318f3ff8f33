// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::container::Protected;
use crate::lock::ExclusiveLock;
use crate::multilock::{acquire_two_writes, MultiLock};
use crate::token::AuthToken;

/// Wraps an `Arc<GraphNode<T>>` with identity-based equality and hashing, so
/// it can live in a [`HashSet`] the way `std::set<shared_ptr<...>>` does in
/// the original, ordered by pointer identity rather than node contents.
struct NodeHandle<T>(Arc<GraphNode<T>>);

impl<T> Clone for NodeHandle<T> {
    fn clone(&self) -> Self {
        NodeHandle(Arc::clone(&self.0))
    }
}

impl<T> PartialEq for NodeHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for NodeHandle<T> {}

impl<T> Hash for NodeHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

struct NodeData<T> {
    value: T,
    out: HashSet<NodeHandle<T>>,
    incoming: HashSet<NodeHandle<T>>,
}

/// One vertex of a [`Graph`]. Locked independently with [`ExclusiveLock`]:
/// a node's neighbor sets are small and short-lived to hold, so plain
/// mutual exclusion is simpler than a reader/writer flavor here.
pub struct GraphNode<T> {
    data: Protected<NodeData<T>, ExclusiveLock>,
}

impl<T> GraphNode<T> {
    pub fn new(value: T) -> Arc<Self> {
        Arc::new(GraphNode {
            data: Protected::new(NodeData {
                value,
                out: HashSet::new(),
                incoming: HashSet::new(),
            }),
        })
    }

    /// Add a directed edge from `left` to `right`, locking both nodes in
    /// ascending [`crate::Order`] and, if `master` is given, excluding any
    /// concurrent whole-graph operation while doing so. Grounded on
    /// `graph_node::connect_nodes`/`change_connection_common`.
    pub fn connect_nodes<G>(
        left: &Arc<GraphNode<T>>,
        right: &Arc<GraphNode<T>>,
        token: &AuthToken<G>,
        master: Option<&MultiLock>,
        block: bool,
    ) -> bool {
        Self::change_connection(left, right, token, master, block, true)
    }

    /// Remove the directed edge from `left` to `right`, if any.
    pub fn disconnect_nodes<G>(
        left: &Arc<GraphNode<T>>,
        right: &Arc<GraphNode<T>>,
        token: &AuthToken<G>,
        master: Option<&MultiLock>,
        block: bool,
    ) -> bool {
        Self::change_connection(left, right, token, master, block, false)
    }

    fn change_connection<G>(
        left: &Arc<GraphNode<T>>,
        right: &Arc<GraphNode<T>>,
        token: &AuthToken<G>,
        master: Option<&MultiLock>,
        block: bool,
        connect: bool,
    ) -> bool {
        let multi_guard = match master {
            Some(m) => match m.get_write(token, block) {
                Some(g) => Some(g),
                None => return false,
            },
            None => None,
        };

        let (w_left, w_right) = acquire_two_writes(&left.data, &right.data, token, block);

        // The exclusion is only needed while choosing and taking the two
        // node locks, not while mutating them; release it immediately,
        // mirroring `change_connection_common`'s `multi.clear()`.
        if let Some(guard) = multi_guard {
            guard.clear();
        }

        let (Some(mut w_left), Some(mut w_right)) = (w_left, w_right) else {
            return false;
        };

        if connect {
            w_left.out.insert(NodeHandle(Arc::clone(right)));
            w_right.incoming.insert(NodeHandle(Arc::clone(left)));
        } else {
            w_left.out.remove(&NodeHandle(Arc::clone(right)));
            w_right.incoming.remove(&NodeHandle(Arc::clone(left)));
        }

        true
    }
}

/// A directed graph of independently lockable nodes, coordinated by one
/// [`MultiLock`] for structural edits (`insert_node`/`erase_node`) and
/// whole-graph walks.
pub struct Graph<Ix, T> {
    master_lock: MultiLock,
    nodes: Protected<HashMap<Ix, Arc<GraphNode<T>>>, ExclusiveLock>,
}

impl<Ix: std::hash::Hash + Eq + Clone, T> Default for Graph<Ix, T> {
    fn default() -> Self {
        Graph::new()
    }
}

impl<Ix: std::hash::Hash + Eq + Clone, T> Graph<Ix, T> {
    pub fn new() -> Self {
        Graph {
            master_lock: MultiLock::new(),
            nodes: Protected::new(HashMap::new()),
        }
    }

    pub fn show_master_lock(&self) -> &MultiLock {
        &self.master_lock
    }

    /// An arbitrary node to start a walk from, or `None` if empty. Has no
    /// side effects, like the original's `get_graph_head`.
    pub fn graph_head(&self) -> Option<Arc<GraphNode<T>>> {
        self.nodes.get_const(true)?.values().next().cloned()
    }

    pub fn find_node<G>(&self, index: &Ix, token: &AuthToken<G>, block: bool) -> Option<Arc<GraphNode<T>>> {
        let _bulk = self.master_lock.get_read(block)?;
        self.nodes
            .get_auth_const(token, block)?
            .get(index)
            .cloned()
    }

    /// Insert `value` at `index`, replacing whatever node previously
    /// occupied it. A replaced node's edges are torn down first, the same
    /// way [`Graph::erase_node`] tears down an erased node's edges —
    /// otherwise other nodes would keep edges pointing at a node no longer
    /// reachable through `index`.
    pub fn insert_node<G>(
        &self,
        index: Ix,
        value: Arc<GraphNode<T>>,
        token: &AuthToken<G>,
        block: bool,
    ) -> bool {
        let old = match self.nodes.get_auth_const(token, block) {
            Some(nodes) => nodes.get(&index).cloned(),
            None => return false,
        };
        if let Some(old) = old {
            if !self.remove_edges(&old, token, block) {
                return false;
            }
        }
        self.change_node(token, block, |nodes| {
            nodes.insert(index, value);
        })
    }

    pub fn erase_node<G>(&self, index: &Ix, token: &AuthToken<G>, block: bool) -> bool {
        let old = match self.nodes.get_auth_const(token, block) {
            Some(nodes) => nodes.get(index).cloned(),
            None => return false,
        };
        if let Some(old) = old {
            if !self.remove_edges(&old, token, block) {
                return false;
            }
        }
        let index = index.clone();
        self.change_node(token, block, move |nodes| {
            nodes.remove(&index);
        })
    }

    fn change_node<G>(
        &self,
        token: &AuthToken<G>,
        block: bool,
        mutate: impl FnOnce(&mut HashMap<Ix, Arc<GraphNode<T>>>),
    ) -> bool {
        let Some(bulk) = self.master_lock.get_write(token, block) else {
            return false;
        };
        let result = self.nodes.get_auth(token, block);
        bulk.clear();

        match result {
            Some(mut nodes) => {
                mutate(&mut nodes);
                true
            }
            None => false,
        }
    }

    fn remove_edges<G>(&self, node: &Arc<GraphNode<T>>, token: &AuthToken<G>, block: bool) -> bool {
        let Some(bulk) = self.master_lock.get_write(token, block) else {
            return false;
        };

        let Some(left) = node.data.get_auth(token, block) else {
            return false;
        };
        let out_edges: Vec<_> = left.out.iter().cloned().collect();
        let in_edges: Vec<_> = left.incoming.iter().cloned().collect();
        drop(left);

        for NodeHandle(neighbor) in out_edges {
            let Some(mut right) = neighbor.data.get_auth(token, block) else {
                return false;
            };
            right.incoming.remove(&NodeHandle(Arc::clone(node)));
        }
        for NodeHandle(neighbor) in in_edges {
            let Some(mut right) = neighbor.data.get_auth(token, block) else {
                return false;
            };
            right.out.remove(&NodeHandle(Arc::clone(node)));
        }

        bulk.clear();
        true
    }
}

/// Walk `graph` breadth-first from an arbitrary head, printing each node's
/// value via `show`.
///
/// Tracks visited nodes in an explicit `visited` set and releases each
/// node's lock as soon as it has read that node's neighbors, rather than
/// holding a growing queue of live write proxies for the whole walk — a
/// node is never visited twice, and at most one node lock is held at a
/// time.
pub fn print_graph<Ix, T, G>(
    graph: &Graph<Ix, T>,
    token: &AuthToken<G>,
    show: impl Fn(&T) -> String,
) -> bool
where
    Ix: std::hash::Hash + Eq + Clone,
{
    let Some(bulk) = graph.master_lock.get_write(token, true) else {
        return false;
    };

    let Some(head) = graph.graph_head() else {
        return true;
    };

    let mut visited: HashSet<NodeHandle<T>> = HashSet::new();
    let mut pending = VecDeque::new();

    let Some(first) = head.data.get_auth(token, true) else {
        return false;
    };
    println!("{} (first node)", show(&first.value));
    visited.insert(NodeHandle(Arc::clone(&head)));
    drop(first);
    pending.push_back(head);

    while let Some(next) = pending.pop_front() {
        let Some(current) = next.data.get_auth(token, true) else {
            return false;
        };
        let neighbors: Vec<_> = current.out.iter().cloned().collect();
        let current_name = show(&current.value);
        drop(current);

        for NodeHandle(neighbor) in neighbors {
            if visited.contains(&NodeHandle(Arc::clone(&neighbor))) {
                continue;
            }
            let Some(seen) = neighbor.data.get_auth(token, true) else {
                continue;
            };
            println!("{} (first seen from {})", show(&seen.value), current_name);
            drop(seen);
            visited.insert(NodeHandle(Arc::clone(&neighbor)));
            pending.push_back(neighbor);
        }
    }

    bulk.clear();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::RwLock;

    #[test]
    fn connect_and_disconnect_round_trip() {
        let a = GraphNode::new(1);
        let b = GraphNode::new(2);
        let token: AuthToken<RwLock> = AuthToken::new();

        assert!(GraphNode::connect_nodes(&a, &b, &token, None, true));
        assert_eq!(a.data.get_const(true).unwrap().out.len(), 1);
        assert_eq!(b.data.get_const(true).unwrap().incoming.len(), 1);

        assert!(GraphNode::disconnect_nodes(&a, &b, &token, None, true));
        assert_eq!(a.data.get_const(true).unwrap().out.len(), 0);
        assert_eq!(b.data.get_const(true).unwrap().incoming.len(), 0);
    }

    #[test]
    fn graph_insert_connect_and_walk() {
        let graph: Graph<i32, i32> = Graph::new();
        let token: AuthToken<RwLock> = AuthToken::new();

        for i in 0..4 {
            let node = GraphNode::new(i);
            assert!(graph.insert_node(i, node, &token, true));
        }

        for i in 0..4 {
            let from = graph.find_node(&i, &token, true).unwrap();
            let to = graph.find_node(&((i + 1) % 4), &token, true).unwrap();
            assert!(GraphNode::connect_nodes(
                &from,
                &to,
                &token,
                Some(graph.show_master_lock()),
                true
            ));
        }

        assert!(print_graph(&graph, &token, |v| v.to_string()));
    }

    #[test]
    fn erase_node_removes_dangling_edges() {
        let graph: Graph<i32, i32> = Graph::new();
        let token: AuthToken<RwLock> = AuthToken::new();

        let a = GraphNode::new(1);
        let b = GraphNode::new(2);
        graph.insert_node(0, Arc::clone(&a), &token, true);
        graph.insert_node(1, Arc::clone(&b), &token, true);
        assert!(GraphNode::connect_nodes(
            &a,
            &b,
            &token,
            Some(graph.show_master_lock()),
            true
        ));

        assert!(graph.erase_node(&0, &token, true));
        assert_eq!(b.data.get_const(true).unwrap().incoming.len(), 0);
    }

    #[test]
    fn insert_node_displacing_a_node_removes_its_dangling_edges() {
        let graph: Graph<i32, i32> = Graph::new();
        let token: AuthToken<RwLock> = AuthToken::new();

        let a = GraphNode::new(1);
        let b = GraphNode::new(2);
        let c = GraphNode::new(3);
        graph.insert_node(0, Arc::clone(&a), &token, true);
        graph.insert_node(1, Arc::clone(&b), &token, true);
        assert!(GraphNode::connect_nodes(
            &a,
            &b,
            &token,
            Some(graph.show_master_lock()),
            true
        ));

        // Displacing `a` at index 0 with `c` must tear down `a`'s edges,
        // the same way erasing it would.
        assert!(graph.insert_node(0, Arc::clone(&c), &token, true));
        assert_eq!(b.data.get_const(true).unwrap().incoming.len(), 0);
        assert_eq!(a.data.get_const(true).unwrap().out.len(), 0);
    }
}
