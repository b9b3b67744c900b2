//! Reverse, descending key order iteration.
//!
//! A node's own value sorts before everything stored below it, so the
//! reverse walk may only emit an internal node after all its children
//! have been consumed. The iterator tracks which stacked nodes already
//! had their children pushed to get that deferral right.

use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "ahash")]
use ahash::RandomState;
#[cfg(not(feature = "ahash"))]
use std::collections::hash_map::RandomState;

use smallvec::smallvec;

use crate::iter::{Frame, Iter};
use crate::node::{Edge, Node};

/// An iterator over the values of the tree in descending key order.
pub struct RevIter<T> {
    iter: Iter<T>,
    /// Stacked nodes whose children are already on the stack above
    /// them. Entries are removed again once the node itself is
    /// consumed, so the set stays small.
    expanded: HashSet<*const Node<T>, RandomState>,
}

impl<T: Clone> RevIter<T> {
    pub(crate) fn new(root: Arc<Node<T>>) -> Self {
        RevIter {
            iter: Iter::new(root),
            expanded: HashSet::default(),
        }
    }

    /// Restrict the iterator to the subtree of keys beginning with
    /// `prefix`.
    pub fn seek_prefix(&mut self, prefix: &[u8]) {
        self.expanded.clear();
        self.iter.seek_prefix(prefix);
    }

    /// Yield the previous value in key order, or `None` when the
    /// smallest key has been passed.
    pub fn previous(&mut self) -> Option<T> {
        if !self.iter.seeded {
            self.iter.seeded = true;
            if let Some(n) = self.iter.node.clone() {
                self.iter.stack.push(Frame {
                    edges: smallvec![Edge { label: 0, node: n }],
                    index1: 0,
                    index2: 1,
                });
            }
        }

        while let Some(frame) = self.iter.stack.last_mut() {
            if frame.index2 == 0 {
                self.iter.stack.pop();
                continue;
            }
            let n = frame.edges[frame.index2 - 1].node.clone();
            let ptr = Arc::as_ptr(&n);
            let expanded = self.expanded.contains(&ptr);

            // An internal node seen for the first time stays put while
            // its children are stacked above it; the largest child is
            // consumed first.
            if !n.edges.is_empty() && !expanded {
                self.expanded.insert(ptr);
                let len = n.edges.len();
                self.iter.stack.push(Frame {
                    edges: n.edges.clone(),
                    index1: len - 1,
                    index2: len,
                });
                continue;
            }

            frame.index2 -= 1;
            frame.index1 = frame.index2.saturating_sub(1);
            if expanded {
                self.expanded.remove(&ptr);
            }
            if let Some(v) = n.value.as_ref() {
                return Some(v.clone());
            }
        }
        None
    }
}
