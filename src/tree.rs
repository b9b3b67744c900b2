//! The transactional surface of the tree.
//!
//! A [`Tree`] is a handle to a committed root. It is cheap to clone and
//! safe to share across threads; nothing reachable from it will ever
//! change. A [`Txn`] stages mutations against a root and produces a new
//! [`Tree`] on commit, sharing every subtree it did not touch with the
//! base root.

use std::iter::FromIterator;
use std::sync::Arc;

use tracing::trace;

#[cfg(feature = "serde")]
use std::marker::PhantomData;

#[cfg(feature = "serde")]
use serde::{
    de::{Deserialize, Deserializer, MapAccess, Visitor},
    ser::{Serialize, SerializeMap, Serializer},
};

use crate::iter::Iter;
use crate::node::{Edge, EdgeList, Node};
use crate::reverse_iter::RevIter;
use crate::utils::longest_prefix;

/// An immutable radix tree root.
///
/// The empty byte string is a valid key and is stored on the root node
/// itself. All reads against one `Tree` observe the same point in time
/// forever, so a `Tree` can be handed to other threads and read without
/// any locking.
pub struct Tree<T> {
    root: Arc<Node<T>>,
}

impl<T> Clone for Tree<T> {
    fn clone(&self) -> Self {
        Tree {
            root: self.root.clone(),
        }
    }
}

/// A transaction on the tree. The staged mutations become visible to
/// others only through the root returned by [`Txn::commit`]; dropping
/// the transaction without committing discards them without penalty. A
/// transaction is single threaded; open independent transactions for
/// concurrent writers and arbitrate the winning commit in the caller.
pub struct Txn<T> {
    txid: u64,
    root: Arc<Node<T>>,
}

impl<T: Clone> Tree<T> {
    /// Construct a new empty tree.
    pub fn new() -> Self {
        Tree {
            root: Arc::new(Node::new(0)),
        }
    }

    /// Begin a transaction based on this root.
    pub fn txn(&self) -> Txn<T> {
        let txid = self.root.txid + 1;
        trace!(txid, "txn begin");
        Txn {
            txid,
            root: self.root.clone(),
        }
    }

    /// Retrieve the value stored for `k`, if any.
    pub fn get(&self, k: &[u8]) -> Option<&T> {
        self.root.get(k)
    }

    /// True when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.root.value.is_none() && self.root.edges.is_empty()
    }

    /// Iterate stored values in ascending key order.
    pub fn iter(&self) -> Iter<T> {
        Iter::new(self.root.clone())
    }

    /// Iterate stored values in descending key order.
    pub fn rev_iter(&self) -> RevIter<T> {
        RevIter::new(self.root.clone())
    }

    /// Visit every stored key and value in ascending key order. The
    /// walk stops early when `f` returns true. Keys are materialized
    /// from the node prefixes into a scratch buffer that is only valid
    /// for the duration of each call.
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&[u8], &T) -> bool,
    {
        let mut key = Vec::new();
        walk_node(&self.root, &mut key, &mut f);
    }

    #[cfg(test)]
    pub(crate) fn root_node(&self) -> &Arc<Node<T>> {
        &self.root
    }
}

impl<T: Clone> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + std::fmt::Debug> std::fmt::Debug for Tree<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut m = f.debug_map();
        self.walk(|k, v| {
            m.entry(&k, v);
            false
        });
        m.finish()
    }
}

impl<T: Clone> FromIterator<(Vec<u8>, T)> for Tree<T> {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, T)>>(iter: I) -> Self {
        let mut txn = Tree::new().txn();
        txn.extend(iter);
        txn.commit()
    }
}

impl<T: Clone> Extend<(Vec<u8>, T)> for Txn<T> {
    fn extend<I: IntoIterator<Item = (Vec<u8>, T)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(&k, v);
        }
    }
}

impl<T: Clone> Txn<T> {
    /// Retrieve the value stored for `k`, observing this transaction's
    /// pending mutations.
    pub fn get(&self, k: &[u8]) -> Option<&T> {
        self.root.get(k)
    }

    /// A snapshot of the in-progress root. The snapshot is stable: it
    /// keeps observing the state at the time of the call even while the
    /// transaction continues to mutate.
    pub fn root(&self) -> Tree<T> {
        Tree {
            root: self.root.clone(),
        }
    }

    /// Add or update a key. Returns the previously stored value, if any.
    /// The key bytes are copied; the tree never aliases caller storage.
    pub fn insert(&mut self, k: &[u8], v: T) -> Option<T> {
        insert_node(self.txid, &mut self.root, k, v)
    }

    /// Remove a key. Returns the previously stored value, if any. A miss
    /// leaves the tree untouched.
    pub fn delete(&mut self, k: &[u8]) -> Option<T> {
        self.root.get(k)?;
        delete_node(self.txid, true, &mut self.root, k)
    }

    /// Make an independent copy of the transaction. The copy contains
    /// all pending writes staged so far; further mutations on either
    /// side are invisible to the other and produce different roots on
    /// commit. The revision bump disowns every node staged before the
    /// split, forcing both sides to copy the spine on their next write.
    #[allow(clippy::should_implement_trait)]
    pub fn clone(&mut self) -> Txn<T> {
        self.txid += 1;
        trace!(txid = self.txid, "txn clone");
        Txn {
            txid: self.txid,
            root: self.root.clone(),
        }
    }

    /// Finalize the transaction and return the new root.
    pub fn commit(self) -> Tree<T> {
        trace!(txid = self.txid, "txn commit");
        Tree { root: self.root }
    }
}

/// The copy-on-write gate. Returns mutable access to the node in
/// `slot`, copying it first unless it was allocated by this transaction
/// and nothing else holds a reference to it. Every ancestor on the path
/// from the root to a mutation site passes through here before being
/// touched, which is the entire mechanism keeping older roots intact.
fn write_node<T: Clone>(txid: u64, slot: &mut Arc<Node<T>>) -> &mut Node<T> {
    if slot.txid != txid || Arc::get_mut(slot).is_none() {
        let n = slot.as_ref();
        // +2 is for possible new edges, to avoid growing during the
        // common split and attach pattern.
        let mut edges = EdgeList::with_capacity(n.edges.len() + 2);
        edges.extend(n.edges.iter().cloned());
        let nc = Node {
            txid,
            value: n.value.clone(),
            prefix: n.prefix.clone(),
            edges,
        };
        *slot = Arc::new(nc);
    }
    Arc::get_mut(slot).expect("write node not exclusively owned")
}

fn insert_node<T: Clone>(txid: u64, slot: &mut Arc<Node<T>>, search: &[u8], v: T) -> Option<T> {
    let nc = write_node(txid, slot);

    // Key exhaustion - this node stores the key.
    if search.is_empty() {
        return nc.value.replace(v);
    }

    let label = search[0];
    let idx = match nc.get_edge(label) {
        Some((idx, _)) => idx,
        None => {
            // No edge, create one.
            nc.add_edge(Edge {
                label,
                node: Arc::new(Node::new_leaf(txid, search, v)),
            });
            return None;
        }
    };

    let child = &nc.edges[idx].node;
    let common = longest_prefix(search, &child.prefix);
    if common == child.prefix.len() {
        return insert_node(txid, &mut nc.edges[idx].node, &search[common..], v);
    }

    // The search key diverges inside the edge. Split: a new
    // intermediate node takes the shared bytes, the existing child is
    // re-attached below it with its prefix trimmed.
    let mut moved = nc.edges[idx].node.clone();
    {
        let mc = write_node(txid, &mut moved);
        mc.prefix.drain(..common);
    }
    let mut split = Node::with_prefix(txid, &search[..common]);
    split.add_edge(Edge {
        label: moved.prefix[0],
        node: moved,
    });

    let search = &search[common..];
    if search.is_empty() {
        split.value = Some(v);
    } else {
        split.add_edge(Edge {
            label: search[0],
            node: Arc::new(Node::new_leaf(txid, search, v)),
        });
    }
    nc.replace_edge(Edge {
        label,
        node: Arc::new(split),
    });
    None
}

/// Recursive removal. The caller has already established that the key
/// is present, so the spine copy on the way down can never be wasted
/// work.
fn delete_node<T: Clone>(
    txid: u64,
    is_root: bool,
    slot: &mut Arc<Node<T>>,
    search: &[u8],
) -> Option<T> {
    if search.is_empty() {
        slot.value.as_ref()?;
        let nc = write_node(txid, slot);
        let old = nc.value.take();
        if !is_root && nc.edges.len() == 1 {
            merge_child(nc);
        }
        return old;
    }

    let label = search[0];
    let (idx, child) = slot.get_edge(label)?;
    if !search.starts_with(&child.prefix) {
        return None;
    }
    let consumed = child.prefix.len();

    let nc = write_node(txid, slot);
    let old = delete_node(txid, false, &mut nc.edges[idx].node, &search[consumed..])?;

    // Prune the edge if the child no longer holds anything, then
    // re-check the compaction invariant for this node.
    let child = &nc.edges[idx].node;
    if child.value.is_none() && child.edges.is_empty() {
        nc.del_edge(label);
        if !is_root && nc.edges.len() == 1 && nc.value.is_none() {
            merge_child(nc);
        }
    }
    Some(old)
}

/// Collapse a node with its single child. Only called on nodes that
/// carry no value and exactly one edge. The merged-in edge list must be
/// fresh storage: the child may still be referenced from older roots,
/// and sharing its backing array would let later in-place edge writes
/// leak into them.
fn merge_child<T: Clone>(n: &mut Node<T>) {
    debug_assert!(n.edges.len() == 1);
    let child = n.edges.remove(0).node;

    n.prefix.extend_from_slice(&child.prefix);
    n.value = child.value.clone();
    n.edges = child.edges.clone();
}

fn walk_node<T, F>(n: &Node<T>, key: &mut Vec<u8>, f: &mut F) -> bool
where
    F: FnMut(&[u8], &T) -> bool,
{
    let depth = key.len();
    key.extend_from_slice(&n.prefix);
    let mut stop = false;
    if let Some(v) = n.value.as_ref() {
        stop = f(key, v);
    }
    if !stop {
        for e in n.edges.iter() {
            if walk_node(&e.node, key, f) {
                stop = true;
                break;
            }
        }
    }
    key.truncate(depth);
    stop
}

#[cfg(feature = "serde")]
impl<T> Serialize for Tree<T>
where
    T: Serialize + Clone,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut len = 0;
        self.walk(|_, _| {
            len += 1;
            false
        });
        let mut state = serializer.serialize_map(Some(len))?;
        let mut res = Ok(());
        self.walk(|k, v| {
            res = state.serialize_entry(k, v);
            res.is_err()
        });
        res?;
        state.end()
    }
}

/// Rebuilds a tree from a serialized map by staging every entry in a
/// single write transaction.
#[cfg(feature = "serde")]
struct TreeVisitor<T>(PhantomData<T>);

#[cfg(feature = "serde")]
impl<'de, T> Visitor<'de> for TreeVisitor<T>
where
    T: Deserialize<'de> + Clone,
{
    type Value = Tree<T>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a map of byte string keys to values")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let mut txn = Tree::new().txn();
        while let Some((k, v)) = access.next_entry::<Vec<u8>, T>()? {
            txn.insert(&k, v);
        }
        Ok(txn.commit())
    }
}

#[cfg(feature = "serde")]
impl<'de, T> Deserialize<'de> for Tree<T>
where
    T: Deserialize<'de> + Clone,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(TreeVisitor(PhantomData))
    }
}
