//! Iradix - An immutable radix (Patricia) tree
//!
//! This tree maps byte string keys to values and can be treated as a
//! Dictionary abstract data type. The advantages over a standard hash map
//! are prefix based lookups and ordered iteration. Because the structure
//! is immutable, a committed [`Tree`] is safe to read from any number of
//! threads without coordination.
//!
//! Mutation happens through a [`Txn`]. A transaction is based on a root,
//! applies a series of inserts and deletes, and commits to produce a new
//! root. Unmodified subtrees are shared between the old and the new root,
//! so a commit only allocates the spine of nodes that a transaction
//! actually touched. This is achieved through COW or MVCC - each node is
//! stamped with the revision of the transaction that created it, and a
//! transaction only mutates nodes carrying its own stamp.
//!
//! Readers holding an older root are guaranteed the content of that root
//! will never change, no matter how many transactions commit after it.
//! Writers are not serialised by the tree; callers that want a single
//! linear history arbitrate commits themselves.
//!
//! # Features
//!
//! * `ahash` - use the cpu accelerated ahash crate for the reverse
//!   iterator's internal bookkeeping. Enabled by default.
//! * `serde` - serialize and deserialize trees as maps.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![warn(missing_docs)]

mod iter;
mod node;
mod reverse_iter;
mod tree;
mod utils;

pub use crate::iter::Iter;
pub use crate::reverse_iter::RevIter;
pub use crate::tree::{Tree, Txn};
