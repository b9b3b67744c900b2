//! Pre-order iteration over the tree.
//!
//! The iterator owns reference counted handles into the node graph, so
//! it has no lifetime tie to the [`Tree`](crate::Tree) it was created
//! from and stays valid after the handle is dropped.

use std::cmp::Ordering;
use std::sync::Arc;

use smallvec::smallvec;

use crate::node::{Edge, EdgeList, Node};

/// One level of the traversal. `index2` is the next edge to walk
/// forward, `index1` trails it at the last descended position so the
/// iterator can also step backward through this frame.
pub(crate) struct Frame<T> {
    pub(crate) edges: EdgeList<T>,
    pub(crate) index1: usize,
    pub(crate) index2: usize,
}

impl<T> Frame<T> {
    fn new(edges: EdgeList<T>) -> Self {
        Frame {
            edges,
            index1: 0,
            index2: 0,
        }
    }

    /// A synthetic frame holding a single fabricated edge to `n`.
    fn single(n: Arc<Node<T>>) -> Self {
        Frame::new(smallvec![Edge { label: 0, node: n }])
    }

    fn over(edges: &[Edge<T>]) -> Self {
        Frame::new(edges.iter().cloned().collect())
    }
}

/// An iterator over the values of the tree in ascending key order.
pub struct Iter<T> {
    pub(crate) node: Option<Arc<Node<T>>>,
    pub(crate) stack: Vec<Frame<T>>,
    pub(crate) seeded: bool,
    /// Bytes of `node`'s prefix already consumed by a prefix seek.
    /// A later lower bound seek resolves its key relative to that
    /// position, so those bytes must be hidden from the comparison.
    skip: usize,
}

impl<T: Clone> Iter<T> {
    pub(crate) fn new(root: Arc<Node<T>>) -> Self {
        Iter {
            node: Some(root),
            stack: Vec::new(),
            seeded: false,
            skip: 0,
        }
    }

    pub(crate) fn seed(&mut self) {
        if !self.seeded {
            self.seeded = true;
            if let Some(n) = self.node.clone() {
                self.stack.push(Frame::single(n));
            }
        }
    }

    /// Restrict the iterator to the subtree of keys beginning with
    /// `prefix`. Seeking to a prefix no key starts with empties the
    /// iterator.
    pub fn seek_prefix(&mut self, prefix: &[u8]) {
        self.stack.clear();
        self.seeded = false;
        self.skip = 0;
        let Some(mut n) = self.node.take() else {
            return;
        };
        let mut search = prefix;
        loop {
            if search.is_empty() {
                self.node = Some(n);
                return;
            }
            let Some((_, child)) = n.get_edge(search[0]) else {
                return;
            };
            let child = child.clone();
            if search.starts_with(&child.prefix) {
                search = &search[child.prefix.len()..];
                self.skip = child.prefix.len();
                n = child;
            } else if child.prefix.starts_with(search) {
                // The sought prefix ends inside this edge.
                self.skip = search.len();
                self.node = Some(child);
                return;
            } else {
                return;
            }
        }
    }

    /// Position the iterator so that it yields every stored key greater
    /// than or equal to `key`, in ascending order. After a prior
    /// [`seek_prefix`](Iter::seek_prefix), `key` is relative to the
    /// sought prefix. The subtree position is retained, so the iterator
    /// may be sought again afterwards.
    pub fn seek_lower_bound(&mut self, key: &[u8]) {
        // The stack is built up front here rather than lazily. The
        // subtree root and its consumed-prefix offset stay behind for
        // any later seek on this iterator.
        self.stack.clear();
        self.seeded = true;
        let Some(mut n) = self.node.clone() else {
            return;
        };
        let mut skip = self.skip;
        let mut search = key;
        loop {
            let cmp = {
                let prefix = &n.prefix[skip..];
                if prefix.len() < search.len() {
                    prefix.cmp(&search[..prefix.len()])
                } else {
                    prefix.cmp(search)
                }
            };
            match cmp {
                Ordering::Greater => {
                    // Everything below this node sorts after the key.
                    self.seek_min(n);
                    return;
                }
                Ordering::Less => return,
                Ordering::Equal => {}
            }

            let consumed = n.prefix.len() - skip;
            skip = 0;
            search = &search[consumed..];
            if search.is_empty() {
                // The node itself, or failing that the smallest leaf
                // below it, is the lower bound.
                self.seek_min(n);
                return;
            }

            let Some((idx, lb)) = n.get_lower_bound_edge(search[0]) else {
                return;
            };
            let lb = lb.clone();
            // Stack the strictly larger siblings; they all sort after
            // the key. If the bound edge's label is larger than the
            // search byte the prefix comparison on the next pass lands
            // in the Greater arm and descends to its minimum.
            if idx + 1 < n.edges.len() {
                self.stack.push(Frame::over(&n.edges[idx + 1..]));
            }
            n = lb;
        }
    }

    /// Descend to the smallest leaf of `n`, stacking the not taken
    /// siblings along the way.
    fn seek_min(&mut self, mut n: Arc<Node<T>>) {
        loop {
            if n.value.is_some() {
                self.stack.push(Frame::single(n));
                return;
            }
            if n.edges.is_empty() {
                return;
            }
            if n.edges.len() > 1 {
                self.stack.push(Frame::over(&n.edges[1..]));
            }
            let next = n.edges[0].node.clone();
            n = next;
        }
    }

    /// Rewind the iterator so that the last `count` values produced by
    /// forward iteration are yielded again. Rewinding is well defined
    /// for values produced since the last seek: it stops at the
    /// earliest position the traversal stack can still reconstruct,
    /// which is the start for an unsought iterator.
    pub fn back(&mut self, count: usize) {
        for _ in 0..count {
            if !self.back_one() {
                break;
            }
        }
    }

    fn back_one(&mut self) -> bool {
        loop {
            let Some(frame) = self.stack.last() else {
                return false;
            };
            if frame.index2 == 0 {
                // Nothing of this frame has been walked. The frame
                // below is positioned just past the node that pushed
                // it, unless we already rewound to the seek point.
                let n = self.stack.len();
                if n < 2 || self.stack[n - 2].index2 == 0 {
                    return false;
                }
                self.stack.pop();
                let f = self.stack.last_mut().expect("frame below was checked");
                f.index2 -= 1;
                f.index1 = f.index2.saturating_sub(1);
                let node = f.edges[f.index2].node.clone();
                if node.value.is_some() {
                    return true;
                }
                continue;
            }
            // The last walked edge of this frame leads a subtree that
            // is fully consumed, or a leaf; a partially consumed
            // subtree would still have its own frame stacked above.
            let node = frame.edges[frame.index2 - 1].node.clone();
            if node.edges.is_empty() {
                let f = self.stack.last_mut().expect("frame was just inspected");
                f.index2 -= 1;
                f.index1 = f.index2.saturating_sub(1);
                if node.value.is_some() {
                    return true;
                }
                continue;
            }
            // Re-enter the consumed subtree positioned at its end.
            let len = node.edges.len();
            self.stack.push(Frame {
                edges: node.edges.clone(),
                index1: len - 1,
                index2: len,
            });
        }
    }
}

impl<T: Clone> Iterator for Iter<T> {
    type Item = T;

    /// Yield the next value in key order, or `None` when exhausted.
    fn next(&mut self) -> Option<T> {
        self.seed();
        while let Some(frame) = self.stack.last_mut() {
            if frame.index2 >= frame.edges.len() {
                if self.stack.len() == 1 {
                    // Keep the tail frame so back() can rewind from
                    // the exhausted state.
                    break;
                }
                self.stack.pop();
                continue;
            }
            let n = frame.edges[frame.index2].node.clone();
            frame.index1 = frame.index2;
            frame.index2 += 1;
            if !n.edges.is_empty() {
                self.stack.push(Frame::new(n.edges.clone()));
            }
            if let Some(v) = n.value.as_ref() {
                return Some(v.clone());
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

#[cfg(test)]
mod tests {
    use crate::tree::Tree;

    fn tree_of(keys: &[&str]) -> Tree<usize> {
        let mut txn = Tree::new().txn();
        for (i, k) in keys.iter().enumerate() {
            assert!(txn.insert(k.as_bytes(), i).is_none());
        }
        txn.commit()
    }

    /// A tree storing each key as its own value, so iteration output
    /// reads as the keys themselves.
    fn key_tree(keys: &[&str]) -> Tree<String> {
        let mut txn = Tree::new().txn();
        for k in keys {
            assert!(txn.insert(k.as_bytes(), k.to_string()).is_none());
        }
        txn.commit()
    }

    #[test]
    fn test_iter_ordering() {
        let r = tree_of(&["foo/bar/baz", "foo/baz/bar", "foo/zip/zap", "foobar", "zipzap"]);
        let out: Vec<usize> = r.iter().collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_iter_empty_tree() {
        let r: Tree<usize> = Tree::new();
        assert_eq!(r.iter().next(), None);
    }

    #[test]
    fn test_iter_seek_prefix() {
        let keys = ["foo/bar/baz", "foo/baz/bar", "foo/zip/zap", "foobar", "zipzap"];
        let r = tree_of(&keys);

        let cases: &[(&str, &[usize])] = &[
            ("", &[0, 1, 2, 3, 4]),
            ("f", &[0, 1, 2, 3]),
            ("foo", &[0, 1, 2, 3]),
            ("foob", &[3]),
            ("foo/", &[0, 1, 2]),
            ("foo/b", &[0, 1]),
            ("foo/ba", &[0, 1]),
            ("foo/bar", &[0]),
            ("foo/bar/baz", &[0]),
            ("foo/bar/bazoo", &[]),
            ("z", &[4]),
            ("zipzapzop", &[]),
        ];
        for (prefix, want) in cases {
            let mut it = r.iter();
            it.seek_prefix(prefix.as_bytes());
            let out: Vec<usize> = it.collect();
            assert_eq!(&out, want, "prefix {:?}", prefix);
        }
    }

    #[test]
    fn test_iter_seek_lower_bound_fixed_len() {
        let keys = ["00000", "00001", "00004", "00010", "00020", "20020"];
        let r = key_tree(&keys);

        let cases: &[(&str, &[&str])] = &[
            ("00000", &["00000", "00001", "00004", "00010", "00020", "20020"]),
            ("00003", &["00004", "00010", "00020", "20020"]),
            ("00010", &["00010", "00020", "20020"]),
            ("20000", &["20020"]),
            ("20020", &["20020"]),
            ("20022", &[]),
        ];
        for (search, want) in cases {
            let mut it = r.iter();
            it.seek_lower_bound(search.as_bytes());
            let out: Vec<String> = it.collect();
            assert_eq!(&out, want, "search {:?}", search);
        }
    }

    #[test]
    fn test_iter_seek_lower_bound_mixed_len() {
        let keys = ["a1", "abc", "barbazboo", "f", "foo", "found", "zap", "zip"];
        let r = key_tree(&keys);

        let cases: &[(&str, &[&str])] = &[
            ("A", &["a1", "abc", "barbazboo", "f", "foo", "found", "zap", "zip"]),
            ("a1", &["a1", "abc", "barbazboo", "f", "foo", "found", "zap", "zip"]),
            ("b", &["barbazboo", "f", "foo", "found", "zap", "zip"]),
            ("bar", &["barbazboo", "f", "foo", "found", "zap", "zip"]),
            ("barbazboo0", &["f", "foo", "found", "zap", "zip"]),
            ("zippy", &[]),
            ("zi", &["zip"]),
        ];
        for (search, want) in cases {
            let mut it = r.iter();
            it.seek_lower_bound(search.as_bytes());
            let out: Vec<String> = it.collect();
            assert_eq!(&out, want, "search {:?}", search);
        }
    }

    #[test]
    fn test_iter_seek_lower_bound_split_on_search_byte() {
        // The smallest stored key is split on the same byte as the
        // second byte of the search key; the subtree must still be
        // recognised as entirely greater than the search.
        let r = key_tree(&["bb", "bc"]);
        let mut it = r.iter();
        it.seek_lower_bound(b"ac");
        let out: Vec<String> = it.collect();
        assert_eq!(out, vec!["bb", "bc"]);
    }

    #[test]
    fn test_iter_seek_lower_bound_prefix_keys() {
        let r = key_tree(&["f", "fo", "foo", "food", "bug"]);
        let mut it = r.iter();
        it.seek_lower_bound(b"foo");
        let out: Vec<String> = it.collect();
        assert_eq!(out, vec!["foo", "food"]);

        // The empty key participates like any other.
        let r = key_tree(&["f", "fo", "foo", "food", "bug", ""]);
        let mut it = r.iter();
        it.seek_lower_bound(b"foo");
        let out: Vec<String> = it.collect();
        assert_eq!(out, vec!["foo", "food"]);

        let r = key_tree(&["f", "bug", ""]);
        let mut it = r.iter();
        it.seek_lower_bound(b"");
        let out: Vec<String> = it.collect();
        assert_eq!(out, vec!["", "bug", "f"]);

        let r = key_tree(&["f", "bug", "xylophone"]);
        let mut it = r.iter();
        it.seek_lower_bound(b"");
        let out: Vec<String> = it.collect();
        assert_eq!(out, vec!["bug", "f", "xylophone"]);
    }

    #[test]
    fn test_iter_seek_lower_bound_single_key() {
        let r = key_tree(&["gcgc"]);
        let mut it = r.iter();
        it.seek_lower_bound(b"");
        let out: Vec<String> = it.collect();
        assert_eq!(out, vec!["gcgc"]);
    }

    #[test]
    fn test_iter_seek_lower_bound_value_bearing_parent() {
        // The bound lands on an internal node that stores no value but
        // whose children do.
        let r = key_tree(&["bar", "foo00", "foo11"]);
        let mut it = r.iter();
        it.seek_lower_bound(b"foo");
        let out: Vec<String> = it.collect();
        assert_eq!(out, vec!["foo00", "foo11"]);
    }

    #[test]
    fn test_iter_seek_lower_bound_deep_divergence() {
        let keys = [
            "aaaba", "aabaa", "aabab", "aabcb", "aacca", "abaaa", "abacb", "abbcb", "abcaa",
            "abcba", "abcbb", "acaaa", "acaab", "acaac", "acaca", "acacb", "acbaa", "acbbb",
            "acbcc", "accca", "babaa", "babcc", "bbaaa", "bbacc", "bbbab", "bbbac", "bbbcc",
            "bbcab", "bbcca", "bbccc", "bcaac", "bcbca", "bcbcc", "bccac", "bccbc", "bccca",
            "caaab", "caacc", "cabac", "cabbb", "cabbc", "cabcb", "cacac", "cacbc", "cacca",
            "cbaba", "cbabb", "cbabc", "cbbaa", "cbbab", "cbbbc", "cbcbb", "cbcbc", "cbcca",
            "ccaaa", "ccabc", "ccaca", "ccacc", "ccbac", "cccaa", "cccac", "cccca",
        ];
        let r = key_tree(&keys);
        let mut it = r.iter();
        it.seek_lower_bound(b"cbacb");
        let out: Vec<String> = it.collect();
        let want: Vec<String> = keys
            .iter()
            .filter(|k| k.as_bytes() >= &b"cbacb"[..])
            .map(|k| k.to_string())
            .collect();
        assert_eq!(out, want);
    }

    #[test]
    fn test_iter_seek_prefix_then_lower_bound() {
        let keys = ["foo/bar/baz", "foo/baz/bar", "foo/zip/zap", "foobar", "zipzap"];
        let r = tree_of(&keys);

        let cases: &[(&str, &str, &[usize])] = &[
            ("", "", &[0, 1, 2, 3, 4]),
            ("f", "oo", &[0, 1, 2, 3]),
            ("foo", "", &[0, 1, 2, 3]),
            ("foob", "", &[3]),
            ("foo/", "b", &[0, 1, 2]),
            ("foo", "/b", &[0, 1, 2, 3]),
            ("foo/b", "ar", &[0, 1]),
            ("foo/ba", "r/baz", &[0, 1]),
            ("foo/bar", "/baz", &[0]),
            ("foo/bar/baz", "", &[0]),
            ("foo/bar/", "zzz", &[]),
            ("z", "a", &[4]),
        ];
        for (prefix, bound, want) in cases {
            let mut it = r.iter();
            it.seek_prefix(prefix.as_bytes());
            it.seek_lower_bound(bound.as_bytes());
            let out: Vec<usize> = it.collect();
            assert_eq!(&out, want, "prefix {:?} bound {:?}", prefix, bound);
        }
    }

    #[test]
    fn test_iter_back_single() {
        let r = tree_of(&["a", "b", "c"]);
        let mut it = r.iter();
        assert_eq!(it.next(), Some(0));
        assert_eq!(it.next(), Some(1));
        it.back(1);
        assert_eq!(it.next(), Some(1));
        assert_eq!(it.next(), Some(2));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_iter_back_across_depth() {
        let r = tree_of(&["a", "ab", "abc", "b"]);
        let mut it = r.iter();
        let first: Vec<usize> = it.by_ref().collect();
        assert_eq!(first, vec![0, 1, 2, 3]);

        // Rewind from the exhausted state across subtree boundaries.
        it.back(2);
        let replay: Vec<usize> = it.by_ref().collect();
        assert_eq!(replay, vec![2, 3]);

        it.back(4);
        let replay: Vec<usize> = it.by_ref().collect();
        assert_eq!(replay, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_iter_back_past_start_stops() {
        let r = tree_of(&["x", "y"]);
        let mut it = r.iter();
        assert_eq!(it.next(), Some(0));
        // Rewinding further than was produced parks at the start.
        it.back(10);
        let out: Vec<usize> = it.collect();
        assert_eq!(out, vec![0, 1]);
    }

    #[test]
    fn test_iter_back_after_seek() {
        let r = tree_of(&["a", "b", "c", "d"]);
        let mut it = r.iter();
        it.seek_lower_bound(b"b");
        assert_eq!(it.next(), Some(1));
        assert_eq!(it.next(), Some(2));
        // Rewinding parks at the earliest position the stack can still
        // reconstruct; keys before the seek stay hidden.
        it.back(5);
        let out: Vec<usize> = it.collect();
        assert_eq!(out, vec![2, 3]);
    }

    #[test]
    fn test_iter_reseek() {
        let r = tree_of(&["a", "b", "c", "d"]);
        let mut it = r.iter();

        it.seek_lower_bound(b"c");
        let out: Vec<usize> = it.by_ref().collect();
        assert_eq!(out, vec![2, 3]);

        // The same iterator can be sought again.
        it.seek_lower_bound(b"b");
        let out: Vec<usize> = it.by_ref().collect();
        assert_eq!(out, vec![1, 2, 3]);

        it.seek_prefix(b"d");
        let out: Vec<usize> = it.by_ref().collect();
        assert_eq!(out, vec![3]);
    }

    #[test]
    fn test_iter_reseek_keeps_prefix_position() {
        let r = tree_of(&["foo/bar/baz", "foo/baz/bar", "foo/zip/zap", "foobar", "zipzap"]);
        let mut it = r.iter();
        it.seek_prefix(b"foo/");

        // Every lower bound is resolved against the sought prefix.
        it.seek_lower_bound(b"b");
        let out: Vec<usize> = it.by_ref().collect();
        assert_eq!(out, vec![0, 1, 2]);

        it.seek_lower_bound(b"z");
        let out: Vec<usize> = it.by_ref().collect();
        assert_eq!(out, vec![2]);

        it.seek_lower_bound(b"zz");
        let out: Vec<usize> = it.by_ref().collect();
        assert_eq!(out, Vec::<usize>::new());
    }

    #[test]
    fn test_iter_back_interleaved() {
        let r = tree_of(&["a", "ab", "b", "ba", "c"]);
        let mut it = r.iter();
        assert_eq!(it.next(), Some(0));
        assert_eq!(it.next(), Some(1));
        assert_eq!(it.next(), Some(2));
        it.back(1);
        assert_eq!(it.next(), Some(2));
        assert_eq!(it.next(), Some(3));
        it.back(3);
        let out: Vec<usize> = it.collect();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
