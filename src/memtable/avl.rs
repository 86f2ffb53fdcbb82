use std::borrow::Borrow;
use std::cmp::Ordering;
use std::mem;

/// Total order used by the tree. Keeps comparison explicit instead of
/// relying on whatever `Ord` the key type happens to carry.
pub trait Comparator<K: ?Sized> {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Comparator that defers to `Ord`. For byte keys this is plain
/// lexicographic order, which is also the on-disk segment order.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord + ?Sized> Comparator<K> for OrdComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// A single node. Children are indices into `AvlTree.nodes`.
struct AvlNode<K, V> {
    key: K,
    value: V,
    left: Option<usize>,
    right: Option<usize>,
    height: u32,
}

/// A height-balanced binary search tree.
///
/// Nodes live in an arena (`Vec`) and link to each other by index, so the
/// tree needs no `unsafe` and no `Box` juggling during rotations. Entries are
/// never removed individually (deletes are tombstone values), so the arena
/// only grows until `clear`.
///
/// ```text
///         d              rotate_right(d)        b
///        / \             ─────────────►        / \
///       b   e                                 a   d
///      / \                                       / \
///     a   c                                     c   e
/// ```
pub struct AvlTree<K, V, C = OrdComparator> {
    nodes: Vec<AvlNode<K, V>>,
    root: Option<usize>,
    cmp: C,
}

impl<K: Ord, V> AvlTree<K, V, OrdComparator> {
    pub fn new() -> Self {
        Self::with_comparator(OrdComparator)
    }
}

impl<K: Ord, V> Default for AvlTree<K, V, OrdComparator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C: Comparator<K>> AvlTree<K, V, C> {
    pub fn with_comparator(cmp: C) -> Self {
        AvlTree {
            nodes: Vec::new(),
            root: None,
            cmp,
        }
    }

    /// Insert or replace. Returns the previous value for `key`, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let (root, replaced) = self.insert_at(self.root, key, value);
        self.root = Some(root);
        replaced
    }

    /// Look up by any borrowed form of the key the comparator understands.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        Q: ?Sized,
        K: Borrow<Q>,
        C: Comparator<Q>,
    {
        let mut cur = self.root;
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            match <C as Comparator<Q>>::compare(&self.cmp, key, Borrow::<Q>::borrow(&node.key)) {
                Ordering::Less => cur = node.left,
                Ordering::Greater => cur = node.right,
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Height of the tree (0 when empty).
    pub fn height(&self) -> u32 {
        self.node_height(self.root)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
    }

    /// In-order (ascending) iteration.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter {
            nodes: &self.nodes,
            stack: Vec::new(),
        };
        iter.push_left(self.root);
        iter
    }

    fn insert_at(&mut self, node: Option<usize>, key: K, value: V) -> (usize, Option<V>) {
        let Some(idx) = node else {
            self.nodes.push(AvlNode {
                key,
                value,
                left: None,
                right: None,
                height: 1,
            });
            return (self.nodes.len() - 1, None);
        };

        match <C as Comparator<K>>::compare(&self.cmp, &key, &self.nodes[idx].key) {
            Ordering::Equal => {
                let old = mem::replace(&mut self.nodes[idx].value, value);
                (idx, Some(old))
            }
            Ordering::Less => {
                let (child, old) = self.insert_at(self.nodes[idx].left, key, value);
                self.nodes[idx].left = Some(child);
                if old.is_some() {
                    return (idx, old);
                }
                (self.rebalance(idx), None)
            }
            Ordering::Greater => {
                let (child, old) = self.insert_at(self.nodes[idx].right, key, value);
                self.nodes[idx].right = Some(child);
                if old.is_some() {
                    return (idx, old);
                }
                (self.rebalance(idx), None)
            }
        }
    }

    fn node_height(&self, node: Option<usize>) -> u32 {
        node.map_or(0, |idx| self.nodes[idx].height)
    }

    fn update_height(&mut self, idx: usize) {
        let h = self
            .node_height(self.nodes[idx].left)
            .max(self.node_height(self.nodes[idx].right));
        self.nodes[idx].height = h + 1;
    }

    fn balance_factor(&self, idx: usize) -> i64 {
        self.node_height(self.nodes[idx].left) as i64 - self.node_height(self.nodes[idx].right) as i64
    }

    /// Restore the AVL property at `idx`; returns the new subtree root.
    fn rebalance(&mut self, idx: usize) -> usize {
        self.update_height(idx);
        let balance = self.balance_factor(idx);

        if balance > 1 {
            if let Some(left) = self.nodes[idx].left {
                if self.balance_factor(left) < 0 {
                    self.nodes[idx].left = Some(self.rotate_left(left));
                }
            }
            return self.rotate_right(idx);
        }
        if balance < -1 {
            if let Some(right) = self.nodes[idx].right {
                if self.balance_factor(right) > 0 {
                    self.nodes[idx].right = Some(self.rotate_right(right));
                }
            }
            return self.rotate_left(idx);
        }
        idx
    }

    fn rotate_right(&mut self, y: usize) -> usize {
        let Some(x) = self.nodes[y].left else {
            return y;
        };
        self.nodes[y].left = self.nodes[x].right;
        self.nodes[x].right = Some(y);
        self.update_height(y);
        self.update_height(x);
        x
    }

    fn rotate_left(&mut self, x: usize) -> usize {
        let Some(y) = self.nodes[x].right else {
            return x;
        };
        self.nodes[x].right = self.nodes[y].left;
        self.nodes[y].left = Some(x);
        self.update_height(x);
        self.update_height(y);
        y
    }
}

/// In-order iterator. Holds the path of pending ancestors on a stack.
pub struct Iter<'a, K, V> {
    nodes: &'a [AvlNode<K, V>],
    stack: Vec<usize>,
}

impl<K, V> Iter<'_, K, V> {
    fn push_left(&mut self, mut node: Option<usize>) {
        while let Some(idx) = node {
            self.stack.push(idx);
            node = self.nodes[idx].left;
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.stack.pop()?;
        let nodes = self.nodes;
        self.push_left(nodes[idx].right);
        let node = &nodes[idx];
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_inserts_stay_balanced() {
        let mut tree = AvlTree::new();
        for i in 0..1024u32 {
            tree.insert(i, i * 2);
        }
        assert_eq!(tree.len(), 1024);
        // A perfectly balanced tree of 1024 nodes has height 11;
        // AVL guarantees < 1.44 * log2(n + 2).
        assert!(tree.height() <= 15, "height {}", tree.height());
        assert_eq!(tree.get(&512u32), Some(&1024));
    }

    #[test]
    fn insert_replaces_and_returns_old_value() {
        let mut tree = AvlTree::new();
        assert_eq!(tree.insert("k", 1), None);
        assert_eq!(tree.insert("k", 2), Some(1));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get("k"), Some(&2));
    }

    #[test]
    fn iter_is_sorted() {
        let mut tree = AvlTree::new();
        for k in [5, 1, 9, 3, 7, 2, 8] {
            tree.insert(k, ());
        }
        let keys: Vec<i32> = tree.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 2, 3, 5, 7, 8, 9]);
    }

    #[test]
    fn custom_comparator_reverses_order() {
        struct Reverse;
        impl Comparator<u8> for Reverse {
            fn compare(&self, a: &u8, b: &u8) -> Ordering {
                b.cmp(a)
            }
        }

        let mut tree = AvlTree::with_comparator(Reverse);
        for k in [3u8, 1, 2] {
            tree.insert(k, ());
        }
        let keys: Vec<u8> = tree.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![3, 2, 1]);
    }

    #[test]
    fn byte_keys_lookup_by_slice() {
        let mut tree: AvlTree<Vec<u8>, u32> = AvlTree::new();
        tree.insert(b"banana".to_vec(), 2);
        tree.insert(b"apple".to_vec(), 1);
        assert_eq!(tree.get(b"apple".as_slice()), Some(&1));
        assert_eq!(tree.get(b"cherry".as_slice()), None);
    }
}
