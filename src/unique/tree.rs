use std::cmp::Ordering;

use crate::unique::comparator::KeyComparator;
use crate::unique::config::element_size;
use crate::unique::error::{allocation_failed, UniqueResult};

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Node {
    left: u32,
    right: u32,
    height: u8,
}

/// Duplicate-free, ordered set of fixed-size keys held in memory.
///
/// Keys live back to back in one arena and nodes refer to them by index, so
/// `clear` keeps both allocations around for the next tree. The set is an
/// AVL tree; the ordering comes from the caller's comparator on every call.
#[derive(Debug)]
pub struct BoundedUniqueSet {
    key_size: usize,
    element_size: usize,
    max_elements: usize,
    keys: Vec<u8>,
    nodes: Vec<Node>,
    root: u32,
}

impl BoundedUniqueSet {
    pub fn new(key_size: usize, tree_element_overhead: usize, max_elements: usize) -> Self {
        Self {
            key_size,
            element_size: element_size(tree_element_overhead, key_size),
            max_elements,
            keys: Vec::new(),
            nodes: Vec::new(),
            root: NIL,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// True once another distinct key would push the set past its budget.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_elements
    }

    /// Bytes charged against the memory budget.
    pub fn memory_used(&self) -> usize {
        self.len() * self.element_size
    }

    /// Inserts `key` unless an equal key is present. Returns whether it was added.
    pub fn insert<C: KeyComparator>(&mut self, key: &[u8], cmp: &C) -> UniqueResult<bool> {
        debug_assert_eq!(key.len(), self.key_size);
        self.reserve_one()?;
        let (root, inserted) = self.insert_at(self.root, key, cmp);
        self.root = root;
        Ok(inserted)
    }

    pub fn contains<C: KeyComparator>(&self, key: &[u8], cmp: &C) -> bool {
        let mut node = self.root;
        while node != NIL {
            node = match cmp.compare(key, self.key(node)) {
                Ordering::Equal => return true,
                Ordering::Less => self.nodes[node as usize].left,
                Ordering::Greater => self.nodes[node as usize].right,
            };
        }
        false
    }

    /// Drops every key but keeps the arena allocations.
    pub fn clear(&mut self) {
        self.keys.clear();
        self.nodes.clear();
        self.root = NIL;
    }

    /// Keys in ascending comparator order.
    pub fn iter(&self) -> Iter<'_> {
        let mut iter = Iter {
            set: self,
            stack: Vec::with_capacity(self.height() as usize),
        };
        iter.push_left(self.root);
        iter
    }

    fn height(&self) -> u8 {
        self.height_of(self.root)
    }

    fn key(&self, node: u32) -> &[u8] {
        let start = node as usize * self.key_size;
        &self.keys[start..start + self.key_size]
    }

    fn reserve_one(&mut self) -> UniqueResult<()> {
        self.keys
            .try_reserve(self.key_size)
            .map_err(|_| allocation_failed("unique tree keys", self.key_size))?;
        self.nodes
            .try_reserve(1)
            .map_err(|_| allocation_failed("unique tree nodes", std::mem::size_of::<Node>()))
    }

    fn push_node(&mut self, key: &[u8]) -> u32 {
        let index = self.nodes.len() as u32;
        self.keys.extend_from_slice(key);
        self.nodes.push(Node {
            left: NIL,
            right: NIL,
            height: 1,
        });
        index
    }

    fn insert_at<C: KeyComparator>(&mut self, node: u32, key: &[u8], cmp: &C) -> (u32, bool) {
        if node == NIL {
            return (self.push_node(key), true);
        }

        match cmp.compare(key, self.key(node)) {
            Ordering::Equal => (node, false),
            Ordering::Less => {
                let (child, inserted) = self.insert_at(self.nodes[node as usize].left, key, cmp);
                self.nodes[node as usize].left = child;
                if inserted {
                    (self.rebalance(node), true)
                } else {
                    (node, false)
                }
            }
            Ordering::Greater => {
                let (child, inserted) = self.insert_at(self.nodes[node as usize].right, key, cmp);
                self.nodes[node as usize].right = child;
                if inserted {
                    (self.rebalance(node), true)
                } else {
                    (node, false)
                }
            }
        }
    }

    fn height_of(&self, node: u32) -> u8 {
        if node == NIL {
            0
        } else {
            self.nodes[node as usize].height
        }
    }

    fn update_height(&mut self, node: u32) {
        let n = self.nodes[node as usize];
        self.nodes[node as usize].height = 1 + self.height_of(n.left).max(self.height_of(n.right));
    }

    fn balance_factor(&self, node: u32) -> i16 {
        let n = self.nodes[node as usize];
        self.height_of(n.left) as i16 - self.height_of(n.right) as i16
    }

    fn rotate_right(&mut self, node: u32) -> u32 {
        let pivot = self.nodes[node as usize].left;
        self.nodes[node as usize].left = self.nodes[pivot as usize].right;
        self.nodes[pivot as usize].right = node;
        self.update_height(node);
        self.update_height(pivot);
        pivot
    }

    fn rotate_left(&mut self, node: u32) -> u32 {
        let pivot = self.nodes[node as usize].right;
        self.nodes[node as usize].right = self.nodes[pivot as usize].left;
        self.nodes[pivot as usize].left = node;
        self.update_height(node);
        self.update_height(pivot);
        pivot
    }

    fn rebalance(&mut self, node: u32) -> u32 {
        self.update_height(node);
        let balance = self.balance_factor(node);

        if balance > 1 {
            let left = self.nodes[node as usize].left;
            if self.balance_factor(left) < 0 {
                self.nodes[node as usize].left = self.rotate_left(left);
            }
            return self.rotate_right(node);
        }

        if balance < -1 {
            let right = self.nodes[node as usize].right;
            if self.balance_factor(right) > 0 {
                self.nodes[node as usize].right = self.rotate_right(right);
            }
            return self.rotate_left(node);
        }

        node
    }
}

/// In-order iterator over a [`BoundedUniqueSet`].
pub struct Iter<'a> {
    set: &'a BoundedUniqueSet,
    stack: Vec<u32>,
}

impl<'a> Iter<'a> {
    fn push_left(&mut self, mut node: u32) {
        while node != NIL {
            self.stack.push(node);
            node = self.set.nodes[node as usize].left;
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let set = self.set;
        let node = self.stack.pop()?;
        self.push_left(set.nodes[node as usize].right);
        Some(set.key(node))
    }
}
