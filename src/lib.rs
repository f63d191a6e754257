//! # unrolled-avl
//!
//! An ordered container built on an unrolled AVL tree.
//!
//! Every tree node stores a sorted run of up to `node_capacity` elements
//! contiguously, and AVL balancing operates over nodes rather than individual
//! elements. Lookups binary-search a whole run once the right node is found,
//! so most of the pointer chasing of a classic binary tree disappears while the
//! height stays logarithmic.
//!
//! Nodes live in an arena and are addressed by index. Nodes emptied by a removal
//! are recycled through a free list and reused by later insertions.
//!
//! ## Example
//!
//! ```rust
//! use unrolled_avl::UnrolledAvlTree;
//!
//! let mut tree = UnrolledAvlTree::with_node_capacity(4)?;
//! for v in [50, 40, 80, 100, 90, 70, 60] {
//!     tree.insert(v)?;
//! }
//!
//! assert_eq!(tree.min(), Some(&40));
//! assert_eq!(tree.max(), Some(&100));
//! assert_eq!(tree.remove(&90), Some(90));
//! assert!(!tree.erase(&1));
//!
//! let sorted: Vec<i32> = tree.iter().copied().collect();
//! assert_eq!(sorted, vec![40, 50, 60, 70, 80, 100]);
//! # Ok::<(), unrolled_avl::TreeError>(())
//! ```

#![forbid(unsafe_code)]

mod error;
mod tracing_helpers;

pub use error::{Result, TreeError};

use std::cmp::Ordering;
use std::fmt;
use std::mem;

use tracing_helpers::{debug_log, trace_log};

// =============================================================================
// Configuration
// =============================================================================

/// Node capacity used by [`UnrolledAvlTree::new`].
pub const DEFAULT_NODE_CAPACITY: usize = 16;

/// Smallest usable node capacity. A capacity of one degenerates to a plain AVL tree.
pub const MIN_NODE_CAPACITY: usize = 1;

/// Largest accepted node capacity.
pub const MAX_NODE_CAPACITY: usize = u16::MAX as usize;

/// Construction parameters for [`UnrolledAvlTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Maximum number of elements stored in one node.
    pub node_capacity: usize,
    /// Nodes allocated at construction and parked on the free list.
    pub preallocated_nodes: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            node_capacity: DEFAULT_NODE_CAPACITY,
            preallocated_nodes: 0,
        }
    }
}

impl TreeConfig {
    /// Configuration with the given node capacity and no preallocation.
    pub fn new(node_capacity: usize) -> Self {
        Self {
            node_capacity,
            ..Self::default()
        }
    }

    /// Park `nodes` fresh nodes on the free list at construction.
    #[must_use]
    pub fn with_preallocated_nodes(mut self, nodes: usize) -> Self {
        self.preallocated_nodes = nodes;
        self
    }

    /// Derive the node capacity from a per-node byte budget.
    ///
    /// The budget covers the node header (links, heights, run bookkeeping) plus
    /// the element run. Fails if the budget cannot hold a single `T`.
    pub fn for_node_bytes<T>(bytes: usize) -> Result<Self> {
        let header = mem::size_of::<Node<T>>();
        let element = mem::size_of::<T>().max(1);
        let config = Self::new(bytes.saturating_sub(header) / element);
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration without building a tree.
    pub fn validate(&self) -> Result<()> {
        if (MIN_NODE_CAPACITY..=MAX_NODE_CAPACITY).contains(&self.node_capacity) {
            Ok(())
        } else {
            Err(TreeError::InvalidConfiguration {
                capacity: self.node_capacity,
                min: MIN_NODE_CAPACITY,
                max: MAX_NODE_CAPACITY,
            })
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// Arena index of a node.
type NodeIdx = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// A tree node: a sorted run of elements plus structural links.
///
/// `elements` is reserved to exactly `capacity` when the node is created and is
/// never pushed past it, so the run buffer is allocated once per node.
struct Node<T> {
    left: Option<NodeIdx>,
    right: Option<NodeIdx>,
    /// Back-reference used by rotations and upward retracing.
    parent: Option<NodeIdx>,
    capacity: u32,
    /// Height of the left subtree (0 for no subtree).
    left_height: u8,
    right_height: u8,
    elements: Vec<T>,
}

impl<T> Node<T> {
    #[inline]
    fn height(&self) -> u8 {
        self.left_height.max(self.right_height).saturating_add(1)
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.elements.len() >= self.capacity as usize
    }

    // Reachable nodes always hold at least one element.
    #[inline]
    fn first(&self) -> &T {
        &self.elements[0]
    }

    #[inline]
    fn last(&self) -> &T {
        &self.elements[self.elements.len() - 1]
    }

    fn child(&self, side: Side) -> Option<NodeIdx> {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    fn set_child(&mut self, side: Side, child: Option<NodeIdx>) {
        match side {
            Side::Left => self.left = child,
            Side::Right => self.right = child,
        }
    }

    fn reset(&mut self) {
        self.elements.clear();
        self.left = None;
        self.right = None;
        self.parent = None;
        self.left_height = 0;
        self.right_height = 0;
    }
}

impl<T: Ord> Node<T> {
    /// Insert into a node with spare room. Returns the slot written.
    fn insert_sorted(&mut self, value: T) -> usize {
        debug_assert!(!self.is_full());
        let slot = self.elements.partition_point(|e| e <= &value);
        self.elements.insert(slot, value);
        slot
    }

    /// Insert into a full node whose range covers `value`, pushing out the
    /// largest element. Returns the slot written and the evicted element.
    fn insert_evicting(&mut self, value: T) -> (usize, T) {
        debug_assert!(self.is_full());
        let last = self.elements.len() - 1;
        // Lower bound keeps the slot inside the run even when `value` equals the
        // current maximum.
        let slot = self.elements.partition_point(|e| e < &value);
        let evicted = mem::replace(&mut self.elements[last], value);
        self.elements[slot..].rotate_right(1);
        (slot, evicted)
    }
}

impl<T: Clone> Clone for Node<T> {
    fn clone(&self) -> Self {
        let mut elements = Vec::with_capacity(self.capacity as usize);
        elements.extend_from_slice(&self.elements);
        Self {
            left: self.left,
            right: self.right,
            parent: self.parent,
            capacity: self.capacity,
            left_height: self.left_height,
            right_height: self.right_height,
            elements,
        }
    }
}

// =============================================================================
// Node arena
// =============================================================================

/// Node storage with a free list of recycled indices.
///
/// `free` always has room for every node in `nodes`, so recycling never
/// allocates.
struct NodeArena<T> {
    nodes: Vec<Node<T>>,
    free: Vec<NodeIdx>,
    capacity: u32,
}

impl<T: Clone> Clone for NodeArena<T> {
    fn clone(&self) -> Self {
        let mut free = Vec::with_capacity(self.nodes.len());
        free.extend_from_slice(&self.free);
        Self {
            nodes: self.nodes.clone(),
            free,
            capacity: self.capacity,
        }
    }
}

/// Index for the node that would be pushed onto an arena of `len` nodes.
fn next_node_index(len: usize) -> Result<NodeIdx> {
    NodeIdx::try_from(len).map_err(|_| TreeError::NodeLimit {
        limit: NodeIdx::MAX as usize + 1,
    })
}

impl<T> NodeArena<T> {
    fn new(capacity: u32) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            capacity,
        }
    }

    #[inline]
    fn node(&self, idx: NodeIdx) -> &Node<T> {
        &self.nodes[idx as usize]
    }

    #[inline]
    fn node_mut(&mut self, idx: NodeIdx) -> &mut Node<T> {
        &mut self.nodes[idx as usize]
    }

    fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Allocate a fresh node. Every reservation happens before the arena is touched.
    fn create_node(&mut self, parent: Option<NodeIdx>) -> Result<NodeIdx> {
        let idx = next_node_index(self.nodes.len())?;
        self.nodes.try_reserve(1)?;
        self.free
            .try_reserve((self.nodes.len() + 1).saturating_sub(self.free.len()))?;
        let mut elements = Vec::new();
        elements.try_reserve_exact(self.capacity as usize)?;

        self.nodes.push(Node {
            left: None,
            right: None,
            parent,
            capacity: self.capacity,
            left_height: 0,
            right_height: 0,
            elements,
        });
        trace_log!(node = idx, capacity = self.capacity, "allocated node");
        Ok(idx)
    }

    /// Take a recycled node if one is available, otherwise allocate.
    fn acquire(&mut self, parent: Option<NodeIdx>) -> Result<NodeIdx> {
        if let Some(idx) = self.free.pop() {
            self.node_mut(idx).parent = parent;
            trace_log!(node = idx, "reused recycled node");
            return Ok(idx);
        }
        self.create_node(parent)
    }

    fn recycle(&mut self, idx: NodeIdx) {
        self.node_mut(idx).reset();
        self.free.push(idx);
        trace_log!(node = idx, free = self.free.len(), "recycled node");
    }

    /// Park `count` fresh nodes on the free list.
    fn preallocate(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let idx = self.create_node(None)?;
            self.free.push(idx);
        }
        Ok(())
    }

    /// Make sure the next [`acquire`](Self::acquire) cannot fail.
    fn reserve_spare(&mut self) -> Result<()> {
        if self.free.is_empty() {
            self.preallocate(1)?;
        }
        Ok(())
    }

    /// Rebuild the arena from the nodes reachable from `root`, in pre-order.
    ///
    /// Returns the remapped root and the number of released nodes.
    fn compact(&mut self, root: Option<NodeIdx>) -> (Option<NodeIdx>, usize) {
        let released = self.free.len();
        if released == 0 {
            return (root, 0);
        }

        let mut remap: Vec<Option<NodeIdx>> = vec![None; self.nodes.len()];
        let mut order: Vec<NodeIdx> = Vec::with_capacity(self.live_count());
        let mut stack: Vec<NodeIdx> = root.into_iter().collect();
        while let Some(idx) = stack.pop() {
            remap[idx as usize] = Some(order.len() as NodeIdx);
            order.push(idx);
            let node = self.node(idx);
            stack.extend(node.right);
            stack.extend(node.left);
        }

        let mut old: Vec<Option<Node<T>>> =
            mem::take(&mut self.nodes).into_iter().map(Some).collect();
        let relink = |link: Option<NodeIdx>| link.and_then(|i| remap[i as usize]);
        let mut nodes = Vec::with_capacity(order.len());
        for idx in order {
            if let Some(mut node) = old[idx as usize].take() {
                node.left = relink(node.left);
                node.right = relink(node.right);
                node.parent = relink(node.parent);
                nodes.push(node);
            }
        }

        self.nodes = nodes;
        self.free.clear();
        debug_log!(live = self.nodes.len(), released, "compacted node arena");
        (relink(root), released)
    }

    fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
        self.free.shrink_to(self.nodes.len());
    }

    fn memory_usage(&self) -> usize {
        self.nodes.capacity() * mem::size_of::<Node<T>>()
            + self
                .nodes
                .iter()
                .map(|n| n.elements.capacity() * mem::size_of::<T>())
                .sum::<usize>()
            + self.free.capacity() * mem::size_of::<NodeIdx>()
    }
}

// =============================================================================
// UnrolledAvlTree
// =============================================================================

/// An ordered multiset stored in an unrolled AVL tree.
///
/// Equal elements are allowed; lookups and removals return one of them, with
/// no promise about which.
#[derive(Clone)]
pub struct UnrolledAvlTree<T> {
    arena: NodeArena<T>,
    root: Option<NodeIdx>,
    len: usize,
}

impl<T> UnrolledAvlTree<T> {
    /// Empty tree with [`DEFAULT_NODE_CAPACITY`].
    pub fn new() -> Self {
        Self {
            arena: NodeArena::new(DEFAULT_NODE_CAPACITY as u32),
            root: None,
            len: 0,
        }
    }

    /// Empty tree whose nodes hold up to `node_capacity` elements.
    pub fn with_node_capacity(node_capacity: usize) -> Result<Self> {
        Self::with_config(TreeConfig::new(node_capacity))
    }

    /// Build an empty tree from `config`.
    ///
    /// Fails with [`TreeError::InvalidConfiguration`] before anything is
    /// allocated if the node capacity is out of range, and with
    /// [`TreeError::OutOfMemory`] if preallocation fails.
    pub fn with_config(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let mut arena = NodeArena::new(config.node_capacity as u32);
        arena.preallocate(config.preallocated_nodes)?;
        debug_log!(
            node_capacity = config.node_capacity,
            preallocated = config.preallocated_nodes,
            "created unrolled AVL tree"
        );
        Ok(Self {
            arena,
            root: None,
            len: 0,
        })
    }

    /// Number of stored elements, duplicates included.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the tree holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of elements per node.
    #[inline]
    pub fn node_capacity(&self) -> usize {
        self.arena.capacity as usize
    }

    /// Number of nodes reachable from the root.
    pub fn node_count(&self) -> usize {
        self.arena.live_count()
    }

    /// Number of recycled nodes waiting on the free list.
    pub fn free_node_count(&self) -> usize {
        self.arena.free.len()
    }

    /// Height of the root's taller subtree, in nodes. `0` for an empty tree
    /// and for a tree made of a single node.
    pub fn height(&self) -> usize {
        self.root.map_or(0, |r| {
            let node = self.arena.node(r);
            usize::from(node.left_height.max(node.right_height))
        })
    }

    /// Approximate heap bytes held by the tree, including recycled nodes.
    pub fn memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    /// Smallest element.
    pub fn min(&self) -> Option<&T> {
        let idx = self.leftmost(self.root?);
        self.arena.node(idx).elements.first()
    }

    /// Largest element.
    pub fn max(&self) -> Option<&T> {
        let idx = self.rightmost(self.root?);
        self.arena.node(idx).elements.last()
    }

    /// Find an element with a three-way comparison.
    ///
    /// `f` compares an element against the target the same way
    /// [`slice::binary_search_by`] does: `Less` if the element orders before
    /// the target, `Greater` if after, `Equal` on a match.
    pub fn get_by<F>(&self, f: F) -> Option<&T>
    where
        F: FnMut(&T) -> Ordering,
    {
        let (idx, slot) = self.locate(f)?;
        Some(&self.arena.node(idx).elements[slot])
    }

    /// Remove and return an element matched by `f` (see [`get_by`](Self::get_by)).
    pub fn remove_by<F>(&mut self, f: F) -> Option<T>
    where
        F: FnMut(&T) -> Ordering,
    {
        let (idx, slot) = self.locate(f)?;
        let value = self.arena.node_mut(idx).elements.remove(slot);
        self.len -= 1;
        if self.arena.node(idx).elements.is_empty() {
            self.unlink_empty(idx);
        }
        Some(value)
    }

    /// Remove an element matched by `f` and drop it. Returns whether one was found.
    pub fn erase_by<F>(&mut self, f: F) -> bool
    where
        F: FnMut(&T) -> Ordering,
    {
        self.remove_by(f).is_some()
    }

    /// Drop every element. Nodes go to the free list and are reused later.
    pub fn clear(&mut self) {
        let mut stack: Vec<NodeIdx> = self.root.take().into_iter().collect();
        while let Some(idx) = stack.pop() {
            let node = self.arena.node(idx);
            stack.extend(node.left);
            stack.extend(node.right);
            self.arena.recycle(idx);
        }
        self.len = 0;
    }

    /// Release recycled nodes by rebuilding the arena from the live ones.
    ///
    /// Returns the number of nodes released.
    pub fn compact(&mut self) -> usize {
        let (root, released) = self.arena.compact(self.root);
        self.root = root;
        released
    }

    pub fn shrink_to_fit(&mut self) {
        self.compact();
        self.arena.shrink_to_fit();
    }

    // -------------------------------------------------------------------------
    // Search helpers
    // -------------------------------------------------------------------------

    fn locate<F>(&self, mut f: F) -> Option<(NodeIdx, usize)>
    where
        F: FnMut(&T) -> Ordering,
    {
        let mut cur = self.root;
        while let Some(idx) = cur {
            let node = self.arena.node(idx);
            if f(node.first()) == Ordering::Greater {
                cur = node.left;
            } else if f(node.last()) == Ordering::Less {
                cur = node.right;
            } else {
                return node
                    .elements
                    .binary_search_by(&mut f)
                    .ok()
                    .map(|slot| (idx, slot));
            }
        }
        None
    }

    fn leftmost(&self, mut idx: NodeIdx) -> NodeIdx {
        while let Some(left) = self.arena.node(idx).left {
            idx = left;
        }
        idx
    }

    fn rightmost(&self, mut idx: NodeIdx) -> NodeIdx {
        while let Some(right) = self.arena.node(idx).right {
            idx = right;
        }
        idx
    }

    // -------------------------------------------------------------------------
    // Heights, rotations and retracing
    // -------------------------------------------------------------------------

    #[inline]
    fn subtree_height(&self, idx: Option<NodeIdx>) -> u8 {
        idx.map_or(0, |i| self.arena.node(i).height())
    }

    fn refresh_heights(&mut self, idx: NodeIdx) {
        let node = self.arena.node(idx);
        let left_height = self.subtree_height(node.left);
        let right_height = self.subtree_height(node.right);
        let node = self.arena.node_mut(idx);
        node.left_height = left_height;
        node.right_height = right_height;
    }

    /// Point whichever link of `parent` referenced `old` (or the root) at `new`.
    fn replace_child(&mut self, parent: Option<NodeIdx>, old: NodeIdx, new: Option<NodeIdx>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                let node = self.arena.node_mut(p);
                if node.left == Some(old) {
                    node.left = new;
                } else {
                    debug_assert_eq!(node.right, Some(old));
                    node.right = new;
                }
            }
        }
        if let Some(n) = new {
            self.arena.node_mut(n).parent = parent;
        }
    }

    /// Rotate `idx` down toward `side`, lifting its opposite child. Returns the
    /// new subtree root (`idx` itself if there is no child to lift).
    fn rotate(&mut self, idx: NodeIdx, side: Side) -> NodeIdx {
        let lift_side = match side {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        };
        let Some(pivot) = self.arena.node(idx).child(lift_side) else {
            return idx;
        };
        let parent = self.arena.node(idx).parent;
        let inner = self.arena.node(pivot).child(side);

        self.arena.node_mut(idx).set_child(lift_side, inner);
        if let Some(inner) = inner {
            self.arena.node_mut(inner).parent = Some(idx);
        }
        self.arena.node_mut(pivot).set_child(side, Some(idx));
        self.replace_child(parent, idx, Some(pivot));
        self.arena.node_mut(idx).parent = Some(pivot);

        self.refresh_heights(idx);
        self.refresh_heights(pivot);
        trace_log!(node = idx, pivot, ?side, "rotated");
        pivot
    }

    /// Recompute the height fields of `idx` and restore its balance with a
    /// single or double rotation. Returns the subtree root afterwards.
    fn rebalance(&mut self, idx: NodeIdx) -> NodeIdx {
        self.refresh_heights(idx);
        let node = self.arena.node(idx);
        let (left, right) = (node.left, node.right);
        let (lh, rh) = (node.left_height, node.right_height);

        if lh > rh + 1 {
            if let Some(l) = left {
                let child = self.arena.node(l);
                if child.right_height > child.left_height {
                    self.rotate(l, Side::Left);
                }
            }
            self.rotate(idx, Side::Right)
        } else if rh > lh + 1 {
            if let Some(r) = right {
                let child = self.arena.node(r);
                if child.left_height > child.right_height {
                    self.rotate(r, Side::Right);
                }
            }
            self.rotate(idx, Side::Left)
        } else {
            idx
        }
    }

    /// Walk from `start` toward the root fixing heights and balance, stopping at
    /// the first subtree whose height did not change.
    fn retrace(&mut self, start: Option<NodeIdx>) {
        let mut cur = start;
        while let Some(idx) = cur {
            let before = self.arena.node(idx).height();
            let top = self.rebalance(idx);
            let top = self.arena.node(top);
            if top.height() == before {
                break;
            }
            cur = top.parent;
        }
    }

    // -------------------------------------------------------------------------
    // Unlinking emptied nodes
    // -------------------------------------------------------------------------

    fn unlink_empty(&mut self, idx: NodeIdx) {
        let node = self.arena.node(idx);
        debug_assert!(node.elements.is_empty());
        let parent = node.parent;
        match (node.left, node.right) {
            (Some(left), Some(right)) => self.splice_replacement(idx, left, right),
            (child, None) | (None, child) => {
                self.replace_child(parent, idx, child);
                self.arena.recycle(idx);
                self.retrace(parent);
            }
        }
    }

    /// Replace an emptied node that has two children with the nearest node of
    /// its taller subtree (successor on ties).
    fn splice_replacement(&mut self, idx: NodeIdx, left: NodeIdx, right: NodeIdx) {
        let node = self.arena.node(idx);
        let replacement = if node.left_height > node.right_height {
            self.rightmost(left)
        } else {
            self.leftmost(right)
        };

        // The replacement sits on the inner edge of its subtree: one child at most.
        let rep = self.arena.node(replacement);
        let rep_parent = rep.parent;
        let rep_child = rep.left.or(rep.right);
        self.replace_child(rep_parent, replacement, rep_child);

        // Re-read: detaching changes `idx`'s links when the replacement was its child.
        let node = self.arena.node(idx);
        let (parent, left, right) = (node.parent, node.left, node.right);
        let (left_height, right_height) = (node.left_height, node.right_height);
        let rep = self.arena.node_mut(replacement);
        rep.left = left;
        rep.right = right;
        rep.left_height = left_height;
        rep.right_height = right_height;
        for child in [left, right].into_iter().flatten() {
            self.arena.node_mut(child).parent = Some(replacement);
        }
        self.replace_child(parent, idx, Some(replacement));
        self.arena.recycle(idx);
        trace_log!(node = idx, replacement, "spliced replacement node");

        let start = if rep_parent == Some(idx) {
            Some(replacement)
        } else {
            rep_parent
        };
        self.retrace(start);
    }

    // -------------------------------------------------------------------------
    // Traversal
    // -------------------------------------------------------------------------

    /// In-order iterator over the elements.
    pub fn iter(&self) -> Iter<'_, T> {
        let mut iter = Iter {
            tree: self,
            stack: Vec::new(),
            run: Default::default(),
            remaining: self.len,
        };
        iter.push_left_spine(self.root);
        iter
    }

    /// Visit every element in ascending order.
    pub fn for_each_in_order<F: FnMut(&T)>(&self, visit: F) {
        self.iter().for_each(visit);
    }

    /// Visit each node's run before the runs of its left and right subtrees.
    pub fn for_each_pre_order<F: FnMut(&T)>(&self, mut visit: F) {
        let mut stack: Vec<NodeIdx> = self.root.into_iter().collect();
        while let Some(idx) = stack.pop() {
            let node = self.arena.node(idx);
            node.elements.iter().for_each(&mut visit);
            stack.extend(node.right);
            stack.extend(node.left);
        }
    }

    /// Visit each node's run after the runs of its left and right subtrees.
    pub fn for_each_post_order<F: FnMut(&T)>(&self, mut visit: F) {
        // The flag marks nodes whose children were already pushed.
        let mut stack: Vec<(NodeIdx, bool)> = self.root.map(|r| (r, false)).into_iter().collect();
        while let Some((idx, expanded)) = stack.pop() {
            let node = self.arena.node(idx);
            if expanded {
                node.elements.iter().for_each(&mut visit);
            } else {
                stack.push((idx, true));
                stack.extend(node.right.map(|r| (r, false)));
                stack.extend(node.left.map(|l| (l, false)));
            }
        }
    }

    /// Recursive form of [`for_each_in_order`](Self::for_each_in_order).
    ///
    /// Recursion depth is bounded by the tree height.
    pub fn for_each_in_order_recursive<F: FnMut(&T)>(&self, mut visit: F) {
        self.walk(self.root, Order::In, &mut visit);
    }

    /// Recursive form of [`for_each_pre_order`](Self::for_each_pre_order).
    pub fn for_each_pre_order_recursive<F: FnMut(&T)>(&self, mut visit: F) {
        self.walk(self.root, Order::Pre, &mut visit);
    }

    /// Recursive form of [`for_each_post_order`](Self::for_each_post_order).
    pub fn for_each_post_order_recursive<F: FnMut(&T)>(&self, mut visit: F) {
        self.walk(self.root, Order::Post, &mut visit);
    }

    fn walk<F: FnMut(&T)>(&self, idx: Option<NodeIdx>, order: Order, visit: &mut F) {
        let Some(idx) = idx else {
            return;
        };
        let node = self.arena.node(idx);
        if order == Order::Pre {
            node.elements.iter().for_each(&mut *visit);
        }
        self.walk(node.left, order, visit);
        if order == Order::In {
            node.elements.iter().for_each(&mut *visit);
        }
        self.walk(node.right, order, visit);
        if order == Order::Post {
            node.elements.iter().for_each(&mut *visit);
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Order {
    Pre,
    In,
    Post,
}

impl<T: Ord> UnrolledAvlTree<T> {
    /// Insert `value` and return a reference to where it was stored.
    ///
    /// Fails only if a new node is needed and cannot be allocated; in that
    /// case the tree is unchanged and `value` is dropped.
    pub fn insert(&mut self, value: T) -> Result<&T> {
        // Reserve the (at most one) node this insertion can create before
        // mutating anything.
        self.arena.reserve_spare()?;
        let (idx, slot) = self.insert_reserved(value)?;
        self.len += 1;
        Ok(&self.arena.node(idx).elements[slot])
    }

    fn insert_reserved(&mut self, mut value: T) -> Result<(NodeIdx, usize)> {
        let Some(mut cur) = self.root else {
            let root = self.arena.acquire(None)?;
            self.arena.node_mut(root).elements.push(value);
            self.root = Some(root);
            return Ok((root, 0));
        };

        // Where the caller's value landed, once an eviction has placed it.
        let mut placed: Option<(NodeIdx, usize)> = None;
        loop {
            let node = self.arena.node(cur);
            let below = value < *node.first();
            let above = value > *node.last();
            if below {
                if let Some(left) = node.left {
                    cur = left;
                    continue;
                }
            }
            if above {
                if let Some(right) = node.right {
                    cur = right;
                    continue;
                }
            }

            if !node.is_full() {
                let slot = self.arena.node_mut(cur).insert_sorted(value);
                return Ok(placed.unwrap_or((cur, slot)));
            }

            if below || above {
                let side = if below { Side::Left } else { Side::Right };
                let child = self.attach_child(cur, side, value)?;
                return Ok(placed.unwrap_or((child, 0)));
            }

            // Full node whose range covers the value (including a run of one
            // duplicate equal to it): keep the value here and push the largest
            // element into the right subtree.
            let (slot, evicted) = self.arena.node_mut(cur).insert_evicting(value);
            if placed.is_none() {
                placed = Some((cur, slot));
            }
            value = evicted;
            match self.arena.node(cur).right {
                Some(right) => cur = right,
                None => {
                    let child = self.attach_child(cur, Side::Right, value)?;
                    return Ok(placed.unwrap_or((child, 0)));
                }
            }
        }
    }

    fn attach_child(&mut self, parent: NodeIdx, side: Side, value: T) -> Result<NodeIdx> {
        let child = self.arena.acquire(Some(parent))?;
        self.arena.node_mut(child).elements.push(value);
        self.arena.node_mut(parent).set_child(side, Some(child));
        self.retrace(Some(parent));
        Ok(child)
    }

    /// An element equal to `value`, if any.
    pub fn get(&self, value: &T) -> Option<&T> {
        self.get_by(|e| e.cmp(value))
    }

    /// True if some element equals `value`.
    pub fn contains(&self, value: &T) -> bool {
        self.get(value).is_some()
    }

    /// Remove one element equal to `value` and return it.
    pub fn remove(&mut self, value: &T) -> Option<T> {
        self.remove_by(|e| e.cmp(value))
    }

    /// Remove one element equal to `value` and drop it in place.
    pub fn erase(&mut self, value: &T) -> bool {
        self.erase_by(|e| e.cmp(value))
    }
}

impl<T> Default for UnrolledAvlTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for UnrolledAvlTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<'a, T> IntoIterator for &'a UnrolledAvlTree<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// In-order iterator returned by [`UnrolledAvlTree::iter`].
pub struct Iter<'a, T> {
    tree: &'a UnrolledAvlTree<T>,
    /// Nodes whose left subtree is being (or has been) walked.
    stack: Vec<NodeIdx>,
    run: std::slice::Iter<'a, T>,
    remaining: usize,
}

impl<'a, T> Iter<'a, T> {
    fn push_left_spine(&mut self, mut cur: Option<NodeIdx>) {
        while let Some(idx) = cur {
            self.stack.push(idx);
            cur = self.tree.arena.node(idx).left;
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(value) = self.run.next() {
                self.remaining -= 1;
                return Some(value);
            }
            let idx = self.stack.pop()?;
            let tree = self.tree;
            let node = tree.arena.node(idx);
            self.run = node.elements.iter();
            self.push_left_spine(node.right);
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<T> std::iter::FusedIterator for Iter<'_, T> {}


#[cfg(test)]
mod proptests;
