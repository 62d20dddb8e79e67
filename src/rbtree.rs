//! Capacity bounded red-black tree of custody id ranges.
//!
//! Every node covers a closed range `[value, value + offset]` of custody ids.
//! Inserting a value adjacent to an existing range grows that range instead
//! of allocating a node, and a range that grows into its neighbour swallows
//! it. The tree therefore holds one node per run of consecutive ids, which
//! is exactly one fill of an aggregate custody signal.
//!
//! All nodes live in an arena allocated once in [`RangeTree::new`]; links
//! are arena indices and unused nodes sit on a free list. The tree never
//! grows past `max_size` nodes, an insert that needs a node when none is
//! free reports [`Error::Full`].

use log::{trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::fmt;

use crate::error::Error;

/// Largest tree that can be requested. The whole arena is allocated up
/// front, and a single aggregate custody signal never carries this many
/// fills.
pub const MAX_TREE_SIZE: u32 = 1 << 20;

/// Closed range of custody ids `[value, value + offset]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CidRange {
    pub value: u32,
    pub offset: u32,
}

impl CidRange {
    pub fn new(value: u32, offset: u32) -> CidRange {
        CidRange { value, offset }
    }
    pub fn single(value: u32) -> CidRange {
        CidRange { value, offset: 0 }
    }
    /// Last id covered by the range.
    pub fn upper(&self) -> u32 {
        self.value + self.offset
    }
    /// Number of ids covered by the range.
    pub fn span(&self) -> u64 {
        u64::from(self.offset) + 1
    }
    pub fn contains(&self, value: u32) -> bool {
        value >= self.value && value <= self.upper()
    }
}

impl fmt::Display for CidRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}]", self.value, self.upper())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone)]
struct RbNode {
    range: CidRange,
    color: Color,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    /// Set once the stateful iterator has yielded this node.
    traversal_state: bool,
}

impl RbNode {
    fn vacant() -> RbNode {
        RbNode {
            range: CidRange::default(),
            color: Color::Black,
            parent: None,
            left: None,
            right: None,
            traversal_state: false,
        }
    }
}

/// Red-black tree of non-overlapping, non-adjacent custody id ranges.
#[derive(Debug, Clone)]
pub struct RangeTree {
    nodes: Vec<RbNode>,
    free_list: Vec<NodeId>,
    root: Option<NodeId>,
    size: u32,
    max_size: u32,
    iterator: Option<NodeId>,
}

impl RangeTree {
    /// Create a tree able to hold `max_size` ranges.
    ///
    /// Every node is allocated here; nothing is allocated afterwards.
    pub fn new(max_size: u32) -> Result<RangeTree, Error> {
        if max_size == 0 || max_size > MAX_TREE_SIZE {
            return Err(Error::ParamError(format!(
                "range tree size {} outside of 1..={}",
                max_size, MAX_TREE_SIZE
            )));
        }
        let len = max_size as usize;
        let no_memory = |e: TryReserveError| {
            Error::ParamError(format!("range tree of {} nodes: {}", max_size, e))
        };
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(len).map_err(no_memory)?;
        nodes.resize(len, RbNode::vacant());
        let mut free_list = Vec::new();
        free_list.try_reserve_exact(len).map_err(no_memory)?;
        free_list.extend((0..max_size).rev().map(NodeId));
        Ok(RangeTree {
            nodes,
            free_list,
            root: None,
            size: 0,
            max_size,
            iterator: None,
        })
    }

    /// Number of ranges currently stored.
    pub fn size(&self) -> u32 {
        self.size
    }
    pub fn max_size(&self) -> u32 {
        self.max_size
    }
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
    pub fn is_full(&self) -> bool {
        self.size == self.max_size
    }

    /// Return every node to the free list.
    pub fn clear(&mut self) {
        self.root = None;
        self.size = 0;
        self.iterator = None;
        self.free_list.clear();
        self.free_list.extend((0..self.max_size).rev().map(NodeId));
    }

    /// True if `value` is covered by a stored range.
    pub fn contains(&self, value: u32) -> bool {
        self.find(value).is_some()
    }

    /// Record `value`.
    ///
    /// A value next to an existing range extends it, merging with the
    /// neighbouring range when the two become adjacent. A value already
    /// covered yields [`Error::Duplicate`] and a value needing a new node
    /// when none is free yields [`Error::Full`]; neither modifies the tree.
    pub fn insert(&mut self, value: u32) -> Result<(), Error> {
        self.iterator = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            let range = self.node(id).range;
            if range.contains(value) {
                return Err(Error::Duplicate);
            }
            if range.upper().checked_add(1) == Some(value) {
                self.extend_upper(id);
                return Ok(());
            }
            if value.checked_add(1) == Some(range.value) {
                self.extend_lower(id);
                return Ok(());
            }
            cur = if value < range.value {
                self.left(id)
            } else {
                self.right(id)
            };
        }
        self.insert_range(CidRange::single(value))
    }

    /// Remove `value`.
    ///
    /// Removing a value from the inside of a range splits it. The upper half
    /// needs a fresh node; when none is free the lower half has already been
    /// shrunk and [`Error::Full`] is returned, leaving the ids above `value`
    /// unrepresented.
    pub fn delete(&mut self, value: u32) -> Result<(), Error> {
        self.iterator = None;
        let id = self.find(value).ok_or(Error::NotFound)?;
        let range = self.node(id).range;
        if range.offset == 0 {
            self.delete_node(id);
        } else if value == range.value {
            let node = self.node_mut(id);
            node.range.value += 1;
            node.range.offset -= 1;
        } else if value == range.upper() {
            self.node_mut(id).range.offset -= 1;
        } else {
            let upper = CidRange::new(value + 1, range.upper() - (value + 1));
            self.node_mut(id).range.offset = value - 1 - range.value;
            trace!("split {} around {}", range, value);
            if let Err(e) = self.insert_range(upper) {
                warn!("no node left for {} after splitting {}", upper, range);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Position the iterator on the smallest range.
    pub fn iterate_first(&mut self) {
        let first = self.root.map(|r| self.leftmost(r));
        let mut cur = first;
        while let Some(id) = cur {
            self.node_mut(id).traversal_state = false;
            cur = self.successor(id);
        }
        self.iterator = first;
    }

    /// Yield the range under the iterator and advance it.
    ///
    /// With `should_pop` the yielded range is removed from the tree. With
    /// `should_rebalance` as well, removal keeps the tree balanced and the
    /// iterator restarts from the new smallest range. Without it the node is
    /// unlinked as in a plain binary search tree; the tree stays ordered but
    /// not balanced, so this mode is only for draining the whole tree.
    pub fn iterate_next(&mut self, should_pop: bool, should_rebalance: bool) -> Option<CidRange> {
        let cur = self.iterator?;
        let range = self.node(cur).range;
        self.node_mut(cur).traversal_state = true;

        if !should_pop {
            self.iterator = self.next_unvisited(cur);
        } else if should_rebalance {
            // every node left of the restart point was popped, so no
            // remaining node is marked
            self.delete_node(cur);
            self.iterator = self.root.map(|r| self.leftmost(r));
        } else if let (Some(_), Some(r)) = (self.left(cur), self.right(cur)) {
            // successor takes over this slot and becomes the next range
            let succ = self.leftmost(r);
            let succ_range = self.node(succ).range;
            let node = self.node_mut(cur);
            node.range = succ_range;
            node.traversal_state = false;
            self.splice_out(succ);
            self.iterator = Some(cur);
        } else {
            self.iterator = self.next_unvisited(cur);
            self.splice_out(cur);
        }
        Some(range)
    }

    /// Snapshot of all ranges in ascending order.
    pub fn ranges(&self) -> Vec<CidRange> {
        let mut out = Vec::with_capacity(self.size as usize);
        let mut stack = Vec::new();
        let mut cur = self.root;
        while cur.is_some() || !stack.is_empty() {
            while let Some(id) = cur {
                stack.push(id);
                cur = self.left(id);
            }
            if let Some(id) = stack.pop() {
                out.push(self.node(id).range);
                cur = self.right(id);
            }
        }
        out
    }

    /// Check the red-black, ordering and bookkeeping invariants.
    pub fn validate(&self) -> Result<(), Error> {
        let fail = |msg: String| Err(Error::FailedResponse(msg));

        if let Some(root) = self.root {
            if self.node(root).color != Color::Black {
                return fail("root is red".into());
            }
            if self.parent(root).is_some() {
                return fail("root has a parent".into());
            }
        }
        let mut count = 0;
        self.black_height(self.root, None, &mut count)?;
        if count != self.size {
            return fail(format!("{} reachable nodes, size is {}", count, self.size));
        }
        if self.free_list.len() + self.size as usize != self.max_size as usize {
            return fail("free list does not account for every node".into());
        }
        let ranges = self.ranges();
        for pair in ranges.windows(2) {
            if u64::from(pair[0].upper()) + 1 >= u64::from(pair[1].value) {
                return fail(format!("{} and {} overlap or touch", pair[0], pair[1]));
            }
        }
        Ok(())
    }

    fn black_height(
        &self,
        id: Option<NodeId>,
        parent: Option<NodeId>,
        count: &mut u32,
    ) -> Result<u32, Error> {
        let id = match id {
            Some(id) => id,
            None => return Ok(1),
        };
        *count += 1;
        let node = self.node(id);
        if node.parent != parent {
            return Err(Error::FailedResponse(format!(
                "broken parent link at {}",
                node.range
            )));
        }
        if node.color == Color::Red && (self.is_red(node.left) || self.is_red(node.right)) {
            return Err(Error::FailedResponse(format!(
                "red node {} has a red child",
                node.range
            )));
        }
        let left = self.black_height(node.left, Some(id), count)?;
        let right = self.black_height(node.right, Some(id), count)?;
        if left != right {
            return Err(Error::FailedResponse(format!(
                "black height differs below {}",
                node.range
            )));
        }
        Ok(left + u32::from(node.color == Color::Black))
    }

    /******************************
     *
     * Node helpers
     *
     ******************************/

    fn node(&self, id: NodeId) -> &RbNode {
        &self.nodes[id.index()]
    }
    fn node_mut(&mut self, id: NodeId) -> &mut RbNode {
        &mut self.nodes[id.index()]
    }
    fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }
    fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }
    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }
    fn is_red(&self, id: Option<NodeId>) -> bool {
        id.is_some_and(|id| self.node(id).color == Color::Red)
    }
    fn set_color(&mut self, id: Option<NodeId>, color: Color) {
        if let Some(id) = id {
            self.node_mut(id).color = color;
        }
    }

    fn leftmost(&self, mut id: NodeId) -> NodeId {
        while let Some(l) = self.left(id) {
            id = l;
        }
        id
    }
    fn rightmost(&self, mut id: NodeId) -> NodeId {
        while let Some(r) = self.right(id) {
            id = r;
        }
        id
    }

    fn successor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(r) = self.right(id) {
            return Some(self.leftmost(r));
        }
        let mut child = id;
        let mut parent = self.parent(id);
        while let Some(p) = parent {
            if self.left(p) == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.parent(p);
        }
        None
    }

    fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(l) = self.left(id) {
            return Some(self.rightmost(l));
        }
        let mut child = id;
        let mut parent = self.parent(id);
        while let Some(p) = parent {
            if self.right(p) == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.parent(p);
        }
        None
    }

    /// In-order successor for the iterator: ancestors still unvisited are
    /// exactly the ones whose left subtree holds `id`.
    fn next_unvisited(&self, id: NodeId) -> Option<NodeId> {
        if let Some(r) = self.right(id) {
            return Some(self.leftmost(r));
        }
        let mut parent = self.parent(id);
        while let Some(p) = parent {
            if !self.node(p).traversal_state {
                return Some(p);
            }
            parent = self.parent(p);
        }
        None
    }

    fn find(&self, value: u32) -> Option<NodeId> {
        let mut cur = self.root;
        while let Some(id) = cur {
            let range = self.node(id).range;
            if value < range.value {
                cur = self.left(id);
            } else if value > range.upper() {
                cur = self.right(id);
            } else {
                return Some(id);
            }
        }
        None
    }

    fn alloc(&mut self, range: CidRange) -> Option<NodeId> {
        let id = self.free_list.pop()?;
        *self.node_mut(id) = RbNode {
            range,
            color: Color::Red,
            ..RbNode::vacant()
        };
        self.size += 1;
        Some(id)
    }

    fn release(&mut self, id: NodeId) {
        *self.node_mut(id) = RbNode::vacant();
        self.free_list.push(id);
        self.size -= 1;
    }

    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                if self.left(p) == Some(old) {
                    self.node_mut(p).left = new;
                } else {
                    self.node_mut(p).right = new;
                }
            }
        }
    }

    /// Unlink a node with at most one child, without rebalancing.
    fn splice_out(&mut self, id: NodeId) {
        let child = self.left(id).or(self.right(id));
        let parent = self.parent(id);
        self.replace_child(parent, id, child);
        if let Some(c) = child {
            self.node_mut(c).parent = parent;
        }
        self.release(id);
    }

    /******************************
     *
     * Merging
     *
     ******************************/

    fn extend_upper(&mut self, id: NodeId) {
        self.node_mut(id).range.offset += 1;
        let upper = self.node(id).range.upper();
        if let Some(succ) = self.successor(id) {
            let next = self.node(succ).range;
            if upper.checked_add(1) == Some(next.value) {
                trace!("merge {} into {}", next, self.node(id).range);
                // the higher node goes, deleting it never moves the lower range
                self.delete_node(succ);
                let base = self.node(id).range.value;
                self.node_mut(id).range.offset = next.upper() - base;
            }
        }
    }

    fn extend_lower(&mut self, id: NodeId) {
        {
            let node = self.node_mut(id);
            node.range.value -= 1;
            node.range.offset += 1;
        }
        let range = self.node(id).range;
        if let Some(pred) = self.predecessor(id) {
            let prev = self.node(pred).range;
            if prev.upper().checked_add(1) == Some(range.value) {
                trace!("merge {} into {}", range, prev);
                self.delete_node(id);
                self.node_mut(pred).range.offset = range.upper() - prev.value;
            }
        }
    }

    /******************************
     *
     * Red-black insertion
     *
     ******************************/

    fn insert_range(&mut self, range: CidRange) -> Result<(), Error> {
        let mut parent = None;
        let mut go_left = false;
        let mut cur = self.root;
        while let Some(id) = cur {
            parent = Some(id);
            go_left = range.value < self.node(id).range.value;
            cur = if go_left { self.left(id) } else { self.right(id) };
        }
        let id = self.alloc(range).ok_or(Error::Full)?;
        self.node_mut(id).parent = parent;
        match parent {
            None => self.root = Some(id),
            Some(p) if go_left => self.node_mut(p).left = Some(id),
            Some(p) => self.node_mut(p).right = Some(id),
        }
        self.insert_fixup(id);
        Ok(())
    }

    fn rotate_left(&mut self, x: NodeId) {
        let y = match self.right(x) {
            Some(y) => y,
            None => return,
        };
        let beta = self.left(y);
        self.node_mut(x).right = beta;
        if let Some(b) = beta {
            self.node_mut(b).parent = Some(x);
        }
        let parent = self.parent(x);
        self.node_mut(y).parent = parent;
        self.replace_child(parent, x, Some(y));
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    fn rotate_right(&mut self, x: NodeId) {
        let y = match self.left(x) {
            Some(y) => y,
            None => return,
        };
        let beta = self.right(y);
        self.node_mut(x).left = beta;
        if let Some(b) = beta {
            self.node_mut(b).parent = Some(x);
        }
        let parent = self.parent(x);
        self.node_mut(y).parent = parent;
        self.replace_child(parent, x, Some(y));
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    fn insert_fixup(&mut self, mut z: NodeId) {
        while let Some(mut p) = self.parent(z) {
            if !self.is_red(Some(p)) {
                break;
            }
            let g = match self.parent(p) {
                Some(g) => g,
                None => break,
            };
            if self.left(g) == Some(p) {
                let uncle = self.right(g);
                if self.is_red(uncle) {
                    self.set_color(Some(p), Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(Some(g), Color::Red);
                    z = g;
                    continue;
                }
                if self.right(p) == Some(z) {
                    self.rotate_left(p);
                    std::mem::swap(&mut z, &mut p);
                }
                self.set_color(Some(p), Color::Black);
                self.set_color(Some(g), Color::Red);
                self.rotate_right(g);
            } else {
                let uncle = self.left(g);
                if self.is_red(uncle) {
                    self.set_color(Some(p), Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(Some(g), Color::Red);
                    z = g;
                    continue;
                }
                if self.left(p) == Some(z) {
                    self.rotate_right(p);
                    std::mem::swap(&mut z, &mut p);
                }
                self.set_color(Some(p), Color::Black);
                self.set_color(Some(g), Color::Red);
                self.rotate_left(g);
            }
        }
        self.set_color(self.root, Color::Black);
    }

    /******************************
     *
     * Red-black deletion
     *
     ******************************/

    /// Remove the range held by `id`, rebalancing.
    ///
    /// A node with two children takes over its successor's range and the
    /// successor's node is removed instead, so only ranges greater than the
    /// one removed can change slot.
    fn delete_node(&mut self, id: NodeId) {
        let target = match (self.left(id), self.right(id)) {
            (Some(_), Some(r)) => {
                let succ = self.leftmost(r);
                let (range, visited) = {
                    let node = self.node(succ);
                    (node.range, node.traversal_state)
                };
                let node = self.node_mut(id);
                node.range = range;
                node.traversal_state = visited;
                succ
            }
            _ => id,
        };

        let child = self.left(target).or(self.right(target));
        if !self.is_red(Some(target)) {
            if self.is_red(child) {
                self.set_color(child, Color::Black);
            } else {
                // black leaf: rebalance while it still stands in the tree
                self.delete_fixup(target);
            }
        }
        self.splice_out(target);
    }

    fn delete_fixup(&mut self, mut x: NodeId) {
        while Some(x) != self.root && !self.is_red(Some(x)) {
            let p = match self.parent(x) {
                Some(p) => p,
                None => break,
            };
            if self.left(p) == Some(x) {
                let mut w = match self.right(p) {
                    Some(w) => w,
                    None => break,
                };
                if self.is_red(Some(w)) {
                    self.set_color(Some(w), Color::Black);
                    self.set_color(Some(p), Color::Red);
                    self.rotate_left(p);
                    w = match self.right(p) {
                        Some(w) => w,
                        None => break,
                    };
                }
                if !self.is_red(self.left(w)) && !self.is_red(self.right(w)) {
                    self.set_color(Some(w), Color::Red);
                    x = p;
                } else {
                    if !self.is_red(self.right(w)) {
                        self.set_color(self.left(w), Color::Black);
                        self.set_color(Some(w), Color::Red);
                        self.rotate_right(w);
                        w = match self.right(p) {
                            Some(w) => w,
                            None => break,
                        };
                    }
                    let color = self.node(p).color;
                    self.set_color(Some(w), color);
                    self.set_color(Some(p), Color::Black);
                    self.set_color(self.right(w), Color::Black);
                    self.rotate_left(p);
                    break;
                }
            } else {
                let mut w = match self.left(p) {
                    Some(w) => w,
                    None => break,
                };
                if self.is_red(Some(w)) {
                    self.set_color(Some(w), Color::Black);
                    self.set_color(Some(p), Color::Red);
                    self.rotate_right(p);
                    w = match self.left(p) {
                        Some(w) => w,
                        None => break,
                    };
                }
                if !self.is_red(self.left(w)) && !self.is_red(self.right(w)) {
                    self.set_color(Some(w), Color::Red);
                    x = p;
                } else {
                    if !self.is_red(self.left(w)) {
                        self.set_color(self.right(w), Color::Black);
                        self.set_color(Some(w), Color::Red);
                        self.rotate_left(w);
                        w = match self.left(p) {
                            Some(w) => w,
                            None => break,
                        };
                    }
                    let color = self.node(p).color;
                    self.set_color(Some(w), color);
                    self.set_color(Some(p), Color::Black);
                    self.set_color(self.left(w), Color::Black);
                    self.rotate_right(p);
                    break;
                }
            }
        }
        self.set_color(Some(x), Color::Black);
        self.set_color(self.root, Color::Black);
    }
}
