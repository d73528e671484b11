//! # Volatile Index Nodes
//!
//! The in-memory half of the hybrid tree: leaf nodes shadowing persistent
//! leaves, inner nodes routing descents. Nodes live in an indexed arena and
//! refer to each other (including the parent back-link) by [`NodeId`], so
//! the parent↔child cycle never needs shared ownership or raw pointers.
//!
//! ## Leaf Nodes
//!
//! A leaf node caches, per slot, the one-byte Pearson hash and the full key
//! of the corresponding persistent slot. Lookups filter on the hash array
//! first and only compare keys on a hash hit; neither array is consulted
//! for durability — both are rebuilt from the persistent leaf on open.
//!
//! ## Inner Nodes
//!
//! An inner node holds up to [`INNER_KEYS`] separator keys and one more
//! child than keys. The backing `SmallVec`s reserve one extra slot so a
//! split may insert first and divide afterwards, mirroring the overflow-
//! then-split protocol of the update path. Routing invariant: every key
//! reachable through `children[i]` compares `<=` `keys[i]`; the last child
//! holds everything greater.
//!
//! The whole arena is dropped on shutdown; persistent state is untouched.

use smallvec::SmallVec;

use super::leaf::LEAF_SLOTS;
use crate::pool::PAddr;

/// Maximum separator keys per inner node.
pub const INNER_KEYS: usize = 4;

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub struct LeafNode {
    /// Persistent leaf shadowed by this node.
    pub leaf: PAddr,
    pub hashes: [u8; LEAF_SLOTS],
    pub keys: [Option<Box<[u8]>>; LEAF_SLOTS],
    pub parent: Option<NodeId>,
}

impl LeafNode {
    pub fn new(leaf: PAddr) -> Self {
        Self {
            leaf,
            hashes: [0; LEAF_SLOTS],
            keys: std::array::from_fn(|_| None),
            parent: None,
        }
    }

    /// Occupied slot indices in no particular order.
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        (0..LEAF_SLOTS).filter(|&slot| self.hashes[slot] != 0)
    }
}

#[derive(Debug)]
pub struct InnerNode {
    pub keys: SmallVec<[Box<[u8]>; INNER_KEYS + 1]>,
    pub children: SmallVec<[NodeId; INNER_KEYS + 2]>,
    pub parent: Option<NodeId>,
}

impl InnerNode {
    pub fn keycount(&self) -> usize {
        self.keys.len()
    }
}

#[derive(Debug)]
pub enum Node {
    Leaf(LeafNode),
    Inner(InnerNode),
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        match self {
            Node::Leaf(leaf) => leaf.parent,
            Node::Inner(inner) => inner.parent,
        }
    }

    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        match self {
            Node::Leaf(leaf) => leaf.parent = parent,
            Node::Inner(inner) => inner.parent = parent,
        }
    }
}

/// Owning arena for volatile nodes.
///
/// Nodes are never reclaimed individually; emptied leaves stay in the tree
/// the way their persistent counterparts stay in the chain, and the whole
/// arena is dropped at shutdown.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn leaf(&self, id: NodeId) -> eyre::Result<&LeafNode> {
        match self.get(id) {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Inner(_) => eyre::bail!("inner node where leaf expected"),
        }
    }

    pub fn leaf_mut(&mut self, id: NodeId) -> eyre::Result<&mut LeafNode> {
        match self.get_mut(id) {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Inner(_) => eyre::bail!("inner node where leaf expected"),
        }
    }

    pub fn inner(&self, id: NodeId) -> eyre::Result<&InnerNode> {
        match self.get(id) {
            Node::Inner(inner) => Ok(inner),
            Node::Leaf(_) => eyre::bail!("leaf node where inner expected"),
        }
    }

    pub fn inner_mut(&mut self, id: NodeId) -> eyre::Result<&mut InnerNode> {
        match self.get_mut(id) {
            Node::Inner(inner) => Ok(inner),
            Node::Leaf(_) => eyre::bail!("leaf node where inner expected"),
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn arena_hands_out_sequential_ids() {
        let mut arena = NodeArena::new();
        let a = arena.insert(Node::Leaf(LeafNode::new(PAddr::NULL)));
        let b = arena.insert(Node::Leaf(LeafNode::new(PAddr::NULL)));
        assert_ne!(a, b);
        assert!(arena.leaf(a).is_ok());
    }

    #[test]
    fn kind_accessors_reject_mismatched_nodes() {
        let mut arena = NodeArena::new();
        let leaf = arena.insert(Node::Leaf(LeafNode::new(PAddr::NULL)));
        let inner = arena.insert(Node::Inner(InnerNode {
            keys: smallvec![],
            children: smallvec![leaf],
            parent: None,
        }));

        assert!(arena.inner(leaf).is_err());
        assert!(arena.leaf(inner).is_err());
        assert!(arena.inner(inner).is_ok());
    }

    #[test]
    fn parent_links_are_uniform_across_kinds() {
        let mut arena = NodeArena::new();
        let child = arena.insert(Node::Leaf(LeafNode::new(PAddr::NULL)));
        let parent = arena.insert(Node::Inner(InnerNode {
            keys: smallvec![],
            children: smallvec![child],
            parent: None,
        }));

        arena.get_mut(child).set_parent(Some(parent));
        assert_eq!(arena.get(child).parent(), Some(parent));
        assert_eq!(arena.get(parent).parent(), None);
    }

    #[test]
    fn occupied_reflects_hash_array() {
        let mut leaf = LeafNode::new(PAddr::NULL);
        leaf.hashes[3] = 7;
        leaf.hashes[47] = 9;
        let occupied: Vec<usize> = leaf.occupied().collect();
        assert_eq!(occupied, vec![3, 47]);
    }
}
