//! Arena storage for quadtree nodes

use super::event::NodeCoord;

/// Index of a node inside a [`NodeArena`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub coord: NodeCoord,
    /// Non-owning back reference, `None` for the root
    pub parent: Option<NodeId>,
    /// `None` while the node is a leaf
    pub children: Option<[NodeId; 4]>,
}

impl Node {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Flat node storage with a free list; slot 0 is always the root
#[derive(Clone, Debug)]
pub struct NodeArena {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                coord: NodeCoord::ROOT,
                parent: None,
                children: None,
            }],
            free: Vec::new(),
        }
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Allocate the four children of `parent`, reusing freed slots first
    pub fn split(&mut self, parent: NodeId) -> [NodeId; 4] {
        let coord = self.get(parent).coord;
        let children = std::array::from_fn(|q| {
            self.alloc(Node {
                coord: coord.child(q),
                parent: Some(parent),
                children: None,
            })
        });
        self.get_mut(parent).children = Some(children);
        children
    }

    /// Return a leaf to the free list
    pub fn release(&mut self, id: NodeId) {
        debug_assert!(id != NodeId::ROOT, "root node is never freed");
        debug_assert!(self.get(id).is_leaf());
        let node = self.get_mut(id);
        node.parent = None;
        self.free.push(id);
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.index()] = node;
            id
        } else {
            self.nodes.push(node);
            NodeId((self.nodes.len() - 1) as u32)
        }
    }

    /// Live nodes (allocated minus freed)
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots ever allocated, including freed ones
    pub fn allocated(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_links_parent_and_children() {
        let mut arena = NodeArena::new();
        let children = arena.split(NodeId::ROOT);

        assert_eq!(arena.len(), 5);
        assert!(!arena.get(NodeId::ROOT).is_leaf());
        for (q, id) in children.iter().enumerate() {
            let child = arena.get(*id);
            assert_eq!(child.parent, Some(NodeId::ROOT));
            assert_eq!(child.coord, NodeCoord::ROOT.child(q));
        }
    }

    #[test]
    fn test_released_slots_are_reused() {
        let mut arena = NodeArena::new();
        let children = arena.split(NodeId::ROOT);
        arena.get_mut(NodeId::ROOT).children = None;
        for id in children {
            arena.release(id);
        }
        assert_eq!(arena.len(), 1);

        arena.split(NodeId::ROOT);
        assert_eq!(arena.len(), 5);
        assert_eq!(arena.allocated(), 5);
    }
}
