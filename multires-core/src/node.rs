//! Node and Tri entities, the elements the Forest is built from

use serde::{Deserialize, Serialize};

use crate::geometry::{Point3f, Vector3f};

/// Index of a node in a forest's node array. Index 0 is the reserved nil.
pub type NodeIndex = u32;

/// Index of a triangle in a forest's tri array. Index 0 is the reserved nil.
pub type TriIndex = u32;

/// The reserved nil index for both nodes and triangles
pub const NIL: u32 = 0;

/// One vertex of the multiresolution merge tree.
///
/// Nodes never move in the array after the depth-first reordering at build
/// time; indices are stable for the forest's lifetime. Every node except
/// the root satisfies `index > parent`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub parent: NodeIndex,
    pub left_sibling: NodeIndex,
    pub right_sibling: NodeIndex,
    /// Head of the doubly-linked child list, nil-terminated
    pub first_child: NodeIndex,
    /// Head of the list of triangles first resolved by this node's unfold
    pub first_subtri: TriIndex,
    /// Next node in the cycle of nodes sharing this node's position
    /// (patch seams); nil when the node is alone at its position
    pub coincident: NodeIndex,
    pub patch: u16,
    /// Bounding-box center of everything merged into this node
    pub center: Point3f,
    /// Bounding-box half-extents; zero for leaves
    pub half_extents: Vector3f,
    /// Slot in the forest's shared [`crate::GeometryStore`]
    pub attribute: u32,
    /// 1-based error-parameter record, 0 when the node has none
    pub error_param: u32,
}

impl Node {
    /// The sentinel stored at index 0
    pub fn nil() -> Self {
        Self {
            parent: NIL,
            left_sibling: NIL,
            right_sibling: NIL,
            first_child: NIL,
            first_subtri: NIL,
            coincident: NIL,
            patch: 0,
            center: Point3f::origin(),
            half_extents: Vector3f::zeros(),
            attribute: 0,
            error_param: 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.first_child == NIL
    }
}

/// One fixed triangle of the original mesh.
///
/// Corners are node indices of leaves and never change; only their proxies
/// (tracked per cut) move as the resolution front moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tri {
    pub corners: [NodeIndex; 3],
    pub patch: u16,
    /// Next triangle in the owning node's subtriangle list
    pub next_subtri: TriIndex,
}

impl Tri {
    /// The sentinel stored at index 0
    pub fn nil() -> Self {
        Self {
            corners: [NIL; 3],
            patch: 0,
            next_subtri: NIL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_node_is_leaf() {
        assert!(Node::nil().is_leaf());
        assert_eq!(Node::nil().parent, NIL);
    }

    #[test]
    fn test_nil_tri() {
        let t = Tri::nil();
        assert_eq!(t.corners, [NIL, NIL, NIL]);
        assert_eq!(t.next_subtri, NIL);
    }
}
