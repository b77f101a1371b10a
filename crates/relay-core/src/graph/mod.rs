//! Traversal algebra over parent/child node graphs.
//!
//! Any type exposing a parent link and an ordered child list can be walked
//! with the functions in [`traversal`]. Contexts use the same walks to scope
//! dispatch to an [`Axis`].
//!
//! Visitors return `true` to stop the walk early. Every walk keeps a visited
//! set and fails with [`DispatchError::Circularity`](crate::DispatchError)
//! if a node shows up twice.

pub mod traversal;

use std::fmt::Debug;
use std::hash::Hash;

pub use traversal::{level_order, post_order, pre_order, reverse_level_order, traverse};

/// A node with a parent and ordered children.
pub trait Traversing: Clone {
    /// Identity used by the cycle guard.
    type Id: Eq + Hash + Debug;

    /// This node's identity.
    fn node_id(&self) -> Self::Id;

    /// The parent node, if any.
    fn parent(&self) -> Option<Self>;

    /// The children, in order.
    fn children(&self) -> Vec<Self>;
}

/// A direction relative to a node.
///
/// ```text
///                 root              Root            -> root
///                  │                Ancestor        -> parent, grandparent, ...
///         ┌────────┼────────┐       Sibling         -> other children of parent
///       left     [self]   right     Child           -> direct children
///                  │                Descendant      -> subtree, level order
///               ┌──┴──┐             DescendantReverse -> subtree, reverse level order
///              c1     c2
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// The node only.
    Itself,
    /// The root of the node's tree.
    Root,
    /// Direct children.
    Child,
    /// The parent's other children.
    Sibling,
    /// Parent links up to the root.
    Ancestor,
    /// The subtree below the node, level order.
    Descendant,
    /// The subtree below the node, reverse level order.
    DescendantReverse,
    /// The node, then its children.
    SelfOrChild,
    /// The node, then its siblings.
    SelfOrSibling,
    /// The node, then its ancestors.
    SelfOrAncestor,
    /// The node, then its subtree in level order.
    SelfOrDescendant,
    /// The subtree in reverse level order, then the node.
    SelfOrDescendantReverse,
    /// The node, its siblings, then its ancestors.
    SelfSiblingOrAncestor,
}

impl Axis {
    /// Returns `true` if the axis visits the node itself.
    pub fn includes_self(self) -> bool {
        matches!(
            self,
            Self::Itself
                | Self::SelfOrChild
                | Self::SelfOrSibling
                | Self::SelfOrAncestor
                | Self::SelfOrDescendant
                | Self::SelfOrDescendantReverse
                | Self::SelfSiblingOrAncestor
        )
    }
}
