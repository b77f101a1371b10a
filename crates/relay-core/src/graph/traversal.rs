//! Walk orders and axis traversal.

use std::collections::{HashSet, VecDeque};

use super::{Axis, Traversing};
use crate::foundation::{DispatchError, DispatchResult};

/// Cycle guard shared by every walk.
struct Visited<I>(HashSet<I>);

impl<I: Eq + std::hash::Hash + std::fmt::Debug> Visited<I> {
    fn new() -> Self {
        Self(HashSet::new())
    }

    fn enter(&mut self, id: I) -> DispatchResult<()> {
        if self.0.contains(&id) {
            return Err(DispatchError::Circularity {
                node: format!("{id:?}"),
            });
        }
        self.0.insert(id);
        Ok(())
    }
}

/// Walks `node` along `axis`, calling `visitor` until it returns `true`.
pub fn traverse<T, F>(node: &T, axis: Axis, mut visitor: F) -> DispatchResult<()>
where
    T: Traversing,
    F: FnMut(&T) -> bool,
{
    match axis {
        Axis::Itself => {
            visitor(node);
            Ok(())
        }
        Axis::Root => {
            let mut visited = Visited::new();
            let mut root = node.clone();
            visited.enter(root.node_id())?;
            while let Some(parent) = root.parent() {
                visited.enter(parent.node_id())?;
                root = parent;
            }
            visitor(&root);
            Ok(())
        }
        Axis::Child => children(node, false, &mut visitor),
        Axis::SelfOrChild => children(node, true, &mut visitor),
        Axis::Sibling => self_sibling_or_ancestor(node, false, false, &mut visitor),
        Axis::SelfOrSibling => self_sibling_or_ancestor(node, true, false, &mut visitor),
        Axis::SelfSiblingOrAncestor => self_sibling_or_ancestor(node, true, true, &mut visitor),
        Axis::Ancestor => ancestors(node, false, &mut visitor),
        Axis::SelfOrAncestor => ancestors(node, true, &mut visitor),
        Axis::Descendant => walk_level_order(node, false, &mut visitor),
        Axis::SelfOrDescendant => walk_level_order(node, true, &mut visitor),
        Axis::DescendantReverse => walk_reverse_level_order(node, false, &mut visitor),
        Axis::SelfOrDescendantReverse => walk_reverse_level_order(node, true, &mut visitor),
    }
}

/// Visits each node before its children.
pub fn pre_order<T, F>(node: &T, mut visitor: F) -> DispatchResult<()>
where
    T: Traversing,
    F: FnMut(&T) -> bool,
{
    fn walk<T: Traversing>(
        node: &T,
        visited: &mut Visited<T::Id>,
        visitor: &mut dyn FnMut(&T) -> bool,
    ) -> DispatchResult<bool> {
        visited.enter(node.node_id())?;
        if visitor(node) {
            return Ok(true);
        }
        for child in node.children() {
            if walk(&child, visited, visitor)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    walk(node, &mut Visited::new(), &mut visitor).map(|_| ())
}

/// Visits each node after its children.
pub fn post_order<T, F>(node: &T, mut visitor: F) -> DispatchResult<()>
where
    T: Traversing,
    F: FnMut(&T) -> bool,
{
    fn walk<T: Traversing>(
        node: &T,
        visited: &mut Visited<T::Id>,
        visitor: &mut dyn FnMut(&T) -> bool,
    ) -> DispatchResult<bool> {
        visited.enter(node.node_id())?;
        for child in node.children() {
            if walk(&child, visited, visitor)? {
                return Ok(true);
            }
        }
        Ok(visitor(node))
    }

    walk(node, &mut Visited::new(), &mut visitor).map(|_| ())
}

/// Visits the tree breadth first, starting with `node`.
pub fn level_order<T, F>(node: &T, mut visitor: F) -> DispatchResult<()>
where
    T: Traversing,
    F: FnMut(&T) -> bool,
{
    walk_level_order(node, true, &mut visitor)
}

/// Visits the deepest level first, ending with `node`.
pub fn reverse_level_order<T, F>(node: &T, mut visitor: F) -> DispatchResult<()>
where
    T: Traversing,
    F: FnMut(&T) -> bool,
{
    walk_reverse_level_order(node, true, &mut visitor)
}

fn walk_level_order<T: Traversing>(
    start: &T,
    with_self: bool,
    visitor: &mut dyn FnMut(&T) -> bool,
) -> DispatchResult<()> {
    let mut visited = Visited::new();
    let start_id = start.node_id();
    let mut queue = VecDeque::from([start.clone()]);
    while let Some(node) = queue.pop_front() {
        let id = node.node_id();
        let is_start = id == start_id;
        visited.enter(id)?;
        if (with_self || !is_start) && visitor(&node) {
            return Ok(());
        }
        queue.extend(node.children());
    }
    Ok(())
}

fn walk_reverse_level_order<T: Traversing>(
    start: &T,
    with_self: bool,
    visitor: &mut dyn FnMut(&T) -> bool,
) -> DispatchResult<()> {
    let mut visited = Visited::new();
    let mut stack = Vec::new();
    let mut queue = VecDeque::from([start.clone()]);
    while let Some(node) = queue.pop_front() {
        visited.enter(node.node_id())?;
        queue.extend(node.children().into_iter().rev());
        stack.push(node);
    }
    let start_id = start.node_id();
    while let Some(node) = stack.pop() {
        if !with_self && node.node_id() == start_id {
            continue;
        }
        if visitor(&node) {
            break;
        }
    }
    Ok(())
}

fn children<T: Traversing>(
    node: &T,
    with_self: bool,
    visitor: &mut dyn FnMut(&T) -> bool,
) -> DispatchResult<()> {
    let mut visited = Visited::new();
    visited.enter(node.node_id())?;
    if with_self && visitor(node) {
        return Ok(());
    }
    for child in node.children() {
        visited.enter(child.node_id())?;
        if visitor(&child) {
            break;
        }
    }
    Ok(())
}

fn ancestors<T: Traversing>(
    node: &T,
    with_self: bool,
    visitor: &mut dyn FnMut(&T) -> bool,
) -> DispatchResult<()> {
    let mut visited = Visited::new();
    visited.enter(node.node_id())?;
    if with_self && visitor(node) {
        return Ok(());
    }
    let mut current = node.parent();
    while let Some(parent) = current {
        visited.enter(parent.node_id())?;
        if visitor(&parent) {
            break;
        }
        current = parent.parent();
    }
    Ok(())
}

fn self_sibling_or_ancestor<T: Traversing>(
    node: &T,
    with_self: bool,
    with_ancestors: bool,
    visitor: &mut dyn FnMut(&T) -> bool,
) -> DispatchResult<()> {
    let mut visited = Visited::new();
    let id = node.node_id();
    if with_self && visitor(node) {
        return Ok(());
    }
    let Some(parent) = node.parent() else {
        return Ok(());
    };
    for sibling in parent.children() {
        let sibling_id = sibling.node_id();
        if sibling_id == id {
            continue;
        }
        visited.enter(sibling_id)?;
        if visitor(&sibling) {
            return Ok(());
        }
    }
    if with_ancestors {
        ancestors(&parent, true, visitor)?;
    }
    Ok(())
}
