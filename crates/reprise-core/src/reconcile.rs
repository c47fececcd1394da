//! Identity resolution.
//!
//! Sibling matching works on the children of the element currently open in
//! the patcher. Everything before the cursor has been claimed by this pass;
//! everything from the cursor on is still up for grabs. A keyed match further
//! right is moved to the cursor, which is how reordered siblings keep their
//! nodes and instances. Whatever is left unclaimed when the element closes is
//! detached.

use crate::component::ComponentId;
use crate::host::{HostTree, NodeId, NodeKind};
use crate::instance::{InstanceId, Instances, is_unmounting};

/// What to do with a component declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Same key, same component type: keep the instance.
    Update(InstanceId),
    /// No reusable instance. `replaced` is the previous occupant of the slot,
    /// which must be unmounted.
    Mount { replaced: Option<InstanceId> },
}

pub(crate) fn decide(
    instances: &Instances,
    previous: Option<InstanceId>,
    component: ComponentId,
) -> Resolution {
    let Some(prev) = previous.filter(|&id| !is_unmounting(instances, id)) else {
        return Resolution::Mount { replaced: None };
    };
    match instances.get(prev) {
        Some(inst) if inst.component.id() == component => Resolution::Update(prev),
        _ => Resolution::Mount {
            replaced: Some(prev),
        },
    }
}

/// Finds a plain element for `element_open` and moves it to `cursor`.
///
/// Component anchors never match: their node belongs to the instance.
pub(crate) fn match_element(
    tree: &mut HostTree,
    parent: NodeId,
    cursor: usize,
    tag: &str,
    key: Option<&str>,
) -> Option<NodeId> {
    let matches = |tree: &HostTree, id: NodeId| {
        tree.get(id).is_some_and(|n| {
            n.instance.is_none() && n.tag() == Some(tag) && n.key.as_deref() == key
        })
    };
    let found = {
        let view: &HostTree = tree;
        let children = view.children(parent);
        match children.get(cursor) {
            Some(&cur) if matches(view, cur) => return Some(cur),
            _ if key.is_none() => return None,
            _ => children
                .iter()
                .skip(cursor + 1)
                .copied()
                .find(|&id| matches(view, id))?,
        }
    };
    tree.move_child(parent, found, cursor);
    Some(found)
}

/// Finds the node a keyed component declaration should occupy and moves it
/// to `cursor`.
///
/// A live anchor with the key wins over any plain element carrying the same
/// key. Raw (never-anchored) nodes qualify by key alone when no anchor does.
pub(crate) fn match_component_slot(
    tree: &mut HostTree,
    parent: NodeId,
    cursor: usize,
    key: &str,
) -> Option<NodeId> {
    let found = {
        let view: &HostTree = tree;
        let slot = |id: NodeId, anchored: bool| {
            view.get(id).is_some_and(|n| {
                matches!(n.kind, NodeKind::Element { .. })
                    && n.key.as_deref() == Some(key)
                    && n.instance.is_some() == anchored
            })
        };
        let rest = view.children(parent).get(cursor..).unwrap_or_default();
        rest.iter()
            .copied()
            .find(|&id| slot(id, true))
            .or_else(|| rest.iter().copied().find(|&id| slot(id, false)))?
    };
    tree.move_child(parent, found, cursor);
    Some(found)
}

/// Text is matched positionally only.
pub(crate) fn match_text(tree: &HostTree, parent: NodeId, cursor: usize) -> Option<NodeId> {
    tree.children(parent)
        .get(cursor)
        .copied()
        .filter(|&id| tree.get(id).is_some_and(|n| n.is_text()))
}

/// Collects the outermost instances anchored in the subtree at `node`.
///
/// Nested anchors are not collected: they belong to the outer instance and
/// go down with it.
pub(crate) fn collect_anchors(tree: &HostTree, node: NodeId, out: &mut Vec<InstanceId>) {
    let mut stack = vec![node];
    while let Some(id) = stack.pop() {
        if let Some(inst) = tree.instance(id) {
            out.push(inst);
            continue;
        }
        // reversed so the walk is in document order
        stack.extend(tree.children(id).iter().rev().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_element_is_moved_to_cursor() {
        let mut tree = HostTree::new();
        let root = tree.create_element("div");
        let a = tree.create_keyed_element("p", "a");
        let b = tree.create_keyed_element("p", "b");
        tree.append_child(root, a);
        tree.append_child(root, b);

        assert_eq!(match_element(&mut tree, root, 0, "p", Some("b")), Some(b));
        assert_eq!(tree.children(root), &[b, a]);
        // wrong tag never matches
        assert_eq!(match_element(&mut tree, root, 1, "span", Some("a")), None);
    }

    #[test]
    fn unkeyed_element_only_matches_at_cursor() {
        let mut tree = HostTree::new();
        let root = tree.create_element("div");
        let t = tree.create_text("x");
        let p = tree.create_element("p");
        tree.append_child(root, t);
        tree.append_child(root, p);

        assert_eq!(match_element(&mut tree, root, 0, "p", None), None);
        assert_eq!(match_element(&mut tree, root, 1, "p", None), Some(p));
        assert_eq!(match_text(&tree, root, 0), Some(t));
        assert_eq!(match_text(&tree, root, 1), None);
    }

    #[test]
    fn raw_node_qualifies_for_component_slot_by_key() {
        let mut tree = HostTree::new();
        let root = tree.create_element("div");
        let raw = tree.create_keyed_element("div", "test");
        tree.append_child(root, raw);

        assert_eq!(match_component_slot(&mut tree, root, 0, "other"), None);
        assert_eq!(match_component_slot(&mut tree, root, 0, "test"), Some(raw));
    }

    #[test]
    fn live_anchor_beats_plain_element_with_same_key() {
        let mut tree = HostTree::new();
        let root = tree.create_element("div");
        let plain = tree.create_keyed_element("div", "x");
        let anchor = tree.create_keyed_element("div", "x");
        tree.append_child(root, plain);
        tree.append_child(root, anchor);
        tree.set_instance(anchor, Some(InstanceId::default()));

        assert_eq!(match_component_slot(&mut tree, root, 0, "x"), Some(anchor));
        assert_eq!(tree.children(root), &[anchor, plain]);
    }
}
