//! # Host tree
//!
//! The arena-backed tree the patcher mutates. Nodes are plain data (tag,
//! attributes, text, key, parent/children links) plus one piece of metadata
//! owned by the engine: the component instance anchored at the node, if any.
//!
//! Keys are identity tokens, not attributes, and are never serialised.
//!
//! ```rust
//! use reprise_core::HostTree;
//!
//! let mut tree = HostTree::new();
//! let root = tree.create_element("div");
//! let child = tree.create_keyed_element("div", "test");
//! let text = tree.create_text("test");
//! tree.append_child(child, text);
//! tree.append_child(root, child);
//!
//! assert_eq!(tree.outer_html(root), "<div><div>test</div></div>");
//! ```

use std::collections::HashSet;

use slotmap::{SlotMap, new_key_type};

use crate::InstanceId;

new_key_type! {
    pub struct NodeId;
}

pub type Key = String;

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub key: Option<Key>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub(crate) instance: Option<InstanceId>,
}

impl Node {
    fn new(kind: NodeKind, key: Option<Key>) -> Self {
        Self {
            kind,
            key,
            parent: None,
            children: Vec::new(),
            instance: None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text(_))
    }
}

/// Copy of one subtree taken before a pass, so a failed pass can put it
/// back without touching the rest of the arena.
#[derive(Debug)]
pub(crate) struct Snapshot {
    root: NodeId,
    nodes: Vec<(NodeId, Node)>,
}

#[derive(Clone, Debug, Default)]
pub struct HostTree {
    nodes: SlotMap<NodeId, Node>,
}

impl HostTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_element(&mut self, tag: impl Into<String>) -> NodeId {
        self.nodes.insert(Node::new(
            NodeKind::Element {
                tag: tag.into(),
                attrs: Vec::new(),
            },
            None,
        ))
    }

    pub fn create_keyed_element(&mut self, tag: impl Into<String>, key: impl Into<Key>) -> NodeId {
        let id = self.create_element(tag);
        self.nodes[id].key = Some(key.into());
        id
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.nodes
            .insert(Node::new(NodeKind::Text(text.into()), None))
    }

    /// Appends `child` to `parent`, detaching it from any previous parent first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        let len = self.children(parent).len();
        self.insert_child(parent, len, child);
    }

    pub fn set_attribute(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        if let Some(NodeKind::Element { attrs, .. }) = self.nodes.get_mut(node).map(|n| &mut n.kind)
        {
            let name = name.into();
            let value = value.into();
            match attrs.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => attrs.push((name, value)),
            }
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn get(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn key(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).and_then(|n| n.key.as_deref())
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).and_then(|n| n.tag())
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match self.nodes.get(node).map(|n| &n.kind) {
            Some(NodeKind::Text(t)) => Some(t),
            _ => None,
        }
    }

    /// The component instance anchored at `node`.
    pub fn instance(&self, node: NodeId) -> Option<InstanceId> {
        self.nodes.get(node).and_then(|n| n.instance)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(node) {
            self.write_html(child, &mut out);
        }
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        let Some(n) = self.nodes.get(node) else {
            return;
        };
        match &n.kind {
            NodeKind::Text(t) => escape_into(t, out),
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(value, out);
                    out.push('"');
                }
                out.push('>');
                for &child in &n.children {
                    self.write_html(child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    // Structural operations used by the patcher.

    pub(crate) fn node_mut(&mut self, node: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node)
    }

    pub(crate) fn set_instance(&mut self, node: NodeId, instance: Option<InstanceId>) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.instance = instance;
        }
    }

    pub(crate) fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        if let Some(p) = self.nodes.get_mut(parent) {
            let index = index.min(p.children.len());
            p.children.insert(index, child);
        }
        if let Some(c) = self.nodes.get_mut(child) {
            c.parent = Some(parent);
        }
    }

    /// Moves an existing child of `parent` to `index`.
    pub(crate) fn move_child(&mut self, parent: NodeId, child: NodeId, index: usize) {
        if let Some(p) = self.nodes.get_mut(parent)
            && let Some(from) = p.children.iter().position(|&c| c == child)
            && from != index
        {
            p.children.remove(from);
            let index = index.min(p.children.len());
            p.children.insert(index, child);
        }
    }

    /// Detaches every child of `parent` from `from` onwards and returns them.
    pub(crate) fn truncate_children(&mut self, parent: NodeId, from: usize) -> Vec<NodeId> {
        let removed = match self.nodes.get_mut(parent) {
            Some(p) if from < p.children.len() => p.children.split_off(from),
            _ => return Vec::new(),
        };
        for &child in &removed {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = None;
            }
        }
        removed
    }

    pub(crate) fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.retain(|&c| c != node);
        }
        if let Some(n) = self.nodes.get_mut(node) {
            n.parent = None;
        }
    }

    /// Releases a detached subtree. Attached nodes are left alone.
    pub(crate) fn free_subtree(&mut self, node: NodeId) {
        if self.parent(node).is_some() {
            return;
        }
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.remove(id) {
                stack.extend(n.children);
            }
        }
    }
}

impl HostTree {
    pub(crate) fn snapshot(&self, root: NodeId) -> Snapshot {
        let mut nodes = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.get(id) {
                stack.extend(n.children.iter().copied());
                nodes.push((id, n.clone()));
            }
        }
        Snapshot { root, nodes }
    }

    /// Puts a snapshot back. Nodes created since it was taken are freed: they
    /// hang off the snapshot root, or off one of the `detached` subtrees.
    ///
    /// Nothing in the snapshot may have been freed in between.
    pub(crate) fn restore(&mut self, snapshot: Snapshot, detached: &[NodeId]) {
        let kept: HashSet<NodeId> = snapshot.nodes.iter().map(|(id, _)| *id).collect();
        let mut stack = vec![snapshot.root];
        stack.extend(detached.iter().copied());
        let mut created = Vec::new();
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.get(id) {
                stack.extend(n.children.iter().copied());
                if !kept.contains(&id) {
                    created.push(id);
                }
            }
        }
        for id in created {
            self.nodes.remove(id);
        }
        for (id, node) in snapshot.nodes {
            if let Some(slot) = self.nodes.get_mut(id) {
                *slot = node;
            }
        }
    }
}

fn escape_into(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialises_attributes_but_not_keys() {
        let mut tree = HostTree::new();
        let root = tree.create_element("div");
        let child = tree.create_keyed_element("span", "k");
        tree.set_attribute(child, "class", "a&b");
        let text = tree.create_text("<hi>");
        tree.append_child(child, text);
        tree.append_child(root, child);

        assert_eq!(
            tree.outer_html(root),
            "<div><span class=\"a&amp;b\">&lt;hi&gt;</span></div>"
        );
        assert_eq!(tree.inner_html(child), "&lt;hi&gt;");
        assert_eq!(tree.key(child), Some("k"));
    }

    #[test]
    fn move_and_truncate_keep_links_consistent() {
        let mut tree = HostTree::new();
        let root = tree.create_element("ul");
        let a = tree.create_element("li");
        let b = tree.create_element("li");
        let c = tree.create_element("li");
        for n in [a, b, c] {
            tree.append_child(root, n);
        }

        tree.move_child(root, c, 0);
        assert_eq!(tree.children(root), &[c, a, b]);

        let removed = tree.truncate_children(root, 1);
        assert_eq!(removed, vec![a, b]);
        assert_eq!(tree.children(root), &[c]);
        assert_eq!(tree.parent(a), None);
        assert_eq!(tree.parent(c), Some(root));

        tree.free_subtree(a);
        assert!(!tree.contains(a));
        // still attached, not freed
        tree.free_subtree(c);
        assert!(tree.contains(c));
    }

    #[test]
    fn restore_undoes_changes_below_root_only() {
        let mut tree = HostTree::new();
        let root = tree.create_element("div");
        let a = tree.create_element("p");
        let text = tree.create_text("a");
        tree.append_child(a, text);
        tree.append_child(root, a);
        let other = tree.create_element("section");

        let snapshot = tree.snapshot(root);
        let fresh = tree.create_element("i");
        tree.insert_child(root, 0, fresh);
        let removed = tree.truncate_children(root, 1);
        assert_eq!(removed, vec![a]);
        tree.set_attribute(other, "id", "outside");

        tree.restore(snapshot, &removed);
        assert_eq!(tree.outer_html(root), "<div><p>a</p></div>");
        assert_eq!(tree.parent(a), Some(root));
        assert!(!tree.contains(fresh));
        // outside the snapshot, left as is
        assert_eq!(tree.outer_html(other), "<section id=\"outside\"></section>");
    }

    #[test]
    fn append_reparents() {
        let mut tree = HostTree::new();
        let first = tree.create_element("div");
        let second = tree.create_element("div");
        let child = tree.create_text("x");
        tree.append_child(first, child);
        tree.append_child(second, child);
        assert!(tree.children(first).is_empty());
        assert_eq!(tree.parent(child), Some(second));
    }
}
