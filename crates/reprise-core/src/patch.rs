//! # Instruction stream
//!
//! Templates drive a [`Patcher`] with `element_open` / `text` /
//! `element_close` and declare nested components with
//! [`Patcher::component`]. The patcher reconciles those instructions against
//! the host tree as they arrive, reusing nodes in place:
//!
//! - an element reuses the node at the cursor when tag and key agree, or a
//!   keyed sibling further right (moved into place);
//! - a component reuses the instance anchored at the keyed slot when the
//!   component type is the same, and skips it entirely when its props are
//!   unchanged;
//! - closing an element detaches its unclaimed children, which unmounts any
//!   instance anchored inside them.
//!
//! A component's template must open exactly one root element. That element
//! is the instance's anchor node.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use smallvec::SmallVec;

use crate::component::AnyComponent;
use crate::error::panic_message;
use crate::hooks::{self, HookFrame};
use crate::host::{Key, NodeId, NodeKind};
use crate::instance::{Instance, InstanceFlags, InstanceId, is_unmounting};
use crate::reconcile::{self, Resolution};
use crate::runtime::{Engine, PassJournal, RuntimeConfig, Staged};
use crate::{Component, HookError, RenderError};

/// One open element.
struct Frame {
    node: NodeId,
    cursor: usize,
    /// Component keys declared directly under this element in this pass.
    keys: SmallVec<[Key; 4]>,
}

impl Frame {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            cursor: 0,
            keys: SmallVec::new(),
        }
    }
}

/// The template currently being executed: a component's, or the plain
/// function of a `patch_outer` pass.
struct Scope {
    label: String,
    instance: Option<InstanceId>,
    key: Option<Key>,
    /// Node the root element should land on, if one exists already.
    candidate: Option<NodeId>,
    /// Frame depth at which the template's root element opens.
    depth: usize,
    anchor: Option<NodeId>,
}

pub struct Patcher<'a> {
    engine: &'a mut Engine,
    journal: &'a mut PassJournal,
    config: &'a RuntimeConfig,
    frames: Vec<Frame>,
    scopes: Vec<Scope>,
    error: Option<RenderError>,
}

impl<'a> Patcher<'a> {
    pub(crate) fn new(
        engine: &'a mut Engine,
        journal: &'a mut PassJournal,
        config: &'a RuntimeConfig,
    ) -> Self {
        Self {
            engine,
            journal,
            config,
            frames: Vec::new(),
            scopes: Vec::new(),
            error: None,
        }
    }

    pub fn element_open(&mut self, tag: &str, key: Option<&str>) {
        self.element_open_with(tag, key, &[]);
    }

    /// Opens an element and replaces its attributes with `attrs`.
    pub fn element_open_with(&mut self, tag: &str, key: Option<&str>, attrs: &[(&str, &str)]) {
        if self.error.is_some() {
            return;
        }
        let depth = self.frames.len();
        let node = match self.scopes.last() {
            Some(scope) if scope.depth == depth && scope.anchor.is_none() => self.open_anchor(tag),
            Some(scope) if scope.depth == depth => {
                let msg = format!(
                    "template of `{}` opened more than one root element",
                    scope.label
                );
                self.fail(RenderError::reconciliation(msg));
                return;
            }
            _ => match self.open_child(tag, key) {
                Some(node) => node,
                None => return,
            },
        };
        if let Some(n) = self.engine.tree.node_mut(node)
            && let NodeKind::Element { attrs: current, .. } = &mut n.kind
        {
            current.clear();
            current.extend(attrs.iter().map(|&(k, v)| (k.to_string(), v.to_string())));
        }
        self.frames.push(Frame::new(node));
    }

    pub fn text(&mut self, text: &str) {
        if self.error.is_some() {
            return;
        }
        if self.at_scope_root() {
            let msg = "text emitted before a template's root element";
            self.fail(RenderError::reconciliation(msg));
            return;
        }
        let Some(frame) = self.frames.last_mut() else {
            let msg = "text emitted outside of any element";
            self.fail(RenderError::reconciliation(msg));
            return;
        };
        let (parent, cursor) = (frame.node, frame.cursor);
        frame.cursor += 1;

        let tree = &mut self.engine.tree;
        match reconcile::match_text(tree, parent, cursor) {
            Some(node) => {
                if let Some(n) = tree.node_mut(node)
                    && let NodeKind::Text(current) = &mut n.kind
                    && *current != text
                {
                    *current = text.to_string();
                }
            }
            None => {
                let node = tree.create_text(text);
                tree.insert_child(parent, cursor, node);
            }
        }
    }

    pub fn element_close(&mut self) {
        if self.error.is_some() {
            return;
        }
        if self.at_scope_root() || self.frames.is_empty() {
            log::warn!("element_close without a matching element_open");
            let msg = "element_close without a matching element_open";
            self.fail(RenderError::reconciliation(msg));
            return;
        }
        if let Some(frame) = self.frames.pop() {
            let removed = self.engine.tree.truncate_children(frame.node, frame.cursor);
            self.discard(removed);
        }
    }

    /// Declares a component at the current position.
    ///
    /// Keys must be unique among the component declarations of one element.
    pub fn component<P, S>(
        &mut self,
        component: &Component<P, S>,
        key: impl Into<Key>,
        props: P,
    ) -> Result<(), RenderError>
    where
        P: PartialEq + 'static,
        S: 'static,
    {
        let result = self.declare(component.erased(), key.into(), Rc::new(props));
        self.guard(result)
    }

    fn declare(
        &mut self,
        component: Rc<dyn AnyComponent>,
        key: Key,
        props: Rc<dyn Any>,
    ) -> Result<(), RenderError> {
        if self.error.is_some() {
            return Err(RenderError::reconciliation("render pass already failed"));
        }
        if self.at_scope_root() {
            return Err(RenderError::reconciliation(format!(
                "component `{}` declared before its parent template's root element",
                component.name()
            )));
        }
        let depth = self.scopes.iter().filter(|s| s.instance.is_some()).count();
        if depth >= self.config.max_component_depth {
            return Err(RenderError::reconciliation(format!(
                "component nesting deeper than {} at `{}`",
                self.config.max_component_depth,
                component.name()
            )));
        }
        let Some(frame) = self.frames.last_mut() else {
            return Err(RenderError::reconciliation(format!(
                "component `{}` declared outside of any element",
                component.name()
            )));
        };
        if frame.keys.contains(&key) {
            return Err(RenderError::reconciliation(format!(
                "duplicate key `{key}` among sibling components"
            )));
        }
        frame.keys.push(key.clone());
        let (parent, cursor) = (frame.node, frame.cursor);

        let tree = &mut self.engine.tree;
        let candidate = reconcile::match_component_slot(tree, parent, cursor, &key);
        self.resolve(candidate, Some(key), component, props)
    }

    /// Mounts, updates or replaces the instance for one declaration.
    fn resolve(
        &mut self,
        candidate: Option<NodeId>,
        key: Option<Key>,
        component: Rc<dyn AnyComponent>,
        props: Rc<dyn Any>,
    ) -> Result<(), RenderError> {
        let previous = candidate.and_then(|n| self.engine.tree.instance(n));
        match reconcile::decide(&self.engine.instances, previous, component.id()) {
            Resolution::Update(id) => self.update(id, candidate, key, component, props),
            Resolution::Mount { replaced } => {
                if let Some(old) = replaced {
                    log::trace!("replace {key:?} with `{}`", component.name());
                    self.queue_unmount(old);
                }
                self.mount(candidate, key, component, props)
            }
        }
    }

    fn update(
        &mut self,
        id: InstanceId,
        candidate: Option<NodeId>,
        key: Option<Key>,
        component: Rc<dyn AnyComponent>,
        props: Rc<dyn Any>,
    ) -> Result<(), RenderError> {
        let unchanged = self
            .engine
            .instances
            .get(id)
            .is_some_and(|inst| component.props_eq(&*inst.props, &*props));
        if unchanged {
            log::trace!("memoized `{}` {key:?}", component.name());
            // The anchor stays as it is, subtree included.
            if let Some(frame) = self.frames.last_mut() {
                frame.cursor += 1;
            }
            self.journal.stats.memoized += 1;
            return Ok(());
        }

        log::trace!("update `{}` {key:?}", component.name());
        let state = self.derive(id, &*component, &*props, false)?;
        self.journal.staged.push(Staged {
            id,
            props,
            state: state.clone(),
        });
        self.journal.stats.updated += 1;
        self.render_instance(id, key, candidate, component, &state)
    }

    fn mount(
        &mut self,
        candidate: Option<NodeId>,
        key: Option<Key>,
        component: Rc<dyn AnyComponent>,
        props: Rc<dyn Any>,
    ) -> Result<(), RenderError> {
        log::trace!("mount `{}` {key:?}", component.name());
        let owner = self.scopes.last().and_then(|s| s.instance);
        let id = self.engine.instances.insert(Instance::new(
            component.clone(),
            key.clone(),
            owner,
            props.clone(),
        ));
        self.journal.mounted.push(id);
        if let Some(owner) = owner
            && let Some(key) = &key
            && let Some(inst) = self.engine.instances.get_mut(owner)
        {
            inst.children.push((key.clone(), id));
        }

        let state = self.derive(id, &*component, &*props, true)?;
        if let Some(inst) = self.engine.instances.get_mut(id) {
            inst.state = Some(state.clone());
            inst.renders = 1;
        }
        self.journal.stats.mounted += 1;
        self.render_instance(id, key, candidate, component, &state)
    }

    /// Runs the state derivation with the instance's hook cells installed.
    fn derive(
        &mut self,
        id: InstanceId,
        component: &dyn AnyComponent,
        props: &dyn Any,
        first_render: bool,
    ) -> Result<Rc<dyn Any>, RenderError> {
        let cells = self
            .engine
            .instances
            .get_mut(id)
            .map(|inst| std::mem::take(&mut inst.cells))
            .unwrap_or_default();
        let expected = cells.len();

        let frame = HookFrame::new(id, cells, first_render);
        let (outcome, frame) = hooks::with_frame(frame, || {
            catch_unwind(AssertUnwindSafe(|| component.derive(props)))
        });
        let Some(frame) = frame else {
            let msg = "hook frame lost during state derivation";
            return Err(RenderError::reconciliation(msg));
        };
        let HookFrame {
            cells,
            cursor,
            queued,
            violation,
            ..
        } = frame;
        if let Some(inst) = self.engine.instances.get_mut(id) {
            inst.cells = cells;
        }

        if let Some(violation) = violation {
            return Err(violation.into());
        }
        let state = match outcome {
            Ok(Ok(state)) => state,
            Ok(Err(source)) => {
                return Err(RenderError::StateDerivation {
                    component: component.name().to_string(),
                    source,
                });
            }
            Err(payload) => {
                return Err(RenderError::StateDerivation {
                    component: component.name().to_string(),
                    source: anyhow::anyhow!(panic_message(payload)),
                });
            }
        };
        if !first_render && cursor != expected {
            return Err(HookError::CountChanged {
                expected,
                found: cursor,
            }
            .into());
        }
        self.journal.effects.extend(queued);
        Ok(state)
    }

    /// Executes the component's template under a fresh scope.
    fn render_instance(
        &mut self,
        id: InstanceId,
        key: Option<Key>,
        candidate: Option<NodeId>,
        component: Rc<dyn AnyComponent>,
        state: &Rc<dyn Any>,
    ) -> Result<(), RenderError> {
        self.scopes.push(Scope {
            label: component.name().to_string(),
            instance: Some(id),
            key,
            candidate,
            depth: self.frames.len(),
            anchor: None,
        });
        let result = component.render(&**state, self);
        let anchor = self.close_scope(result)?;
        if let Some(inst) = self.engine.instances.get_mut(id) {
            inst.anchor = Some(anchor);
        }
        Ok(())
    }

    fn close_scope(&mut self, result: Result<(), RenderError>) -> Result<NodeId, RenderError> {
        let scope = self.scopes.pop();
        result?;
        if self.error.is_some() {
            return Err(RenderError::reconciliation("render pass already failed"));
        }
        let Some(scope) = scope else {
            return Err(RenderError::reconciliation("template scope underflow"));
        };
        let Some(anchor) = scope.anchor else {
            return Err(RenderError::reconciliation(format!(
                "template of `{}` did not open a root element",
                scope.label
            )));
        };
        if self.frames.len() != scope.depth {
            return Err(RenderError::reconciliation(format!(
                "template of `{}` left {} element(s) open",
                scope.label,
                self.frames.len().saturating_sub(scope.depth)
            )));
        }
        Ok(anchor)
    }

    /// Entry point of `Runtime::render`: the root node is the slot.
    pub(crate) fn root_component(
        &mut self,
        root: NodeId,
        component: Rc<dyn AnyComponent>,
        props: Rc<dyn Any>,
    ) -> Result<(), RenderError> {
        let result = self.resolve(Some(root), None, component, props);
        self.guard(result)
    }

    /// Entry point of `Runtime::patch_outer`: a plain template at the root.
    pub(crate) fn root_template(
        &mut self,
        root: NodeId,
        template: impl FnOnce(&mut Patcher<'_>) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        if let Some(old) = self.engine.tree.instance(root) {
            self.queue_unmount(old);
        }
        self.scopes.push(Scope {
            label: "patch_outer".to_string(),
            instance: None,
            key: None,
            candidate: Some(root),
            depth: 0,
            anchor: None,
        });
        let result = template(self);
        let result = self.close_scope(result).map(|_| ());
        self.guard(result)
    }

    /// Folds the template's result with any failure recorded along the way.
    /// The first failure wins.
    pub(crate) fn finish(mut self, result: Result<(), RenderError>) -> Result<(), RenderError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => result,
        }
    }

    /// Records a failure and hands the template a stand-in to propagate.
    fn guard(&mut self, result: Result<(), RenderError>) -> Result<(), RenderError> {
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                let msg = format!("render pass aborted: {err}");
                self.fail(err);
                Err(RenderError::reconciliation(msg))
            }
        }
    }

    fn fail(&mut self, err: RenderError) {
        if self.error.is_none() {
            log::debug!("render pass failed: {err}");
            self.error = Some(err);
        }
    }

    /// True at the top level of the current template, where only its root
    /// element may appear.
    fn at_scope_root(&self) -> bool {
        self.scopes
            .last()
            .is_some_and(|s| s.depth == self.frames.len())
    }

    /// Opens the current template's root element on its anchor.
    fn open_anchor(&mut self, tag: &str) -> NodeId {
        let (candidate, instance, key) = match self.scopes.last() {
            Some(s) => (s.candidate, s.instance, s.key.clone()),
            None => (None, None, None),
        };
        let node = match candidate {
            Some(node) => {
                self.morph(node, tag);
                node
            }
            None => {
                let node = self.engine.tree.create_element(tag);
                if let Some(frame) = self.frames.last() {
                    let tree = &mut self.engine.tree;
                    tree.insert_child(frame.node, frame.cursor, node);
                }
                node
            }
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.cursor += 1;
        }
        if let Some(n) = self.engine.tree.node_mut(node)
            && key.is_some()
        {
            n.key = key;
        }
        self.engine.tree.set_instance(node, instance);
        if let Some(scope) = self.scopes.last_mut() {
            scope.anchor = Some(node);
        }
        node
    }

    /// Turns `node` into a `tag` element in place, dropping its content if the
    /// tag changes. Keeps node identity, and with it the anchor.
    fn morph(&mut self, node: NodeId, tag: &str) {
        if self.engine.tree.tag(node) == Some(tag) {
            return;
        }
        let removed = self.engine.tree.truncate_children(node, 0);
        self.discard(removed);
        if let Some(n) = self.engine.tree.node_mut(node) {
            n.kind = NodeKind::Element {
                tag: tag.to_string(),
                attrs: Vec::new(),
            };
        }
    }

    fn open_child(&mut self, tag: &str, key: Option<&str>) -> Option<NodeId> {
        let Some(frame) = self.frames.last_mut() else {
            let msg = format!("element `{tag}` opened outside of any root element");
            self.fail(RenderError::reconciliation(msg));
            return None;
        };
        let (parent, cursor) = (frame.node, frame.cursor);
        frame.cursor += 1;

        let tree = &mut self.engine.tree;
        let node = match reconcile::match_element(tree, parent, cursor, tag, key) {
            Some(node) => node,
            None => {
                let node = match key {
                    Some(key) => tree.create_keyed_element(tag, key),
                    None => tree.create_element(tag),
                };
                tree.insert_child(parent, cursor, node);
                node
            }
        };
        Some(node)
    }

    /// Handles nodes that left the tree: their instances unmount at flush
    /// and the nodes themselves are freed after it.
    fn discard(&mut self, nodes: Vec<NodeId>) {
        let mut anchored = Vec::new();
        for node in nodes {
            reconcile::collect_anchors(&self.engine.tree, node, &mut anchored);
            self.journal.detached.push(node);
        }
        for id in anchored {
            self.queue_unmount(id);
        }
    }

    fn queue_unmount(&mut self, id: InstanceId) {
        if is_unmounting(&self.engine.instances, id) {
            return;
        }
        if let Some(inst) = self.engine.instances.get_mut(id) {
            log::trace!("queue unmount `{}` {:?}", inst.component.name(), inst.key);
            inst.flags.insert(InstanceFlags::UNMOUNTING);
            self.journal.unmounts.push(id);
        }
    }
}
