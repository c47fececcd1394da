//! # Runtime
//!
//! A [`Runtime`] owns the host tree and every component instance living in
//! it. Each call to [`Runtime::render`], [`Runtime::patch_outer`] or
//! [`Runtime::unmount`] is one pass:
//!
//! 1. the template runs against a [`Patcher`], which reconciles the tree in
//!    place and journals instance changes;
//! 2. if it fails, the root's subtree is restored from a snapshot and the
//!    journal is dropped, so nothing from the pass is visible;
//! 3. otherwise the journal is committed and effects are flushed.
//!
//! Effects cannot borrow the runtime that runs them. To start another pass
//! from one, hold a [`PassQueue`] from [`Runtime::queue`]: queued passes run
//! right after the current one has flushed.
//!
//! ```rust
//! use reprise_core::*;
//!
//! let label = create_component(
//!     |p: &String| Ok(p.to_uppercase()),
//!     |s: &String, out: &mut Patcher<'_>| {
//!         out.element_open("b", None);
//!         out.text(s);
//!         out.element_close();
//!         Ok(())
//!     },
//! );
//!
//! let mut rt = Runtime::new();
//! let root = rt.tree_mut().create_element("div");
//! rt.patch_outer(root, |out| {
//!     out.element_open("div", None);
//!     out.component(&label, "a", "hi".to_string())?;
//!     out.element_close();
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert_eq!(rt.tree().outer_html(root), "<div><b>HI</b></div>");
//! assert_eq!(rt.last_pass().mounted, 1);
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::effects::{EffectRecord, EffectScheduler, FlushStats, log_effect_error};
use crate::host::{HostTree, NodeId, Snapshot};
use crate::instance::{InstanceFlags, InstanceId, InstanceInfo, Instances};
use crate::reconcile::collect_anchors;
use crate::{Component, EffectError, Patcher, RenderError};

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Deepest allowed chain of nested component declarations.
    pub max_component_depth: usize,
    /// Passes drained from the [`PassQueue`] after one top-level pass before
    /// the rest of the queue is dropped.
    pub max_queued_passes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_component_depth: 256,
            max_queued_passes: 64,
        }
    }
}

/// Counters for the last committed pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub mounted: usize,
    pub updated: usize,
    pub memoized: usize,
    pub unmounted: usize,
    pub effects_run: usize,
    pub cleanups_run: usize,
    pub effect_errors: usize,
}

impl PassStats {
    fn absorb(&mut self, flush: FlushStats) {
        self.unmounted += flush.unmounted;
        self.effects_run += flush.effects_run;
        self.cleanups_run += flush.cleanups_run;
        self.effect_errors += flush.errors;
    }
}

pub(crate) struct Engine {
    pub(crate) tree: HostTree,
    pub(crate) instances: Instances,
}

/// Props and state an existing instance takes on at commit.
pub(crate) struct Staged {
    pub(crate) id: InstanceId,
    pub(crate) props: Rc<dyn Any>,
    pub(crate) state: Rc<dyn Any>,
}

/// Everything a pass changed outside of the host tree.
#[derive(Default)]
pub(crate) struct PassJournal {
    pub(crate) mounted: Vec<InstanceId>,
    pub(crate) staged: Vec<Staged>,
    pub(crate) unmounts: Vec<InstanceId>,
    /// Subtrees detached in the pass, freed after the flush.
    pub(crate) detached: Vec<NodeId>,
    pub(crate) effects: Vec<EffectRecord>,
    pub(crate) stats: PassStats,
}

impl PassJournal {
    fn commit(&mut self, engine: &mut Engine) {
        let instances = &mut engine.instances;
        for &id in &self.mounted {
            if let Some(inst) = instances.get_mut(id) {
                inst.flags.insert(InstanceFlags::MOUNTED);
            }
        }
        for staged in self.staged.drain(..) {
            if let Some(inst) = instances.get_mut(staged.id) {
                inst.props = staged.props;
                inst.state = Some(staged.state);
                inst.renders += 1;
            }
        }
        for &id in &self.unmounts {
            let owner = instances.get(id).and_then(|inst| inst.parent);
            if let Some(owner) = owner.and_then(|o| instances.get_mut(o)) {
                owner.children.retain(|(_, child)| *child != id);
            }
        }
    }

    fn rollback(self, engine: &mut Engine, snapshot: Snapshot) {
        engine.tree.restore(snapshot, &self.detached);
        let instances = &mut engine.instances;
        for &id in self.mounted.iter().rev() {
            let Some(inst) = instances.remove(id) else {
                continue;
            };
            if let Some(owner) = inst.parent.and_then(|o| instances.get_mut(o)) {
                owner.children.retain(|(_, child)| *child != id);
            }
        }
        for id in self.unmounts {
            if let Some(inst) = instances.get_mut(id) {
                inst.flags.remove(InstanceFlags::UNMOUNTING);
            }
        }
    }
}

type Request = Box<dyn FnOnce(&mut Runtime) -> Result<(), RenderError>>;

/// Pass requests for a runtime from code that cannot borrow it, such as the
/// runtime's own effects.
///
/// Requests run once the pass in progress has flushed, in the order they
/// were made. Requests made by those passes join the end of the queue.
#[derive(Clone, Default)]
pub struct PassQueue {
    requests: Rc<RefCell<VecDeque<Request>>>,
}

impl PassQueue {
    pub fn render<P, S>(&self, root: NodeId, component: &Component<P, S>, props: P)
    where
        P: PartialEq + 'static,
        S: 'static,
    {
        let component = component.clone();
        let request = move |rt: &mut Runtime| rt.render(root, &component, props);
        self.push(Box::new(request));
    }

    pub fn patch_outer<F>(&self, root: NodeId, template: F)
    where
        F: FnOnce(&mut Patcher<'_>) -> Result<(), RenderError> + 'static,
    {
        let request = move |rt: &mut Runtime| rt.patch_outer(root, template);
        self.push(Box::new(request));
    }

    pub fn unmount(&self, root: NodeId) {
        self.push(Box::new(move |rt: &mut Runtime| {
            rt.unmount(root);
            Ok(())
        }));
    }

    pub fn len(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.borrow().is_empty()
    }

    fn push(&self, request: Request) {
        self.requests.borrow_mut().push_back(request);
    }

    fn pop(&self) -> Option<Request> {
        self.requests.borrow_mut().pop_front()
    }

    fn clear(&self) -> usize {
        let mut requests = self.requests.borrow_mut();
        let dropped = requests.len();
        requests.clear();
        dropped
    }
}

impl std::fmt::Debug for PassQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassQueue")
            .field("len", &self.len())
            .finish()
    }
}

type Reporter = Box<dyn FnMut(&EffectError)>;

pub struct Runtime {
    engine: Engine,
    config: RuntimeConfig,
    reporter: Reporter,
    queue: PassQueue,
    draining: bool,
    queued_errors: Vec<RenderError>,
    last_pass: PassStats,
    passes: u64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::with_config(RuntimeConfig::default())
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            engine: Engine {
                tree: HostTree::new(),
                instances: Instances::with_key(),
            },
            config,
            reporter: Box::new(log_effect_error),
            queue: PassQueue::default(),
            draining: false,
            queued_errors: Vec::new(),
            last_pass: PassStats::default(),
            passes: 0,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Replaces the default reporter, which logs at error level.
    pub fn set_error_reporter(&mut self, reporter: impl FnMut(&EffectError) + 'static) {
        self.reporter = Box::new(reporter);
    }

    /// A handle for requesting passes from inside effects and cleanups.
    pub fn queue(&self) -> PassQueue {
        self.queue.clone()
    }

    /// Failures of queued passes since the last call. Queued passes have no
    /// caller to return to, so their errors are kept here and logged.
    pub fn take_queued_errors(&mut self) -> Vec<RenderError> {
        std::mem::take(&mut self.queued_errors)
    }

    pub fn tree(&self) -> &HostTree {
        &self.engine.tree
    }

    /// Direct access for building raw content. Nodes anchoring an instance
    /// should only be changed through passes.
    pub fn tree_mut(&mut self) -> &mut HostTree {
        &mut self.engine.tree
    }

    /// Renders `component` with `props` onto `root`.
    ///
    /// The instance already anchored at `root` is updated if it is of the same
    /// component type (or skipped if `props` are unchanged), and replaced
    /// otherwise. `root` itself is reused as the component's root element.
    pub fn render<P, S>(
        &mut self,
        root: NodeId,
        component: &Component<P, S>,
        props: P,
    ) -> Result<(), RenderError>
    where
        P: PartialEq + 'static,
        S: 'static,
    {
        log::debug!("render `{}` at {root:?}", component.name());
        let erased = component.erased();
        self.run_pass(root, move |out| {
            out.root_component(root, erased, Rc::new(props))
        })
    }

    /// Patches `root` with a plain template. Components it declares are
    /// top-level instances.
    ///
    /// Any instance previously rendered onto `root` itself is unmounted.
    pub fn patch_outer<F>(&mut self, root: NodeId, template: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut Patcher<'_>) -> Result<(), RenderError>,
    {
        log::debug!("patch_outer at {root:?}");
        self.run_pass(root, move |out| out.root_template(root, template))
    }

    /// Destroys every instance anchored at or below `root` and empties it.
    pub fn unmount(&mut self, root: NodeId) {
        let mut journal = PassJournal::default();
        let mut found = Vec::new();
        collect_anchors(&self.engine.tree, root, &mut found);
        for id in found {
            if let Some(inst) = self.engine.instances.get_mut(id) {
                inst.flags.insert(InstanceFlags::UNMOUNTING);
                journal.unmounts.push(id);
            }
        }
        journal.detached = self.engine.tree.truncate_children(root, 0);
        let count = journal.unmounts.len();
        log::debug!("unmount at {root:?}: {count} instance(s)");
        journal.commit(&mut self.engine);
        self.flush(journal);
        self.drain_queue();
    }

    fn run_pass(
        &mut self,
        root: NodeId,
        body: impl FnOnce(&mut Patcher<'_>) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        if !self.engine.tree.contains(root) {
            return Err(RenderError::reconciliation(format!(
                "root {root:?} is not a node of this runtime's tree"
            )));
        }
        let snapshot = self.engine.tree.snapshot(root);
        let mut journal = PassJournal::default();
        let result = {
            let mut patcher = Patcher::new(&mut self.engine, &mut journal, &self.config);
            let result = body(&mut patcher);
            patcher.finish(result)
        };

        if let Err(err) = result {
            log::debug!("pass rolled back: {err}");
            journal.rollback(&mut self.engine, snapshot);
            return Err(err);
        }
        journal.commit(&mut self.engine);
        self.flush(journal);
        self.drain_queue();
        Ok(())
    }

    /// Runs queued passes. Passes started from a queued pass only add to the
    /// queue, so this never nests.
    fn drain_queue(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        let mut ran = 0;
        while let Some(request) = self.queue.pop() {
            if ran == self.config.max_queued_passes {
                let dropped = self.queue.clear() + 1;
                let err = RenderError::reconciliation(format!(
                    "more than {ran} queued passes in a row, dropped {dropped}"
                ));
                log::error!("{err}");
                self.queued_errors.push(err);
                break;
            }
            ran += 1;
            if let Err(err) = request(self) {
                log::error!("queued pass failed: {err}");
                self.queued_errors.push(err);
            }
        }
        self.draining = false;
    }

    fn flush(&mut self, mut journal: PassJournal) {
        let mut stats = journal.stats;
        let unmounts = std::mem::take(&mut journal.unmounts);
        let effects = std::mem::take(&mut journal.effects);
        let flushed = EffectScheduler::new(
            &mut self.engine.instances,
            &mut self.engine.tree,
            &mut *self.reporter,
        )
        .flush(unmounts, effects);
        stats.absorb(flushed);

        for node in journal.detached {
            self.engine.tree.free_subtree(node);
        }
        self.passes += 1;
        self.last_pass = stats;
        log::debug!("pass {} committed: {stats:?}", self.passes);
    }

    // Introspection

    /// The instance whose root element is `node`.
    pub fn instance_at(&self, node: NodeId) -> Option<InstanceId> {
        self.engine.tree.instance(node)
    }

    pub fn instance(&self, id: InstanceId) -> Option<InstanceInfo> {
        self.engine.instances.get(id).map(|inst| inst.info(id))
    }

    /// The committed state of `id`, if it is of type `S`.
    pub fn state<S: 'static>(&self, id: InstanceId) -> Option<Rc<S>> {
        let state = self.engine.instances.get(id)?.state.clone()?;
        state.downcast::<S>().ok()
    }

    /// The child instance `id` owns under `key`.
    pub fn child(&self, id: InstanceId, key: &str) -> Option<InstanceId> {
        let inst = self.engine.instances.get(id)?;
        inst.child(key)
    }

    pub fn instance_count(&self) -> usize {
        self.engine.instances.len()
    }

    /// Instances anchored at or below `root`, in document order, each with its
    /// nesting depth (0 for the outermost).
    pub fn instances_under(&self, root: NodeId) -> Vec<(usize, InstanceInfo)> {
        let tree = &self.engine.tree;
        let mut out = Vec::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            let mut child_depth = depth;
            if let Some(id) = tree.instance(node)
                && let Some(inst) = self.engine.instances.get(id)
            {
                out.push((depth, inst.info(id)));
                child_depth += 1;
            }
            stack.extend(tree.children(node).iter().rev().map(|&c| (c, child_depth)));
        }
        out
    }

    pub fn last_pass(&self) -> PassStats {
        self.last_pass
    }

    /// Number of committed passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.engine.tree.len())
            .field("instances", &self.engine.instances.len())
            .field("passes", &self.passes)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
