//! # Effects and cleanup
//!
//! Hooks never run effect bodies while a template is still emitting
//! instructions. They queue an effect record instead; after the pass has
//! committed, the scheduler flushes in two phases:
//!
//! 1. unmount cleanups for every instance removed in the pass (an instance's
//!    own cleanups, in hook order, then its children, recursively);
//! 2. queued effects, in the order their instances were derived. Parents
//!    derive before the children their templates declare, and siblings derive
//!    in declaration order, so the flush follows a pre-order walk of the
//!    declared tree.
//!
//! A failing effect or cleanup (an `Err` or a panic) is reported and the
//! flush carries on.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use crate::error::panic_message;
use crate::host::HostTree;
use crate::instance::{InstanceId, Instances};
use crate::{EffectError, EffectPhase};

#[derive(Clone)]
pub struct Dispose(Rc<RefCell<Option<Box<dyn FnOnce()>>>>);

impl Dispose {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Rc::new(RefCell::new(Some(Box::new(f)))))
    }

    /// Runs at most once (safe to call multiple times).
    pub fn run(&self) {
        let f = self.0.borrow_mut().take();
        if let Some(f) = f {
            f()
        }
    }

    pub fn is_spent(&self) -> bool {
        self.0.borrow().is_none()
    }
}

impl std::fmt::Debug for Dispose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Dispose").field(&!self.is_spent()).finish()
    }
}

/// Helper to return a cleanup from an effect.
pub fn on_unmount(f: impl FnOnce() + 'static) -> Dispose {
    Dispose::new(f)
}

/// What an effect body may return.
pub trait IntoCleanup {
    fn into_cleanup(self) -> anyhow::Result<Option<Dispose>>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> anyhow::Result<Option<Dispose>> {
        Ok(None)
    }
}

impl IntoCleanup for Dispose {
    fn into_cleanup(self) -> anyhow::Result<Option<Dispose>> {
        Ok(Some(self))
    }
}

impl IntoCleanup for Option<Dispose> {
    fn into_cleanup(self) -> anyhow::Result<Option<Dispose>> {
        Ok(self)
    }
}

impl<T: IntoCleanup> IntoCleanup for anyhow::Result<T> {
    fn into_cleanup(self) -> anyhow::Result<Option<Dispose>> {
        self?.into_cleanup()
    }
}

pub(crate) type EffectCallback = Box<dyn FnOnce() -> anyhow::Result<Option<Dispose>>>;

/// An effect queued by a hook during derivation.
pub(crate) struct EffectRecord {
    pub(crate) instance: InstanceId,
    pub(crate) hook_index: usize,
    /// Dependencies to store once the effect has run.
    pub(crate) deps: Option<Box<dyn Any>>,
    pub(crate) callback: EffectCallback,
}

/// Counters for one flush.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub unmounted: usize,
    pub effects_run: usize,
    pub cleanups_run: usize,
    pub errors: usize,
}

pub(crate) struct EffectScheduler<'a> {
    instances: &'a mut Instances,
    tree: &'a mut HostTree,
    report: &'a mut dyn FnMut(&EffectError),
    stats: FlushStats,
}

impl<'a> EffectScheduler<'a> {
    pub(crate) fn new(
        instances: &'a mut Instances,
        tree: &'a mut HostTree,
        report: &'a mut dyn FnMut(&EffectError),
    ) -> Self {
        Self {
            instances,
            tree,
            report,
            stats: FlushStats::default(),
        }
    }

    pub(crate) fn flush(
        mut self,
        unmounts: Vec<InstanceId>,
        effects: Vec<EffectRecord>,
    ) -> FlushStats {
        for id in unmounts {
            self.destroy(id);
        }
        for record in effects {
            self.run_effect(record);
        }
        self.stats
    }

    /// Runs the instance's cleanups, then destroys its children the same way.
    fn destroy(&mut self, id: InstanceId) {
        let Some(mut inst) = self.instances.remove(id) else {
            return;
        };
        log::trace!("unmount {}#{:?}", inst.component.name(), inst.key);
        self.stats.unmounted += 1;
        for (index, cell) in inst.cells.iter_mut().enumerate() {
            if let Some(cleanup) = cell.take_cleanup() {
                self.run_cleanup(id, inst.component.name(), index, cleanup);
            }
        }
        if let Some(anchor) = inst.anchor
            && self.tree.instance(anchor) == Some(id)
        {
            self.tree.set_instance(anchor, None);
        }
        for (_, child) in std::mem::take(&mut inst.children) {
            self.destroy(child);
        }
    }

    fn run_effect(&mut self, record: EffectRecord) {
        let EffectRecord {
            instance,
            hook_index,
            deps,
            callback,
        } = record;
        let Some(inst) = self.instances.get_mut(instance) else {
            return;
        };
        let name = inst.component.name().to_string();
        let Some(cell) = inst.cells.get_mut(hook_index) else {
            return;
        };

        if let Some(prev) = cell.take_cleanup() {
            self.stats.cleanups_run += 1;
            if let Err(message) = guarded(|| prev.run()) {
                self.stats.errors += 1;
                (self.report)(&EffectError {
                    instance,
                    component: name.clone(),
                    hook_index,
                    phase: EffectPhase::Cleanup,
                    message,
                });
            }
        }

        self.stats.effects_run += 1;
        let outcome = guarded(callback).and_then(|r| r.map_err(|e| format!("{e:#}")));

        if let Some(cell) = self
            .instances
            .get_mut(instance)
            .and_then(|inst| inst.cells.get_mut(hook_index))
        {
            cell.commit(deps, outcome.as_ref().ok().cloned().flatten());
        }

        if let Err(message) = outcome {
            self.stats.errors += 1;
            (self.report)(&EffectError {
                instance,
                component: name,
                hook_index,
                phase: EffectPhase::Effect,
                message,
            });
        }
    }

    fn run_cleanup(
        &mut self,
        instance: InstanceId,
        component: &str,
        hook_index: usize,
        cleanup: Dispose,
    ) {
        self.stats.cleanups_run += 1;
        if let Err(message) = guarded(|| cleanup.run()) {
            self.stats.errors += 1;
            (self.report)(&EffectError {
                instance,
                component: component.to_string(),
                hook_index,
                phase: EffectPhase::Cleanup,
                message,
            });
        }
    }
}

fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

/// Default reporter: log and carry on.
pub(crate) fn log_effect_error(err: &EffectError) {
    log::error!("{err}");
}
