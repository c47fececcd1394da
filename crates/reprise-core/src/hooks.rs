//! # Hooks
//!
//! Hooks are order-based: the Nth hook called by a component's state
//! derivation always refers to the Nth hook cell of that instance. A
//! component must call the same hooks in the same order on every render.
//!
//! Hooks are only valid while a state derivation is running. The runtime
//! installs a hook frame for the instance being derived and removes it as
//! soon as the call returns; outside of that window every hook fails with
//! [`HookError::InvalidContext`].
//!
//! ```rust
//! use reprise_core::*;
//!
//! let counter = create_component(
//!     |p: &u32| {
//!         let seen = use_ref(|| 0u32)?;
//!         *seen.borrow_mut() += 1;
//!
//!         use_effect_once(|| {
//!             log::info!("mounted");
//!             on_unmount(|| log::info!("unmounted"))
//!         })?;
//!         use_effect_with(*p, move || log::info!("value changed"))?;
//!         Ok(*p)
//!     },
//!     |v: &u32, out: &mut Patcher<'_>| {
//!         out.element_open("span", None);
//!         out.text(&v.to_string());
//!         out.element_close();
//!         Ok(())
//!     },
//! );
//!
//! let mut rt = Runtime::new();
//! let root = rt.tree_mut().create_element("span");
//! rt.render(root, &counter, 1).unwrap();
//! assert_eq!(rt.tree().outer_html(root), "<span>1</span>");
//!
//! // outside of a render there is no current instance
//! assert_eq!(use_effect(|| ()), Err(HookError::InvalidContext));
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::effects::{EffectRecord, IntoCleanup};
use crate::{Dispose, HookError, InstanceId};

thread_local! {
    static CURRENT_FRAME: RefCell<Option<HookFrame>> = const { RefCell::new(None) };
}

/// One hook cell. Cell `i` always holds the same kind of hook.
pub(crate) enum HookCell {
    Effect {
        deps: Option<Box<dyn Any>>,
        cleanup: Option<Dispose>,
    },
    Once {
        cleanup: Option<Dispose>,
    },
    Ref(Box<dyn Any>),
}

impl HookCell {
    fn kind(&self) -> &'static str {
        match self {
            HookCell::Effect { .. } => "use_effect",
            HookCell::Once { .. } => "use_effect_once",
            HookCell::Ref(_) => "use_ref",
        }
    }

    pub(crate) fn take_cleanup(&mut self) -> Option<Dispose> {
        match self {
            HookCell::Effect { cleanup, .. } | HookCell::Once { cleanup } => cleanup.take(),
            HookCell::Ref(_) => None,
        }
    }

    /// Stores what a flushed effect produced.
    pub(crate) fn commit(&mut self, new_deps: Option<Box<dyn Any>>, new_cleanup: Option<Dispose>) {
        match self {
            HookCell::Effect { deps, cleanup } => {
                *deps = new_deps;
                *cleanup = new_cleanup;
            }
            HookCell::Once { cleanup } => *cleanup = new_cleanup,
            HookCell::Ref(_) => {}
        }
    }
}

/// The hook store of the instance whose state derivation is running.
pub(crate) struct HookFrame {
    pub(crate) instance: InstanceId,
    pub(crate) cells: Vec<HookCell>,
    pub(crate) cursor: usize,
    pub(crate) first_render: bool,
    pub(crate) queued: Vec<EffectRecord>,
    pub(crate) violation: Option<HookError>,
}

impl HookFrame {
    pub(crate) fn new(instance: InstanceId, cells: Vec<HookCell>, first_render: bool) -> Self {
        Self {
            instance,
            cells,
            cursor: 0,
            first_render,
            queued: Vec::new(),
            violation: None,
        }
    }

    /// Claims the next cell, creating it on the first render.
    fn claim(
        &mut self,
        kind: &'static str,
        init: impl FnOnce() -> HookCell,
    ) -> Result<usize, HookError> {
        let index = self.cursor;
        self.cursor += 1;
        let err = match self.cells.get(index) {
            Some(cell) if cell.kind() == kind => return Ok(index),
            Some(cell) => HookError::OrderChanged {
                index,
                expected: cell.kind(),
                found: kind,
            },
            None if self.first_render => {
                self.cells.push(init());
                return Ok(index);
            }
            None => HookError::CountChanged {
                expected: self.cells.len(),
                found: index + 1,
            },
        };
        log::warn!("{err}");
        self.violation.get_or_insert(err.clone());
        Err(err)
    }

    fn queue<F, C>(&mut self, hook_index: usize, deps: Option<Box<dyn Any>>, effect: F)
    where
        F: FnOnce() -> C + 'static,
        C: IntoCleanup,
    {
        self.queued.push(EffectRecord {
            instance: self.instance,
            hook_index,
            deps,
            callback: Box::new(move || effect().into_cleanup()),
        });
    }
}

/// Runs `f` with `frame` as the current hook frame and hands the frame back.
///
/// The previous frame (if any) is restored afterwards, so a nested pass on
/// another runtime cannot clobber an outer derivation.
pub(crate) fn with_frame<R>(frame: HookFrame, f: impl FnOnce() -> R) -> (R, Option<HookFrame>) {
    let prev = CURRENT_FRAME.with(|c| c.replace(Some(frame)));
    let out = f();
    let frame = CURRENT_FRAME.with(|c| c.replace(prev));
    (out, frame)
}

fn with_current<R>(f: impl FnOnce(&mut HookFrame) -> Result<R, HookError>) -> Result<R, HookError> {
    CURRENT_FRAME.with(|c| match c.borrow_mut().as_mut() {
        Some(frame) => f(frame),
        None => Err(HookError::InvalidContext),
    })
}

/// Registers an effect that runs after every committed render of this
/// instance. A cleanup returned by the previous run is invoked first, and once
/// more when the instance unmounts.
pub fn use_effect<F, C>(effect: F) -> Result<(), HookError>
where
    F: FnOnce() -> C + 'static,
    C: IntoCleanup,
{
    with_current(|frame| {
        let index = frame.claim("use_effect", || HookCell::Effect {
            deps: None,
            cleanup: None,
        })?;
        frame.queue(index, None, effect);
        Ok(())
    })
}

/// Like [`use_effect`], but only re-runs when `deps` differs from the value
/// seen by the last run. Tuples compare element by element.
pub fn use_effect_with<D, F, C>(deps: D, effect: F) -> Result<(), HookError>
where
    D: PartialEq + 'static,
    F: FnOnce() -> C + 'static,
    C: IntoCleanup,
{
    with_current(|frame| {
        let index = frame.claim("use_effect", || HookCell::Effect {
            deps: None,
            cleanup: None,
        })?;
        let changed = match &frame.cells[index] {
            HookCell::Effect {
                deps: Some(prev), ..
            } => prev.downcast_ref::<D>() != Some(&deps),
            _ => true,
        };
        if changed {
            frame.queue(index, Some(Box::new(deps)), effect);
        }
        Ok(())
    })
}

/// Registers an effect that runs once, after the instance's first committed
/// render. Its cleanup runs once, at unmount.
pub fn use_effect_once<F, C>(effect: F) -> Result<(), HookError>
where
    F: FnOnce() -> C + 'static,
    C: IntoCleanup,
{
    with_current(|frame| {
        let index = frame.claim("use_effect_once", || HookCell::Once { cleanup: None })?;
        if frame.first_render {
            frame.queue(index, None, effect);
        }
        Ok(())
    })
}

/// A persistent slot, initialised on the first render and shared afterwards.
pub fn use_ref<T: 'static>(init: impl FnOnce() -> T) -> Result<Rc<RefCell<T>>, HookError> {
    let existing = with_current(|frame| {
        if frame.cursor >= frame.cells.len() {
            return Ok(None);
        }
        let index = frame.claim("use_ref", || HookCell::Ref(Box::new(())))?;
        if let HookCell::Ref(slot) = &frame.cells[index]
            && let Some(rc) = slot.downcast_ref::<Rc<RefCell<T>>>()
        {
            return Ok(Some(rc.clone()));
        }
        let err = HookError::OrderChanged {
            index,
            expected: "use_ref",
            found: std::any::type_name::<T>(),
        };
        frame.violation.get_or_insert(err.clone());
        Err(err)
    })?;
    if let Some(rc) = existing {
        return Ok(rc);
    }

    // `init` runs without the frame borrowed, so it may not call hooks itself
    // but can do anything else.
    let rc = Rc::new(RefCell::new(init()));
    with_current(|frame| {
        frame.claim("use_ref", || HookCell::Ref(Box::new(rc.clone())))?;
        Ok(rc)
    })
}
