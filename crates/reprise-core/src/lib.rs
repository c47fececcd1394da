//! # Components, instances and effects
//!
//! Reprise keeps component instances alive across re-renders of an
//! incremental tree renderer. There are four main pieces:
//!
//! - `Component<P, S>` - a state-derivation function plus a template.
//! - hooks (`use_effect*`, `use_ref`) - per-instance cells, order-based.
//! - the patcher - reconciles template instructions against the host tree and
//!   decides which instances are reused, mounted or unmounted.
//! - the effect scheduler - runs cleanups and effects once a pass commits.
//!
//! ## Rendering
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use reprise_core::*;
//!
//! let mounts = Rc::new(Cell::new(0));
//! let item = {
//!     let mounts = mounts.clone();
//!     create_component(
//!         move |label: &String| {
//!             let mounts = mounts.clone();
//!             use_effect_once(move || {
//!                 mounts.set(mounts.get() + 1);
//!                 on_unmount(move || mounts.set(mounts.get() - 1))
//!             })?;
//!             Ok(label.clone())
//!         },
//!         |label: &String, out: &mut Patcher<'_>| {
//!             out.element_open("li", None);
//!             out.text(label);
//!             out.element_close();
//!             Ok(())
//!         },
//!     )
//! };
//!
//! fn list(rt: &mut Runtime, root: NodeId, item: &Component<String, String>, keys: &[&str]) {
//!     rt.patch_outer(root, |out| {
//!         out.element_open("ul", None);
//!         for &k in keys {
//!             out.component(item, k, k.to_string())?;
//!         }
//!         out.element_close();
//!         Ok(())
//!     })
//!     .unwrap();
//! }
//!
//! let mut rt = Runtime::new();
//! let root = rt.tree_mut().create_element("ul");
//!
//! list(&mut rt, root, &item, &["a", "b"]);
//! assert_eq!(mounts.get(), 2);
//!
//! // reordered: both instances survive
//! list(&mut rt, root, &item, &["b", "a"]);
//! assert_eq!(mounts.get(), 2);
//! assert_eq!(rt.tree().inner_html(root), "<li>b</li><li>a</li>");
//!
//! // removed: its cleanup runs
//! list(&mut rt, root, &item, &["a"]);
//! assert_eq!(mounts.get(), 1);
//! ```
//!
//! ## Passes
//!
//! A pass either commits completely or not at all. If a state derivation
//! fails, or the template emits malformed instructions, the host tree is
//! restored, no instance changes are kept and no effects run:
//!
//! ```rust
//! use reprise_core::*;
//!
//! let picky = create_component(
//!     |n: &i32| {
//!         anyhow::ensure!(*n >= 0, "negative input");
//!         Ok(*n)
//!     },
//!     |n: &i32, out: &mut Patcher<'_>| {
//!         out.element_open("p", None);
//!         out.text(&n.to_string());
//!         out.element_close();
//!         Ok(())
//!     },
//! );
//!
//! let mut rt = Runtime::new();
//! let root = rt.tree_mut().create_element("p");
//! rt.render(root, &picky, 1).unwrap();
//!
//! let err = rt.render(root, &picky, -1).unwrap_err();
//! assert!(matches!(err, RenderError::StateDerivation { .. }));
//! assert_eq!(rt.tree().outer_html(root), "<p>1</p>");
//! ```
//!
//! ## Effects
//!
//! Effects never run during a pass. They are queued by hooks and flushed after
//! commit: unmount cleanups first, then new effects in the order their
//! instances were derived (parents before children). Errors from effects are
//! handed to the runtime's error reporter and do not stop the flush.

pub mod component;
pub mod effects;
pub mod error;
pub mod hooks;
pub mod host;
pub mod instance;
pub mod patch;
pub mod prelude;
mod reconcile;
pub mod runtime;


pub use component::{
    Component, ComponentFactory, ComponentId, Template, component_factory, create_component,
};
pub use effects::{Dispose, FlushStats, IntoCleanup, on_unmount};
pub use error::{EffectError, EffectPhase, HookError, RenderError};
pub use hooks::{use_effect, use_effect_once, use_effect_with, use_ref};
pub use host::{HostTree, Key, Node, NodeId, NodeKind};
pub use instance::{InstanceFlags, InstanceId, InstanceInfo};
pub use patch::Patcher;
pub use runtime::{PassQueue, PassStats, Runtime, RuntimeConfig};
