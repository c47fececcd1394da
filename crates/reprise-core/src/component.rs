//! # Components
//!
//! A component is a state-derivation function (`props -> state`) paired with a
//! template that emits tree instructions from that state.
//!
//! ```rust
//! use reprise_core::*;
//!
//! #[derive(Clone, PartialEq)]
//! struct Props {
//!     value: String,
//! }
//!
//! let hashtag = component_factory(|p: &Props| Ok(format!("#{}", p.value)));
//!
//! let as_span = hashtag.with_template(|s: &String, out: &mut Patcher<'_>| {
//!     out.element_open("span", None);
//!     out.text(s);
//!     out.element_close();
//!     Ok(())
//! });
//! let as_div = hashtag.with_template(|s: &String, out: &mut Patcher<'_>| {
//!     out.element_open("div", None);
//!     out.text(s);
//!     out.element_close();
//!     Ok(())
//! });
//!
//! // same behavior, different component types
//! assert_ne!(as_span.id(), as_div.id());
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Patcher, RenderError};

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a component type. Two components are the same type only if
/// they share this id, never by structural comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    fn next() -> Self {
        Self(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Emits the instructions for one component instance.
///
/// Must open exactly one root element.
pub trait Template<S>: 'static {
    fn render(&self, state: &S, out: &mut Patcher<'_>) -> Result<(), RenderError>;
}

impl<S, F> Template<S> for F
where
    F: Fn(&S, &mut Patcher<'_>) -> Result<(), RenderError> + 'static,
{
    fn render(&self, state: &S, out: &mut Patcher<'_>) -> Result<(), RenderError> {
        self(state, out)
    }
}

type StateFn<P, S> = Rc<dyn Fn(&P) -> anyhow::Result<S>>;

struct ComponentDef<P, S> {
    id: ComponentId,
    name: Cow<'static, str>,
    state_fn: StateFn<P, S>,
    template: Rc<dyn Template<S>>,
}

/// Immutable component descriptor. Cloning keeps identity.
pub struct Component<P, S> {
    def: Rc<ComponentDef<P, S>>,
}

impl<P, S> Clone for Component<P, S> {
    fn clone(&self) -> Self {
        Self {
            def: self.def.clone(),
        }
    }
}

impl<P, S> std::fmt::Debug for Component<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.def.id)
            .field("name", &self.def.name)
            .finish()
    }
}

impl<P, S> Component<P, S> {
    pub fn id(&self) -> ComponentId {
        self.def.id
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Diagnostic name used in logs, errors and devtools. Keeps identity.
    pub fn named(self, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            def: Rc::new(ComponentDef {
                id: self.def.id,
                name: name.into(),
                state_fn: self.def.state_fn.clone(),
                template: self.def.template.clone(),
            }),
        }
    }
}

impl<P: PartialEq + 'static, S: 'static> Component<P, S> {
    pub(crate) fn erased(&self) -> Rc<dyn AnyComponent> {
        self.def.clone()
    }
}

/// Builds a component from a state-derivation function and a template.
pub fn create_component<P, S, F, T>(state_fn: F, template: T) -> Component<P, S>
where
    P: PartialEq + 'static,
    S: 'static,
    F: Fn(&P) -> anyhow::Result<S> + 'static,
    T: Fn(&S, &mut Patcher<'_>) -> Result<(), RenderError> + 'static,
{
    component_factory(state_fn).with_template(template)
}

/// A state-derivation function waiting for its template.
pub fn component_factory<P, S, F>(state_fn: F) -> ComponentFactory<P, S>
where
    P: PartialEq + 'static,
    S: 'static,
    F: Fn(&P) -> anyhow::Result<S> + 'static,
{
    ComponentFactory {
        state_fn: Rc::new(state_fn),
    }
}

pub struct ComponentFactory<P, S> {
    state_fn: StateFn<P, S>,
}

impl<P: PartialEq + 'static, S: 'static> ComponentFactory<P, S> {
    /// Every call yields a distinct component type sharing the same behavior.
    pub fn with_template<T>(&self, template: T) -> Component<P, S>
    where
        T: Fn(&S, &mut Patcher<'_>) -> Result<(), RenderError> + 'static,
    {
        self.with_template_impl(template)
    }

    /// Like [`with_template`](Self::with_template) for non-closure templates.
    ///
    /// Until [`Component::named`] is called the component goes by its state
    /// type and id, e.g. `TextProps@7`.
    pub fn with_template_impl(&self, template: impl Template<S>) -> Component<P, S> {
        let id = ComponentId::next();
        Component {
            def: Rc::new(ComponentDef {
                id,
                name: Cow::Owned(format!("{}@{}", short_type_name::<S>(), id.0)),
                state_fn: self.state_fn.clone(),
                template: Rc::new(template),
            }),
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Type-erased view of a component, stored on instances.
pub(crate) trait AnyComponent {
    fn id(&self) -> ComponentId;
    fn name(&self) -> &str;
    fn derive(&self, props: &dyn Any) -> anyhow::Result<Rc<dyn Any>>;
    fn props_eq(&self, a: &dyn Any, b: &dyn Any) -> bool;
    fn render(&self, state: &dyn Any, out: &mut Patcher<'_>) -> Result<(), RenderError>;
}

impl<P: PartialEq + 'static, S: 'static> AnyComponent for ComponentDef<P, S> {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn derive(&self, props: &dyn Any) -> anyhow::Result<Rc<dyn Any>> {
        let Some(props) = props.downcast_ref::<P>() else {
            anyhow::bail!("props of unexpected type for `{}`", self.name);
        };
        let state = (self.state_fn)(props)?;
        Ok(Rc::new(state))
    }

    fn props_eq(&self, a: &dyn Any, b: &dyn Any) -> bool {
        match (a.downcast_ref::<P>(), b.downcast_ref::<P>()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn render(&self, state: &dyn Any, out: &mut Patcher<'_>) -> Result<(), RenderError> {
        let Some(state) = state.downcast_ref::<S>() else {
            let msg = format!("state of unexpected type for `{}`", self.name);
            return Err(RenderError::reconciliation(msg));
        };
        self.template.render(state, out)
    }
}
