pub use crate::component::{Component, ComponentFactory, component_factory, create_component};
pub use crate::effects::{Dispose, on_unmount};
pub use crate::error::{HookError, RenderError};
pub use crate::hooks::{use_effect, use_effect_once, use_effect_with, use_ref};
pub use crate::host::{HostTree, NodeId};
pub use crate::patch::Patcher;
pub use crate::runtime::{PassQueue, Runtime, RuntimeConfig};
