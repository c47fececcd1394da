use std::any::Any;
use std::rc::Rc;

use bitflags::bitflags;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::component::{AnyComponent, ComponentId};
use crate::hooks::HookCell;
use crate::host::{Key, NodeId};

new_key_type! {
    pub struct InstanceId;
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct InstanceFlags: u8 {
        /// Committed by at least one successful pass.
        const MOUNTED = 1;
        /// Queued for destruction in the current pass.
        const UNMOUNTING = 1 << 1;
    }
}

/// Live occupant of one (position, key) in the host tree.
pub(crate) struct Instance {
    pub(crate) component: Rc<dyn AnyComponent>,
    pub(crate) key: Option<Key>,
    pub(crate) parent: Option<InstanceId>,
    pub(crate) props: Rc<dyn Any>,
    pub(crate) state: Option<Rc<dyn Any>>,
    pub(crate) cells: Vec<HookCell>,
    /// Owned child instances, in first-declaration order.
    pub(crate) children: SmallVec<[(Key, InstanceId); 4]>,
    pub(crate) anchor: Option<NodeId>,
    pub(crate) flags: InstanceFlags,
    pub(crate) renders: u32,
}

impl Instance {
    pub(crate) fn new(
        component: Rc<dyn AnyComponent>,
        key: Option<Key>,
        parent: Option<InstanceId>,
        props: Rc<dyn Any>,
    ) -> Self {
        Self {
            component,
            key,
            parent,
            props,
            state: None,
            cells: Vec::new(),
            children: SmallVec::new(),
            anchor: None,
            flags: InstanceFlags::empty(),
            renders: 0,
        }
    }

    pub(crate) fn child(&self, key: &str) -> Option<InstanceId> {
        self.children
            .iter()
            .find(|(k, _)| k == key)
            .map(|&(_, id)| id)
    }

    pub(crate) fn info(&self, id: InstanceId) -> InstanceInfo {
        InstanceInfo {
            id,
            component: self.component.id(),
            name: self.component.name().to_string(),
            key: self.key.clone(),
            parent: self.parent,
            anchor: self.anchor,
            hooks: self.cells.len(),
            renders: self.renders,
            mounted: self.flags.contains(InstanceFlags::MOUNTED),
            children: self.children.iter().map(|&(_, c)| c).collect(),
        }
    }
}

pub(crate) type Instances = SlotMap<InstanceId, Instance>;

/// True if `id` or any of its owners is queued for destruction.
pub(crate) fn is_unmounting(instances: &Instances, id: InstanceId) -> bool {
    let mut cur = Some(id);
    while let Some(i) = cur {
        match instances.get(i) {
            Some(inst) if inst.flags.contains(InstanceFlags::UNMOUNTING) => return true,
            Some(inst) => cur = inst.parent,
            None => return true,
        }
    }
    false
}

/// Read-only snapshot of an instance, for tests and tooling.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub component: ComponentId,
    pub name: String,
    pub key: Option<Key>,
    pub parent: Option<InstanceId>,
    pub anchor: Option<NodeId>,
    pub hooks: usize,
    pub renders: u32,
    pub mounted: bool,
    pub children: Vec<InstanceId>,
}
