// Copyright 2025 the EGame contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-entity record: component refs, hierarchy links, despawn state.

use std::any::TypeId;

use egame_core::ecs::{EntityHandle, EntityId, ManagerId};

use crate::allocator::{ComponentAllocator, ComponentRef};
use crate::serialization::EntitySerializer;
use crate::signature::EntitySignature;

/// Component refs held directly inside the entity record before spilling
/// to the heap. Most entities have a handful of components, so the common
/// case allocates nothing.
pub(crate) const INLINE_COMPONENT_REFS: usize = 8;

/// The entity's list of component refs, parallel to its signature's type
/// sequence. The first [`INLINE_COMPONENT_REFS`] entries live inline;
/// anything beyond spills into a heap vector.
#[derive(Debug)]
pub(crate) struct ComponentList {
    inline: [ComponentRef; INLINE_COMPONENT_REFS],
    spill: Vec<ComponentRef>,
    len: usize,
}

impl ComponentList {
    pub(crate) fn new() -> Self {
        Self {
            inline: [ComponentRef::NULL; INLINE_COMPONENT_REFS],
            spill: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn push(&mut self, reference: ComponentRef) {
        if self.len < INLINE_COMPONENT_REFS {
            self.inline[self.len] = reference;
        } else {
            self.spill.push(reference);
        }
        self.len += 1;
    }

    /// Fetches the ref at a signature index.
    ///
    /// # Panics
    /// Panics if `index` is outside the signature's component count.
    pub(crate) fn get(&self, index: usize) -> ComponentRef {
        assert!(index < self.len, "component index out of range");
        if index < INLINE_COMPONENT_REFS {
            self.inline[index]
        } else {
            self.spill[index - INLINE_COMPONENT_REFS]
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = ComponentRef> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}

/// One live entity.
///
/// Entities are constructed in place inside their manager's paged storage
/// and identified by `(ManagerId, EntityId)`. The record owns exactly one
/// [`ComponentRef`] per component type in its signature, in the signature's
/// sorted order, and carries the intrusive forest links for the parent /
/// child hierarchy. Sibling lists are doubly linked with a singly-linked
/// child head, so insertion and unlinking are O(1).
pub struct Entity {
    id: EntityId,
    manager: ManagerId,
    signature: &'static EntitySignature,
    pub(crate) components: ComponentList,
    pub(crate) parent: Option<EntityId>,
    pub(crate) first_child: Option<EntityId>,
    pub(crate) prev_sibling: Option<EntityId>,
    pub(crate) next_sibling: Option<EntityId>,
    pub(crate) queued_for_despawn: bool,
    pub(crate) serializer: Option<&'static dyn EntitySerializer>,
}

impl Entity {
    /// Builds the record and allocates + default-constructs one component
    /// per signature type. This is the Unallocated → Initialized
    /// transition; after it returns, every component ref in the record
    /// resolves to a live, default-valued component.
    pub(crate) fn initialize(
        id: EntityId,
        manager: ManagerId,
        signature: &'static EntitySignature,
        serializer: Option<&'static dyn EntitySerializer>,
        allocator: &mut ComponentAllocator,
    ) -> Self {
        let mut components = ComponentList::new();
        for ty in signature.types() {
            let reference = allocator.allocate(ty);
            // SAFETY: the slot was just reserved for this exact type and
            // holds no live value yet.
            unsafe { ty.construct(allocator.resolve(reference)) };
            components.push(reference);
        }

        Self {
            id,
            manager,
            signature,
            components,
            parent: None,
            first_child: None,
            prev_sibling: None,
            next_sibling: None,
            queued_for_despawn: false,
            serializer,
        }
    }

    /// This entity's ID within its manager.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The manager that owns this entity.
    pub fn manager_id(&self) -> ManagerId {
        self.manager
    }

    /// A weak handle to this entity.
    pub fn handle(&self) -> EntityHandle {
        EntityHandle::new(self.manager, self.id)
    }

    /// The canonical signature describing this entity's component set.
    pub fn signature(&self) -> &'static EntitySignature {
        self.signature
    }

    /// The entity's parent, if it has one.
    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    /// Head of this entity's child list (most recently attached child).
    pub fn first_child(&self) -> Option<EntityId> {
        self.first_child
    }

    /// Next entity in the parent's sibling chain.
    pub fn next_sibling(&self) -> Option<EntityId> {
        self.next_sibling
    }

    /// True once [`despawn`](crate::manager::EntityManager::despawn) has
    /// marked this entity; storage is reclaimed at the next end-of-frame.
    pub fn is_queued_for_despawn(&self) -> bool {
        self.queued_for_despawn
    }

    /// The serializer this entity was spawned with, if any. Entities
    /// without one are skipped by scene serialization.
    pub fn serializer(&self) -> Option<&'static dyn EntitySerializer> {
        self.serializer
    }

    /// Looks up the ref for a component type in this entity's signature.
    ///
    /// `None` is the ordinary "this entity does not have that component"
    /// answer. For a type that is present, the ref is always valid: the
    /// component was constructed when the entity was initialized.
    pub(crate) fn component_ref_by_type(&self, type_id: TypeId) -> Option<ComponentRef> {
        self.signature
            .component_index(type_id)
            .map(|index| self.components.get(index))
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("manager", &self.manager)
            .field("signature", &self.signature)
            .field("parent", &self.parent)
            .field("queued_for_despawn", &self.queued_for_despawn)
            .field("serializer", &self.serializer.map(|s| s.key()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_ref(slot: u16) -> ComponentRef {
        ComponentRef {
            pool: 0,
            page: 0,
            slot,
        }
    }

    #[test]
    fn component_list_stays_inline_up_to_capacity() {
        let mut list = ComponentList::new();
        for i in 0..INLINE_COMPONENT_REFS {
            list.push(dummy_ref(i as u16));
        }
        assert_eq!(list.len(), INLINE_COMPONENT_REFS);
        assert!(list.spill.is_empty());
        for i in 0..INLINE_COMPONENT_REFS {
            assert_eq!(list.get(i).slot, i as u16);
        }
    }

    #[test]
    fn component_list_spills_past_inline_capacity() {
        let mut list = ComponentList::new();
        for i in 0..12 {
            list.push(dummy_ref(i as u16));
        }
        assert_eq!(list.len(), 12);
        assert_eq!(list.spill.len(), 12 - INLINE_COMPONENT_REFS);
        let collected: Vec<u16> = list.iter().map(|r| r.slot).collect();
        assert_eq!(collected, (0..12).collect::<Vec<u16>>());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn component_list_rejects_out_of_range_index() {
        let list = ComponentList::new();
        let _ = list.get(0);
    }
}
