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

//! The top-level ECS owner: paged entity storage, per-signature entity
//! sets, the shared component allocator, and the despawn queue.
//!
//! All operations here are single-threaded and synchronous. Despawning is
//! two-phase: [`EntityManager::despawn`] only marks entities (cascading to
//! children immediately), and [`EntityManager::end_frame`] performs the
//! actual teardown and recycling once per frame.

use std::any::TypeId;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use egame_core::ecs::{Component, EntityHandle, EntityId, ManagerId, Message};

use crate::allocator::ComponentAllocator;
use crate::entity::Entity;
use crate::entity_set::{EntitySet, EntitySetId};
use crate::serialization::EntitySerializer;
use crate::signature::EntitySignature;

/// Entities per page of manager storage.
pub const ENTITY_PAGE_CAPACITY: usize = 256;

/// Maximum number of entity pages a manager will allocate.
pub const MAX_ENTITY_PAGES: usize = 256;

/// Structural ceiling on concurrently live entities per manager.
/// Exceeding it is a design bug in the calling game, not a runtime
/// condition, and panics.
pub const MAX_LIVE_ENTITIES: usize = ENTITY_PAGE_CAPACITY * MAX_ENTITY_PAGES;

/// Hands out process-unique manager IDs.
static NEXT_MANAGER_ID: AtomicU32 = AtomicU32::new(0);

/// One entity slot. The generation is bumped every time the slot is
/// recycled, invalidating any handle that still points at the old tenant.
struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

/// A fixed block of 256 entity slots with a free-index stack.
struct EntityPage {
    slots: Vec<Slot>,
    avail: Vec<u8>,
}

impl EntityPage {
    fn new() -> Self {
        Self {
            slots: (0..ENTITY_PAGE_CAPACITY)
                .map(|_| Slot {
                    generation: 0,
                    entity: None,
                })
                .collect(),
            // Reversed so slot 0 is handed out first.
            avail: (0..=u8::MAX).rev().collect(),
        }
    }
}

/// The manager's paged entity storage.
///
/// An `EntityId`'s index decomposes as `page = index >> 8`,
/// `slot = index & 0xFF`, so ID-to-record lookup is two array indexings
/// and a generation check — no hashing, and records never move while live.
pub(crate) struct EntityPages {
    pages: Vec<Option<Box<EntityPage>>>,
    live: usize,
}

impl EntityPages {
    fn new() -> Self {
        Self {
            pages: (0..MAX_ENTITY_PAGES).map(|_| None).collect(),
            live: 0,
        }
    }

    fn split(id: EntityId) -> (usize, usize) {
        ((id.index >> 8) as usize, (id.index & 0xFF) as usize)
    }

    pub(crate) fn get(&self, id: EntityId) -> Option<&Entity> {
        let (page, slot) = Self::split(id);
        let slot = &self.pages.get(page)?.as_ref()?.slots[slot];
        if slot.generation != id.generation {
            return None;
        }
        slot.entity.as_ref()
    }

    fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let (page, slot) = Self::split(id);
        let slot = &mut self.pages.get_mut(page)?.as_mut()?.slots[slot];
        if slot.generation != id.generation {
            return None;
        }
        slot.entity.as_mut()
    }

    pub(crate) fn is_alive(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Reserves a free slot, allocating a new page on demand.
    ///
    /// # Panics
    /// Panics once all 256 pages exist and are full.
    fn reserve(&mut self) -> (usize, usize, u32) {
        for (page_index, page) in self.pages.iter_mut().enumerate() {
            if let Some(page) = page {
                if let Some(slot_index) = page.avail.pop() {
                    let slot_index = slot_index as usize;
                    return (page_index, slot_index, page.slots[slot_index].generation);
                }
            }
        }

        let page_index = self
            .pages
            .iter()
            .position(|page| page.is_none())
            .unwrap_or_else(|| {
                panic!("entity capacity exceeded ({MAX_LIVE_ENTITIES} live entities)")
            });
        log::debug!("Allocating entity page {page_index}");
        let page = self.pages[page_index].insert(Box::new(EntityPage::new()));
        let slot_index = page.avail.pop().expect("fresh page has free slots") as usize;
        (page_index, slot_index, page.slots[slot_index].generation)
    }

    fn insert(&mut self, page: usize, slot: usize, entity: Entity) {
        let record = &mut self.pages[page]
            .as_mut()
            .expect("page was allocated by reserve")
            .slots[slot];
        debug_assert!(record.entity.is_none(), "slot is already occupied");
        record.entity = Some(entity);
        self.live += 1;
    }

    /// Removes the entity and recycles its slot, bumping the generation so
    /// stale handles stop resolving.
    fn take(&mut self, id: EntityId) -> Option<Entity> {
        let (page_index, slot_index) = Self::split(id);
        let page = self.pages.get_mut(page_index)?.as_mut()?;
        let slot = &mut page.slots[slot_index];
        if slot.generation != id.generation {
            return None;
        }
        let entity = slot.entity.take()?;
        slot.generation += 1;
        page.avail.push(slot_index as u8);
        self.live -= 1;
        Some(entity)
    }

    pub(crate) fn iter_live(&self) -> impl Iterator<Item = &Entity> {
        self.pages
            .iter()
            .flatten()
            .flat_map(|page| page.slots.iter())
            .filter_map(|slot| slot.entity.as_ref())
    }
}

/// Iterator over the live members of an [`EntitySet`].
///
/// Skips, without yielding, every cached handle that no longer resolves —
/// a consumer never observes a despawned-and-freed entity mid-loop, even
/// before the set itself has been pruned.
pub struct EntitySetIter<'a> {
    handles: &'a [EntityHandle],
    pages: &'a EntityPages,
    manager: ManagerId,
    position: usize,
}

impl Iterator for EntitySetIter<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        while self.position < self.handles.len() {
            let handle = self.handles[self.position];
            self.position += 1;
            if handle.manager == self.manager && self.pages.is_alive(handle.entity) {
                return Some(handle.entity);
            }
        }
        None
    }
}

/// Iterator over an entity's direct children, newest-attached first.
pub struct ChildIter<'a> {
    pages: &'a EntityPages,
    next: Option<EntityId>,
}

impl Iterator for ChildIter<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        let current = self.next.take()?;
        self.next = self.pages.get(current)?.next_sibling;
        Some(current)
    }
}

/// The central owner of one simulation's entities.
///
/// Owns the paged entity storage, the single [`ComponentAllocator`] shared
/// by every entity it manages, every [`EntitySet`] ever requested, and the
/// despawn queue drained by [`end_frame`](Self::end_frame). Managers are
/// independent of each other; the only cross-manager state is the ID
/// counter that keeps their [`ManagerId`]s distinct.
pub struct EntityManager {
    id: ManagerId,
    pages: EntityPages,
    allocator: ComponentAllocator,
    sets: Vec<EntitySet>,
    despawn_queue: Vec<EntityHandle>,
}

impl EntityManager {
    /// Creates an empty manager with a fresh process-unique ID.
    pub fn new() -> Self {
        let id = ManagerId(NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed));
        log::debug!("EntityManager {} created", id.0);
        Self {
            id,
            pages: EntityPages::new(),
            allocator: ComponentAllocator::new(),
            sets: Vec::new(),
            despawn_queue: Vec::new(),
        }
    }

    /// This manager's process-unique ID.
    pub fn id(&self) -> ManagerId {
        self.id
    }

    /// Number of currently live entities (queued-for-despawn entities
    /// still count until the next end-of-frame).
    pub fn live_entities(&self) -> usize {
        self.pages.live
    }

    /// Read access to the shared component allocator, mainly for
    /// footprint inspection.
    pub fn allocator(&self) -> &ComponentAllocator {
        &self.allocator
    }

    // ---- Spawning -------------------------------------------------------

    /// Spawns a root entity with the given signature. Every component in
    /// the signature is allocated and default-constructed before this
    /// returns.
    pub fn spawn(&mut self, signature: &'static EntitySignature) -> EntityId {
        self.spawn_entity(signature, None, None)
    }

    /// Spawns an entity attached to `parent`.
    pub fn spawn_child(&mut self, signature: &'static EntitySignature, parent: EntityId) -> EntityId {
        self.spawn_entity(signature, Some(parent), None)
    }

    /// Fully-general spawn: optional parent link and optional serializer
    /// for scene persistence.
    ///
    /// # Panics
    /// Panics if `parent` is not alive, or if the manager's structural
    /// entity ceiling ([`MAX_LIVE_ENTITIES`]) is exceeded.
    pub fn spawn_entity(
        &mut self,
        signature: &'static EntitySignature,
        parent: Option<EntityId>,
        serializer: Option<&'static dyn EntitySerializer>,
    ) -> EntityId {
        if let Some(parent) = parent {
            assert!(self.pages.is_alive(parent), "parent entity is not alive");
        }

        let (page, slot, generation) = self.pages.reserve();
        let id = EntityId {
            index: ((page as u32) << 8) | slot as u32,
            generation,
        };
        let entity = Entity::initialize(id, self.id, signature, serializer, &mut self.allocator);
        self.pages.insert(page, slot, entity);

        if let Some(parent) = parent {
            self.add_child(parent, id);
        }

        // Keep every existing membership cache current.
        let entity = self.pages.get(id).expect("entity was just inserted");
        for set in &mut self.sets {
            set.maybe_add(entity);
        }

        id
    }

    // ---- Hierarchy ------------------------------------------------------

    /// Attaches `child` to `parent` as the new head of its child list.
    ///
    /// O(1), push-front: siblings are ordered newest-first, and no further
    /// ordering is guaranteed.
    ///
    /// # Panics
    /// Panics if either entity is dead or if `child` already has a parent.
    pub fn add_child(&mut self, parent: EntityId, child: EntityId) {
        let old_head = self
            .pages
            .get(parent)
            .expect("parent entity is not alive")
            .first_child;

        {
            let record = self.pages.get_mut(child).expect("child entity is not alive");
            assert!(record.parent.is_none(), "entity already has a parent");
            record.parent = Some(parent);
            record.prev_sibling = None;
            record.next_sibling = old_head;
        }
        if let Some(head) = old_head {
            if let Some(record) = self.pages.get_mut(head) {
                record.prev_sibling = Some(child);
            }
        }
        self.pages
            .get_mut(parent)
            .expect("parent checked above")
            .first_child = Some(child);
    }

    /// Iterates `entity`'s direct children. Empty for a dead entity.
    pub fn children(&self, entity: EntityId) -> ChildIter<'_> {
        ChildIter {
            pages: &self.pages,
            next: self.pages.get(entity).and_then(|e| e.first_child),
        }
    }

    // ---- Lookup ---------------------------------------------------------

    /// Resolves an ID to the entity record, if it is still alive.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.pages.get(id)
    }

    /// Resolves a weak handle, checking the manager ID as well as the
    /// entity's generation. A handle issued by another manager resolves to
    /// `None` here rather than aliasing an unrelated entity.
    pub fn resolve(&self, handle: EntityHandle) -> Option<&Entity> {
        if handle.manager != self.id {
            return None;
        }
        self.pages.get(handle.entity)
    }

    /// Returns true if the ID refers to a live entity of this manager.
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.pages.is_alive(id)
    }

    /// Borrows the component of type `T` on the given entity.
    ///
    /// `None` means the entity is dead or its signature does not include
    /// `T`; both are ordinary outcomes, never errors.
    pub fn component<T: Component>(&self, id: EntityId) -> Option<&T> {
        let entity = self.pages.get(id)?;
        let reference = entity.component_ref_by_type(TypeId::of::<T>())?;
        // SAFETY: a live entity's refs point at components of exactly the
        // signature's types, constructed at spawn and not freed until the
        // end-of-frame after a despawn. Shared access is fine under &self.
        unsafe { Some(&*self.allocator.resolve(reference).cast::<T>().as_ptr()) }
    }

    /// Mutably borrows the component of type `T` on the given entity.
    pub fn component_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        let entity = self.pages.get(id)?;
        let reference = entity.component_ref_by_type(TypeId::of::<T>())?;
        // SAFETY: as in `component`, plus `&mut self` guarantees no other
        // borrow derived from this manager is alive.
        unsafe { Some(&mut *self.allocator.resolve(reference).cast::<T>().as_ptr()) }
    }

    // ---- Entity sets ----------------------------------------------------

    /// Returns the set caching all entities whose signature contains
    /// `signature`, creating and backfilling it on first request.
    ///
    /// The first request scans every live entity once; afterwards the set
    /// is maintained incrementally on every spawn. Systems typically call
    /// this once and keep the returned ID.
    pub fn entity_set(&mut self, signature: &'static EntitySignature) -> EntitySetId {
        if let Some(position) = self.sets.iter().position(|s| s.signature() == signature) {
            return EntitySetId(position as u32);
        }

        let mut set = EntitySet::new(signature);
        for entity in self.pages.iter_live() {
            set.maybe_add(entity);
        }
        log::debug!(
            "Built entity set over {} component types ({} initial entries)",
            signature.len(),
            set.raw_len()
        );
        self.sets.push(set);
        EntitySetId(self.sets.len() as u32 - 1)
    }

    /// Borrows a set by ID.
    pub fn set(&self, id: EntitySetId) -> &EntitySet {
        &self.sets[id.0 as usize]
    }

    /// Iterates the live members of a set, skipping stale handles.
    pub fn set_entities(&self, id: EntitySetId) -> EntitySetIter<'_> {
        EntitySetIter {
            handles: self.sets[id.0 as usize].handles(),
            pages: &self.pages,
            manager: self.id,
            position: 0,
        }
    }

    // ---- Messages -------------------------------------------------------

    /// Broadcasts a message to every component on `entity` whose type
    /// registered a handler for `M`.
    ///
    /// Best-effort: a dead entity, an entity with no interested
    /// components, or a message type nobody registered for are all silent
    /// no-ops. Returns the number of handlers that ran.
    pub fn send_message<M: Message>(&mut self, entity: EntityId, message: &M) -> usize {
        let Some(record) = self.pages.get(entity) else {
            return 0;
        };
        let entity_id = record.id();
        let message_type = TypeId::of::<M>();
        let payload = NonNull::from(message).cast::<u8>();

        let mut delivered = 0;
        for (index, ty) in record.signature().types().iter().enumerate() {
            let Some(receiver) = ty.receiver() else {
                continue;
            };
            if !receiver.wants(message_type) {
                continue;
            }
            let component = self.allocator.resolve(record.components.get(index));
            // SAFETY: `component` points at a live instance of `ty`, the
            // type the receiver was built for; `payload` is the live `M`
            // the caller handed us; `&mut self` rules out overlapping
            // borrows of the component.
            if unsafe { receiver.dispatch(message_type, component, entity_id, payload) } {
                delivered += 1;
            }
        }
        delivered
    }

    // ---- Despawning -----------------------------------------------------

    /// Marks an entity and all of its descendants for removal.
    ///
    /// The cascade happens now, synchronously, capturing the current child
    /// set; the storage itself is reclaimed at the next
    /// [`end_frame`](Self::end_frame). Idempotent: despawning an already
    /// queued or already dead entity is a no-op. Parents are enqueued
    /// before their children.
    pub fn despawn(&mut self, id: EntityId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let (handle, first_child) = {
                let Some(entity) = self.pages.get_mut(current) else {
                    continue;
                };
                if entity.queued_for_despawn {
                    continue;
                }
                entity.queued_for_despawn = true;
                (entity.handle(), entity.first_child)
            };
            self.despawn_queue.push(handle);

            let mut next = first_child;
            while let Some(child) = next {
                stack.push(child);
                next = self.pages.get(child).and_then(|e| e.next_sibling);
            }
        }
    }

    /// Performs the deferred half of despawning, then prunes every set.
    ///
    /// For each queued entity: drops its components in place, returns
    /// their slots to the allocator, unlinks it from a still-live parent
    /// (skipped when the parent is going down too — the whole subtree is
    /// being discarded), and recycles its entity slot with a generation
    /// bump. Component teardown must not assume sibling or parent
    /// components are still alive; queue order makes no promise there.
    pub fn end_frame(&mut self) {
        let queued = std::mem::take(&mut self.despawn_queue);
        let reclaimed = queued.len();
        for handle in queued {
            debug_assert_eq!(handle.manager, self.id, "foreign handle in despawn queue");
            let Some(entity) = self.pages.take(handle.entity) else {
                continue;
            };
            for (index, ty) in entity.signature().types().iter().enumerate() {
                let reference = entity.components.get(index);
                debug_assert_eq!(
                    self.allocator.type_of(reference).id(),
                    ty.id(),
                    "component list out of sync with signature"
                );
                // SAFETY: the component was constructed at spawn and this
                // is the only teardown path; the slot is freed right after.
                unsafe { ty.drop_in_place(self.allocator.resolve(reference)) };
                self.allocator.free(reference);
            }
            self.unlink_from_parent(&entity);
        }

        let pages = &self.pages;
        let manager = self.id;
        for set in &mut self.sets {
            set.remove_dead(|handle| handle.manager == manager && pages.is_alive(handle.entity));
        }

        if reclaimed > 0 {
            log::trace!("end_frame reclaimed {reclaimed} entities");
        }
    }

    /// Removes a just-torn-down entity from its parent's sibling chain.
    /// Siblings that died in the same frame may already be gone; their
    /// links no longer matter, so missing records are simply skipped.
    fn unlink_from_parent(&mut self, entity: &Entity) {
        let Some(parent_id) = entity.parent else {
            return;
        };
        match self.pages.get(parent_id) {
            Some(parent) if !parent.queued_for_despawn => {}
            // A despawning or dead parent discards the whole subtree; no
            // per-child unlinking needed.
            _ => return,
        }

        if let Some(prev) = entity.prev_sibling {
            if let Some(record) = self.pages.get_mut(prev) {
                record.next_sibling = entity.next_sibling;
            }
        } else {
            let parent = self.pages.get_mut(parent_id).expect("parent checked above");
            if parent.first_child == Some(entity.id()) {
                parent.first_child = entity.next_sibling;
            }
        }
        if let Some(next) = entity.next_sibling {
            if let Some(record) = self.pages.get_mut(next) {
                record.prev_sibling = entity.prev_sibling;
            }
        }
    }

    pub(crate) fn iter_live(&self) -> impl Iterator<Item = &Entity> {
        self.pages.iter_live()
    }
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EntityManager {
    fn drop(&mut self) {
        // Entities never despawned still own live components in the
        // allocator's pages; drop them in place before the pages go away.
        for entity in self.pages.iter_live() {
            for (ty, reference) in entity
                .signature()
                .types()
                .iter()
                .zip(entity.components.iter())
            {
                // SAFETY: each live component is dropped exactly once here;
                // the backing pages are freed afterwards by the allocator.
                unsafe { ty.drop_in_place(self.allocator.resolve(reference)) };
            }
        }
    }
}
