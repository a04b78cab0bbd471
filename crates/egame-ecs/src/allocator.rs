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

//! Paged slab storage for component instances.
//!
//! Each distinct component type gets its own pool of fixed-capacity pages.
//! A page is one raw allocation that never moves, so a [`ComponentRef`]
//! handed out for a slot stays valid until that slot is explicitly freed —
//! churn elsewhere in the pool can never invalidate it. Freed slots go onto
//! a per-page free-index stack and are reused before any new page is
//! allocated, which keeps the byte footprint stable under steady-state
//! spawn/despawn load.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::any::TypeId;
use std::ptr::NonNull;

use egame_core::ecs::ComponentType;

/// Capacity of the first page allocated for a component type.
const FIRST_PAGE_CAPACITY: u16 = 4;

/// Operating cap on page capacity. Slot indices are 16-bit, so the hard
/// limit is 65536; 1024 keeps individual allocations and free stacks small.
const MAX_PAGE_CAPACITY: u16 = 1024;

/// A stable handle to one component instance's storage.
///
/// The triple addresses pool, page, and slot; all three indices are stable
/// for the life of the allocation, so resolution is pure arithmetic. A ref
/// is valid from the moment its component is constructed until the slot is
/// freed during despawn processing — never before, never after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentRef {
    pub(crate) pool: u16,
    pub(crate) page: u16,
    pub(crate) slot: u16,
}

impl ComponentRef {
    /// Sentinel value used to fill unused inline storage in entity records.
    pub(crate) const NULL: ComponentRef = ComponentRef {
        pool: u16::MAX,
        page: u16::MAX,
        slot: u16::MAX,
    };
}

/// One fixed-capacity block of storage for a single component type.
///
/// The block is allocated once and never reallocated or moved; slot `i`
/// lives at byte offset `i * component_size`. Freed slot indices are pushed
/// onto `avail` and popped on the next allocation. The page does not track
/// which slots hold live components — constructing and dropping instances
/// is its caller's responsibility.
struct ComponentPage {
    storage: NonNull<u8>,
    /// `None` for zero-sized component types, which need no real allocation.
    layout: Option<Layout>,
    capacity: u16,
    avail: Vec<u16>,
}

impl ComponentPage {
    fn new(ty: &'static ComponentType, capacity: u16) -> Self {
        let bytes = ty.size() * capacity as usize;
        let (storage, layout) = if bytes == 0 {
            // Zero-sized components still get distinct slot indices, but
            // share one dangling, correctly-aligned pointer.
            (
                NonNull::new(ty.align() as *mut u8).expect("alignment is never zero"),
                None,
            )
        } else {
            let layout = Layout::from_size_align(bytes, ty.align())
                .expect("component layout exceeds address space");
            // SAFETY: `layout` has non-zero size here.
            let ptr = unsafe { alloc(layout) };
            let Some(ptr) = NonNull::new(ptr) else {
                handle_alloc_error(layout);
            };
            (ptr, Some(layout))
        };

        Self {
            storage,
            layout,
            capacity,
            // Reversed so that `pop` hands out slot 0 first.
            avail: (0..capacity).rev().collect(),
        }
    }

    fn available(&self) -> usize {
        self.avail.len()
    }
}

impl Drop for ComponentPage {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: `storage` was allocated with exactly this layout and
            // is freed exactly once. Live components must already have been
            // dropped in place by the allocator's owner.
            unsafe { dealloc(self.storage.as_ptr(), layout) };
        }
    }
}

// SAFETY: a page owns its allocation outright, and the `Component` contract
// requires every stored type to be Send + Sync.
unsafe impl Send for ComponentPage {}
unsafe impl Sync for ComponentPage {}

/// All pages belonging to one component type.
struct Pool {
    ty: &'static ComponentType,
    pages: Vec<ComponentPage>,
}

/// Aggregate footprint numbers for one pool or the whole allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Number of allocated pages.
    pub pages: usize,
    /// Total slot capacity across those pages.
    pub slots: usize,
    /// Total bytes reserved for component storage.
    pub bytes: usize,
}

/// The slab allocator shared by all entities of one `EntityManager`.
///
/// Pools are created on demand, one per distinct component type, found by
/// binary search over a sorted `TypeId` index. The pool list itself is
/// append-only, so the pool position baked into a [`ComponentRef`] never
/// shifts.
pub struct ComponentAllocator {
    pools: Vec<Pool>,
    /// Sorted `(TypeId, pool position)` pairs for insert-if-missing lookup.
    index: Vec<(TypeId, u16)>,
}

impl ComponentAllocator {
    /// Creates an allocator with no pools.
    pub fn new() -> Self {
        Self {
            pools: Vec::new(),
            index: Vec::new(),
        }
    }

    fn pool_position(&mut self, ty: &'static ComponentType) -> u16 {
        match self.index.binary_search_by_key(&ty.id(), |(id, _)| *id) {
            Ok(found) => self.index[found].1,
            Err(insert_at) => {
                let position = u16::try_from(self.pools.len())
                    .expect("more than 65536 distinct component types");
                self.pools.push(Pool {
                    ty,
                    pages: Vec::new(),
                });
                self.index.insert(insert_at, (ty.id(), position));
                position
            }
        }
    }

    /// Reserves one slot of *uninitialized* storage for a component of the
    /// given type.
    ///
    /// The caller must construct the component into the slot immediately
    /// (via [`ComponentType::construct`] or a typed write) before the ref is
    /// treated as live. Slots are taken from the newest page with free
    /// capacity; when every page is full a new page is allocated with twice
    /// the previous capacity, starting at 4 and capped at 1024 slots.
    pub fn allocate(&mut self, ty: &'static ComponentType) -> ComponentRef {
        let pool_position = self.pool_position(ty);
        let pool = &mut self.pools[pool_position as usize];

        // Newest-first: recently allocated pages have the most free slots.
        let page_position = match pool.pages.iter().rposition(|p| p.available() > 0) {
            Some(found) => found,
            None => {
                let capacity = pool
                    .pages
                    .last()
                    .map(|p| (p.capacity * 2).min(MAX_PAGE_CAPACITY))
                    .unwrap_or(FIRST_PAGE_CAPACITY);
                log::trace!(
                    "Allocating component page for {} ({} slots)",
                    ty.name(),
                    capacity
                );
                pool.pages.push(ComponentPage::new(ty, capacity));
                pool.pages.len() - 1
            }
        };

        let page = &mut pool.pages[page_position];
        let slot = page.avail.pop().expect("selected page has a free slot");

        ComponentRef {
            pool: pool_position,
            page: u16::try_from(page_position).expect("page count exceeds u16"),
            slot,
        }
    }

    /// Returns a slot to its page's free stack.
    ///
    /// O(1); no compaction, no zeroing. The component occupying the slot
    /// must already have been dropped in place. Other refs into the same
    /// page remain valid.
    pub fn free(&mut self, reference: ComponentRef) {
        let page = &mut self.pools[reference.pool as usize].pages[reference.page as usize];
        debug_assert!(reference.slot < page.capacity, "slot out of range");
        page.avail.push(reference.slot);
    }

    /// Computes the storage address of a component slot.
    ///
    /// The pointer is valid for reads and writes of the component type's
    /// size for as long as the ref is live. Mutating through it requires
    /// the caller to hold exclusive access to whatever owns this allocator.
    pub fn resolve(&self, reference: ComponentRef) -> NonNull<u8> {
        let pool = &self.pools[reference.pool as usize];
        let page = &pool.pages[reference.page as usize];
        debug_assert!(reference.slot < page.capacity, "slot out of range");
        // SAFETY: the offset stays inside the page's allocation because
        // slot < capacity, and the base pointer is non-null by construction.
        unsafe {
            NonNull::new_unchecked(
                page.storage
                    .as_ptr()
                    .add(reference.slot as usize * pool.ty.size()),
            )
        }
    }

    /// The component type stored by the pool a ref points into.
    pub(crate) fn type_of(&self, reference: ComponentRef) -> &'static ComponentType {
        self.pools[reference.pool as usize].ty
    }

    /// Footprint of the pool for one component type, if it exists.
    pub fn pool_stats(&self, type_id: TypeId) -> Option<AllocatorStats> {
        let position = self
            .index
            .binary_search_by_key(&type_id, |(id, _)| *id)
            .ok()?;
        let pool = &self.pools[self.index[position].1 as usize];
        let slots: usize = pool.pages.iter().map(|p| p.capacity as usize).sum();
        Some(AllocatorStats {
            pages: pool.pages.len(),
            slots,
            bytes: slots * pool.ty.size(),
        })
    }

    /// Footprint across every pool.
    pub fn stats(&self) -> AllocatorStats {
        let mut total = AllocatorStats::default();
        for pool in &self.pools {
            let slots: usize = pool.pages.iter().map(|p| p.capacity as usize).sum();
            total.pages += pool.pages.len();
            total.slots += slots;
            total.bytes += slots * pool.ty.size();
        }
        total
    }
}

impl Default for ComponentAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egame_core::ecs::Component;

    #[derive(Debug, Default)]
    struct Big([u64; 4]);
    impl Component for Big {}

    #[derive(Debug, Default)]
    struct Small(u8);
    impl Component for Small {}

    #[derive(Debug, Default)]
    struct Marker;
    impl Component for Marker {}

    #[test]
    fn pages_grow_geometrically() {
        let mut allocator = ComponentAllocator::new();
        let ty = ComponentType::of::<Big>();

        // 4 + 8 + 16 slots; the 29th allocation forces a 32-slot page.
        let refs: Vec<_> = (0..29).map(|_| allocator.allocate(ty)).collect();
        let stats = allocator.pool_stats(ty.id()).unwrap();
        assert_eq!(stats.pages, 4);
        assert_eq!(stats.slots, 4 + 8 + 16 + 32);
        assert_eq!(refs.len(), 29);
    }

    #[test]
    fn freed_slots_are_reused_before_new_pages() {
        let mut allocator = ComponentAllocator::new();
        let ty = ComponentType::of::<Big>();

        let first: Vec<_> = (0..4).map(|_| allocator.allocate(ty)).collect();
        for reference in &first {
            allocator.free(*reference);
        }
        for _ in 0..4 {
            let reference = allocator.allocate(ty);
            assert!(
                first.contains(&reference),
                "freed slots must be handed out again"
            );
        }
        assert_eq!(allocator.pool_stats(ty.id()).unwrap().pages, 1);
    }

    #[test]
    fn pools_are_segregated_by_type() {
        let mut allocator = ComponentAllocator::new();
        let big = allocator.allocate(ComponentType::of::<Big>());
        let small = allocator.allocate(ComponentType::of::<Small>());

        assert_ne!(big.pool, small.pool);
        assert_eq!(allocator.type_of(big).id(), TypeId::of::<Big>());
        assert_eq!(allocator.type_of(small).id(), TypeId::of::<Small>());
    }

    #[test]
    fn resolved_pointers_are_distinct_and_stable() {
        let mut allocator = ComponentAllocator::new();
        let ty = ComponentType::of::<Big>();

        let a = allocator.allocate(ty);
        let b = allocator.allocate(ty);
        let a_ptr = allocator.resolve(a);
        assert_ne!(a_ptr, allocator.resolve(b));

        // Growing the pool must not move earlier slots.
        for _ in 0..50 {
            let _ = allocator.allocate(ty);
        }
        assert_eq!(allocator.resolve(a), a_ptr);
    }

    #[test]
    fn zero_sized_components_take_no_bytes() {
        let mut allocator = ComponentAllocator::new();
        let ty = ComponentType::of::<Marker>();

        let a = allocator.allocate(ty);
        let b = allocator.allocate(ty);
        assert_ne!(a, b, "slots are distinct even for ZSTs");
        assert_eq!(allocator.pool_stats(ty.id()).unwrap().bytes, 0);
    }

    #[test]
    fn construct_write_read_drop_cycle() {
        let mut allocator = ComponentAllocator::new();
        let ty = ComponentType::of::<Big>();
        let reference = allocator.allocate(ty);

        unsafe {
            ty.construct(allocator.resolve(reference));
            let value = &mut *allocator.resolve(reference).cast::<Big>().as_ptr();
            assert_eq!(value.0, [0; 4]);
            value.0 = [1, 2, 3, 4];
            let value = &*allocator.resolve(reference).cast::<Big>().as_ptr();
            assert_eq!(value.0, [1, 2, 3, 4]);
            ty.drop_in_place(allocator.resolve(reference));
        }
        allocator.free(reference);
    }
}
