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

//! The `Component` contract and its interned runtime descriptors.

use std::any::TypeId;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{OnceLock, RwLock};

use crate::ecs::message::MessageReceiver;

/// A marker trait for types that can be attached to entities.
///
/// Components are plain data structs with no required base type; a struct
/// becomes ECS-visible solely by being named in an entity signature. The
/// `Default` bound is the hard contract that every component can be
/// constructed in place when its entity is spawned — a type without a
/// default value fails to compile, not at runtime. `'static` ensures the
/// component holds no borrowed data, and `Send + Sync` allows component
/// data to be handed between threads by the surrounding engine.
pub trait Component: Default + Send + Sync + 'static {
    /// Returns this component type's message dispatch table, if it has one.
    ///
    /// A component opts into message dispatch structurally, by overriding
    /// this method to return a table built with [`MessageReceiver::builder`].
    /// The default is no table: messages are silently skipped for this type.
    fn message_receiver() -> Option<&'static MessageReceiver> {
        None
    }
}

/// Constructs a default `T` into uninitialized, correctly-sized storage.
///
/// # Safety
/// `dst` must point to storage of at least `size_of::<T>()` bytes with
/// `align_of::<T>()` alignment, and must not overlap a live `T`.
unsafe fn construct_in_place<T: Component>(dst: NonNull<u8>) {
    dst.cast::<T>().as_ptr().write(T::default());
}

/// Drops the `T` stored at `dst` in place without freeing its storage.
///
/// # Safety
/// `dst` must point to a live, properly-aligned `T` that is not dropped
/// again afterwards.
unsafe fn drop_in_place_erased<T: Component>(dst: NonNull<u8>) {
    std::ptr::drop_in_place(dst.cast::<T>().as_ptr());
}

/// The runtime descriptor for one concrete component type.
///
/// Exactly one `ComponentType` is interned per distinct component struct
/// (see [`ComponentType::of`]), so descriptors can be compared and ordered
/// by pointer identity. The descriptor carries everything the ECS needs to
/// manage storage for the type without knowing it statically: size,
/// alignment, a constructor, a destructor, and the optional message table.
#[derive(Debug)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
    size: usize,
    align: usize,
    construct: unsafe fn(NonNull<u8>),
    drop: unsafe fn(NonNull<u8>),
    receiver: Option<&'static MessageReceiver>,
}

/// The global intern table mapping a component's `TypeId` to its descriptor.
///
/// Write-locked only the first time a given type is seen; every later
/// lookup takes the read path.
static TYPE_REGISTRY: OnceLock<RwLock<HashMap<TypeId, &'static ComponentType>>> = OnceLock::new();

impl ComponentType {
    /// Returns the canonical descriptor for `T`, interning it on first use.
    pub fn of<T: Component>() -> &'static ComponentType {
        let registry = TYPE_REGISTRY.get_or_init(|| RwLock::new(HashMap::new()));
        let type_id = TypeId::of::<T>();

        if let Some(&ty) = registry.read().expect("type registry poisoned").get(&type_id) {
            return ty;
        }

        let mut map = registry.write().expect("type registry poisoned");
        // Re-check under the write lock: another thread may have interned
        // the type between our read and write acquisitions.
        *map.entry(type_id).or_insert_with(|| {
            log::trace!("Interning component type {}", std::any::type_name::<T>());
            Box::leak(Box::new(ComponentType {
                id: type_id,
                name: std::any::type_name::<T>(),
                size: std::mem::size_of::<T>(),
                align: std::mem::align_of::<T>(),
                construct: construct_in_place::<T>,
                drop: drop_in_place_erased::<T>,
                receiver: T::message_receiver(),
            }))
        })
    }

    /// The `TypeId` of the component struct this descriptor stands for.
    ///
    /// This is the ordering key for canonical signatures.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The component struct's full type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Size of one component instance in bytes. May be zero.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment requirement of the component struct.
    pub fn align(&self) -> usize {
        self.align
    }

    /// The component's message dispatch table, if it declared one.
    pub fn receiver(&self) -> Option<&'static MessageReceiver> {
        self.receiver
    }

    /// Default-constructs a component instance into raw storage.
    ///
    /// # Safety
    /// `dst` must be uninitialized storage of at least [`Self::size`] bytes
    /// with [`Self::align`] alignment.
    pub unsafe fn construct(&self, dst: NonNull<u8>) {
        (self.construct)(dst)
    }

    /// Drops the component instance stored at `dst` in place.
    ///
    /// # Safety
    /// `dst` must hold a live instance of this component type, constructed
    /// via [`Self::construct`], and must not be dropped again.
    pub unsafe fn drop_in_place(&self, dst: NonNull<u8>) {
        (self.drop)(dst)
    }
}

// Two descriptors are the same type exactly when they are the same interned
// instance, but comparing the `TypeId` keeps equality meaningful even for
// descriptors that were somehow built independently.
impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Health(u32);
    impl Component for Health {}

    #[derive(Debug, Default)]
    struct Stamina(f32);
    impl Component for Stamina {}

    #[test]
    fn interning_returns_the_same_descriptor() {
        let a = ComponentType::of::<Health>();
        let b = ComponentType::of::<Health>();
        assert!(std::ptr::eq(a, b), "descriptors must be interned");
        assert_eq!(a.id(), TypeId::of::<Health>());
        assert_eq!(a.size(), std::mem::size_of::<Health>());
        assert_eq!(a.align(), std::mem::align_of::<Health>());
    }

    #[test]
    fn distinct_types_get_distinct_descriptors() {
        let a = ComponentType::of::<Health>();
        let b = ComponentType::of::<Stamina>();
        assert!(!std::ptr::eq(a, b));
        assert_ne!(a, b);
    }

    #[test]
    fn construct_and_drop_round_trip() {
        let ty = ComponentType::of::<Health>();
        let mut storage = std::mem::MaybeUninit::<Health>::uninit();
        let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
        unsafe {
            ty.construct(ptr);
            assert_eq!(storage.assume_init_ref().0, 0);
            ty.drop_in_place(ptr);
        }
    }
}
