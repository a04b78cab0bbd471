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

//! Canonical, interned entity signatures.

use std::any::TypeId;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{OnceLock, RwLock};

use egame_core::ecs::{Component, ComponentType};

/// A collection of component types that can be spawned together as one unit.
///
/// This is the public face of signature construction. It is implemented on
/// tuples of components, like `(Position, Velocity)`, so the set of types an
/// entity owns is spelled out once, at the spawn site, in ordinary Rust.
pub trait ComponentBundle {
    /// Returns the descriptors for the components in this bundle, in
    /// declaration order. [`EntitySignature::of`] canonicalizes the order.
    fn component_types() -> Vec<&'static ComponentType>;
}

macro_rules! impl_component_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentBundle for ($($name,)+) {
            fn component_types() -> Vec<&'static ComponentType> {
                vec![$(ComponentType::of::<$name>()),+]
            }
        }
    };
}

impl_component_bundle!(A);
impl_component_bundle!(A, B);
impl_component_bundle!(A, B, C);
impl_component_bundle!(A, B, C, D);
impl_component_bundle!(A, B, C, D, E);
impl_component_bundle!(A, B, C, D, E, F);
impl_component_bundle!(A, B, C, D, E, F, G);
impl_component_bundle!(A, B, C, D, E, F, G, H);
impl_component_bundle!(A, B, C, D, E, F, G, H, I);
impl_component_bundle!(A, B, C, D, E, F, G, H, I, J);
impl_component_bundle!(A, B, C, D, E, F, G, H, I, J, K);
impl_component_bundle!(A, B, C, D, E, F, G, H, I, J, K, L);

/// The canonical, order-independent set of component types an entity owns.
///
/// Signatures are interned: every bundle naming the same set of component
/// types — in any order — resolves to the same `&'static EntitySignature`,
/// so pointer equality is a valid fast path and the combined hash is
/// computed exactly once. The type sequence is kept sorted by `TypeId`,
/// which makes subset tests a linear merge and per-type lookups a binary
/// search.
#[derive(Debug)]
pub struct EntitySignature {
    types: Vec<&'static ComponentType>,
    hash: u64,
}

/// The global intern table for signatures, keyed by the sorted `TypeId`
/// sequence. Mirrors the component-type registry: write-locked only when a
/// new unique type set is first seen.
static SIGNATURE_REGISTRY: OnceLock<RwLock<HashMap<Vec<TypeId>, &'static EntitySignature>>> =
    OnceLock::new();

impl EntitySignature {
    /// Returns the canonical signature for the bundle `B`.
    ///
    /// # Panics
    /// Panics if the bundle names the same component type twice. A
    /// duplicated type is a programmer error and is rejected at this
    /// single interning choke point.
    pub fn of<B: ComponentBundle>() -> &'static EntitySignature {
        Self::intern(B::component_types())
    }

    fn intern(mut types: Vec<&'static ComponentType>) -> &'static EntitySignature {
        types.sort_by_key(|ty| ty.id());
        for pair in types.windows(2) {
            assert_ne!(
                pair[0].id(),
                pair[1].id(),
                "component type {} appears twice in one bundle",
                pair[0].name()
            );
        }

        let key: Vec<TypeId> = types.iter().map(|ty| ty.id()).collect();
        let registry = SIGNATURE_REGISTRY.get_or_init(|| RwLock::new(HashMap::new()));

        if let Some(&signature) = registry
            .read()
            .expect("signature registry poisoned")
            .get(&key)
        {
            return signature;
        }

        let mut map = registry.write().expect("signature registry poisoned");
        // Re-check under the write lock in case another thread interned the
        // same type set in the meantime.
        *map.entry(key).or_insert_with(|| {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            for ty in &types {
                ty.id().hash(&mut hasher);
            }
            let hash = hasher.finish();
            Box::leak(Box::new(EntitySignature { types, hash }))
        })
    }

    /// The component type sequence, sorted by `TypeId`.
    pub fn types(&self) -> &[&'static ComponentType] {
        &self.types
    }

    /// Number of component types in this signature.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true for the empty signature.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// The precomputed, order-independent combined hash.
    pub fn combined_hash(&self) -> u64 {
        self.hash
    }

    /// Tests whether every component type in `self` also appears in `other`.
    ///
    /// A two-pointer merge over the two sorted sequences, O(n + m).
    pub fn is_subset_of(&self, other: &EntitySignature) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.types.len() > other.types.len() {
            return false;
        }

        let mut theirs = other.types.iter();
        'outer: for ours in &self.types {
            for candidate in theirs.by_ref() {
                if candidate.id() == ours.id() {
                    continue 'outer;
                }
                if candidate.id() > ours.id() {
                    return false;
                }
            }
            return false;
        }
        true
    }

    /// Finds the position of a component type within this signature.
    ///
    /// The returned index addresses the entity's parallel component-storage
    /// list. `None` is the normal "entity does not have this component"
    /// outcome, not an error.
    pub fn component_index(&self, type_id: TypeId) -> Option<usize> {
        self.types
            .binary_search_by_key(&type_id, |ty| ty.id())
            .ok()
    }

    /// Returns true if this signature contains the given component type.
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.component_index(type_id).is_some()
    }
}

impl PartialEq for EntitySignature {
    fn eq(&self, other: &Self) -> bool {
        // Interning makes pointer identity the common case; the sequence
        // comparison keeps logical equality correct regardless.
        std::ptr::eq(self, other)
            || (self.hash == other.hash
                && self.types.len() == other.types.len()
                && self
                    .types
                    .iter()
                    .zip(&other.types)
                    .all(|(a, b)| a.id() == b.id()))
    }
}

impl Eq for EntitySignature {}

impl Hash for EntitySignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Position(f32, f32, f32);
    impl Component for Position {}

    #[derive(Debug, Default)]
    struct Rotation(f32);
    impl Component for Rotation {}

    #[derive(Debug, Default)]
    struct Scale(f32);
    impl Component for Scale {}

    #[test]
    fn permutations_intern_to_the_same_signature() {
        let a = EntitySignature::of::<(Position, Rotation, Scale)>();
        let b = EntitySignature::of::<(Scale, Position, Rotation)>();
        let c = EntitySignature::of::<(Rotation, Scale, Position)>();

        assert!(std::ptr::eq(a, b));
        assert!(std::ptr::eq(b, c));
        assert_eq!(a, c);
        assert_eq!(a.combined_hash(), c.combined_hash());
    }

    #[test]
    fn subset_is_reflexive() {
        let pr = EntitySignature::of::<(Position, Rotation)>();
        let prs = EntitySignature::of::<(Position, Rotation, Scale)>();
        assert!(pr.is_subset_of(pr));
        assert!(prs.is_subset_of(prs));
    }

    #[test]
    fn subset_respects_containment() {
        let pr = EntitySignature::of::<(Position, Rotation)>();
        let rsp = EntitySignature::of::<(Rotation, Scale, Position)>();

        assert!(pr.is_subset_of(rsp));
        assert!(!rsp.is_subset_of(pr));
    }

    #[test]
    fn subset_is_transitive() {
        let p = EntitySignature::of::<(Position,)>();
        let pr = EntitySignature::of::<(Position, Rotation)>();
        let prs = EntitySignature::of::<(Position, Rotation, Scale)>();

        assert!(p.is_subset_of(pr));
        assert!(pr.is_subset_of(prs));
        assert!(p.is_subset_of(prs));
    }

    #[test]
    fn disjoint_signatures_are_not_subsets() {
        let r = EntitySignature::of::<(Rotation,)>();
        let ps = EntitySignature::of::<(Position, Scale)>();
        assert!(!r.is_subset_of(ps));
        assert!(!ps.is_subset_of(r));
    }

    #[test]
    fn component_index_matches_sorted_order() {
        let sig = EntitySignature::of::<(Position, Rotation, Scale)>();
        for (expected, ty) in sig.types().iter().enumerate() {
            assert_eq!(sig.component_index(ty.id()), Some(expected));
        }
        assert_eq!(sig.component_index(TypeId::of::<u64>()), None);
    }

    #[test]
    #[should_panic(expected = "appears twice")]
    fn duplicate_component_types_are_rejected() {
        let _ = EntitySignature::of::<(Position, Position)>();
    }
}
