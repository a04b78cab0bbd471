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

//! Cached per-signature entity membership.

use egame_core::ecs::EntityHandle;

use crate::entity::Entity;
use crate::signature::EntitySignature;

/// A stable address for one [`EntitySet`] inside its manager.
///
/// Sets are never removed, so the ID a system obtains once (typically at
/// startup) stays valid for the manager's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntitySetId(pub(crate) u32);

/// The membership cache for one queried signature.
///
/// A set holds a weak handle for every entity whose signature is a
/// superset of the set's own. Maintenance is lazy on the removal side:
/// despawned entities leave stale handles behind until the manager's
/// end-of-frame pass prunes them, and iteration simply skips any handle
/// that no longer resolves. Because of that, the raw entry count is an
/// upper bound, not an exact size, between despawn and end-of-frame.
#[derive(Debug)]
pub struct EntitySet {
    signature: &'static EntitySignature,
    entities: Vec<EntityHandle>,
}

impl EntitySet {
    pub(crate) fn new(signature: &'static EntitySignature) -> Self {
        Self {
            signature,
            entities: Vec::new(),
        }
    }

    /// The signature this set was built for.
    pub fn signature(&self) -> &'static EntitySignature {
        self.signature
    }

    /// Number of cached handles, including any not-yet-pruned dead ones.
    pub fn raw_len(&self) -> usize {
        self.entities.len()
    }

    pub(crate) fn handles(&self) -> &[EntityHandle] {
        &self.entities
    }

    /// Appends the entity if its signature contains this set's signature.
    /// Called for every entity creation against every existing set.
    pub(crate) fn maybe_add(&mut self, entity: &Entity) {
        if self.signature.is_subset_of(entity.signature()) {
            self.entities.push(entity.handle());
        }
    }

    /// Compacts out every handle the predicate reports dead.
    ///
    /// Reverse-order swap-and-pop: O(n), does not preserve insertion
    /// order. Callers must not rely on stable iteration order across
    /// frames.
    pub(crate) fn remove_dead(&mut self, is_alive: impl Fn(EntityHandle) -> bool) {
        for index in (0..self.entities.len()).rev() {
            if !is_alive(self.entities[index]) {
                self.entities.swap_remove(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egame_core::ecs::{EntityId, ManagerId};

    fn handle(index: u32) -> EntityHandle {
        EntityHandle::new(
            ManagerId(0),
            EntityId {
                index,
                generation: 0,
            },
        )
    }

    #[test]
    fn remove_dead_prunes_exactly_the_dead_handles() {
        let signature = {
            use egame_core::ecs::Component;
            #[derive(Debug, Default)]
            struct Tag;
            impl Component for Tag {}
            crate::signature::EntitySignature::of::<(Tag,)>()
        };

        let mut set = EntitySet::new(signature);
        for index in 0..6 {
            set.entities.push(handle(index));
        }

        // Kill the even indices.
        set.remove_dead(|h| h.entity.index % 2 == 1);

        assert_eq!(set.raw_len(), 3);
        let mut survivors: Vec<u32> = set.handles().iter().map(|h| h.entity.index).collect();
        survivors.sort_unstable();
        assert_eq!(survivors, vec![1, 3, 5]);
    }

    #[test]
    fn remove_dead_on_all_dead_empties_the_set() {
        let signature = {
            use egame_core::ecs::Component;
            #[derive(Debug, Default)]
            struct Other;
            impl Component for Other {}
            crate::signature::EntitySignature::of::<(Other,)>()
        };

        let mut set = EntitySet::new(signature);
        for index in 0..4 {
            set.entities.push(handle(index));
        }
        set.remove_dead(|_| false);
        assert_eq!(set.raw_len(), 0);
    }
}
