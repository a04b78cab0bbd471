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

//! Defines core types related to entity identity.

use serde::{Deserialize, Serialize};

/// A unique identifier for an entity within one `EntityManager`.
///
/// It combines an index with a generation count to solve the "ABA problem".
/// When an entity is despawned, its index can be recycled for a new entity,
/// but the generation is incremented. This ensures that old `EntityId` handles
/// pointing to a recycled index become invalid and cannot accidentally affect
/// the new entity.
///
/// The index additionally encodes the manager's paged storage geometry: the
/// high bits select the entity page and the low byte selects the slot within
/// that page, so an ID resolves to its record without any hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    /// The index of the entity's record inside its manager's paged storage.
    pub index: u32,
    /// A generation counter that is incremented each time the index is recycled.
    pub generation: u32,
}

/// A process-unique identifier for one `EntityManager` instance.
///
/// Handles carry the ID of the manager that issued them, so a handle
/// presented to the wrong manager resolves to nothing instead of silently
/// aliasing an unrelated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagerId(pub u32);

/// A weak, validity-checked reference to an entity.
///
/// An `EntityHandle` never keeps an entity alive. It is a back-reference that
/// must be resolved through the owning manager, which checks both the manager
/// ID and the entity's generation; either mismatch yields `None` rather than
/// a dangling reference. This is what allows cached entity lists to tolerate
/// stale entries between despawn and end-of-frame cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    /// The manager that issued this handle.
    pub manager: ManagerId,
    /// The entity this handle refers to.
    pub entity: EntityId,
}

impl EntityHandle {
    /// Creates a handle for an entity owned by the given manager.
    pub fn new(manager: ManagerId, entity: EntityId) -> Self {
        Self { manager, entity }
    }
}
