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

//! # egame-ecs
//!
//! The EGame entity-component runtime: slab-allocated components with
//! stable handles, generation-checked entity IDs, signature-interned
//! archetypes, per-signature entity sets, component-level message
//! dispatch, hierarchy links, and scene serialization.
//!
//! The expected frame shape is: spawn and mutate freely, call
//! [`EntityManager::despawn`] whenever, and run
//! [`EntityManager::end_frame`] once per tick to reclaim storage. All of
//! it is single-threaded; a manager is `Send` but not shared.

pub mod allocator;
pub mod entity;
pub mod entity_set;
pub mod manager;
pub mod serialization;
pub mod signature;

pub use allocator::{AllocatorStats, ComponentAllocator, ComponentRef};
pub use entity::Entity;
pub use entity_set::{EntitySet, EntitySetId};
pub use manager::{ChildIter, EntityManager, EntitySetIter, MAX_LIVE_ENTITIES};
pub use serialization::{EntitySerializer, SceneError, SerializerRegistry};
pub use signature::{ComponentBundle, EntitySignature};

// The identity and contract types live in egame-core; re-export them so
// most games only need this crate.
pub use egame_core::ecs::{
    Component, ComponentType, EntityHandle, EntityId, ManagerId, Message, MessageHandler,
    MessageReceiver,
};

#[cfg(test)]
mod tests;
