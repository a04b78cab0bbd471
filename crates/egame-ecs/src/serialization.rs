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

//! Scene persistence.
//!
//! Entities opt into persistence by carrying an [`EntitySerializer`] from
//! spawn time. A scene is the serializers' payloads plus the parent links
//! between persisted entities, encoded with `bincode`; component pointers,
//! entity IDs, and set membership are all rebuilt on load rather than
//! stored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use egame_core::ecs::EntityId;

use crate::manager::EntityManager;

/// Errors produced while saving or loading a scene.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("no serializer registered for key `{0}`")]
    UnknownSerializer(String),

    #[error("scene encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("scene decoding failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("entity {0:?} is not alive")]
    DeadEntity(EntityId),

    #[error("scene entry {entry} names parent entry {parent}, which does not precede it")]
    InvalidParent { entry: u32, parent: u32 },

    #[error("serializer `{name}` failed: {message}")]
    Component { name: &'static str, message: String },
}

/// Per-archetype save/load logic for one kind of persisted entity.
///
/// Implementations are stateless statics: [`save`](Self::save) snapshots
/// whatever subset of the entity's components matters, and
/// [`spawn`](Self::spawn) re-creates an equivalent entity from that
/// snapshot, typically by calling
/// [`EntityManager::spawn_entity`] with itself as the serializer so the
/// new entity stays persistable.
pub trait EntitySerializer: Send + Sync {
    /// Stable identifier written into the scene and used to find this
    /// serializer again on load. Changing it breaks saved scenes.
    fn key(&self) -> &'static str;

    /// Encodes the entity's persistent state.
    fn save(&self, manager: &EntityManager, entity: EntityId) -> Result<Vec<u8>, SceneError>;

    /// Spawns a fresh entity from a payload produced by
    /// [`save`](Self::save), attached to `parent` when given.
    fn spawn(
        &self,
        manager: &mut EntityManager,
        parent: Option<EntityId>,
        payload: &[u8],
    ) -> Result<EntityId, SceneError>;
}

/// Lookup table mapping serializer keys to their implementations,
/// supplied by the game when loading a scene.
#[derive(Default)]
pub struct SerializerRegistry {
    entries: Vec<(&'static str, &'static dyn EntitySerializer)>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// Panics if the serializer's key is already registered.
    pub fn register(&mut self, serializer: &'static dyn EntitySerializer) {
        let key = serializer.key();
        assert!(
            self.lookup(key).is_none(),
            "serializer key `{key}` registered twice"
        );
        self.entries.push((key, serializer));
    }

    pub fn lookup(&self, key: &str) -> Option<&'static dyn EntitySerializer> {
        self.entries
            .iter()
            .find(|(entry_key, _)| *entry_key == key)
            .map(|(_, serializer)| *serializer)
    }
}

/// One persisted entity: its serializer key, its payload, and the scene
/// position of its parent (parents always precede children in a scene).
#[derive(Debug, Serialize, Deserialize)]
struct SerializedEntity {
    key: String,
    parent: Option<u32>,
    payload: Vec<u8>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SerializedScene {
    entities: Vec<SerializedEntity>,
}

impl EntityManager {
    /// Encodes every live entity that carries a serializer.
    ///
    /// Entities without a serializer are skipped entirely; a persisted
    /// entity whose parent is unpersisted is written as a root. Queued
    /// despawns have not run yet, so queued entities are still saved.
    pub fn serialize_scene(&self) -> Result<Vec<u8>, SceneError> {
        // Parents must land before their children, so walk the persisted
        // forest top-down instead of storage order.
        let roots: Vec<EntityId> = self
            .iter_live()
            .filter(|entity| {
                entity.serializer().is_some()
                    && entity
                        .parent()
                        .and_then(|parent| self.entity(parent))
                        .map_or(true, |parent| parent.serializer().is_none())
            })
            .map(|entity| entity.id())
            .collect();

        let mut ordered = Vec::new();
        let mut stack: Vec<EntityId> = roots;
        while let Some(id) = stack.pop() {
            ordered.push(id);
            for child in self.children(id) {
                let persisted = self
                    .entity(child)
                    .map_or(false, |entity| entity.serializer().is_some());
                if persisted {
                    stack.push(child);
                }
            }
        }

        let mut scene = SerializedScene::default();
        let mut index_of: HashMap<EntityId, u32> = HashMap::with_capacity(ordered.len());
        for id in ordered {
            let entity = self.entity(id).ok_or(SceneError::DeadEntity(id))?;
            let serializer = entity.serializer().expect("filtered to persisted entities");
            let parent = entity.parent().and_then(|parent| index_of.get(&parent)).copied();
            index_of.insert(id, scene.entities.len() as u32);
            scene.entities.push(SerializedEntity {
                key: serializer.key().to_owned(),
                parent,
                payload: serializer.save(self, id)?,
            });
        }

        log::debug!("Serialized scene with {} entities", scene.entities.len());
        Ok(bincode::serde::encode_to_vec(
            &scene,
            bincode::config::standard(),
        )?)
    }

    /// Spawns the contents of a scene into this manager.
    ///
    /// Loading adds to whatever is already live; it never clears the
    /// manager first. Returns the IDs of the spawned entities in scene
    /// order.
    pub fn deserialize_scene(
        &mut self,
        bytes: &[u8],
        registry: &SerializerRegistry,
    ) -> Result<Vec<EntityId>, SceneError> {
        let (scene, _): (SerializedScene, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;

        let mut spawned: Vec<EntityId> = Vec::with_capacity(scene.entities.len());
        for (position, entry) in scene.entities.iter().enumerate() {
            let serializer = registry
                .lookup(&entry.key)
                .ok_or_else(|| SceneError::UnknownSerializer(entry.key.clone()))?;
            let parent = match entry.parent {
                Some(index) if (index as usize) < spawned.len() => Some(spawned[index as usize]),
                Some(index) => {
                    return Err(SceneError::InvalidParent {
                        entry: position as u32,
                        parent: index,
                    });
                }
                None => None,
            };
            let id = serializer.spawn(self, parent, &entry.payload)?;
            spawned.push(id);
        }

        log::debug!("Deserialized scene with {} entities", spawned.len());
        Ok(spawned)
    }
}
