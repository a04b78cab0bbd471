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

//! End-to-end tests exercising the manager, sets, allocator, and message
//! dispatch together. Per-module unit tests live next to their modules.

use std::any::TypeId;
use std::sync::OnceLock;

use egame_core::ecs::{Component, EntityId, Message, MessageHandler, MessageReceiver};

use crate::manager::EntityManager;
use crate::signature::EntitySignature;

#[derive(Debug, Default)]
struct Position(f32, f32, f32);
impl Component for Position {}

#[derive(Debug, Default)]
struct Rotation(f32, f32, f32, f32);
impl Component for Rotation {}

#[derive(Debug, Default)]
struct Scale(f32);
impl Component for Scale {}

fn pr() -> &'static EntitySignature {
    EntitySignature::of::<(Position, Rotation)>()
}

fn prs() -> &'static EntitySignature {
    EntitySignature::of::<(Position, Rotation, Scale)>()
}

fn rsp() -> &'static EntitySignature {
    EntitySignature::of::<(Rotation, Scale, Position)>()
}

#[test]
fn set_queries_track_spawns_and_despawns() {
    let mut manager = EntityManager::new();

    let e_pr = manager.spawn(pr());
    let e_rsp = manager.spawn(rsp());
    let e_child = manager.spawn_child(pr(), e_rsp);
    let e_prs = manager.spawn(prs());

    let pr_set = manager.entity_set(pr());
    let prs_set = manager.entity_set(prs());

    let members: Vec<EntityId> = manager.set_entities(pr_set).collect();
    assert_eq!(members.len(), 4);
    for id in [e_pr, e_rsp, e_child, e_prs] {
        assert!(members.contains(&id));
    }

    let members: Vec<EntityId> = manager.set_entities(prs_set).collect();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&e_rsp));
    assert!(members.contains(&e_prs));

    // Despawning the RSP entity takes its PR child with it.
    manager.despawn(e_rsp);
    manager.end_frame();

    let members: Vec<EntityId> = manager.set_entities(pr_set).collect();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&e_pr));
    assert!(members.contains(&e_prs));

    let members: Vec<EntityId> = manager.set_entities(prs_set).collect();
    assert_eq!(members, vec![e_prs]);
}

#[test]
fn set_membership_is_exact_after_end_frame() {
    let mut manager = EntityManager::new();
    let pr_set = manager.entity_set(pr());

    let mut expected = Vec::new();
    for index in 0..40 {
        let signature = match index % 3 {
            0 => pr(),
            1 => prs(),
            _ => EntitySignature::of::<(Scale,)>(),
        };
        let id = manager.spawn(signature);
        if index % 3 != 2 {
            expected.push(id);
        }
        if index % 5 == 0 {
            manager.despawn(id);
            expected.retain(|&kept| kept != id);
        }
    }
    manager.end_frame();

    let mut members: Vec<EntityId> = manager.set_entities(pr_set).collect();
    members.sort_unstable_by_key(|id| id.index);
    expected.sort_unstable_by_key(|id| id.index);
    assert_eq!(members, expected);
}

#[test]
fn components_match_signature_exactly() {
    let mut manager = EntityManager::new();
    let id = manager.spawn(pr());

    let position = manager.component::<Position>(id).unwrap();
    assert_eq!((position.0, position.1, position.2), (0.0, 0.0, 0.0));
    let rotation = manager.component::<Rotation>(id).unwrap();
    assert_eq!(rotation.3, 0.0);
    assert!(manager.component::<Scale>(id).is_none());

    manager.component_mut::<Position>(id).unwrap().0 = 4.5;
    assert_eq!(manager.component::<Position>(id).unwrap().0, 4.5);
}

#[test]
fn despawn_cascade_clears_deep_hierarchies() {
    let mut manager = EntityManager::new();
    let pr_set = manager.entity_set(pr());

    let root = manager.spawn(pr());
    let mut parent = root;
    let mut descendants = Vec::new();
    for _ in 0..5 {
        // Two children per level, one of which carries the chain deeper.
        let _ = manager.spawn_child(pr(), parent);
        let next = manager.spawn_child(pr(), parent);
        descendants.push(next);
        parent = next;
    }
    let outsider = manager.spawn(pr());

    manager.despawn(root);
    manager.end_frame();

    assert_eq!(manager.live_entities(), 1);
    for id in descendants {
        assert!(!manager.is_alive(id));
    }
    let members: Vec<EntityId> = manager.set_entities(pr_set).collect();
    assert_eq!(members, vec![outsider]);
}

#[test]
fn allocator_footprint_is_stable_under_churn() {
    #[derive(Debug, Default)]
    struct Payload([u64; 4]);
    impl Component for Payload {}

    let signature = EntitySignature::of::<(Payload,)>();
    let mut manager = EntityManager::new();

    let mut live: Vec<EntityId> = (0..1000).map(|_| manager.spawn(signature)).collect();
    let full_footprint = manager
        .allocator()
        .pool_stats(TypeId::of::<Payload>())
        .unwrap();
    assert!(full_footprint.slots >= 1000);

    // Page capacities double from 4 up to the 1024 cap, so 1000 live
    // instances fit in the first eight pages.
    assert_eq!(full_footprint.pages, 8);

    // Despawn half (spread across pages), reclaim, refill.
    let mut index = 0;
    live.retain(|&id| {
        index += 1;
        if index % 2 == 0 {
            manager.despawn(id);
            false
        } else {
            true
        }
    });
    manager.end_frame();
    assert_eq!(manager.live_entities(), 500);

    for _ in 0..500 {
        live.push(manager.spawn(signature));
    }

    // Refilling reuses freed slots; no new pages, no new bytes.
    let refilled = manager
        .allocator()
        .pool_stats(TypeId::of::<Payload>())
        .unwrap();
    assert_eq!(refilled.bytes, full_footprint.bytes);
    assert_eq!(refilled.pages, full_footprint.pages);

    // Steady-state churn must not grow the pool either.
    for _ in 0..20 {
        let id = live.pop().unwrap();
        manager.despawn(id);
        manager.end_frame();
        live.push(manager.spawn(signature));
    }
    let churned = manager
        .allocator()
        .pool_stats(TypeId::of::<Payload>())
        .unwrap();
    assert_eq!(churned.bytes, full_footprint.bytes);
}

// -- Message dispatch ------------------------------------------------------

struct Ping;
impl Message for Ping {}

struct Pong;
impl Message for Pong {}

#[derive(Debug, Default)]
struct Foo {
    pings: u32,
}

impl MessageHandler<Ping> for Foo {
    fn handle_message(&mut self, _entity: EntityId, _message: &Ping) {
        self.pings += 1;
    }
}

impl Component for Foo {
    fn message_receiver() -> Option<&'static MessageReceiver> {
        static RECEIVER: OnceLock<MessageReceiver> = OnceLock::new();
        Some(RECEIVER.get_or_init(|| {
            MessageReceiver::builder().handle::<Foo, Ping>().build()
        }))
    }
}

#[derive(Debug, Default)]
struct Deaf;
impl Component for Deaf {}

#[test]
fn messages_reach_registered_components_exactly_once() {
    let mut manager = EntityManager::new();
    let id = manager.spawn(EntitySignature::of::<(Foo, Deaf)>());

    assert_eq!(manager.send_message(id, &Ping), 1);
    assert_eq!(manager.component::<Foo>(id).unwrap().pings, 1);

    // A message type nobody registered for runs zero handlers.
    assert_eq!(manager.send_message(id, &Pong), 0);
    assert_eq!(manager.component::<Foo>(id).unwrap().pings, 1);

    // Dead entities are a silent no-op.
    manager.despawn(id);
    manager.end_frame();
    assert_eq!(manager.send_message(id, &Ping), 0);
}

#[test]
fn components_are_dropped_when_entities_die() {
    use std::sync::atomic::{AtomicU32, Ordering};

    static DROPS: AtomicU32 = AtomicU32::new(0);

    #[derive(Debug, Default)]
    struct Tracked;
    impl Component for Tracked {}
    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let signature = EntitySignature::of::<(Tracked,)>();
    {
        let mut manager = EntityManager::new();
        let despawned = manager.spawn(signature);
        let _leaked_until_manager_drop = manager.spawn(signature);
        manager.despawn(despawned);
        manager.end_frame();
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }
    // The manager's own drop tears down whatever was still live.
    assert_eq!(DROPS.load(Ordering::SeqCst), 2);
}
