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

//! Foundational crate for the EGame engine.
//!
//! `egame-core` holds the types and interface contracts that higher-level
//! crates build on: entity identity ([`ecs::entity::EntityId`],
//! [`ecs::entity::EntityHandle`]), the [`ecs::component::Component`] contract
//! with its interned [`ecs::component::ComponentType`] descriptors, and the
//! [`ecs::message::MessageReceiver`] dispatch tables. It contains no storage
//! or scheduling logic of its own; the ECS runtime lives in `egame-ecs`.

pub mod ecs;
