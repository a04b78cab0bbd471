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

//! Closed-world message dispatch without trait objects.
//!
//! A component type that wants to react to messages declares a static
//! [`MessageReceiver`]: a sorted table mapping a message's `TypeId` to a
//! monomorphized shim function. Dispatch is a binary search plus an
//! indirect call — no vtables, no downcasting, no per-call allocation.
//! Sending a message type nobody registered for is a silent no-op.

use std::any::TypeId;
use std::ptr::NonNull;

use crate::ecs::component::Component;
use crate::ecs::entity::EntityId;

/// A marker trait for types that can be broadcast to an entity's components.
///
/// Messages are plain structs; they carry whatever payload the sender and
/// handlers agree on. The ECS never inspects a message's contents.
pub trait Message: 'static {}

/// Implemented by a component type for each message type it wants to handle.
pub trait MessageHandler<M: Message>: Component {
    /// Reacts to one message delivered to the entity owning this component.
    ///
    /// `entity` identifies the receiving entity, so a handler can look up
    /// sibling components or spawn follow-up work through its manager.
    fn handle_message(&mut self, entity: EntityId, message: &M);
}

/// The type-erased shape of one registered handler.
///
/// The first pointer is the component instance, the second the message
/// payload; the shim generated by [`MessageReceiverBuilder::handle`] knows
/// the concrete types on both sides.
type ErasedHandler = unsafe fn(NonNull<u8>, EntityId, NonNull<u8>);

/// A per-component-type dispatch table mapping message types to handlers.
///
/// Built once (typically into a `static`) via [`MessageReceiver::builder`]
/// and attached to the component through
/// [`Component::message_receiver`](crate::ecs::component::Component::message_receiver).
/// Entries are kept sorted by message `TypeId` so lookup is a binary search.
#[derive(Debug)]
pub struct MessageReceiver {
    entries: Vec<(TypeId, ErasedHandler)>,
}

impl MessageReceiver {
    /// Starts building a dispatch table.
    pub fn builder() -> MessageReceiverBuilder {
        MessageReceiverBuilder {
            entries: Vec::new(),
        }
    }

    /// Returns true if this table has a handler for the given message type.
    pub fn wants(&self, message: TypeId) -> bool {
        self.lookup(message).is_some()
    }

    /// Number of message types this table handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, message: TypeId) -> Option<ErasedHandler> {
        self.entries
            .binary_search_by_key(&message, |(id, _)| *id)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Invokes the handler registered for `message`, if any.
    ///
    /// Returns true if a handler ran.
    ///
    /// # Safety
    /// `component` must point to a live, exclusively-borrowed instance of
    /// the component type this table was built for, and `payload` must
    /// point to a live value whose `TypeId` is exactly `message`.
    pub unsafe fn dispatch(
        &self,
        message: TypeId,
        component: NonNull<u8>,
        entity: EntityId,
        payload: NonNull<u8>,
    ) -> bool {
        match self.lookup(message) {
            Some(handler) => {
                handler(component, entity, payload);
                true
            }
            None => false,
        }
    }
}

/// Builder for [`MessageReceiver`] tables.
pub struct MessageReceiverBuilder {
    entries: Vec<(TypeId, ErasedHandler)>,
}

impl MessageReceiverBuilder {
    /// Registers component type `C`'s handler for message type `M`.
    pub fn handle<C: MessageHandler<M>, M: Message>(mut self) -> Self {
        // The shim restores both concrete types; it is the only place the
        // erased pointers are reinterpreted.
        unsafe fn shim<C: MessageHandler<M>, M: Message>(
            component: NonNull<u8>,
            entity: EntityId,
            payload: NonNull<u8>,
        ) {
            let component = &mut *component.cast::<C>().as_ptr();
            let payload = &*payload.cast::<M>().as_ptr();
            component.handle_message(entity, payload);
        }
        self.entries.push((TypeId::of::<M>(), shim::<C, M>));
        self
    }

    /// Finalizes the table, sorting entries by message type.
    ///
    /// # Panics
    /// Panics if the same message type was registered twice; a component
    /// type has exactly one handler per message type.
    pub fn build(mut self) -> MessageReceiver {
        self.entries.sort_by_key(|(id, _)| *id);
        for pair in self.entries.windows(2) {
            assert_ne!(
                pair[0].0, pair[1].0,
                "message type registered twice in one MessageReceiver"
            );
        }
        MessageReceiver {
            entries: self.entries,
        }
    }
}
