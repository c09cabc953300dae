// Copyright 2025 the chunk_ecs authors
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

//! Fluent wrappers around `(registry, entity)` pairs.

use crate::component::Component;
use crate::entity::Entity;
use crate::error::Result;
use crate::registry::Registry;

/// Read-only handle to one entity.
#[derive(Clone, Copy)]
pub struct EntityRef<'a> {
    registry: &'a Registry,
    entity: Entity,
}

impl<'a> EntityRef<'a> {
    pub(crate) fn new(registry: &'a Registry, entity: Entity) -> Self {
        Self { registry, entity }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn alive(&self) -> bool {
        self.registry.alive(self.entity)
    }

    pub fn get<C: Component>(&self) -> Result<&'a C> {
        self.registry.get::<C>(self.entity)
    }

    pub fn has<C: Component>(&self) -> Result<bool> {
        self.registry.has::<C>(self.entity)
    }

    /// Clone this entity's components into another registry under a fresh
    /// handle there. Every component type must have a registered clone
    /// callback.
    pub fn copy_to(&self, dest: &mut Registry) -> Result<Entity> {
        let target = dest.allocate();
        match self.registry.copy_entity_to(self.entity, dest, target) {
            Ok(()) => Ok(target),
            Err(err) => {
                dest.recycle_handle(target);
                Err(err)
            }
        }
    }
}

/// Exclusive handle to one entity.
pub struct EntityMut<'a> {
    registry: &'a mut Registry,
    entity: Entity,
}

impl<'a> EntityMut<'a> {
    pub(crate) fn new(registry: &'a mut Registry, entity: Entity) -> Self {
        Self { registry, entity }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn alive(&self) -> bool {
        self.registry.alive(self.entity)
    }

    pub fn get<C: Component>(&self) -> Result<&C> {
        self.registry.get::<C>(self.entity)
    }

    pub fn get_mut<C: Component>(&mut self) -> Result<&mut C> {
        self.registry.get_mut::<C>(self.entity)
    }

    pub fn has<C: Component>(&self) -> Result<bool> {
        self.registry.has::<C>(self.entity)
    }

    /// Assign a component, chaining further mutations.
    pub fn set<C: Component>(self, value: C) -> Result<Self> {
        self.registry.set(self.entity, value)?;
        Ok(self)
    }

    /// Strip a component, chaining further mutations.
    pub fn remove<C: Component>(self) -> Result<Self> {
        self.registry.remove::<C>(self.entity)?;
        Ok(self)
    }

    pub fn destroy(self) -> Result<()> {
        self.registry.destroy(self.entity)
    }

    /// Duplicate this entity within its registry. Every component type must
    /// have a registered clone callback.
    pub fn clone_entity(&mut self) -> Result<Entity> {
        self.registry.clone_entity(self.entity)
    }

    /// Clone this entity's components into another registry.
    pub fn copy_to(&self, dest: &mut Registry) -> Result<Entity> {
        let target = dest.allocate();
        match self.registry.copy_entity_to(self.entity, dest, target) {
            Ok(()) => Ok(target),
            Err(err) => {
                dest.recycle_handle(target);
                Err(err)
            }
        }
    }

    /// Transfer this entity's components into another registry, recycling the
    /// source handle.
    pub fn move_to(self, dest: &mut Registry) -> Result<Entity> {
        let target = dest.allocate();
        match self.registry.move_entity_to(self.entity, dest, target) {
            Ok(()) => Ok(target),
            Err(err) => {
                dest.recycle_handle(target);
                Err(err)
            }
        }
    }
}
