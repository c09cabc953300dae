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

//! Registry: central entity and component storage.
//!
//! The registry owns the entity pool, the archetype graph, and the
//! per-entity location index. For every alive entity the location points at
//! the chunk row whose entity column holds that entity, and vice versa; all
//! operations here preserve both directions.

use crate::archetype::Archetypes;
use crate::component::{component_id, Bundle, Component, ComponentInfo};
use crate::entity::{Entity, EntityLocation, EntityPool, ReservedEntity};
use crate::entity_ref::{EntityMut, EntityRef};
use crate::error::{EcsError, Result};
use crate::view::{Query, ReadOnlyQuery, View};

#[cfg(feature = "profiling")]
use tracing::info_span;

/// Container for all entities and their components.
#[derive(Default)]
pub struct Registry {
    entities: EntityPool,
    archetypes: Archetypes,
    locations: Vec<Option<EntityLocation>>,
}

impl Registry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity carrying the bundle's components.
    ///
    /// Component types in the bundle must be unique; a duplicate is a
    /// programming error and panics.
    pub fn create<B: Bundle>(&mut self, bundle: B) -> Entity {
        #[cfg(feature = "profiling")]
        let span = info_span!("registry.create", archetypes = self.archetypes.len());
        #[cfg(feature = "profiling")]
        let _guard = span.enter();

        let entity = self.entities.create();
        let archetype_index = self.archetypes.ensure(&B::component_infos());
        let archetype = self
            .archetypes
            .get_mut(archetype_index)
            .expect("ensure returned a valid archetype index");
        let (chunk, row) = archetype.emplace(entity, bundle);
        self.set_location(
            entity,
            EntityLocation {
                archetype: archetype_index,
                chunk,
                row,
            },
        );
        entity
    }

    /// Destroy an entity and all its components.
    pub fn destroy(&mut self, entity: Entity) -> Result<()> {
        let location = self.location(entity)?;
        let archetype = self
            .archetypes
            .get_mut(location.archetype)
            .expect("location points at a live archetype");

        let moved = archetype.swap_erase(location.chunk, location.row, true);
        self.clear_location(entity);
        if let Some(moved) = moved {
            self.set_location(moved, location);
        }
        self.entities.recycle(entity);
        Ok(())
    }

    /// Assign component `C`. Overwrites in place when the entity already has
    /// one; otherwise migrates the entity to the added archetype.
    pub fn set<C: Component>(&mut self, entity: Entity, value: C) -> Result<()> {
        let location = self.location(entity)?;
        let id = component_id::<C>();

        let archetype = self
            .archetypes
            .get(location.archetype)
            .expect("location points at a live archetype");
        if archetype.contains(id) {
            let ptr = archetype.component_ptr::<C>(location.chunk, location.row)?;
            unsafe {
                *ptr = value;
            }
            return Ok(());
        }

        let target = self
            .archetypes
            .ensure_added(location.archetype, ComponentInfo::of::<C>());
        let (source, destination) = self.archetypes.pair_mut(location.archetype, target);
        let ((chunk, row), moved) = source.move_row_to(location.chunk, location.row, destination);
        let ptr = destination.component_ptr::<C>(chunk, row)?;
        unsafe {
            ptr.write(value);
        }

        if let Some(moved) = moved {
            self.set_location(moved, location);
        }
        self.set_location(
            entity,
            EntityLocation {
                archetype: target,
                chunk,
                row,
            },
        );
        Ok(())
    }

    /// Remove component `C`. A missing component is a no-op; a dead entity is
    /// an error.
    pub fn remove<C: Component>(&mut self, entity: Entity) -> Result<()> {
        let location = self.location(entity)?;
        let id = component_id::<C>();

        if !self
            .archetypes
            .get(location.archetype)
            .expect("location points at a live archetype")
            .contains(id)
        {
            return Ok(());
        }

        let target = self.archetypes.ensure_removed(location.archetype, id);
        let (source, destination) = self.archetypes.pair_mut(location.archetype, target);
        let ((chunk, row), moved) = source.move_row_to(location.chunk, location.row, destination);

        if let Some(moved) = moved {
            self.set_location(moved, location);
        }
        self.set_location(
            entity,
            EntityLocation {
                archetype: target,
                chunk,
                row,
            },
        );
        Ok(())
    }

    /// Shared reference to component `C` of an entity.
    pub fn get<C: Component>(&self, entity: Entity) -> Result<&C> {
        let location = self.location(entity)?;
        let archetype = self
            .archetypes
            .get(location.archetype)
            .expect("location points at a live archetype");
        let ptr = archetype.component_ptr::<C>(location.chunk, location.row)?;
        Ok(unsafe { &*ptr })
    }

    /// Exclusive reference to component `C` of an entity.
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> Result<&mut C> {
        let location = self.location(entity)?;
        let archetype = self
            .archetypes
            .get(location.archetype)
            .expect("location points at a live archetype");
        let ptr = archetype.component_ptr::<C>(location.chunk, location.row)?;
        Ok(unsafe { &mut *ptr })
    }

    /// Whether the entity carries component `C`.
    pub fn has<C: Component>(&self, entity: Entity) -> Result<bool> {
        let location = self.location(entity)?;
        Ok(self
            .archetypes
            .get(location.archetype)
            .expect("location points at a live archetype")
            .contains_type::<C>())
    }

    /// Whether the handle names a live entity.
    pub fn alive(&self, entity: Entity) -> bool {
        self.entities.alive(entity)
    }

    /// Reserve an entity handle without touching storage. Thread-safe; the
    /// handle becomes usable after [`sync`](Registry::sync).
    pub fn reserve(&self) -> ReservedEntity {
        ReservedEntity(self.entities.reserve())
    }

    /// Publish all reserved handles. Main thread only.
    pub fn sync(&mut self) {
        self.entities.flush();
    }

    /// Read-only view over all entities carrying the queried components.
    pub fn view<Q: ReadOnlyQuery>(&self) -> View<'_, Q> {
        View::new(self)
    }

    /// Mutable view over all entities carrying the queried components.
    pub fn view_mut<Q: Query>(&mut self) -> View<'_, Q> {
        View::new_mut(self)
    }

    /// Fluent read-only wrapper around one entity.
    pub fn entity(&self, entity: Entity) -> EntityRef<'_> {
        EntityRef::new(self, entity)
    }

    /// Fluent mutable wrapper around one entity.
    pub fn entity_mut(&mut self, entity: Entity) -> EntityMut<'_> {
        EntityMut::new(self, entity)
    }

    /// The archetype arena.
    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.archetypes.iter().map(|a| a.len()).sum()
    }

    /// Storage slot of a live entity.
    pub fn get_location(&self, entity: Entity) -> Result<EntityLocation> {
        self.location(entity)
    }

    // ---- internals shared with entity_ref / command ----

    pub(crate) fn allocate(&mut self) -> Entity {
        self.entities.create()
    }

    pub(crate) fn recycle_handle(&mut self, entity: Entity) {
        self.entities.recycle(entity);
    }

    pub(crate) fn location(&self, entity: Entity) -> Result<EntityLocation> {
        if !self.entities.alive(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        // alive but unplaced handles are reservations awaiting their command
        self.locations
            .get(entity.index())
            .copied()
            .flatten()
            .ok_or(EcsError::EntityNotFound(entity))
    }

    pub(crate) fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        let index = entity.index();
        if index >= self.locations.len() {
            self.locations.resize(index + 1, None);
        }
        self.locations[index] = Some(location);
    }

    fn clear_location(&mut self, entity: Entity) {
        if let Some(slot) = self.locations.get_mut(entity.index()) {
            *slot = None;
        }
    }

    /// Move component `C` out of a single-component entity, destroying it.
    /// Used to transfer staged command payloads.
    pub(crate) fn take_and_destroy<C: Component>(&mut self, entity: Entity) -> Result<C> {
        let location = self.location(entity)?;
        let archetype = self
            .archetypes
            .get_mut(location.archetype)
            .expect("location points at a live archetype");
        debug_assert_eq!(
            archetype.component_infos().len(),
            1,
            "staged payload rows carry exactly one component"
        );

        let ptr = archetype.component_ptr::<C>(location.chunk, location.row)?;
        let value = unsafe { ptr.read() };

        // the only component was moved out, release the row without drops
        let moved = archetype.swap_erase(location.chunk, location.row, false);
        self.clear_location(entity);
        if let Some(moved) = moved {
            self.set_location(moved, location);
        }
        self.entities.recycle(entity);
        Ok(value)
    }

    /// Move an entity's whole row into `dest`, rebinding it to `target`
    /// there. The source handle is recycled.
    pub(crate) fn move_entity_to(
        &mut self,
        entity: Entity,
        dest: &mut Registry,
        target: Entity,
    ) -> Result<()> {
        let location = self.location(entity)?;
        let source_archetype = self
            .archetypes
            .get(location.archetype)
            .expect("location points at a live archetype");
        for info in source_archetype.component_infos() {
            info.verify()?;
        }
        let infos: Vec<ComponentInfo> = source_archetype.component_infos().to_vec();

        let target_index = dest.archetypes.ensure(&infos);
        let source = self
            .archetypes
            .get_mut(location.archetype)
            .expect("location points at a live archetype");
        let destination = dest
            .archetypes
            .get_mut(target_index)
            .expect("ensure returned a valid archetype index");

        let ((chunk, row), moved) = source.move_row_to(location.chunk, location.row, destination);
        destination.set_entity_at(chunk, row, target);

        self.clear_location(entity);
        if let Some(moved) = moved {
            self.set_location(moved, location);
        }
        self.entities.recycle(entity);

        dest.set_location(
            target,
            EntityLocation {
                archetype: target_index,
                chunk,
                row,
            },
        );
        Ok(())
    }

    /// Clone an entity's row into `dest` (a different registry), binding the
    /// copy to `target`.
    pub(crate) fn copy_entity_to(
        &self,
        entity: Entity,
        dest: &mut Registry,
        target: Entity,
    ) -> Result<()> {
        let location = self.location(entity)?;
        let source_archetype = self
            .archetypes
            .get(location.archetype)
            .expect("location points at a live archetype");
        for info in source_archetype.component_infos() {
            info.verify()?;
        }
        let infos: Vec<ComponentInfo> = source_archetype.component_infos().to_vec();

        let target_index = dest.archetypes.ensure(&infos);
        let destination = dest
            .archetypes
            .get_mut(target_index)
            .expect("ensure returned a valid archetype index");
        let (chunk, row) = destination.clone_row_from(
            &source_archetype.chunks()[location.chunk],
            location.row,
        )?;
        destination.set_entity_at(chunk, row, target);
        dest.set_location(
            target,
            EntityLocation {
                archetype: target_index,
                chunk,
                row,
            },
        );
        Ok(())
    }

    /// Clone an entity within this registry, binding the copy to `target`
    /// (a freshly created or reserved-and-published handle).
    pub(crate) fn clone_entity_as(&mut self, entity: Entity, target: Entity) -> Result<Entity> {
        let location = self.location(entity)?;
        let archetype = self
            .archetypes
            .get_mut(location.archetype)
            .expect("location points at a live archetype");
        let (chunk, row) = archetype.clone_row(location.chunk, location.row)?;
        archetype.set_entity_at(chunk, row, target);
        self.set_location(
            target,
            EntityLocation {
                archetype: location.archetype,
                chunk,
                row,
            },
        );
        Ok(target)
    }

    /// Clone an entity within this registry under a fresh handle.
    pub(crate) fn clone_entity(&mut self, entity: Entity) -> Result<Entity> {
        // validate before allocating the target id
        self.location(entity)?;
        let target = self.entities.create();
        match self.clone_entity_as(entity, target) {
            Ok(target) => Ok(target),
            Err(err) => {
                self.entities.recycle(target);
                Err(err)
            }
        }
    }
}
