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

//! Archetypes and the archetype graph.
//!
//! An archetype groups every entity sharing one component set and owns the
//! chunk list that stores them. The [`Archetypes`] arena maps component sets
//! to archetypes and memoizes add/remove transitions; archetypes are never
//! destroyed, so their indices stay valid for the registry's lifetime.

use std::any::TypeId;
use std::sync::Arc;

use ahash::AHashMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::chunk::{BlockTable, Chunk};
use crate::component::{
    component_id, Bundle, Component, ComponentId, ComponentInfo, ComponentSet,
    MAX_BUNDLE_COMPONENTS,
};
use crate::entity::Entity;
use crate::error::{EcsError, Result};

/// Structure-of-arrays storage for one component set.
pub struct Archetype {
    set: ComponentSet,
    infos: Vec<ComponentInfo>,
    table: Arc<BlockTable>,
    chunks: Vec<Chunk>,
    edges_add: FxHashMap<ComponentId, usize>,
    edges_remove: FxHashMap<ComponentId, usize>,
}

impl Archetype {
    /// Build an archetype for the given descriptors (sorted by id, unique).
    fn new(infos: Vec<ComponentInfo>) -> Self {
        assert!(
            infos.iter().all(|i| i.type_id() != TypeId::of::<Entity>()),
            "the entity handle cannot be used as a component"
        );

        let mut set = ComponentSet::new();
        for info in &infos {
            set.insert(info.id());
        }

        let table = Arc::new(BlockTable::new(&infos));
        // one empty chunk up front amortizes the allocation on first insert
        let chunks = vec![Chunk::new(Arc::clone(&table))];
        Self {
            set,
            infos,
            table,
            chunks,
            edges_add: FxHashMap::default(),
            edges_remove: FxHashMap::default(),
        }
    }

    pub fn component_set(&self) -> &ComponentSet {
        &self.set
    }

    pub fn component_infos(&self) -> &[ComponentInfo] {
        &self.infos
    }

    pub(crate) fn block_table(&self) -> &Arc<BlockTable> {
        &self.table
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Total number of live rows.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Chunk::is_empty)
    }

    /// Membership in the component set. The entity column is always present.
    pub fn contains(&self, id: ComponentId) -> bool {
        self.set.contains(id)
    }

    pub fn contains_type<C: Component>(&self) -> bool {
        if TypeId::of::<C>() == TypeId::of::<Entity>() {
            return true;
        }
        self.set.contains(component_id::<C>())
    }

    fn ensure_free_chunk(&mut self) -> usize {
        if self.chunks.last().map(Chunk::is_full) == Some(true) {
            self.chunks.push(Chunk::new(Arc::clone(&self.table)));
        }
        self.chunks.len() - 1
    }

    /// Append an entity with its bundle, returning `(chunk, row)`.
    pub(crate) fn emplace<B: Bundle>(&mut self, entity: Entity, bundle: B) -> (usize, usize) {
        let infos = B::component_infos();
        let chunk_index = self.ensure_free_chunk();
        let chunk = &mut self.chunks[chunk_index];
        let row = chunk.push_entity(entity);

        let mut ptrs: SmallVec<[*mut u8; MAX_BUNDLE_COMPONENTS]> = SmallVec::new();
        for info in &infos {
            let block = self
                .table
                .find(info.id())
                .expect("bundle component is part of this archetype");
            ptrs.push(chunk.slot_ptr(block, row));
        }
        unsafe {
            bundle.write_components(&ptrs);
        }
        (chunk_index, row)
    }

    /// Remove the row at `(chunk, row)`, backfilling from the archetype's last
    /// row. Returns the entity that was moved into the hole, if any. With
    /// `drop_components` false the row is assumed already moved out.
    pub(crate) fn swap_erase(
        &mut self,
        chunk_index: usize,
        row: usize,
        drop_components: bool,
    ) -> Option<Entity> {
        let last = self.chunks.len() - 1;
        let moved = if chunk_index == last {
            self.chunks[last].swap_remove(row, drop_components)
        } else {
            let (head, tail) = self.chunks.split_at_mut(last);
            Some(head[chunk_index].swap_remove_from(row, &mut tail[0], drop_components))
        };

        if self.chunks.len() > 1 && self.chunks[self.chunks.len() - 1].is_empty() {
            self.chunks.pop();
        }
        moved
    }

    /// Move the row into `other`, transferring the columns both archetypes
    /// share and dropping the rest. Returns the new `(chunk, row)` and the
    /// entity displaced in this archetype, if any.
    pub(crate) fn move_row_to(
        &mut self,
        chunk_index: usize,
        row: usize,
        other: &mut Archetype,
    ) -> ((usize, usize), Option<Entity>) {
        let dst_chunk = other.ensure_free_chunk();
        let dst_row = self.chunks[chunk_index].move_row(row, &mut other.chunks[dst_chunk]);
        let moved = self.swap_erase(chunk_index, row, false);
        ((dst_chunk, dst_row), moved)
    }

    /// Clone a row of a foreign chunk (same component set) into this
    /// archetype's free row.
    pub(crate) fn clone_row_from(
        &mut self,
        src_chunk: &Chunk,
        src_row: usize,
    ) -> Result<(usize, usize)> {
        let dst_chunk = self.ensure_free_chunk();
        let dst_row = src_chunk.clone_row(src_row, &mut self.chunks[dst_chunk])?;
        Ok((dst_chunk, dst_row))
    }

    /// Duplicate a row in place via the registered clone callbacks.
    pub(crate) fn clone_row(&mut self, chunk_index: usize, row: usize) -> Result<(usize, usize)> {
        let dst_chunk = self.ensure_free_chunk();
        let dst_row = if dst_chunk == chunk_index {
            self.chunks[chunk_index].clone_row_within(row)?
        } else {
            let (head, tail) = self.chunks.split_at_mut(dst_chunk);
            head[chunk_index].clone_row(row, &mut tail[0])?
        };
        Ok((dst_chunk, dst_row))
    }

    /// Typed pointer into a column slot.
    pub(crate) fn component_ptr<C: Component>(
        &self,
        chunk_index: usize,
        row: usize,
    ) -> Result<*mut C> {
        let block = self
            .table
            .find(component_id::<C>())
            .ok_or(EcsError::ComponentMissing(std::any::type_name::<C>()))?;
        let chunk = &self.chunks[chunk_index];
        debug_assert!(row < chunk.len());
        Ok(chunk.slot_ptr(block, row) as *mut C)
    }

    /// Entity stored at a row.
    pub(crate) fn entity_at(&self, chunk_index: usize, row: usize) -> Entity {
        self.chunks[chunk_index].entity(row)
    }

    pub(crate) fn set_entity_at(&mut self, chunk_index: usize, row: usize, entity: Entity) {
        self.chunks[chunk_index].set_entity(row, entity);
    }
}

/// Arena of archetypes keyed by component set.
#[derive(Default)]
pub struct Archetypes {
    archetypes: Vec<Archetype>,
    index: AHashMap<ComponentSet, usize>,
}

impl Archetypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Archetype> {
        self.archetypes.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Archetype> {
        self.archetypes.get_mut(index)
    }

    /// Mutable references to two distinct archetypes.
    pub(crate) fn pair_mut(&mut self, a: usize, b: usize) -> (&mut Archetype, &mut Archetype) {
        debug_assert_ne!(a, b);
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    /// Get or create the archetype for a component list. Descriptors may be
    /// unordered; duplicate component types are a programming error.
    pub(crate) fn ensure(&mut self, infos: &[ComponentInfo]) -> usize {
        let mut sorted: Vec<ComponentInfo> = infos.to_vec();
        sorted.sort_by_key(|i| i.id());
        assert!(
            sorted.windows(2).all(|w| w[0].id() != w[1].id()),
            "duplicate component type in bundle"
        );

        let mut set = ComponentSet::new();
        for info in &sorted {
            set.insert(info.id());
        }

        if let Some(&index) = self.index.get(&set) {
            return index;
        }

        let index = self.archetypes.len();
        self.archetypes.push(Archetype::new(sorted));
        self.index.insert(set, index);
        index
    }

    /// Archetype reached from `anchor` by adding one component; the edge is
    /// memoized so warm transitions skip the hash lookup.
    pub(crate) fn ensure_added(&mut self, anchor: usize, info: ComponentInfo) -> usize {
        if let Some(&index) = self.archetypes[anchor].edges_add.get(&info.id()) {
            return index;
        }

        let mut infos = self.archetypes[anchor].infos.clone();
        if !self.archetypes[anchor].contains(info.id()) {
            infos.push(info);
        }
        let index = self.ensure(&infos);
        self.archetypes[anchor].edges_add.insert(info.id(), index);
        index
    }

    /// Archetype reached from `anchor` by removing one component.
    pub(crate) fn ensure_removed(&mut self, anchor: usize, id: ComponentId) -> usize {
        if let Some(&index) = self.archetypes[anchor].edges_remove.get(&id) {
            return index;
        }

        let infos: Vec<ComponentInfo> = self.archetypes[anchor]
            .infos
            .iter()
            .filter(|i| i.id() != id)
            .copied()
            .collect();
        let index = self.ensure(&infos);
        self.archetypes[anchor].edges_remove.insert(id, index);
        index
    }
}
