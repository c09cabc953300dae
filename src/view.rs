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

//! Type-checked iteration over matching chunks.
//!
//! A view walks every archetype whose component set contains the queried
//! components, chunk by chunk, row by row. Queries are tuples of fetch
//! markers: `Read<C>` yields `&C`, `Write<C>` yields `&mut C`, and a bare
//! `Entity` yields the row's handle.
//!
//! The closure modes are defined in terms of the range mode so the two can
//! never drift apart.

use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::archetype::Archetype;
use crate::chunk::Chunk;
use crate::component::{component_id, Component};
use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::registry::Registry;
use crate::system::AccessPattern;
use crate::thread_pool::ThreadPool;

/// Marker requesting shared access to component `C`.
pub struct Read<C>(PhantomData<C>);

/// Marker requesting exclusive access to component `C`.
pub struct Write<C>(PhantomData<C>);

/// One element of a query tuple.
///
/// # Safety
/// `base` must return a pointer valid for `chunk.len()` rows whenever
/// `matches` approved the archetype, and `item` must not outlive the chunk.
pub unsafe trait Fetch: 'static {
    type Base: Copy + 'static;
    type Item<'w>;

    fn register_access(pattern: &mut AccessPattern);
    fn matches(archetype: &Archetype) -> bool;

    /// Column base pointer for a chunk of a matching archetype.
    fn base(archetype: &Archetype, chunk: &Chunk) -> Result<Self::Base>;

    /// # Safety
    /// `row` is a live row of the chunk `base` was fetched from, and the
    /// access declared by `register_access` is exclusive for `'w`.
    unsafe fn item<'w>(base: Self::Base, row: usize) -> Self::Item<'w>;
}

unsafe impl<C: Component> Fetch for Read<C> {
    type Base = *const C;
    type Item<'w> = &'w C;

    fn register_access(pattern: &mut AccessPattern) {
        pattern.add_read(component_id::<C>());
    }

    fn matches(archetype: &Archetype) -> bool {
        archetype.contains(component_id::<C>())
    }

    fn base(archetype: &Archetype, chunk: &Chunk) -> Result<Self::Base> {
        let block = archetype
            .block_table()
            .find(component_id::<C>())
            .ok_or(EcsError::ComponentMissing(std::any::type_name::<C>()))?;
        Ok(chunk.block_ptr(block) as *const C)
    }

    unsafe fn item<'w>(base: Self::Base, row: usize) -> &'w C {
        &*base.add(row)
    }
}

unsafe impl<C: Component> Fetch for Write<C> {
    type Base = *mut C;
    type Item<'w> = &'w mut C;

    fn register_access(pattern: &mut AccessPattern) {
        pattern.add_write(component_id::<C>());
    }

    fn matches(archetype: &Archetype) -> bool {
        archetype.contains(component_id::<C>())
    }

    fn base(archetype: &Archetype, chunk: &Chunk) -> Result<Self::Base> {
        let block = archetype
            .block_table()
            .find(component_id::<C>())
            .ok_or(EcsError::ComponentMissing(std::any::type_name::<C>()))?;
        Ok(chunk.block_ptr(block) as *mut C)
    }

    unsafe fn item<'w>(base: Self::Base, row: usize) -> &'w mut C {
        &mut *base.add(row)
    }
}

/// Fetching `Entity` yields the row's handle; the entity column is present in
/// every archetype and is never written through a view.
unsafe impl Fetch for Entity {
    type Base = *const Entity;
    type Item<'w> = Entity;

    fn register_access(_pattern: &mut AccessPattern) {}

    fn matches(_archetype: &Archetype) -> bool {
        true
    }

    fn base(_archetype: &Archetype, chunk: &Chunk) -> Result<Self::Base> {
        Ok(chunk.entity_base() as *const Entity)
    }

    unsafe fn item<'w>(base: Self::Base, row: usize) -> Self::Item<'w> {
        *base.add(row)
    }
}

/// A tuple of fetches.
///
/// # Safety
/// Implementations must forward faithfully to their element fetches.
pub unsafe trait Query: 'static {
    type Bases: Copy + 'static;
    type Item<'w>;

    fn register_access(pattern: &mut AccessPattern);
    fn matches(archetype: &Archetype) -> bool;
    fn bases(archetype: &Archetype, chunk: &Chunk) -> Result<Self::Bases>;

    /// # Safety
    /// Same contract as [`Fetch::item`] for every element.
    unsafe fn item<'w>(bases: &Self::Bases, row: usize) -> Self::Item<'w>;
}

/// Queries whose every element is read-only; obtainable from `&Registry`.
pub unsafe trait ReadOnlyQuery: Query {}

/// Read-only fetch marker trait.
pub unsafe trait ReadOnlyFetch: Fetch {}

unsafe impl<C: Component> ReadOnlyFetch for Read<C> {}
unsafe impl ReadOnlyFetch for Entity {}

macro_rules! impl_query {
    ($($F:ident),+) => {
        unsafe impl<$($F: Fetch),+> Query for ($($F,)+) {
            type Bases = ($($F::Base,)+);
            type Item<'w> = ($($F::Item<'w>,)+);

            fn register_access(pattern: &mut AccessPattern) {
                $($F::register_access(pattern);)+
            }

            fn matches(archetype: &Archetype) -> bool {
                $($F::matches(archetype))&&+
            }

            fn bases(archetype: &Archetype, chunk: &Chunk) -> Result<Self::Bases> {
                Ok(($($F::base(archetype, chunk)?,)+))
            }

            #[allow(non_snake_case)]
            unsafe fn item<'w>(bases: &Self::Bases, row: usize) -> Self::Item<'w> {
                let ($($F,)+) = *bases;
                ($($F::item($F, row),)+)
            }
        }

        unsafe impl<$($F: ReadOnlyFetch),+> ReadOnlyQuery for ($($F,)+) {}
    };
}

impl_query!(A);
impl_query!(A, B);
impl_query!(A, B, C);
impl_query!(A, B, C, D);
impl_query!(A, B, C, D, E);
impl_query!(A, B, C, D, E, F);
impl_query!(A, B, C, D, E, F, G);
impl_query!(A, B, C, D, E, F, G, H);

/// Iteration adapter over all chunks matching query `Q`.
///
/// Structural mutation never happens through a view; interleaving iteration
/// with `create`/`set`/`remove`/`destroy` on the same thread is prevented by
/// the borrow it holds. Systems running in parallel defer structure changes
/// through the command buffer instead.
pub struct View<'w, Q: Query> {
    registry: NonNull<Registry>,
    _marker: PhantomData<(&'w Registry, fn() -> Q)>,
}

impl<'w, Q: Query> View<'w, Q> {
    pub(crate) fn new(registry: &'w Registry) -> Self {
        Self {
            registry: NonNull::from(registry),
            _marker: PhantomData,
        }
    }

    pub(crate) fn new_mut(registry: &'w mut Registry) -> Self {
        Self {
            registry: NonNull::from(registry),
            _marker: PhantomData,
        }
    }

    /// Build a view from a raw registry pointer.
    ///
    /// # Safety
    /// The caller must guarantee the registry outlives `'w` and that the
    /// access declared by `Q` does not conflict with any concurrent access;
    /// the scheduler's wave partitioning provides exactly that.
    pub(crate) unsafe fn from_raw(registry: *mut Registry) -> Self {
        Self {
            registry: NonNull::new_unchecked(registry),
            _marker: PhantomData,
        }
    }

    fn registry(&self) -> &'w Registry {
        unsafe { self.registry.as_ref() }
    }

    /// Forward iterator over matching rows. Equality of items across
    /// different view instances is not defined.
    pub fn iter(&mut self) -> ViewIter<'_, Q> {
        let registry = unsafe { self.registry.as_ref() };
        let matched = registry
            .archetypes()
            .iter()
            .enumerate()
            .filter(|(_, archetype)| Q::matches(archetype))
            .map(|(index, _)| index)
            .collect();
        ViewIter {
            registry,
            matched,
            position: 0,
            chunk_index: 0,
            bases: None,
            row: 0,
            len: 0,
        }
    }

    /// Call `func` once per matching row.
    pub fn each<F>(&mut self, mut func: F)
    where
        F: for<'x> FnMut(<Q as Query>::Item<'x>),
    {
        for item in self.iter() {
            func(item);
        }
    }

    /// Call `func` once per matching row, partitioning the chunk sequence
    /// into one batch per worker of the global thread pool.
    pub fn par_each<F>(&mut self, func: F)
    where
        F: for<'x> Fn(<Q as Query>::Item<'x>) + Send + Sync,
    {
        let registry = self.registry();
        let mut runs: Vec<ChunkRun<Q>> = Vec::new();
        for archetype in registry.archetypes().iter() {
            if !Q::matches(archetype) {
                continue;
            }
            for chunk in archetype.chunks() {
                if chunk.is_empty() {
                    continue;
                }
                runs.push(ChunkRun {
                    bases: Q::bases(archetype, chunk)
                        .expect("archetype was matched against the query"),
                    len: chunk.len(),
                });
            }
        }

        ThreadPool::get().parallel_for(runs, |run| {
            for row in 0..run.len {
                // SAFETY: rows are live, and chunk batches are disjoint
                // across workers; the declared access pattern covers this
                // mutation.
                func(unsafe { Q::item(&run.bases, row) });
            }
        });
    }

    /// Components of one entity, shaped by the query.
    pub fn get(&mut self, entity: Entity) -> Result<Q::Item<'_>> {
        let registry = unsafe { self.registry.as_ref() };
        let location = registry.location(entity)?;
        let archetype = registry
            .archetypes()
            .get(location.archetype)
            .expect("location points at a live archetype");
        let chunk = &archetype.chunks()[location.chunk];
        let bases = Q::bases(archetype, chunk)?;
        // SAFETY: the location invariant guarantees a live row; the view's
        // borrow covers the access.
        Ok(unsafe { Q::item(&bases, location.row) })
    }
}

/// One chunk's worth of parallel work.
struct ChunkRun<Q: Query> {
    bases: Q::Bases,
    len: usize,
}

// Bases are raw pointers into chunks of `Send + Sync` component data.
unsafe impl<Q: Query> Send for ChunkRun<Q> {}

/// Forward iterator produced by [`View::iter`].
pub struct ViewIter<'w, Q: Query> {
    registry: &'w Registry,
    matched: Vec<usize>,
    position: usize,
    chunk_index: usize,
    bases: Option<Q::Bases>,
    row: usize,
    len: usize,
}

impl<'w, Q: Query> ViewIter<'w, Q> {
    fn advance_chunk(&mut self) -> Option<()> {
        loop {
            let &archetype_index = self.matched.get(self.position)?;
            let archetype = self
                .registry
                .archetypes()
                .get(archetype_index)
                .expect("matched archetype index is valid");
            if self.chunk_index < archetype.chunks().len() {
                let chunk = &archetype.chunks()[self.chunk_index];
                self.bases = Some(
                    Q::bases(archetype, chunk).expect("archetype was matched against the query"),
                );
                self.len = chunk.len();
                self.row = 0;
                self.chunk_index += 1;
                return Some(());
            }
            self.position += 1;
            self.chunk_index = 0;
        }
    }
}

impl<'w, Q: Query> Iterator for ViewIter<'w, Q> {
    type Item = <Q as Query>::Item<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(bases) = self.bases {
                if self.row < self.len {
                    let row = self.row;
                    self.row += 1;
                    // SAFETY: `row` is live in the current chunk and the
                    // view's borrow makes the declared access exclusive.
                    return Some(unsafe { Q::item(&bases, row) });
                }
            }
            self.advance_chunk()?;
        }
    }
}
