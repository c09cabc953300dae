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

//! Entity handles and the generational id pool.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Opaque entity handle: a dense id plus a generation counter.
///
/// Entities are never dereferenced; identity is purely numeric. Ordering and
/// equality are lexicographic on `(id, generation)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    id: u32,
    generation: u32,
}

impl Entity {
    /// Construct a handle from raw parts.
    pub const fn new(id: u32, generation: u32) -> Self {
        Self { id, generation }
    }

    /// The sentinel handle that never names a live entity.
    pub const fn invalid() -> Self {
        Self {
            id: u32::MAX,
            generation: u32::MAX,
        }
    }

    /// True unless this is the invalid sentinel.
    pub fn valid(&self) -> bool {
        *self != Self::invalid()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub(crate) fn index(&self) -> usize {
        self.id as usize
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Storage slot of a live entity: archetype, chunk within it, row within the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: usize,
    pub chunk: usize,
    pub row: usize,
}

/// An entity reserved concurrently via [`EntityPool::reserve`].
///
/// The handle is real but unusable for component access until the pool is
/// flushed on the owning thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedEntity(pub(crate) Entity);

impl ReservedEntity {
    /// The underlying handle.
    pub fn entity(&self) -> Entity {
        self.0
    }
}

/// Pool of entity ids. Generates handles, recycles dead ids with a bumped
/// generation, and supports lock-free reservation published by [`flush`].
///
/// Concurrent `reserve` calls are linearizable. `create`/`recycle`/`flush`
/// take `&mut self`, so the borrow checker rules out racing them with
/// reservations from the same reference.
///
/// [`flush`]: EntityPool::flush
#[derive(Default)]
pub struct EntityPool {
    next_id: AtomicU32,
    /// Signed cursor into `free_ids`. Negative depth counts reservations that
    /// overflowed the free list and must be published by `flush`.
    free_cursor: AtomicI64,
    generations: Vec<u32>,
    free_ids: Vec<u32>,
}

impl EntityPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new handle, reusing a recycled id when one is available.
    pub fn create(&mut self) -> Entity {
        if let Some(id) = self.free_ids.pop() {
            self.free_cursor
                .store(self.free_ids.len() as i64, Ordering::Relaxed);
            return Entity::new(id, self.generations[id as usize]);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.generations.push(0);
        Entity::new(id, 0)
    }

    /// True iff the handle's generation matches the pool's record for its id.
    pub fn alive(&self, entity: Entity) -> bool {
        match self.generations.get(entity.index()) {
            Some(&generation) => generation == entity.generation(),
            None => false,
        }
    }

    /// Retire a handle. The id is queued for reuse with a bumped generation.
    /// Dead handles are ignored.
    pub fn recycle(&mut self, entity: Entity) {
        if !self.alive(entity) {
            return;
        }
        self.generations[entity.index()] += 1;
        self.free_ids.push(entity.id());
        self.free_cursor.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserve a handle. Thread-safe; the result is not usable for component
    /// access until [`flush`](EntityPool::flush) runs.
    pub fn reserve(&self) -> Entity {
        let n = self.free_cursor.fetch_sub(1, Ordering::Relaxed);
        if n > 0 {
            let id = self.free_ids[(n - 1) as usize];
            return Entity::new(id, self.generations[id as usize]);
        }
        Entity::new(self.next_id.fetch_add(1, Ordering::Relaxed), 0)
    }

    /// Publish all outstanding reservations. Single-threaded.
    ///
    /// After this call every reserved handle is indistinguishable from a
    /// `create` result.
    pub fn flush(&mut self) {
        let mut cursor = self.free_cursor.load(Ordering::Relaxed);

        while cursor < 0 {
            self.generations.push(0);
            cursor += 1;
        }

        self.free_ids.truncate(cursor as usize);
        self.free_cursor.store(cursor, Ordering::Relaxed);
    }

    /// Number of id slots ever allocated.
    pub fn capacity(&self) -> usize {
        self.generations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_recycle_bumps_generation() {
        let mut pool = EntityPool::new();
        let a = pool.create();
        assert_eq!(a, Entity::new(0, 0));
        assert!(pool.alive(a));

        pool.recycle(a);
        assert!(!pool.alive(a));

        let b = pool.create();
        assert_eq!(b, Entity::new(0, 1));
        assert!(pool.alive(b));
        assert!(!pool.alive(a));
    }

    #[test]
    fn test_recycle_dead_is_noop() {
        let mut pool = EntityPool::new();
        let a = pool.create();
        pool.recycle(a);
        pool.recycle(a);
        let b = pool.create();
        assert_eq!(b.generation(), 1);
        // a second create must not reuse the same id again
        let c = pool.create();
        assert_ne!(b.id(), c.id());
    }

    #[test]
    fn test_reserve_reuses_free_ids_then_allocates() {
        let mut pool = EntityPool::new();
        let a = pool.create();
        let _b = pool.create();
        pool.recycle(a);

        let r1 = pool.reserve();
        assert_eq!(r1, Entity::new(a.id(), 1));
        let r2 = pool.reserve();
        assert_eq!(r2, Entity::new(2, 0));

        // not yet published
        assert!(!pool.alive(r2));
        pool.flush();
        assert!(pool.alive(r1));
        assert!(pool.alive(r2));
    }

    #[test]
    fn test_concurrent_reserve_yields_distinct_handles() {
        use std::sync::Arc;

        let pool = Arc::new(EntityPool::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                (0..256).map(|_| pool.reserve()).collect::<Vec<_>>()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for entity in handle.join().unwrap() {
                assert!(seen.insert(entity), "duplicate reservation {entity:?}");
            }
        }

        let mut pool = Arc::try_unwrap(pool).ok().unwrap();
        pool.flush();
        for &entity in &seen {
            assert!(pool.alive(entity));
        }
    }

    #[test]
    fn test_entity_order_is_lexicographic() {
        assert!(Entity::new(1, 5) < Entity::new(2, 0));
        assert!(Entity::new(1, 0) < Entity::new(1, 1));
        assert!(!Entity::invalid().valid());
    }
}
