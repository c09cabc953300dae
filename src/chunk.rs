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

//! Fixed-size SoA chunks.
//!
//! A chunk is one 16 KiB buffer partitioned into per-component columns plus
//! the entity column: `|e1 e2 ...|A1 A2 ...|B1 B2 ...|`. Rows `[0, len)` are
//! constructed, rows `[len, capacity)` are uninitialized. The column layout
//! is shared by all chunks of an archetype through a [`BlockTable`].

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::component::{clone_fn_of, ComponentId, ComponentInfo};
use crate::entity::Entity;
use crate::error::EcsError;

/// Chunk size in bytes
pub const CHUNK_BYTES: usize = 16 * 1024;

/// One column: a component descriptor and its byte offset inside the buffer.
#[derive(Debug, Clone, Copy)]
pub struct Block {
    info: ComponentInfo,
    offset: usize,
}

impl Block {
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Column layout for one archetype: offsets, row capacity, buffer layout.
///
/// The entity column sits at offset zero; component columns follow in
/// ascending component-id order, each aligned to its component's alignment
/// and pairwise non-overlapping.
#[derive(Debug)]
pub struct BlockTable {
    blocks: Vec<Block>,
    capacity: usize,
    buffer_layout: Layout,
}

const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

impl BlockTable {
    /// Build the layout for the given component descriptors.
    ///
    /// `infos` must be sorted by component id and free of duplicates; the
    /// archetype constructor guarantees both.
    pub fn new(infos: &[ComponentInfo]) -> Self {
        let entity_size = std::mem::size_of::<Entity>();
        let entity_align = std::mem::align_of::<Entity>();

        debug_assert!(infos.windows(2).all(|w| w[0].id() < w[1].id()));

        // Size of one fully-aligned row struct; the packed sum ignores padding.
        let packed: usize = entity_size + infos.iter().map(|i| i.size()).sum::<usize>();
        let mut aligned = entity_size;
        for info in infos {
            aligned = align_up(aligned, info.align()) + info.size();
        }
        assert!(
            aligned <= CHUNK_BYTES,
            "total size of components exceeds the {CHUNK_BYTES} byte chunk"
        );

        let mut capacity = (CHUNK_BYTES - aligned) / packed + 1;

        // Column padding can exceed row-struct padding for adversarial
        // alignment mixes; shrink until the columns actually fit.
        let mut blocks = Vec::with_capacity(infos.len());
        loop {
            blocks.clear();
            let mut offset = entity_size * capacity;
            for info in infos {
                offset = align_up(offset, info.align());
                blocks.push(Block {
                    info: *info,
                    offset,
                });
                offset += info.size() * capacity;
            }
            if offset <= CHUNK_BYTES {
                break;
            }
            capacity -= 1;
        }

        let max_align = infos
            .iter()
            .map(|i| i.align())
            .fold(entity_align, usize::max);

        Self {
            blocks,
            capacity,
            buffer_layout: Layout::from_size_align(CHUNK_BYTES, max_align)
                .expect("chunk layout is statically valid"),
        }
    }

    /// How many rows one chunk holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Column for a component id, by binary search over the sorted blocks.
    pub fn find(&self, id: ComponentId) -> Option<&Block> {
        self.blocks
            .binary_search_by_key(&id, |b| b.info().id())
            .ok()
            .map(|idx| &self.blocks[idx])
    }
}

/// A 16 KiB block of rows laid out per its archetype's [`BlockTable`].
pub struct Chunk {
    table: Arc<BlockTable>,
    data: NonNull<u8>,
    len: usize,
}

// Columns only ever hold `Component` values, which are `Send + Sync`; the raw
// buffer pointer does not change that.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    pub fn new(table: Arc<BlockTable>) -> Self {
        let layout = table.buffer_layout;
        let data = unsafe { alloc::alloc(layout) };
        let data = NonNull::new(data).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self {
            table,
            data,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Base pointer of a column.
    pub(crate) fn block_ptr(&self, block: &Block) -> *mut u8 {
        unsafe { self.data.as_ptr().add(block.offset()) }
    }

    /// Pointer to a column slot. The row may be uninitialized.
    pub(crate) fn slot_ptr(&self, block: &Block, row: usize) -> *mut u8 {
        debug_assert!(row < self.capacity());
        unsafe { self.block_ptr(block).add(row * block.info().size()) }
    }

    pub(crate) fn entity_base(&self) -> *mut Entity {
        self.data.as_ptr() as *mut Entity
    }

    /// Entity stored at a live row.
    pub fn entity(&self, row: usize) -> Entity {
        debug_assert!(row < self.len);
        unsafe { *self.entity_base().add(row) }
    }

    /// Claim the next free row, writing its entity. Component columns for the
    /// row must be written by the caller before anything observes it.
    ///
    /// A full chunk here means the archetype's free-chunk invariant broke.
    pub(crate) fn push_entity(&mut self, entity: Entity) -> usize {
        assert!(!self.is_full(), "{}", EcsError::ChunkCapacityExceeded);
        let row = self.len;
        unsafe {
            self.entity_base().add(row).write(entity);
        }
        self.len = row + 1;
        row
    }

    /// Rewrite the entity handle of a live row (placeholder publication).
    pub(crate) fn set_entity(&mut self, row: usize, entity: Entity) {
        debug_assert!(row < self.len);
        unsafe {
            self.entity_base().add(row).write(entity);
        }
    }

    fn drop_row(&mut self, row: usize) {
        for block in self.table.clone().blocks() {
            if let Some(drop_fn) = block.info().drop_fn() {
                unsafe { drop_fn(self.slot_ptr(block, row)) }
            }
        }
    }

    /// Copy every column of `src_row` over `dst_row` without dropping either.
    fn overwrite_row_within(&mut self, dst_row: usize, src_row: usize) {
        unsafe {
            let entity = *self.entity_base().add(src_row);
            self.entity_base().add(dst_row).write(entity);
        }
        let table = self.table.clone();
        for block in table.blocks() {
            let size = block.info().size();
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.slot_ptr(block, src_row),
                    self.slot_ptr(block, dst_row),
                    size,
                );
            }
        }
    }

    /// Copy every column of `donor`'s last row over `dst_row` of `self`, then
    /// pop the donor row. No values are dropped.
    fn overwrite_row_from(&mut self, dst_row: usize, donor: &mut Chunk) {
        debug_assert!(!donor.is_empty());
        let src_row = donor.len - 1;
        unsafe {
            let entity = *donor.entity_base().add(src_row);
            self.entity_base().add(dst_row).write(entity);
        }
        let table = self.table.clone();
        for block in table.blocks() {
            let donor_block = donor
                .table
                .find(block.info().id())
                .expect("donor chunk belongs to the same archetype");
            unsafe {
                std::ptr::copy_nonoverlapping(
                    donor.slot_ptr(donor_block, src_row),
                    self.slot_ptr(block, dst_row),
                    block.info().size(),
                );
            }
        }
        donor.len = src_row;
    }

    /// Remove a row, backfilling from this chunk's own last row. Returns the
    /// entity moved into `row`, if any. `drop_components` is false when the
    /// row's values were already moved out.
    pub(crate) fn swap_remove(&mut self, row: usize, drop_components: bool) -> Option<Entity> {
        debug_assert!(row < self.len);
        if drop_components {
            self.drop_row(row);
        }
        let last = self.len - 1;
        if row < last {
            self.overwrite_row_within(row, last);
            self.len = last;
            Some(self.entity(row))
        } else {
            self.len = last;
            None
        }
    }

    /// Remove a row, backfilling from another (last) chunk of the archetype.
    pub(crate) fn swap_remove_from(
        &mut self,
        row: usize,
        donor: &mut Chunk,
        drop_components: bool,
    ) -> Entity {
        debug_assert!(row < self.len);
        if drop_components {
            self.drop_row(row);
        }
        self.overwrite_row_from(row, donor);
        self.entity(row)
    }

    /// Move a row into `dst`, which may belong to a different archetype.
    ///
    /// Columns present in both tables are moved; columns only in the source
    /// are dropped; columns only in the destination are left uninitialized
    /// for the caller to fill. The source row itself stays allocated and must
    /// be released with a non-dropping `swap_remove`.
    pub(crate) fn move_row(&mut self, row: usize, dst: &mut Chunk) -> usize {
        debug_assert!(row < self.len);
        assert!(!dst.is_full(), "{}", EcsError::ChunkCapacityExceeded);
        let dst_row = dst.len;
        unsafe {
            let entity = *self.entity_base().add(row);
            dst.entity_base().add(dst_row).write(entity);
        }
        let table = self.table.clone();
        for block in table.blocks() {
            match dst.table.find(block.info().id()) {
                Some(dst_block) => unsafe {
                    std::ptr::copy_nonoverlapping(
                        self.slot_ptr(block, row),
                        dst.slot_ptr(dst_block, dst_row),
                        block.info().size(),
                    );
                },
                None => {
                    if let Some(drop_fn) = block.info().drop_fn() {
                        unsafe { drop_fn(self.slot_ptr(block, row)) }
                    }
                }
            }
        }
        dst.len = dst_row + 1;
        dst_row
    }

    /// Clone a row into `dst` (same archetype) using the registered clone
    /// callbacks. Fails with `NotCopyable` before touching anything if any
    /// column lacks one. The destination entity handle is written by the
    /// caller.
    pub(crate) fn clone_row(&self, row: usize, dst: &mut Chunk) -> crate::error::Result<usize> {
        debug_assert!(row < self.len);
        assert!(!dst.is_full(), "{}", EcsError::ChunkCapacityExceeded);

        let mut clone_fns = Vec::with_capacity(self.table.blocks().len());
        for block in self.table.blocks() {
            match clone_fn_of(block.info().id()) {
                Some(f) => clone_fns.push(f),
                None => return Err(EcsError::NotCopyable(block.info().name())),
            }
        }

        let dst_row = dst.len;
        for (block, clone_fn) in self.table.blocks().iter().zip(clone_fns) {
            let dst_block = dst
                .table
                .find(block.info().id())
                .expect("clone destination shares the archetype layout");
            unsafe {
                clone_fn(
                    self.slot_ptr(block, row) as *const u8,
                    dst.slot_ptr(dst_block, dst_row),
                );
            }
        }
        unsafe {
            dst.entity_base().add(dst_row).write(Entity::invalid());
        }
        dst.len = dst_row + 1;
        Ok(dst_row)
    }

    /// Clone a row into this chunk's own next free row.
    pub(crate) fn clone_row_within(&mut self, row: usize) -> crate::error::Result<usize> {
        debug_assert!(row < self.len);
        assert!(!self.is_full(), "{}", EcsError::ChunkCapacityExceeded);

        let table = self.table.clone();
        let mut clone_fns = Vec::with_capacity(table.blocks().len());
        for block in table.blocks() {
            match clone_fn_of(block.info().id()) {
                Some(f) => clone_fns.push(f),
                None => return Err(EcsError::NotCopyable(block.info().name())),
            }
        }

        let dst_row = self.len;
        for (block, clone_fn) in table.blocks().iter().zip(clone_fns) {
            unsafe {
                clone_fn(
                    self.slot_ptr(block, row) as *const u8,
                    self.slot_ptr(block, dst_row),
                );
            }
        }
        unsafe {
            self.entity_base().add(dst_row).write(Entity::invalid());
        }
        self.len = dst_row + 1;
        Ok(dst_row)
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        for block in self.table.clone().blocks() {
            if let Some(drop_fn) = block.info().drop_fn() {
                for row in 0..self.len {
                    unsafe { drop_fn(self.slot_ptr(block, row)) }
                }
            }
        }
        unsafe {
            alloc::dealloc(self.data.as_ptr(), self.table.buffer_layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{register_clone, ComponentInfo};

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Name(String);

    fn table_of(mut infos: Vec<ComponentInfo>) -> Arc<BlockTable> {
        infos.sort_by_key(|i| i.id());
        Arc::new(BlockTable::new(&infos))
    }

    #[test]
    fn test_layout_is_aligned_and_disjoint() {
        let table = table_of(vec![ComponentInfo::of::<Pos>(), ComponentInfo::of::<u64>()]);

        let entity_bytes = std::mem::size_of::<Entity>() * table.capacity();
        let mut previous_end = entity_bytes;
        let mut blocks: Vec<_> = table.blocks().to_vec();
        blocks.sort_by_key(|b| b.offset());
        for block in &blocks {
            assert_eq!(block.offset() % block.info().align(), 0);
            assert!(block.offset() >= previous_end, "columns overlap");
            previous_end = block.offset() + block.info().size() * table.capacity();
        }
        assert!(previous_end <= CHUNK_BYTES);
        assert!(table.capacity() > 0);
    }

    #[test]
    fn test_capacity_of_small_rows() {
        // entity (8 bytes) + Pos (8 bytes) packs 16 bytes per row
        let table = table_of(vec![ComponentInfo::of::<Pos>()]);
        assert!(table.capacity() >= 1000);
    }

    #[test]
    fn test_push_and_swap_remove_backfills() {
        let table = table_of(vec![ComponentInfo::of::<Pos>()]);
        let block = *table.find(ComponentInfo::of::<Pos>().id()).unwrap();
        let mut chunk = Chunk::new(table);

        for i in 0..3u32 {
            let row = chunk.push_entity(Entity::new(i, 0));
            unsafe {
                (chunk.slot_ptr(&block, row) as *mut Pos).write(Pos {
                    x: i as f32,
                    y: 0.0,
                });
            }
        }

        let moved = chunk.swap_remove(0, true);
        assert_eq!(moved, Some(Entity::new(2, 0)));
        assert_eq!(chunk.len(), 2);
        let pos = unsafe { *(chunk.slot_ptr(&block, 0) as *const Pos) };
        assert_eq!(pos, Pos { x: 2.0, y: 0.0 });

        // removing the final row moves nothing
        assert_eq!(chunk.swap_remove(1, true), None);
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn test_drop_runs_for_live_rows_only() {
        let table = table_of(vec![ComponentInfo::of::<Name>()]);
        let block = *table.find(ComponentInfo::of::<Name>().id()).unwrap();
        let mut chunk = Chunk::new(table);

        for i in 0..4 {
            let row = chunk.push_entity(Entity::new(i, 0));
            unsafe {
                (chunk.slot_ptr(&block, row) as *mut Name).write(Name(format!("n{i}")));
            }
        }
        chunk.swap_remove(1, true);
        assert_eq!(chunk.len(), 3);
        // chunk drop must release the three remaining strings without
        // touching the vacated tail slot
        drop(chunk);
    }

    #[test]
    fn test_clone_row_requires_registration() {
        struct Opaque(#[allow(dead_code)] u64);

        let table = table_of(vec![ComponentInfo::of::<Opaque>()]);
        let block = *table.find(ComponentInfo::of::<Opaque>().id()).unwrap();
        let mut chunk = Chunk::new(Arc::clone(&table));
        let row = chunk.push_entity(Entity::new(0, 0));
        unsafe { (chunk.slot_ptr(&block, row) as *mut Opaque).write(Opaque(9)) }

        let mut dst = Chunk::new(Arc::clone(&table));
        assert!(matches!(
            chunk.clone_row(row, &mut dst),
            Err(EcsError::NotCopyable(_))
        ));
        assert_eq!(dst.len(), 0);

        register_clone::<Name>();
        let table = table_of(vec![ComponentInfo::of::<Name>()]);
        let block = *table.find(ComponentInfo::of::<Name>().id()).unwrap();
        let mut chunk = Chunk::new(Arc::clone(&table));
        let row = chunk.push_entity(Entity::new(1, 0));
        unsafe { (chunk.slot_ptr(&block, row) as *mut Name).write(Name("dup".into())) }

        let mut dst = Chunk::new(Arc::clone(&table));
        let dst_row = chunk.clone_row(row, &mut dst).unwrap();
        let cloned = unsafe { &*(dst.slot_ptr(&block, dst_row) as *const Name) };
        assert_eq!(cloned, &Name("dup".into()));
    }
}
