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

//! Component metadata and bundles.
//!
//! Components are plain data attached to entities. Each distinct component
//! type receives a dense numeric id from a process-wide table on first
//! mention; archetype layouts and access patterns are keyed by that id, not
//! by `TypeId`.

use std::alloc::Layout;
use std::any::TypeId;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::error::{EcsError, Result};

/// Maximum number of components supported by Bundle implementations
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// Marker trait for components
///
/// Components must be 'static (no borrowed data). The entity handle itself is
/// not a component; the entity column is managed separately by the chunk.
pub trait Component: 'static + Send + Sync {}

/// Automatically implement Component for all valid types
impl<T: 'static + Send + Sync> Component for T {}

/// Dense component id, assigned on first mention of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Drops the value behind `ptr` in place.
pub type DropFn = unsafe fn(*mut u8);

/// Clones the value at `src` into the uninitialized slot at `dst`.
pub type CloneFn = unsafe fn(*const u8, *mut u8);

/// Static descriptor of a component type: dense id, layout, and the erased
/// functions the storage needs. Copied into archetype block tables so chunk
/// operations never touch the global table.
#[derive(Debug, Clone, Copy)]
pub struct ComponentInfo {
    id: ComponentId,
    type_id: TypeId,
    name: &'static str,
    layout: Layout,
    drop_fn: Option<DropFn>,
}

impl ComponentInfo {
    /// Descriptor for `T`, assigning its dense id if this is the first mention.
    pub fn of<T: Component>() -> Self {
        let id = component_id::<T>();
        let types = type_table().read();
        let row = &types.rows[id.index()];
        Self {
            id,
            type_id: row.type_id,
            name: row.name,
            layout: row.layout,
            drop_fn: row.drop_fn,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn align(&self) -> usize {
        self.layout.align()
    }

    pub fn drop_fn(&self) -> Option<DropFn> {
        self.drop_fn
    }

    /// Check a descriptor that crossed a registry boundary against the
    /// process-wide table. A mismatch means two differently-loaded copies of
    /// the runtime disagree on id assignment.
    pub(crate) fn verify(&self) -> Result<()> {
        let types = type_table().read();
        match types.rows.get(self.id.index()) {
            Some(row) if row.type_id == self.type_id && row.layout == self.layout => Ok(()),
            _ => Err(EcsError::TypeMetadataConflict(self.name)),
        }
    }
}

struct TableRow {
    type_id: TypeId,
    name: &'static str,
    layout: Layout,
    drop_fn: Option<DropFn>,
    clone_fn: Option<CloneFn>,
}

#[derive(Default)]
struct TypeTable {
    ids: FxHashMap<TypeId, ComponentId>,
    rows: Vec<TableRow>,
}

static TYPES: OnceLock<RwLock<TypeTable>> = OnceLock::new();

fn type_table() -> &'static RwLock<TypeTable> {
    TYPES.get_or_init(|| RwLock::new(TypeTable::default()))
}

/// Dense id for `T`, assigned on first call.
pub fn component_id<T: Component>() -> ComponentId {
    let type_id = TypeId::of::<T>();
    if let Some(&id) = type_table().read().ids.get(&type_id) {
        return id;
    }

    let mut types = type_table().write();
    if let Some(&id) = types.ids.get(&type_id) {
        return id;
    }

    let id = ComponentId(types.rows.len() as u32);
    types.rows.push(TableRow {
        type_id,
        name: std::any::type_name::<T>(),
        layout: Layout::new::<T>(),
        drop_fn: drop_fn_of::<T>(),
        clone_fn: None,
    });
    types.ids.insert(type_id, id);
    id
}

fn drop_fn_of<T>() -> Option<DropFn> {
    if std::mem::needs_drop::<T>() {
        unsafe fn drop_erased<T>(ptr: *mut u8) {
            std::ptr::drop_in_place(ptr as *mut T);
        }
        Some(drop_erased::<T>)
    } else {
        None
    }
}

/// Register a clone callback for `T`, enabling it in entity-clone and
/// command-buffer `clone` operations. Cloning an entity that carries an
/// unregistered non-trivial type fails with `NotCopyable` at play time.
pub fn register_clone<T: Component + Clone>() {
    unsafe fn clone_erased<T: Clone>(src: *const u8, dst: *mut u8) {
        let value = (*(src as *const T)).clone();
        std::ptr::write(dst as *mut T, value);
    }

    let id = component_id::<T>();
    type_table().write().rows[id.index()].clone_fn = Some(clone_erased::<T>);
}

/// Clone callback for a component id, if one was registered.
pub(crate) fn clone_fn_of(id: ComponentId) -> Option<CloneFn> {
    type_table()
        .read()
        .rows
        .get(id.index())
        .and_then(|row| row.clone_fn)
}

/// Growable bitset over dense component ids.
///
/// Two archetypes are equal iff their component sets are equal; the set is
/// kept normalized (no trailing zero words) so equality stays bitwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentSet {
    words: Vec<u64>,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ComponentId) {
        let word = id.index() / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (id.index() % 64);
    }

    pub fn remove(&mut self, id: ComponentId) {
        let word = id.index() / 64;
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1 << (id.index() % 64));
        }
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        let word = id.index() / 64;
        match self.words.get(word) {
            Some(w) => w & (1 << (id.index() % 64)) != 0,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate set ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..64)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| ComponentId((word_idx * 64 + bit) as u32))
        })
    }
}

impl Hash for ComponentSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let folded = self.words.iter().fold(0u64, |acc, w| acc ^ w);
        state.write_u64(folded);
        state.write_usize(self.words.len());
    }
}

/// Bundle of components
///
/// Allows spawning entities with multiple components at once.
pub trait Bundle: Send + Sync + 'static {
    /// Descriptors of all components in the bundle, in declaration order
    fn component_infos() -> SmallVec<[ComponentInfo; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Write components to raw pointers, one per descriptor in
    /// `component_infos()` order
    ///
    /// # Safety
    /// Caller must ensure pointers are valid and properly aligned
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

// Only tuples implement Bundle; a blanket impl for T: Component would
// conflict with the tuple implementations.

macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            fn component_infos() -> SmallVec<[ComponentInfo; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(ComponentInfo::of::<$T>()),*]
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    std::ptr::write(ptrs[i] as *mut $T, $T);
                    i += 1;
                )*
                let _ = i; // Suppress unused warning
            }
        }
    };
}

impl Bundle for () {
    fn component_infos() -> SmallVec<[ComponentInfo; MAX_BUNDLE_COMPONENTS]> {
        SmallVec::new()
    }

    unsafe fn write_components(self, _ptrs: &[*mut u8]) {}
}

// Implement for tuples of 1-8 components
impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    #![allow(dead_code)]
    use super::*;

    #[test]
    fn test_component_ids_are_stable_and_distinct() {
        struct A(u32);
        struct B(u32);

        let a1 = component_id::<A>();
        let b = component_id::<B>();
        let a2 = component_id::<A>();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn test_component_set_roundtrip() {
        let mut set = ComponentSet::new();
        let a = ComponentId(3);
        let b = ComponentId(70);

        set.insert(a);
        set.insert(b);
        assert!(set.contains(a));
        assert!(set.contains(b));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![a, b]);

        set.remove(b);
        assert!(!set.contains(b));

        // normalization keeps equality bitwise
        let mut other = ComponentSet::new();
        other.insert(a);
        assert_eq!(set, other);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_bundle_infos_follow_declaration_order() {
        #[derive(Debug, Clone, Copy)]
        struct Position {
            x: f32,
            y: f32,
        }

        #[derive(Debug, Clone, Copy)]
        struct Velocity {
            x: f32,
        }

        let infos = <(Position, Velocity)>::component_infos();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].type_id(), TypeId::of::<Position>());
        assert_eq!(infos[1].type_id(), TypeId::of::<Velocity>());
        assert_eq!(infos[0].size(), std::mem::size_of::<Position>());
    }

    #[test]
    fn test_register_clone_is_visible_by_id() {
        #[derive(Clone)]
        struct Tag(String);

        let id = component_id::<Tag>();
        register_clone::<Tag>();
        assert!(clone_fn_of(id).is_some());

        struct Plain(u8);
        assert!(clone_fn_of(component_id::<Plain>()).is_none());
    }

    #[test]
    fn test_info_verify_detects_foreign_metadata() {
        struct Real(u64);
        let mut info = ComponentInfo::of::<Real>();
        assert!(info.verify().is_ok());

        info.layout = Layout::new::<u8>();
        assert_eq!(
            info.verify(),
            Err(EcsError::TypeMetadataConflict(info.name()))
        );
    }
}
