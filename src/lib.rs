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

//! chunk_ecs - data-oriented Entity Component System
//!
//! Chunked SoA archetype storage with a work-stealing parallel scheduler.
//! Structural mutations under concurrent systems go through per-thread
//! command buffers replayed between schedule waves.

pub mod archetype;
pub mod chunk;
pub mod command;
pub mod component;
pub mod entity;
pub mod entity_ref;
pub mod error;
pub mod registry;
pub mod view;

// Parallel execution
pub mod schedule;
pub mod system;
pub mod thread_pool;

// Re-exports for convenience
pub use archetype::{Archetype, Archetypes};
pub use chunk::{Chunk, CHUNK_BYTES};
pub use command::{flush as flush_commands, CommandEntityRef, CommandWriter};
pub use component::{
    register_clone, Bundle, Component, ComponentId, ComponentInfo, ComponentSet,
};
pub use entity::{Entity, EntityLocation, EntityPool, ReservedEntity};
pub use entity_ref::{EntityMut, EntityRef};
pub use error::{EcsError, Result};
pub use registry::Registry;
pub use schedule::{Executor, Schedule, StageBuilder};
pub use system::{Access, AccessPattern, BoxedSystem, IntoSystem, System, SystemParam};
pub use thread_pool::{Task, ThreadPool};
pub use view::{Query, Read, ReadOnlyQuery, View, ViewIter, Write};

#[cfg(test)]
mod tests;
