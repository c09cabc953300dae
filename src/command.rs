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

//! Deferred structural mutation.
//!
//! Systems running in parallel never mutate archetype structure in place;
//! they encode commands into a per-thread buffer. Component values destined
//! for the live registry are constructed in a thread-local *staging*
//! registry and transferred when the main thread replays the buffers
//! between schedule waves.
//!
//! Replay order is FIFO within a thread; across threads only the buffer
//! registration order is fixed.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::component::{Bundle, Component};
use crate::entity::Entity;
use crate::error::Result;
use crate::registry::Registry;

enum Command {
    /// Move a staged entity's components onto a reserved live handle.
    Create { staged: Entity, reserved: Entity },
    /// Deep-copy a live entity onto a reserved handle.
    CloneEntity { source: Entity, reserved: Entity },
    /// Move one staged component onto a live entity.
    Set {
        staged: Entity,
        dest: Entity,
        apply: fn(&mut Registry, Entity, &mut Registry, Entity) -> Result<()>,
    },
    /// Strip one component from a live entity.
    Remove {
        dest: Entity,
        remove: fn(&mut Registry, Entity) -> Result<()>,
    },
    Destroy { entity: Entity },
}

/// Per-thread queue of deferred commands plus its staging registry.
pub struct CommandBuffer {
    staging: Registry,
    queue: VecDeque<Command>,
}

impl CommandBuffer {
    fn new() -> Self {
        Self {
            staging: Registry::new(),
            queue: VecDeque::new(),
        }
    }

    fn play(&mut self, registry: &mut Registry) -> Result<()> {
        while let Some(command) = self.queue.pop_front() {
            match command {
                Command::Create { staged, reserved } => {
                    self.staging.move_entity_to(staged, registry, reserved)?;
                }
                Command::CloneEntity { source, reserved } => {
                    registry.clone_entity_as(source, reserved)?;
                }
                Command::Set {
                    staged,
                    dest,
                    apply,
                } => {
                    apply(&mut self.staging, staged, registry, dest)?;
                }
                Command::Remove { dest, remove } => {
                    remove(registry, dest)?;
                }
                Command::Destroy { entity } => {
                    registry.destroy(entity)?;
                }
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

// All per-thread buffers, in registration order. The mutex is touched only
// when a thread first uses its buffer and during flush.
static BUFFERS: Mutex<Vec<Arc<Mutex<CommandBuffer>>>> = Mutex::new(Vec::new());

thread_local! {
    static LOCAL_BUFFER: Arc<Mutex<CommandBuffer>> = {
        let buffer = Arc::new(Mutex::new(CommandBuffer::new()));
        BUFFERS.lock().push(Arc::clone(&buffer));
        buffer
    };
}

fn with_buffer<R>(f: impl FnOnce(&mut CommandBuffer) -> R) -> R {
    LOCAL_BUFFER.with(|buffer| f(&mut buffer.lock()))
}

/// Replay every thread's commands against `registry` on the calling thread.
///
/// Reserved entities are published first, then buffers drain in registration
/// order, FIFO within each. Called by the executor between schedule waves;
/// callable directly when driving the registry by hand.
pub fn flush(registry: &mut Registry) -> Result<()> {
    registry.sync();

    let buffers: Vec<Arc<Mutex<CommandBuffer>>> = BUFFERS.lock().clone();
    for buffer in buffers {
        buffer.lock().play(registry)?;
    }
    Ok(())
}

/// Number of commands queued on the calling thread.
pub fn pending_commands() -> usize {
    with_buffer(|buffer| buffer.len())
}

fn apply_set<C: Component>(
    staging: &mut Registry,
    staged: Entity,
    registry: &mut Registry,
    dest: Entity,
) -> Result<()> {
    let value = staging.take_and_destroy::<C>(staged)?;
    registry.set(dest, value)
}

fn remove_component<C: Component>(registry: &mut Registry, entity: Entity) -> Result<()> {
    registry.remove::<C>(entity)
}

/// Entry point systems use to queue structural mutations.
///
/// Cheap to copy; writes go to the calling thread's buffer, so a writer can
/// be used freely inside `par_each` closures.
#[derive(Clone, Copy)]
pub struct CommandWriter<'a> {
    registry: &'a Registry,
}

impl<'a> CommandWriter<'a> {
    /// Writer targeting `registry`, queueing into the calling thread's
    /// buffer. Systems receive one by declaring a `CommandWriter` argument.
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Queue creation of an entity with the bundle's components. The
    /// returned reference names the reserved handle, which becomes live at
    /// the next flush.
    pub fn create<B: Bundle>(&self, bundle: B) -> CommandEntityRef<'a> {
        let reserved = self.registry.reserve().entity();
        with_buffer(|buffer| {
            let staged = buffer.staging.create(bundle);
            buffer.queue.push_back(Command::Create { staged, reserved });
        });
        CommandEntityRef {
            registry: self.registry,
            entity: reserved,
        }
    }

    /// Queue destruction of an entity.
    pub fn destroy(&self, entity: Entity) {
        with_buffer(|buffer| buffer.queue.push_back(Command::Destroy { entity }));
    }

    /// Command-scope handle to one entity.
    pub fn entity(&self, entity: Entity) -> CommandEntityRef<'a> {
        CommandEntityRef {
            registry: self.registry,
            entity,
        }
    }
}

/// Deferred-mutation handle to one entity.
#[derive(Clone, Copy)]
pub struct CommandEntityRef<'a> {
    registry: &'a Registry,
    entity: Entity,
}

impl<'a> CommandEntityRef<'a> {
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Queue assignment of a component. The value is staged immediately and
    /// moved onto the entity at flush.
    pub fn set<C: Component>(&self, value: C) -> &Self {
        with_buffer(|buffer| {
            let staged = buffer.staging.create((value,));
            buffer.queue.push_back(Command::Set {
                staged,
                dest: self.entity,
                apply: apply_set::<C>,
            });
        });
        self
    }

    /// Queue removal of a component.
    pub fn remove<C: Component>(&self) -> &Self {
        with_buffer(|buffer| {
            buffer.queue.push_back(Command::Remove {
                dest: self.entity,
                remove: remove_component::<C>,
            });
        });
        self
    }

    /// Queue destruction of the entity.
    pub fn destroy(&self) {
        with_buffer(|buffer| {
            buffer.queue.push_back(Command::Destroy {
                entity: self.entity,
            });
        });
    }

    /// Queue a deep copy of the entity. Fails at flush time with
    /// `NotCopyable` if any component lacks a registered clone callback.
    pub fn clone_entity(&self) -> CommandEntityRef<'a> {
        let reserved = self.registry.reserve().entity();
        with_buffer(|buffer| {
            buffer.queue.push_back(Command::CloneEntity {
                source: self.entity,
                reserved,
            });
        });
        CommandEntityRef {
            registry: self.registry,
            entity: reserved,
        }
    }
}

#[cfg(test)]
pub(crate) fn serial_guard() -> parking_lot::MutexGuard<'static, ()> {
    // command buffers and the thread pool are process-global; tests touching
    // them serialize through this lock
    static GUARD: Mutex<()> = Mutex::new(());
    GUARD.lock()
}
