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

//! Error types

use std::fmt;

use crate::entity::Entity;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity is dead or was never published
    EntityNotFound(Entity),

    /// Archetype does not carry the requested component type
    ComponentMissing(&'static str),

    /// Chunk received a row past its capacity (internal invariant breach)
    ChunkCapacityExceeded,

    /// Command-buffer clone hit a component type without a clone callback
    NotCopyable(&'static str),

    /// Component metadata crossing registries disagrees with the process-wide
    /// id table (dynamic-loading diagnostic)
    TypeMetadataConflict(&'static str),

    /// A thread pool already exists in this process
    AlreadyInitialized,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound(e) => {
                write!(f, "entity ({}, {}) does not exist", e.id(), e.generation())
            }
            EcsError::ComponentMissing(name) => write!(f, "component \"{name}\" not found"),
            EcsError::ChunkCapacityExceeded => write!(f, "chunk capacity exceeded"),
            EcsError::NotCopyable(name) => write!(f, "component \"{name}\" is not copyable"),
            EcsError::TypeMetadataConflict(name) => {
                write!(f, "conflicting metadata registered for component \"{name}\"")
            }
            EcsError::AlreadyInitialized => write!(f, "thread pool already created"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_identity() {
        let err = EcsError::EntityNotFound(Entity::new(3, 7));
        assert_eq!(err.to_string(), "entity (3, 7) does not exist");

        let err = EcsError::ComponentMissing("demo::Position");
        assert!(err.to_string().contains("demo::Position"));
    }
}
