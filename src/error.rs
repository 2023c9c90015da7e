// Copyright 2024 Saptak Santra
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

/// ECS error type.
///
/// Stale entity references are deliberately not represented here: a mutating
/// call against an entity whose generation no longer matches is a silent
/// no-op that returns `false`/`None`, not an `Err`.
#[derive(Debug, Clone)]
pub enum EcsError {
    /// Entity not found.
    EntityNotFound,

    /// Component not found on the given entity.
    ComponentNotFound,

    /// Archetype not found.
    ArchetypeNotFound,

    /// Invalid entity ID.
    InvalidEntity,

    /// Command buffer error.
    CommandError(String),

    /// System dependency cycle detected at freeze time.
    SystemCycleDetected,

    /// Schedule construction error: duplicate schedule, missing `add_after`
    /// target, or a nested non-system type passed to `add_systems`.
    ScheduleConstruction(String),

    /// System not found.
    SystemNotFound,

    /// A resource of this type already exists.
    ResourceAlreadyExists(std::any::TypeId),

    /// A required resource/schedule could not be found by lookup.
    LookupMissing(String),

    /// Type-misuse: bundle with no fields, a system with conflicting
    /// parameter kinds, or a zero-sized type used where a per-entity
    /// component parameter is required.
    TypeMisuse(String),

    /// Spawn error with detailed context.
    SpawnError(SpawnError),
}

/// Detailed spawn error types.
#[derive(Debug, Clone)]
pub enum SpawnError {
    /// Entity capacity exhausted.
    EntityCapacityExhausted { attempted: usize, capacity: usize },
    /// Component registration failed.
    ComponentRegistrationFailed(String),
    /// Archetype creation failed.
    ArchetypeCreationFailed {
        component_count: usize,
        reason: String,
    },
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::EntityCapacityExhausted {
                attempted,
                capacity,
            } => {
                write!(
                    f,
                    "Entity capacity exhausted: attempted to spawn {attempted}, max is {capacity}"
                )
            }
            SpawnError::ComponentRegistrationFailed(reason) => {
                write!(f, "Failed to register component: {reason}")
            }
            SpawnError::ArchetypeCreationFailed {
                component_count,
                reason,
            } => {
                write!(
                    f,
                    "Failed to create archetype for {component_count} components: {reason}"
                )
            }
        }
    }
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "Entity not found"),
            EcsError::ComponentNotFound => write!(f, "Component not found"),
            EcsError::ArchetypeNotFound => write!(f, "Archetype not found"),
            EcsError::InvalidEntity => write!(f, "Invalid entity ID"),
            EcsError::CommandError(msg) => write!(f, "Command error: {msg}"),
            EcsError::SystemCycleDetected => write!(f, "System dependency cycle detected"),
            EcsError::ScheduleConstruction(msg) => write!(f, "Schedule construction error: {msg}"),
            EcsError::SystemNotFound => write!(f, "System not found"),
            EcsError::ResourceAlreadyExists(type_id) => {
                write!(f, "Resource already exists: {type_id:?}")
            }
            EcsError::LookupMissing(msg) => write!(f, "Lookup missing: {msg}"),
            EcsError::TypeMisuse(msg) => write!(f, "Type misuse: {msg}"),
            EcsError::SpawnError(spawn_err) => write!(f, "Spawn error: {spawn_err}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<SpawnError> for EcsError {
    fn from(err: SpawnError) -> Self {
        EcsError::SpawnError(err)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, EcsError>;
