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

//! Archetype-based Entity Component System.
//!
//! Entities are rows in a `Table` grouped by `Archetype` (their exact
//! component set); systems declare what they read and write up front so a
//! `Schedule` can run everything that doesn't conflict concurrently, and
//! defer structural mutation through `Commands` to a well-defined commit
//! point.

pub mod app;
pub mod archetype;
pub mod archetype_manager;
pub mod command;
pub mod component;
pub mod entity;
pub mod error;
pub mod resource;
pub mod schedule;
pub mod schedule_set;
pub mod sparse;
pub mod system;
pub mod table;
pub mod thread_pool;
pub mod type_registry;
pub mod utils;
pub mod world;

pub use app::App;
pub use archetype::{Archetype, ArchetypeId};
pub use archetype_manager::{ArchetypeFilter, ArchetypeManager};
pub use command::Commands;
pub use component::{Bundle, Component};
pub use entity::{Entity, EntityPool};
pub use error::{EcsError, Result};
pub use resource::ResourcePool;
pub use schedule::{CommitPolicy, Schedule, SystemChain, SystemGroup, SystemId};
pub use schedule_set::ScheduleSet;
pub use system::{
    AccessDecl, BoxedSystem, ChunkSystem, ColumnSpan, Disabled, EntityView, QuerySystem, System,
    SystemAccess, SystemContext, TickSystem,
};
pub use table::{RowPos, Table};
pub use thread_pool::ThreadPool;
pub use type_registry::{TypeIndex, TypeRegistrar};
pub use world::World;
