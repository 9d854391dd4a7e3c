// Copyright 2025 eraflo
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

//! # Trellis Inject
//!
//! The scoped service resolution and lazy-initialization engine: global and
//! node-scoped registries, the resolution tie-break ladder, the
//! materialization strategy chain with cycle detection, and post-creation
//! dependency injection, all owned by a [`ServiceContext`] with explicit
//! startup and teardown.

#![warn(missing_docs)]

pub mod context;
pub mod global;
mod initializer;
mod injector;
pub mod providers;
mod resolver;
pub mod scoped;

pub use context::{ServiceContext, ServiceContextBuilder, StartupReport};
pub use global::GlobalRegistry;
pub use providers::ProviderIndex;
pub use scoped::ScopedRegistry;
