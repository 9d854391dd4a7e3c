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

//! # Trellis Core
//!
//! Foundational crate containing the type identities, service descriptors,
//! collaborator traits, and error taxonomy shared by the resolution engine.

#![warn(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod event;
pub mod factory;
pub mod handle;
pub mod key;
pub mod loader;
pub mod node;
pub mod provider;
pub mod visibility;

pub use descriptor::{
    ConstructorSpec, DependencyContract, DescriptorBuilder, DescriptorTable, DisposeFn,
    Registration, ResourceLocator, ServiceConfig, ServiceDescriptor, ServiceFlags,
};
pub use error::{NotFoundReason, ServiceError};
pub use event::{ChangeBus, InstanceChanged};
pub use factory::{FnFactory, ServiceFactory};
pub use handle::{downcast_handle, handle_of, same_instance, ServiceHandle};
pub use key::TypeKey;
pub use loader::{Artifact, Blueprint, ResourceLoader};
pub use node::{Hierarchy, NodeFactory, NodeId, PartitionId};
pub use provider::ValueProvider;
pub use visibility::VisibilityScope;
