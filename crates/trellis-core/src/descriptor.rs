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

//! Static service metadata: descriptors and the descriptor table.
//!
//! A [`ServiceDescriptor`] is built once from declarative data and never
//! mutated afterwards. The [`DescriptorTable`] indexes descriptors by
//! defining type and preserves declaration-scan order, which drives eager
//! materialization.

use crate::error::ServiceError;
use crate::factory::ServiceFactory;
use crate::handle::ServiceHandle;
use crate::key::TypeKey;
use crate::visibility::VisibilityScope;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle flags recognized per descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceFlags {
    /// Defer creation until first demand.
    pub lazy: bool,
    /// Never cache; a fresh instance is produced per resolution.
    pub transient: bool,
    /// Prefer adopting a pre-existing instance over constructing one.
    pub find_existing: bool,
    /// Creation strategies touching external resources may suspend.
    pub load_async: bool,
}

/// Opaque token handed verbatim to the external resource loader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLocator(pub String);

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declarative per-service configuration, consumed at table-build time.
///
/// Type identity is not part of the config: descriptors are declared in
/// code against concrete types, and the config contributes the lifecycle
/// knobs and the resource locator.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Defer creation until first demand.
    pub lazy: bool,
    /// Never cache; a fresh instance is produced per resolution.
    pub transient: bool,
    /// Prefer adopting a pre-existing instance over constructing one.
    pub find_existing: bool,
    /// Creation strategies touching external resources may suspend.
    pub load_async: bool,
    /// Opaque token for the external resource loader.
    pub resource_locator: Option<String>,
}

/// Where materialized instances of a descriptor are cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// One shared slot per defining type, context-wide.
    Global,
    /// A scoped entry owned by the node the instance ends up attached to,
    /// or, failing that, the requesting node.
    Scoped(VisibilityScope),
}

type BuildFn = Arc<dyn Fn(Vec<ServiceHandle>) -> anyhow::Result<ServiceHandle> + Send + Sync>;
type InitFn = Arc<dyn Fn(&ServiceHandle, Vec<ServiceHandle>) -> anyhow::Result<()> + Send + Sync>;

/// Hook invoked for a cached instance when the owning context tears down.
pub type DisposeFn = Arc<dyn Fn(&ServiceHandle) + Send + Sync>;

/// An explicitly registered constructor: the parameter types it needs and
/// the build function receiving them already resolved.
#[derive(Clone)]
pub struct ConstructorSpec {
    params: Vec<TypeKey>,
    build: BuildFn,
}

impl ConstructorSpec {
    /// Creates a constructor spec from its parameter types and build function.
    pub fn new<F>(params: Vec<TypeKey>, build: F) -> Self
    where
        F: Fn(Vec<ServiceHandle>) -> anyhow::Result<ServiceHandle> + Send + Sync + 'static,
    {
        Self {
            params,
            build: Arc::new(build),
        }
    }

    /// The parameter types this constructor requires, in order.
    #[must_use]
    pub fn params(&self) -> &[TypeKey] {
        &self.params
    }

    /// Invokes the build function with resolved arguments.
    pub fn build(&self, args: Vec<ServiceHandle>) -> anyhow::Result<ServiceHandle> {
        (self.build)(args)
    }
}

impl fmt::Debug for ConstructorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorSpec")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A typed post-creation dependency contract: the dependency types a newly
/// created instance needs, and the single initialization entry point that
/// is invoked exactly once with the resolved arguments.
#[derive(Clone)]
pub struct DependencyContract {
    required: Vec<TypeKey>,
    init: InitFn,
}

impl DependencyContract {
    /// Creates a contract from its required types and entry point.
    pub fn new<F>(required: Vec<TypeKey>, init: F) -> Self
    where
        F: Fn(&ServiceHandle, Vec<ServiceHandle>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            required,
            init: Arc::new(init),
        }
    }

    /// The dependency types the contract requires, in order.
    #[must_use]
    pub fn required(&self) -> &[TypeKey] {
        &self.required
    }

    /// Invokes the initialization entry point with resolved arguments.
    pub fn invoke(&self, target: &ServiceHandle, args: Vec<ServiceHandle>) -> anyhow::Result<()> {
        (self.init)(target, args)
    }
}

impl fmt::Debug for DependencyContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyContract")
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Static metadata for one service, built once from declarative data.
pub struct ServiceDescriptor {
    concrete: Option<TypeKey>,
    defining: Vec<TypeKey>,
    flags: ServiceFlags,
    locator: Option<ResourceLocator>,
    registration: Registration,
    factory: Option<Arc<dyn ServiceFactory>>,
    constructors: Vec<ConstructorSpec>,
    contract: Option<DependencyContract>,
    dispose: Option<DisposeFn>,
}

impl ServiceDescriptor {
    /// Starts a builder for a service with the concrete type `C`.
    ///
    /// The concrete type doubles as the defining type until
    /// [`defining`](DescriptorBuilder::defining) overrides it.
    #[must_use]
    pub fn of<C: Send + Sync + 'static>() -> DescriptorBuilder {
        DescriptorBuilder {
            concrete: Some(TypeKey::of::<C>()),
            defining: Vec::new(),
            flags: ServiceFlags::default(),
            locator: None,
            registration: Registration::Global,
            factory: None,
            constructors: Vec::new(),
            contract: None,
            dispose: None,
        }
    }

    /// Starts a builder for a service known only by its defining type `D`;
    /// the concrete type stays open until a creation strategy supplies one.
    #[must_use]
    pub fn for_defining<D: ?Sized + 'static>() -> DescriptorBuilder {
        DescriptorBuilder {
            concrete: None,
            defining: vec![TypeKey::of::<D>()],
            flags: ServiceFlags::default(),
            locator: None,
            registration: Registration::Global,
            factory: None,
            constructors: Vec::new(),
            contract: None,
            dispose: None,
        }
    }

    /// The concrete implementation type, when statically known.
    #[must_use]
    pub fn concrete(&self) -> Option<&TypeKey> {
        self.concrete.as_ref()
    }

    /// The concrete type, falling back to the requested defining type when
    /// the descriptor leaves it open.
    #[must_use]
    pub fn concrete_or(&self, requested: TypeKey) -> TypeKey {
        self.concrete.unwrap_or(requested)
    }

    /// The types clients may request to receive this service. Never empty.
    #[must_use]
    pub fn defining(&self) -> &[TypeKey] {
        &self.defining
    }

    /// Lifecycle flags.
    #[must_use]
    pub fn flags(&self) -> ServiceFlags {
        self.flags
    }

    /// The opaque resource locator, if any.
    #[must_use]
    pub fn locator(&self) -> Option<&ResourceLocator> {
        self.locator.as_ref()
    }

    /// Where materialized instances are cached.
    #[must_use]
    pub fn registration(&self) -> Registration {
        self.registration
    }

    /// The custom factory object, if any.
    #[must_use]
    pub fn factory(&self) -> Option<&Arc<dyn ServiceFactory>> {
        self.factory.as_ref()
    }

    /// The explicitly registered constructors.
    #[must_use]
    pub fn constructors(&self) -> &[ConstructorSpec] {
        &self.constructors
    }

    /// The post-creation dependency contract, if any.
    #[must_use]
    pub fn contract(&self) -> Option<&DependencyContract> {
        self.contract.as_ref()
    }

    /// The teardown hook, if any.
    #[must_use]
    pub fn dispose(&self) -> Option<&DisposeFn> {
        self.dispose.as_ref()
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("concrete", &self.concrete)
            .field("defining", &self.defining)
            .field("flags", &self.flags)
            .field("locator", &self.locator)
            .field("registration", &self.registration)
            .field("has_factory", &self.factory.is_some())
            .field("constructors", &self.constructors.len())
            .field("has_contract", &self.contract.is_some())
            .finish()
    }
}

/// Incremental builder for a [`ServiceDescriptor`].
pub struct DescriptorBuilder {
    concrete: Option<TypeKey>,
    defining: Vec<TypeKey>,
    flags: ServiceFlags,
    locator: Option<ResourceLocator>,
    registration: Registration,
    factory: Option<Arc<dyn ServiceFactory>>,
    constructors: Vec<ConstructorSpec>,
    contract: Option<DependencyContract>,
    dispose: Option<DisposeFn>,
}

impl DescriptorBuilder {
    /// Adds a defining type clients may request instead of the concrete type.
    #[must_use]
    pub fn defining<D: ?Sized + 'static>(mut self) -> Self {
        let key = TypeKey::of::<D>();
        if !self.defining.contains(&key) {
            self.defining.push(key);
        }
        self
    }

    /// Defers creation until first demand.
    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.flags.lazy = true;
        self
    }

    /// Disables caching; every resolution creates a fresh instance.
    /// Transient services always materialize on demand.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.flags.transient = true;
        self.flags.lazy = true;
        self
    }

    /// Prefers adopting a pre-existing instance over constructing one.
    #[must_use]
    pub fn find_existing(mut self) -> Self {
        self.flags.find_existing = true;
        self
    }

    /// Allows resource-touching creation strategies to suspend.
    #[must_use]
    pub fn load_async(mut self) -> Self {
        self.flags.load_async = true;
        self
    }

    /// Sets the opaque token handed to the external loader.
    #[must_use]
    pub fn locator(mut self, token: impl Into<String>) -> Self {
        self.locator = Some(ResourceLocator(token.into()));
        self
    }

    /// Caches materialized instances in the scoped registry with the given
    /// visibility instead of the global registry.
    #[must_use]
    pub fn scoped(mut self, visibility: VisibilityScope) -> Self {
        self.registration = Registration::Scoped(visibility);
        self
    }

    /// Installs a custom factory, tried before every other creation strategy.
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn ServiceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Registers an explicit constructor.
    #[must_use]
    pub fn constructor(mut self, spec: ConstructorSpec) -> Self {
        self.constructors.push(spec);
        self
    }

    /// Registers a zero-argument constructor from a plain closure.
    #[must_use]
    pub fn with_default<C, F>(self, make: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.constructor(ConstructorSpec::new(Vec::new(), move |_| {
            Ok(Arc::new(make()) as ServiceHandle)
        }))
    }

    /// Declares the post-creation dependency contract.
    #[must_use]
    pub fn needs(mut self, contract: DependencyContract) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Installs a teardown hook for cached instances.
    #[must_use]
    pub fn dispose_with<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ServiceHandle) + Send + Sync + 'static,
    {
        self.dispose = Some(Arc::new(hook));
        self
    }

    /// Applies the lifecycle knobs from a declarative config.
    #[must_use]
    pub fn apply_config(mut self, config: &ServiceConfig) -> Self {
        self.flags.lazy |= config.lazy;
        self.flags.transient |= config.transient;
        self.flags.find_existing |= config.find_existing;
        self.flags.load_async |= config.load_async;
        if config.transient {
            self.flags.lazy = true;
        }
        if let Some(token) = &config.resource_locator {
            self.locator = Some(ResourceLocator(token.clone()));
        }
        self
    }

    /// Finishes the descriptor. When no defining type was named, the
    /// concrete type defines the service.
    #[must_use]
    pub fn build(mut self) -> ServiceDescriptor {
        if self.defining.is_empty() {
            if let Some(concrete) = self.concrete {
                self.defining.push(concrete);
            }
        }
        ServiceDescriptor {
            concrete: self.concrete,
            defining: self.defining,
            flags: self.flags,
            locator: self.locator,
            registration: self.registration,
            factory: self.factory,
            constructors: self.constructors,
            contract: self.contract,
            dispose: self.dispose,
        }
    }
}

/// Registry of descriptors keyed by defining type.
///
/// Preserves declaration-scan order, which fixes the materialization order
/// of non-lazy services.
#[derive(Default)]
pub struct DescriptorTable {
    entries: Vec<Arc<ServiceDescriptor>>,
    by_defining: HashMap<TypeId, usize>,
}

impl DescriptorTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, indexing all of its defining types.
    ///
    /// Rejected (with a logged diagnostic) when the descriptor has no
    /// defining type or a defining type is already claimed by an earlier
    /// descriptor. A rejected descriptor leaves the table untouched.
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Result<(), ServiceError> {
        let Some(first) = descriptor.defining.first().copied() else {
            let key = descriptor
                .concrete
                .unwrap_or_else(TypeKey::of::<ServiceDescriptor>);
            let err = ServiceError::InvalidServiceDefinition {
                key,
                reason: "descriptor declares no defining type".into(),
            };
            log::error!("{err}");
            return Err(err);
        };
        for key in &descriptor.defining {
            if self.by_defining.contains_key(&key.id()) {
                let err = ServiceError::InvalidServiceDefinition {
                    key: *key,
                    reason: "defining type already claimed by another descriptor".into(),
                };
                log::error!("{err}");
                return Err(err);
            }
        }
        let index = self.entries.len();
        for key in &descriptor.defining {
            self.by_defining.insert(key.id(), index);
        }
        log::debug!(
            "DescriptorTable: registered {} ({} defining type(s))",
            first,
            descriptor.defining.len()
        );
        self.entries.push(Arc::new(descriptor));
        Ok(())
    }

    /// Looks up the descriptor claiming the given defining type.
    #[must_use]
    pub fn get(&self, key: &TypeKey) -> Option<&Arc<ServiceDescriptor>> {
        self.get_by_id(key.id())
    }

    /// Looks up a descriptor by raw [`TypeId`].
    #[must_use]
    pub fn get_by_id(&self, id: TypeId) -> Option<&Arc<ServiceDescriptor>> {
        self.by_defining.get(&id).map(|&i| &self.entries[i])
    }

    /// Iterates descriptors in declaration-scan order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.entries.iter()
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates that `instance` may be registered under `key`: when a
    /// descriptor claims the key and names a concrete type, the instance
    /// must be exactly that type.
    pub fn check_assignable(
        &self,
        key: &TypeKey,
        instance: &ServiceHandle,
    ) -> Result<(), ServiceError> {
        if let Some(descriptor) = self.get(key) {
            if let Some(concrete) = descriptor.concrete() {
                if instance.as_ref().type_id() != concrete.id() {
                    return Err(ServiceError::InvalidServiceDefinition {
                        key: *key,
                        reason: format!(
                            "instance is not the declared concrete type {}",
                            concrete.name()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
