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

//! The owning service context: registries, collaborators, resolution entry
//! points, and the startup/teardown lifecycle.
//!
//! One [`ServiceContext`] replaces per-type static singletons: every slot,
//! scoped entry, and in-flight creation lives here and dies at
//! [`teardown`](ServiceContext::teardown).

use crate::global::GlobalRegistry;
use crate::initializer::Initializer;
use crate::providers::ProviderIndex;
use crate::resolver;
use crate::scoped::ScopedRegistry;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use trellis_core::{
    downcast_handle, handle_of, same_instance, ChangeBus, DependencyContract, DescriptorTable,
    Hierarchy, InstanceChanged, NodeFactory, NodeId, NotFoundReason, PartitionId, ResourceLoader,
    ServiceDescriptor, ServiceError, ServiceHandle, TypeKey, ValueProvider, VisibilityScope,
};

/// A non-service client waiting for its dependencies until every eager
/// service is ready.
struct PendingClient {
    key: TypeKey,
    target: ServiceHandle,
    contract: DependencyContract,
    requester: Option<NodeId>,
}

/// Summary of one eager materialization pass.
#[derive(Clone, Debug)]
pub struct StartupReport {
    /// Eager services materialized and ready.
    pub ready: usize,
    /// Eager services whose materialization failed.
    pub failed: usize,
    /// Wall-clock duration of the pass.
    pub elapsed: Duration,
}

/// A hierarchy with no relations, standing in when no node model is
/// attached. Scopes degrade gracefully: owner-equality still works,
/// everything relational evaluates to false.
struct Detached;

impl Hierarchy for Detached {
    fn parent(&self, _node: NodeId) -> Option<NodeId> {
        None
    }

    fn partition_of(&self, _node: NodeId) -> Option<PartitionId> {
        None
    }
}

/// Builder assembling the descriptor table and collaborators for a
/// [`ServiceContext`].
pub struct ServiceContextBuilder {
    table: DescriptorTable,
    hierarchy: Option<Arc<dyn Hierarchy>>,
    loader: Option<Arc<dyn ResourceLoader>>,
    node_factory: Option<Arc<dyn NodeFactory>>,
}

impl Default for ServiceContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceContextBuilder {
    /// Starts an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: DescriptorTable::new(),
            hierarchy: None,
            loader: None,
            node_factory: None,
        }
    }

    /// Registers a descriptor; rejections are logged and skipped.
    #[must_use]
    pub fn register(mut self, descriptor: ServiceDescriptor) -> Self {
        let _ = self.table.register(descriptor);
        self
    }

    /// Registers a descriptor, surfacing rejections to the caller.
    pub fn try_register(&mut self, descriptor: ServiceDescriptor) -> Result<(), ServiceError> {
        self.table.register(descriptor)
    }

    /// Attaches the external hierarchy model.
    #[must_use]
    pub fn hierarchy(mut self, hierarchy: Arc<dyn Hierarchy>) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    /// Attaches the external resource loader.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Attaches the external node factory.
    #[must_use]
    pub fn node_factory(mut self, factory: Arc<dyn NodeFactory>) -> Self {
        self.node_factory = Some(factory);
        self
    }

    /// Builds the context. Nothing is materialized until
    /// [`startup`](ServiceContext::startup) or a lazy resolution demands it.
    #[must_use]
    pub fn build(self) -> ServiceContext {
        let table = Arc::new(self.table);
        let bus = Arc::new(ChangeBus::new());
        ServiceContext {
            global: GlobalRegistry::new(table.clone(), bus.clone()),
            scoped: ScopedRegistry::new(table.clone(), bus.clone()),
            providers: ProviderIndex::new(),
            table,
            bus,
            init: Initializer::new(),
            hierarchy: self.hierarchy.unwrap_or_else(|| Arc::new(Detached)),
            loader: self.loader,
            node_factory: self.node_factory,
            generation: AtomicU64::new(0),
            clients: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            eager_phase: AtomicBool::new(false),
        }
    }
}

/// The service resolution engine: global and scoped registries, value
/// providers, the materialization machinery, and the collaborator handles,
/// with explicit startup and teardown.
pub struct ServiceContext {
    table: Arc<DescriptorTable>,
    global: GlobalRegistry,
    scoped: ScopedRegistry,
    providers: ProviderIndex,
    bus: Arc<ChangeBus>,
    init: Initializer,
    hierarchy: Arc<dyn Hierarchy>,
    loader: Option<Arc<dyn ResourceLoader>>,
    node_factory: Option<Arc<dyn NodeFactory>>,
    /// Bumped at teardown so creations that straddle it drop their results.
    generation: AtomicU64,
    clients: Mutex<Vec<PendingClient>>,
    started: AtomicBool,
    /// During the eager pass, non-lazy dependencies materialize on demand.
    eager_phase: AtomicBool,
}

impl ServiceContext {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> ServiceContextBuilder {
        ServiceContextBuilder::new()
    }

    // --- internal accessors shared with the initializer and injector ---

    pub(crate) fn init(&self) -> &Initializer {
        &self.init
    }

    pub(crate) fn global(&self) -> &GlobalRegistry {
        &self.global
    }

    pub(crate) fn scoped(&self) -> &ScopedRegistry {
        &self.scoped
    }

    pub(crate) fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub(crate) fn generation(&self) -> &AtomicU64 {
        &self.generation
    }

    pub(crate) fn loader(&self) -> Option<&dyn ResourceLoader> {
        self.loader.as_deref()
    }

    pub(crate) fn node_factory(&self) -> Option<&dyn NodeFactory> {
        self.node_factory.as_deref()
    }

    // --- resolution ---

    /// Resolves an instance of `key` for `requester`, logging failures and
    /// flattening them into `None`.
    pub async fn resolve(&self, requester: Option<NodeId>, key: TypeKey) -> Option<ServiceHandle> {
        match self.try_resolve(requester, key).await {
            Ok(found) => found,
            Err(err) => {
                log::error!("resolution of {key} failed: {err}");
                None
            }
        }
    }

    /// Resolves an instance of `key` for `requester`, surfacing
    /// materialization failures to the caller.
    pub async fn try_resolve(
        &self,
        requester: Option<NodeId>,
        key: TypeKey,
    ) -> Result<Option<ServiceHandle>, ServiceError> {
        self.try_resolve_on(requester, key, Vec::new()).await
    }

    /// Typed resolution by concrete type.
    pub async fn resolve_as<T: Send + Sync + 'static>(
        &self,
        requester: Option<NodeId>,
    ) -> Option<Arc<T>> {
        let handle = self.resolve(requester, TypeKey::of::<T>()).await?;
        downcast_handle::<T>(&handle)
    }

    /// Blocking adapter over [`resolve`](Self::resolve) for the outermost
    /// orchestration boundary.
    pub fn resolve_blocking(
        &self,
        requester: Option<NodeId>,
        key: TypeKey,
    ) -> Option<ServiceHandle> {
        pollster::block_on(self.resolve(requester, key))
    }

    /// The full resolution ladder. Boxed so dependency gathering may
    /// recurse back into it; `path` carries the concrete types already
    /// materializing on this resolution path for cycle detection.
    pub(crate) fn try_resolve_on<'a>(
        &'a self,
        requester: Option<NodeId>,
        key: TypeKey,
        path: Vec<TypeKey>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ServiceHandle>, ServiceError>> + Send + 'a>>
    {
        Box::pin(async move {
            // Scoped entries visible to the requester win over everything.
            let candidates =
                self.scoped
                    .visible_candidates(key, requester, self.hierarchy.as_ref());
            let count = candidates.len();
            if let Some(selection) =
                resolver::select_candidate(candidates, requester, self.hierarchy.as_ref())
            {
                if selection.ambiguous {
                    log::warn!(
                        "{}",
                        ServiceError::AmbiguousMatch {
                            key,
                            candidates: count
                        }
                    );
                }
                return Ok(Some(selection.handle));
            }

            // Shared slot.
            if let Some(handle) = self.global.try_get(key) {
                return Ok(Some(handle));
            }

            // Known but unmaterialized descriptor. Lazy and transient
            // services materialize on first demand; eager ones only during
            // the startup pass.
            if let Some(descriptor) = self.table.get(&key) {
                let flags = descriptor.flags();
                if flags.lazy || flags.transient || self.eager_phase.load(Ordering::SeqCst) {
                    if let Some(err) = self.global.failure(key) {
                        return Err(err);
                    }
                    let descriptor = descriptor.clone();
                    let handle = self.get_or_create(descriptor, key, requester, path).await?;
                    return Ok(Some(handle));
                }
            }

            // One level of value-provider indirection.
            if let Some(value) =
                self.providers
                    .provide_for(key, requester, self.hierarchy.as_ref())
            {
                return Ok(Some(value));
            }

            Ok(None)
        })
    }

    /// Best-guess explanation for why `key` did not resolve.
    pub(crate) fn not_found_reason(&self, key: TypeKey) -> NotFoundReason {
        if self.scoped.has_entries(key) || self.global.contains(key) || self.table.get(&key).is_some()
        {
            NotFoundReason::NotVisibleAtScope
        } else {
            NotFoundReason::NotRegistered
        }
    }

    // --- registration surface ---

    /// Registers a scoped instance under `key`, visible per `visibility`
    /// from `owner`.
    pub fn register_scoped(
        &self,
        key: TypeKey,
        instance: ServiceHandle,
        visibility: VisibilityScope,
        owner: NodeId,
    ) -> Result<(), ServiceError> {
        self.scoped.add(key, instance, visibility, owner)
    }

    /// Typed convenience over [`register_scoped`](Self::register_scoped).
    pub fn register_scoped_instance<T: Send + Sync + 'static>(
        &self,
        value: T,
        visibility: VisibilityScope,
        owner: NodeId,
    ) -> Result<(), ServiceError> {
        self.register_scoped(TypeKey::of::<T>(), handle_of(value), visibility, owner)
    }

    /// Removes a scoped instance registered by `owner`.
    pub fn unregister_scoped(
        &self,
        key: TypeKey,
        instance: &ServiceHandle,
        owner: NodeId,
    ) -> bool {
        self.scoped.remove(key, instance, owner)
    }

    /// Removes everything `owner` registered (instances and providers),
    /// returning the removed instances so the registerer can dispose them.
    pub fn unregister_owner(&self, owner: NodeId) -> Vec<(TypeKey, ServiceHandle)> {
        self.providers.remove_owned_by(owner);
        self.scoped.remove_all_owned_by(owner)
    }

    /// Replaces the global slot for `key`, raising a change event when the
    /// instance actually changed.
    pub fn set_global(&self, key: TypeKey, instance: ServiceHandle) -> Result<(), ServiceError> {
        self.global.set(key, instance)
    }

    /// Same replacement as [`set_global`](Self::set_global) without the
    /// change event.
    pub fn set_global_silently(
        &self,
        key: TypeKey,
        instance: ServiceHandle,
    ) -> Result<(), ServiceError> {
        self.global.set_silently(key, instance)
    }

    /// Typed convenience over [`set_global`](Self::set_global).
    pub fn set_global_instance<T: Send + Sync + 'static>(
        &self,
        value: T,
    ) -> Result<(), ServiceError> {
        self.global.set_instance(value)
    }

    /// Clears the global slot for `key`, returning the removed instance.
    pub fn unset_global(&self, key: TypeKey) -> Option<ServiceHandle> {
        self.global.unset(key)
    }

    /// The global instance for `key`, or [`ServiceError::ServiceNotFound`].
    pub fn get_global(&self, key: TypeKey) -> Result<ServiceHandle, ServiceError> {
        self.global.get(key)
    }

    /// The global instance for `key`, if one is ready.
    #[must_use]
    pub fn try_get_global(&self, key: TypeKey) -> Option<ServiceHandle> {
        self.global.try_get(key)
    }

    /// Typed convenience over [`try_get_global`](Self::try_get_global).
    #[must_use]
    pub fn try_get_global_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.try_get_global(TypeKey::of::<T>())
            .and_then(|handle| downcast_handle::<T>(&handle))
    }

    /// Registers a value provider, optionally limited to a visibility scope
    /// anchored at an owner node.
    pub fn register_provider(
        &self,
        provider: Arc<dyn ValueProvider>,
        scope: Option<(VisibilityScope, NodeId)>,
    ) {
        self.providers.register(provider, scope);
    }

    // --- notifications ---

    /// Subscribes to instance changes of `key`. Events arrive for global
    /// replacements, scoped add/remove, and lazy materializations.
    pub fn on_instance_changed(&self, key: TypeKey) -> flume::Receiver<InstanceChanged> {
        self.bus.subscribe(key)
    }

    /// Waits until an instance of `key` is globally available, completing
    /// immediately if it already is. Returns `None` only if the context is
    /// dropped while waiting.
    pub async fn wait_for(&self, key: TypeKey) -> Option<ServiceHandle> {
        if let Some(handle) = self.global.try_get(key) {
            return Some(handle);
        }
        let rx = self.bus.subscribe(key);
        // A set between the check above and the subscription would be lost;
        // look again now that the subscription exists.
        if let Some(handle) = self.global.try_get(key) {
            return Some(handle);
        }
        loop {
            match rx.recv_async().await {
                Ok(event) => {
                    if let Some(new) = event.new {
                        return Some(new);
                    }
                }
                Err(_) => return None,
            }
        }
    }

    // --- membership and existence ---

    /// Whether the given instance is currently registered as a service,
    /// scoped or global.
    #[must_use]
    pub fn is_service(&self, instance: &ServiceHandle) -> bool {
        self.scoped.contains_instance(instance) || self.global.contains_instance(instance)
    }

    /// Whether the given instance is a service `requester` would receive
    /// for `key`.
    #[must_use]
    pub fn is_service_for(
        &self,
        requester: Option<NodeId>,
        key: TypeKey,
        instance: &ServiceHandle,
    ) -> bool {
        if self
            .scoped
            .instance_visible_to(instance, requester, self.hierarchy.as_ref())
        {
            return true;
        }
        self.global
            .try_get(key)
            .map(|handle| same_instance(&handle, instance))
            .unwrap_or(false)
    }

    /// Whether `key` is known at all: a ready instance, a scoped entry, or
    /// a descriptor. Never materializes anything.
    #[must_use]
    pub fn exists(&self, key: TypeKey) -> bool {
        self.global.try_get(key).is_some()
            || self.scoped.has_entries(key)
            || self.table.get(&key).is_some()
    }

    /// Whether `requester` could obtain `key` without materializing
    /// anything new beyond what a descriptor promises.
    #[must_use]
    pub fn exists_for(&self, requester: Option<NodeId>, key: TypeKey) -> bool {
        !self
            .scoped
            .visible_candidates(key, requester, self.hierarchy.as_ref())
            .is_empty()
            || self.global.try_get(key).is_some()
            || self.table.get(&key).is_some()
    }

    /// Whether an instance of `key` is registered with
    /// [`VisibilityScope::Everywhere`].
    #[must_use]
    pub fn exists_for_all_clients(&self, key: TypeKey) -> bool {
        self.scoped.any_everywhere(key)
    }

    // --- clients ---

    /// Runs a dependency contract against a non-service client right now.
    pub async fn inject_into(
        &self,
        key: TypeKey,
        target: &ServiceHandle,
        contract: &DependencyContract,
        requester: Option<NodeId>,
    ) -> Result<(), ServiceError> {
        self.run_contract(key, target, contract, requester, &[]).await
    }

    /// Registers a non-service client for dependency injection. Before
    /// startup the client is queued and injected once every eager service
    /// is ready; afterwards injection runs immediately.
    pub async fn register_client(
        &self,
        key: TypeKey,
        target: ServiceHandle,
        contract: DependencyContract,
        requester: Option<NodeId>,
    ) -> Result<(), ServiceError> {
        if self.started.load(Ordering::SeqCst) {
            return self
                .run_contract(key, &target, &contract, requester, &[])
                .await;
        }
        self.clients
            .lock()
            .expect("client queue lock poisoned")
            .push(PendingClient {
                key,
                target,
                contract,
                requester,
            });
        log::debug!("client {key} queued for injection after startup");
        Ok(())
    }

    // --- lifecycle ---

    /// Materializes every non-lazy descriptor in declaration-scan order,
    /// then injects queued clients. Failures are isolated per service and
    /// logged; the pass always completes.
    pub async fn startup(&self) -> StartupReport {
        let start = Instant::now();
        self.eager_phase.store(true, Ordering::SeqCst);
        let mut ready = 0usize;
        let mut failed = 0usize;

        let eager: Vec<Arc<ServiceDescriptor>> = self
            .table
            .iter()
            .filter(|d| !d.flags().lazy)
            .cloned()
            .collect();
        for descriptor in eager {
            let key = descriptor.defining()[0];
            if self.global.try_get(key).is_some() {
                // Already materialized as a dependency of an earlier one.
                ready += 1;
                continue;
            }
            match self.get_or_create(descriptor, key, None, Vec::new()).await {
                Ok(_) => ready += 1,
                Err(err) => {
                    failed += 1;
                    log::error!("eager materialization of {key} failed: {err}");
                }
            }
        }
        self.eager_phase.store(false, Ordering::SeqCst);

        let queued: Vec<PendingClient> = std::mem::take(
            &mut *self.clients.lock().expect("client queue lock poisoned"),
        );
        for client in queued {
            if let Err(err) = self
                .run_contract(
                    client.key,
                    &client.target,
                    &client.contract,
                    client.requester,
                    &[],
                )
                .await
            {
                log::error!("client injection for {} failed: {err}", client.key);
            }
        }
        self.started.store(true, Ordering::SeqCst);

        let report = StartupReport {
            ready,
            failed,
            elapsed: start.elapsed(),
        };
        log::info!(
            "service startup: {} ready, {} failed in {:.2?}",
            report.ready,
            report.failed,
            report.elapsed
        );
        report
    }

    /// Blocking adapter over [`startup`](Self::startup).
    pub fn startup_blocking(&self) -> StartupReport {
        pollster::block_on(self.startup())
    }

    /// Clears both registries and the provider index, abandons in-flight
    /// creations, and runs dispose hooks for cached instances the external
    /// hierarchy does not own. Hook order is best-effort, not
    /// reverse-dependency order.
    pub fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.init.reset();

        let scoped = self.scoped.clear();
        let global = self.global.clear();
        let mut disposed = 0usize;
        let mut seen: HashSet<*const ()> = HashSet::new();
        for (id, handle, hierarchy_owned) in &global {
            if *hierarchy_owned {
                continue;
            }
            if !seen.insert(Arc::as_ptr(handle).cast::<()>()) {
                continue;
            }
            if let Some(descriptor) = self.table.get_by_id(*id) {
                if let Some(dispose) = descriptor.dispose() {
                    dispose(handle);
                    disposed += 1;
                }
            }
        }

        self.providers.clear();
        self.clients
            .lock()
            .expect("client queue lock poisoned")
            .clear();
        self.started.store(false, Ordering::SeqCst);
        log::info!(
            "service context torn down: {} global slot(s) and {} scoped entries cleared, {} dispose hook(s) run",
            global.len(),
            scoped.len(),
            disposed
        );
    }
}
