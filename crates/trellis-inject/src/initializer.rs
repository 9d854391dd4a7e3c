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

//! Lazy materialization: the creation strategy chain, recursion into
//! dependency resolution, cycle detection, and at-most-once pending
//! futures.
//!
//! Creation strategies run in a fixed priority order, stopping at the
//! first that yields an instance:
//!
//! 1. the descriptor's custom factory object,
//! 2. adopting a pre-existing instance found in the hierarchy,
//! 3. materializing from the external store via the resource locator,
//! 4. constructing a fresh node through the node factory,
//! 5. an explicitly registered constructor, widest resolvable parameter
//!    list first, with the zero-argument form as the natural fallback.
//!
//! Cycle detection threads the set of types in flight on the current
//! resolution path through the recursion itself; a type re-encountered on
//! its own path is a circular dependency. Overlapping requests from
//! *other* resolution paths instead join the shared pending future, so
//! materialization stays at-most-once per concrete type.

use crate::context::ServiceContext;
use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use trellis_core::{
    Artifact, ConstructorSpec, InstanceChanged, NodeId, Registration, ServiceDescriptor,
    ServiceError, ServiceHandle, TypeKey,
};

pub(crate) type PendingResult = Result<ServiceHandle, ServiceError>;

/// Shared creation state: one pending future per concrete type, letting
/// overlapping requesters await one creation instead of racing a second.
pub(crate) struct Initializer {
    pending: Mutex<HashMap<TypeId, watch::Receiver<Option<PendingResult>>>>,
}

impl Initializer {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn join_pending(&self, id: TypeId) -> Option<watch::Receiver<Option<PendingResult>>> {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .get(&id)
            .cloned()
    }

    fn insert_pending(&self, id: TypeId, rx: watch::Receiver<Option<PendingResult>>) {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, rx);
    }

    fn remove_pending(&self, id: TypeId) {
        self.pending.lock().expect("pending lock poisoned").remove(&id);
    }

    /// Abandons every in-flight creation. Results that arrive afterwards
    /// are not committed to the registries.
    pub(crate) fn reset(&self) {
        self.pending.lock().expect("pending lock poisoned").clear();
    }
}

/// What a creation strategy produced.
struct Created {
    handle: ServiceHandle,
    /// The node the instance is attached to, when a strategy knows it.
    node: Option<NodeId>,
    /// Whether the external hierarchy owns the instance.
    hierarchy_owned: bool,
}

impl ServiceContext {
    /// Materializes (or joins the in-progress materialization of) the
    /// service described by `descriptor`, requested as `requested`.
    ///
    /// `path` is the chain of concrete types already materializing on this
    /// resolution path; finding the new concrete type in it is a circular
    /// dependency and aborts only this branch.
    pub(crate) fn get_or_create<'a>(
        &'a self,
        descriptor: Arc<ServiceDescriptor>,
        requested: TypeKey,
        requester: Option<NodeId>,
        path: Vec<TypeKey>,
    ) -> Pin<Box<dyn Future<Output = PendingResult> + Send + 'a>> {
        Box::pin(async move {
            let concrete = descriptor.concrete_or(requested);
            if path.contains(&concrete) {
                let mut chain = path;
                chain.push(concrete);
                return Err(ServiceError::CircularDependency { chain });
            }
            let transient = descriptor.flags().transient;

            if !transient {
                if let Some(mut rx) = self.init().join_pending(concrete.id()) {
                    let settled = match rx.wait_for(Option::is_some).await {
                        Ok(value) => (*value).clone(),
                        Err(_) => None,
                    };
                    return settled.unwrap_or_else(|| {
                        Err(ServiceError::InitializerFailed {
                            key: concrete,
                            reason: "creation abandoned during teardown".into(),
                        })
                    });
                }
            }

            let mut path = path;
            path.push(concrete);
            let generation = self.generation().load(Ordering::SeqCst);

            let tx = if transient {
                None
            } else {
                let (tx, rx) = watch::channel::<Option<PendingResult>>(None);
                self.init().insert_pending(concrete.id(), rx);
                if matches!(descriptor.registration(), Registration::Global) {
                    self.global().begin_materializing(descriptor.defining());
                }
                Some(tx)
            };

            let outcome = self
                .run_strategies(&descriptor, concrete, requested, requester, &path)
                .await;

            let current = self.generation().load(Ordering::SeqCst) == generation;
            let result: PendingResult = match outcome {
                Ok(created) if transient => Ok(created.handle),
                Ok(created) if current => {
                    self.commit(&descriptor, concrete, requester, created, &path)
                        .await
                }
                Ok(_) => Err(ServiceError::InitializerFailed {
                    key: concrete,
                    reason: "context was torn down during creation".into(),
                }),
                Err(err) => {
                    log::error!(
                        "materialization of {} (defining {:?}) failed: {err}",
                        concrete,
                        descriptor
                            .defining()
                            .iter()
                            .map(TypeKey::short_name)
                            .collect::<Vec<_>>()
                    );
                    if !transient && current {
                        self.global().fail(descriptor.defining(), &err);
                    }
                    Err(err)
                }
            };

            if let Some(tx) = tx {
                if current {
                    self.init().remove_pending(concrete.id());
                }
                let _ = tx.send(Some(result.clone()));
            }
            result
        })
    }

    /// Caches the created instance per the descriptor's registration kind,
    /// then runs the post-creation dependency contract exactly once.
    ///
    /// The instance is cached before injection so the contract's own
    /// dependency chain may observe it.
    async fn commit(
        &self,
        descriptor: &Arc<ServiceDescriptor>,
        concrete: TypeKey,
        requester: Option<NodeId>,
        created: Created,
        path: &[TypeKey],
    ) -> PendingResult {
        let keys = descriptor.defining();
        match descriptor.registration() {
            Registration::Global => {
                self.global()
                    .complete(keys, &created.handle, created.hierarchy_owned);
            }
            Registration::Scoped(visibility) => match created.node.or(requester) {
                Some(owner) => {
                    for key in keys {
                        self.scoped()
                            .add(*key, created.handle.clone(), visibility, owner)?;
                    }
                }
                None => {
                    log::warn!("scoped service {concrete} has no owner node; caching it globally");
                    self.global()
                        .complete(keys, &created.handle, created.hierarchy_owned);
                }
            },
        }

        if let Some(contract) = descriptor.contract() {
            if let Err(err) = self
                .run_contract(concrete, &created.handle, contract, requester, path)
                .await
            {
                self.retract(descriptor, &created.handle, &err);
                return Err(err);
            }
        }
        Ok(created.handle)
    }

    /// Removes a just-cached instance whose contract injection failed, so
    /// clients never observe a half-initialized service.
    fn retract(
        &self,
        descriptor: &Arc<ServiceDescriptor>,
        handle: &ServiceHandle,
        err: &ServiceError,
    ) {
        match descriptor.registration() {
            Registration::Global => {
                self.global().fail(descriptor.defining(), err);
                for key in descriptor.defining() {
                    self.bus().publish(InstanceChanged {
                        key: *key,
                        old: Some(handle.clone()),
                        new: None,
                    });
                }
            }
            Registration::Scoped(_) => {
                for key in descriptor.defining() {
                    while self.scoped().remove_instance_anywhere(*key, handle) {}
                }
            }
        }
    }

    async fn run_strategies(
        &self,
        descriptor: &Arc<ServiceDescriptor>,
        concrete: TypeKey,
        requested: TypeKey,
        requester: Option<NodeId>,
        path: &[TypeKey],
    ) -> Result<Created, ServiceError> {
        // 1. Custom factory object.
        if let Some(factory) = descriptor.factory() {
            let deps = self
                .gather_dependencies(concrete, &factory.dependencies(), requester, path)
                .await?;
            match factory.build(deps).await {
                Ok(Some(handle)) => {
                    log::debug!("{concrete} created by its factory");
                    return Ok(Created {
                        handle,
                        node: None,
                        hierarchy_owned: false,
                    });
                }
                Ok(None) => log::debug!("factory for {concrete} declined"),
                Err(err) => {
                    return Err(ServiceError::InitializerFailed {
                        key: concrete,
                        reason: format!("{err:#}"),
                    })
                }
            }
        }

        // 2. Adopt a pre-existing instance.
        if descriptor.flags().find_existing {
            if let Some(nodes) = self.node_factory() {
                if let Some((handle, node)) = nodes.find_existing(&concrete) {
                    log::debug!("{concrete} adopted from the hierarchy");
                    return Ok(Created {
                        handle,
                        node,
                        hierarchy_owned: true,
                    });
                }
            }
        }

        // 3. Materialize from the external store.
        if let Some(locator) = descriptor.locator() {
            if let Some(loader) = self.loader() {
                let artifact = if descriptor.flags().load_async {
                    loader.load_async(locator).await
                } else {
                    loader.load(locator)
                };
                return match artifact {
                    Ok(Artifact::Ready(handle)) => Ok(Created {
                        handle,
                        node: None,
                        hierarchy_owned: false,
                    }),
                    Ok(Artifact::Blueprint(blueprint)) => {
                        let Some(nodes) = self.node_factory() else {
                            return Err(ServiceError::InitializerFailed {
                                key: concrete,
                                reason: format!(
                                    "'{locator}' loaded a blueprint but no node factory is configured"
                                ),
                            });
                        };
                        blueprint
                            .instantiate(nodes)
                            .map(|(handle, node)| Created {
                                handle,
                                node,
                                hierarchy_owned: true,
                            })
                            .map_err(|err| ServiceError::InitializerFailed {
                                key: concrete,
                                reason: format!("blueprint instantiation failed: {err:#}"),
                            })
                    }
                    Err(err) => Err(ServiceError::InitializerFailed {
                        key: concrete,
                        reason: format!("loader failed for '{locator}': {err:#}"),
                    }),
                };
            }
            log::warn!("{concrete} names locator '{locator}' but no loader is configured");
        }

        // 4. Construct inside the hierarchy.
        if let Some(nodes) = self.node_factory() {
            if let Some((handle, node)) = nodes.create_node_with(&concrete) {
                log::debug!("{concrete} constructed on fresh {node}");
                return Ok(Created {
                    handle,
                    node: Some(node),
                    hierarchy_owned: true,
                });
            }
        }

        // 5. Registered constructors.
        let mut specs: Vec<&ConstructorSpec> = descriptor.constructors().iter().collect();
        specs.sort_by(|a, b| b.params().len().cmp(&a.params().len()));
        for spec in specs {
            let args = match self
                .gather_dependencies(concrete, spec.params(), requester, path)
                .await
            {
                Ok(args) => args,
                Err(err @ ServiceError::CircularDependency { .. }) => return Err(err),
                Err(err) => {
                    log::debug!(
                        "constructor of {concrete} with {} parameter(s) skipped: {err}",
                        spec.params().len()
                    );
                    continue;
                }
            };
            return spec
                .build(args)
                .map(|handle| Created {
                    handle,
                    node: None,
                    hierarchy_owned: false,
                })
                .map_err(|err| ServiceError::InitializerFailed {
                    key: concrete,
                    reason: format!("{err:#}"),
                });
        }

        if descriptor.concrete().is_none()
            && descriptor.factory().is_none()
            && descriptor.constructors().is_empty()
        {
            Err(ServiceError::UnresolvableConcreteType { key: requested })
        } else {
            Err(ServiceError::InitializerReturnedNull { key: concrete })
        }
    }

    /// Resolves a list of dependency types for `requester_type`, recursing
    /// through the resolver (and from there back into materialization).
    pub(crate) async fn gather_dependencies(
        &self,
        requester_type: TypeKey,
        deps: &[TypeKey],
        requester: Option<NodeId>,
        path: &[TypeKey],
    ) -> Result<Vec<ServiceHandle>, ServiceError> {
        let mut resolved = Vec::with_capacity(deps.len());
        for dep in deps {
            match self.try_resolve_on(requester, *dep, path.to_vec()).await? {
                Some(handle) => resolved.push(handle),
                None => {
                    return Err(ServiceError::MissingDependency {
                        requester: requester_type,
                        missing: *dep,
                        reason: self.not_found_reason(*dep),
                    })
                }
            }
        }
        Ok(resolved)
    }
}
