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

//! Node-scoped service instances with visibility rules.
//!
//! Entries keep their registration order; the resolver relies on that order
//! only as the tie-break of last resort, never for primary correctness.

use std::sync::{Arc, RwLock};
use trellis_core::{
    same_instance, ChangeBus, DescriptorTable, Hierarchy, InstanceChanged, NodeId, ServiceError,
    ServiceHandle, TypeKey, VisibilityScope,
};

struct ScopedEntry {
    key: TypeKey,
    handle: ServiceHandle,
    visibility: VisibilityScope,
    owner: NodeId,
}

/// A visible candidate produced by a scoped lookup, in registration order.
pub(crate) struct Candidate {
    pub(crate) handle: ServiceHandle,
    pub(crate) owner: NodeId,
}

/// Collection of `(instance, visibility, owner)` registrations.
///
/// Multiple instances may coexist for the same defining type; whether that
/// is a problem is decided per-requester at resolution time. Entries are
/// owned by whatever external component registered them and are removed
/// when that registerer goes away.
pub struct ScopedRegistry {
    table: Arc<DescriptorTable>,
    entries: RwLock<Vec<ScopedEntry>>,
    bus: Arc<ChangeBus>,
}

impl ScopedRegistry {
    /// Creates an empty registry validating registrations against `table`.
    #[must_use]
    pub fn new(table: Arc<DescriptorTable>, bus: Arc<ChangeBus>) -> Self {
        Self {
            table,
            entries: RwLock::new(Vec::new()),
            bus,
        }
    }

    /// Registers an instance under `key`, visible per `visibility` from
    /// `owner`.
    ///
    /// Instances contradicting the descriptor's declared concrete type are
    /// rejected with a logged diagnostic.
    pub fn add(
        &self,
        key: TypeKey,
        instance: ServiceHandle,
        visibility: VisibilityScope,
        owner: NodeId,
    ) -> Result<(), ServiceError> {
        if let Err(err) = self.table.check_assignable(&key, &instance) {
            log::error!("ScopedRegistry: rejected registration for {key}: {err}");
            return Err(err);
        }
        self.entries
            .write()
            .expect("scoped registry lock poisoned")
            .push(ScopedEntry {
                key,
                handle: instance.clone(),
                visibility,
                owner,
            });
        log::debug!("ScopedRegistry: {key} registered at {owner} ({visibility:?})");
        self.bus.publish(InstanceChanged {
            key,
            old: None,
            new: Some(instance),
        });
        Ok(())
    }

    /// Removes the entry for this exact instance and registerer. Returns
    /// whether an entry was removed.
    pub fn remove(&self, key: TypeKey, instance: &ServiceHandle, owner: NodeId) -> bool {
        let removed = {
            let mut entries = self.entries.write().expect("scoped registry lock poisoned");
            let before = entries.len();
            entries.retain(|e| {
                !(e.key == key && e.owner == owner && same_instance(&e.handle, instance))
            });
            before != entries.len()
        };
        if removed {
            self.bus.publish(InstanceChanged {
                key,
                old: Some(instance.clone()),
                new: None,
            });
        }
        removed
    }

    /// Removes every entry registered by `owner`, returning what was
    /// removed so the registerer can dispose what it owned.
    pub fn remove_all_owned_by(&self, owner: NodeId) -> Vec<(TypeKey, ServiceHandle)> {
        let removed: Vec<(TypeKey, ServiceHandle)> = {
            let mut entries = self.entries.write().expect("scoped registry lock poisoned");
            let mut removed = Vec::new();
            entries.retain(|e| {
                if e.owner == owner {
                    removed.push((e.key, e.handle.clone()));
                    false
                } else {
                    true
                }
            });
            removed
        };
        for (key, handle) in &removed {
            self.bus.publish(InstanceChanged {
                key: *key,
                old: Some(handle.clone()),
                new: None,
            });
        }
        removed
    }

    /// Removes one entry holding this exact instance under `key`,
    /// regardless of owner. Returns whether an entry was removed.
    pub(crate) fn remove_instance_anywhere(
        &self,
        key: TypeKey,
        instance: &ServiceHandle,
    ) -> bool {
        let removed = {
            let mut entries = self.entries.write().expect("scoped registry lock poisoned");
            match entries
                .iter()
                .position(|e| e.key == key && same_instance(&e.handle, instance))
            {
                Some(position) => {
                    entries.remove(position);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.bus.publish(InstanceChanged {
                key,
                old: Some(instance.clone()),
                new: None,
            });
        }
        removed
    }

    /// Collects the entries for `key` visible to `requester`, in
    /// registration order.
    pub(crate) fn visible_candidates(
        &self,
        key: TypeKey,
        requester: Option<NodeId>,
        hierarchy: &dyn Hierarchy,
    ) -> Vec<Candidate> {
        let entries = self.entries.read().expect("scoped registry lock poisoned");
        entries
            .iter()
            .filter(|e| e.key == key && e.visibility.admits(e.owner, requester, hierarchy))
            .map(|e| Candidate {
                handle: e.handle.clone(),
                owner: e.owner,
            })
            .collect()
    }

    /// Whether any entry exists for `key`, visible or not.
    #[must_use]
    pub fn has_entries(&self, key: TypeKey) -> bool {
        self.entries
            .read()
            .expect("scoped registry lock poisoned")
            .iter()
            .any(|e| e.key == key)
    }

    /// Whether an entry for `key` with [`VisibilityScope::Everywhere`]
    /// exists.
    #[must_use]
    pub fn any_everywhere(&self, key: TypeKey) -> bool {
        self.entries
            .read()
            .expect("scoped registry lock poisoned")
            .iter()
            .any(|e| e.key == key && e.visibility == VisibilityScope::Everywhere)
    }

    /// Whether the given instance is registered, regardless of scope.
    #[must_use]
    pub fn contains_instance(&self, instance: &ServiceHandle) -> bool {
        self.entries
            .read()
            .expect("scoped registry lock poisoned")
            .iter()
            .any(|e| same_instance(&e.handle, instance))
    }

    /// Whether the given registered instance is visible to `requester`.
    #[must_use]
    pub fn instance_visible_to(
        &self,
        instance: &ServiceHandle,
        requester: Option<NodeId>,
        hierarchy: &dyn Hierarchy,
    ) -> bool {
        self.entries
            .read()
            .expect("scoped registry lock poisoned")
            .iter()
            .any(|e| {
                same_instance(&e.handle, instance)
                    && e.visibility.admits(e.owner, requester, hierarchy)
            })
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("scoped registry lock poisoned")
            .len()
    }

    /// Whether the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry without raising change events.
    pub(crate) fn clear(&self) -> Vec<(TypeKey, ServiceHandle)> {
        let mut entries = self.entries.write().expect("scoped registry lock poisoned");
        entries
            .drain(..)
            .map(|e| (e.key, e.handle))
            .collect()
    }
}
