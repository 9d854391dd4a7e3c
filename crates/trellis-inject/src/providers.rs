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

//! Index of registered value providers, keyed by the type they provide.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use trellis_core::{Hierarchy, NodeId, ServiceHandle, TypeKey, ValueProvider, VisibilityScope};

struct ProviderEntry {
    provider: Arc<dyn ValueProvider>,
    scope: Option<(VisibilityScope, NodeId)>,
}

/// Registered value providers, consulted when a requested type has no
/// direct service registration.
///
/// Unwrapping is a single level of indirection: whatever a provider
/// returns is final, even if it is itself a provider.
#[derive(Default)]
pub struct ProviderIndex {
    entries: RwLock<HashMap<TypeId, Vec<ProviderEntry>>>,
}

impl ProviderIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider, optionally limited to a visibility scope
    /// anchored at an owner node.
    pub fn register(
        &self,
        provider: Arc<dyn ValueProvider>,
        scope: Option<(VisibilityScope, NodeId)>,
    ) {
        let provided = provider.provides();
        log::debug!("ProviderIndex: provider registered for {provided}");
        self.entries
            .write()
            .expect("provider index lock poisoned")
            .entry(provided.id())
            .or_default()
            .push(ProviderEntry { provider, scope });
    }

    /// Removes every provider whose scope is anchored at `owner`.
    pub fn remove_owned_by(&self, owner: NodeId) {
        let mut entries = self.entries.write().expect("provider index lock poisoned");
        entries.retain(|_, list| {
            list.retain(|e| e.scope.map(|(_, o)| o != owner).unwrap_or(true));
            !list.is_empty()
        });
    }

    /// Asks the first visible provider of `key` (in registration order) for
    /// a value.
    pub(crate) fn provide_for(
        &self,
        key: TypeKey,
        requester: Option<NodeId>,
        hierarchy: &dyn Hierarchy,
    ) -> Option<ServiceHandle> {
        let entries = self.entries.read().expect("provider index lock poisoned");
        let list = entries.get(&key.id())?;
        for entry in list {
            let visible = match entry.scope {
                None => true,
                Some((visibility, owner)) => visibility.admits(owner, requester, hierarchy),
            };
            if !visible {
                continue;
            }
            if let Some(value) = entry.provider.provide_for(requester) {
                return Some(value);
            }
        }
        None
    }

    /// Drops every provider.
    pub(crate) fn clear(&self) {
        self.entries
            .write()
            .expect("provider index lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{downcast_handle, handle_of, PartitionId};

    struct Locale {
        tag: &'static str,
    }

    struct LocaleProvider {
        tag: &'static str,
    }

    impl ValueProvider for LocaleProvider {
        fn provides(&self) -> TypeKey {
            TypeKey::of::<Locale>()
        }

        fn provide_for(&self, _requester: Option<NodeId>) -> Option<ServiceHandle> {
            Some(handle_of(Locale { tag: self.tag }))
        }
    }

    struct FlatHierarchy;

    impl Hierarchy for FlatHierarchy {
        fn parent(&self, _node: NodeId) -> Option<NodeId> {
            None
        }

        fn partition_of(&self, _node: NodeId) -> Option<PartitionId> {
            None
        }
    }

    #[test]
    fn first_registered_provider_wins() {
        let index = ProviderIndex::new();
        index.register(Arc::new(LocaleProvider { tag: "en" }), None);
        index.register(Arc::new(LocaleProvider { tag: "fr" }), None);

        let value = index
            .provide_for(TypeKey::of::<Locale>(), None, &FlatHierarchy)
            .unwrap();
        assert_eq!(downcast_handle::<Locale>(&value).unwrap().tag, "en");
    }

    #[test]
    fn scoped_provider_is_invisible_outside_its_scope() {
        let index = ProviderIndex::new();
        index.register(
            Arc::new(LocaleProvider { tag: "en" }),
            Some((VisibilityScope::OwnerOnly, NodeId(1))),
        );

        let h = FlatHierarchy;
        assert!(index
            .provide_for(TypeKey::of::<Locale>(), Some(NodeId(1)), &h)
            .is_some());
        assert!(index
            .provide_for(TypeKey::of::<Locale>(), Some(NodeId(2)), &h)
            .is_none());
    }

    #[test]
    fn remove_owned_by_drops_anchored_providers() {
        let index = ProviderIndex::new();
        index.register(
            Arc::new(LocaleProvider { tag: "en" }),
            Some((VisibilityScope::Everywhere, NodeId(1))),
        );
        index.remove_owned_by(NodeId(1));
        assert!(index
            .provide_for(TypeKey::of::<Locale>(), None, &FlatHierarchy)
            .is_none());
    }
}
