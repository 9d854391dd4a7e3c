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

//! Context-wide service slots, one per defining type.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use trellis_core::{
    handle_of, same_instance, ChangeBus, DescriptorTable, InstanceChanged, NotFoundReason,
    ServiceError, ServiceHandle, TypeKey,
};

/// Lifecycle of one slot.
enum Slot {
    /// Creation is underway; requesters join the pending future instead of
    /// starting a second one.
    Materializing,
    /// A usable instance.
    Ready {
        handle: ServiceHandle,
        /// Whether the external hierarchy owns the instance, in which case
        /// teardown leaves disposal to it.
        hierarchy_owned: bool,
    },
    /// Creation failed; the reason is replayed to later requesters.
    Failed(ServiceError),
}

/// At most one shared instance per defining type.
///
/// Replacement raises a typed change event unless the new instance is
/// identical to the old one or the silent path is used.
pub struct GlobalRegistry {
    table: Arc<DescriptorTable>,
    slots: RwLock<HashMap<TypeId, Slot>>,
    bus: Arc<ChangeBus>,
}

impl GlobalRegistry {
    /// Creates an empty registry validating registrations against `table`.
    #[must_use]
    pub fn new(table: Arc<DescriptorTable>, bus: Arc<ChangeBus>) -> Self {
        Self {
            table,
            slots: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Replaces the slot for `key`, raising a change event when the
    /// instance actually changed.
    ///
    /// Instances that contradict the descriptor's declared concrete type
    /// are rejected with a logged diagnostic and the slot is untouched.
    pub fn set(&self, key: TypeKey, instance: ServiceHandle) -> Result<(), ServiceError> {
        self.replace(key, instance, false, true)
    }

    /// Same replacement as [`set`](Self::set) without raising the event.
    ///
    /// Used when materialization logic must not be re-entered through the
    /// change notification.
    pub fn set_silently(&self, key: TypeKey, instance: ServiceHandle) -> Result<(), ServiceError> {
        self.replace(key, instance, false, false)
    }

    /// Typed convenience over [`set`](Self::set).
    pub fn set_instance<T: Send + Sync + 'static>(&self, value: T) -> Result<(), ServiceError> {
        self.set(TypeKey::of::<T>(), handle_of(value))
    }

    fn replace(
        &self,
        key: TypeKey,
        instance: ServiceHandle,
        hierarchy_owned: bool,
        notify: bool,
    ) -> Result<(), ServiceError> {
        if let Err(err) = self.table.check_assignable(&key, &instance) {
            log::error!("GlobalRegistry: rejected registration for {key}: {err}");
            return Err(err);
        }
        let old = {
            let mut slots = self.slots.write().expect("global registry lock poisoned");
            let old = match slots.get(&key.id()) {
                Some(Slot::Ready { handle, .. }) => {
                    if same_instance(handle, &instance) {
                        return Ok(());
                    }
                    Some(handle.clone())
                }
                _ => None,
            };
            slots.insert(
                key.id(),
                Slot::Ready {
                    handle: instance.clone(),
                    hierarchy_owned,
                },
            );
            old
        };
        log::debug!("GlobalRegistry: {key} instance set");
        if notify {
            self.bus.publish(InstanceChanged {
                key,
                old,
                new: Some(instance),
            });
        }
        Ok(())
    }

    /// Clears the slot for `key`, raising a change event when an instance
    /// was present. Returns the removed instance.
    pub fn unset(&self, key: TypeKey) -> Option<ServiceHandle> {
        let old = {
            let mut slots = self.slots.write().expect("global registry lock poisoned");
            match slots.remove(&key.id()) {
                Some(Slot::Ready { handle, .. }) => Some(handle),
                _ => None,
            }
        };
        if let Some(old) = &old {
            log::debug!("GlobalRegistry: {key} instance unset");
            self.bus.publish(InstanceChanged {
                key,
                old: Some(old.clone()),
                new: None,
            });
        }
        old
    }

    /// Returns the ready instance for `key`, if any.
    #[must_use]
    pub fn try_get(&self, key: TypeKey) -> Option<ServiceHandle> {
        let slots = self.slots.read().expect("global registry lock poisoned");
        match slots.get(&key.id()) {
            Some(Slot::Ready { handle, .. }) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Returns the ready instance for `key` or a [`ServiceError::ServiceNotFound`].
    pub fn get(&self, key: TypeKey) -> Result<ServiceHandle, ServiceError> {
        self.try_get(key).ok_or(ServiceError::ServiceNotFound {
            key,
            reason: NotFoundReason::NotRegistered,
        })
    }

    /// Whether any slot (in any state) exists for `key`.
    #[must_use]
    pub fn contains(&self, key: TypeKey) -> bool {
        self.slots
            .read()
            .expect("global registry lock poisoned")
            .contains_key(&key.id())
    }

    /// Whether the given instance is registered under any slot.
    #[must_use]
    pub fn contains_instance(&self, instance: &ServiceHandle) -> bool {
        let slots = self.slots.read().expect("global registry lock poisoned");
        slots.values().any(|slot| match slot {
            Slot::Ready { handle, .. } => same_instance(handle, instance),
            _ => false,
        })
    }

    /// The recorded failure for `key`, if its materialization failed.
    #[must_use]
    pub fn failure(&self, key: TypeKey) -> Option<ServiceError> {
        let slots = self.slots.read().expect("global registry lock poisoned");
        match slots.get(&key.id()) {
            Some(Slot::Failed(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Marks every given defining type as materializing.
    pub(crate) fn begin_materializing(&self, keys: &[TypeKey]) {
        let mut slots = self.slots.write().expect("global registry lock poisoned");
        for key in keys {
            slots.entry(key.id()).or_insert(Slot::Materializing);
        }
    }

    /// Stores a freshly materialized instance under every defining type and
    /// publishes the change.
    pub(crate) fn complete(
        &self,
        keys: &[TypeKey],
        instance: &ServiceHandle,
        hierarchy_owned: bool,
    ) {
        {
            let mut slots = self.slots.write().expect("global registry lock poisoned");
            for key in keys {
                slots.insert(
                    key.id(),
                    Slot::Ready {
                        handle: instance.clone(),
                        hierarchy_owned,
                    },
                );
            }
        }
        for key in keys {
            self.bus.publish(InstanceChanged {
                key: *key,
                old: None,
                new: Some(instance.clone()),
            });
        }
    }

    /// Records a materialization failure under every defining type so the
    /// slots never linger in the materializing state.
    pub(crate) fn fail(&self, keys: &[TypeKey], err: &ServiceError) {
        let mut slots = self.slots.write().expect("global registry lock poisoned");
        for key in keys {
            slots.insert(key.id(), Slot::Failed(err.clone()));
        }
    }

    /// Drops every slot, returning the ready instances for disposal.
    pub(crate) fn clear(&self) -> Vec<(TypeId, ServiceHandle, bool)> {
        let mut slots = self.slots.write().expect("global registry lock poisoned");
        slots
            .drain()
            .filter_map(|(id, slot)| match slot {
                Slot::Ready {
                    handle,
                    hierarchy_owned,
                } => Some((id, handle, hierarchy_owned)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{downcast_handle, ServiceDescriptor};

    struct Renderer {
        backend: &'static str,
    }

    fn registry() -> GlobalRegistry {
        GlobalRegistry::new(Arc::new(DescriptorTable::new()), Arc::new(ChangeBus::new()))
    }

    #[test]
    fn set_then_get_round_trips() {
        let registry = registry();
        registry
            .set_instance(Renderer { backend: "vulkan" })
            .unwrap();
        let handle = registry.get(TypeKey::of::<Renderer>()).unwrap();
        assert_eq!(downcast_handle::<Renderer>(&handle).unwrap().backend, "vulkan");
    }

    #[test]
    fn get_missing_is_not_found() {
        let registry = registry();
        let err = registry.get(TypeKey::of::<Renderer>()).unwrap_err();
        assert!(matches!(err, ServiceError::ServiceNotFound { .. }));
    }

    #[test]
    fn replacement_raises_change_event() {
        let bus = Arc::new(ChangeBus::new());
        let registry = GlobalRegistry::new(Arc::new(DescriptorTable::new()), bus.clone());
        let rx = bus.subscribe(TypeKey::of::<Renderer>());

        registry.set_instance(Renderer { backend: "gl" }).unwrap();
        let first = rx.try_recv().unwrap();
        assert!(first.old.is_none());
        assert!(first.new.is_some());

        registry
            .set_instance(Renderer { backend: "vulkan" })
            .unwrap();
        let second = rx.try_recv().unwrap();
        assert!(second.old.is_some());
    }

    #[test]
    fn identical_replacement_is_a_silent_no_op() {
        let bus = Arc::new(ChangeBus::new());
        let registry = GlobalRegistry::new(Arc::new(DescriptorTable::new()), bus.clone());
        let rx = bus.subscribe(TypeKey::of::<Renderer>());

        let handle = handle_of(Renderer { backend: "gl" });
        registry.set(TypeKey::of::<Renderer>(), handle.clone()).unwrap();
        rx.try_recv().unwrap();
        registry.set(TypeKey::of::<Renderer>(), handle).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn silent_set_raises_no_event() {
        let bus = Arc::new(ChangeBus::new());
        let registry = GlobalRegistry::new(Arc::new(DescriptorTable::new()), bus.clone());
        let rx = bus.subscribe(TypeKey::of::<Renderer>());

        registry
            .set_silently(TypeKey::of::<Renderer>(), handle_of(Renderer { backend: "gl" }))
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert!(registry.try_get(TypeKey::of::<Renderer>()).is_some());
    }

    #[test]
    fn unset_raises_event_with_no_new_instance() {
        let bus = Arc::new(ChangeBus::new());
        let registry = GlobalRegistry::new(Arc::new(DescriptorTable::new()), bus.clone());
        registry.set_instance(Renderer { backend: "gl" }).unwrap();
        let rx = bus.subscribe(TypeKey::of::<Renderer>());

        assert!(registry.unset(TypeKey::of::<Renderer>()).is_some());
        let event = rx.try_recv().unwrap();
        assert!(event.old.is_some());
        assert!(event.new.is_none());
        assert!(registry.try_get(TypeKey::of::<Renderer>()).is_none());
    }

    #[test]
    fn mismatched_concrete_type_is_rejected() {
        let mut table = DescriptorTable::new();
        table
            .register(ServiceDescriptor::of::<Renderer>().build())
            .unwrap();
        let registry = GlobalRegistry::new(Arc::new(table), Arc::new(ChangeBus::new()));

        let err = registry
            .set(TypeKey::of::<Renderer>(), handle_of(String::from("nope")))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidServiceDefinition { .. }));
        assert!(registry.try_get(TypeKey::of::<Renderer>()).is_none());
    }
}
