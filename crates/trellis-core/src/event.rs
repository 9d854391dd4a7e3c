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

//! Change notifications for service instance replacement.

use crate::handle::ServiceHandle;
use crate::key::TypeKey;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Raised when the instance registered for a type changes.
#[derive(Clone)]
pub struct InstanceChanged {
    /// The defining type whose registration changed.
    pub key: TypeKey,
    /// The previous instance, if any.
    pub old: Option<ServiceHandle>,
    /// The new instance; `None` when the type was unregistered.
    pub new: Option<ServiceHandle>,
}

impl fmt::Debug for InstanceChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceChanged")
            .field("key", &self.key)
            .field("had_old", &self.old.is_some())
            .field("has_new", &self.new.is_some())
            .finish()
    }
}

/// Fan-out bus for [`InstanceChanged`] events, keyed by defining type.
///
/// Subscribers receive events over unbounded channels; disconnected
/// subscribers are pruned on the next publish for their type.
#[derive(Default)]
pub struct ChangeBus {
    subscribers: Mutex<HashMap<TypeId, Vec<flume::Sender<InstanceChanged>>>>,
}

impl ChangeBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to changes of the given type.
    pub fn subscribe(&self, key: TypeKey) -> flume::Receiver<InstanceChanged> {
        let (tx, rx) = flume::unbounded();
        self.subscribers
            .lock()
            .expect("change bus lock poisoned")
            .entry(key.id())
            .or_default()
            .push(tx);
        rx
    }

    /// Publishes a change to every live subscriber of its type.
    pub fn publish(&self, event: InstanceChanged) {
        let mut subscribers = self.subscribers.lock().expect("change bus lock poisoned");
        let Some(list) = subscribers.get_mut(&event.key.id()) else {
            return;
        };
        list.retain(|tx| tx.send(event.clone()).is_ok());
        if list.is_empty() {
            subscribers.remove(&event.key.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::handle_of;

    struct Input;

    fn changed(new: Option<ServiceHandle>) -> InstanceChanged {
        InstanceChanged {
            key: TypeKey::of::<Input>(),
            old: None,
            new,
        }
    }

    #[test]
    fn subscriber_receives_published_event() {
        let bus = ChangeBus::new();
        let rx = bus.subscribe(TypeKey::of::<Input>());
        bus.publish(changed(Some(handle_of(Input))));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.key, TypeKey::of::<Input>());
        assert!(event.new.is_some());
    }

    #[test]
    fn events_are_typed() {
        struct Other;
        let bus = ChangeBus::new();
        let rx = bus.subscribe(TypeKey::of::<Other>());
        bus.publish(changed(None));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = ChangeBus::new();
        let rx = bus.subscribe(TypeKey::of::<Input>());
        drop(rx);
        bus.publish(changed(None));
        assert!(bus
            .subscribers
            .lock()
            .unwrap()
            .get(&TypeId::of::<Input>())
            .is_none());
    }
}
