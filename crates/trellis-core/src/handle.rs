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

//! Type-erased shared service instances.

use std::any::Any;
use std::sync::Arc;

/// A type-erased, shared service instance.
///
/// Registries store every service behind this alias; typed access goes
/// through [`downcast_handle`].
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// Wraps a concrete service value into a [`ServiceHandle`].
pub fn handle_of<T: Send + Sync + 'static>(value: T) -> ServiceHandle {
    Arc::new(value)
}

/// Downcasts a handle to a concrete service type, cloning the shared pointer.
///
/// Returns `None` if the handle holds a different type.
#[must_use]
pub fn downcast_handle<T: Send + Sync + 'static>(handle: &ServiceHandle) -> Option<Arc<T>> {
    handle.clone().downcast::<T>().ok()
}

/// Whether two handles refer to the same underlying instance.
///
/// Compares data addresses only, so clones of the same `Arc` compare equal.
#[must_use]
pub fn same_instance(a: &ServiceHandle, b: &ServiceHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Config {
        verbose: bool,
    }

    #[test]
    fn downcast_round_trip() {
        let handle = handle_of(Config { verbose: true });
        let config = downcast_handle::<Config>(&handle).unwrap();
        assert!(config.verbose);
    }

    #[test]
    fn downcast_wrong_type_returns_none() {
        let handle = handle_of(Config { verbose: false });
        assert!(downcast_handle::<String>(&handle).is_none());
    }

    #[test]
    fn same_instance_tracks_identity() {
        let a = handle_of(Config { verbose: true });
        let b = a.clone();
        let c = handle_of(Config { verbose: true });
        assert!(same_instance(&a, &b));
        assert!(!same_instance(&a, &c));
    }
}
