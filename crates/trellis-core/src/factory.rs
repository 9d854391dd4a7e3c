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

//! Custom factory objects that know how to build a concrete service.

use crate::handle::ServiceHandle;
use crate::key::TypeKey;
use async_trait::async_trait;

/// An associated object that builds a concrete service type, possibly
/// requiring recursively-resolved dependencies of its own.
///
/// Factories are the first creation strategy the initializer tries.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    /// Dependency types resolved before [`build`](Self::build) is invoked.
    fn dependencies(&self) -> Vec<TypeKey> {
        Vec::new()
    }

    /// Builds the service from its resolved dependencies.
    ///
    /// Returning `Ok(None)` means the factory declined; the initializer
    /// falls through to the next creation strategy.
    async fn build(&self, deps: Vec<ServiceHandle>) -> anyhow::Result<Option<ServiceHandle>>;
}

type FactoryFn =
    Box<dyn Fn(Vec<ServiceHandle>) -> anyhow::Result<Option<ServiceHandle>> + Send + Sync>;

/// Adapter turning a plain closure into a [`ServiceFactory`].
pub struct FnFactory {
    deps: Vec<TypeKey>,
    make: FactoryFn,
}

impl FnFactory {
    /// Wraps a closure receiving the resolved dependencies listed in `deps`.
    pub fn new<F>(deps: Vec<TypeKey>, make: F) -> Self
    where
        F: Fn(Vec<ServiceHandle>) -> anyhow::Result<Option<ServiceHandle>> + Send + Sync + 'static,
    {
        Self {
            deps,
            make: Box::new(make),
        }
    }
}

#[async_trait]
impl ServiceFactory for FnFactory {
    fn dependencies(&self) -> Vec<TypeKey> {
        self.deps.clone()
    }

    async fn build(&self, deps: Vec<ServiceHandle>) -> anyhow::Result<Option<ServiceHandle>> {
        (self.make)(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{downcast_handle, handle_of};

    struct Meter {
        unit: &'static str,
    }

    #[test]
    fn fn_factory_builds_through_closure() {
        let factory = FnFactory::new(Vec::new(), |_| Ok(Some(handle_of(Meter { unit: "ms" }))));
        let built = pollster::block_on(factory.build(Vec::new())).unwrap().unwrap();
        assert_eq!(downcast_handle::<Meter>(&built).unwrap().unit, "ms");
    }

    #[test]
    fn fn_factory_may_decline() {
        let factory = FnFactory::new(Vec::new(), |_| Ok(None));
        let built = pollster::block_on(factory.build(Vec::new())).unwrap();
        assert!(built.is_none());
    }
}
