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

//! The external resource loader collaborator.

use crate::descriptor::ResourceLocator;
use crate::handle::ServiceHandle;
use crate::node::{NodeFactory, NodeId};
use async_trait::async_trait;
use std::sync::Arc;

/// What the external loader hands back for a locator.
pub enum Artifact {
    /// Directly usable as a service instance.
    Ready(ServiceHandle),
    /// A template that must be instantiated through the node model before
    /// it is a usable service.
    Blueprint(Arc<dyn Blueprint>),
}

/// A loadable template producing a usable instance when instantiated into
/// the node model.
pub trait Blueprint: Send + Sync {
    /// Clones the template into the hierarchy, returning the instance and
    /// the node it was attached to, when known.
    fn instantiate(
        &self,
        nodes: &dyn NodeFactory,
    ) -> anyhow::Result<(ServiceHandle, Option<NodeId>)>;
}

/// Materializes artifacts from an external store.
///
/// The engine treats the store as entirely opaque: the locator goes in
/// verbatim, an [`Artifact`] comes out. There is no timeout; a stalled
/// loader blocks every dependent.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// Loads synchronously.
    fn load(&self, locator: &ResourceLocator) -> anyhow::Result<Artifact>;

    /// Loads asynchronously; the default defers to the synchronous path.
    async fn load_async(&self, locator: &ResourceLocator) -> anyhow::Result<Artifact> {
        self.load(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{downcast_handle, handle_of};

    struct Catalog {
        entries: usize,
    }

    struct StubLoader;

    impl ResourceLoader for StubLoader {
        fn load(&self, locator: &ResourceLocator) -> anyhow::Result<Artifact> {
            anyhow::ensure!(locator.0 == "db/catalog", "unknown locator {locator}");
            Ok(Artifact::Ready(handle_of(Catalog { entries: 3 })))
        }
    }

    #[test]
    fn async_default_defers_to_sync_load() {
        let loader = StubLoader;
        let artifact =
            pollster::block_on(loader.load_async(&ResourceLocator("db/catalog".into()))).unwrap();
        match artifact {
            Artifact::Ready(handle) => {
                assert_eq!(downcast_handle::<Catalog>(&handle).unwrap().entries, 3);
            }
            Artifact::Blueprint(_) => panic!("expected a ready artifact"),
        }
    }

    #[test]
    fn loader_errors_propagate() {
        let loader = StubLoader;
        assert!(loader.load(&ResourceLocator("missing".into())).is_err());
    }
}
