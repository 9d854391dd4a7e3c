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

//! Visibility scopes for node-scoped service instances.

use crate::node::{Hierarchy, NodeId};
use serde::{Deserialize, Serialize};

/// The rule determining which requester nodes may see a scoped instance.
///
/// Pure data; evaluation delegates every relationship question to the
/// external [`Hierarchy`] collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityScope {
    /// Only the owner node itself.
    OwnerOnly,
    /// The owner node and everything below it.
    OwnerAndDescendants,
    /// The owner node and everything above it.
    OwnerAndAncestors,
    /// Every node sharing the owner's hierarchy root.
    HierarchyRootSubtree,
    /// Every node in the owner's partition.
    SamePartition,
    /// Every node in every partition. Requesters outside the hierarchy are
    /// still excluded.
    AllPartitions,
    /// No restrictions at all.
    Everywhere,
}

impl VisibilityScope {
    /// Evaluates whether an instance owned by `owner` with this scope is
    /// visible to `requester`.
    ///
    /// A `requester` of `None` models a client outside the hierarchy; only
    /// [`VisibilityScope::Everywhere`] admits those.
    #[must_use]
    pub fn admits(
        self,
        owner: NodeId,
        requester: Option<NodeId>,
        hierarchy: &dyn Hierarchy,
    ) -> bool {
        if matches!(self, Self::Everywhere) {
            return true;
        }
        let Some(requester) = requester else {
            return false;
        };
        match self {
            Self::OwnerOnly => requester == owner,
            Self::OwnerAndDescendants => {
                requester == owner || hierarchy.is_descendant(requester, owner)
            }
            Self::OwnerAndAncestors => {
                requester == owner || hierarchy.is_ancestor(requester, owner)
            }
            Self::HierarchyRootSubtree => {
                hierarchy.hierarchy_root(requester) == hierarchy.hierarchy_root(owner)
            }
            Self::SamePartition => hierarchy.same_partition(requester, owner),
            Self::AllPartitions | Self::Everywhere => true,
        }
    }
}
