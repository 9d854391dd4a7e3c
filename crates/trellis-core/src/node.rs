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

//! Client-node identity and the collaborator traits supplied by the
//! external hierarchy model.
//!
//! The engine never owns the client tree. It only asks relationship
//! questions about it through [`Hierarchy`] and delegates node creation
//! and lookup to [`NodeFactory`].

use crate::handle::ServiceHandle;
use crate::key::TypeKey;
use std::fmt;

/// Opaque identifier of a node in the external client hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identifier of a partition of the hierarchy, such as a scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PartitionId(pub u32);

/// Relationship queries over the external client hierarchy.
///
/// Only [`parent`](Hierarchy::parent) and
/// [`partition_of`](Hierarchy::partition_of) are required; the remaining
/// predicates default to walking the parent chain.
pub trait Hierarchy: Send + Sync {
    /// Parent of `node`, or `None` at a hierarchy root.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Partition `node` belongs to, if any.
    fn partition_of(&self, node: NodeId) -> Option<PartitionId>;

    /// Whether `ancestor` is reachable from `of` by walking up the tree.
    fn is_ancestor(&self, ancestor: NodeId, of: NodeId) -> bool {
        let mut current = self.parent(of);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Whether `descendant` sits below `of` in the tree.
    fn is_descendant(&self, descendant: NodeId, of: NodeId) -> bool {
        self.is_ancestor(of, descendant)
    }

    /// Whether both nodes belong to the same partition.
    ///
    /// Nodes outside any partition never share one.
    fn same_partition(&self, a: NodeId, b: NodeId) -> bool {
        match (self.partition_of(a), self.partition_of(b)) {
            (Some(pa), Some(pb)) => pa == pb,
            _ => false,
        }
    }

    /// Topmost ancestor of `node`.
    fn hierarchy_root(&self, node: NodeId) -> NodeId {
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }
}

/// Node-construction and lookup capabilities of the external model.
///
/// The initializer uses this to adopt pre-existing instances and to create
/// services that must live in the hierarchy.
pub trait NodeFactory: Send + Sync {
    /// Searches the hierarchy for an already-existing instance of the given
    /// concrete type. Returns the instance and, when known, the node it is
    /// attached to.
    fn find_existing(&self, concrete: &TypeKey) -> Option<(ServiceHandle, Option<NodeId>)>;

    /// Creates a fresh node hosting a new instance of the given concrete
    /// type. Returns `None` for types the node model cannot host.
    fn create_node_with(&self, concrete: &TypeKey) -> Option<(ServiceHandle, NodeId)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapHierarchy {
        parents: HashMap<NodeId, NodeId>,
        partitions: HashMap<NodeId, PartitionId>,
    }

    impl Hierarchy for MapHierarchy {
        fn parent(&self, node: NodeId) -> Option<NodeId> {
            self.parents.get(&node).copied()
        }

        fn partition_of(&self, node: NodeId) -> Option<PartitionId> {
            self.partitions.get(&node).copied()
        }
    }

    fn chain() -> MapHierarchy {
        // 1 -> 2 -> 3, partition 0; node 9 is a lone root without partition.
        let mut parents = HashMap::new();
        parents.insert(NodeId(2), NodeId(1));
        parents.insert(NodeId(3), NodeId(2));
        let mut partitions = HashMap::new();
        for n in 1..=3 {
            partitions.insert(NodeId(n), PartitionId(0));
        }
        MapHierarchy {
            parents,
            partitions,
        }
    }

    #[test]
    fn ancestor_walk() {
        let h = chain();
        assert!(h.is_ancestor(NodeId(1), NodeId(3)));
        assert!(h.is_descendant(NodeId(3), NodeId(1)));
        assert!(!h.is_ancestor(NodeId(3), NodeId(1)));
        assert!(!h.is_ancestor(NodeId(1), NodeId(1)));
    }

    #[test]
    fn root_of_chain() {
        let h = chain();
        assert_eq!(h.hierarchy_root(NodeId(3)), NodeId(1));
        assert_eq!(h.hierarchy_root(NodeId(9)), NodeId(9));
    }

    #[test]
    fn partitionless_nodes_never_share() {
        let h = chain();
        assert!(h.same_partition(NodeId(1), NodeId(3)));
        assert!(!h.same_partition(NodeId(1), NodeId(9)));
        assert!(!h.same_partition(NodeId(9), NodeId(9)));
    }
}
