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

//! The tie-break ladder choosing between equally-visible scoped instances.
//!
//! Preference order: an owner in the requester's partition beats one
//! outside it; between owners in the requester's partition, the first one
//! encountered while walking the requester's ancestor chain wins; anything
//! still tied falls back to registration order and is flagged ambiguous.
//! Ambiguity is deliberately non-fatal: structurally equal duplicates are
//! common during transient states such as hierarchy teardown.

use crate::scoped::Candidate;
use trellis_core::{Hierarchy, NodeId, ServiceHandle};

/// Outcome of candidate selection.
pub(crate) struct Selection {
    pub(crate) handle: ServiceHandle,
    /// Whether the pick fell through to registration order.
    pub(crate) ambiguous: bool,
}

/// Chooses the best candidate for `requester`, consuming the visible set
/// in registration order.
pub(crate) fn select_candidate(
    candidates: Vec<Candidate>,
    requester: Option<NodeId>,
    hierarchy: &dyn Hierarchy,
) -> Option<Selection> {
    let mut iter = candidates.into_iter();
    let mut nearest = iter.next()?;
    let mut ambiguous = false;

    for candidate in iter {
        let candidate_in_partition = in_requester_partition(&candidate, requester, hierarchy);
        let nearest_in_partition = in_requester_partition(&nearest, requester, hierarchy);

        if candidate_in_partition != nearest_in_partition {
            if candidate_in_partition {
                nearest = candidate;
            }
            continue;
        }

        match ancestor_walk_winner(&nearest, &candidate, requester, hierarchy) {
            WalkOutcome::Challenger => nearest = candidate,
            WalkOutcome::Incumbent => {}
            WalkOutcome::Undecided => ambiguous = true,
        }
    }

    Some(Selection {
        handle: nearest.handle,
        ambiguous,
    })
}

fn in_requester_partition(
    candidate: &Candidate,
    requester: Option<NodeId>,
    hierarchy: &dyn Hierarchy,
) -> bool {
    requester
        .map(|r| hierarchy.same_partition(candidate.owner, r))
        .unwrap_or(false)
}

enum WalkOutcome {
    Incumbent,
    Challenger,
    Undecided,
}

/// Walks up from the requester; the first owner encountered wins.
fn ancestor_walk_winner(
    incumbent: &Candidate,
    challenger: &Candidate,
    requester: Option<NodeId>,
    hierarchy: &dyn Hierarchy,
) -> WalkOutcome {
    let Some(requester) = requester else {
        return WalkOutcome::Undecided;
    };
    let mut current = Some(requester);
    while let Some(node) = current {
        // The incumbent is checked first so identical owners keep the
        // earlier registration.
        if node == incumbent.owner {
            return WalkOutcome::Incumbent;
        }
        if node == challenger.owner {
            return WalkOutcome::Challenger;
        }
        current = hierarchy.parent(node);
    }
    WalkOutcome::Undecided
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use trellis_core::{handle_of, same_instance, PartitionId};

    struct Palette;

    struct TestHierarchy {
        parents: HashMap<NodeId, NodeId>,
        partitions: HashMap<NodeId, PartitionId>,
    }

    impl Hierarchy for TestHierarchy {
        fn parent(&self, node: NodeId) -> Option<NodeId> {
            self.parents.get(&node).copied()
        }

        fn partition_of(&self, node: NodeId) -> Option<PartitionId> {
            self.partitions.get(&node).copied()
        }
    }

    // partition 0:  1 -> 2 -> 3
    // partition 1:  10
    fn hierarchy() -> TestHierarchy {
        let mut parents = HashMap::new();
        parents.insert(NodeId(2), NodeId(1));
        parents.insert(NodeId(3), NodeId(2));
        let mut partitions = HashMap::new();
        for n in [1, 2, 3] {
            partitions.insert(NodeId(n), PartitionId(0));
        }
        partitions.insert(NodeId(10), PartitionId(1));
        TestHierarchy {
            parents,
            partitions,
        }
    }

    fn candidate(owner: u64) -> Candidate {
        Candidate {
            handle: handle_of(Palette),
            owner: NodeId(owner),
        }
    }

    #[test]
    fn single_candidate_is_unambiguous() {
        let selection =
            select_candidate(vec![candidate(1)], Some(NodeId(3)), &hierarchy()).unwrap();
        assert!(!selection.ambiguous);
    }

    #[test]
    fn same_partition_beats_foreign_partition() {
        let h = hierarchy();
        let foreign = candidate(10);
        let local = candidate(1);
        let local_handle = local.handle.clone();

        let selection =
            select_candidate(vec![foreign, local], Some(NodeId(3)), &h).unwrap();
        assert!(same_instance(&selection.handle, &local_handle));
        assert!(!selection.ambiguous);
    }

    #[test]
    fn nearest_ancestor_wins_within_partition() {
        let h = hierarchy();
        let far = candidate(1);
        let near = candidate(2);
        let near_handle = near.handle.clone();

        // Registration order deliberately puts the far owner first.
        let selection = select_candidate(vec![far, near], Some(NodeId(3)), &h).unwrap();
        assert!(same_instance(&selection.handle, &near_handle));
        assert!(!selection.ambiguous);
    }

    #[test]
    fn unrelated_owners_fall_back_to_registration_order() {
        let h = hierarchy();
        let first = candidate(10);
        let second = candidate(10);
        let first_handle = first.handle.clone();

        let selection = select_candidate(vec![first, second], Some(NodeId(3)), &h).unwrap();
        assert!(same_instance(&selection.handle, &first_handle));
        assert!(selection.ambiguous);
    }

    #[test]
    fn detached_requester_cannot_walk() {
        let h = hierarchy();
        let first = candidate(1);
        let second = candidate(2);
        let first_handle = first.handle.clone();

        let selection = select_candidate(vec![first, second], None, &h).unwrap();
        assert!(same_instance(&selection.handle, &first_handle));
        assert!(selection.ambiguous);
    }

    #[test]
    fn identical_owner_keeps_earlier_registration() {
        let h = hierarchy();
        let first = candidate(2);
        let second = candidate(2);
        let first_handle = first.handle.clone();

        let selection = select_candidate(vec![first, second], Some(NodeId(3)), &h).unwrap();
        assert!(same_instance(&selection.handle, &first_handle));
    }
}
