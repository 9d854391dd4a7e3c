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

//! Error taxonomy for service resolution and materialization.

use crate::key::TypeKey;
use std::fmt;
use thiserror::Error;

/// Why a lookup failed to produce an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotFoundReason {
    /// No descriptor or instance is known for the type at all.
    NotRegistered,
    /// Instances or a descriptor exist, but none is reachable from the
    /// requesting scope.
    NotVisibleAtScope,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRegistered => f.write_str("not registered at all"),
            Self::NotVisibleAtScope => f.write_str("registered but not visible at this scope"),
        }
    }
}

/// Failures surfaced by the resolution and initialization engine.
///
/// Failures during a single service's materialization are isolated to that
/// service's resolution branch. Ambiguity is warning-level: resolution
/// still proceeds with a deterministic pick.
#[derive(Clone, Debug, Error)]
pub enum ServiceError {
    /// No instance could be produced for the requested type.
    #[error("no service found for {key}: {reason}")]
    ServiceNotFound {
        /// The requested defining type.
        key: TypeKey,
        /// Best-guess explanation for the miss.
        reason: NotFoundReason,
    },

    /// A type's transitive dependency resolution re-entered the type itself
    /// while it was still materializing.
    #[error("circular dependency detected: {}", format_chain(.chain))]
    CircularDependency {
        /// The creation chain, ending with the repeated type.
        chain: Vec<TypeKey>,
    },

    /// The descriptor names no concrete type and no creation strategy could
    /// supply one.
    #[error("cannot resolve a concrete type for {key}")]
    UnresolvableConcreteType {
        /// The requested defining type.
        key: TypeKey,
    },

    /// A required dependency of `requester` could not be resolved.
    #[error("{requester} requires {missing}, which is {reason}")]
    MissingDependency {
        /// The concrete type whose dependencies were being gathered.
        requester: TypeKey,
        /// The dependency type that could not be resolved.
        missing: TypeKey,
        /// Best-guess explanation for the miss.
        reason: NotFoundReason,
    },

    /// A creation strategy failed outright; the underlying failure is
    /// carried in the message.
    #[error("initialization of {key} failed: {reason}")]
    InitializerFailed {
        /// The concrete type being created.
        key: TypeKey,
        /// The rendered underlying failure.
        reason: String,
    },

    /// Every creation strategy declined to produce an instance.
    #[error("every creation strategy for {key} returned nothing")]
    InitializerReturnedNull {
        /// The concrete type being created.
        key: TypeKey,
    },

    /// More than one equally-visible candidate existed; resolution
    /// proceeded with the earliest registered.
    #[error(
        "ambiguous match for {key}: {candidates} equally visible instances, \
         picking the earliest registered"
    )]
    AmbiguousMatch {
        /// The requested defining type.
        key: TypeKey,
        /// How many candidates survived the tie-break ladder.
        candidates: usize,
    },

    /// A registration was rejected because the instance or descriptor does
    /// not satisfy its declared types.
    #[error("invalid service definition for {key}: {reason}")]
    InvalidServiceDefinition {
        /// The defining type of the rejected registration.
        key: TypeKey,
        /// What was wrong with it.
        reason: String,
    },
}

fn format_chain(chain: &[TypeKey]) -> String {
    chain
        .iter()
        .map(TypeKey::short_name)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Audio;
    struct Physics;

    #[test]
    fn cycle_message_names_the_whole_chain() {
        let err = ServiceError::CircularDependency {
            chain: vec![
                TypeKey::of::<Audio>(),
                TypeKey::of::<Physics>(),
                TypeKey::of::<Audio>(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "circular dependency detected: Audio -> Physics -> Audio"
        );
    }

    #[test]
    fn missing_dependency_names_both_sides() {
        let err = ServiceError::MissingDependency {
            requester: TypeKey::of::<Audio>(),
            missing: TypeKey::of::<Physics>(),
            reason: NotFoundReason::NotVisibleAtScope,
        };
        let message = err.to_string();
        assert!(message.contains("Audio"));
        assert!(message.contains("Physics"));
        assert!(message.contains("not visible"));
    }
}
