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

//! Value providers: one level of typed indirection in front of a value.

use crate::handle::ServiceHandle;
use crate::key::TypeKey;
use crate::node::NodeId;

/// A service that yields values of another type on behalf of clients.
///
/// Providers are consulted only when the requested type has no direct
/// registration, and they are never followed transitively: the value a
/// provider returns is handed to the client as-is, even if it is itself
/// a provider.
pub trait ValueProvider: Send + Sync {
    /// The type of value this provider yields.
    fn provides(&self) -> TypeKey;

    /// Yields the value for the given requester, if currently available.
    fn provide_for(&self, requester: Option<NodeId>) -> Option<ServiceHandle>;
}
