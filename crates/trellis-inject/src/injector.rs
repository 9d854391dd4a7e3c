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

//! Post-creation injection of typed dependencies into freshly materialized
//! services and non-service clients.

use crate::context::ServiceContext;
use trellis_core::{DependencyContract, NodeId, ServiceError, ServiceHandle, TypeKey};

impl ServiceContext {
    /// Resolves every dependency the contract declares (allowing
    /// dependencies-of-dependencies) and invokes its single initialization
    /// entry point exactly once with the resolved arguments.
    ///
    /// A dependency that cannot be resolved fails the injection with a
    /// diagnostic naming both the target and the missing type; other
    /// already-materialized services are unaffected.
    pub(crate) async fn run_contract(
        &self,
        target_key: TypeKey,
        target: &ServiceHandle,
        contract: &DependencyContract,
        requester: Option<NodeId>,
        path: &[TypeKey],
    ) -> Result<(), ServiceError> {
        let args = match self
            .gather_dependencies(target_key, contract.required(), requester, path)
            .await
        {
            Ok(args) => args,
            Err(err) => {
                log::error!("dependency injection into {target_key} failed: {err}");
                return Err(err);
            }
        };
        contract.invoke(target, args).map_err(|err| {
            let err = ServiceError::InitializerFailed {
                key: target_key,
                reason: format!("dependency contract entry point failed: {err:#}"),
            };
            log::error!("{err}");
            err
        })
    }
}
