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

//! Integration tests for scoped resolution, the tie-break ladder, and
//! dependency injection into clients.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use trellis_core::{
    downcast_handle, handle_of, DependencyContract, Hierarchy, NodeId, NotFoundReason,
    PartitionId, ServiceDescriptor, ServiceError, ServiceHandle, TypeKey, ValueProvider,
    VisibilityScope,
};
use trellis_inject::ServiceContext;

// --- Test hierarchy ---
//
// partition 0:   1 (Root) -> 2 (Panel) -> 3 (Button)
// partition 1:   10 -> 11
// no partition:  9 (a detached root)
struct TestHierarchy {
    parents: HashMap<NodeId, NodeId>,
    partitions: HashMap<NodeId, PartitionId>,
}

impl TestHierarchy {
    fn new() -> Self {
        let mut parents = HashMap::new();
        parents.insert(NodeId(2), NodeId(1));
        parents.insert(NodeId(3), NodeId(2));
        parents.insert(NodeId(11), NodeId(10));
        let mut partitions = HashMap::new();
        for n in [1, 2, 3] {
            partitions.insert(NodeId(n), PartitionId(0));
        }
        for n in [10, 11] {
            partitions.insert(NodeId(n), PartitionId(1));
        }
        Self {
            parents,
            partitions,
        }
    }
}

impl Hierarchy for TestHierarchy {
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.parents.get(&node).copied()
    }

    fn partition_of(&self, node: NodeId) -> Option<PartitionId> {
        self.partitions.get(&node).copied()
    }
}

// --- Test services ---

struct Logger {
    sink: &'static str,
}

struct Config {
    root_path: &'static str,
}

#[derive(Default)]
struct Widget {
    injected: Mutex<Option<(Arc<Logger>, Arc<Config>)>>,
}

fn widget_contract() -> DependencyContract {
    DependencyContract::new(
        vec![TypeKey::of::<Logger>(), TypeKey::of::<Config>()],
        |target, args| {
            let widget =
                downcast_handle::<Widget>(target).ok_or_else(|| anyhow::anyhow!("not a widget"))?;
            let logger = downcast_handle::<Logger>(&args[0])
                .ok_or_else(|| anyhow::anyhow!("expected a logger"))?;
            let config = downcast_handle::<Config>(&args[1])
                .ok_or_else(|| anyhow::anyhow!("expected a config"))?;
            *widget.injected.lock().unwrap() = Some((logger, config));
            Ok(())
        },
    )
}

#[tokio::test]
async fn widgets_receive_shared_logger_and_scoped_config() {
    let ctx = ServiceContext::builder()
        .register(
            ServiceDescriptor::of::<Logger>()
                .with_default(|| Logger { sink: "stdout" })
                .build(),
        )
        .hierarchy(Arc::new(TestHierarchy::new()))
        .build();

    ctx.register_scoped_instance(
        Config { root_path: "/" },
        VisibilityScope::OwnerAndDescendants,
        NodeId(1),
    )
    .unwrap();

    // A client at Root/Panel, queued before startup.
    let widget = Arc::new(Widget::default());
    ctx.register_client(
        TypeKey::of::<Widget>(),
        widget.clone() as ServiceHandle,
        widget_contract(),
        Some(NodeId(2)),
    )
    .await
    .unwrap();
    assert!(widget.injected.lock().unwrap().is_none());

    let report = ctx.startup().await;
    assert_eq!(report.failed, 0);

    let (logger, config) = widget.injected.lock().unwrap().take().unwrap();
    assert_eq!(config.root_path, "/");
    assert_eq!(logger.sink, "stdout");

    // The logger is the same instance process-wide.
    let global_logger = ctx.try_get_global_as::<Logger>().unwrap();
    assert!(Arc::ptr_eq(&logger, &global_logger));

    // A widget outside Root's subtree cannot see Config.
    let outsider = Arc::new(Widget::default());
    let err = ctx
        .register_client(
            TypeKey::of::<Widget>(),
            outsider.clone() as ServiceHandle,
            widget_contract(),
            Some(NodeId(9)),
        )
        .await
        .unwrap_err();
    match err {
        ServiceError::MissingDependency {
            missing, reason, ..
        } => {
            assert_eq!(missing, TypeKey::of::<Config>());
            assert_eq!(reason, NotFoundReason::NotVisibleAtScope);
        }
        other => panic!("expected MissingDependency, got {other}"),
    }
    assert!(outsider.injected.lock().unwrap().is_none());
}

#[tokio::test]
async fn global_resolution_is_referentially_stable() {
    let ctx = ServiceContext::builder()
        .register(
            ServiceDescriptor::of::<Logger>()
                .lazy()
                .with_default(|| Logger { sink: "memory" })
                .build(),
        )
        .build();

    let first = ctx.resolve(None, TypeKey::of::<Logger>()).await.unwrap();
    let second = ctx.resolve(None, TypeKey::of::<Logger>()).await.unwrap();
    assert!(trellis_core::same_instance(&first, &second));
}

#[tokio::test]
async fn scoped_instance_shadows_global_slot() {
    let ctx = ServiceContext::builder()
        .hierarchy(Arc::new(TestHierarchy::new()))
        .build();

    ctx.set_global_instance(Config { root_path: "/global" })
        .unwrap();
    ctx.register_scoped_instance(
        Config {
            root_path: "/scoped",
        },
        VisibilityScope::OwnerAndDescendants,
        NodeId(1),
    )
    .unwrap();

    let from_panel = ctx.resolve(Some(NodeId(2)), TypeKey::of::<Config>()).await.unwrap();
    assert_eq!(
        downcast_handle::<Config>(&from_panel).unwrap().root_path,
        "/scoped"
    );

    let from_outside = ctx.resolve(Some(NodeId(9)), TypeKey::of::<Config>()).await.unwrap();
    assert_eq!(
        downcast_handle::<Config>(&from_outside).unwrap().root_path,
        "/global"
    );
}

#[tokio::test]
async fn nearest_ancestor_wins_between_visible_instances() {
    let ctx = ServiceContext::builder()
        .hierarchy(Arc::new(TestHierarchy::new()))
        .build();

    // Registration order puts the far owner first.
    ctx.register_scoped_instance(
        Config { root_path: "/root" },
        VisibilityScope::OwnerAndDescendants,
        NodeId(1),
    )
    .unwrap();
    ctx.register_scoped_instance(
        Config { root_path: "/panel" },
        VisibilityScope::OwnerAndDescendants,
        NodeId(2),
    )
    .unwrap();

    let resolved = ctx.resolve(Some(NodeId(3)), TypeKey::of::<Config>()).await.unwrap();
    assert_eq!(
        downcast_handle::<Config>(&resolved).unwrap().root_path,
        "/panel"
    );
}

#[tokio::test]
async fn ambiguous_matches_resolve_deterministically() {
    let ctx = ServiceContext::builder()
        .hierarchy(Arc::new(TestHierarchy::new()))
        .build();

    // Two equally-visible instances owned by unrelated nodes.
    ctx.register_scoped_instance(
        Config { root_path: "/a" },
        VisibilityScope::Everywhere,
        NodeId(10),
    )
    .unwrap();
    ctx.register_scoped_instance(
        Config { root_path: "/b" },
        VisibilityScope::Everywhere,
        NodeId(11),
    )
    .unwrap();

    for _ in 0..3 {
        let resolved = ctx.resolve(Some(NodeId(3)), TypeKey::of::<Config>()).await.unwrap();
        assert_eq!(downcast_handle::<Config>(&resolved).unwrap().root_path, "/a");
    }
}

#[tokio::test]
async fn detached_requester_sees_only_everywhere_instances() {
    let ctx = ServiceContext::builder()
        .hierarchy(Arc::new(TestHierarchy::new()))
        .build();

    ctx.register_scoped_instance(
        Config { root_path: "/all" },
        VisibilityScope::AllPartitions,
        NodeId(1),
    )
    .unwrap();
    assert!(ctx.resolve(None, TypeKey::of::<Config>()).await.is_none());

    ctx.register_scoped_instance(
        Config {
            root_path: "/everywhere",
        },
        VisibilityScope::Everywhere,
        NodeId(1),
    )
    .unwrap();
    let resolved = ctx.resolve(None, TypeKey::of::<Config>()).await.unwrap();
    assert_eq!(
        downcast_handle::<Config>(&resolved).unwrap().root_path,
        "/everywhere"
    );
}

struct PathProvider;

impl ValueProvider for PathProvider {
    fn provides(&self) -> TypeKey {
        TypeKey::of::<Config>()
    }

    fn provide_for(&self, _requester: Option<NodeId>) -> Option<ServiceHandle> {
        Some(handle_of(Config {
            root_path: "/provided",
        }))
    }
}

#[tokio::test]
async fn provider_unwraps_when_type_is_not_a_service() {
    let ctx = ServiceContext::builder().build();
    ctx.register_provider(Arc::new(PathProvider), None);

    let resolved = ctx.resolve(None, TypeKey::of::<Config>()).await.unwrap();
    assert_eq!(
        downcast_handle::<Config>(&resolved).unwrap().root_path,
        "/provided"
    );
}

#[tokio::test]
async fn direct_registrations_beat_providers() {
    let ctx = ServiceContext::builder().build();
    ctx.register_provider(Arc::new(PathProvider), None);
    ctx.set_global_instance(Config {
        root_path: "/direct",
    })
    .unwrap();

    let resolved = ctx.resolve(None, TypeKey::of::<Config>()).await.unwrap();
    assert_eq!(
        downcast_handle::<Config>(&resolved).unwrap().root_path,
        "/direct"
    );
}

#[test]
fn membership_and_existence_queries() {
    let ctx = ServiceContext::builder()
        .hierarchy(Arc::new(TestHierarchy::new()))
        .build();

    let config = handle_of(Config { root_path: "/" });
    ctx.register_scoped(
        TypeKey::of::<Config>(),
        config.clone(),
        VisibilityScope::OwnerOnly,
        NodeId(1),
    )
    .unwrap();

    assert!(ctx.is_service(&config));
    assert!(ctx.is_service_for(Some(NodeId(1)), TypeKey::of::<Config>(), &config));
    assert!(!ctx.is_service_for(Some(NodeId(2)), TypeKey::of::<Config>(), &config));

    assert!(ctx.exists(TypeKey::of::<Config>()));
    assert!(ctx.exists_for(Some(NodeId(1)), TypeKey::of::<Config>()));
    assert!(!ctx.exists_for(Some(NodeId(2)), TypeKey::of::<Config>()));
    assert!(!ctx.exists(TypeKey::of::<Logger>()));
    assert!(!ctx.exists_for_all_clients(TypeKey::of::<Config>()));

    let removed = ctx.unregister_owner(NodeId(1));
    assert_eq!(removed.len(), 1);
    assert!(!ctx.is_service(&config));
}

#[test]
fn blocking_resolution_works_without_a_runtime() {
    let ctx = ServiceContext::builder()
        .register(
            ServiceDescriptor::of::<Logger>()
                .lazy()
                .with_default(|| Logger { sink: "file" })
                .build(),
        )
        .build();

    let resolved = ctx
        .resolve_blocking(None, TypeKey::of::<Logger>())
        .expect("blocking resolution should materialize the lazy service");
    assert_eq!(downcast_handle::<Logger>(&resolved).unwrap().sink, "file");
}
