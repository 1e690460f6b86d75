//! End-to-end fleet behaviour over a fixture benchmarks directory

mod common;

use common::{container, image, principal, write_unit, StubGateway};
use fleet_core::lifecycle::MemorySink;
use fleet_core::{
    CatalogConfig, FleetCatalog, LifecycleConfig, LifecycleController, PortBinding, UnitStatus,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_ok;

fn catalog(root: &TempDir, gateway: Arc<StubGateway>) -> Arc<FleetCatalog> {
    Arc::new(FleetCatalog::new(
        CatalogConfig {
            root: root.path().to_path_buf(),
            unit_prefix: "XBEN-".to_string(),
        },
        gateway,
    ))
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_daemon_poll_each() {
    let root = tempfile::tempdir().unwrap();
    for i in 1..=100 {
        write_unit(root.path(), &format!("XBEN-{:03}-24", i));
    }

    let containers = (1..=100)
        .map(|i| container(&format!("{:064x}", i), &format!("xben-{:03}-24-web-1", i), "running"))
        .collect();
    let gateway = Arc::new(StubGateway {
        containers,
        ..Default::default()
    });
    let catalog = catalog(&root, gateway.clone());

    let refreshes = 4;
    let mut handles = Vec::new();
    for _ in 0..refreshes {
        let catalog = catalog.clone();
        handles.push(tokio::spawn(async move {
            catalog.list_units(&principal()).await
        }));
    }

    for handle in handles {
        let units = assert_ok!(handle.await.unwrap());
        assert_eq!(units.len(), 100);
        assert!(units.iter().all(|u| u.status == UnitStatus::Running));
        assert!(units.iter().all(|u| u.containers.len() == 1));
    }

    assert_eq!(gateway.container_list_calls(), refreshes);
    assert_eq!(gateway.image_list_calls(), refreshes);
}

#[tokio::test]
async fn test_unit_count_tracks_directories() {
    let root = tempfile::tempdir().unwrap();
    let catalog = catalog(&root, Arc::new(StubGateway::default()));

    for name in ["XBEN-001-24", "XBEN-002-24", "XBEN-003-24"] {
        write_unit(root.path(), name);
    }
    // Neither a non-prefixed directory nor a stray file counts
    std::fs::create_dir(root.path().join("scratch")).unwrap();
    std::fs::write(root.path().join("XBEN-notes.txt"), "").unwrap();
    assert_eq!(catalog.list_units(&principal()).await.unwrap().len(), 3);

    std::fs::remove_dir_all(root.path().join("XBEN-002-24")).unwrap();
    let units = catalog.list_units(&principal()).await.unwrap();
    let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["XBEN-001-24", "XBEN-003-24"]);

    write_unit(root.path(), "XBEN-010-24");
    assert_eq!(catalog.list_units(&principal()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_units_sorted_by_embedded_number() {
    let root = tempfile::tempdir().unwrap();
    for name in ["XBEN-100-24", "XBEN-custom", "XBEN-002-24", "XBEN-010-24"] {
        write_unit(root.path(), name);
    }

    let units = catalog(&root, Arc::new(StubGateway::default()))
        .list_units(&principal())
        .await
        .unwrap();

    let order: Vec<(u32, &str)> = units.iter().map(|u| (u.id, u.name.as_str())).collect();
    assert_eq!(
        order,
        vec![
            (0, "XBEN-custom"),
            (2, "XBEN-002-24"),
            (10, "XBEN-010-24"),
            (100, "XBEN-100-24"),
        ]
    );
}

#[tokio::test]
async fn test_bare_unit_is_stopped_without_compose() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("XBEN-050-24")).unwrap();

    let unit = catalog(&root, Arc::new(StubGateway::default()))
        .get_unit(&principal(), "XBEN-050-24")
        .await
        .unwrap();

    assert!(!unit.has_docker_compose);
    assert!(!unit.has_makefile);
    assert_eq!(unit.status, UnitStatus::Stopped);
    assert!(unit.containers.is_empty());
    assert_eq!(unit.metadata, Default::default());

    let json = serde_json::to_value(&unit).unwrap();
    assert_eq!(json["hasDockerCompose"], false);
    assert_eq!(json["status"], "stopped");
    assert_eq!(json["containers"], serde_json::json!([]));
}

#[tokio::test]
async fn test_status_and_ports_from_shared_poll() {
    let root = tempfile::tempdir().unwrap();
    write_unit(root.path(), "XBEN-001-24");
    write_unit(root.path(), "XBEN-002-24");

    let mut web = container("a1", "xben-001-24-web-1", "running");
    web.ports = vec![PortBinding {
        container_port: 80,
        host_port: Some(32768),
    }];
    let mut web2 = container("a2", "xben-001-24-web-2", "running");
    web2.ports = vec![PortBinding {
        container_port: 80,
        host_port: Some(32769),
    }];
    let running = container("b1", "xben-002-24-app-1", "running");
    let exited = container("b2", "xben-002-24-db-1", "exited");

    let gateway = Arc::new(StubGateway {
        containers: vec![web, running, web2, exited],
        images: vec![image("sha256:1", "xben-001-24-web:latest")],
        ..Default::default()
    });
    let units = catalog(&root, gateway)
        .list_units(&principal())
        .await
        .unwrap();

    assert_eq!(units[0].status, UnitStatus::Running);
    assert_eq!(units[0].ports["80"], vec![32768, 32769]);
    assert_eq!(units[0].images, vec!["xben-001-24-web:latest"]);
    assert!(units[0].is_built());
    assert_eq!(units[0].metadata.tags, vec!["xss"]);

    assert_eq!(units[1].status, UnitStatus::Partial);
    assert!(!units[1].is_built());
}

#[tokio::test]
async fn test_daemon_outage_degrades_to_unknown() {
    let root = tempfile::tempdir().unwrap();
    write_unit(root.path(), "XBEN-001-24");

    let gateway = Arc::new(StubGateway {
        unavailable: true,
        ..Default::default()
    });
    let units = catalog(&root, gateway)
        .list_units(&principal())
        .await
        .unwrap();

    assert_eq!(units.len(), 1);
    assert_eq!(units[0].status, UnitStatus::Unknown);
    assert!(units[0].has_docker_compose);
}

#[tokio::test]
async fn test_remove_images_only_touches_matching_unit() {
    let root = tempfile::tempdir().unwrap();
    write_unit(root.path(), "XBEN-010");

    let gateway = Arc::new(StubGateway {
        images: vec![
            image("sha256:1", "xben-010-app:latest"),
            image("sha256:2", "other:latest"),
        ],
        ..Default::default()
    });
    let controller = LifecycleController::new(catalog(&root, gateway.clone()), LifecycleConfig::default());

    let outcome = controller
        .remove_images(&principal(), "XBEN-010", Arc::new(MemorySink::new()))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.deleted, Some(vec!["xben-010-app:latest".to_string()]));
    assert_eq!(gateway.removed(), vec!["xben-010-app:latest"]);
}
