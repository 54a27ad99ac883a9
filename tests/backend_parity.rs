//! The same operations must leave an identical object graph in every
//! backend, and a reload must reproduce the graph the operations built.

use assert_matches::assert_matches;
use tokio_test::{assert_err, assert_ok};
use storage_controller_db::db::table::drbd_vlm_dfns::VLM_MINOR_NR;
use storage_controller_db::db::{DbDrivers, DbValue};
use storage_controller_db::domain::{MinorNumber, NodeName, ResourceName, SuffixedResourceName, VolumeNumber};
use storage_controller_db::numberpool::NumberPoolConfig;
use storage_controller_db::{
    AccessContext, Controller, ControllerConfig, DbMetrics, DeviceLayerKind, DeviceProviderKind, EngineConfig,
    EngineFactory, Error, NodeType, NumberPoolsConfig, ResourceKey, SharedEngine,
};

const GIB_IN_KIB: u64 = 1 << 20;

fn engines() -> Vec<EngineConfig> {
    vec![
        EngineConfig::Sql { path: None },
        EngineConfig::MemoryKv {
            prefix: "/STORAGE/".to_string(),
        },
        EngineConfig::MemoryCrd,
    ]
}

fn admin() -> AccessContext {
    AccessContext::new("admin", "ADMIN")
}

async fn open(config: &EngineConfig) -> (Controller, SharedEngine) {
    open_with_pools(config, NumberPoolsConfig::default()).await
}

async fn open_with_pools(config: &EngineConfig, pools: NumberPoolsConfig) -> (Controller, SharedEngine) {
    let engine = EngineFactory::create(config).await.unwrap();
    let controller = Controller::with_engine(
        ControllerConfig {
            database: config.clone(),
            pools,
            ..Default::default()
        },
        engine.clone(),
        DbMetrics::unregistered().unwrap(),
    )
    .await
    .unwrap();
    (controller, engine)
}

/// Two nodes with a thin pool each and a replicated resource on both
async fn deploy(controller: &Controller) {
    let ctx = admin();
    for node in ["alpha", "beta"] {
        controller.create_node(&ctx, node, NodeType::Satellite).await.unwrap();
        controller
            .create_stor_pool(&ctx, node, "thin", DeviceProviderKind::LvmThin)
            .await
            .unwrap();
    }
    controller
        .create_rsc_dfn(&ctx, "rscA", &[DeviceLayerKind::Drbd, DeviceLayerKind::Storage])
        .await
        .unwrap();
    controller.create_vlm_dfn(&ctx, "rscA", 0, GIB_IN_KIB, None).await.unwrap();
    controller.create_resource(&ctx, "alpha", "rscA", "thin").await.unwrap();
    controller.create_resource(&ctx, "beta", "rscA", "thin").await.unwrap();
}

async fn minor_of(controller: &Controller, rsc: &str, vlm_nr: i64) -> Option<MinorNumber> {
    let name = SuffixedResourceName::new(ResourceName::new(rsc).unwrap(), None, "");
    let cache = controller.read().await;
    cache
        .drbd_vlm_dfns
        .get(&(name, VolumeNumber::new(vlm_nr).unwrap()))
        .and_then(|d| d.minor)
}

fn alpha_rsc_a() -> ResourceKey {
    ResourceKey::new(
        NodeName::new("alpha").unwrap(),
        ResourceName::new("rscA").unwrap(),
        None,
    )
}

#[tokio::test]
async fn test_layer_tree_survives_reload() {
    for config in engines() {
        let (controller, _) = open(&config).await;
        deploy(&controller).await;
        let minor = minor_of(&controller, "rscA", 0).await;
        assert!(minor.is_some());

        controller.reload().await.unwrap();
        let cache = controller.read().await;
        let tree = cache.layer_tree(&alpha_rsc_a());
        assert_eq!(tree.len(), 2, "{:?}", config);
        let (drbd, storage) = (tree[0], tree[1]);
        assert_eq!(drbd.kind(), DeviceLayerKind::Drbd);
        assert_eq!(drbd.parent, None);
        assert_eq!(drbd.children.iter().copied().collect::<Vec<_>>(), vec![storage.id]);
        assert_eq!(storage.kind(), DeviceLayerKind::Storage);
        assert_eq!(storage.parent, Some(drbd.id));
        drop(cache);
        assert_eq!(minor_of(&controller, "rscA", 0).await, minor);
    }
}

#[tokio::test]
async fn test_duplicate_volume_definition_rejected() {
    for config in engines() {
        let (controller, _) = open(&config).await;
        deploy(&controller).await;
        let before = controller.snapshot().await;

        let err = assert_err!(controller.create_vlm_dfn(&admin(), "rscA", 0, GIB_IN_KIB, None).await);
        assert_matches!(err, Error::AlreadyExists { .. });
        assert_eq!(controller.snapshot().await, before);

        controller.reload().await.unwrap();
        let after = controller.snapshot().await;
        assert_eq!(after.vlm_dfns.len(), 1, "{:?}", config);
        assert_eq!(after.minors, before.minors);
    }
}

#[tokio::test]
async fn test_minor_reusable_after_delete() {
    for config in engines() {
        let (controller, _) = open(&config).await;
        deploy(&controller).await;
        let ctx = admin();
        let minor = minor_of(&controller, "rscA", 0).await.unwrap();

        controller.delete_vlm_dfn(&ctx, "rscA", 0).await.unwrap();
        controller.reload().await.unwrap();
        assert!(controller.snapshot().await.minors.is_empty(), "{:?}", config);
        assert!(controller.read().await.volumes_of(&alpha_rsc_a()).is_empty());

        controller
            .create_rsc_dfn(&ctx, "rscB", &[DeviceLayerKind::Drbd, DeviceLayerKind::Storage])
            .await
            .unwrap();
        assert_ok!(
            controller
                .create_vlm_dfn(&ctx, "rscB", 0, GIB_IN_KIB, Some(i64::from(minor.value())))
                .await
        );
        assert_eq!(minor_of(&controller, "rscB", 0).await, Some(minor));
    }
}

#[tokio::test]
async fn test_update_then_delete_in_one_commit() {
    for config in engines() {
        let (controller, engine) = open(&config).await;
        deploy(&controller).await;
        let drivers = DbDrivers::new().unwrap();

        let mut data = {
            let cache = controller.read().await;
            let data = cache.drbd_vlm_dfns.values().next().cloned().unwrap();
            data
        };
        let update = drivers
            .drbd_vlm_dfns
            .column_driver(&VLM_MINOR_NR)
            .unwrap()
            .update(&mut data, DbValue::Int(1500))
            .unwrap();
        let delete = drivers.drbd_vlm_dfns.delete(&data);
        engine.commit(&[update, delete]).await.unwrap();

        controller.reload().await.unwrap();
        let snapshot = controller.snapshot().await;
        assert!(snapshot.drbd_vlm_dfns.is_empty(), "{:?}", config);
        assert!(snapshot.minors.is_empty());
    }
}

/// Every kind of object the controller creates, including snapshots and
/// NVMe layers whose volumes are never stored
async fn deploy_everything(controller: &Controller) {
    deploy(controller).await;
    let ctx = admin();
    controller
        .create_rsc_dfn(&ctx, "rscB", &[DeviceLayerKind::Luks, DeviceLayerKind::Storage])
        .await
        .unwrap();
    controller.create_vlm_dfn(&ctx, "rscB", 0, GIB_IN_KIB, None).await.unwrap();
    controller.create_vlm_dfn(&ctx, "rscB", 1, 4 * GIB_IN_KIB, None).await.unwrap();
    controller.create_resource(&ctx, "alpha", "rscB", "thin").await.unwrap();
    controller
        .create_rsc_dfn(&ctx, "rscC", &[DeviceLayerKind::Nvme, DeviceLayerKind::Storage])
        .await
        .unwrap();
    controller.create_resource(&ctx, "beta", "rscC", "thin").await.unwrap();
    controller.create_vlm_dfn(&ctx, "rscC", 0, GIB_IN_KIB, None).await.unwrap();
    controller.create_snapshot(&ctx, "rscA", "snap1").await.unwrap();
    controller.set_prop(&ctx, "/NODES/ALPHA", "Aux/site", "east").await.unwrap();
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    for config in engines() {
        let (controller, _) = open(&config).await;
        deploy_everything(&controller).await;
        let built = controller.snapshot().await;

        controller.reload().await.unwrap();
        let first = controller.snapshot().await;
        assert_eq!(first, built, "{:?}", config);

        controller.reload().await.unwrap();
        assert_eq!(controller.snapshot().await, first, "{:?}", config);
    }
}

#[tokio::test]
async fn test_backends_hold_identical_graphs() {
    let mut graphs = Vec::new();
    for config in engines() {
        let (controller, _) = open(&config).await;
        deploy_everything(&controller).await;
        controller.reload().await.unwrap();
        graphs.push(controller.snapshot().await.without_generated());
    }
    assert!(graphs[0].entity_count() > 0);
    for graph in &graphs[1..] {
        assert_eq!(graph, &graphs[0]);
    }
}

#[tokio::test]
async fn test_exhausted_port_pool_writes_nothing() {
    let pools = NumberPoolsConfig {
        tcp_port: NumberPoolConfig { min: 7000, max: 7000 },
        ..Default::default()
    };
    for config in engines() {
        let (controller, _) = open_with_pools(&config, pools).await;
        let ctx = admin();
        let layers = [DeviceLayerKind::Drbd, DeviceLayerKind::Storage];
        controller.create_rsc_dfn(&ctx, "rscA", &layers).await.unwrap();
        let before = controller.snapshot().await;

        assert_matches!(
            controller.create_rsc_dfn(&ctx, "rscB", &layers).await,
            Err(Error::PoolExhausted { min: 7000, max: 7000, .. })
        );
        assert_eq!(controller.snapshot().await, before, "{:?}", config);
        assert!(!controller.read().await.is_dirty());

        controller.reload().await.unwrap();
        let after = controller.snapshot().await;
        assert_eq!(after.rsc_dfns.len(), 1, "{:?}", config);
        assert_eq!(after.drbd_rsc_dfns.len(), 1);
        assert_eq!(after.tcp_ports, vec![7000]);
        assert!(after.protections.iter().all(|p| p.object_path != "/resourcedefinitions/RSCB"));
    }
}

#[tokio::test]
async fn test_snapshot_drbd_rows_claim_no_numbers() {
    for config in engines() {
        let (controller, engine) = open(&config).await;
        deploy(&controller).await;
        controller.create_snapshot(&admin(), "rscA", "snap1").await.unwrap();
        let drivers = DbDrivers::new().unwrap();

        let live_minor = minor_of(&controller, "rscA", 0).await;
        let (mut snap_rsc, mut snap_vlm, live_port) = {
            let cache = controller.read().await;
            let live_rsc = cache.drbd_rsc_dfns.values().find(|d| d.name.snap.is_none()).cloned().unwrap();
            let snap_rsc = cache.drbd_rsc_dfns.values().find(|d| d.name.snap.is_some()).cloned().unwrap();
            let snap_vlm = cache.drbd_vlm_dfns.values().find(|d| d.name.snap.is_some()).cloned().unwrap();
            (snap_rsc, snap_vlm, live_rsc.tcp_port)
        };
        assert!(live_port.is_some() && live_minor.is_some());

        // Rows written by an older controller that copied the live numbers
        snap_rsc.tcp_port = live_port;
        snap_rsc.secret = Some("stale".to_string());
        snap_vlm.minor = live_minor;
        engine
            .commit(&[drivers.drbd_rsc_dfns.upsert(&snap_rsc), drivers.drbd_vlm_dfns.upsert(&snap_vlm)])
            .await
            .unwrap();

        assert_ok!(controller.reload().await);
        let snapshot = controller.snapshot().await;
        let snap_rows: Vec<_> = snapshot.drbd_rsc_dfns.iter().filter(|d| d.name.snap.is_some()).collect();
        assert_eq!(snap_rows.len(), 1, "{:?}", config);
        assert_eq!(snap_rows[0].tcp_port, None);
        assert_eq!(snap_rows[0].secret, None);
        assert!(snapshot
            .drbd_vlm_dfns
            .iter()
            .filter(|d| d.name.snap.is_some())
            .all(|d| d.minor.is_none()));
        assert_eq!(snapshot.minors, vec![live_minor.map(|m| m.value()).unwrap()]);
        assert_eq!(snapshot.tcp_ports, vec![live_port.map(|p| p.value()).unwrap()]);
    }
}
