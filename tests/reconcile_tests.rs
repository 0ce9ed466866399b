
use std::time::Duration;

use test_harness::{local_worker, remote_worker, wait_for_events, Fixture};
use worker_fleet::error::FleetError;
use worker_fleet::fleet::EventKind;
use worker_fleet::store::WorkerStore;
use worker_fleet::tunnel::TunnelEntry;

#[tokio::test]
async fn test_sync_prunes_undeclared_workers() {
    let fx = Fixture::new();
    let a = local_worker(1, "a");
    let b = local_worker(1, "b");
    let c = local_worker(2, "c");
    for w in [&a, &b, &c] {
        fx.manager.create(w).await.unwrap();
    }

    let mut desired_a = a.clone();
    desired_a.code = b"export default { rev: 2 }".to_vec();
    let desired_c = c.clone();

    fx.manager
        .sync_workers(&[desired_a.clone(), desired_c.clone()])
        .await
        .unwrap();

    assert!(fx.record(&b).is_none(), "B's record must be pruned");
    assert!(fx.artifact(&b).is_none(), "B's artifact must be pruned");
    assert!(!fx.code.dir_exists(&b.uid));
    assert!(fx.tunnels.get("b").await.is_none());

    assert_eq!(fx.record(&desired_a).unwrap().worker, desired_a);
    assert_eq!(fx.artifact(&desired_a), Some(desired_a.code.clone()));
    assert_eq!(fx.record(&desired_c).unwrap().worker, desired_c);
    assert_eq!(fx.artifact(&desired_c), Some(desired_c.code.clone()));
    assert_eq!(fx.record_count(), 2);
}

#[tokio::test]
async fn test_sync_redeploy_under_new_uid_replaces_old_worker() {
    let fx = Fixture::new();
    let old = local_worker(1, "api");
    fx.manager.create(&old).await.unwrap();

    let mut new = local_worker(1, "api");
    new.tunnel_id = "tunnel-api-v2".into();
    new.port = 40100;
    new.code = b"export default { rev: 2 }".to_vec();
    assert_ne!(old.uid, new.uid);

    fx.manager.sync_workers(&[new.clone()]).await.unwrap();

    assert_eq!(fx.record(&new).unwrap().worker, new);
    assert_eq!(fx.artifact(&new), Some(new.code.clone()));
    assert!(fx.record(&old).is_none());
    assert!(!fx.code.dir_exists(&old.uid));
    assert_eq!(fx.record_count(), 1);
    assert_eq!(
        fx.tunnels.get("api").await,
        Some(TunnelEntry {
            tunnel_id: "tunnel-api-v2".into(),
            port: 40100
        })
    );
}

#[tokio::test]
async fn test_sync_reports_partial_failure_and_applies_the_rest() {
    let fx = Fixture::new();
    let a = local_worker(1, "a");
    let b = local_worker(1, "b");
    let c = local_worker(1, "c");
    fx.code.fail_writes_for(&b.uid);

    let err = fx
        .manager
        .sync_workers(&[a.clone(), b.clone(), c.clone()])
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::PartialFailure));
    for w in [&a, &c] {
        assert_eq!(fx.record(w).unwrap().worker, *w);
        assert_eq!(fx.artifact(w), Some(w.code.clone()));
    }
    assert!(fx.record(&b).is_none());
    assert!(fx.artifact(&b).is_none());
}

#[tokio::test]
async fn test_sync_failure_for_existing_worker_does_not_stop_pruning() {
    let fx = Fixture::new();
    let a = local_worker(1, "a");
    let stale = local_worker(1, "stale");
    fx.manager.create(&a).await.unwrap();
    fx.manager.create(&stale).await.unwrap();
    fx.code.fail_writes_for(&a.uid);

    let err = fx.manager.sync_workers(&[a.clone()]).await.unwrap_err();

    assert!(matches!(err, FleetError::PartialFailure));
    assert!(fx.record(&stale).is_none());
    assert!(!fx.code.dir_exists(&stale.uid));
}

#[tokio::test]
async fn test_sync_into_empty_fleet_creates_all() {
    let fx = Fixture::new();
    let desired = vec![local_worker(1, "a"), local_worker(1, "b"), local_worker(3, "c")];

    fx.manager.sync_workers(&desired).await.unwrap();

    assert_eq!(fx.record_count(), 3);
    for w in &desired {
        assert_eq!(fx.artifact(w), Some(w.code.clone()));
        assert_eq!(fx.tunnels.get(&w.name).await.unwrap().tunnel_id, w.tunnel_id);
    }
}

#[tokio::test]
async fn test_sync_with_empty_desired_set_prunes_everything() {
    let fx = Fixture::new();
    let a = local_worker(1, "a");
    let b = local_worker(2, "b");
    fx.manager.create(&a).await.unwrap();
    fx.manager.create(&b).await.unwrap();

    fx.manager.sync_workers(&[]).await.unwrap();

    assert_eq!(fx.record_count(), 0);
    assert!(!fx.code.dir_exists(&a.uid));
    assert!(!fx.code.dir_exists(&b.uid));
    assert!(fx.tunnels.table.is_empty().await);
}

#[tokio::test]
async fn test_sync_rebuilds_tunnels_for_desired_workers() {
    let fx = Fixture::new();
    let mut a = local_worker(1, "a");
    fx.manager.create(&a).await.unwrap();

    a.port = 40500;
    fx.manager.sync_workers(&[a.clone()]).await.unwrap();

    let entry = fx.tunnels.get("a").await.unwrap();
    assert_eq!(entry.port, 40500);
    assert_eq!(entry.tunnel_id, a.tunnel_id);
    assert_eq!(fx.record(&a).unwrap().worker.port, 40500);
}

#[tokio::test]
async fn test_sync_recreates_remote_workers_through_events() {
    let fx = Fixture::new();
    let remote = remote_worker(1, "edge");
    let stale_remote = remote_worker(1, "gone");
    fx.manager.create(&stale_remote).await.unwrap();
    assert!(wait_for_events(&fx.bus, 1, Duration::from_secs(2)).await);

    fx.manager.sync_workers(&[remote.clone()]).await.unwrap();

    // delete + add for the desired worker, delete for the stale one
    assert!(wait_for_events(&fx.bus, 4, Duration::from_secs(2)).await);
    let mut kinds = fx.bus.kinds_for(&remote.uid);
    kinds.sort_by_key(|k| k.to_string());
    assert_eq!(kinds, vec![EventKind::AddWorker, EventKind::DeleteWorker]);
    assert_eq!(
        fx.bus.kinds_for(&stale_remote.uid),
        vec![EventKind::AddWorker, EventKind::DeleteWorker]
    );

    assert!(fx.record(&remote).is_some());
    assert!(fx.record(&stale_remote).is_none());
    // Sync rewrites code for every desired worker, wherever it runs.
    assert_eq!(fx.artifact(&remote), Some(remote.code.clone()));
}

#[tokio::test]
async fn test_sync_unknown_node_is_partial_failure() {
    let fx = Fixture::new();
    let a = local_worker(1, "a");
    let mut lost = remote_worker(1, "lost");
    lost.node_name = "node-z".into();

    let err = fx
        .manager
        .sync_workers(&[lost.clone(), a.clone()])
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::PartialFailure));
    assert!(fx.record(&lost).is_none());
    assert!(fx.record(&a).is_some());
    assert_eq!(fx.store.admin_list_by_node("node-a").unwrap().len(), 1);
}
