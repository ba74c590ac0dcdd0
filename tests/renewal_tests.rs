//! Renewal tests: the renew deadline, transient write conflicts and the
//! leadership flag agreeing with the callbacks.


use std::time::Duration;

use lease_elector::LeadershipState;
use test_harness::{assert_eventually, descriptor, identity_of, Event, TestCluster};
use tokio::time::Instant;

const RENEW_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::test(start_paused = true)]
async fn test_renewals_keep_record_fresh() {
    let mut cluster = TestCluster::new(1).await;
    cluster
        .wait_for_leader(Duration::from_secs(1))
        .await
        .unwrap();
    let first = cluster.store.record(&descriptor()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    let later = cluster.store.record(&descriptor()).await.unwrap();

    assert_eq!(later.holder_identity, "node-1");
    assert_eq!(later.acquire_time, first.acquire_time);
    assert_eq!(later.leader_transitions, first.leader_transitions);
    assert!(later.renew_time >= first.renew_time);

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_conflicts_past_deadline_stop_leading() {
    let mut cluster = TestCluster::new(1).await;
    cluster
        .wait_for_leader(Duration::from_secs(1))
        .await
        .unwrap();

    // Five consecutive conflicts cover a whole renew window
    cluster.store.fail_writes(&identity_of(1), 5).await;
    let injected_at = Instant::now();

    assert_eventually(
        || async { cluster.get_node(1).unwrap().count(&Event::Stopped) == 1 },
        Duration::from_secs(15),
        "leader should give up once the renew deadline passes",
    )
    .await;
    assert!(injected_at.elapsed() >= RENEW_DEADLINE);

    let node = cluster.get_node(1).unwrap();
    assert!(!node.is_leader());
    assert_eq!(node.election.state(), LeadershipState::FormerLeader);

    // The record still names us, so the next acquisition attempt succeeds
    assert_eventually(
        || async { cluster.get_node(1).unwrap().count(&Event::Started) == 2 },
        Duration::from_secs(5),
        "node should re-acquire its own record",
    )
    .await;
    assert_eq!(
        cluster.get_node(1).unwrap().events(),
        vec![Event::Started, Event::Stopped, Event::Started]
    );
    assert!(cluster.get_node(1).unwrap().is_leader());

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_conflicts_within_deadline_are_tolerated() {
    let mut cluster = TestCluster::new(1).await;
    cluster
        .wait_for_leader(Duration::from_secs(1))
        .await
        .unwrap();

    // Fifth attempt of the window succeeds
    cluster.store.fail_writes(&identity_of(1), 4).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let node = cluster.get_node(1).unwrap();
    assert!(node.is_leader());
    assert_eq!(node.events(), vec![Event::Started]);

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_flag_matches_callbacks() {
    let mut cluster = TestCluster::new(1).await;
    let node = cluster.get_node(1).unwrap();
    assert!(!node.is_leader());
    assert_eq!(node.election.state(), LeadershipState::Standby);

    cluster
        .wait_for_leader(Duration::from_secs(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let node = cluster.get_node(1).unwrap();
    assert!(node.is_leader());
    assert_eq!(node.events(), vec![Event::Started]);

    cluster.stop_node(1).await;
    let node = cluster.get_node(1).unwrap();
    assert!(!node.is_leader());
    assert_eventually(
        || async { cluster.get_node(1).unwrap().events() == vec![Event::Started, Event::Stopped] },
        Duration::from_secs(1),
        "stop work should run after cancellation",
    )
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_record_serializes_camel_case() {
    let mut cluster = TestCluster::new(1).await;
    cluster
        .wait_for_leader(Duration::from_secs(1))
        .await
        .unwrap();

    let record = cluster.store.record(&descriptor()).await.unwrap();
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["holderIdentity"], "node-1");
    assert_eq!(json["leaseDurationSeconds"], 15);
    assert_eq!(json["leaderTransitions"], 0);
    assert!(json.get("renewTime").is_some());
    assert!(json.get("acquireTime").is_some());

    cluster.shutdown().await;
}
