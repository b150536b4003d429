use async_trait::async_trait;
use bytes::Bytes;
use dolt_cluster::core::ClusterError;
use dolt_cluster::core::blob_replicator::BlobReplicator;
use dolt_cluster::core::client::BlobTarget;
use dolt_cluster::core::role::Role;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::timeout;

#[derive(Default)]
struct FakeTarget {
    applied: Mutex<Vec<Bytes>>,
    fail: AtomicBool,
}

#[async_trait]
impl BlobTarget for FakeTarget {
    async fn update(&self, contents: Bytes) -> Result<(), ClusterError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClusterError::Transport("peer unreachable".to_string()));
        }
        self.applied.lock().push(contents);
        Ok(())
    }
}

struct Fixture {
    replicator: Arc<BlobReplicator>,
    target: Arc<FakeTarget>,
    shutdown_tx: broadcast::Sender<()>,
}

fn fixture(role: Role) -> Fixture {
    let target = Arc::new(FakeTarget::default());
    let replicator = BlobReplicator::new(
        "standby1".to_string(),
        "https://standby1.example.com:50051".to_string(),
        "users-and-grants",
        target.clone(),
        role,
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    Fixture {
        replicator,
        target,
        shutdown_tx,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool, deadline: Duration) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > deadline {
            panic!("condition not reached within {deadline:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_update_replicates_and_wait_resolves() {
    let f = fixture(Role::Primary);
    tokio::spawn(f.replicator.clone().run(f.shutdown_tx.subscribe()));

    let wait = f
        .replicator
        .update_contents(Bytes::from_static(b"grants-v1"), 1);
    timeout(Duration::from_secs(2), wait.wait())
        .await
        .expect("replication completes")
        .unwrap();

    assert_eq!(
        f.target.applied.lock().as_slice(),
        &[Bytes::from_static(b"grants-v1")]
    );
    assert!(f.replicator.is_caught_up());
}

#[tokio::test]
async fn test_empty_blob_is_trivially_replicated() {
    let f = fixture(Role::Primary);
    tokio::spawn(f.replicator.clone().run(f.shutdown_tx.subscribe()));

    let wait = f.replicator.update_contents(Bytes::new(), 1);
    timeout(Duration::from_secs(2), wait.wait())
        .await
        .expect("empty blob resolves without an RPC")
        .unwrap();

    assert!(f.target.applied.lock().is_empty());
    assert!(f.replicator.is_caught_up());
}

#[tokio::test]
async fn test_standby_does_not_replicate_but_is_caught_up() {
    let f = fixture(Role::Standby);
    tokio::spawn(f.replicator.clone().run(f.shutdown_tx.subscribe()));

    let _wait = f
        .replicator
        .update_contents(Bytes::from_static(b"grants"), 1);
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(f.target.applied.lock().is_empty());
    assert!(f.replicator.is_caught_up());
}

#[tokio::test]
async fn test_versions_push_in_order_and_newest_wins() {
    let f = fixture(Role::Primary);
    tokio::spawn(f.replicator.clone().run(f.shutdown_tx.subscribe()));

    f.replicator.update_contents(Bytes::from_static(b"v1"), 1);
    let wait = f.replicator.update_contents(Bytes::from_static(b"v2"), 2);
    timeout(Duration::from_secs(2), wait.wait())
        .await
        .unwrap()
        .unwrap();

    let applied = f.target.applied.lock();
    assert_eq!(applied.last(), Some(&Bytes::from_static(b"v2")));
}

#[tokio::test]
async fn test_failure_backs_off_then_recovers() {
    let f = fixture(Role::Primary);
    f.target.fail.store(true, Ordering::SeqCst);
    tokio::spawn(f.replicator.clone().run(f.shutdown_tx.subscribe()));

    let wait = f.replicator.update_contents(Bytes::from_static(b"g"), 1);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!f.replicator.is_caught_up());
    assert!(f.replicator.last_error().is_some());

    f.target.fail.store(false, Ordering::SeqCst);
    timeout(Duration::from_secs(5), wait.wait())
        .await
        .expect("wait resolves after the retry lands")
        .unwrap();
    assert!(f.replicator.is_caught_up());
    assert!(f.replicator.last_error().is_none());
}

#[tokio::test]
async fn test_wait_fails_fast_once_the_breaker_trips() {
    let f = fixture(Role::Primary);
    f.target.fail.store(true, Ordering::SeqCst);
    tokio::spawn(f.replicator.clone().run(f.shutdown_tx.subscribe()));

    // First failure arms the breaker; the next one fails waits fast rather
    // than holding them until the caller's deadline.
    let wait = f.replicator.update_contents(Bytes::from_static(b"g"), 1);
    let res = timeout(Duration::from_secs(10), wait.wait())
        .await
        .expect("wait fails fast well before the outer deadline");
    assert!(res.is_err());
}

#[tokio::test]
async fn test_role_change_forces_a_republish() {
    let f = fixture(Role::Primary);
    tokio::spawn(f.replicator.clone().run(f.shutdown_tx.subscribe()));

    let wait = f.replicator.update_contents(Bytes::from_static(b"g"), 1);
    timeout(Duration::from_secs(2), wait.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(f.target.applied.lock().len(), 1);

    // Standby and back: the peer acknowledgement is forgotten, so the
    // current contents replicate again.
    f.replicator.set_role(Role::Standby);
    f.replicator.set_role(Role::Primary);
    wait_until(|| f.target.applied.lock().len() >= 2, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_graceful_stop_exits_the_worker() {
    let f = fixture(Role::Primary);
    let handle = tokio::spawn(f.replicator.clone().run(f.shutdown_tx.subscribe()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    f.replicator.graceful_stop();
    timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker exits")
        .unwrap();
}
