use dolt_cluster::core::notifier::ProgressNotifier;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_waiter_registered_before_attempt_wakes_on_success() {
    let mut notifier = ProgressNotifier::new();
    let waiter = notifier.wait();

    let mut attempt = notifier.begin_attempt();
    notifier.record_success(&mut attempt);

    timeout(Duration::from_secs(1), waiter.wait())
        .await
        .expect("waiter should be woken")
        .expect("woken waiter resolves Ok");
}

#[tokio::test]
async fn test_waiter_registered_after_attempt_is_not_woken_by_it() {
    let mut notifier = ProgressNotifier::new();
    let mut attempt = notifier.begin_attempt();
    let waiter = notifier.wait();
    notifier.record_success(&mut attempt);

    let woken = timeout(Duration::from_millis(50), waiter.wait()).await;
    assert!(woken.is_err(), "late waiter must not observe an earlier attempt");
    assert_eq!(notifier.waiter_count(), 1);
}

#[tokio::test]
async fn test_record_failure_restores_waiters_for_the_next_attempt() {
    let mut notifier = ProgressNotifier::new();
    let first = notifier.wait();

    let mut failed = notifier.begin_attempt();
    notifier.record_failure(&mut failed);
    assert_eq!(notifier.waiter_count(), 1);

    let second = notifier.wait();
    let mut attempt = notifier.begin_attempt();
    notifier.record_success(&mut attempt);

    timeout(Duration::from_secs(1), first.wait())
        .await
        .expect("restored waiter wakes on the later success")
        .unwrap();
    timeout(Duration::from_secs(1), second.wait())
        .await
        .expect("new waiter wakes on the later success")
        .unwrap();
}

#[tokio::test]
async fn test_record_failure_after_success_is_a_noop() {
    let mut notifier = ProgressNotifier::new();
    let waiter = notifier.wait();

    let mut attempt = notifier.begin_attempt();
    notifier.record_success(&mut attempt);
    notifier.record_failure(&mut attempt);
    assert_eq!(notifier.waiter_count(), 0);

    timeout(Duration::from_secs(1), waiter.wait())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_record_success_is_idempotent() {
    let mut notifier = ProgressNotifier::new();
    let waiter = notifier.wait();

    let mut attempt = notifier.begin_attempt();
    notifier.record_success(&mut attempt);
    notifier.record_success(&mut attempt);

    timeout(Duration::from_secs(1), waiter.wait())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_dropped_notifier_fails_outstanding_waiters() {
    let mut notifier = ProgressNotifier::new();
    let waiter = notifier.wait();
    drop(notifier);

    let res = timeout(Duration::from_secs(1), waiter.wait())
        .await
        .expect("waiter resolves when the notifier is gone");
    assert!(res.is_err());
}
