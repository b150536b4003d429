use dolt_cluster::core::backoff::{Backoff, BackoffPolicy};
use std::time::Duration;

#[test]
fn test_replication_backoff_starts_at_one_second() {
    let mut backoff = Backoff::new(BackoffPolicy::replication());
    let delay = backoff.next_delay();
    assert!(delay >= Duration::from_secs(1));
    // Jitter is bounded by a quarter of the base delay.
    assert!(delay < Duration::from_millis(1300));
}

#[test]
fn test_drop_database_backoff_starts_at_one_millisecond() {
    let mut backoff = Backoff::new(BackoffPolicy::drop_database());
    let delay = backoff.next_delay();
    assert!(delay >= Duration::from_millis(1));
    assert!(delay < Duration::from_millis(10));
}

#[test]
fn test_delays_double_up_to_the_cap() {
    let mut backoff = Backoff::new(BackoffPolicy::replication());
    backoff.next_delay();
    assert_eq!(backoff.current(), Duration::from_secs(2));
    backoff.next_delay();
    assert_eq!(backoff.current(), Duration::from_secs(4));

    for _ in 0..10 {
        backoff.next_delay();
    }
    assert_eq!(backoff.current(), Duration::from_secs(60));
}

#[test]
fn test_reset_returns_to_the_initial_delay() {
    let mut backoff = Backoff::new(BackoffPolicy::replication());
    for _ in 0..5 {
        backoff.next_delay();
    }
    backoff.reset();
    assert_eq!(backoff.current(), Duration::from_secs(1));
}
