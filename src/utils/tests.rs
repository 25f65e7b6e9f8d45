use std::time::Duration;

use super::error::{BrokerError, ClientError};
use super::logging;
use super::retry::RetryPolicy;

#[test]
fn test_logging_init_accepts_levels() {
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn test_level_filter_falls_back_to_info() {
    use tracing::level_filters::LevelFilter;

    assert_eq!(logging::level_filter("WARNING"), LevelFilter::WARN);
    assert_eq!(logging::level_filter(" trace "), LevelFilter::TRACE);
    assert_eq!(logging::level_filter("verbose"), LevelFilter::INFO);
}

#[test]
fn test_retry_policy_grows_exponentially() {
    let policy = RetryPolicy::new(2, Duration::from_millis(100), None);
    assert_eq!(policy.time_until_next_retry(0), Duration::from_millis(100));
    assert_eq!(policy.time_until_next_retry(1), Duration::from_millis(200));
    assert_eq!(policy.time_until_next_retry(3), Duration::from_millis(800));
}

#[test]
fn test_retry_policy_is_capped_by_maximum_interval() {
    let policy = RetryPolicy::new(
        2,
        Duration::from_millis(100),
        Some(Duration::from_millis(250)),
    );
    assert_eq!(policy.time_until_next_retry(2), Duration::from_millis(250));
    assert_eq!(policy.time_until_next_retry(40), Duration::from_millis(250));
}

#[test]
fn test_fixed_retry_policy_never_grows() {
    let policy = RetryPolicy::fixed(Duration::from_millis(20));
    assert_eq!(policy.time_until_next_retry(0), Duration::from_millis(20));
    assert_eq!(policy.time_until_next_retry(9), Duration::from_millis(20));
}

#[test]
fn test_only_unavailable_is_transient() {
    assert!(BrokerError::Unavailable.is_transient());
    assert!(!BrokerError::EmptyTopic.is_transient());
    assert!(ClientError::Broker(BrokerError::Unavailable).is_transient());
    assert!(!ClientError::NotStarted.is_transient());
}
