//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 发布者降级与恢复集成测试

use oxsync::config::ReconnectConfig;
use oxsync::error::SyncError;
use oxsync::event::InvalidationEvent;
use oxsync::metrics::{counter, GLOBAL_METRICS};
use oxsync::queue::{Channel, Connector};
use oxsync::service::{AuthorWriteHook, BlogMutation};
use oxsync::sync::{InvalidationPublisher, PublishOutcome};
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

#[tokio::test]
async fn test_publish_during_outage_degrades_without_error() {
    common::setup_logging();
    let topic = common::unique_topic("publisher-outage");
    let broker = common::test_broker();
    let publisher =
        InvalidationPublisher::new(Arc::new(broker.clone()), &common::broker_config(&topic));

    broker.set_available(false);
    let outcome = publisher.publish_after_commit(["blog:1"]).await;
    assert!(matches!(
        outcome,
        PublishOutcome::Degraded(SyncError::BrokerUnavailable(_))
    ));
    assert_eq!(GLOBAL_METRICS.get(&topic, counter::PUBLISH_FAILED), 1);
    assert!(publisher.ping().await.is_err());
}

#[tokio::test]
async fn test_publisher_reconnects_after_outage() {
    common::setup_logging();
    let topic = common::unique_topic("publisher-recover");
    let broker = common::test_broker();
    let publisher =
        InvalidationPublisher::new(Arc::new(broker.clone()), &common::broker_config(&topic));

    // 先建立通道，再模拟代理重启
    publisher.invalidate(["blog:1"]).await.unwrap();
    broker.set_available(false);
    assert!(publisher.invalidate(["blog:2"]).await.is_err());

    broker.set_available(true);
    let mut recovered = false;
    for _ in 0..50 {
        if publisher.publish_after_commit(["blog:3"]).await.is_published() {
            recovered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(recovered, "publisher should reconnect once the broker is back");

    let channel = broker.channel();
    let mut payloads = Vec::new();
    while let Some(delivery) = channel.next_delivery(&topic).await.unwrap() {
        payloads.push(InvalidationEvent::from_payload(&delivery.payload).unwrap());
        channel.ack(&delivery).await.unwrap();
    }
    let keys: Vec<&str> = payloads.iter().map(|e| e.keys[0].as_str()).collect();
    assert_eq!(keys, vec!["blog:1", "blog:3"]);
}

#[tokio::test]
async fn test_circuit_breaker_fails_fast_after_repeated_failures() {
    common::setup_logging();
    let topic = common::unique_topic("publisher-circuit");
    let broker = common::test_broker();
    let mut config = common::broker_config(&topic);
    config.reconnect = ReconnectConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        multiplier: 1.0,
        circuit_breaker_threshold: 2,
        circuit_open_ms: 60_000,
    };
    let publisher = InvalidationPublisher::new(Arc::new(broker.clone()), &config);

    broker.set_available(false);
    for _ in 0..2 {
        assert!(publisher.invalidate(["blog:1"]).await.is_err());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // 代理已恢复，但熔断期间不再尝试连接
    broker.set_available(true);
    let err = publisher.invalidate(["blog:1"]).await.unwrap_err();
    assert!(err.to_string().contains("circuit breaker is open"));
    assert_eq!(broker.ready_len(&topic), 0);
}

#[tokio::test]
async fn test_invalid_event_is_rejected_before_sending() {
    common::setup_logging();
    let topic = common::unique_topic("publisher-invalid");
    let broker = common::test_broker();
    let publisher =
        InvalidationPublisher::new(Arc::new(broker.clone()), &common::broker_config(&topic));

    let empty = InvalidationEvent::invalidate(Vec::<String>::new());
    assert!(matches!(
        publisher.publish(&topic, &empty).await,
        Err(SyncError::InvalidEvent(_))
    ));
    let foreign = InvalidationEvent::invalidate(["users:*"]);
    assert!(matches!(
        publisher.publish(&topic, &foreign).await,
        Err(SyncError::InvalidEvent(_))
    ));
    assert!(!broker.has_topic(&topic));
}

#[tokio::test]
async fn test_publish_declares_topic_and_reports_depth() {
    common::setup_logging();
    let topic = common::unique_topic("publisher-depth");
    let broker = common::test_broker();
    let connector: Arc<dyn Connector> = Arc::new(broker.clone());
    let publisher = InvalidationPublisher::new(connector, &common::broker_config(&topic));

    publisher.invalidate(["blogs:*"]).await.unwrap();
    publisher.invalidate(["blog:9"]).await.unwrap();

    assert!(broker.has_topic(&topic));
    assert_eq!(publisher.depth().await.unwrap(), 2);
    assert!(publisher.ping().await.is_ok());
}

#[tokio::test]
async fn test_author_hook_publishes_mutation_keys() {
    common::setup_logging();
    let topic = common::unique_topic("publisher-author");
    let broker = common::test_broker();
    let publisher = Arc::new(InvalidationPublisher::new(
        Arc::new(broker.clone()),
        &common::broker_config(&topic),
    ));
    let hook = AuthorWriteHook::new(publisher);

    assert!(hook
        .after_commit(BlogMutation::Updated { id: 42 })
        .await
        .is_published());

    let channel = broker.channel();
    let delivery = channel.next_delivery(&topic).await.unwrap().unwrap();
    let event = InvalidationEvent::from_payload(&delivery.payload).unwrap();
    assert_eq!(event.keys, vec!["blogs:*".to_string(), "blog:42".to_string()]);
    assert!(event.idempotency_id.is_some());
    assert!(event.emitted_at.is_some());
}
