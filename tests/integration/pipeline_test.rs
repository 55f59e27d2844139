//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 发布 → 队列 → 消费 → 缓存删除 全链路集成测试

use oxsync::backend::{CacheStore, MemoryCacheStore};
use oxsync::event::InvalidationEvent;
use oxsync::metrics::{counter, GLOBAL_METRICS};
use oxsync::queue::{consume, Channel, ConsumerState, MemoryBroker, Subscription};
use oxsync::database::Blog;
use oxsync::sync::{InvalidationConsumer, InvalidationPublisher, Rebuilder};
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

struct Pipeline {
    topic: String,
    broker: MemoryBroker,
    cache: Arc<MemoryCacheStore>,
    publisher: InvalidationPublisher,
    subscription: Subscription,
}

impl Pipeline {
    async fn start(base: &str, rebuilder: Option<Rebuilder>) -> Self {
        common::setup_logging();
        let topic = common::unique_topic(base);
        let broker = common::test_broker();
        let cache = Arc::new(common::test_cache());

        let mut consumer = InvalidationConsumer::new(cache.clone(), 3600);
        if let Some(rebuilder) = rebuilder {
            consumer = consumer.with_rebuilder(rebuilder);
        }
        let subscription = consume(
            Arc::new(broker.clone()),
            topic.clone(),
            Arc::new(consumer),
            common::fast_options(),
        );
        assert!(
            subscription
                .wait_for(Duration::from_secs(2), |s| *s == ConsumerState::Subscribed)
                .await
        );

        let publisher =
            InvalidationPublisher::new(Arc::new(broker.clone()), &common::broker_config(&topic));
        Self {
            topic,
            broker,
            cache,
            publisher,
            subscription,
        }
    }

    async fn seed(&self, keys: &[&str]) {
        for key in keys {
            self.cache
                .set_with_ttl(key, b"[]".to_vec(), 3600)
                .await
                .unwrap();
        }
    }

    async fn send_raw(&self, payload: &[u8]) {
        self.broker.channel().send(&self.topic, payload).await.unwrap();
    }

    async fn drained(&self) -> bool {
        common::wait_drained(&self.broker, &self.topic).await
    }

    fn metric(&self, name: &str) -> u64 {
        GLOBAL_METRICS.get(&self.topic, name)
    }

    /// 确认计数在确认完成之后才递增
    async fn acked(&self, n: u64) -> bool {
        common::wait_until(Duration::from_secs(2), || self.metric(counter::ACKED) == n).await
    }
}

#[tokio::test]
async fn test_exact_key_deletes_only_that_key() {
    let p = Pipeline::start("pipeline-exact", None).await;
    p.seed(&["blog:7", "blog:8"]).await;

    p.publisher.invalidate(["blog:7"]).await.unwrap();
    assert!(p.drained().await);

    assert_eq!(common::cached_keys(&p.cache), vec!["blog:8".to_string()]);
    assert_eq!(p.metric(counter::PUBLISHED), 1);
    assert_eq!(p.metric(counter::KEYS_DELETED), 1);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_glob_deletes_all_listing_views() {
    let p = Pipeline::start("pipeline-glob", None).await;
    p.seed(&["blogs:all:all", "blogs:foo:all", "blogs:rust:Tech", "blog:1"])
        .await;

    p.publisher.invalidate(["blogs:*"]).await.unwrap();
    assert!(p.drained().await);

    assert_eq!(common::cached_keys(&p.cache), vec!["blog:1".to_string()]);
    assert_eq!(p.metric(counter::KEYS_DELETED), 3);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_keys_are_not_an_error() {
    let p = Pipeline::start("pipeline-missing", None).await;

    p.publisher.invalidate(["blog:404", "blogs:*"]).await.unwrap();
    assert!(p.drained().await);

    assert!(p.acked(1).await);
    assert_eq!(p.metric(counter::NACKED), 0);
    assert_eq!(p.metric(counter::KEYS_DELETED), 0);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_delivery_is_applied_once() {
    let p = Pipeline::start("pipeline-dup", None).await;
    p.seed(&["blog:7"]).await;

    let event = InvalidationEvent::invalidate(["blog:7"]);
    let payload = event.to_payload().unwrap();
    p.send_raw(&payload).await;
    assert!(p.drained().await);
    assert!(common::cached_keys(&p.cache).is_empty());

    // 读路径回填后，同一事件的重复投递不再删除
    p.seed(&["blog:7"]).await;
    p.send_raw(&payload).await;
    assert!(p.drained().await);

    assert_eq!(common::cached_keys(&p.cache), vec!["blog:7".to_string()]);
    assert_eq!(p.metric(counter::DUPLICATE), 1);
    assert!(p.acked(2).await);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_events_without_idempotency_id_are_always_applied() {
    let p = Pipeline::start("pipeline-no-id", None).await;
    let payload = br#"{"action":"INVALIDATE_CACHE","keys":["blog:7"]}"#;

    p.seed(&["blog:7"]).await;
    p.send_raw(payload).await;
    assert!(p.drained().await);
    assert!(common::cached_keys(&p.cache).is_empty());

    p.seed(&["blog:7"]).await;
    p.send_raw(payload).await;
    assert!(p.drained().await);
    assert!(common::cached_keys(&p.cache).is_empty());
    assert_eq!(p.metric(counter::DUPLICATE), 0);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_messages_are_acked_and_dropped() {
    let p = Pipeline::start("pipeline-malformed", None).await;
    p.seed(&["blog:1", "blog:2"]).await;

    p.send_raw(b"not json").await;
    p.send_raw(br#"{"action":"INVALIDATE_CACHE","keys":[]}"#).await;
    p.send_raw(br#"{"keys":["users:*"]}"#).await;
    assert!(p.drained().await);
    assert_eq!(p.metric(counter::DISCARDED), 3);
    assert_eq!(p.metric(counter::NACKED), 0);

    // 后续的正常消息不受影响
    p.publisher.invalidate(["blog:1"]).await.unwrap();
    assert!(p.drained().await);
    assert_eq!(common::cached_keys(&p.cache), vec!["blog:2".to_string()]);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_action_is_ignored() {
    let p = Pipeline::start("pipeline-unknown", None).await;
    p.seed(&["blog:1"]).await;

    p.send_raw(br#"{"action":"REFRESH_CACHE","keys":["blog:1"]}"#)
        .await;
    assert!(p.drained().await);

    assert_eq!(common::cached_keys(&p.cache), vec!["blog:1".to_string()]);
    assert_eq!(p.metric(counter::IGNORED), 1);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cache_outage_requeues_until_store_recovers() {
    let p = Pipeline::start("pipeline-outage", None).await;
    p.seed(&["blog:7", "blog:8"]).await;
    p.cache.set_available(false);

    p.publisher.invalidate(["blog:7"]).await.unwrap();
    assert!(
        common::wait_until(Duration::from_secs(3), || p.metric(counter::NACKED) >= 2).await,
        "message should be redelivered while the cache is down"
    );
    assert_eq!(p.metric(counter::ACKED), 0);

    p.cache.set_available(true);
    assert!(p.drained().await);
    assert_eq!(common::cached_keys(&p.cache), vec!["blog:8".to_string()]);
    assert!(p.acked(1).await);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rebuild_repopulates_default_listing_once() {
    let store = Arc::new(common::seeded_blog_store().await);
    let rebuilder = Rebuilder::new(store, "blogs:all:all", 3600);
    let p = Pipeline::start("pipeline-rebuild", Some(rebuilder)).await;
    p.seed(&["blogs:all:all", "blogs:rust:all"]).await;

    // 两个模式都覆盖重建键，只重建一次
    p.publisher
        .invalidate(["blogs:*", "blogs:all:all"])
        .await
        .unwrap();
    assert!(p.drained().await);

    assert_eq!(p.metric(counter::REBUILT), 1);
    assert_eq!(common::cached_keys(&p.cache), vec!["blogs:all:all".to_string()]);
    let bytes = p.cache.get("blogs:all:all").await.unwrap().unwrap();
    let blogs: Vec<Blog> = serde_json::from_slice(&bytes).unwrap();
    let ids: Vec<i32> = blogs.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rebuild_skipped_when_listing_not_affected() {
    let store = Arc::new(common::seeded_blog_store().await);
    let rebuilder = Rebuilder::new(store, "blogs:all:all", 3600);
    let p = Pipeline::start("pipeline-no-rebuild", Some(rebuilder)).await;
    p.seed(&["blog:3"]).await;

    p.publisher.invalidate(["blog:3"]).await.unwrap();
    assert!(p.drained().await);

    assert_eq!(p.metric(counter::REBUILT), 0);
    assert!(common::cached_keys(&p.cache).is_empty());
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rebuild_query_failure_still_acks() {
    let store = Arc::new(common::empty_blog_store().await);
    let rebuilder = Rebuilder::new(store, "blogs:all:all", 3600);
    let p = Pipeline::start("pipeline-rebuild-fail", Some(rebuilder)).await;
    p.seed(&["blogs:all:all", "blog:1"]).await;

    p.publisher.invalidate(["blogs:*"]).await.unwrap();
    assert!(p.drained().await);

    // 删除已生效，列表由读路径在下次未命中时回填
    assert_eq!(common::cached_keys(&p.cache), vec!["blog:1".to_string()]);
    assert_eq!(p.metric(counter::REBUILD_FAILED), 1);
    assert_eq!(p.metric(counter::REBUILT), 0);
    assert_eq!(p.metric(counter::NACKED), 0);
    p.subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_messages_published_before_subscribe_are_delivered() {
    common::setup_logging();
    let topic = common::unique_topic("pipeline-backlog");
    let broker = common::test_broker();
    let cache = Arc::new(common::test_cache());
    cache.set_with_ttl("blog:5", b"{}".to_vec(), 60).await.unwrap();

    let publisher =
        InvalidationPublisher::new(Arc::new(broker.clone()), &common::broker_config(&topic));
    publisher.invalidate(["blog:5"]).await.unwrap();
    assert_eq!(broker.ready_len(&topic), 1);

    let subscription = consume(
        Arc::new(broker.clone()),
        topic.clone(),
        Arc::new(InvalidationConsumer::new(cache.clone(), 3600)),
        common::fast_options(),
    );
    assert!(common::wait_drained(&broker, &topic).await);
    assert!(common::cached_keys(&cache).is_empty());
    subscription.shutdown().await.unwrap();
}
