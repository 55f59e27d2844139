//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! Redis Streams 代理与 Redis 缓存存储集成测试，Redis 不可用时跳过

use oxsync::backend::{CacheStore, RedisCacheStore};
use oxsync::config::{BrokerConfig, BrokerMode, CacheConfig};
use oxsync::keys::KeyPattern;
use oxsync::queue::{
    consume, BrokerConnector, Channel, ConsumerState, Connector, RedisStreamConnection,
};
use oxsync::sync::{InvalidationConsumer, InvalidationPublisher};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

fn broker_config(topic: &str) -> BrokerConfig {
    BrokerConfig {
        mode: BrokerMode::Redis,
        connection_string: SecretString::from(oxsync::utils::redis_url()),
        topic: topic.to_string(),
        consumer_group: format!("{}-group", topic),
        block_ms: 50,
        reconnect: common::fast_reconnect(),
        ..Default::default()
    }
}

fn cache_config() -> CacheConfig {
    CacheConfig {
        connection_string: SecretString::from(oxsync::utils::redis_url()),
        scan_count: 10,
        ..Default::default()
    }
}

async fn cleanup(keys: &[&str]) {
    if let Ok(client) = redis::Client::open(oxsync::utils::redis_url()) {
        if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
            let _: redis::RedisResult<()> = redis::cmd("DEL").arg(keys).query_async(&mut conn).await;
        }
    }
}

macro_rules! require_redis {
    ($name:expr) => {
        common::setup_logging();
        if !common::is_redis_available().await {
            println!("Skipping {} because Redis is not available", $name);
            return;
        }
    };
}

#[tokio::test]
async fn test_stream_send_receive_ack() {
    require_redis!("test_stream_send_receive_ack");
    let topic = common::unique_topic("oxsync-stream");
    let connection = RedisStreamConnection::connect(&broker_config(&topic), "consumer-a")
        .await
        .unwrap();
    let channel = connection.channel();

    channel.declare_topic(&topic).await.unwrap();
    // 重复声明不是错误
    channel.declare_topic(&topic).await.unwrap();
    channel.send(&topic, b"one").await.unwrap();
    channel.send(&topic, b"two").await.unwrap();
    assert_eq!(channel.depth(&topic).await.unwrap(), 2);

    let first = channel.next_delivery(&topic).await.unwrap().unwrap();
    assert_eq!(first.payload, b"one");
    assert!(!first.redelivered);
    channel.ack(&first).await.unwrap();
    assert_eq!(channel.depth(&topic).await.unwrap(), 1);

    let second = channel.next_delivery(&topic).await.unwrap().unwrap();
    assert_eq!(second.payload, b"two");
    channel.ack(&second).await.unwrap();

    assert!(channel.next_delivery(&topic).await.unwrap().is_none());
    channel.ping().await.unwrap();
    cleanup(&[&topic]).await;
}

#[tokio::test]
async fn test_stream_nack_requeue_marks_redelivered() {
    require_redis!("test_stream_nack_requeue_marks_redelivered");
    let topic = common::unique_topic("oxsync-stream-nack");
    let connection = RedisStreamConnection::connect(&broker_config(&topic), "consumer-a")
        .await
        .unwrap();
    let channel = connection.channel();
    channel.declare_topic(&topic).await.unwrap();
    channel.send(&topic, b"m").await.unwrap();

    let delivery = channel.next_delivery(&topic).await.unwrap().unwrap();
    channel.nack(&delivery, true).await.unwrap();

    // 重新入队的条目仍计入积压
    assert_eq!(channel.depth(&topic).await.unwrap(), 1);

    let again = channel.next_delivery(&topic).await.unwrap().unwrap();
    assert_eq!(again.payload, b"m");
    assert!(again.redelivered);
    assert_eq!(again.id, delivery.id);

    channel.nack(&again, false).await.unwrap();
    assert_eq!(channel.depth(&topic).await.unwrap(), 0);
    assert!(channel.next_delivery(&topic).await.unwrap().is_none());
    cleanup(&[&topic]).await;
}

#[tokio::test]
async fn test_each_consumer_group_receives_every_event() {
    require_redis!("test_each_consumer_group_receives_every_event");
    let topic = common::unique_topic("oxsync-stream-groups");
    let blog = broker_config(&topic);
    let search = BrokerConfig {
        consumer_group: format!("{}-search", topic),
        ..broker_config(&topic)
    };
    let blog_channel = RedisStreamConnection::connect(&blog, "blog-1")
        .await
        .unwrap()
        .channel();
    let search_channel = RedisStreamConnection::connect(&search, "search-1")
        .await
        .unwrap()
        .channel();
    blog_channel.declare_topic(&topic).await.unwrap();
    search_channel.declare_topic(&topic).await.unwrap();

    blog_channel.send(&topic, b"event").await.unwrap();

    let first = blog_channel.next_delivery(&topic).await.unwrap().unwrap();
    blog_channel.ack(&first).await.unwrap();
    assert_eq!(blog_channel.depth(&topic).await.unwrap(), 0);
    // 一个组确认后另一个组仍能读到
    assert_eq!(search_channel.depth(&topic).await.unwrap(), 1);

    let other = search_channel.next_delivery(&topic).await.unwrap().unwrap();
    assert_eq!(other.payload, b"event");
    assert!(!other.redelivered);

    // 重新入队只影响本组
    search_channel.nack(&other, true).await.unwrap();
    assert!(blog_channel.next_delivery(&topic).await.unwrap().is_none());
    let again = search_channel.next_delivery(&topic).await.unwrap().unwrap();
    assert!(again.redelivered);
    search_channel.ack(&again).await.unwrap();

    assert!(search_channel.next_delivery(&topic).await.unwrap().is_none());
    assert_eq!(search_channel.depth(&topic).await.unwrap(), 0);
    cleanup(&[&topic]).await;
}

#[tokio::test]
async fn test_stream_is_trimmed_to_max_len() {
    require_redis!("test_stream_is_trimmed_to_max_len");
    let topic = common::unique_topic("oxsync-stream-trim");
    let config = BrokerConfig {
        stream_max_len: 10,
        ..broker_config(&topic)
    };
    let channel = RedisStreamConnection::connect(&config, "consumer-a")
        .await
        .unwrap()
        .channel();
    channel.declare_topic(&topic).await.unwrap();
    for i in 0..500 {
        channel.send(&topic, format!("m{}", i).as_bytes()).await.unwrap();
    }

    let client = redis::Client::open(oxsync::utils::redis_url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let len: u64 = redis::cmd("XLEN").arg(&topic).query_async(&mut conn).await.unwrap();
    assert!(len < 500, "stream length {} was not trimmed", len);
    cleanup(&[&topic]).await;
}

#[tokio::test]
async fn test_unacked_entries_are_redelivered_to_restarted_consumer() {
    require_redis!("test_unacked_entries_are_redelivered_to_restarted_consumer");
    let topic = common::unique_topic("oxsync-stream-pel");
    let config = broker_config(&topic);
    {
        let connection = RedisStreamConnection::connect(&config, "consumer-a")
            .await
            .unwrap();
        let channel = connection.channel();
        channel.declare_topic(&topic).await.unwrap();
        channel.send(&topic, b"crash").await.unwrap();
        let delivery = channel.next_delivery(&topic).await.unwrap().unwrap();
        assert!(!delivery.redelivered);
        // 不确认即退出
    }

    let connection = RedisStreamConnection::connect(&config, "consumer-a")
        .await
        .unwrap();
    let channel = connection.channel();
    let delivery = channel.next_delivery(&topic).await.unwrap().unwrap();
    assert_eq!(delivery.payload, b"crash");
    assert!(delivery.redelivered);
    channel.ack(&delivery).await.unwrap();
    assert!(channel.next_delivery(&topic).await.unwrap().is_none());
    cleanup(&[&topic]).await;
}

#[tokio::test]
async fn test_redis_cache_store_pattern_delete() {
    require_redis!("test_redis_cache_store_pattern_delete");
    let store = RedisCacheStore::new(&cache_config()).await.unwrap();
    let scope = uuid::Uuid::new_v4().simple().to_string();
    let keys: Vec<String> = (0..25)
        .map(|i| format!("blogs:{}:{}", scope, i))
        .chain(std::iter::once(format!("blog:{}", scope)))
        .collect();
    for key in &keys {
        store.set_with_ttl(key, b"[]".to_vec(), 60).await.unwrap();
    }

    let pattern = KeyPattern::parse(&format!("blogs:{}:*", scope)).unwrap();
    assert_eq!(store.keys_matching(&pattern).await.unwrap().len(), 25);
    assert_eq!(store.delete_matching(&pattern).await.unwrap(), 25);
    assert_eq!(store.delete_matching(&pattern).await.unwrap(), 0);

    let detail = format!("blog:{}", scope);
    assert!(store.get(&detail).await.unwrap().is_some());
    let exact = KeyPattern::parse(&detail).unwrap();
    assert_eq!(store.delete_matching(&exact).await.unwrap(), 1);
    assert!(store.get(&detail).await.unwrap().is_none());

    let marker = format!("oxsync:processed:{}", scope);
    assert!(store.set_nx(&marker, "1", 60).await.unwrap());
    assert!(!store.set_nx(&marker, "1", 60).await.unwrap());
    store.ping().await.unwrap();
    cleanup(&[&marker]).await;
}

#[tokio::test]
async fn test_redis_pipeline_end_to_end() {
    require_redis!("test_redis_pipeline_end_to_end");
    let topic = common::unique_topic("oxsync-e2e");
    let config = broker_config(&topic);
    let cache: Arc<dyn CacheStore> = Arc::new(RedisCacheStore::new(&cache_config()).await.unwrap());
    let scope = uuid::Uuid::new_v4().simple().to_string();
    let listing = format!("blogs:{}:all", scope);
    let detail = format!("blog:{}", scope);
    cache.set_with_ttl(&listing, b"[]".to_vec(), 60).await.unwrap();
    cache.set_with_ttl(&detail, b"{}".to_vec(), 60).await.unwrap();

    let connector: Arc<dyn Connector> = Arc::new(BrokerConnector::new(config.clone(), "e2e-1"));
    let subscription = consume(
        connector.clone(),
        topic.clone(),
        Arc::new(InvalidationConsumer::new(cache.clone(), 60)),
        common::fast_options(),
    );
    assert!(
        subscription
            .wait_for(Duration::from_secs(5), |s| *s == ConsumerState::Subscribed)
            .await
    );

    let publisher = InvalidationPublisher::new(connector, &config);
    publisher
        .invalidate([format!("blogs:{}:*", scope)])
        .await
        .unwrap();

    let mut gone = false;
    for _ in 0..100 {
        if cache.get(&listing).await.unwrap().is_none() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(gone, "listing key should be invalidated");
    assert!(cache.get(&detail).await.unwrap().is_some());

    subscription.shutdown().await.unwrap();
    cleanup(&[&topic, &detail]).await;
}
