//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 读穿透缓存与失效配合的集成测试

use oxsync::backend::{CacheStore, MemoryCacheStore};
use oxsync::database::BlogStore;
use oxsync::queue::{ConsumerState, Connector};
use oxsync::service::{BlogMutation, BlogReadCache, CacheStatus};
use oxsync::SyncManager;
use sea_orm::ConnectionTrait;
use std::sync::Arc;
use std::time::Duration;

#[path = "../common/mod.rs"]
mod common;

async fn read_cache() -> (BlogReadCache, Arc<MemoryCacheStore>) {
    let cache = Arc::new(common::test_cache());
    let store = Arc::new(common::seeded_blog_store().await);
    (BlogReadCache::new(cache.clone(), store, 3600), cache)
}

#[tokio::test]
async fn test_listing_miss_then_hit() {
    common::setup_logging();
    let (reads, cache) = read_cache().await;

    let first = reads.get_all_blogs(None, None).await.unwrap();
    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(first.value.len(), 3);
    assert_eq!(common::cached_keys(&cache), vec!["blogs:all:all".to_string()]);

    let second = reads.get_all_blogs(None, None).await.unwrap();
    assert_eq!(second.status, CacheStatus::Hit);
    assert_eq!(second.value, first.value);
}

#[tokio::test]
async fn test_filtered_listing_uses_its_own_key() {
    common::setup_logging();
    let (reads, cache) = read_cache().await;

    let rust = reads.get_all_blogs(Some("rust"), None).await.unwrap();
    let ids: Vec<i32> = rust.value.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![3, 1]);

    // 空白搜索词与未提供相同
    let blank = reads.get_all_blogs(Some("  "), Some("")).await.unwrap();
    assert_eq!(blank.value.len(), 3);

    let food = reads.get_all_blogs(None, Some("Food")).await.unwrap();
    assert_eq!(food.value.len(), 1);

    assert_eq!(
        common::cached_keys(&cache),
        vec![
            "blogs:all:Food".to_string(),
            "blogs:all:all".to_string(),
            "blogs:rust:all".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_single_blog_missing_record_is_not_cached() {
    common::setup_logging();
    let (reads, cache) = read_cache().await;

    let found = reads.get_single_blog(2).await.unwrap();
    assert_eq!(found.status, CacheStatus::Miss);
    assert_eq!(found.value.as_ref().map(|b| b.title.as_str()), Some("Baking"));
    assert_eq!(
        reads.get_single_blog(2).await.unwrap().status,
        CacheStatus::Hit
    );

    let missing = reads.get_single_blog(404).await.unwrap();
    assert!(missing.value.is_none());
    assert!(cache.get("blog:404").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_store() {
    common::setup_logging();
    let (reads, cache) = read_cache().await;
    cache.set_available(false);

    let blogs = reads.get_all_blogs(None, None).await.unwrap();
    assert_eq!(blogs.status, CacheStatus::Miss);
    assert_eq!(blogs.value.len(), 3);

    cache.set_available(true);
    assert!(common::cached_keys(&cache).is_empty());
}

#[tokio::test]
async fn test_update_invalidates_and_next_read_sees_new_data() {
    common::setup_logging();
    let topic = common::unique_topic("read-path-update");
    let broker = common::test_broker();
    let cache = Arc::new(common::test_cache());
    let store = Arc::new(common::seeded_blog_store().await);
    let connector: Arc<dyn Connector> = Arc::new(broker.clone());
    let manager = SyncManager::with_components(
        common::memory_config(&topic),
        cache.clone(),
        Some(store.clone() as Arc<dyn BlogStore>),
        connector,
    );
    let reads = manager.read_cache().unwrap();

    let subscription = manager.start_consumer().unwrap();
    assert!(
        subscription
            .wait_for(Duration::from_secs(2), |s| *s == ConsumerState::Subscribed)
            .await
    );

    assert_eq!(
        reads.get_single_blog(1).await.unwrap().value.unwrap().title,
        "Rust async"
    );
    reads.get_all_blogs(None, None).await.unwrap();
    reads.get_all_blogs(Some("rust"), None).await.unwrap();

    // 作者服务提交写操作后发布失效
    store
        .connection()
        .execute_unprepared("UPDATE blogs SET title = 'Rust async v2' WHERE id = 1")
        .await
        .unwrap();
    assert!(manager
        .author_hook()
        .after_commit(BlogMutation::Updated { id: 1 })
        .await
        .is_published());
    assert!(common::wait_drained(&broker, &topic).await);

    // 默认列表已被重建，其余视图等待读路径回填
    assert_eq!(common::cached_keys(&cache), vec!["blogs:all:all".to_string()]);
    let listing = reads.get_all_blogs(None, None).await.unwrap();
    assert_eq!(listing.status, CacheStatus::Hit);
    assert!(listing.value.iter().any(|b| b.title == "Rust async v2"));

    let single = reads.get_single_blog(1).await.unwrap();
    assert_eq!(single.status, CacheStatus::Miss);
    assert_eq!(single.value.unwrap().title, "Rust async v2");

    subscription.shutdown().await.unwrap();
}
