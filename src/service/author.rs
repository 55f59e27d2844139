//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了作者服务写操作提交后的失效触发。

use crate::keys::{blog_detail_key, ALL_BLOG_LISTS};
use crate::sync::{InvalidationPublisher, PublishOutcome};
use std::sync::Arc;
use tracing::instrument;

/// 已提交的博客写操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlogMutation {
    Created { id: i32 },
    Updated { id: i32 },
    Deleted { id: i32 },
}

impl BlogMutation {
    /// 需要失效的缓存键模式
    ///
    /// 新建的博客还没有详情缓存，只需失效所有列表视图
    pub fn invalidation_keys(&self) -> Vec<String> {
        match self {
            BlogMutation::Created { .. } => vec![ALL_BLOG_LISTS.to_string()],
            BlogMutation::Updated { id } | BlogMutation::Deleted { id } => {
                vec![ALL_BLOG_LISTS.to_string(), blog_detail_key(id)]
            }
        }
    }
}

/// 作者服务的写后钩子
#[derive(Clone)]
pub struct AuthorWriteHook {
    publisher: Arc<InvalidationPublisher>,
}

impl AuthorWriteHook {
    pub fn new(publisher: Arc<InvalidationPublisher>) -> Self {
        Self { publisher }
    }

    /// 写操作提交后调用，发布失败不会回滚写操作
    #[instrument(skip(self), level = "debug")]
    pub async fn after_commit(&self, mutation: BlogMutation) -> PublishOutcome {
        self.publisher
            .publish_after_commit(mutation.invalidation_keys())
            .await
    }
}
