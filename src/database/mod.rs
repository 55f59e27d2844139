//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 博客数据源模块
//!
//! 提供读路径和缓存重建使用的只读查询，表结构由博客服务自身管理

use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sea_orm::FromQueryResult;
use serde::{Deserialize, Serialize};

pub mod blog_store;

pub use blog_store::SeaOrmBlogStore;

/// 数据库类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite, // 用于测试和开发
}

impl DatabaseType {
    /// 从URL字符串解析数据库类型
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else if lower.starts_with("mysql://") {
            DatabaseType::MySQL
        } else {
            DatabaseType::SQLite
        }
    }
}

/// 博客记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromQueryResult)]
pub struct Blog {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub blogcontent: String,
    pub image: String,
    pub category: String,
    pub author_id: String,
    pub created_at: NaiveDateTime,
}

/// 列表查询条件
///
/// 空白字符串视为未提供
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlogFilter {
    pub search: Option<String>,
    pub category: Option<String>,
}

impl BlogFilter {
    pub fn new(search: Option<&str>, category: Option<&str>) -> Self {
        let normalize = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            search: normalize(search),
            category: normalize(category),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.search.is_none() && self.category.is_none()
    }
}

/// 博客数据源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlogStore: Send + Sync {
    /// 全部博客，按创建时间倒序
    async fn list_all(&self) -> Result<Vec<Blog>>;

    /// 按条件查询，按创建时间倒序
    async fn search(&self, filter: &BlogFilter) -> Result<Vec<Blog>>;

    /// 按ID查询
    async fn find_by_id(&self, id: i32) -> Result<Option<Blog>>;
}
