//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于 Sea-ORM 的博客数据源。

use super::{Blog, BlogFilter, BlogStore, DatabaseType};
use crate::config::DatabaseConfig;
use crate::error::{Result, SyncError};
use crate::utils::redaction::redact_connection_string;
use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    FromQueryResult, Statement, Value,
};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, instrument};

const LIST_ALL_SQL: &str = "SELECT * FROM blogs ORDER BY created_at DESC";

/// Sea-ORM 博客数据源
#[derive(Clone, Debug)]
pub struct SeaOrmBlogStore {
    connection: DatabaseConnection,
}

impl SeaOrmBlogStore {
    /// 连接数据库
    #[instrument(skip(config), level = "info", name = "connect_blog_store")]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.expose_secret();
        let mut opt = ConnectOptions::new(url.to_string());
        opt.max_connections(config.max_connections)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .sqlx_logging(false);
        // 每个内存数据库连接都是独立的库
        if DatabaseType::from_url(url) == DatabaseType::SQLite && url.contains(":memory:") {
            opt.max_connections(1).min_connections(1);
        }

        let connection = Database::connect(opt).await.map_err(|e| {
            SyncError::ConfigError(format!(
                "Failed to open database {}: {}",
                redact_connection_string(url),
                e
            ))
        })?;
        debug!("博客数据源已连接: {}", redact_connection_string(url));
        Ok(Self { connection })
    }

    pub fn from_connection(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    fn backend(&self) -> DatabaseBackend {
        self.connection.get_database_backend()
    }
}

/// 生成第 `n` 个参数的占位符
fn placeholder(backend: DatabaseBackend, n: usize) -> String {
    match backend {
        DatabaseBackend::Postgres => format!("${}", n),
        _ => "?".to_string(),
    }
}

/// 构造条件查询：搜索词匹配标题或描述，分类单独匹配，条件之间为 OR
pub(crate) fn search_statement(backend: DatabaseBackend, filter: &BlogFilter) -> Statement {
    if filter.is_empty() {
        return Statement::from_string(backend, LIST_ALL_SQL.to_string());
    }

    let like = match backend {
        DatabaseBackend::Postgres => "ILIKE",
        _ => "LIKE",
    };
    let mut clauses = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search);
        values.push(pattern.clone().into());
        let title = placeholder(backend, values.len());
        values.push(pattern.into());
        let description = placeholder(backend, values.len());
        clauses.push(format!("title {like} {title}"));
        clauses.push(format!("description {like} {description}"));
    }
    if let Some(category) = &filter.category {
        values.push(format!("%{}%", category).into());
        let category = placeholder(backend, values.len());
        clauses.push(format!("category {like} {category}"));
    }

    let sql = format!(
        "SELECT * FROM blogs WHERE {} ORDER BY created_at DESC",
        clauses.join(" OR ")
    );
    Statement::from_sql_and_values(backend, sql, values)
}

#[async_trait]
impl BlogStore for SeaOrmBlogStore {
    #[instrument(skip(self), level = "debug")]
    async fn list_all(&self) -> Result<Vec<Blog>> {
        let stmt = Statement::from_string(self.backend(), LIST_ALL_SQL.to_string());
        Ok(Blog::find_by_statement(stmt).all(&self.connection).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn search(&self, filter: &BlogFilter) -> Result<Vec<Blog>> {
        let stmt = search_statement(self.backend(), filter);
        Ok(Blog::find_by_statement(stmt).all(&self.connection).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_by_id(&self, id: i32) -> Result<Option<Blog>> {
        let sql = format!(
            "SELECT * FROM blogs WHERE id = {}",
            placeholder(self.backend(), 1)
        );
        let stmt = Statement::from_sql_and_values(self.backend(), sql, [id.into()]);
        Ok(Blog::find_by_statement(stmt).one(&self.connection).await?)
    }
}
