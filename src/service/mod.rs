//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 失效管道两端的服务适配器：作者服务的写后触发和博客服务的读穿透缓存。

pub mod author;
pub mod blog;

pub use author::{AuthorWriteHook, BlogMutation};
pub use blog::{BlogReadCache, CacheStatus, CachedRead};
