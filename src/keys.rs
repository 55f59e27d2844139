//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 缓存键协议
//!
//! 读路径的键派生规则（`blogs:<search>:<category>`、`blog:<id>`）以及
//! 失效事件中使用的 Redis 风格通配模式。

use crate::error::{Result, SyncError};
use regex::Regex;
use std::fmt;

/// 列表视图键前缀
pub const BLOG_LIST_PREFIX: &str = "blogs";
/// 详情视图键前缀
pub const BLOG_DETAIL_PREFIX: &str = "blog";
/// 未指定搜索词或分类时使用的占位段
pub const ALL_SEGMENT: &str = "all";
/// 匹配所有列表视图的模式
pub const ALL_BLOG_LISTS: &str = "blogs:*";
/// 已处理事件标记的键前缀，位于读路径命名空间之外
pub const PROCESSED_MARKER_PREFIX: &str = "oxsync:processed:";

/// 读路径命名空间根
///
/// 失效模式的字面前缀必须以其中之一开头
pub const NAMESPACE_ROOTS: [&str; 2] = ["blogs:", "blog:"];

fn segment(value: Option<&str>) -> &str {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => ALL_SEGMENT,
    }
}

/// 列表视图的缓存键
///
/// 空字符串与缺省一样映射为 `all`，与读路径的查询条件保持一致
pub fn blog_list_key(search: Option<&str>, category: Option<&str>) -> String {
    format!(
        "{}:{}:{}",
        BLOG_LIST_PREFIX,
        segment(search),
        segment(category)
    )
}

/// 默认（无过滤）列表视图的缓存键，即 `blogs:all:all`
pub fn default_listing_key() -> String {
    blog_list_key(None, None)
}

/// 详情视图的缓存键
pub fn blog_detail_key(id: impl fmt::Display) -> String {
    format!("{}:{}", BLOG_DETAIL_PREFIX, id)
}

/// 已处理事件标记键
pub fn processed_marker_key(idempotency_id: impl fmt::Display) -> String {
    format!("{}{}", PROCESSED_MARKER_PREFIX, idempotency_id)
}

/// 缓存键模式
///
/// 语义与 Redis `SCAN MATCH` 的 glob 一致：`*`、`?`、`[...]`（支持 `^` 取反和区间）、
/// `\` 转义。不含元字符的模式即精确键。
#[derive(Clone)]
pub struct KeyPattern {
    raw: String,
    literal_prefix: String,
    is_glob: bool,
    matcher: Regex,
}

impl fmt::Debug for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyPattern").field(&self.raw).finish()
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for KeyPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for KeyPattern {}

impl KeyPattern {
    /// 解析模式
    ///
    /// # 参数
    ///
    /// * `raw` - 原始模式字符串
    ///
    /// # 返回值
    ///
    /// 空模式、未闭合的 `[` 或末尾悬空的 `\` 返回 `InvalidEvent`
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(SyncError::InvalidEvent(
                "key pattern cannot be empty".to_string(),
            ));
        }

        let chars: Vec<char> = raw.chars().collect();
        let mut expr = String::from("(?s)^");
        let mut literal_prefix = String::new();
        let mut in_prefix = true;
        let mut is_glob = false;
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '*' => {
                    expr.push_str(".*");
                    in_prefix = false;
                    is_glob = true;
                }
                '?' => {
                    expr.push('.');
                    in_prefix = false;
                    is_glob = true;
                }
                '[' => {
                    let (class, next) = translate_class(&chars, i + 1, raw)?;
                    expr.push_str(&class);
                    in_prefix = false;
                    is_glob = true;
                    i = next;
                    continue;
                }
                '\\' => {
                    let escaped = chars.get(i + 1).ok_or_else(|| {
                        SyncError::InvalidEvent(format!("dangling escape in pattern '{}'", raw))
                    })?;
                    expr.push_str(&regex::escape(&escaped.to_string()));
                    if in_prefix {
                        literal_prefix.push(*escaped);
                    }
                    i += 2;
                    continue;
                }
                c => {
                    expr.push_str(&regex::escape(&c.to_string()));
                    if in_prefix {
                        literal_prefix.push(c);
                    }
                }
            }
            i += 1;
        }
        expr.push('$');

        let matcher = Regex::new(&expr).map_err(|e| {
            SyncError::InvalidEvent(format!("invalid key pattern '{}': {}", raw, e))
        })?;

        Ok(Self {
            raw: raw.to_string(),
            literal_prefix,
            is_glob,
            matcher,
        })
    }

    /// 原始模式字符串（可直接传给 Redis `MATCH`）
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 是否包含通配元字符
    pub fn is_glob(&self) -> bool {
        self.is_glob
    }

    /// 第一个通配元字符之前的字面前缀（已去除转义）
    pub fn literal_prefix(&self) -> &str {
        &self.literal_prefix
    }

    /// 若模式不含通配符，返回其对应的精确键
    pub fn exact_key(&self) -> Option<&str> {
        if self.is_glob {
            None
        } else {
            Some(&self.literal_prefix)
        }
    }

    /// 判断键是否匹配该模式
    pub fn matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }

    /// 模式是否落在读路径的键命名空间内
    pub fn in_namespace(&self) -> bool {
        NAMESPACE_ROOTS
            .iter()
            .any(|root| self.literal_prefix.starts_with(root))
    }
}

/// 将 `[...]` 字符类翻译为正则表达式，返回翻译结果和 `]` 之后的位置
fn translate_class(chars: &[char], start: usize, raw: &str) -> Result<(String, usize)> {
    let mut i = start;
    let mut class = String::from("[");

    if chars.get(i) == Some(&'^') {
        class.push('^');
        i += 1;
    }

    let mut members = 0usize;
    loop {
        let c = *chars.get(i).ok_or_else(|| {
            SyncError::InvalidEvent(format!("unterminated character class in pattern '{}'", raw))
        })?;

        match c {
            ']' if members > 0 => {
                class.push(']');
                return Ok((class, i + 1));
            }
            '\\' => {
                let escaped = chars.get(i + 1).ok_or_else(|| {
                    SyncError::InvalidEvent(format!("dangling escape in pattern '{}'", raw))
                })?;
                push_class_char(&mut class, *escaped);
                i += 2;
            }
            _ if chars.get(i + 1) == Some(&'-')
                && chars.get(i + 2).is_some_and(|end| *end != ']') =>
            {
                let (mut lo, mut hi) = (c, chars[i + 2]);
                if lo > hi {
                    std::mem::swap(&mut lo, &mut hi);
                }
                push_class_char(&mut class, lo);
                class.push('-');
                push_class_char(&mut class, hi);
                i += 3;
            }
            _ => {
                push_class_char(&mut class, c);
                i += 1;
            }
        }
        members += 1;
    }
}

fn push_class_char(class: &mut String, c: char) {
    if matches!(c, '\\' | ']' | '[' | '^' | '-' | '&' | '~') {
        class.push('\\');
    }
    class.push(c);
}
