//! 上下文缓存
//!
//! 上下文文档发布后不可变，按 URL 缓存。每个 URL 对应一个槽位，并发的首次访问
//! 共享同一次获取（single-flight）；获取失败不会写入缓存。

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

use crate::context::document::{ContextDocument, ResolvedContext};
use crate::context::loader::ContextLoader;
use crate::error::{AppError, Result};

const MAX_IMPORT_DEPTH: usize = 8;

struct CacheSlot {
    document: OnceCell<Arc<ContextDocument>>,
    inserted_at: Instant,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            document: OnceCell::new(),
            inserted_at: Instant::now(),
        }
    }
}

/// 上下文缓存
pub struct ContextCache {
    loader: Arc<dyn ContextLoader>,
    entries: DashMap<String, Arc<CacheSlot>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl std::fmt::Debug for ContextCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCache")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ContextCache {
    /// 创建缓存；`ttl` 为 `None` 时条目永不过期
    pub fn new(loader: Arc<dyn ContextLoader>, capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            loader,
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().document.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取单个上下文文档
    pub async fn resolve(&self, url: &str) -> Result<Arc<ContextDocument>> {
        let slot = self.slot_for(url);
        let document = slot
            .document
            .get_or_try_init(|| async {
                let raw = self.loader.load(url).await?;
                let document = ContextDocument::parse(url, &raw)?;
                tracing::debug!(url, terms = document.terms.len(), "context document cached");
                Ok::<_, AppError>(Arc::new(document))
            })
            .await?;
        Ok(document.clone())
    }

    /// 获取并合并多个上下文（包含文档内引用的远程上下文）
    pub async fn resolve_all(&self, urls: &[String]) -> Result<ResolvedContext> {
        let mut documents = Vec::new();
        let mut seen = HashSet::new();
        for url in urls {
            self.collect(url, &mut documents, &mut seen, 0).await?;
        }
        Ok(ResolvedContext::from_documents(&documents))
    }

    /// 在给定上下文下展开短名
    pub async fn expand(&self, short_name: &str, urls: &[String]) -> Result<String> {
        self.resolve_all(urls).await?.expand(short_name)
    }

    fn collect<'a>(
        &'a self,
        url: &'a str,
        documents: &'a mut Vec<Arc<ContextDocument>>,
        seen: &'a mut HashSet<String>,
        depth: usize,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if depth > MAX_IMPORT_DEPTH {
                return Err(AppError::ContextRetrievalFailure(format!(
                    "{url}: context imports nested too deeply"
                )));
            }
            if !seen.insert(url.to_string()) {
                return Ok(());
            }
            let document = self.resolve(url).await?;
            for import in &document.imports {
                self.collect(import, documents, seen, depth + 1).await?;
            }
            documents.push(document);
            Ok(())
        })
    }

    fn is_expired(&self, slot: &CacheSlot) -> bool {
        self.ttl
            .map(|ttl| slot.inserted_at.elapsed() > ttl)
            .unwrap_or(false)
    }

    fn slot_for(&self, url: &str) -> Arc<CacheSlot> {
        let existing = self.entries.get(url).map(|entry| entry.value().clone());
        if let Some(slot) = existing
            && !self.is_expired(&slot)
        {
            return slot;
        }

        if !self.entries.contains_key(url) {
            self.evict_if_full();
        }

        let mut entry = self
            .entries
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(CacheSlot::new()));
        if self.is_expired(entry.value()) {
            *entry.value_mut() = Arc::new(CacheSlot::new());
        }
        entry.value().clone()
    }

    fn evict_if_full(&self) {
        if self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            tracing::debug!(url = %key, "evicting context document");
            self.entries.remove(&key);
        }
    }
}
