//! Cache-accelerated store client
//!
//! Wraps any `StoreClient` with a read-through item cache, the
//! accelerated half of the dual execution path. Semantics follow the
//! managed read caches this path models: eventually consistent reads may
//! be served from the cache, consistent reads always bypass it, and
//! every write through this client invalidates the affected keys. Query
//! pages are not cached.

use super::{
    BatchGetOutcome, BatchWriteOutcome, BatchWriteRequest, Item, Key, QueryPage, QueryRequest,
    StoreClient, StoreResult, TransactWriteOp,
};
use crate::expr::Update;
use crate::schema::{ATTR_PK, ATTR_SK};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Cache entry key: one item under one projection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    table: String,
    pk: String,
    sk: String,
    /// Projection signature; `None` caches the full item
    projection: Option<Vec<String>>,
}

/// Cache counters, exposed for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

/// Read-through caching decorator over a store client
pub struct AcceleratedStoreClient {
    inner: Arc<dyn StoreClient>,
    entries: Mutex<HashMap<CacheKey, Option<Item>>>,
    max_entries: usize,
    stats: Mutex<CacheStats>,
}

impl std::fmt::Debug for AcceleratedStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratedStoreClient")
            .field("max_entries", &self.max_entries)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl AcceleratedStoreClient {
    /// Wrap a client with an item cache holding up to `max_entries`
    pub fn new(inner: Arc<dyn StoreClient>, max_entries: usize) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Current cache counters
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    /// Drop every cached entry for one item, across all projections
    fn invalidate(&self, table: &str, pk: &str, sk: &str) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !(key.table == table && key.pk == pk && key.sk == sk));
        let dropped = before - entries.len();
        if dropped > 0 {
            self.stats.lock().invalidations += dropped as u64;
        }
    }

    fn invalidate_item(&self, table: &str, item: &Item) {
        let pk = item.get(ATTR_PK).and_then(|v| v.as_s().ok());
        let sk = item.get(ATTR_SK).and_then(|v| v.as_s().ok());
        if let (Some(pk), Some(sk)) = (pk, sk) {
            self.invalidate(table, pk, sk);
        }
    }

    fn insert(&self, key: CacheKey, value: Option<Item>) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            // Evict an arbitrary resident entry to stay under the cap.
            if let Some(evict) = entries.keys().next().cloned() {
                entries.remove(&evict);
                self.stats.lock().evictions += 1;
            }
        }
        entries.insert(key, value);
    }
}

#[async_trait]
impl StoreClient for AcceleratedStoreClient {
    async fn conditional_put(
        &self,
        table: &str,
        item: Item,
        condition: Option<&super::WriteCondition>,
    ) -> StoreResult<()> {
        self.invalidate_item(table, &item);
        self.inner.conditional_put(table, item, condition).await
    }

    async fn update(
        &self,
        table: &str,
        key: &Key,
        update: &Update,
        condition: Option<&super::WriteCondition>,
    ) -> StoreResult<()> {
        self.invalidate(table, &key.pk, &key.sk);
        self.inner.update(table, key, update, condition).await
    }

    async fn delete(&self, table: &str, key: &Key) -> StoreResult<()> {
        self.invalidate(table, &key.pk, &key.sk);
        self.inner.delete(table, key).await
    }

    async fn get(
        &self,
        table: &str,
        key: &Key,
        consistent: bool,
        projection: Option<&[String]>,
    ) -> StoreResult<Option<Item>> {
        if consistent {
            return self.inner.get(table, key, consistent, projection).await;
        }

        let cache_key = CacheKey {
            table: table.to_string(),
            pk: key.pk.clone(),
            sk: key.sk.clone(),
            projection: projection.map(<[String]>::to_vec),
        };

        if let Some(cached) = self.entries.lock().get(&cache_key) {
            self.stats.lock().hits += 1;
            return Ok(cached.clone());
        }
        self.stats.lock().misses += 1;

        let fetched = self.inner.get(table, key, consistent, projection).await?;
        self.insert(cache_key, fetched.clone());
        Ok(fetched)
    }

    async fn query(&self, table: &str, request: &QueryRequest) -> StoreResult<QueryPage> {
        self.inner.query(table, request).await
    }

    async fn batch_write(
        &self,
        table: &str,
        request: &BatchWriteRequest,
    ) -> StoreResult<BatchWriteOutcome> {
        for item in &request.puts {
            self.invalidate_item(table, item);
        }
        for key in &request.deletes {
            self.invalidate(table, &key.pk, &key.sk);
        }
        self.inner.batch_write(table, request).await
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[Key],
        consistent: bool,
        projection: Option<&[String]>,
    ) -> StoreResult<BatchGetOutcome> {
        self.inner.batch_get(table, keys, consistent, projection).await
    }

    async fn transact_get(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Option<Item>>> {
        self.inner.transact_get(table, keys).await
    }

    async fn transact_write(&self, table: &str, ops: &[TransactWriteOp]) -> StoreResult<()> {
        for op in ops {
            match op {
                TransactWriteOp::Put { item, .. } => self.invalidate_item(table, item),
                TransactWriteOp::Update { key, .. } | TransactWriteOp::Delete { key, .. } => {
                    self.invalidate(table, &key.pk, &key.sk)
                }
            }
        }
        self.inner.transact_write(table, ops).await
    }
}
